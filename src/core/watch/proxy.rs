// src/core/watch/proxy.rs

//! Proxy specialization (§4.6): broadcast only on additions/deletions that
//! change membership, never on metadata-only updates of an already-known
//! proxy. Grounded on `watcher.go`'s `proxyCollector`.

use super::WatcherSpec;
use crate::core::errors::GatewayError;
use crate::rpc::client::AuthorityClient;
use crate::rpc::proto::{EventType, ProxyInfo, WatchEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

pub struct ProxyWatcher {
    client: Arc<dyn AuthorityClient>,
    current: RwLock<HashMap<String, ProxyInfo>>,
    proxies_tx: watch::Sender<Vec<ProxyInfo>>,
}

impl ProxyWatcher {
    pub fn new(client: Arc<dyn AuthorityClient>) -> (Arc<Self>, watch::Receiver<Vec<ProxyInfo>>) {
        let (tx, rx) = watch::channel(Vec::new());
        let watcher = Arc::new(Self {
            client,
            current: RwLock::new(HashMap::new()),
            proxies_tx: tx,
        });
        (watcher, rx)
    }

    pub fn get_current(&self) -> Vec<ProxyInfo> {
        self.current.read().values().cloned().collect()
    }

    fn broadcast(&self) {
        let snapshot = self.get_current();
        let _ = self.proxies_tx.send(snapshot);
    }
}

#[async_trait]
impl WatcherSpec for ProxyWatcher {
    fn resource_kind(&self) -> &'static str {
        "proxy"
    }

    async fn fetch_all(&self) -> Result<(), GatewayError> {
        let list = self.client.get_proxies().await?;
        if list.proxies.is_empty() {
            return Err(GatewayError::Transient("empty proxy list".into()));
        }
        let mut map = HashMap::with_capacity(list.proxies.len());
        for proxy in list.proxies {
            map.insert(proxy.name.clone(), proxy);
        }
        let count = map.len();
        *self.current.write() = map;
        self.broadcast();
        crate::core::metrics::set_watcher_stale(self.resource_kind(), false);
        crate::core::metrics::set_watcher_resource_count(self.resource_kind(), count);
        Ok(())
    }

    async fn apply_event(&self, event: WatchEvent) {
        if event.kind != self.resource_kind() {
            warn!(kind = %event.kind, "unexpected event kind for proxy watcher");
            return;
        }
        let Ok(proxy) = decode_proxy(&event.payload) else {
            warn!("failed to decode proxy payload");
            return;
        };

        match EventType::try_from(event.r#type) {
            Ok(EventType::Delete) => {
                self.current.write().remove(&event.name);
                self.broadcast();
            }
            Ok(EventType::Put) => {
                let is_new_membership = {
                    let mut guard = self.current.write();
                    let is_new = !guard.contains_key(&event.name);
                    guard.insert(event.name.clone(), proxy);
                    is_new
                };
                if is_new_membership {
                    self.broadcast();
                }
            }
            _ => warn!(event_type = event.r#type, "unexpected event type for proxy watcher"),
        }
    }

    fn notify_stale(&self) {
        crate::core::metrics::set_watcher_stale(self.resource_kind(), true);
    }
}

fn decode_proxy(payload: &[u8]) -> Result<ProxyInfo, GatewayError> {
    prost::Message::decode(payload).map_err(|e| GatewayError::Protocol(e.to_string()))
}
