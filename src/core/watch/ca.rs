// src/core/watch/ca.rs

//! Certificate-authority specialization (§4.6): keyed by `(type, name)`;
//! only emits when the new CA is materially different from the stored one,
//! via a provided equivalence predicate. This is the watcher the rotation
//! engine (§4.7) subscribes to. Grounded on `watcher.go`'s generic
//! collector pattern plus its `Fanout` use, applied here to CAs instead of
//! locks.

use super::WatcherSpec;
use crate::core::errors::GatewayError;
use crate::core::fanout::{Fanout, FanoutEvent};
use crate::rpc::client::AuthorityClient;
use crate::rpc::proto::{CertAuthority, EventType, WatchEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// `(ca_type, cluster_name)`.
pub type CaKey = (String, String);

pub struct CaWatcher {
    client: Arc<dyn AuthorityClient>,
    cluster_name: String,
    current: RwLock<HashMap<CaKey, CertAuthority>>,
    pub fanout: Arc<Fanout<CertAuthority>>,
}

impl CaWatcher {
    pub fn new(client: Arc<dyn AuthorityClient>, cluster_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            client,
            cluster_name: cluster_name.into(),
            current: RwLock::new(HashMap::new()),
            fanout: Arc::new(Fanout::new()),
        })
    }

    pub fn get_current(&self, ca_type: &str, cluster_name: &str) -> Option<CertAuthority> {
        self.current
            .read()
            .get(&(ca_type.to_string(), cluster_name.to_string()))
            .cloned()
    }

    /// Returns true if `new_ca` is materially different from the stored
    /// CA for its key: a different `resource_id` or rotation view. Used
    /// both to decide whether to update `current` and whether to emit.
    fn materially_different(current: Option<&CertAuthority>, new_ca: &CertAuthority) -> bool {
        match current {
            None => true,
            Some(existing) => {
                existing.resource_id != new_ca.resource_id || existing.rotation != new_ca.rotation
            }
        }
    }
}

#[async_trait]
impl WatcherSpec for CaWatcher {
    fn resource_kind(&self) -> &'static str {
        "cert_authority"
    }

    async fn fetch_all(&self) -> Result<(), GatewayError> {
        let host_ca = self
            .client
            .get_cert_authority("host", &self.cluster_name, false)
            .await?;
        let key = (host_ca.ca_type.clone(), host_ca.cluster_name.clone());

        let changed = {
            let guard = self.current.read();
            Self::materially_different(guard.get(&key), &host_ca)
        };
        if changed {
            self.current.write().insert(key, host_ca.clone());
            self.fanout.emit(FanoutEvent::Put(host_ca));
        }
        self.fanout.set_init();
        crate::core::metrics::set_watcher_stale(self.resource_kind(), false);
        crate::core::metrics::set_watcher_resource_count(self.resource_kind(), self.current.read().len());
        Ok(())
    }

    async fn apply_event(&self, event: WatchEvent) {
        if event.kind != self.resource_kind() {
            warn!(kind = %event.kind, "unexpected event kind for CA watcher");
            return;
        }
        match EventType::try_from(event.r#type) {
            Ok(EventType::Delete) => {
                self.current
                    .write()
                    .retain(|(_, name), _| name != &event.name);
                self.fanout.emit(FanoutEvent::Delete(event.name));
            }
            Ok(EventType::Put) => match decode_ca(&event.payload) {
                Ok(ca) => {
                    let key = (ca.ca_type.clone(), ca.cluster_name.clone());
                    let changed = {
                        let guard = self.current.read();
                        Self::materially_different(guard.get(&key), &ca)
                    };
                    if changed {
                        self.current.write().insert(key, ca.clone());
                        self.fanout.emit(FanoutEvent::Put(ca));
                    }
                }
                Err(_) => warn!("failed to decode cert authority payload"),
            },
            _ => warn!(event_type = event.r#type, "unexpected event type for CA watcher"),
        }
    }

    fn notify_stale(&self) {
        crate::core::metrics::set_watcher_stale(self.resource_kind(), true);
    }
}

fn decode_ca(payload: &[u8]) -> Result<CertAuthority, GatewayError> {
    prost::Message::decode(payload).map_err(|e| GatewayError::Protocol(e.to_string()))
}
