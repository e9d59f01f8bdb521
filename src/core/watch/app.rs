// src/core/watch/app.rs

//! App specialization (§4.6): republishes the full slice on every
//! mutation via an output channel; if no reader is ready and the watcher
//! is alive, the send blocks rather than dropping the event (§9 open
//! question: "never drop" was the chosen resolution). The send is awaited
//! in place from the watch loop itself, so republishes reach the channel
//! in arrival order and a slow reader's backpressure is felt by the loop,
//! not absorbed by a pile of detached tasks.

use super::WatcherSpec;
use crate::core::errors::GatewayError;
use crate::rpc::client::AuthorityClient;
use crate::rpc::proto::{AppInfo, EventType, WatchEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub struct AppWatcher {
    client: Arc<dyn AuthorityClient>,
    current: RwLock<HashMap<String, AppInfo>>,
    apps_tx: mpsc::Sender<Vec<AppInfo>>,
}

impl AppWatcher {
    pub fn new(client: Arc<dyn AuthorityClient>, buffer: usize) -> (Arc<Self>, mpsc::Receiver<Vec<AppInfo>>) {
        let (tx, rx) = mpsc::channel(buffer);
        let watcher = Arc::new(Self {
            client,
            current: RwLock::new(HashMap::new()),
            apps_tx: tx,
        });
        (watcher, rx)
    }

    pub fn get_current(&self) -> Vec<AppInfo> {
        self.current.read().values().cloned().collect()
    }

    async fn republish(&self) {
        let snapshot = self.get_current();
        let _ = self.apps_tx.send(snapshot).await;
    }
}

#[async_trait]
impl WatcherSpec for AppWatcher {
    fn resource_kind(&self) -> &'static str {
        "app"
    }

    async fn fetch_all(&self) -> Result<(), GatewayError> {
        let list = self.client.get_apps().await?;
        let mut map = HashMap::with_capacity(list.apps.len());
        for app in list.apps {
            map.insert(app.name.clone(), app);
        }
        let count = map.len();
        *self.current.write() = map;
        self.republish().await;
        crate::core::metrics::set_watcher_stale(self.resource_kind(), false);
        crate::core::metrics::set_watcher_resource_count(self.resource_kind(), count);
        Ok(())
    }

    async fn apply_event(&self, event: WatchEvent) {
        if event.kind != self.resource_kind() {
            warn!(kind = %event.kind, "unexpected event kind for app watcher");
            return;
        }
        match EventType::try_from(event.r#type) {
            Ok(EventType::Delete) => {
                self.current.write().remove(&event.name);
                self.republish().await;
            }
            Ok(EventType::Put) => match decode_app(&event.payload) {
                Ok(app) => {
                    self.current.write().insert(event.name, app);
                    self.republish().await;
                }
                Err(_) => warn!("failed to decode app payload"),
            },
            _ => warn!(event_type = event.r#type, "unexpected event type for app watcher"),
        }
    }

    fn notify_stale(&self) {
        crate::core::metrics::set_watcher_stale(self.resource_kind(), true);
    }
}

fn decode_app(payload: &[u8]) -> Result<AppInfo, GatewayError> {
    prost::Message::decode(payload).map_err(|e| GatewayError::Protocol(e.to_string()))
}
