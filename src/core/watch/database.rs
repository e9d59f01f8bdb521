// src/core/watch/database.rs

//! Database specialization (§4.6): identical republish-on-mutation shape
//! to the app watcher, over `DatabaseInfo`, including awaiting the
//! republish send in place to preserve arrival order and backpressure.

use super::WatcherSpec;
use crate::core::errors::GatewayError;
use crate::rpc::client::AuthorityClient;
use crate::rpc::proto::{DatabaseInfo, EventType, WatchEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub struct DatabaseWatcher {
    client: Arc<dyn AuthorityClient>,
    current: RwLock<HashMap<String, DatabaseInfo>>,
    databases_tx: mpsc::Sender<Vec<DatabaseInfo>>,
}

impl DatabaseWatcher {
    pub fn new(
        client: Arc<dyn AuthorityClient>,
        buffer: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Vec<DatabaseInfo>>) {
        let (tx, rx) = mpsc::channel(buffer);
        let watcher = Arc::new(Self {
            client,
            current: RwLock::new(HashMap::new()),
            databases_tx: tx,
        });
        (watcher, rx)
    }

    pub fn get_current(&self) -> Vec<DatabaseInfo> {
        self.current.read().values().cloned().collect()
    }

    async fn republish(&self) {
        let snapshot = self.get_current();
        let _ = self.databases_tx.send(snapshot).await;
    }
}

#[async_trait]
impl WatcherSpec for DatabaseWatcher {
    fn resource_kind(&self) -> &'static str {
        "database"
    }

    async fn fetch_all(&self) -> Result<(), GatewayError> {
        let list = self.client.get_databases().await?;
        let mut map = HashMap::with_capacity(list.databases.len());
        for database in list.databases {
            map.insert(database.name.clone(), database);
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
            warn!(kind = %event.kind, "unexpected event kind for database watcher");
            return;
        }
        match EventType::try_from(event.r#type) {
            Ok(EventType::Delete) => {
                self.current.write().remove(&event.name);
                self.republish().await;
            }
            Ok(EventType::Put) => match decode_database(&event.payload) {
                Ok(database) => {
                    self.current.write().insert(event.name, database);
                    self.republish().await;
                }
                Err(_) => warn!("failed to decode database payload"),
            },
            _ => warn!(event_type = event.r#type, "unexpected event type for database watcher"),
        }
    }

    fn notify_stale(&self) {
        crate::core::metrics::set_watcher_stale(self.resource_kind(), true);
    }
}

fn decode_database(payload: &[u8]) -> Result<DatabaseInfo, GatewayError> {
    prost::Message::decode(payload).map_err(|e| GatewayError::Protocol(e.to_string()))
}
