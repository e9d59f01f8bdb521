// src/core/watch/node.rs

//! Node specialization (§4.6): maintains a map with no broadcast channel;
//! callers poll `get_nodes(filter)` and receive deep copies. Grounded on
//! `watcher.go`'s generic collector pattern, specialized the way the
//! original's node watcher omits a broadcast channel entirely.

use super::WatcherSpec;
use crate::core::errors::GatewayError;
use crate::rpc::client::AuthorityClient;
use crate::rpc::proto::{EventType, NodeInfo, WatchEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub struct NodeWatcher {
    client: Arc<dyn AuthorityClient>,
    namespace: String,
    current: RwLock<HashMap<String, NodeInfo>>,
}

impl NodeWatcher {
    pub fn new(client: Arc<dyn AuthorityClient>, namespace: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            client,
            namespace: namespace.into(),
            current: RwLock::new(HashMap::new()),
        })
    }

    /// Returns deep copies of nodes matching `namespace` (empty matches all).
    pub fn get_nodes(&self, namespace: &str) -> Vec<NodeInfo> {
        self.current
            .read()
            .values()
            .filter(|n| namespace.is_empty() || n.namespace == namespace)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WatcherSpec for NodeWatcher {
    fn resource_kind(&self) -> &'static str {
        "node"
    }

    async fn fetch_all(&self) -> Result<(), GatewayError> {
        let list = self.client.get_nodes(&self.namespace).await?;
        let mut map = HashMap::with_capacity(list.nodes.len());
        for node in list.nodes {
            map.insert(node.name.clone(), node);
        }
        let count = map.len();
        *self.current.write() = map;
        crate::core::metrics::set_watcher_stale(self.resource_kind(), false);
        crate::core::metrics::set_watcher_resource_count(self.resource_kind(), count);
        Ok(())
    }

    async fn apply_event(&self, event: WatchEvent) {
        if event.kind != self.resource_kind() {
            warn!(kind = %event.kind, "unexpected event kind for node watcher");
            return;
        }
        match EventType::try_from(event.r#type) {
            Ok(EventType::Delete) => {
                self.current.write().remove(&event.name);
            }
            Ok(EventType::Put) => match decode_node(&event.payload) {
                Ok(node) => {
                    self.current.write().insert(event.name, node);
                }
                Err(_) => warn!("failed to decode node payload"),
            },
            _ => warn!(event_type = event.r#type, "unexpected event type for node watcher"),
        }
    }

    fn notify_stale(&self) {
        crate::core::metrics::set_watcher_stale(self.resource_kind(), true);
    }
}

fn decode_node(payload: &[u8]) -> Result<NodeInfo, GatewayError> {
    prost::Message::decode(payload).map_err(|e| GatewayError::Protocol(e.to_string()))
}
