// src/core/watch/lock.rs

//! Lock specialization (§4.6, §8 S6): on `put`, store only if the lock is
//! currently in force; on `delete`, remove and emit. `check_lock_in_force`
//! denies under strict mode when the view is stale. Grounded on
//! `watcher.go`'s `lockCollector` (`CheckLockInForce`,
//! `findLockInForceUnderMutex`, `notifyStale`) and its `Fanout` use.

use super::WatcherSpec;
use crate::core::errors::GatewayError;
use crate::core::fanout::{Fanout, FanoutEvent};
use crate::rpc::client::AuthorityClient;
use crate::rpc::proto::{EventType, LockInfo, WatchEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Whether a missing/stale view should be tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCheckMode {
    Strict,
    BestEffort,
}

pub struct LockWatcher {
    client: Arc<dyn AuthorityClient>,
    current: RwLock<HashMap<String, LockInfo>>,
    is_stale: AtomicBool,
    pub fanout: Arc<Fanout<LockInfo>>,
}

impl LockWatcher {
    pub fn new(client: Arc<dyn AuthorityClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            current: RwLock::new(HashMap::new()),
            is_stale: AtomicBool::new(false),
            fanout: Arc::new(Fanout::new()),
        })
    }

    /// §4.6 lock specialization / §8 S5: under strict mode and a stale
    /// view, deny with a dedicated error; otherwise scan `current` for an
    /// in-force lock whose target set intersects any of `targets` (empty
    /// `targets` matches any in-force lock). Ties: first match wins.
    pub fn check_lock_in_force(
        &self,
        mode: LockCheckMode,
        targets: &[String],
    ) -> Result<Option<LockInfo>, GatewayError> {
        if mode == LockCheckMode::Strict && self.is_stale.load(Ordering::Acquire) {
            return Err(GatewayError::StaleView);
        }
        let guard = self.current.read();
        for lock in guard.values() {
            if !is_in_force(lock) {
                continue;
            }
            if targets.is_empty() || lock.targets.iter().any(|t| targets.contains(t)) {
                return Ok(Some(lock.clone()));
            }
        }
        Ok(None)
    }
}

fn is_in_force(lock: &LockInfo) -> bool {
    if lock.expires_unix_secs == 0 {
        return true;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    lock.expires_unix_secs > now
}

#[async_trait]
impl WatcherSpec for LockWatcher {
    fn resource_kind(&self) -> &'static str {
        "lock"
    }

    async fn fetch_all(&self) -> Result<(), GatewayError> {
        let list = self.client.get_locks(true).await?;
        let mut map = HashMap::with_capacity(list.locks.len());
        for lock in list.locks {
            if is_in_force(&lock) {
                map.insert(lock.name.clone(), lock);
            }
        }
        let count = map.len();
        *self.current.write() = map;
        self.is_stale.store(false, Ordering::Release);
        self.fanout.set_init();
        crate::core::metrics::set_watcher_stale(self.resource_kind(), false);
        crate::core::metrics::set_watcher_resource_count(self.resource_kind(), count);
        Ok(())
    }

    async fn apply_event(&self, event: WatchEvent) {
        if event.kind != self.resource_kind() {
            warn!(kind = %event.kind, "unexpected event kind for lock watcher");
            return;
        }
        match EventType::try_from(event.r#type) {
            Ok(EventType::Delete) => {
                self.current.write().remove(&event.name);
                self.fanout.emit(FanoutEvent::Delete(event.name));
            }
            Ok(EventType::Put) => match decode_lock(&event.payload) {
                Ok(lock) => {
                    if is_in_force(&lock) {
                        self.current.write().insert(event.name, lock.clone());
                        self.fanout.emit(FanoutEvent::Put(lock));
                    }
                }
                Err(_) => warn!("failed to decode lock payload"),
            },
            _ => warn!(event_type = event.r#type, "unexpected event type for lock watcher"),
        }
    }

    /// For the lock specialization, a stale view both marks the local
    /// state stale (denying strict-mode checks) and emits an `unreliable`
    /// event to subscribers (§4.6 staleness).
    fn notify_stale(&self) {
        self.is_stale.store(true, Ordering::Release);
        self.fanout.emit(FanoutEvent::Unreliable);
        crate::core::metrics::set_watcher_stale(self.resource_kind(), true);
    }
}

fn decode_lock(payload: &[u8]) -> Result<LockInfo, GatewayError> {
    prost::Message::decode(payload).map_err(|e| GatewayError::Protocol(e.to_string()))
}
