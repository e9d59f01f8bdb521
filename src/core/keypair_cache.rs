// src/core/keypair_cache.rs

//! Memoized `(role, reason) -> KeyPair` cache (§3, §4.5, §9 design notes).
//! A small keyed cache with explicit evict-on-success, not a global; owned
//! by the reconnect supervisor. Guarded by a single mutex, no I/O under
//! lock, matching the teacher's mutex-guarded in-memory state (e.g.
//! `core/warden/worker.rs`'s `Arc<Mutex<MasterState>>`).

use crate::core::identity::{KeyPair, Role};
use parking_lot::Mutex;
use std::collections::HashMap;

pub const FIRST_TIME_CONNECT_REASON: &str = "first-time-connect";
pub const ROTATION_REASON: &str = "rotation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    role: Role,
    reason: &'static str,
}

#[derive(Default)]
pub struct KeyPairCache {
    inner: Mutex<HashMap<CacheKey, KeyPair>>,
}

impl KeyPairCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached key pair for `(role, reason)`, generating and
    /// storing a fresh one via `generate` if absent. `generate` must be a
    /// synchronous, allocation-only key generation call (no I/O).
    pub fn get_or_generate(
        &self,
        role: Role,
        reason: &'static str,
        generate: impl FnOnce() -> KeyPair,
    ) -> KeyPair {
        let key = CacheKey { role, reason };
        let mut guard = self.inner.lock();
        if let Some(existing) = guard.get(&key) {
            return existing.clone();
        }
        let generated = generate();
        guard.insert(key, generated.clone());
        generated
    }

    /// Evicts the memoized key pair once it has been successfully consumed
    /// by a register/re-register call.
    pub fn evict(&self, role: Role, reason: &'static str) {
        self.inner.lock().remove(&CacheKey { role, reason });
    }
}
