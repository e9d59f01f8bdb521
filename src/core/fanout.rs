// src/core/fanout.rs

//! Fan-out to local subscribers (§5, §4.6), used by the lock and CA
//! watchers. Grounded on `original_source/lib/services/watcher.go`'s
//! `Fanout` component: `emit(event)` is non-blocking per subscriber — a
//! slow subscriber is disconnected with an error event rather than
//! stalling the producer — and `set_init()` releases subscribers awaiting
//! their mandatory first `init` event. Subscriber bookkeeping lives under
//! a single mutex, mirroring the teacher's `core/pubsub/handler.rs`
//! channel-registry pattern; the registry's lock is never held across an
//! await or shared with the watch loop's own state lock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const SUBSCRIBER_BUFFER: usize = 64;

/// Event kinds a fan-out can deliver to subscribers. `Unreliable` marks a
/// view as stale (§4.6 staleness, lock specialization).
#[derive(Debug, Clone)]
pub enum FanoutEvent<T> {
    Init,
    Put(T),
    Delete(String),
    Unreliable,
}

struct Subscriber<T> {
    tx: mpsc::Sender<FanoutEvent<T>>,
}

/// A registry of bounded channels with a publish step that either enqueues
/// or marks the subscriber failed, per §9 design notes ("do not share
/// locks with the watch loop").
pub struct Fanout<T: Clone + Send + 'static> {
    subscribers: Mutex<HashMap<u64, Subscriber<T>>>,
    next_id: AtomicU64,
    initialized: std::sync::atomic::AtomicBool,
}

impl<T: Clone + Send + 'static> Default for Fanout<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            initialized: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl<T: Clone + Send + 'static> Fanout<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber. If the fanout has already been
    /// initialized (past its first `init`), the new subscriber
    /// immediately receives one so it never has to special-case a late
    /// join (§9: "releases subscribers that are awaiting their mandatory
    /// first init event").
    pub fn subscribe(self: &Arc<Self>) -> mpsc::Receiver<FanoutEvent<T>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let already_init = self.initialized.load(Ordering::Acquire);
        self.subscribers.lock().insert(id, Subscriber { tx: tx.clone() });
        if already_init {
            let _ = tx.try_send(FanoutEvent::Init);
        }
        rx
    }

    /// Marks the fanout as having observed its first snapshot; every
    /// currently registered subscriber is sent an `Init` event.
    pub fn set_init(&self) {
        self.initialized.store(true, Ordering::Release);
        self.emit(FanoutEvent::Init);
    }

    /// Delivers `event` to every subscriber. Holds the registry lock only
    /// long enough to snapshot the subscriber list (§5 shared-resource
    /// policy); a subscriber whose channel is full or closed is dropped
    /// from the registry rather than stalling the caller.
    pub fn emit(&self, event: FanoutEvent<T>) {
        let snapshot: Vec<(u64, mpsc::Sender<FanoutEvent<T>>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, sub)| (*id, sub.tx.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.try_send(event.clone()).is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            let mut guard = self.subscribers.lock();
            for id in dead {
                guard.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
