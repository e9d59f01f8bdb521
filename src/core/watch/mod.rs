// src/core/watch/mod.rs

//! Generic resource-watcher framework (§4.6). Grounded on
//! `original_source/lib/services/watcher.go`'s
//! `resourceCollector`/`resourceWatcher` pair: a small per-kind
//! capability set (`resource_kind`, `fetch_all`, `apply_event`,
//! `notify_stale`) driving one reusable watch loop, matching the design
//! notes' "avoid open-ended runtime dispatch; a tagged variant per kind
//! suffices." Each specialization in this module's children owns its own
//! resource map.

pub mod app;
pub mod ca;
pub mod database;
pub mod lock;
pub mod node;
pub mod proxy;

use crate::core::errors::GatewayError;
use crate::core::retry::{Retry, RetryConfig};
use crate::rpc::client::AuthorityClient;
use crate::rpc::proto::{EventType, WatchEvent, WatchSpec};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// The small capability set a resource kind must implement to be driven by
/// the generic watch loop (§9 design notes).
#[async_trait]
pub trait WatcherSpec: Send + Sync {
    fn resource_kind(&self) -> &'static str;

    /// Fetches the full resource set and replaces the specialization's
    /// local view atomically. Called once per successful `watch()` cycle,
    /// right after the mandatory `init` event (§4.6 step 2).
    async fn fetch_all(&self) -> Result<(), GatewayError>;

    /// Applies a single `put`/`delete` event to the local view (§4.6 step
    /// 3). Events whose kind disagrees or whose payload doesn't decode are
    /// logged and ignored, never surfaced as an error. Async so
    /// specializations that republish to a bounded channel can await the
    /// send in place, keeping arrival order and giving the channel's
    /// backpressure somewhere real to go (§5 ordering guarantee).
    async fn apply_event(&self, event: WatchEvent);

    /// Invoked when the view has been failing to refresh for longer than
    /// `max_staleness` (§4.6 staleness). A no-op for specializations that
    /// don't need it.
    fn notify_stale(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub retry: RetryConfig,
    pub refetch_period: Duration,
    /// Zero disables staleness detection.
    pub max_staleness: Duration,
}

enum WatchOutcome {
    /// The watch stream ran cleanly until the refetch timer fired; not an
    /// error (§4.6 step 4).
    Refetch,
    Cancelled,
}

/// Runs the generic watch loop for `spec` until `shutdown` fires. Intended
/// to be spawned as its own task per watcher (§5: "each watcher runs one
/// background task").
pub async fn run<S: WatcherSpec + 'static>(
    spec: Arc<S>,
    client: Arc<dyn AuthorityClient>,
    watch_spec: WatchSpec,
    config: WatcherConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut retry = Retry::new(config.retry);
    let mut failure_started_at: Option<Instant> = None;

    loop {
        debug!(kind = spec.resource_kind(), "starting watch");
        let outcome = watch_once(
            spec.as_ref(),
            client.as_ref(),
            watch_spec.clone(),
            config.refetch_period,
            &mut retry,
            &mut shutdown,
            &mut failure_started_at,
        )
        .await;

        match &outcome {
            Ok(WatchOutcome::Cancelled) => {
                debug!(kind = spec.resource_kind(), "watch loop shutting down");
                return;
            }
            Ok(WatchOutcome::Refetch) => {}
            Err(e) => {
                warn!(kind = spec.resource_kind(), error = %e, "restarting watch on error");
                if failure_started_at.is_none() {
                    failure_started_at = Some(Instant::now());
                }
            }
        }

        if let Some(started) = failure_started_at {
            if !config.max_staleness.is_zero() && started.elapsed() > config.max_staleness {
                warn!(
                    kind = spec.resource_kind(),
                    max_staleness = ?config.max_staleness,
                    "maximum staleness exceeded"
                );
                spec.notify_stale();
            }
        }

        tokio::select! {
            _ = retry.after() => {
                retry.increment();
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

async fn watch_once<S: WatcherSpec + ?Sized>(
    spec: &S,
    client: &dyn AuthorityClient,
    watch_spec: WatchSpec,
    refetch_period: Duration,
    retry: &mut Retry,
    shutdown: &mut broadcast::Receiver<()>,
    failure_started_at: &mut Option<Instant>,
) -> Result<WatchOutcome, GatewayError> {
    let mut stream = client.new_watcher(watch_spec).await?;
    let refetch = tokio::time::sleep(refetch_period);
    tokio::pin!(refetch);

    // The first event must be `init`, proving the subscription is
    // established before we fetch a snapshot, avoiding the race where a
    // mutation lands between the fetch and the subscription actually
    // starting (§4.6 step 1; watcher.go's comment on `newWatcher`).
    tokio::select! {
        _ = shutdown.recv() => return Ok(WatchOutcome::Cancelled),
        _ = &mut refetch => return Ok(WatchOutcome::Refetch),
        event = stream.next() => {
            match event {
                Some(Ok(event)) if event.r#type == EventType::Init as i32 => {}
                Some(Ok(other)) => {
                    return Err(GatewayError::Protocol(format!(
                        "expected init event, got {:?} instead",
                        other.r#type
                    )));
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(GatewayError::Transient("watch stream closed before init".into()))
                }
            }
        }
    }

    spec.fetch_all().await?;
    retry.reset();
    // A fresh snapshot landed: whatever failures preceded this cycle no
    // longer describe the current view, even if this same cycle later
    // errors out of the apply-event loop below (§4.6 step 2).
    *failure_started_at = None;

    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(WatchOutcome::Cancelled),
            _ = &mut refetch => return Ok(WatchOutcome::Refetch),
            event = stream.next() => {
                match event {
                    Some(Ok(event)) => spec.apply_event(event).await,
                    Some(Err(e)) => return Err(e),
                    None => return Err(GatewayError::Transient("watch stream closed".into())),
                }
            }
        }
    }
}
