// src/core/metrics.rs

//! Prometheus gauges for the rotation engine, resource watchers, and
//! reconnect supervisors (§10.5). Registered once globally via
//! `once_cell::sync::Lazy`, the successor to the `lazy_static!` macro the
//! teacher's own `core/metrics.rs` used for the same purpose.

use crate::core::rotation::{RotationPhase, RotationStateKind};
use once_cell::sync::Lazy;
use prometheus::{register_gauge_vec, GaugeVec, TextEncoder};
use std::time::Duration;

pub static ROTATION_PHASE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "meshgate_rotation_phase",
        "Current rotation phase per role (0=standby, 1=init, 2=update_clients, 3=update_servers, 4=rollback).",
        &["role"]
    )
    .unwrap()
});

pub static WATCHER_STALE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "meshgate_watcher_stale",
        "Whether a resource watcher's view is currently stale (1 for true, 0 for false).",
        &["kind"]
    )
    .unwrap()
});

pub static WATCHER_RESOURCE_COUNT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "meshgate_watcher_resource_count",
        "Number of resources currently held by a watcher's local view.",
        &["kind"]
    )
    .unwrap()
});

pub static RECONNECT_BACKOFF_SECONDS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "meshgate_reconnect_backoff_seconds",
        "The backoff delay, in seconds, before a role's next reconnect attempt.",
        &["role"]
    )
    .unwrap()
});

/// Maps a rotation state/phase pair onto the gauge's numeric encoding
/// (§10.5: "rotation phase (as an enum-valued gauge)").
fn phase_value(state: RotationStateKind, phase: Option<RotationPhase>) -> f64 {
    match (state, phase) {
        (RotationStateKind::Standby, _) => 0.0,
        (RotationStateKind::InProgress, Some(RotationPhase::Init)) => 1.0,
        (RotationStateKind::InProgress, Some(RotationPhase::UpdateClients)) => 2.0,
        (RotationStateKind::InProgress, Some(RotationPhase::UpdateServers)) => 3.0,
        (RotationStateKind::InProgress, Some(RotationPhase::Rollback)) => 4.0,
        (RotationStateKind::InProgress, None) => 0.0,
    }
}

pub fn set_rotation_phase(role: &str, state: RotationStateKind, phase: Option<RotationPhase>) {
    ROTATION_PHASE
        .with_label_values(&[role])
        .set(phase_value(state, phase));
}

pub fn set_watcher_stale(kind: &str, stale: bool) {
    WATCHER_STALE
        .with_label_values(&[kind])
        .set(if stale { 1.0 } else { 0.0 });
}

pub fn set_watcher_resource_count(kind: &str, count: usize) {
    WATCHER_RESOURCE_COUNT.with_label_values(&[kind]).set(count as f64);
}

pub fn set_reconnect_backoff(role: &str, backoff: Duration) {
    RECONNECT_BACKOFF_SECONDS
        .with_label_values(&[role])
        .set(backoff.as_secs_f64());
}

/// Gathers all registered metrics and encodes them in the Prometheus text
/// exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
