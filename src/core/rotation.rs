// src/core/rotation.rs

//! RotationState and phase types (§3), shared by the local identity store
//! and the `CertAuthority` view carried by the CA watcher.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a rotation is in progress for a given role/CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStateKind {
    Standby,
    InProgress,
}

/// Meaningful only when `state = InProgress`. Progresses
/// `Init -> UpdateClients -> UpdateServers -> Standby`, with `Rollback` as
/// the escape hatch from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPhase {
    Init,
    UpdateClients,
    UpdateServers,
    Rollback,
}

impl fmt::Display for RotationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RotationPhase::Init => "init",
            RotationPhase::UpdateClients => "update_clients",
            RotationPhase::UpdateServers => "update_servers",
            RotationPhase::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Persisted per role (§3, §6: `state/<role>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationState {
    pub state: RotationStateKind,
    /// Only meaningful when `state = InProgress`.
    pub phase: Option<RotationPhase>,
    /// Identifies the active rotation attempt; used to detect whether a
    /// remote event belongs to the rotation the local side is tracking.
    pub current_id: String,
    /// Unix seconds the current attempt started, 0 if standby.
    pub started_at: i64,
    /// Optional human-readable schedule annotation carried from the
    /// authority; opaque to the engine.
    pub schedule: Option<String>,
}

impl RotationState {
    pub fn standby() -> Self {
        Self {
            state: RotationStateKind::Standby,
            phase: None,
            current_id: String::new(),
            started_at: 0,
            schedule: None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.state == RotationStateKind::InProgress
    }

    /// Whether this state and `other` refer to the same rotation attempt,
    /// used by the engine's legal-transition guards (§4.7).
    pub fn same_attempt(&self, other: &RotationState) -> bool {
        !self.current_id.is_empty() && self.current_id == other.current_id
    }
}
