// src/core/rotation_engine.rs

//! The rotation engine (§4.7): compares the authority's view of a CA's
//! rotation against the locally persisted one and drives the legal
//! transitions between them. Grounded line-for-line on `rotate`,
//! `syncRotationState`, `syncServiceRotationState` and
//! `syncRotationStateCycle` in `original_source/lib/service/connect.go`.
//!
//! This module owns only the comparison and the identity/state writes it
//! implies; subscribing to the CA watcher's fan-out, ticking the periodic
//! check, and rebuilding a `Connector` after a reload are wiring concerns
//! that live in `server::mod` (§12), which is where the `ConnectorBuilder`
//! and the reload broadcast already live.

use crate::core::errors::GatewayError;
use crate::core::identity::{Identity, IdentitySlot, Role};
use crate::core::keypair_cache::{KeyPairCache, ROTATION_REASON};
use crate::core::rotation::{RotationPhase, RotationState, RotationStateKind};
use crate::core::store::IdentityStore;
use crate::rpc::client::AuthorityClient;
use crate::rpc::proto::{ReRegisterRequest, RotationInfo};
use tracing::info;

/// Converts the authority's wire representation of a CA's rotation into
/// the typed `RotationState` the engine and the identity store share.
/// `None` (a CA with no `rotation` field set) means standby, matching
/// `first_time_connect`'s fallback in `connector.rs`.
pub fn rotation_state_from_proto(info: RotationInfo) -> Result<RotationState, GatewayError> {
    let state = match info.state.as_str() {
        "" | "standby" => RotationStateKind::Standby,
        "in_progress" => RotationStateKind::InProgress,
        other => {
            return Err(GatewayError::BadParameter(format!(
                "unknown rotation state {other:?}"
            )))
        }
    };
    let phase = match (state, info.phase.as_str()) {
        (RotationStateKind::Standby, _) => None,
        (RotationStateKind::InProgress, "init") => Some(RotationPhase::Init),
        (RotationStateKind::InProgress, "update_clients") => Some(RotationPhase::UpdateClients),
        (RotationStateKind::InProgress, "update_servers") => Some(RotationPhase::UpdateServers),
        (RotationStateKind::InProgress, "rollback") => Some(RotationPhase::Rollback),
        (RotationStateKind::InProgress, other) => {
            return Err(GatewayError::BadParameter(format!(
                "unknown rotation phase {other:?}"
            )))
        }
    };
    Ok(RotationState {
        state,
        phase,
        current_id: info.current_id,
        started_at: info.started_at_unix_secs,
        schedule: None,
    })
}

/// Outcome of one `RotationEngine::sync` call, telling the caller whether
/// anything changed on disk and whether the live `Connector` needs to be
/// rebuilt from the new identity (§4.7: a `reload` is only required when
/// the client-facing credential itself changed).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationOutcome {
    pub phase_changed: bool,
    pub needs_reload: bool,
}

/// Drives one role's rotation state machine. Stateless beyond its
/// construction parameters; all mutable state lives in the identity store.
pub struct RotationEngine {
    role: Role,
    additional_principals: Vec<String>,
    dns_names: Vec<String>,
}

impl RotationEngine {
    pub fn new(role: Role, additional_principals: Vec<String>, dns_names: Vec<String>) -> Self {
        Self {
            role,
            additional_principals,
            dns_names,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Compares `remote` (freshly observed on the `host` CA) against the
    /// locally persisted `RotationState`, and, where a transition is
    /// legal, re-registers and/or promotes identities and writes the new
    /// state. Mirrors `connect.go`'s `rotate()`/`syncServiceRotationState`
    /// switch, restructured as documented by §4.7.
    pub async fn sync(
        &self,
        store: &dyn IdentityStore,
        client: &dyn AuthorityClient,
        keypairs: &KeyPairCache,
        server_identity: &Identity,
        remote: &RotationState,
    ) -> Result<RotationOutcome, GatewayError> {
        let local = store
            .read_state(self.role)
            .await?
            .unwrap_or_else(RotationState::standby);

        match remote.state {
            RotationStateKind::Standby => {
                self.sync_standby(store, client, keypairs, server_identity, &local, remote).await
            }
            RotationStateKind::InProgress => {
                self.sync_in_progress(store, client, keypairs, server_identity, &local, remote).await
            }
        }
    }

    async fn sync_standby(
        &self,
        store: &dyn IdentityStore,
        client: &dyn AuthorityClient,
        keypairs: &KeyPairCache,
        server_identity: &Identity,
        local: &RotationState,
        remote: &RotationState,
    ) -> Result<RotationOutcome, GatewayError> {
        match local.state {
            RotationStateKind::Standby => {
                if server_identity.covers(&self.additional_principals, &self.dns_names) {
                    return Ok(RotationOutcome::default());
                }
                info!(
                    role = %self.role,
                    "server identity missing required principals or DNS names, re-registering"
                );
                let identity = self.re_register(client, keypairs, server_identity, false).await?;
                store
                    .write_identity(IdentitySlot::Current, self.role, &identity)
                    .await?;
                Ok(RotationOutcome {
                    phase_changed: false,
                    needs_reload: true,
                })
            }
            RotationStateKind::InProgress => {
                // §4.7 item 1: the remote side has already returned to
                // standby. Legal either as the tail of a rollback, or as the
                // completion of the attempt local is still tracking (the
                // authority still reports the finished attempt's
                // `current_id` even once it reports standby).
                let legal =
                    local.phase == Some(RotationPhase::Rollback) || local.same_attempt(remote);
                if !legal {
                    return Err(self.compare_failed(local, remote));
                }
                info!(role = %self.role, "rotation finished remotely, returning to standby");
                let identity = self.re_register(client, keypairs, server_identity, false).await?;
                store
                    .write_identity(IdentitySlot::Current, self.role, &identity)
                    .await?;
                store.write_state(self.role, &RotationState::standby()).await?;
                Ok(RotationOutcome {
                    phase_changed: true,
                    needs_reload: true,
                })
            }
        }
    }

    async fn sync_in_progress(
        &self,
        store: &dyn IdentityStore,
        client: &dyn AuthorityClient,
        keypairs: &KeyPairCache,
        server_identity: &Identity,
        local: &RotationState,
        remote: &RotationState,
    ) -> Result<RotationOutcome, GatewayError> {
        let Some(phase) = remote.phase else {
            return Err(GatewayError::BadParameter(
                "rotation in progress but phase is unset".into(),
            ));
        };

        match phase {
            RotationPhase::Init => {
                let legal = local.state == RotationStateKind::Standby;
                if !legal {
                    return Err(self.compare_failed(local, remote));
                }
                info!(role = %self.role, current_id = %remote.current_id, "rotation started remotely");
                store.write_state(self.role, remote).await?;
                Ok(RotationOutcome {
                    phase_changed: true,
                    needs_reload: false,
                })
            }
            RotationPhase::UpdateClients => {
                let legal = local.phase == Some(RotationPhase::Init) || local.same_attempt(remote);
                if !legal {
                    return Err(self.compare_failed(local, remote));
                }
                info!(role = %self.role, "rotation entered update_clients, registering replacement identity");
                let replacement = self.re_register(client, keypairs, server_identity, false).await?;
                store
                    .write_identity(IdentitySlot::Replacement, self.role, &replacement)
                    .await?;
                store.write_state(self.role, remote).await?;
                Ok(RotationOutcome {
                    phase_changed: true,
                    needs_reload: true,
                })
            }
            RotationPhase::UpdateServers => {
                let legal =
                    local.phase == Some(RotationPhase::UpdateClients) || local.same_attempt(remote);
                if !legal {
                    return Err(self.compare_failed(local, remote));
                }
                info!(role = %self.role, "rotation entered update_servers, promoting replacement identity");
                let replacement = store
                    .read_identity(IdentitySlot::Replacement, self.role)
                    .await?
                    .ok_or_else(|| {
                        GatewayError::Internal(
                            "update_servers phase but no replacement identity on disk".into(),
                        )
                    })?;
                store
                    .write_identity(IdentitySlot::Current, self.role, &replacement)
                    .await?;
                store.write_state(self.role, remote).await?;
                Ok(RotationOutcome {
                    phase_changed: true,
                    needs_reload: true,
                })
            }
            RotationPhase::Rollback => {
                info!(role = %self.role, "rotation rolled back, re-registering against the old trust root");
                let identity = self.re_register(client, keypairs, server_identity, true).await?;
                store
                    .write_identity(IdentitySlot::Current, self.role, &identity)
                    .await?;
                store.write_state(self.role, remote).await?;
                Ok(RotationOutcome {
                    phase_changed: true,
                    needs_reload: true,
                })
            }
        }
    }

    fn compare_failed(&self, local: &RotationState, remote: &RotationState) -> GatewayError {
        GatewayError::CompareFailed {
            role: self.role.to_string(),
            remote: format!("{remote:?}"),
            local: format!("{local:?}"),
        }
    }

    /// `current` supplies the `host_uuid`/`node_name` the re-registered
    /// identity carries forward — a rotation never changes a node's own
    /// identity, only the CA it's trusted under.
    async fn re_register(
        &self,
        client: &dyn AuthorityClient,
        keypairs: &KeyPairCache,
        current: &Identity,
        use_old_trust_root: bool,
    ) -> Result<Identity, GatewayError> {
        let role = self.role;
        let key_pair = keypairs.get_or_generate(role, ROTATION_REASON, crate::core::connector::generate_key_pair);

        let certs = client
            .re_register(ReRegisterRequest {
                role: role.to_string(),
                host_uuid: current.host_uuid.clone(),
                node_name: current.node_name.clone(),
                cluster_name: String::new(),
                additional_principals: self.additional_principals.clone(),
                dns_names: self.dns_names.clone(),
                public_ssh_key: key_pair.public_ssh_key.clone(),
                public_x509_key: key_pair.public_x509_key.clone(),
                use_old_trust_root,
            })
            .await?;

        keypairs.evict(role, ROTATION_REASON);

        Ok(Identity {
            role,
            host_uuid: current.host_uuid.clone(),
            node_name: current.node_name.clone(),
            cluster_name: certs.cluster_name,
            private_key: key_pair.private_key,
            ssh_cert: certs.ssh_cert,
            x509_cert: certs.x509_cert,
            principals: certs.principals,
            dns_names: certs.dns_names,
            expiry: certs.expiry_unix_secs,
        })
    }
}
