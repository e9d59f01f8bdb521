// src/core/connector.rs

//! Connector construction (§4.4) and first-time connect (§4.5). Grounded
//! line-for-line on `connect`/`firstTimeConnect` in
//! `original_source/lib/service/connect.go`.

use crate::core::errors::GatewayError;
use crate::core::identity::{Identity, IdentitySlot, KeyPair, Role};
use crate::core::keypair_cache::{KeyPairCache, FIRST_TIME_CONNECT_REASON};
use crate::core::rotation::{RotationPhase, RotationState, RotationStateKind};
use crate::core::store::IdentityStore;
use crate::rpc::client::AuthorityClient;
use crate::rpc::factory::{build_authority_client, ClientFactoryInput};
use crate::rpc::proto::RegisterRequest;
use crate::rpc::tunnel::SshTunnelConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The in-memory handle held per local role (§3): a client identity, a
/// server identity, and (for non-`Auth`/`Admin` roles) a live authority
/// client.
#[derive(Clone)]
pub struct Connector {
    pub client_identity: Identity,
    pub server_identity: Identity,
    pub client: Option<Arc<dyn AuthorityClient>>,
}

impl Connector {
    pub fn is_local(&self) -> bool {
        self.client.is_none()
    }
}

pub struct ConnectorBuilder {
    pub role: Role,
    pub authority_addresses: Vec<String>,
    pub client_timeout: Duration,
    pub ssh: Option<SshTunnelConfig>,
    pub token: Option<String>,
    pub local_authority: Option<Arc<dyn AuthorityClient>>,
    pub additional_principals: Vec<String>,
    pub dns_names: Vec<String>,
    pub host_uuid: String,
    pub node_name: String,
}

impl ConnectorBuilder {
    async fn client_for(&self, identity: &Identity) -> Result<Arc<dyn AuthorityClient>, GatewayError> {
        if let Some(local) = &self.local_authority {
            return Ok(local.clone());
        }
        let _ = identity;
        build_authority_client(ClientFactoryInput {
            authority_addresses: self.authority_addresses.clone(),
            role: self.role,
            client_timeout: self.client_timeout,
            ssh: self.ssh.clone(),
        })
        .await
    }

    /// §4.4: builds a `Connector` from persisted state, or runs first-time
    /// connect (§4.5) if none is found.
    pub async fn connect(
        &self,
        store: &dyn IdentityStore,
        keypairs: &KeyPairCache,
    ) -> Result<Connector, GatewayError> {
        let Some(state) = store.read_state(self.role).await? else {
            return self.first_time_connect(store, keypairs).await;
        };

        let current = store
            .read_identity(IdentitySlot::Current, self.role)
            .await?
            .ok_or_else(|| {
                GatewayError::Internal(format!(
                    "rotation state present for {} but current identity is missing",
                    self.role
                ))
            })?;

        match state.state {
            RotationStateKind::Standby => self.build(current.clone(), current, false).await,
            RotationStateKind::InProgress => match state.phase {
                Some(RotationPhase::Init) | Some(RotationPhase::Rollback) | None => {
                    self.build(current.clone(), current, false).await
                }
                Some(RotationPhase::UpdateClients) => {
                    let replacement = store
                        .read_identity(IdentitySlot::Replacement, self.role)
                        .await?
                        .ok_or_else(|| {
                            GatewayError::Internal(
                                "update_clients phase but no replacement identity on disk".into(),
                            )
                        })?;
                    self.build(replacement, current, false).await
                }
                Some(RotationPhase::UpdateServers) => {
                    let replacement = store
                        .read_identity(IdentitySlot::Replacement, self.role)
                        .await?
                        .ok_or_else(|| {
                            GatewayError::Internal(
                                "update_servers phase but no replacement identity on disk".into(),
                            )
                        })?;
                    self.build(replacement.clone(), replacement, false).await
                }
            },
        }
    }

    async fn build(
        &self,
        client_identity: Identity,
        server_identity: Identity,
        force_local: bool,
    ) -> Result<Connector, GatewayError> {
        if self.role.is_local() || force_local {
            return Ok(Connector {
                client_identity,
                server_identity,
                client: None,
            });
        }
        let client = self.client_for(&client_identity).await?;
        Ok(Connector {
            client_identity,
            server_identity,
            client: Some(client),
        })
    }

    /// §4.5: first join. If a local authority is co-hosted, obtain
    /// credentials via the in-process register call; otherwise a
    /// provisioning token is required.
    pub async fn first_time_connect(
        &self,
        store: &dyn IdentityStore,
        keypairs: &KeyPairCache,
    ) -> Result<Connector, GatewayError> {
        let identity = if let Some(local) = &self.local_authority {
            self.register_with(local.as_ref(), keypairs).await?
        } else {
            let Some(_token) = &self.token else {
                return Err(GatewayError::Precondition(format!(
                    "{} must join a cluster and needs a provisioning token",
                    self.role
                )));
            };
            info!(role = %self.role, "joining the cluster with a secure token");
            let client = build_authority_client(ClientFactoryInput {
                authority_addresses: self.authority_addresses.clone(),
                role: self.role,
                client_timeout: self.client_timeout,
                ssh: self.ssh.clone(),
            })
            .await?;
            self.register_with(client.as_ref(), keypairs).await?
        };

        info!(role = %self.role, "obtained credentials to connect to the cluster");
        let connector = self.build(identity.clone(), identity.clone(), false).await?;

        let client = match &connector.client {
            Some(client) => client.clone(),
            None => self.local_authority.clone().ok_or_else(|| {
                GatewayError::Internal("local role missing a local authority adapter".into())
            })?,
        };
        let host_ca = client
            .get_cert_authority("host", &identity.cluster_name, false)
            .await?;

        store
            .write_identity(IdentitySlot::Current, self.role, &identity)
            .await?;
        let rotation = host_ca
            .rotation
            .map(crate::core::rotation_engine::rotation_state_from_proto)
            .transpose()?
            .unwrap_or_else(RotationState::standby);
        store.write_state(self.role, &rotation).await?;
        info!(role = %self.role, "wrote credentials and rotation state to disk");

        Ok(connector)
    }

    async fn register_with(
        &self,
        client: &dyn AuthorityClient,
        keypairs: &KeyPairCache,
    ) -> Result<Identity, GatewayError> {
        let role = self.role;
        let key_pair: KeyPair = keypairs.get_or_generate(role, FIRST_TIME_CONNECT_REASON, || {
            crate::core::connector::generate_key_pair()
        });

        let certs = client
            .register(RegisterRequest {
                token: self.token.clone().unwrap_or_default(),
                role: role.to_string(),
                host_uuid: self.host_uuid.clone(),
                node_name: self.node_name.clone(),
                additional_principals: self.additional_principals.clone(),
                dns_names: self.dns_names.clone(),
                public_ssh_key: key_pair.public_ssh_key.clone(),
                public_x509_key: key_pair.public_x509_key.clone(),
                join_method: "token".to_string(),
            })
            .await?;

        keypairs.evict(role, FIRST_TIME_CONNECT_REASON);

        Ok(Identity {
            role,
            host_uuid: self.host_uuid.clone(),
            node_name: self.node_name.clone(),
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

/// Placeholder key generation seam: the actual signer/verifier is an
/// external collaborator (§1 non-goals — "any cryptographic primitive
/// beyond consuming an existing signer/verifier"); this module only needs
/// a `(priv, pub_ssh, pub_x509)` triple to hand to the authority.
pub fn generate_key_pair() -> KeyPair {
    use rand::RngCore;
    let mut private_key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut private_key);
    KeyPair {
        private_key,
        public_ssh_key: Vec::new(),
        public_x509_key: Vec::new(),
    }
}
