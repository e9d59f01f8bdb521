// src/core/reconnect.rs

//! The reconnect supervisor (§4.8, §5): one task per role that keeps a
//! `Connector` alive, rebuilding it on transient failure with backoff and
//! on request after a rotation reload. Grounded on
//! `reconnectToAuthService`/`authServerTooOld` in
//! `original_source/lib/service/connect.go`.

use crate::core::connector::{Connector, ConnectorBuilder};
use crate::core::errors::GatewayError;
use crate::core::keypair_cache::KeyPairCache;
use crate::core::retry::{Retry, RetryConfig};
use crate::core::store::IdentityStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

/// Parameters that don't change across reconnect attempts, as distinct
/// from `ConnectorBuilder`, which describes how to reach the authority.
pub struct ReconnectSupervisor {
    pub builder: ConnectorBuilder,
    pub store: Arc<dyn IdentityStore>,
    pub keypairs: KeyPairCache,
    pub retry: RetryConfig,
    /// This binary's own major version, compared against the authority's
    /// `Ping` response (§4.4 step 2, §11 `authServerTooOld`).
    pub local_version: String,
    pub skip_version_check: bool,
}

impl ReconnectSupervisor {
    /// Runs until `shutdown` fires. Each time `reload_rx` wakes (the first
    /// wake is the caller's responsibility to send immediately so the
    /// initial connect happens), rebuilds the `Connector` with backoff and
    /// publishes it on `connector_tx`. `test_backoff_tx`, when present, is
    /// handed the jittered delay before every sleep so tests can observe
    /// backoff growth without waiting it out.
    pub async fn run(
        &self,
        mut reload_rx: broadcast::Receiver<()>,
        connector_tx: watch::Sender<Option<Connector>>,
        test_backoff_tx: Option<mpsc::Sender<Duration>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> GatewayError {
        loop {
            let connector = match self
                .connect_with_backoff(test_backoff_tx.as_ref(), &mut shutdown)
                .await
            {
                Ok(connector) => connector,
                Err(fatal_or_exited) => return fatal_or_exited,
            };
            let _ = connector_tx.send(Some(connector));

            tokio::select! {
                res = reload_rx.recv() => match res {
                    Ok(()) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return GatewayError::Exited { role: self.builder.role.to_string() }
                    }
                },
                _ = shutdown.recv() => return GatewayError::Exited { role: self.builder.role.to_string() },
            }
        }
    }

    /// Retries `connect()` + post-connect verification with linear backoff
    /// until it succeeds or `shutdown` fires.
    async fn connect_with_backoff(
        &self,
        test_backoff_tx: Option<&mpsc::Sender<Duration>>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<Connector, GatewayError> {
        let mut retry = Retry::new(self.retry);
        loop {
            match self.connect_and_verify().await {
                Ok(connector) => {
                    info!(role = %self.builder.role, "connected to the authority");
                    return Ok(connector);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(role = %self.builder.role, error = %e, "non-retryable connect failure, giving up");
                    return Err(e);
                }
                Err(e) => {
                    warn!(role = %self.builder.role, error = %e, "failed to connect, backing off");
                    if let Some(tx) = test_backoff_tx {
                        let _ = tx.try_send(retry.current_duration());
                    }
                    tokio::select! {
                        _ = retry.after() => retry.increment(),
                        _ = shutdown.recv() => {
                            return Err(GatewayError::Exited { role: self.builder.role.to_string() })
                        }
                    }
                }
            }
        }
    }

    /// Builds a `Connector`, then for non-local roles pings it and enforces
    /// the major-version gate. A ping failure discards the connector and
    /// is reported as a fresh connect failure, so the next attempt runs
    /// `connect()` again rather than re-pinging a stale client (§11).
    async fn connect_and_verify(&self) -> Result<Connector, GatewayError> {
        let connector = self.builder.connect(self.store.as_ref(), &self.keypairs).await?;

        if let Some(client) = &connector.client {
            let response = client.ping().await?;
            check_version(&response.server_version, &self.local_version, self.skip_version_check)?;
        }

        Ok(connector)
    }
}

/// Major-version-only comparison (§4.4, §11 `authServerTooOld`): a server
/// whose major version is older than ours is refused unless overridden.
pub fn check_version(server_version: &str, local_version: &str, skip_check: bool) -> Result<(), GatewayError> {
    let server = semver::Version::parse(server_version)
        .map_err(|e| GatewayError::Internal(format!("invalid server version {server_version:?}: {e}")))?;
    let local = semver::Version::parse(local_version)
        .map_err(|e| GatewayError::Internal(format!("invalid local version {local_version:?}: {e}")))?;

    if server.major < local.major {
        if skip_check {
            warn!(
                server_version,
                local_version, "authority major version is older than this node's, continuing anyway (--skip-version-check)"
            );
            return Ok(());
        }
        return Err(GatewayError::VersionTooOld {
            server: server_version.to_string(),
            required: local_version.to_string(),
        });
    }
    Ok(())
}
