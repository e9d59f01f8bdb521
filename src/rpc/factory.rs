// src/rpc/factory.rs

//! Authority client factory (§4.3): direct connection first, reverse
//! tunnel second. Grounded line-for-line on
//! `newClient`/`newClientDirect`/`newClientThroughTunnel` in
//! `original_source/lib/service/connect.go`.

use crate::core::errors::GatewayError;
use crate::core::identity::Role;
use crate::rpc::client::{AuthorityClient, NetworkAuthorityClient};
use crate::rpc::tunnel::{SshTunnelConfig, TunnelResolver};
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{ClientTlsConfig, Endpoint};
use tracing::{debug, warn};

pub struct ClientFactoryInput {
    pub authority_addresses: Vec<String>,
    pub role: Role,
    pub client_timeout: Duration,
    pub ssh: Option<SshTunnelConfig>,
}

/// Tries a direct client to each authority address, verifying each with the
/// cheap `get_cluster_name` probe (§4.3 step 1, §11). `Auth`/`Proxy` must
/// not fall back to a tunnel (§4.3 step 2): their direct error is surfaced
/// unchanged. Other roles fall back to a tunnel client on direct failure
/// and, if that also fails, return an aggregate of both errors (§4.3 step 4,
/// §11 "aggregated error message" — username/identity non-disclosure is
/// preserved by folding both paths into the same `Transient` shape).
pub async fn build_authority_client(
    input: ClientFactoryInput,
) -> Result<Arc<dyn AuthorityClient>, GatewayError> {
    let direct_err = match try_direct(&input, &input.authority_addresses, None).await {
        Ok(client) => return Ok(client),
        Err(e) => e,
    };

    if matches!(input.role, Role::Auth | Role::Proxy) {
        return Err(direct_err);
    }

    let Some(ssh) = input.ssh.clone() else {
        return Err(GatewayError::Transient(format!(
            "direct connection failed and no reverse-tunnel is configured: {direct_err}"
        )));
    };

    match try_tunnel(&input, ssh).await {
        Ok(client) => Ok(client),
        Err(tunnel_err) => Err(GatewayError::Transient(format!(
            "no connection methods remaining: direct failed ({direct_err}), tunnel failed ({tunnel_err})"
        ))),
    }
}

/// Builds and probes a direct client against each `addr:port` in `addrs`.
/// `tls_domain_override` pins the TLS SNI/verification name independently
/// of the dialed address, used by the tunnel path (§4.3 step 3) since the
/// gRPC client there physically dials a loopback forward.
async fn try_direct(
    input: &ClientFactoryInput,
    addrs: &[String],
    tls_domain_override: Option<&str>,
) -> Result<Arc<dyn AuthorityClient>, GatewayError> {
    let mut last_err = GatewayError::Transient("no authority addresses configured".into());
    for addr in addrs {
        let mut tls = ClientTlsConfig::new().with_webpki_roots();
        if let Some(domain) = tls_domain_override {
            tls = tls.domain_name(domain);
        }

        let endpoint = match Endpoint::from_shared(format!("https://{addr}"))
            .map_err(|e| GatewayError::BadParameter(format!("invalid authority address {addr}: {e}")))
            .and_then(|ep| {
                ep.tls_config(tls)
                    .map(|ep| ep.timeout(input.client_timeout))
                    .map_err(GatewayError::from)
            }) {
            Ok(ep) => ep,
            Err(e) => {
                last_err = e;
                continue;
            }
        };

        match endpoint.connect().await {
            Ok(channel) => {
                let client = NetworkAuthorityClient::new(channel);
                match client.get_cluster_name().await {
                    Ok(_) => {
                        debug!(%addr, "authority client verified");
                        return Ok(Arc::new(client));
                    }
                    Err(e) => {
                        warn!(%addr, error = %e, "authority client probe failed");
                        last_err = e;
                    }
                }
            }
            Err(e) => {
                last_err = GatewayError::from(e);
            }
        }
    }
    Err(last_err)
}

async fn try_tunnel(
    input: &ClientFactoryInput,
    ssh: SshTunnelConfig,
) -> Result<Arc<dyn AuthorityClient>, GatewayError> {
    let tls_domain = ssh.tls_server_name();
    let resolver = TunnelResolver::new(ssh);
    let local_addr = resolver.open_local_forward().await?;
    try_direct(input, &[local_addr.to_string()], Some(&tls_domain)).await
}
