// src/config.rs

//! Loads, resolves, and validates MeshGate's on-disk configuration (§10.3).

use crate::core::identity::Role;
use crate::rpc::tunnel::SshTunnelConfig;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// TLS material for reaching the authority over an encrypted channel,
/// mirroring the teacher's `TlsConfig` shape (`cert_path`/`key_path`
/// fields, `enabled` toggle) even though MeshGate's client trusts
/// `webpki-roots` by default and only consults this when set.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
}

/// Reverse-tunnel dialer configuration (§4.3 step 3, §6). Absent when the
/// role never needs a tunnel fallback.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SshConfig {
    pub ssh_addr: String,
    pub username: String,
    pub private_key_path: String,
    pub remote_authority_addr: String,
}

impl From<&SshConfig> for SshTunnelConfig {
    fn from(cfg: &SshConfig) -> Self {
        SshTunnelConfig {
            ssh_addr: cfg.ssh_addr.clone(),
            username: cfg.username.clone(),
            private_key_path: cfg.private_key_path.clone().into(),
            remote_authority_addr: cfg.remote_authority_addr.clone(),
        }
    }
}

/// Configuration for the Prometheus metrics exporter (§10.5), mirroring
/// the teacher's `MetricsConfig` plus an explicit bind host.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_host() -> String {
    "127.0.0.1".to_string()
}
fn default_metrics_port() -> u16 {
    9878
}

/// A raw representation of the config file before validation and
/// resolution, mirroring the teacher's `RawConfig`/`Config` split so that
/// generated defaults (`host_uuid`) are filled in after parsing rather
/// than baked into `serde(default)`.
#[derive(Deserialize)]
struct RawConfig {
    role: Role,
    #[serde(default)]
    host_uuid: Option<String>,
    #[serde(default)]
    node_name: String,
    cluster_name: String,
    #[serde(default)]
    authority_addresses: Vec<String>,
    #[serde(default = "default_data_dir")]
    data_dir: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    tls: TlsConfig,
    #[serde(default)]
    ssh: Option<SshConfig>,
    #[serde(default)]
    additional_principals: Vec<String>,
    #[serde(default)]
    dns_names: Vec<String>,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default = "default_max_retry_period", with = "humantime_serde")]
    max_retry_period: Duration,
    #[serde(default = "default_polling_period", with = "humantime_serde")]
    polling_period: Duration,
    #[serde(
        default = "default_rotation_connection_interval",
        with = "humantime_serde"
    )]
    rotation_connection_interval: Duration,
    #[serde(default = "default_refetch_period", with = "humantime_serde")]
    refetch_period: Duration,
    #[serde(default = "default_lock_max_staleness", with = "humantime_serde")]
    lock_max_staleness: Duration,
    #[serde(default = "default_client_timeout", with = "humantime_serde")]
    client_timeout: Duration,
    #[serde(default)]
    skip_version_check: bool,
}

fn default_data_dir() -> String {
    "meshgate_data".to_string()
}
fn default_max_retry_period() -> Duration {
    Duration::from_secs(30)
}
fn default_polling_period() -> Duration {
    Duration::from_secs(10)
}
fn default_rotation_connection_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_refetch_period() -> Duration {
    Duration::from_secs(600)
}
fn default_lock_max_staleness() -> Duration {
    Duration::from_secs(60)
}
fn default_client_timeout() -> Duration {
    Duration::from_secs(30)
}

/// The final, validated, and resolved configuration (§10.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub role: Role,
    pub host_uuid: String,
    pub node_name: String,
    pub cluster_name: String,
    pub authority_addresses: Vec<String>,
    pub data_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
    #[serde(default)]
    pub additional_principals: Vec<String>,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(with = "humantime_serde")]
    pub max_retry_period: Duration,
    #[serde(with = "humantime_serde")]
    pub polling_period: Duration,
    #[serde(with = "humantime_serde")]
    pub rotation_connection_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub refetch_period: Duration,
    #[serde(with = "humantime_serde")]
    pub lock_max_staleness: Duration,
    #[serde(with = "humantime_serde")]
    pub client_timeout: Duration,
    pub skip_version_check: bool,
}

impl Config {
    /// Loads `path` as TOML, then layers `MESHGATE__`-prefixed environment
    /// variables over it (e.g. `MESHGATE__ROLE=proxy`,
    /// `MESHGATE__METRICS__PORT=9900`) via the `config` crate, before
    /// resolving generated defaults and validating.
    pub fn from_file(path: &str) -> Result<Self> {
        let raw_value = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("MESHGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to load config from '{path}'"))?;

        let raw: RawConfig = raw_value
            .try_deserialize()
            .with_context(|| format!("failed to parse config from '{path}'"))?;

        let host_uuid = raw
            .host_uuid
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let config = Config {
            role: raw.role,
            host_uuid,
            node_name: raw.node_name,
            cluster_name: raw.cluster_name,
            authority_addresses: raw.authority_addresses,
            data_dir: raw.data_dir,
            token: raw.token,
            tls: raw.tls,
            ssh: raw.ssh,
            additional_principals: raw.additional_principals,
            dns_names: raw.dns_names,
            metrics: raw.metrics,
            max_retry_period: raw.max_retry_period,
            polling_period: raw.polling_period,
            rotation_connection_interval: raw.rotation_connection_interval,
            refetch_period: raw.refetch_period,
            lock_max_staleness: raw.lock_max_staleness,
            client_timeout: raw.client_timeout,
            skip_version_check: raw.skip_version_check,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration for logical consistency.
    fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(anyhow!("cluster_name cannot be empty"));
        }
        if !self.role.is_local() && self.authority_addresses.is_empty() {
            return Err(anyhow!(
                "authority_addresses cannot be empty for role {}",
                self.role
            ));
        }
        if self.tls.enabled && (self.tls.cert_path.is_none() || self.tls.key_path.is_none()) {
            return Err(anyhow!(
                "tls.cert_path and tls.key_path are required when tls.enabled is set"
            ));
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0"));
        }
        if self.max_retry_period.is_zero() {
            return Err(anyhow!("max_retry_period cannot be 0"));
        }
        if self.client_timeout.is_zero() {
            return Err(anyhow!("client_timeout cannot be 0"));
        }
        if self.skip_version_check {
            warn!("skip_version_check is set: this node will connect to authorities with an older major version");
        }
        Ok(())
    }
}
