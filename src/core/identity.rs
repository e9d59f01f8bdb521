// src/core/identity.rs

//! Identity and Role types (§3). An `Identity` is immutable once written;
//! a new one supersedes the old atomically via the identity store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The function a local process performs. Determines which certificates it
/// holds and which watchers it runs. `Auth` and `Admin` are "local" roles:
/// they speak to the authority in-process, never over the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Auth,
    Admin,
    Proxy,
    Node,
    App,
    Database,
}

impl Role {
    /// True for the two roles that short-circuit to the local authority
    /// adapter instead of building a network client.
    pub fn is_local(self) -> bool {
        matches!(self, Role::Auth | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Auth => "auth",
            Role::Admin => "admin",
            Role::Proxy => "proxy",
            Role::Node => "node",
            Role::App => "app",
            Role::Database => "database",
        };
        f.write_str(s)
    }
}

/// A freshly generated, not-yet-registered key pair, memoized across the
/// multiple steps of a rotation attempt so the same key is reused for the
/// subsequent re-register, then evicted (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub private_key: Vec<u8>,
    pub public_ssh_key: Vec<u8>,
    pub public_x509_key: Vec<u8>,
}

/// A local process's signed credentials, immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub role: Role,
    pub host_uuid: String,
    pub node_name: String,
    pub cluster_name: String,
    pub private_key: Vec<u8>,
    pub ssh_cert: Vec<u8>,
    pub x509_cert: Vec<u8>,
    pub principals: Vec<String>,
    pub dns_names: Vec<String>,
    /// Unix seconds; 0 means unknown/never expires.
    pub expiry: i64,
}

impl Identity {
    /// Whether `principals`/`dns_names` already cover the required set,
    /// used by the rotation engine's drift-detection step (§4.7, §11). The
    /// authority's wildcard advertise sentinel is filtered out of both
    /// sides before comparing, so it never spuriously triggers a
    /// re-register.
    pub fn covers(&self, required_principals: &[String], required_dns_names: &[String]) -> bool {
        const ANY_ADDRESS: &str = "0.0.0.0";
        let have_principals: std::collections::HashSet<&str> = self
            .principals
            .iter()
            .map(String::as_str)
            .filter(|p| *p != ANY_ADDRESS)
            .collect();
        let have_dns: std::collections::HashSet<&str> = self
            .dns_names
            .iter()
            .map(String::as_str)
            .filter(|d| *d != ANY_ADDRESS)
            .collect();
        required_principals
            .iter()
            .filter(|p| p.as_str() != ANY_ADDRESS)
            .all(|p| have_principals.contains(p.as_str()))
            && required_dns_names
                .iter()
                .filter(|d| d.as_str() != ANY_ADDRESS)
                .all(|d| have_dns.contains(d.as_str()))
    }
}

/// Which logical slot an identity occupies in the persisted layout (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySlot {
    Current,
    Replacement,
}

impl fmt::Display for IdentitySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentitySlot::Current => f.write_str("current"),
            IdentitySlot::Replacement => f.write_str("replacement"),
        }
    }
}
