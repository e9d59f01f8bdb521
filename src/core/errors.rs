// src/core/errors.rs

//! Defines the primary error type for the entire application.

use thiserror::Error;

/// The main error enum, representing all possible failures within the gateway.
///
/// Variants line up with the error taxonomy: transient errors are retried
/// inside a backoff loop and never surface past it; `Precondition` and
/// `CompareFailed` are the only variants a caller of the rotation engine or
/// the reconnect supervisor should ever observe.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Dial/read/write failure, or a remote watcher that closed the stream.
    /// Folded into backoff loops; never surfaced to `get_current()` callers.
    #[error("transient error: {0}")]
    Transient(String),

    /// An unexpected first watch event, or a payload whose kind doesn't
    /// match its specialization. Causes a watcher restart.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Missing provisioning token, reserved connector name, unknown
    /// rotation phase on first connect. Returned to the caller, not retried.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Local rotation state disagrees with remote in a way that is not a
    /// legal transition.
    #[error(
        "{role} rotation state is out of sync with the cluster (remote: {remote:?}, local: {local:?}); \
         clear local state and re-register this {role}"
    )]
    CompareFailed {
        role: String,
        remote: String,
        local: String,
    },

    /// The authority's major version is older than ours and no override is set.
    #[error("authority server version {server} is too old, this node requires major version {required} or newer")]
    VersionTooOld { server: String, required: String },

    /// No fresh snapshot within `max_staleness`; strict-mode lock checks
    /// must deny rather than risk acting on missing information.
    #[error("resource view is stale, strict-mode check denied")]
    StaleView,

    /// A malformed or unsupported parameter — unknown rotation state/phase,
    /// bad watch spec, etc.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Anything else: serialization, I/O, or wrapped library errors that
    /// don't fit a more specific category.
    #[error("internal error: {0}")]
    Internal(String),

    /// Sentinel returned by the reconnect supervisor when it stops because
    /// of global shutdown rather than because it gave up (§4.8, §5).
    #[error("{role} reconnect supervisor exited: shutting down")]
    Exited { role: String },
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Internal(format!("I/O error: {e}"))
    }
}

impl From<tonic::Status> for GatewayError {
    fn from(e: tonic::Status) -> Self {
        GatewayError::Transient(format!("rpc error: {e}"))
    }
}

impl From<tonic::transport::Error> for GatewayError {
    fn from(e: tonic::transport::Error) -> Self {
        GatewayError::Transient(format!("transport error: {e}"))
    }
}

impl From<ssh2::Error> for GatewayError {
    fn from(e: ssh2::Error) -> Self {
        GatewayError::Transient(format!("ssh tunnel error: {e}"))
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(e: toml::de::Error) -> Self {
        GatewayError::Internal(format!("config parse error: {e}"))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Internal(format!("serialization error: {e}"))
    }
}

impl From<bincode::error::EncodeError> for GatewayError {
    fn from(e: bincode::error::EncodeError) -> Self {
        GatewayError::Internal(format!("encode error: {e}"))
    }
}

impl From<bincode::error::DecodeError> for GatewayError {
    fn from(e: bincode::error::DecodeError) -> Self {
        GatewayError::Internal(format!("decode error: {e}"))
    }
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_) | GatewayError::Protocol(_))
    }
}
