// src/core/store.rs

//! A narrow persistence contract for identities and rotation state (§4.2,
//! §6), plus a file-backed implementation using the atomic
//! write-to-temp-then-rename shape the teacher uses for SPLDB snapshots.

use crate::core::errors::GatewayError;
use crate::core::identity::{Identity, IdentitySlot, Role};
use crate::core::rotation::RotationState;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// `read_*` return `Ok(None)` rather than an error when the record is
/// absent; that is the expected first-run state, not a failure.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn read_identity(
        &self,
        slot: IdentitySlot,
        role: Role,
    ) -> Result<Option<Identity>, GatewayError>;

    /// Atomic per-role, per-slot write.
    async fn write_identity(
        &self,
        slot: IdentitySlot,
        role: Role,
        identity: &Identity,
    ) -> Result<(), GatewayError>;

    async fn read_state(&self, role: Role) -> Result<Option<RotationState>, GatewayError>;

    /// Atomic write. Callers must call this only after the matching
    /// `write_identity` has already landed on disk (§4.2: a crash between
    /// the two must leave only the identity updated, never the inverse).
    async fn write_state(&self, role: Role, state: &RotationState) -> Result<(), GatewayError>;
}

/// File-backed store rooted at `data_dir`, laid out per §6:
/// `identities/<role>/current`, `identities/<role>/replacement`,
/// `state/<role>`. Each record is a standalone bincode-encoded file,
/// written via a temp file in the same directory followed by an atomic
/// rename, mirroring `spldb_saver.rs`'s snapshot-save sequence.
pub struct FileIdentityStore {
    data_dir: PathBuf,
}

impl FileIdentityStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn identity_path(&self, slot: IdentitySlot, role: Role) -> PathBuf {
        self.data_dir
            .join("identities")
            .join(role.to_string())
            .join(slot.to_string())
    }

    fn state_path(&self, role: Role) -> PathBuf {
        self.data_dir.join("state").join(role.to_string())
    }

    async fn read_record<T: serde::de::DeserializeOwned>(
        path: &Path,
    ) -> Result<Option<T>, GatewayError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GatewayError::from(e)),
        }
    }

    async fn write_record<T: serde::Serialize + Sync>(
        path: &Path,
        value: &T,
    ) -> Result<(), GatewayError> {
        let dir = path.parent().ok_or_else(|| {
            GatewayError::Internal(format!("record path {} has no parent", path.display()))
        })?;
        tokio::fs::create_dir_all(dir).await?;

        let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
        let tmp_path = dir.join(format!(
            ".tmp.{}.{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("record"),
            rand::random::<u32>()
        ));

        tokio::fs::write(&tmp_path, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            warn!(path = %path.display(), error = %e, "failed to rename temp record into place");
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(GatewayError::from(e));
        }
        debug!(path = %path.display(), "wrote record");
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn read_identity(
        &self,
        slot: IdentitySlot,
        role: Role,
    ) -> Result<Option<Identity>, GatewayError> {
        Self::read_record(&self.identity_path(slot, role)).await
    }

    async fn write_identity(
        &self,
        slot: IdentitySlot,
        role: Role,
        identity: &Identity,
    ) -> Result<(), GatewayError> {
        Self::write_record(&self.identity_path(slot, role), identity).await
    }

    async fn read_state(&self, role: Role) -> Result<Option<RotationState>, GatewayError> {
        Self::read_record(&self.state_path(role)).await
    }

    async fn write_state(&self, role: Role, state: &RotationState) -> Result<(), GatewayError> {
        Self::write_record(&self.state_path(role), state).await
    }
}
