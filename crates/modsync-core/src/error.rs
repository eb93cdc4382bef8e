use std::path::PathBuf;

use thiserror::Error;

/// Conditions callers branch on. Everything else travels as plain
/// `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("device-not-found: no device root at {}", path.display())]
    DeviceNotFound { path: PathBuf },

    #[error("device-not-found: no mounted device volume named '{volume}'")]
    DeviceNotLocated { volume: String },

    #[error("catalog-unavailable: bundle '{bundle}': {reason}")]
    CatalogUnavailable { bundle: String, reason: String },

    #[error("corrupt-artifact: {}: {reason}", path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("partial-write-failure: module '{name}': {reason}")]
    PartialWriteFailure { name: String, reason: String },
}

impl SyncError {
    pub fn is_device_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. } | Self::DeviceNotLocated { .. }
        )
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::DeviceNotFound { .. } | Self::DeviceNotLocated { .. } => "device-not-found",
            Self::CatalogUnavailable { .. } => "catalog-unavailable",
            Self::CorruptArtifact { .. } => "corrupt-artifact",
            Self::PartialWriteFailure { .. } => "partial-write-failure",
        }
    }
}
