use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bundle_types::Bundle;
use crate::fs_ops::current_unix_timestamp;

/// Tag recorded when nothing has been cached yet. Sorts below every real
/// date-style release tag.
pub const NO_CACHED_TAG: &str = "0";

#[derive(Debug, Serialize, Deserialize)]
struct BundleSnapshotFile {
    version: u32,
    bundle: String,
    tag: String,
    updated_at_unix: u64,
    module_count: u64,
    content_digest: String,
    status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub tag: String,
    pub updated_at_unix: u64,
    pub module_count: u64,
    pub content_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleSnapshotState {
    None,
    Ready(SnapshotRecord),
    Error { reason_code: String },
}

pub(crate) fn write_snapshot_file(
    bundle_dir: &Path,
    bundle: &Bundle,
    tag: &str,
    module_count: u64,
    content_digest: &str,
) -> Result<()> {
    let snapshot_path = bundle_dir.join("snapshot.json");
    let snapshot = BundleSnapshotFile {
        version: 1,
        bundle: bundle.owner_repo(),
        tag: tag.to_string(),
        updated_at_unix: current_unix_timestamp(),
        module_count,
        content_digest: content_digest.to_string(),
        status: "ready".to_string(),
    };
    let content = serde_json::to_string_pretty(&snapshot).with_context(|| {
        format!(
            "catalog-unavailable: bundle '{}' failed serializing snapshot {}",
            bundle,
            snapshot_path.display()
        )
    })?;
    fs::write(&snapshot_path, content).with_context(|| {
        format!(
            "catalog-unavailable: bundle '{}' failed writing snapshot {}",
            bundle,
            snapshot_path.display()
        )
    })
}

/// The cached release tag, or [`NO_CACHED_TAG`] when the record is missing,
/// unreadable or not marked ready.
pub fn read_cached_tag(bundle_dir: &Path) -> String {
    match read_snapshot_state(bundle_dir) {
        BundleSnapshotState::Ready(record) => record.tag,
        _ => NO_CACHED_TAG.to_string(),
    }
}

pub fn read_snapshot_state(bundle_dir: &Path) -> BundleSnapshotState {
    let snapshot_path = bundle_dir.join("snapshot.json");
    let content = match fs::read_to_string(&snapshot_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return BundleSnapshotState::None;
        }
        Err(_) => {
            return BundleSnapshotState::Error {
                reason_code: "snapshot-unreadable".to_string(),
            };
        }
    };

    let Ok(snapshot) = serde_json::from_str::<BundleSnapshotFile>(&content) else {
        return BundleSnapshotState::Error {
            reason_code: "snapshot-unreadable".to_string(),
        };
    };

    if snapshot.status != "ready" || snapshot.tag.trim().is_empty() {
        return BundleSnapshotState::Error {
            reason_code: "snapshot-invalid".to_string(),
        };
    }

    BundleSnapshotState::Ready(SnapshotRecord {
        tag: snapshot.tag,
        updated_at_unix: snapshot.updated_at_unix,
        module_count: snapshot.module_count,
        content_digest: snapshot.content_digest,
    })
}
