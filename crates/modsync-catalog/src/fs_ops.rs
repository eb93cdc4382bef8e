use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use modsync_core::{is_hidden, is_module_file};
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest over every file below `root`: sorted relative paths, each paired
/// with the digest of its bytes.
pub(crate) fn compute_content_digest(root: &Path) -> Result<String> {
    let mut file_paths = collect_relative_file_paths(root)?;
    file_paths.sort();

    let mut digest_input = Vec::new();
    for relative_path in file_paths {
        let normalized_path = normalize_path_for_digest(&relative_path);
        let file_bytes = fs::read(root.join(&relative_path)).with_context(|| {
            format!(
                "failed reading staged file for digest {}",
                root.join(&relative_path).display()
            )
        })?;

        digest_input.extend_from_slice(normalized_path.as_bytes());
        digest_input.push(0);
        digest_input.extend_from_slice(sha256_hex(&file_bytes).as_bytes());
        digest_input.push(0);
    }

    Ok(format!("sha256:{}", sha256_hex(&digest_input)))
}

pub(crate) fn collect_relative_file_paths(root: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(root.to_path_buf());

    while let Some(dir) = queue.pop_front() {
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed reading staged directory {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                queue.push_back(path);
            } else if file_type.is_file() {
                let relative_path = path.strip_prefix(root).with_context(|| {
                    format!(
                        "failed deriving relative path {} from {}",
                        path.display(),
                        root.display()
                    )
                })?;
                paths.push(relative_path.to_path_buf());
            }
        }
    }

    Ok(paths)
}

pub(crate) fn normalize_path_for_digest(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Top-level module artifacts in a `lib/` directory: `.py` and `.mpy`
/// files plus package directories, sorted by path.
pub fn list_module_entries(lib_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(lib_dir)
        .with_context(|| format!("failed reading module directory {}", lib_dir.display()))?
    {
        let path = entry?.path();
        if is_hidden(&path) {
            continue;
        }
        if path.is_dir() || is_module_file(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

pub(crate) fn remove_path_if_exists(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed removing directory {}", path.display()))?;
    } else if path.exists() {
        fs::remove_file(path).with_context(|| format!("failed removing {}", path.display()))?;
    }
    Ok(())
}

pub(crate) fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
