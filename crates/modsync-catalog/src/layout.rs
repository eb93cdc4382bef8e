use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::bundle_types::Bundle;

/// Where modsync keeps its own state: the bundle list and the bundle cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModsyncLayout {
    state_root: PathBuf,
}

impl ModsyncLayout {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn bundles_file(&self) -> PathBuf {
        self.state_root.join("bundles.toml")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.state_root.join("cache")
    }

    pub fn bundle_dir(&self, bundle: &Bundle) -> PathBuf {
        self.cache_dir().join(&bundle.owner).join(bundle.bundle_id())
    }

    pub fn bundle_lock_path(&self, bundle: &Bundle) -> PathBuf {
        self.bundle_dir(bundle).join(".lock")
    }

    pub fn snapshot_path(&self, bundle: &Bundle) -> PathBuf {
        self.bundle_dir(bundle).join("snapshot.json")
    }

    pub fn release_dir(&self, bundle: &Bundle, tag: &str) -> PathBuf {
        self.bundle_dir(bundle).join(tag)
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.state_root.clone(), self.cache_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create dir: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// `$MODSYNC_HOME`, then `$XDG_DATA_HOME/modsync`, then a dot directory in
/// the user's home (`%LOCALAPPDATA%\Modsync` on Windows).
pub fn default_state_root() -> Result<PathBuf> {
    if let Some(explicit) = non_empty_env("MODSYNC_HOME") {
        return Ok(PathBuf::from(explicit));
    }

    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows state root")?;
        return Ok(PathBuf::from(app_data).join("Modsync"));
    }

    if let Some(data_home) = non_empty_env("XDG_DATA_HOME") {
        return Ok(PathBuf::from(data_home).join("modsync"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve state root")?;
    Ok(PathBuf::from(home).join(".modsync"))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
