use std::path::{Path, PathBuf};

/// Paths on a mounted device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLayout {
    root: PathBuf,
}

impl DeviceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    pub fn boot_out_path(&self) -> PathBuf {
        self.root.join("boot_out.txt")
    }

    pub fn code_py_path(&self) -> PathBuf {
        self.root.join("code.py")
    }

    /// Hidden sibling used while `name` is being written into `dir`.
    pub fn staging_path(dir: &Path, name: &str, suffix: u128) -> PathBuf {
        dir.join(format!(".modsync-staging-{name}-{suffix}"))
    }

    /// Hidden directory holding the artifacts a write replaces until it
    /// completes.
    pub fn backup_path(dir: &Path, name: &str, suffix: u128) -> PathBuf {
        dir.join(format!(".modsync-backup-{name}-{suffix}"))
    }
}
