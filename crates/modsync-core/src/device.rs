use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::abi::DeviceRuntime;
use crate::error::SyncError;
use crate::identity::ModuleIdentity;
use crate::requirements::Requirement;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceModuleRecord {
    pub identity: ModuleIdentity,
    pub on_device_path: PathBuf,
    pub corrupt: bool,
}

/// Snapshot of what a device holds in its module directory. Rebuilt for
/// every run, never persisted.
#[derive(Debug, Default)]
pub struct DeviceInventory {
    pub root: PathBuf,
    pub runtime: Option<DeviceRuntime>,
    /// Keyed by lower-cased module name.
    pub modules: BTreeMap<String, DeviceModuleRecord>,
    pub diagnostics: Vec<SyncError>,
}

impl DeviceInventory {
    pub fn new(root: impl Into<PathBuf>, runtime: Option<DeviceRuntime>) -> Self {
        Self {
            root: root.into(),
            runtime,
            modules: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DeviceModuleRecord> {
        self.modules.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn insert(&mut self, record: DeviceModuleRecord) {
        self.modules
            .insert(record.identity.name.to_ascii_lowercase(), record);
    }

    pub fn runtime_major(&self) -> Option<u32> {
        self.runtime.as_ref().and_then(DeviceRuntime::major)
    }

    /// Installed modules as a requirements list, sorted by name. Modules
    /// without a readable version are listed bare.
    pub fn freeze(&self) -> Vec<Requirement> {
        self.modules
            .iter()
            .map(|(name, record)| Requirement::new(name.clone(), record.identity.version.clone()))
            .collect()
    }
}
