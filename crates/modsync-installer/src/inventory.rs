use std::fs;

use anyhow::Result;
use modsync_catalog::list_module_entries;
use modsync_core::{extract, DeviceInventory, DeviceModuleRecord, DeviceRuntime, SyncError};
use tracing::{debug, info, warn};

use crate::layout::DeviceLayout;

/// Reads the device's runtime from `boot_out.txt`, if present and
/// parsable.
pub fn read_runtime(layout: &DeviceLayout) -> Option<DeviceRuntime> {
    let path = layout.boot_out_path();
    let contents = fs::read_to_string(&path).ok()?;
    let runtime = DeviceRuntime::parse_boot_out(&contents);
    if runtime.is_none() {
        warn!(path = %path.display(), "could not read runtime version from boot_out.txt");
    }
    runtime
}

/// Scans `<root>/lib`. `runtime_override` replaces whatever the device
/// reports about itself. Unreadable artifacts keep their record and add a
/// diagnostic; only a missing device root fails.
pub fn scan(
    layout: &DeviceLayout,
    runtime_override: Option<DeviceRuntime>,
) -> Result<DeviceInventory> {
    let root = layout.root();
    if !root.is_dir() {
        return Err(SyncError::DeviceNotFound {
            path: root.to_path_buf(),
        }
        .into());
    }

    let runtime = runtime_override.or_else(|| read_runtime(layout));
    let mut inventory = DeviceInventory::new(root, runtime);

    let lib_dir = layout.lib_dir();
    if !lib_dir.is_dir() {
        debug!(root = %root.display(), "device has no lib directory");
        return Ok(inventory);
    }

    for path in list_module_entries(&lib_dir)? {
        let extraction = extract(&path);
        if extraction.identity.name.is_empty() {
            continue;
        }
        let corrupt = extraction.is_corrupt();
        if corrupt {
            warn!(path = %path.display(), "device artifact unreadable");
        }
        inventory.diagnostics.extend(extraction.problems);
        inventory.insert(DeviceModuleRecord {
            identity: extraction.identity,
            on_device_path: path,
            corrupt,
        });
    }

    info!(
        root = %root.display(),
        modules = inventory.modules.len(),
        diagnostics = inventory.diagnostics.len(),
        "scanned device"
    );
    Ok(inventory)
}
