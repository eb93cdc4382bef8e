use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use modsync_catalog::{list_module_entries, CatalogIndex};
use modsync_core::{module_name_from_path, SyncError};
use modsync_resolver::{ChosenFormat, ResolutionAction, SkipReason};
use tracing::{info, warn};

use crate::fs_utils::{copy_artifact, remove_path_if_exists, unique_suffix};
use crate::layout::DeviceLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Installed {
        name: String,
        path: PathBuf,
    },
    Updated {
        name: String,
        path: PathBuf,
        from: Option<String>,
        to: Option<String>,
    },
    Removed {
        name: String,
        paths: Vec<PathBuf>,
    },
    Skipped {
        name: String,
        reason: SkipReason,
    },
}

impl ActionOutcome {
    pub fn name(&self) -> &str {
        match self {
            Self::Installed { name, .. }
            | Self::Updated { name, .. }
            | Self::Removed { name, .. }
            | Self::Skipped { name, .. } => name,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Installed { .. } => "installed",
            Self::Updated { .. } => "updated",
            Self::Removed { .. } => "removed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Applies planned actions to one device. Writes go through `&mut self`,
/// so one executor never has two writes in flight.
#[derive(Debug)]
pub struct Executor {
    layout: DeviceLayout,
}

impl Executor {
    pub fn new(layout: DeviceLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    pub fn apply(
        &mut self,
        action: &ResolutionAction,
        catalog: &CatalogIndex,
    ) -> Result<ActionOutcome> {
        match action {
            ResolutionAction::Install { name, format } => {
                let path = self.write_module(name, *format, catalog)?;
                info!(module = %name, path = %path.display(), "installed module");
                Ok(ActionOutcome::Installed {
                    name: name.clone(),
                    path,
                })
            }
            ResolutionAction::Update {
                name,
                format,
                from,
                to,
                ..
            } => {
                let path = self.write_module(name, *format, catalog)?;
                info!(
                    module = %name,
                    from = from.as_deref().unwrap_or("-"),
                    to = to.as_deref().unwrap_or("-"),
                    "updated module"
                );
                Ok(ActionOutcome::Updated {
                    name: name.clone(),
                    path,
                    from: from.clone(),
                    to: to.clone(),
                })
            }
            ResolutionAction::Uninstall { name } => self.remove_module(name),
            ResolutionAction::Skip { name, reason } => Ok(ActionOutcome::Skipped {
                name: name.clone(),
                reason: *reason,
            }),
        }
    }

    /// Runs every action; one module failing does not stop the others.
    pub fn apply_all(
        &mut self,
        actions: &[ResolutionAction],
        catalog: &CatalogIndex,
    ) -> Vec<Result<ActionOutcome>> {
        actions
            .iter()
            .map(|action| {
                let outcome = self.apply(action, catalog);
                if let Err(err) = &outcome {
                    warn!(module = %action.name(), error = %format!("{err:#}"), "action failed");
                }
                outcome
            })
            .collect()
    }

    /// Copies a bundle example into the device root, as `code.py` when
    /// `rename_to_code_py` is set. Refuses to replace an existing file
    /// unless `overwrite` is set.
    pub fn install_example(
        &mut self,
        example: &Path,
        rename_to_code_py: bool,
        overwrite: bool,
    ) -> Result<PathBuf> {
        self.ensure_device_present()?;
        let root = self.layout.root().to_path_buf();

        let file_name = if rename_to_code_py {
            "code.py".to_string()
        } else {
            example
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| anyhow!("example path {} has no file name", example.display()))?
        };
        let target = root.join(&file_name);
        if target.exists() && !overwrite {
            bail!(
                "{} already exists on the device; use overwrite to replace it",
                target.display()
            );
        }

        let existing = if target.exists() {
            vec![target.clone()]
        } else {
            Vec::new()
        };
        stage_and_swap(&root, &file_name, example, &target, &existing)
            .map_err(|err| write_failure(&file_name, err))?;
        info!(example = %example.display(), path = %target.display(), "copied example");
        Ok(target)
    }

    /// A device unplugged since the scan must not turn into a fresh
    /// directory on the host.
    fn ensure_device_present(&self) -> Result<()> {
        let root = self.layout.root();
        if !root.is_dir() {
            return Err(SyncError::DeviceNotFound {
                path: root.to_path_buf(),
            }
            .into());
        }
        Ok(())
    }

    fn write_module(
        &mut self,
        name: &str,
        format: ChosenFormat,
        catalog: &CatalogIndex,
    ) -> Result<PathBuf> {
        self.ensure_device_present()?;
        let entry = catalog
            .get(name)
            .ok_or_else(|| anyhow!("module '{name}' is not in any configured bundle"))?;
        let artifact = match format {
            ChosenFormat::Source => entry.source_path.clone(),
            ChosenFormat::Precompiled(abi) => entry
                .variant_for(abi)
                .map(Path::to_path_buf)
                .ok_or_else(|| anyhow!("module '{name}' has no {abi} variant"))?,
        };

        self.place_module(name, &artifact)
            .map_err(|err| write_failure(name, err))
    }

    fn place_module(&mut self, name: &str, artifact: &Path) -> Result<PathBuf> {
        let lib_dir = self.layout.lib_dir();
        if !lib_dir.is_dir() {
            fs::create_dir(&lib_dir)
                .with_context(|| format!("failed to create {}", lib_dir.display()))?;
        }

        let file_name = artifact
            .file_name()
            .ok_or_else(|| anyhow!("artifact path {} has no file name", artifact.display()))?;
        let target = lib_dir.join(file_name);
        let existing = existing_artifacts(&lib_dir, name)?;

        stage_and_swap(&lib_dir, name, artifact, &target, &existing)?;
        Ok(target)
    }

    fn remove_module(&mut self, name: &str) -> Result<ActionOutcome> {
        self.ensure_device_present()?;
        let lib_dir = self.layout.lib_dir();
        let existing = if lib_dir.is_dir() {
            existing_artifacts(&lib_dir, name)?
        } else {
            Vec::new()
        };
        if existing.is_empty() {
            return Ok(ActionOutcome::Skipped {
                name: name.to_string(),
                reason: SkipReason::NotInstalled,
            });
        }

        let backup = DeviceLayout::backup_path(&lib_dir, name, unique_suffix());
        let mut moved = Vec::new();
        if let Err(err) = move_to_backup(&existing, &backup, &mut moved) {
            let err = restore_or_keep_backup(err, &moved, &backup);
            return Err(write_failure(name, err));
        }
        if let Err(err) = remove_path_if_exists(&backup) {
            warn!(path = %backup.display(), error = %format!("{err:#}"), "could not clear backup");
        }

        info!(module = %name, "removed module");
        Ok(ActionOutcome::Removed {
            name: name.to_string(),
            paths: existing,
        })
    }
}

/// Every artifact in `lib_dir` that belongs to `name`, whatever its form.
fn existing_artifacts(lib_dir: &Path, name: &str) -> Result<Vec<PathBuf>> {
    let wanted = name.to_ascii_lowercase();
    Ok(list_module_entries(lib_dir)?
        .into_iter()
        .filter(|path| {
            module_name_from_path(path).is_some_and(|found| found.to_ascii_lowercase() == wanted)
        })
        .collect())
}

/// Copies `artifact` next to `target` under a hidden name, moves
/// `existing` aside, then renames the copy into place. Any failure puts
/// `existing` back and drops the copy.
fn stage_and_swap(
    dir: &Path,
    name: &str,
    artifact: &Path,
    target: &Path,
    existing: &[PathBuf],
) -> Result<()> {
    let suffix = unique_suffix();
    let staging = DeviceLayout::staging_path(dir, name, suffix);
    if let Err(err) = copy_artifact(artifact, &staging) {
        let _ = remove_path_if_exists(&staging);
        return Err(err.context(format!("failed to stage {}", artifact.display())));
    }

    let backup = DeviceLayout::backup_path(dir, name, suffix);
    let mut moved = Vec::new();
    let swapped = move_to_backup(existing, &backup, &mut moved).and_then(|()| {
        fs::rename(&staging, target).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                staging.display(),
                target.display()
            )
        })
    });

    if let Err(err) = swapped {
        let _ = remove_path_if_exists(&staging);
        return Err(restore_or_keep_backup(err, &moved, &backup));
    }

    if let Err(err) = remove_path_if_exists(&backup) {
        warn!(path = %backup.display(), error = %format!("{err:#}"), "could not clear backup");
    }
    Ok(())
}

fn move_to_backup(
    existing: &[PathBuf],
    backup: &Path,
    moved: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<()> {
    if existing.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(backup).with_context(|| format!("failed to create {}", backup.display()))?;
    for path in existing {
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let destination = backup.join(file_name);
        fs::rename(path, &destination)
            .with_context(|| format!("failed to move {} aside", path.display()))?;
        moved.push((path.clone(), destination));
    }
    Ok(())
}

/// Puts moved artifacts back after a failed write. The backup is deleted
/// only when every artifact was restored; otherwise it holds the only copy.
pub(crate) fn restore_or_keep_backup(
    err: anyhow::Error,
    moved: &[(PathBuf, PathBuf)],
    backup: &Path,
) -> anyhow::Error {
    match restore_backup(moved) {
        Ok(()) => {
            let _ = remove_path_if_exists(backup);
            err
        }
        Err(restore_err) => combine_restore_error(err, restore_err),
    }
}

fn restore_backup(moved: &[(PathBuf, PathBuf)]) -> Result<()> {
    for (original, backed_up) in moved.iter().rev() {
        fs::rename(backed_up, original).with_context(|| {
            format!(
                "failed to restore {} from {}",
                original.display(),
                backed_up.display()
            )
        })?;
    }
    Ok(())
}

fn combine_restore_error(err: anyhow::Error, restore_err: anyhow::Error) -> anyhow::Error {
    anyhow!("{err:#}; restore also failed: {restore_err:#}")
}

fn write_failure(name: &str, err: anyhow::Error) -> anyhow::Error {
    SyncError::PartialWriteFailure {
        name: name.to_string(),
        reason: format!("{err:#}"),
    }
    .into()
}
