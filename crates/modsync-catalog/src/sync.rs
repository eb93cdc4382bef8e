use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use modsync_core::{SyncError, TargetAbi, SOURCE_PLATFORM_DIR};
use tracing::{debug, info, warn};

use crate::bundle_types::{Bundle, CatalogSnapshot, SyncStatus};
use crate::fetch::{ArchiveExtractor, ReleaseSource};
use crate::fs_ops::{
    compute_content_digest, list_module_entries, remove_path_if_exists, unique_suffix,
};
use crate::layout::ModsyncLayout;
use crate::snapshot_state::{read_cached_tag, write_snapshot_file, NO_CACHED_TAG};

/// Keeps the local bundle cache in step with upstream releases.
pub struct CatalogStore {
    layout: ModsyncLayout,
    source: Box<dyn ReleaseSource>,
    extractor: Box<dyn ArchiveExtractor>,
    abis: Vec<TargetAbi>,
    offline: bool,
}

impl CatalogStore {
    pub fn new(
        layout: ModsyncLayout,
        source: Box<dyn ReleaseSource>,
        extractor: Box<dyn ArchiveExtractor>,
    ) -> Self {
        Self {
            layout,
            source,
            extractor,
            abis: Vec::new(),
            offline: false,
        }
    }

    /// Compiled variants to fetch next to the source variant.
    pub fn with_abis(mut self, abis: impl IntoIterator<Item = TargetAbi>) -> Self {
        self.abis = abis.into_iter().collect();
        self.abis.sort();
        self.abis.dedup();
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn layout(&self) -> &ModsyncLayout {
        &self.layout
    }

    /// Makes sure `bundle` has a usable cached release, fetching a newer one
    /// when upstream has it. Failures while checking or fetching fall back
    /// to the existing cache; only a bundle with no cache at all is an error.
    pub fn ensure_fresh(&self, bundle: &Bundle) -> Result<CatalogSnapshot> {
        let cached_tag = read_cached_tag(&self.layout.bundle_dir(bundle));

        if self.offline {
            return self.cached_snapshot(bundle, &cached_tag, SyncStatus::Offline, None);
        }

        let latest_tag = match self.source.latest_tag(bundle) {
            Ok(tag) => tag,
            Err(err) => return self.fall_back_to_cache(bundle, &cached_tag, err),
        };

        let release_dir = self.layout.release_dir(bundle, &cached_tag);
        let release_present = release_dir.is_dir()
            && self
                .abis
                .iter()
                .all(|abi| release_dir.join(abi.dir_name()).is_dir());
        // Release tags are date strings; plain string order is what upstream
        // relies on here. The cached tag never moves backwards; the same tag
        // is fetched again only to fill in a missing compiled variant.
        let remote_newer = latest_tag.as_str() > cached_tag.as_str();
        let refill = latest_tag == cached_tag && !release_present;
        if !remote_newer && !refill {
            return self.cached_snapshot(bundle, &cached_tag, SyncStatus::UpToDate, None);
        }

        info!(bundle = %bundle, from = %cached_tag, to = %latest_tag, "fetching bundle release");
        match self.fetch_release(bundle, &latest_tag) {
            Ok(root) => Ok(CatalogSnapshot {
                bundle: bundle.clone(),
                tag: latest_tag,
                root,
                status: SyncStatus::Updated,
                warning: None,
            }),
            Err(err) => self.fall_back_to_cache(bundle, &cached_tag, err),
        }
    }

    /// Runs [`Self::ensure_fresh`] for every bundle on its own thread. Results
    /// keep the order of `bundles`.
    pub fn ensure_all_fresh(&self, bundles: &[Bundle]) -> Vec<Result<CatalogSnapshot>> {
        std::thread::scope(|scope| {
            let handles = bundles
                .iter()
                .map(|bundle| scope.spawn(move || self.ensure_fresh(bundle)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .zip(bundles)
                .map(|(handle, bundle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(SyncError::CatalogUnavailable {
                            bundle: bundle.owner_repo(),
                            reason: "bundle sync thread panicked".to_string(),
                        }
                        .into())
                    })
                })
                .collect()
        })
    }

    fn cached_snapshot(
        &self,
        bundle: &Bundle,
        cached_tag: &str,
        status: SyncStatus,
        warning: Option<String>,
    ) -> Result<CatalogSnapshot> {
        let root = self.layout.release_dir(bundle, cached_tag);
        if cached_tag == NO_CACHED_TAG || !root.join(SOURCE_PLATFORM_DIR).is_dir() {
            let reason = warning.unwrap_or_else(|| "no cached release".to_string());
            return Err(SyncError::CatalogUnavailable {
                bundle: bundle.owner_repo(),
                reason,
            }
            .into());
        }

        Ok(CatalogSnapshot {
            bundle: bundle.clone(),
            tag: cached_tag.to_string(),
            root,
            status,
            warning,
        })
    }

    fn fall_back_to_cache(
        &self,
        bundle: &Bundle,
        cached_tag: &str,
        err: anyhow::Error,
    ) -> Result<CatalogSnapshot> {
        let reason = format!("{err:#}");
        debug!(bundle = %bundle, error = %reason, "bundle refresh failed; using cached release");
        self.cached_snapshot(bundle, cached_tag, SyncStatus::Stale, Some(reason))
    }

    fn platforms(&self) -> Vec<String> {
        let mut platforms = vec![SOURCE_PLATFORM_DIR.to_string()];
        platforms.extend(self.abis.iter().map(|abi| abi.dir_name()));
        platforms
    }

    fn fetch_release(&self, bundle: &Bundle, tag: &str) -> Result<PathBuf> {
        let bundle_dir = self.layout.bundle_dir(bundle);
        fs::create_dir_all(&bundle_dir).with_context(|| {
            format!(
                "catalog-unavailable: bundle '{}' failed creating cache dir {}",
                bundle,
                bundle_dir.display()
            )
        })?;
        let _lock = BundleLock::acquire(&self.layout.bundle_lock_path(bundle), bundle)?;

        let staged_root = bundle_dir.join(format!(".staging-{tag}-{}", unique_suffix()));
        let staged = self.stage_release(bundle, tag, &staged_root);
        let (module_count, digest) = match staged {
            Ok(staged) => staged,
            Err(err) => {
                let _ = fs::remove_dir_all(&staged_root);
                return Err(err);
            }
        };

        let destination = self.layout.release_dir(bundle, tag);
        finalize_staged_release(
            bundle,
            &bundle_dir,
            &staged_root,
            &destination,
            tag,
            module_count,
            &digest,
        )?;
        prune_old_releases(&bundle_dir, tag);
        info!(bundle = %bundle, tag = %tag, modules = module_count, "bundle cache updated");
        Ok(destination)
    }

    fn stage_release(
        &self,
        bundle: &Bundle,
        tag: &str,
        staged_root: &Path,
    ) -> Result<(u64, String)> {
        let downloads = staged_root.join(".downloads");
        for platform in self.platforms() {
            let url = bundle.asset_url(&platform, tag);
            let stem = bundle.asset_stem(&platform, tag);
            let archive = downloads.join(format!("{stem}.zip"));
            self.source.download(&url, &archive).with_context(|| {
                format!("catalog-unavailable: bundle '{bundle}' failed downloading {url}")
            })?;

            let extract_dir = downloads.join(format!("extract-{platform}"));
            self.extractor.extract(&archive, &extract_dir).with_context(|| {
                format!(
                    "catalog-unavailable: bundle '{bundle}' failed extracting {}",
                    archive.display()
                )
            })?;

            let extracted = if extract_dir.join(&stem).is_dir() {
                extract_dir.join(&stem)
            } else {
                extract_dir.clone()
            };
            if !extracted.join("lib").is_dir() {
                anyhow::bail!(
                    "catalog-unavailable: bundle '{}' archive {} has no lib/ directory",
                    bundle,
                    archive.display()
                );
            }

            let platform_dir = staged_root.join(&platform);
            fs::rename(&extracted, &platform_dir).with_context(|| {
                format!(
                    "catalog-unavailable: bundle '{}' failed staging {}",
                    bundle,
                    platform_dir.display()
                )
            })?;
        }
        remove_path_if_exists(&downloads)?;

        let module_count = list_module_entries(&staged_root.join(SOURCE_PLATFORM_DIR).join("lib"))?
            .len() as u64;
        let digest = compute_content_digest(staged_root)?;
        Ok((module_count, digest))
    }
}

fn finalize_staged_release(
    bundle: &Bundle,
    bundle_dir: &Path,
    staged_root: &Path,
    destination: &Path,
    tag: &str,
    module_count: u64,
    digest: &str,
) -> Result<()> {
    let backup = bundle_dir.join(format!(".{tag}-backup-{}", unique_suffix()));
    let had_existing = destination.exists();

    if had_existing {
        if let Err(err) = fs::rename(destination, &backup) {
            let _ = fs::remove_dir_all(staged_root);
            return Err(err).with_context(|| {
                format!(
                    "catalog-unavailable: bundle '{}' failed backing up cache {}",
                    bundle,
                    destination.display()
                )
            });
        }
    }

    if let Err(err) = fs::rename(staged_root, destination).with_context(|| {
        format!(
            "catalog-unavailable: bundle '{}' failed replacing cache {}",
            bundle,
            destination.display()
        )
    }) {
        let _ = fs::remove_dir_all(staged_root);
        if had_existing {
            if let Err(restore_err) = fs::rename(&backup, destination) {
                return Err(combine_replace_restore_errors(
                    bundle,
                    destination,
                    &backup,
                    err,
                    restore_err,
                ));
            }
        }
        return Err(err);
    }

    if let Err(err) = write_snapshot_file(bundle_dir, bundle, tag, module_count, digest) {
        let _ = fs::remove_dir_all(destination);
        if had_existing {
            if let Err(restore_err) = fs::rename(&backup, destination) {
                return Err(combine_replace_restore_errors(
                    bundle,
                    destination,
                    &backup,
                    err,
                    restore_err,
                ));
            }
        }
        return Err(err);
    }

    if had_existing {
        let _ = fs::remove_dir_all(&backup);
    }
    Ok(())
}

/// Drops releases other than `keep_tag`. Hidden entries and the snapshot
/// record are left alone.
fn prune_old_releases(bundle_dir: &Path, keep_tag: &str) {
    let Ok(entries) = fs::read_dir(bundle_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == keep_tag || name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            if let Err(err) = fs::remove_dir_all(&path) {
                warn!(path = %path.display(), error = %err, "failed pruning old bundle release");
            }
        }
    }
}

fn combine_replace_restore_errors(
    bundle: &Bundle,
    destination: &Path,
    backup: &Path,
    replace_err: anyhow::Error,
    restore_err: std::io::Error,
) -> anyhow::Error {
    anyhow::anyhow!(
        "catalog-unavailable: bundle '{}' failed replacing cache {}: {:#}; failed restoring backup {}: {}",
        bundle,
        destination.display(),
        replace_err,
        backup.display(),
        restore_err
    )
}

/// Exclusive claim on one bundle's cache directory, released on drop.
struct BundleLock {
    path: PathBuf,
}

impl BundleLock {
    fn acquire(path: &Path, bundle: &Bundle) -> Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| {
                format!(
                    "catalog-unavailable: bundle '{}' cache is locked by another process ({}); remove the file if no sync is running",
                    bundle,
                    path.display()
                )
            })?;
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("failed to write lock file: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for BundleLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
