use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bundle_types::{Bundle, BundleRecord};

pub const DEFAULT_BUNDLES: [(&str, u32); 3] = [
    ("adafruit/Adafruit_CircuitPython_Bundle", 10),
    ("adafruit/CircuitPython_Community_Bundle", 20),
    ("circuitpython/CircuitPython_Org_Bundle", 30),
];

/// Bundles added by the user sort ahead of the defaults.
pub const USER_BUNDLE_PRIORITY: u32 = 0;

/// Persistent list of configured bundles (`bundles.toml`).
#[derive(Debug, Clone)]
pub struct BundleStore {
    state_root: PathBuf,
}

impl BundleStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn list_bundles(&self) -> Result<Vec<BundleRecord>> {
        let mut state = self.load_state()?;
        sort_bundles(&mut state.bundles);
        Ok(state.bundles)
    }

    /// Enabled bundles in merge order.
    pub fn enabled_bundles(&self) -> Result<Vec<Bundle>> {
        self.list_bundles()?
            .iter()
            .filter(|record| record.enabled)
            .map(|record| {
                Bundle::parse(&record.repo).with_context(|| {
                    format!(
                        "invalid bundle entry '{}' in {}",
                        record.repo,
                        self.bundles_file_path().display()
                    )
                })
            })
            .collect()
    }

    pub fn add_bundle(&self, repo: &str) -> Result<BundleRecord> {
        let bundle = Bundle::parse(repo)?;
        let owner_repo = bundle.owner_repo();

        let mut state = self.load_state()?;
        if state
            .bundles
            .iter()
            .any(|existing| existing.repo.eq_ignore_ascii_case(&owner_repo))
        {
            anyhow::bail!("bundle '{}' already exists", owner_repo);
        }

        let record = BundleRecord {
            repo: owner_repo,
            enabled: true,
            priority: USER_BUNDLE_PRIORITY,
        };
        state.bundles.push(record.clone());
        self.save_state(&state)?;
        info!(bundle = %record.repo, "added bundle");
        Ok(record)
    }

    pub fn remove_bundle(&self, repo: &str) -> Result<()> {
        let owner_repo = Bundle::parse(repo)?.owner_repo();
        let mut state = self.load_state()?;
        let before = state.bundles.len();
        state
            .bundles
            .retain(|record| !record.repo.eq_ignore_ascii_case(&owner_repo));
        if state.bundles.len() == before {
            anyhow::bail!("bundle '{}' not found", owner_repo);
        }

        self.save_state(&state)?;
        info!(bundle = %owner_repo, "removed bundle");
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        self.save_state(&BundleStateFile::default())
    }

    fn bundles_file_path(&self) -> PathBuf {
        self.state_root.join("bundles.toml")
    }

    fn load_state(&self) -> Result<BundleStateFile> {
        let path = self.bundles_file_path();
        if !path.exists() {
            return Ok(BundleStateFile::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed reading bundle state: {}", path.display()))?;
        let mut state = toml::from_str::<BundleStateFile>(&content)
            .with_context(|| format!("failed parsing bundle state: {}", path.display()))?;
        state.version = state_file_version();
        sort_bundles(&mut state.bundles);
        Ok(state)
    }

    fn save_state(&self, state: &BundleStateFile) -> Result<()> {
        fs::create_dir_all(&self.state_root).with_context(|| {
            format!(
                "failed creating bundle state root: {}",
                self.state_root.display()
            )
        })?;

        let path = self.bundles_file_path();
        let mut state = state.clone();
        sort_bundles(&mut state.bundles);
        let content = toml::to_string(&state)
            .with_context(|| format!("failed serializing bundle state: {}", path.display()))?;
        fs::write(&path, content)
            .with_context(|| format!("failed writing bundle state: {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BundleStateFile {
    #[serde(default = "state_file_version")]
    version: u32,
    #[serde(default)]
    bundles: Vec<BundleRecord>,
}

impl Default for BundleStateFile {
    fn default() -> Self {
        Self {
            version: state_file_version(),
            bundles: default_bundle_records(),
        }
    }
}

pub fn default_bundle_records() -> Vec<BundleRecord> {
    DEFAULT_BUNDLES
        .iter()
        .map(|(repo, priority)| BundleRecord {
            repo: (*repo).to_string(),
            enabled: true,
            priority: *priority,
        })
        .collect()
}

fn state_file_version() -> u32 {
    1
}

fn sort_bundles(bundles: &mut [BundleRecord]) {
    bundles.sort_by(|left, right| {
        left.priority
            .cmp(&right.priority)
            .then_with(|| left.repo.cmp(&right.repo))
    });
}
