use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use modsync_core::{TargetAbi, SOURCE_PLATFORM_DIR};
use serde::{Deserialize, Serialize};

const GITHUB_PREFIXES: [&str; 3] = ["https://github.com/", "http://github.com/", "github.com/"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub repo: String,
    #[serde(default = "crate::bundle_types::bundle_enabled_default")]
    pub enabled: bool,
    pub priority: u32,
}

/// An upstream bundle repository, `owner/name` on GitHub.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bundle {
    pub owner: String,
    pub name: String,
}

impl Bundle {
    /// Accepts `owner/repo` as well as a pasted repository URL.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let mut rest = trimmed;
        for prefix in GITHUB_PREFIXES {
            if let Some(stripped) = rest.strip_prefix(prefix) {
                rest = stripped;
                break;
            }
        }
        let rest = rest.trim_end_matches('/');
        let rest = rest.strip_suffix(".git").unwrap_or(rest);

        let mut segments = rest.split('/');
        let (Some(owner), Some(name), None) = (segments.next(), segments.next(), segments.next())
        else {
            anyhow::bail!("invalid bundle repository '{trimmed}': expected 'owner/repo'");
        };
        for segment in [owner, name] {
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
            if !valid {
                anyhow::bail!("invalid bundle repository '{trimmed}': bad segment '{segment}'");
            }
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner_repo(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Prefix of release asset names, e.g. `adafruit-circuitpython-bundle`.
    pub fn bundle_id(&self) -> String {
        self.name.to_ascii_lowercase().replace('_', "-")
    }

    pub fn latest_release_url(&self) -> String {
        format!("https://github.com/{}/releases/latest", self.owner_repo())
    }

    pub fn asset_stem(&self, platform: &str, tag: &str) -> String {
        format!("{}-{platform}-{tag}", self.bundle_id())
    }

    pub fn asset_url(&self, platform: &str, tag: &str) -> String {
        format!(
            "https://github.com/{}/releases/download/{tag}/{}.zip",
            self.owner_repo(),
            self.asset_stem(platform, tag)
        )
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Updated,
    UpToDate,
    Offline,
    /// The remote check or fetch failed and the previous cache is in use.
    Stale,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::UpToDate => "up-to-date",
            Self::Offline => "offline",
            Self::Stale => "stale",
        }
    }
}

/// A usable cached release of one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub bundle: Bundle,
    pub tag: String,
    pub root: PathBuf,
    pub status: SyncStatus,
    pub warning: Option<String>,
}

impl CatalogSnapshot {
    pub fn source_dir(&self) -> PathBuf {
        self.root.join(SOURCE_PLATFORM_DIR)
    }

    pub fn source_lib_dir(&self) -> PathBuf {
        self.source_dir().join("lib")
    }

    pub fn abi_lib_dir(&self, abi: TargetAbi) -> PathBuf {
        self.root.join(abi.dir_name()).join("lib")
    }

    pub fn examples_dir(&self) -> PathBuf {
        self.source_dir().join("examples")
    }

    pub fn requirements_dir(&self) -> PathBuf {
        self.source_dir().join("requirements")
    }
}

pub(crate) fn bundle_enabled_default() -> bool {
    true
}
