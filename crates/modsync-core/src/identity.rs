use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SyncError;
use crate::mpy::{scan_precompiled, PrecompiledHeader};
use crate::source_meta::scan_source;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    SingleFile,
    PackageDirectory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Source,
    Precompiled(PrecompiledHeader),
    Unknown,
}

impl ArtifactFormat {
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source)
    }

    pub fn precompiled_header(&self) -> Option<&PrecompiledHeader> {
        match self {
            Self::Precompiled(header) => Some(header),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Precompiled(_) => "precompiled",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIdentity {
    pub name: String,
    pub version: Option<String>,
    pub origin_repo: Option<String>,
    pub artifact_kind: ArtifactKind,
    pub format: ArtifactFormat,
}

/// Identity of one artifact plus anything that made it unreadable.
#[derive(Debug)]
pub struct Extraction {
    pub identity: ModuleIdentity,
    pub problems: Vec<SyncError>,
}

impl Extraction {
    pub fn is_corrupt(&self) -> bool {
        !self.problems.is_empty()
    }
}

/// Module name for an artifact path: the file or directory name without a
/// `.py` / `.mpy` suffix.
pub fn module_name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name
        .strip_suffix(".mpy")
        .or_else(|| file_name.strip_suffix(".py"))
        .unwrap_or(file_name);
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_string())
}

pub fn is_module_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("py") | Some("mpy")
    )
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Reads identity metadata from a single-file module or a package
/// directory. Never executes module code; missing metadata stays absent.
pub fn extract(path: &Path) -> Extraction {
    let name = module_name_from_path(path).unwrap_or_default();
    if path.is_dir() {
        extract_package(path, name)
    } else {
        extract_file(path, name)
    }
}

fn extract_file(path: &Path, name: String) -> Extraction {
    let mut identity = ModuleIdentity {
        name,
        version: None,
        origin_repo: None,
        artifact_kind: ArtifactKind::SingleFile,
        format: ArtifactFormat::Unknown,
    };

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            return Extraction {
                identity,
                problems: vec![SyncError::CorruptArtifact {
                    path: path.to_path_buf(),
                    reason: format!("unreadable: {err}"),
                }],
            };
        }
    };

    let mut problems = Vec::new();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("py") => {
            let meta = scan_source(&String::from_utf8_lossy(&bytes));
            identity.version = meta.version;
            identity.origin_repo = meta.repo;
            identity.format = ArtifactFormat::Source;
        }
        Some("mpy") => match scan_precompiled(&bytes) {
            Ok(meta) => {
                if meta.pool_truncated {
                    debug!(path = %path.display(), "string pool truncated; keeping partial metadata");
                }
                identity.version = meta.version;
                identity.origin_repo = meta.repo;
                identity.format = ArtifactFormat::Precompiled(meta.header);
            }
            Err(err) => problems.push(SyncError::CorruptArtifact {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
        },
        _ => {}
    }

    debug!(
        path = %path.display(),
        version = identity.version.as_deref().unwrap_or("-"),
        format = identity.format.as_str(),
        "extracted module identity"
    );
    Extraction { identity, problems }
}

fn extract_package(path: &Path, name: String) -> Extraction {
    let mut identity = ModuleIdentity {
        name,
        version: None,
        origin_repo: None,
        artifact_kind: ArtifactKind::PackageDirectory,
        format: ArtifactFormat::Unknown,
    };
    let mut problems = Vec::new();

    let files = match package_files(path) {
        Ok(files) => files,
        Err(err) => {
            problems.push(SyncError::CorruptArtifact {
                path: path.to_path_buf(),
                reason: format!("unreadable package: {err}"),
            });
            return Extraction { identity, problems };
        }
    };

    let mut first_header = None;
    let mut any_source = false;
    for file in &files {
        let member = extract_file(file, String::new());
        if identity.version.is_none() && member.identity.version.is_some() {
            identity.version = member.identity.version;
            identity.origin_repo = member.identity.origin_repo;
        }
        match member.identity.format {
            ArtifactFormat::Precompiled(header) if first_header.is_none() => {
                first_header = Some(header)
            }
            ArtifactFormat::Source => any_source = true,
            _ => {}
        }
        problems.extend(member.problems);
    }

    identity.format = if !problems.is_empty() {
        ArtifactFormat::Unknown
    } else if let Some(header) = first_header {
        ArtifactFormat::Precompiled(header)
    } else if any_source {
        ArtifactFormat::Source
    } else {
        ArtifactFormat::Unknown
    };

    Extraction { identity, problems }
}

/// Every `.py` / `.mpy` file below `root`, sorted, hidden entries skipped.
pub fn package_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if is_hidden(&path) {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
            } else if is_module_file(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
