use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use modsync_core::{
    extract, is_hidden, module_name_from_path, parse_requirements, ModuleIdentity, TargetAbi,
};
use tracing::{debug, warn};

use crate::bundle_types::{Bundle, CatalogSnapshot};
use crate::fs_ops::list_module_entries;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Lower-cased join key.
    pub name: String,
    pub identity: ModuleIdentity,
    pub bundle: Bundle,
    pub source_path: PathBuf,
    pub precompiled_variants: BTreeMap<TargetAbi, PathBuf>,
    pub examples_path: Option<PathBuf>,
    /// Raw requirement names from the bundle's requirements data.
    pub declared_dependencies: Vec<String>,
}

impl CatalogEntry {
    pub fn version(&self) -> Option<&str> {
        self.identity.version.as_deref()
    }

    pub fn variant_for(&self, abi: TargetAbi) -> Option<&Path> {
        self.precompiled_variants.get(&abi).map(PathBuf::as_path)
    }
}

/// Merged view over every usable bundle snapshot. Earlier snapshots win on
/// name collisions; iteration follows (bundle priority, name).
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, usize>,
    examples: BTreeMap<String, PathBuf>,
}

impl CatalogIndex {
    pub fn build(snapshots: &[CatalogSnapshot]) -> Result<Self> {
        let mut index = Self::default();
        for snapshot in snapshots {
            let entries = load_snapshot_entries(snapshot)?;
            debug!(
                bundle = %snapshot.bundle,
                tag = %snapshot.tag,
                modules = entries.len(),
                "indexed bundle"
            );
            index.merge(entries);
            for (slug, path) in load_examples(&snapshot.examples_dir())? {
                index.examples.entry(slug).or_insert(path);
            }
        }
        Ok(index)
    }

    /// Merges pre-built entries, keeping the first entry seen for a name.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut index = Self::default();
        index.merge(entries);
        index
    }

    fn merge(&mut self, entries: impl IntoIterator<Item = CatalogEntry>) {
        for entry in entries {
            if self.by_name.contains_key(&entry.name) {
                continue;
            }
            self.by_name.insert(entry.name.clone(), self.entries.len());
            self.entries.push(entry);
        }
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(|position| &self.entries[*position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Rank of `name` in iteration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose name contains `needle`, case-insensitively.
    pub fn search(&self, needle: &str) -> Vec<&CatalogEntry> {
        let needle = needle.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry.name.contains(&needle))
            .collect()
    }

    /// Example slug (`<module>/<path>/<stem>`) to file.
    pub fn examples(&self) -> &BTreeMap<String, PathBuf> {
        &self.examples
    }
}

fn load_snapshot_entries(snapshot: &CatalogSnapshot) -> Result<Vec<CatalogEntry>> {
    let lib_dir = snapshot.source_lib_dir();
    let abi_dirs = list_abi_lib_dirs(snapshot)?;
    let examples_dir = snapshot.examples_dir();
    let requirements_dir = snapshot.requirements_dir();

    let mut entries = Vec::new();
    for path in list_module_entries(&lib_dir)? {
        let Some(raw_name) = module_name_from_path(&path) else {
            continue;
        };
        let extraction = extract(&path);
        if extraction.is_corrupt() {
            warn!(bundle = %snapshot.bundle, module = %raw_name, "catalog artifact unreadable");
        }

        let mut precompiled_variants = BTreeMap::new();
        for (abi, abi_lib) in &abi_dirs {
            if let Some(variant) = compiled_variant_path(abi_lib, &raw_name) {
                precompiled_variants.insert(*abi, variant);
            }
        }

        let examples_path = Some(examples_dir.join(&raw_name)).filter(|path| path.is_dir());
        let declared_dependencies = declared_dependencies(&requirements_dir.join(&raw_name))?;

        entries.push(CatalogEntry {
            name: raw_name.to_ascii_lowercase(),
            identity: extraction.identity,
            bundle: snapshot.bundle.clone(),
            source_path: path,
            precompiled_variants,
            examples_path,
            declared_dependencies,
        });
    }

    entries.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(entries)
}

fn list_abi_lib_dirs(snapshot: &CatalogSnapshot) -> Result<Vec<(TargetAbi, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(&snapshot.root)
        .with_context(|| format!("failed reading bundle release {}", snapshot.root.display()))?
    {
        let entry = entry?;
        let Some(abi) = TargetAbi::parse_dir_name(&entry.file_name().to_string_lossy()) else {
            continue;
        };
        let lib = entry.path().join("lib");
        if lib.is_dir() {
            dirs.push((abi, lib));
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn compiled_variant_path(abi_lib: &Path, name: &str) -> Option<PathBuf> {
    [abi_lib.join(format!("{name}.mpy")), abi_lib.join(name)]
        .into_iter()
        .find(|candidate| candidate.exists())
}

/// Names listed in `requirements.txt` and in the `[circup]` table of
/// `pyproject.toml`, first occurrence kept.
fn declared_dependencies(requirements_dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();

    let requirements_txt = requirements_dir.join("requirements.txt");
    if requirements_txt.is_file() {
        let content = fs::read_to_string(&requirements_txt)
            .with_context(|| format!("failed reading {}", requirements_txt.display()))?;
        names.extend(
            parse_requirements(&content)
                .into_iter()
                .map(|requirement| requirement.name),
        );
    }

    let pyproject = requirements_dir.join("pyproject.toml");
    if pyproject.is_file() {
        let content = fs::read_to_string(&pyproject)
            .with_context(|| format!("failed reading {}", pyproject.display()))?;
        match pyproject_dependencies(&content) {
            Ok(declared) => names.extend(declared),
            Err(err) => warn!(
                path = %pyproject.display(),
                error = %err,
                "ignoring unparsable pyproject.toml"
            ),
        }
    }

    let mut seen = std::collections::HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
    Ok(names)
}

fn pyproject_dependencies(content: &str) -> Result<Vec<String>> {
    let document = toml::from_str::<toml::Table>(content)?;
    let Some(list) = document
        .get("circup")
        .and_then(|section| section.get("circup_dependencies"))
        .and_then(toml::Value::as_array)
    else {
        return Ok(Vec::new());
    };

    let joined = list
        .iter()
        .filter_map(toml::Value::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    Ok(parse_requirements(&joined)
        .into_iter()
        .map(|requirement| requirement.name)
        .collect())
}

fn load_examples(examples_dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut examples = BTreeMap::new();
    if !examples_dir.is_dir() {
        return Ok(examples);
    }

    let mut pending = Vec::new();
    for entry in fs::read_dir(examples_dir)
        .with_context(|| format!("failed reading examples {}", examples_dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() && !is_hidden(&path) {
            pending.push(path);
        }
    }

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed reading examples {}", dir.display()))?
        {
            let path = entry?.path();
            if is_hidden(&path) {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let Ok(relative) = path.strip_prefix(examples_dir) else {
                continue;
            };
            let mut slug = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            if slug.ends_with(".py") {
                slug.truncate(slug.len() - 3);
            }
            examples.insert(slug, path);
        }
    }
    Ok(examples)
}
