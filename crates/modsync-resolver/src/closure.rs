use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fs;

use anyhow::{Context, Result};
use modsync_catalog::CatalogIndex;
use modsync_core::package_files;
use tracing::{debug, warn};

use crate::imports::scan_imports;
use crate::names::{canonicalize_requirement_name, is_platform_builtin};

/// What the resolver needs from a catalog.
pub trait ModuleLookup {
    fn contains(&self, name: &str) -> bool;

    /// Source texts of the module's catalog artifact (one per file for a
    /// package).
    fn module_sources(&self, name: &str) -> Result<Vec<String>>;

    /// Requirement-style names the module declares it needs.
    fn declared_dependencies(&self, name: &str) -> Vec<String>;
}

impl ModuleLookup for CatalogIndex {
    fn contains(&self, name: &str) -> bool {
        CatalogIndex::contains(self, name)
    }

    fn module_sources(&self, name: &str) -> Result<Vec<String>> {
        let Some(entry) = self.get(name) else {
            return Ok(Vec::new());
        };

        let files = if entry.source_path.is_dir() {
            package_files(&entry.source_path).with_context(|| {
                format!("failed listing package {}", entry.source_path.display())
            })?
        } else {
            vec![entry.source_path.clone()]
        };

        let mut sources = Vec::new();
        for file in files {
            if file.extension().and_then(|ext| ext.to_str()) != Some("py") {
                continue;
            }
            let bytes =
                fs::read(&file).with_context(|| format!("failed reading {}", file.display()))?;
            sources.push(String::from_utf8_lossy(&bytes).into_owned());
        }
        Ok(sources)
    }

    fn declared_dependencies(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|entry| entry.declared_dependencies.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Closure {
    /// Catalog modules needed, in discovery order.
    pub required: Vec<String>,
    /// Names that are neither built in nor in the catalog, sorted.
    pub unknown: Vec<String>,
    /// Statements or modules that could not be analysed.
    pub unresolved: Vec<String>,
}

/// Every catalog module `entry_source` needs, directly or through the
/// modules it pulls in.
pub fn closure(entry_source: &str, catalog: &impl ModuleLookup) -> Closure {
    let scan = scan_imports(entry_source);
    let seeds = scan
        .modules
        .into_iter()
        .map(|name| name.to_ascii_lowercase())
        .collect::<Vec<_>>();
    let mut result = resolve_fixpoint(seeds, catalog);
    let mut unresolved = scan.unresolved;
    unresolved.append(&mut result.unresolved);
    result.unresolved = unresolved;
    result
}

/// Same fixpoint seeded with explicit, possibly requirement-style, names.
pub fn closure_from_names(names: &[String], catalog: &impl ModuleLookup) -> Closure {
    let seeds = names
        .iter()
        .filter_map(|name| canonicalize_requirement_name(name))
        .collect::<Vec<_>>();
    resolve_fixpoint(seeds, catalog)
}

fn resolve_fixpoint(seeds: Vec<String>, catalog: &impl ModuleLookup) -> Closure {
    let mut pending: VecDeque<String> = seeds.into();
    let mut visited: HashSet<String> = HashSet::new();
    let mut required = Vec::new();
    let mut unknown = BTreeSet::new();
    let mut unresolved = Vec::new();

    while let Some(name) = pending.pop_front() {
        if !visited.insert(name.clone()) {
            continue;
        }
        if !catalog.contains(&name) {
            if !is_platform_builtin(&name) {
                unknown.insert(name);
            }
            continue;
        }

        debug!(module = %name, "resolved catalog module");
        match catalog.module_sources(&name) {
            Ok(sources) => {
                for source in sources {
                    let scan = scan_imports(&source);
                    pending.extend(scan.modules.into_iter().map(|m| m.to_ascii_lowercase()));
                    unresolved.extend(
                        scan.unresolved
                            .into_iter()
                            .map(|statement| format!("{name}: {statement}")),
                    );
                }
            }
            Err(err) => {
                warn!(module = %name, error = %format!("{err:#}"), "could not scan module source");
                unresolved.push(format!("{name}: {err:#}"));
            }
        }
        pending.extend(
            catalog
                .declared_dependencies(&name)
                .iter()
                .filter_map(|dependency| canonicalize_requirement_name(dependency)),
        );
        required.push(name);
    }

    Closure {
        required,
        unknown: unknown.into_iter().collect(),
        unresolved,
    }
}
