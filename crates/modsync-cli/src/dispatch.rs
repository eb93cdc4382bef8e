use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use modsync_catalog::{
    default_state_root, read_cached_tag, Bundle, BundleStore, CatalogIndex, CatalogSnapshot,
    CatalogStore, CommandExtractor, HttpFetcher, ModsyncLayout, ReleaseSource, SyncStatus,
};
use modsync_core::{
    format_requirements, parse_requirements, DeviceInventory, DeviceRuntime, TargetAbi,
};
use modsync_installer::{scan, DeviceLayout, Executor};
use modsync_resolver::{
    closure, closure_from_names, plan, plan_removal, Closure, PlanOptions, ResolutionAction,
    SkipReason, UpdateReason,
};
use tracing::debug;

use crate::completion::write_completions_script;
use crate::device_locator::locate_device;
use crate::render::{
    format_outcome_line, format_outdated_table, format_plan_lines, render_status_line,
    TerminalRenderer,
};
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let session = Session::from_cli(&cli)?;
    let renderer = TerminalRenderer::current();

    match cli.command {
        Commands::Freeze { requirement, force } => {
            let (_, inventory) = session.device(renderer)?;
            let text = format_requirements(&inventory.freeze());
            if requirement {
                let path = PathBuf::from("requirements.txt");
                write_requirements_file(&path, &text, force)?;
                renderer.print_status("ok", &format!("wrote {}", path.display()));
            } else {
                print!("{text}");
            }
        }
        Commands::List => {
            let (_, inventory) = session.device(renderer)?;
            let catalog = session.catalog(device_abi(&inventory), renderer)?;
            let actions = plan(&inventory, &catalog, None, PlanOptions::default());
            let lines = format_outdated_table(
                &actions,
                |name| {
                    catalog
                        .get(name)
                        .and_then(|entry| entry.version().map(str::to_string))
                },
                |name| {
                    inventory
                        .get(name)
                        .and_then(|record| record.identity.version.clone())
                },
            );
            renderer.print_lines(&lines);
        }
        Commands::Update {
            modules,
            all,
            allow_major,
            dry_run,
        } => {
            let (device, inventory) = session.device(renderer)?;
            let catalog = session.catalog(device_abi(&inventory), renderer)?;
            let targets = (!modules.is_empty()).then_some(modules.as_slice());
            let actions = update_actions(&inventory, &catalog, targets, all, allow_major)
                .into_iter()
                .filter(|action| !is_quiet_skip(action, targets.is_some()))
                .collect::<Vec<_>>();

            if actions.is_empty() {
                renderer.print_status("ok", "all modules are up to date");
                return Ok(());
            }
            renderer.print_section("plan");
            renderer.print_lines(&format_plan_lines(&actions, renderer.style()));
            if actions.iter().any(|action| {
                matches!(
                    action,
                    ResolutionAction::Skip {
                        reason: SkipReason::ConfirmationRequired,
                        ..
                    }
                )
            }) {
                renderer.print_status(
                    "warn",
                    "rerun with --allow-major for major updates or --all to include corrupt replacements",
                );
            }
            if dry_run {
                return Ok(());
            }
            apply_actions(&mut Executor::new(device), &actions, &catalog, renderer, "update")?;
        }
        Commands::Install {
            modules,
            py,
            requirement,
            auto,
            auto_file,
            dry_run,
        } => {
            let (device, inventory) = session.device(renderer)?;
            let catalog = session.catalog(device_abi(&inventory), renderer)?;

            let mut requested = modules;
            if let Some(path) = &requirement {
                requested.extend(requirement_file_names(path, &catalog, renderer)?);
            }
            let mut resolved = closure_from_names(&requested, &catalog);
            if auto || auto_file.is_some() {
                let program = auto_program_path(&device, auto_file.as_deref());
                let source = fs::read_to_string(&program)
                    .with_context(|| format!("failed reading {}", program.display()))?;
                resolved = merge_closures(resolved, closure(&source, &catalog));
            } else if requested.is_empty() {
                bail!("nothing to install: name modules, pass -r FILE or use --auto");
            }
            for statement in &resolved.unresolved {
                renderer.print_status("warn", &format!("could not analyse import: {statement}"));
            }

            let mut targets = resolved.required;
            targets.extend(resolved.unknown);
            let options = PlanOptions {
                unattended: true,
                allow_major: true,
                prefer_source: py,
            };
            let actions = plan(&inventory, &catalog, Some(&targets), options);

            renderer.print_section("plan");
            renderer.print_lines(&format_plan_lines(&actions, renderer.style()));
            if dry_run {
                return Ok(());
            }
            apply_actions(&mut Executor::new(device), &actions, &catalog, renderer, "install")?;
        }
        Commands::Uninstall { modules } => {
            let (device, inventory) = session.device(renderer)?;
            let actions = plan_removal(&inventory, &modules);
            apply_actions(
                &mut Executor::new(device),
                &actions,
                &CatalogIndex::default(),
                renderer,
                "uninstall",
            )?;
        }
        Commands::Show { pattern } => {
            let catalog = session.catalog(None, renderer)?;
            let names = match pattern.as_deref() {
                Some(pattern) => catalog
                    .search(pattern)
                    .into_iter()
                    .map(|entry| entry.identity.name.clone())
                    .collect::<Vec<_>>(),
                None => catalog
                    .iter()
                    .map(|entry| entry.identity.name.clone())
                    .collect(),
            };
            renderer.print_lines(&names);
            renderer.print_status("info", &format!("{} packages", names.len()));
        }
        Commands::Example {
            list,
            rename,
            overwrite,
            names,
        } => {
            let catalog = session.catalog(None, renderer)?;
            if list {
                let slugs = if names.is_empty() {
                    catalog.examples().keys().cloned().collect::<Vec<_>>()
                } else {
                    names
                        .iter()
                        .flat_map(|name| select_examples(catalog.examples(), name))
                        .map(|(slug, _)| slug)
                        .collect()
                };
                renderer.print_lines(&slugs);
                return Ok(());
            }
            if names.is_empty() {
                bail!("name at least one example, or pass --list");
            }

            let device = DeviceLayout::new(locate_device(session.device_path.as_deref())?);
            let mut executor = Executor::new(device);
            let mut failures = 0_usize;
            for name in &names {
                let matches = select_examples(catalog.examples(), name);
                if matches.is_empty() {
                    renderer.print_status("error", &format!("no example named '{name}'"));
                    failures += 1;
                    continue;
                }
                if rename && matches.len() > 1 {
                    bail!(
                        "'{name}' matches {} examples; only one can become code.py",
                        matches.len()
                    );
                }
                for (slug, path) in matches {
                    match executor.install_example(&path, rename, overwrite) {
                        Ok(target) => renderer.print_status(
                            "ok",
                            &format!("copied example {slug} to {}", target.display()),
                        ),
                        Err(err) => {
                            renderer.print_status("error", &format!("{slug}: {err:#}"));
                            failures += 1;
                        }
                    }
                }
            }
            if failures > 0 {
                bail!("{failures} example(s) were not copied");
            }
        }
        Commands::BundleShow { modules } => {
            let store = session.bundle_store();
            for record in store.list_bundles()? {
                let tag = Bundle::parse(&record.repo)
                    .map(|bundle| read_cached_tag(&session.layout.bundle_dir(&bundle)))
                    .unwrap_or_else(|_| "invalid".to_string());
                let enabled = if record.enabled { "" } else { " (disabled)" };
                println!(
                    "{}  priority={}  cached={tag}{enabled}",
                    record.repo, record.priority
                );
            }
            if modules {
                let catalog = session.catalog(None, renderer)?;
                for (bundle, names) in modules_by_bundle(&catalog) {
                    renderer.print_section(&bundle);
                    renderer.print_lines(&names);
                }
            }
        }
        Commands::BundleAdd { repos } => {
            let store = session.bundle_store();
            let fetcher = if session.offline {
                None
            } else {
                Some(HttpFetcher::new(github_token().as_deref())?)
            };
            let mut failures = 0_usize;
            for repo in &repos {
                match add_bundle(&store, fetcher.as_ref(), repo) {
                    Ok(message) => renderer.print_status("ok", &message),
                    Err(err) => {
                        renderer.print_status("error", &format!("{err:#}"));
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                bail!("{failures} bundle(s) were not added");
            }
        }
        Commands::BundleRemove { reset, repos } => {
            let store = session.bundle_store();
            if reset {
                store.reset()?;
                renderer.print_status("ok", "bundle list reset to defaults");
                return Ok(());
            }
            if repos.is_empty() {
                bail!("name at least one bundle, or pass --reset");
            }
            for repo in &repos {
                store.remove_bundle(repo)?;
                renderer.print_status("ok", &format!("removed bundle {repo}"));
            }
        }
        Commands::Completions { shell } => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            write_completions_script(shell, &mut handle)?;
        }
    }

    Ok(())
}

/// Values every command shares, resolved once from the global flags.
struct Session {
    layout: ModsyncLayout,
    device_path: Option<PathBuf>,
    offline: bool,
    runtime_override: Option<DeviceRuntime>,
}

impl Session {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let state_root = match &cli.state_root {
            Some(root) => root.clone(),
            None => default_state_root()?,
        };
        Ok(Self {
            layout: ModsyncLayout::new(state_root),
            device_path: cli.path.clone(),
            offline: cli.offline,
            runtime_override: parse_runtime_override(cli.cpy_version.as_deref())?,
        })
    }

    fn bundle_store(&self) -> BundleStore {
        BundleStore::new(self.layout.state_root())
    }

    fn device(&self, renderer: TerminalRenderer) -> Result<(DeviceLayout, DeviceInventory)> {
        let root = locate_device(self.device_path.as_deref())?;
        let device = DeviceLayout::new(root);
        let inventory = scan(&device, self.runtime_override.clone())?;
        for diagnostic in &inventory.diagnostics {
            renderer.print_status("warn", &diagnostic.to_string());
        }
        match &inventory.runtime {
            Some(runtime) => debug!(version = %runtime.version, "device runtime"),
            None => renderer.print_status(
                "warn",
                "device runtime unknown; installing source modules (use --cpy-version to set it)",
            ),
        }
        Ok((device, inventory))
    }

    /// Brings every enabled bundle up to date and merges the usable ones. A
    /// bundle that cannot be fetched and has no cache is reported and left
    /// out; the run fails only when no bundle is usable.
    fn catalog(
        &self,
        abi: Option<TargetAbi>,
        renderer: TerminalRenderer,
    ) -> Result<CatalogIndex> {
        self.layout.ensure_base_dirs()?;
        let bundles = self.bundle_store().enabled_bundles()?;
        let source = HttpFetcher::new(github_token().as_deref())?;
        let store = CatalogStore::new(
            self.layout.clone(),
            Box::new(source),
            Box::new(CommandExtractor),
        )
        .with_abis(abi)
        .offline(self.offline);

        let mut progress = renderer.start_progress("bundles", bundles.len() as u64);
        let results = store.ensure_all_fresh(&bundles);
        for result in &results {
            progress.inc();
            let snapshot = match result {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    progress.println(&render_status_line(
                        renderer.style(),
                        "warn",
                        &format!("skipping bundle: {err:#}"),
                    ));
                    continue;
                }
            };
            if snapshot.status == SyncStatus::Updated {
                progress.println(&render_status_line(
                    renderer.style(),
                    "ok",
                    &format!("bundle {} updated to {}", snapshot.bundle, snapshot.tag),
                ));
            }
            if let Some(warning) = &snapshot.warning {
                progress.println(&render_status_line(
                    renderer.style(),
                    "warn",
                    &format!(
                        "bundle {}: using cached {} ({warning})",
                        snapshot.bundle, snapshot.tag
                    ),
                ));
            }
        }
        progress.finish_success();

        CatalogIndex::build(&usable_snapshots(results)?)
    }
}

/// Snapshots of the bundles that synced or fell back to a cache. Errors only
/// when bundles were configured and none of them is usable.
pub(crate) fn usable_snapshots(
    results: Vec<Result<CatalogSnapshot>>,
) -> Result<Vec<CatalogSnapshot>> {
    let mut snapshots = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(err) => failures.push(err),
        }
    }
    if snapshots.is_empty() {
        if let Some(first) = failures.into_iter().next() {
            return Err(first.context("no configured bundle is usable"));
        }
    }
    Ok(snapshots)
}

fn github_token() -> Option<String> {
    std::env::var("GITHUB_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty())
}

pub(crate) fn parse_runtime_override(version: Option<&str>) -> Result<Option<DeviceRuntime>> {
    let Some(version) = version else {
        return Ok(None);
    };
    let runtime = DeviceRuntime::new(version.trim());
    if runtime.major().is_none() {
        bail!("invalid runtime version '{version}': expected something like 9.2.1");
    }
    Ok(Some(runtime))
}

fn device_abi(inventory: &DeviceInventory) -> Option<TargetAbi> {
    inventory
        .runtime
        .as_ref()
        .and_then(DeviceRuntime::target_abi)
}

/// Plan for `update`. Major updates need `--allow-major` or `--all`;
/// corrupt replacements need `--all`.
pub(crate) fn update_actions(
    inventory: &DeviceInventory,
    catalog: &CatalogIndex,
    targets: Option<&[String]>,
    all: bool,
    allow_major: bool,
) -> Vec<ResolutionAction> {
    let options = PlanOptions {
        unattended: true,
        allow_major: all || allow_major,
        prefer_source: false,
    };
    plan(inventory, catalog, targets, options)
        .into_iter()
        .map(|action| match action {
            ResolutionAction::Update {
                name,
                reason: UpdateReason::Corrupt,
                ..
            } if !all => ResolutionAction::Skip {
                name,
                reason: SkipReason::ConfirmationRequired,
            },
            other => other,
        })
        .collect()
}

/// Skips not worth a line in `update` output. Unknown modules are only
/// reported when the user named them.
fn is_quiet_skip(action: &ResolutionAction, explicit_targets: bool) -> bool {
    match action {
        ResolutionAction::Skip { reason, .. } => match reason {
            SkipReason::UpToDate | SkipReason::DeviceNewer => true,
            SkipReason::UnknownOrigin => !explicit_targets,
            _ => false,
        },
        _ => false,
    }
}

fn apply_actions(
    executor: &mut Executor,
    actions: &[ResolutionAction],
    catalog: &CatalogIndex,
    renderer: TerminalRenderer,
    label: &str,
) -> Result<()> {
    let pending = actions
        .iter()
        .filter(|action| !action.is_skip())
        .collect::<Vec<_>>();
    if pending.is_empty() {
        renderer.print_status("ok", "nothing to do");
        return Ok(());
    }

    let mut progress = renderer.start_progress(label, pending.len() as u64);
    let mut failures = 0_usize;
    for action in &pending {
        match executor.apply(action, catalog) {
            Ok(outcome) => progress.println(&format_outcome_line(&outcome, renderer.style())),
            Err(err) => {
                failures += 1;
                progress.println(&render_status_line(
                    renderer.style(),
                    "error",
                    &format!("{err:#}"),
                ));
            }
        }
        progress.inc();
    }
    progress.finish_success();

    if failures > 0 {
        bail!("{failures} of {} module(s) failed", pending.len());
    }
    Ok(())
}

pub(crate) fn write_requirements_file(path: &Path, text: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    fs::write(path, text).with_context(|| format!("failed writing {}", path.display()))
}

/// Names from a requirements file. Pins that differ from the catalog are
/// reported; the catalog version is what gets installed.
fn requirement_file_names(
    path: &Path,
    catalog: &CatalogIndex,
    renderer: TerminalRenderer,
) -> Result<Vec<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    let requirements = parse_requirements(&content);
    for requirement in &requirements {
        let (Some(pinned), Some(entry)) = (&requirement.version, catalog.get(&requirement.name))
        else {
            continue;
        };
        if let Some(available) = entry.version().filter(|available| available != pinned) {
            renderer.print_status(
                "warn",
                &format!(
                    "{} is pinned to {pinned}; the bundle provides {available}",
                    requirement.name
                ),
            );
        }
    }
    Ok(requirements
        .into_iter()
        .map(|requirement| requirement.name)
        .collect())
}

/// `code.py` on the device by default. A relative `--auto-file` is looked
/// up on the device first, then in the current directory.
pub(crate) fn auto_program_path(device: &DeviceLayout, auto_file: Option<&Path>) -> PathBuf {
    match auto_file {
        None => device.code_py_path(),
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => {
            let on_device = device.root().join(path);
            if on_device.is_file() {
                on_device
            } else {
                path.to_path_buf()
            }
        }
    }
}

pub(crate) fn merge_closures(mut left: Closure, right: Closure) -> Closure {
    for name in right.required {
        if !left.required.contains(&name) {
            left.required.push(name);
        }
    }
    left.unknown.extend(right.unknown);
    left.unknown.sort();
    left.unknown.dedup();
    left.unresolved.extend(right.unresolved);
    left
}

/// Examples whose slug equals `name` or lives under it, compared
/// case-insensitively.
pub(crate) fn select_examples(
    examples: &BTreeMap<String, PathBuf>,
    name: &str,
) -> Vec<(String, PathBuf)> {
    let wanted = name.trim().trim_end_matches(".py").to_ascii_lowercase();
    let prefix = format!("{}/", wanted.trim_end_matches('/'));
    examples
        .iter()
        .filter(|(slug, _)| {
            let slug = slug.to_ascii_lowercase();
            slug == wanted || slug.starts_with(&prefix)
        })
        .map(|(slug, path)| (slug.clone(), path.clone()))
        .collect()
}

fn modules_by_bundle(catalog: &CatalogIndex) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for entry in catalog.iter() {
        let bundle = entry.bundle.owner_repo();
        match grouped.iter_mut().find(|(name, _)| *name == bundle) {
            Some((_, names)) => names.push(entry.identity.name.clone()),
            None => grouped.push((bundle, vec![entry.identity.name.clone()])),
        }
    }
    grouped
}

fn add_bundle(
    store: &BundleStore,
    fetcher: Option<&HttpFetcher>,
    repo: &str,
) -> Result<String> {
    let bundle = Bundle::parse(repo)?;
    if let Some(fetcher) = fetcher {
        let tag = fetcher
            .latest_tag(&bundle)
            .with_context(|| format!("bundle {bundle} has no published release"))?;
        debug!(bundle = %bundle, tag = %tag, "verified bundle release");
    }
    let record = store.add_bundle(repo)?;
    Ok(format!(
        "added bundle {} (priority {})",
        record.repo, record.priority
    ))
}
