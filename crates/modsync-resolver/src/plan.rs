use std::cmp::Ordering;

use modsync_catalog::{CatalogEntry, CatalogIndex};
use modsync_core::{
    compare_versions, is_major_change, DeviceInventory, DeviceModuleRecord, TargetAbi,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// No one is around to confirm; gated updates are skipped.
    pub unattended: bool,
    /// Lets major and corrupt updates through even when unattended.
    pub allow_major: bool,
    pub prefer_source: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChosenFormat {
    Source,
    Precompiled(TargetAbi),
}

impl ChosenFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "py",
            Self::Precompiled(_) => "mpy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    Outdated,
    FormatMismatch,
    Corrupt,
}

impl UpdateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outdated => "outdated",
            Self::FormatMismatch => "format-mismatch",
            Self::Corrupt => "corrupt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnknownOrigin,
    NeedsReview,
    UpToDate,
    DeviceNewer,
    ConfirmationRequired,
    NotInstalled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownOrigin => "unknown-origin",
            Self::NeedsReview => "needs-review",
            Self::UpToDate => "up-to-date",
            Self::DeviceNewer => "device-newer",
            Self::ConfirmationRequired => "confirmation-required",
            Self::NotInstalled => "not-installed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionAction {
    Install {
        name: String,
        format: ChosenFormat,
    },
    Update {
        name: String,
        format: ChosenFormat,
        from: Option<String>,
        to: Option<String>,
        major: bool,
        reason: UpdateReason,
    },
    Uninstall {
        name: String,
    },
    Skip {
        name: String,
        reason: SkipReason,
    },
}

impl ResolutionAction {
    pub fn name(&self) -> &str {
        match self {
            Self::Install { name, .. }
            | Self::Update { name, .. }
            | Self::Uninstall { name }
            | Self::Skip { name, .. } => name,
        }
    }

    /// Major and corrupt updates wait for someone to say yes.
    pub fn needs_confirmation(&self) -> bool {
        match self {
            Self::Update { major, reason, .. } => *major || *reason == UpdateReason::Corrupt,
            _ => false,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }
}

/// Reconciles the device against the catalog. `targets = None` covers
/// every installed module. Output order: catalog order first, then the
/// remaining names sorted.
pub fn plan(
    inventory: &DeviceInventory,
    catalog: &CatalogIndex,
    targets: Option<&[String]>,
    options: PlanOptions,
) -> Vec<ResolutionAction> {
    let mut names = match targets {
        Some(targets) => targets
            .iter()
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>(),
        None => inventory.modules.keys().cloned().collect(),
    };
    names.sort_by(|left, right| compare_scope_order(catalog, left, right));
    names.dedup();

    names
        .into_iter()
        .map(|name| plan_one(inventory, catalog, name, options))
        .collect()
}

fn compare_scope_order(catalog: &CatalogIndex, left: &str, right: &str) -> Ordering {
    match (catalog.position(left), catalog.position(right)) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

fn plan_one(
    inventory: &DeviceInventory,
    catalog: &CatalogIndex,
    name: String,
    options: PlanOptions,
) -> ResolutionAction {
    let Some(entry) = catalog.get(&name) else {
        return ResolutionAction::Skip {
            name,
            reason: SkipReason::UnknownOrigin,
        };
    };
    let device_abi = inventory.runtime.as_ref().and_then(|runtime| runtime.target_abi());

    let Some(record) = inventory.get(&name) else {
        return ResolutionAction::Install {
            format: choose_format(entry, None, device_abi, options),
            name,
        };
    };

    let format = choose_format(entry, Some(record), device_abi, options);
    let from = record.identity.version.clone();
    let to = entry.version().map(str::to_string);

    if record.corrupt {
        return gate(
            ResolutionAction::Update {
                name,
                format,
                from,
                to,
                major: false,
                reason: UpdateReason::Corrupt,
            },
            options,
        );
    }

    if let (Some(header), Some(major)) = (
        record.identity.format.precompiled_header(),
        inventory.runtime_major(),
    ) {
        if !header.compat_window().accepts(major) {
            return ResolutionAction::Update {
                name,
                format,
                from,
                to,
                major: false,
                reason: UpdateReason::FormatMismatch,
            };
        }
    }

    let (Some(device_version), Some(catalog_version)) = (from.as_deref(), to.as_deref()) else {
        return ResolutionAction::Skip {
            name,
            reason: SkipReason::NeedsReview,
        };
    };

    match compare_versions(catalog_version, device_version) {
        Ordering::Greater => {
            let major = is_major_change(device_version, catalog_version);
            gate(
                ResolutionAction::Update {
                    name,
                    format,
                    from,
                    to,
                    major,
                    reason: UpdateReason::Outdated,
                },
                options,
            )
        }
        Ordering::Equal => ResolutionAction::Skip {
            name,
            reason: SkipReason::UpToDate,
        },
        Ordering::Less => ResolutionAction::Skip {
            name,
            reason: SkipReason::DeviceNewer,
        },
    }
}

fn gate(action: ResolutionAction, options: PlanOptions) -> ResolutionAction {
    if action.needs_confirmation() && options.unattended && !options.allow_major {
        return ResolutionAction::Skip {
            name: action.name().to_string(),
            reason: SkipReason::ConfirmationRequired,
        };
    }
    action
}

/// Source when asked for, when the device copy being replaced is source,
/// when the runtime is unknown or when no compiled variant matches it.
pub fn choose_format(
    entry: &CatalogEntry,
    device: Option<&DeviceModuleRecord>,
    device_abi: Option<TargetAbi>,
    options: PlanOptions,
) -> ChosenFormat {
    if options.prefer_source {
        return ChosenFormat::Source;
    }
    if device.is_some_and(|record| record.identity.format.is_source()) {
        return ChosenFormat::Source;
    }
    match device_abi {
        Some(abi) if entry.variant_for(abi).is_some() => ChosenFormat::Precompiled(abi),
        _ => ChosenFormat::Source,
    }
}

/// `Uninstall` for installed names, `Skip(not-installed)` for the rest,
/// in the order given.
pub fn plan_removal(inventory: &DeviceInventory, names: &[String]) -> Vec<ResolutionAction> {
    let mut seen = std::collections::HashSet::new();
    names
        .iter()
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .map(|name| {
            if inventory.contains(&name) {
                ResolutionAction::Uninstall { name }
            } else {
                ResolutionAction::Skip {
                    name,
                    reason: SkipReason::NotInstalled,
                }
            }
        })
        .collect()
}
