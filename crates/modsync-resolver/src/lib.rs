mod closure;
mod imports;
mod names;
mod plan;

pub use closure::{closure, closure_from_names, Closure, ModuleLookup};
pub use imports::{scan_imports, ImportScan};
pub use names::{canonicalize_requirement_name, is_platform_builtin, HOST_ONLY_PACKAGES};
pub use plan::{
    choose_format, plan, plan_removal, ChosenFormat, PlanOptions, ResolutionAction, SkipReason,
    UpdateReason,
};

#[cfg(test)]
mod tests;
