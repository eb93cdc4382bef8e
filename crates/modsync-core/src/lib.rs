mod abi;
mod device;
mod error;
mod identity;
mod mpy;
mod requirements;
mod source_meta;
mod version;

pub use abi::{DeviceRuntime, TargetAbi, SOURCE_PLATFORM_DIR};
pub use device::{DeviceInventory, DeviceModuleRecord};
pub use error::SyncError;
pub use identity::{
    extract, is_hidden, is_module_file, module_name_from_path, package_files, ArtifactFormat,
    ArtifactKind, Extraction, ModuleIdentity,
};
pub use mpy::{parse_header, scan_precompiled, CompatWindow, PrecompiledHeader, PrecompiledMeta};
pub use requirements::{format_requirements, parse_requirements, Requirement};
pub use source_meta::{scan_source, SourceMeta};
pub use version::{compare_versions, is_major_change, VersionToken, VersionTokens};

#[cfg(test)]
mod tests;
