mod bundle_store;
mod bundle_types;
mod fetch;
mod fs_ops;
mod index;
mod layout;
mod snapshot_state;
mod sync;

pub use bundle_store::{default_bundle_records, BundleStore, DEFAULT_BUNDLES, USER_BUNDLE_PRIORITY};
pub use bundle_types::{Bundle, BundleRecord, CatalogSnapshot, SyncStatus};
pub use fetch::{
    tag_from_release_location, ArchiveExtractor, CommandExtractor, HttpFetcher, ReleaseSource,
    DEFAULT_TIMEOUT_SECS,
};
pub use fs_ops::{list_module_entries, sha256_hex};
pub use index::{CatalogEntry, CatalogIndex};
pub use layout::{default_state_root, ModsyncLayout};
pub use snapshot_state::{
    read_cached_tag, read_snapshot_state, BundleSnapshotState, SnapshotRecord, NO_CACHED_TAG,
};
pub use sync::CatalogStore;
