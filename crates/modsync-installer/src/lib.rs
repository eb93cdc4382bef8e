mod executor;
mod fs_utils;
mod inventory;
mod layout;

pub use executor::{ActionOutcome, Executor};
pub use inventory::{read_runtime, scan};
pub use layout::DeviceLayout;
