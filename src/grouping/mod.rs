//! Group-then-sort pipeline over record streams that do not fit in memory.
//!
//! Records are partitioned into one file per group key, each file is sorted by
//! the external sorter, and the sorted groups are replayed to a callback one at
//! a time. All intermediate files live in a [`TempWorkspace`] that is removed
//! when the run ends, successfully or not.

pub mod config;
pub mod constants;
pub mod orchestrator;
pub mod partitioner;
pub mod workspace;


pub use config::GroupSortConfig;
pub use orchestrator::{GroupRecords, GroupSortStats, GroupedSort, PipelineState};
pub use partitioner::{GroupFile, GroupPartitioner, Partition};
pub use workspace::TempWorkspace;

use constants::{MAX_SANITIZED_KEY_LENGTH, SANITIZE_REPLACEMENT};

/// Record types that know their own group key.
///
/// `None` or an empty key is rejected by the partitioner.
pub trait GroupKeyed {
    fn group_key(&self) -> Option<String>;
}

/// File-name-safe form of a group key: ASCII alphanumerics are kept, everything
/// else becomes `_`, and the result is capped in length.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .take(MAX_SANITIZED_KEY_LENGTH)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { SANITIZE_REPLACEMENT })
        .collect()
}
