// Record <-> delimited line conversion
pub mod codec;

// Disk-backed k-way merge sort over lines
pub mod external_sort;

// Partition, per-group sort and replay
pub mod grouping;

pub mod constants;
pub mod error;
pub mod logging;
pub mod shutdown;

// Re-export main types for convenience
pub use codec::{FieldOrder, LineCodec, LineRecord, RecordSource};
pub use error::{GroupSortError, Phase, Result};
pub use external_sort::{ChunkBudget, ExternalSorter, SortConfig, SortStats};
pub use grouping::{GroupKeyed, GroupRecords, GroupSortConfig, GroupSortStats, GroupedSort};
pub use shutdown::ShutdownSignal;
