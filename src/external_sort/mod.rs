pub mod chunk;
pub mod comparator;
pub mod config;
pub mod constants;
pub mod merger;
pub mod processor;


pub use chunk::RunMetadata;
pub use comparator::{try_sort_by, LineComparator, TextOrder};
pub use config::{ChunkBudget, ChunkLimit, SortConfig};
pub use processor::ExternalSorter;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortStats {
    pub lines_sorted: usize,
    pub runs_created: usize,
    pub merge_levels: usize,
    pub peak_chunk_lines: usize,
    pub peak_chunk_bytes: usize,
    pub chunk_time_ms: u64,
    pub merge_time_ms: u64,
    pub processing_time_ms: u64,
}

impl SortStats {
    /// Fold the stats of another sort into this one. Peaks take the maximum.
    pub fn accumulate(&mut self, other: &SortStats) {
        self.lines_sorted += other.lines_sorted;
        self.runs_created += other.runs_created;
        self.merge_levels += other.merge_levels;
        self.peak_chunk_lines = self.peak_chunk_lines.max(other.peak_chunk_lines);
        self.peak_chunk_bytes = self.peak_chunk_bytes.max(other.peak_chunk_bytes);
        self.chunk_time_ms += other.chunk_time_ms;
        self.merge_time_ms += other.merge_time_ms;
        self.processing_time_ms += other.processing_time_ms;
    }
}

pub fn sort_file(
    input_file: &Path,
    output_file: &Path,
    work_dir: &Path,
    config: SortConfig,
) -> Result<SortStats> {
    let sorter = ExternalSorter::new(config)?;
    sorter.sort_file(input_file, &TextOrder, work_dir, output_file)
}
