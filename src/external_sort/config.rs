use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{BYTES_PER_KB, BYTES_PER_MB};
use crate::error::GroupSortError;
use crate::external_sort::constants::*;

/// How much input one chunk may hold before it is sorted and spilled to a run.
///
/// Under `Bytes` every buffered line costs its length plus
/// [`LINE_OVERHEAD_BYTES`]. A chunk is flushed before a line that would push it
/// over the budget, so only a single line larger than the whole budget can
/// produce a chunk above it. `MemoryPercent` is a share of total system memory,
/// resolved to a byte budget once when the sorter is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkBudget {
    Lines(usize),
    Bytes(usize),
    MemoryPercent(f64),
}

impl Default for ChunkBudget {
    fn default() -> Self {
        ChunkBudget::Lines(DEFAULT_CHUNK_LINES)
    }
}

/// A [`ChunkBudget`] with system memory already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLimit {
    Lines(usize),
    Bytes(usize),
}

impl ChunkLimit {
    /// True when a chunk holding `lines` lines and `bytes` bytes cannot take
    /// another line of `next_bytes`.
    pub fn is_full(&self, lines: usize, bytes: usize, next_bytes: usize) -> bool {
        if lines == 0 {
            return false;
        }
        match *self {
            ChunkLimit::Lines(max) => lines >= max,
            ChunkLimit::Bytes(max) => bytes + next_bytes > max,
        }
    }
}

impl ChunkBudget {
    pub fn validate(&self) -> std::result::Result<(), GroupSortError> {
        match *self {
            ChunkBudget::Lines(n) if n < MIN_CHUNK_LINES => Err(GroupSortError::config(format!(
                "Chunk line budget must be at least {}",
                MIN_CHUNK_LINES
            ))),
            ChunkBudget::Bytes(n) if n < MIN_CHUNK_BYTES => Err(GroupSortError::config(format!(
                "Chunk byte budget must be at least {}",
                MIN_CHUNK_BYTES
            ))),
            ChunkBudget::MemoryPercent(p)
                if !(MIN_MEMORY_USAGE_PERCENT..=MAX_MEMORY_USAGE_PERCENT).contains(&p) =>
            {
                Err(GroupSortError::config(format!(
                    "Memory usage percent must be between {} and {}",
                    MIN_MEMORY_USAGE_PERCENT, MAX_MEMORY_USAGE_PERCENT
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn resolve(&self) -> ChunkLimit {
        match *self {
            ChunkBudget::Lines(n) => ChunkLimit::Lines(n),
            ChunkBudget::Bytes(n) => ChunkLimit::Bytes(n),
            ChunkBudget::MemoryPercent(p) => {
                ChunkLimit::Bytes(memory_limit_bytes(p).max(MIN_CHUNK_BYTES))
            }
        }
    }
}

pub fn memory_limit_bytes(percent: f64) -> usize {
    use sysinfo::System;
    let mut system = System::new();
    system.refresh_memory();

    let total_memory = system.total_memory() as f64;
    (total_memory * percent / 100.0) as usize
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    pub chunk_budget: ChunkBudget,
    pub max_merge_fan_in: usize,
    pub io_buffer_size_kb: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            chunk_budget: ChunkBudget::default(),
            max_merge_fan_in: DEFAULT_MAX_MERGE_FAN_IN,
            io_buffer_size_kb: DEFAULT_IO_BUFFER_SIZE_KB,
        }
    }
}

impl SortConfig {
    pub fn with_chunk_budget(mut self, chunk_budget: ChunkBudget) -> Self {
        self.chunk_budget = chunk_budget;
        self
    }

    pub fn with_max_merge_fan_in(mut self, max_merge_fan_in: usize) -> Self {
        self.max_merge_fan_in = max_merge_fan_in;
        self
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sort config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), GroupSortError> {
        self.chunk_budget.validate()?;

        if self.max_merge_fan_in < MIN_MERGE_FAN_IN || self.max_merge_fan_in > MAX_MERGE_FAN_IN {
            return Err(GroupSortError::config(format!(
                "Merge fan-in must be between {} and {}",
                MIN_MERGE_FAN_IN, MAX_MERGE_FAN_IN
            )));
        }

        if self.io_buffer_size_kb < MIN_IO_BUFFER_SIZE_KB
            || self.io_buffer_size_kb > MAX_IO_BUFFER_SIZE_KB
        {
            return Err(GroupSortError::config(format!(
                "IO buffer size must be between {} and {} KB",
                MIN_IO_BUFFER_SIZE_KB, MAX_IO_BUFFER_SIZE_KB
            )));
        }

        Ok(())
    }

    pub fn io_buffer_size_bytes(&self) -> usize {
        self.io_buffer_size_kb * BYTES_PER_KB
    }

    pub fn output_buffer_size_bytes(&self) -> usize {
        (OUTPUT_BUFFER_SIZE_KB * BYTES_PER_KB).min(self.io_buffer_size_bytes() * 8)
    }

    pub fn describe_budget(&self) -> String {
        match self.chunk_budget.resolve() {
            ChunkLimit::Lines(n) => format!("{} lines", n),
            ChunkLimit::Bytes(n) => format!("{:.1} MB", n as f64 / BYTES_PER_MB as f64),
        }
    }
}
