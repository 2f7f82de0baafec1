use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_DELIMITER, LINE_TERMINATOR, QUOTE_CHAR, SUPPORTED_ENCODING};
use crate::error::GroupSortError;
use crate::external_sort::{ChunkBudget, SortConfig};
use crate::grouping::constants::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSortConfig {
    pub sort: SortConfig,
    pub temp_root: PathBuf,
    pub encoding: String,
    pub delimiter: char,
    pub max_open_writers: usize,
}

impl Default for GroupSortConfig {
    fn default() -> Self {
        Self {
            sort: SortConfig::default(),
            temp_root: std::env::temp_dir(),
            encoding: SUPPORTED_ENCODING.to_string(),
            delimiter: DEFAULT_DELIMITER,
            max_open_writers: DEFAULT_MAX_OPEN_WRITERS,
        }
    }
}

impl GroupSortConfig {
    pub fn with_chunk_budget(mut self, chunk_budget: ChunkBudget) -> Self {
        self.sort.chunk_budget = chunk_budget;
        self
    }

    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), GroupSortError> {
        self.sort.validate()?;

        // Temporary files are written and compared as UTF-8 text.
        let encoding = self.encoding.to_ascii_lowercase();
        if encoding != SUPPORTED_ENCODING && encoding != "utf8" {
            return Err(GroupSortError::config(format!(
                "Unsupported encoding '{}': temporary files are {}",
                self.encoding, SUPPORTED_ENCODING
            )));
        }

        if self.delimiter == QUOTE_CHAR
            || self.delimiter == LINE_TERMINATOR
            || self.delimiter == '\r'
        {
            return Err(GroupSortError::config(format!(
                "Delimiter {:?} collides with quoting or line breaks",
                self.delimiter
            )));
        }

        if !(MIN_MAX_OPEN_WRITERS..=MAX_MAX_OPEN_WRITERS).contains(&self.max_open_writers) {
            return Err(GroupSortError::config(format!(
                "Open writer limit must be between {} and {}",
                MIN_MAX_OPEN_WRITERS, MAX_MAX_OPEN_WRITERS
            )));
        }

        Ok(())
    }
}
