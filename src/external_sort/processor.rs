use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

use crate::codec::LineReader;
use crate::error::{GroupSortError, Phase, Result};
use crate::external_sort::chunk::ChunkProcessor;
use crate::external_sort::comparator::LineComparator;
use crate::external_sort::config::{ChunkLimit, SortConfig};
use crate::external_sort::constants::{RUN_FILE_EXTENSION, RUN_FILE_PREFIX, STAGING_FILE_NAME};
use crate::external_sort::merger::ChunkMerger;
use crate::external_sort::SortStats;
use crate::shutdown::ShutdownSignal;

/// Disk-backed sorter for line streams of any size.
///
/// Resident memory is bounded by the chunk budget: input is cut into sorted runs
/// in `work_dir`, and the runs are merged into the output file. Run files are
/// removed as they are consumed, and on failure.
pub struct ExternalSorter {
    config: SortConfig,
    limit: ChunkLimit,
    shutdown: ShutdownSignal,
}

impl ExternalSorter {
    pub fn new(config: SortConfig) -> Result<Self> {
        config.validate()?;
        let limit = config.chunk_budget.resolve();

        Ok(Self {
            config,
            limit,
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn with_shutdown_signal(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    pub fn chunk_limit(&self) -> ChunkLimit {
        self.limit
    }

    /// Sort `lines` with `comparator` into `output_file`.
    ///
    /// The output only appears once the sort has succeeded. On failure the run
    /// files are removed, `output_file` is left untouched, and `work_dir` is
    /// removed too if this call created it.
    pub fn sort<I, C>(
        &self,
        lines: I,
        comparator: &C,
        work_dir: &Path,
        output_file: &Path,
    ) -> Result<SortStats>
    where
        I: IntoIterator<Item = Result<String>>,
        C: LineComparator + ?Sized,
    {
        let created_work_dir = !work_dir.exists();
        std::fs::create_dir_all(work_dir)
            .map_err(|e| GroupSortError::io(Phase::Sort, work_dir, e))?;

        let started = Instant::now();
        let staging_file = work_dir.join(STAGING_FILE_NAME);
        let mut stats = SortStats::default();
        let result = self
            .run_phases(lines, comparator, work_dir, &staging_file, &mut stats)
            .and_then(|()| publish(&staging_file, output_file));

        if let Err(e) = result {
            discard(work_dir, &staging_file, created_work_dir);
            return Err(e);
        }

        stats.processing_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            "Sorted {} lines through {} runs and {} merge levels in {} ms",
            stats.lines_sorted, stats.runs_created, stats.merge_levels, stats.processing_time_ms
        );
        Ok(stats)
    }

    /// Sort the logical lines of a comma-delimited `input_file` into `output_file`.
    pub fn sort_file<C>(
        &self,
        input_file: &Path,
        comparator: &C,
        work_dir: &Path,
        output_file: &Path,
    ) -> Result<SortStats>
    where
        C: LineComparator + ?Sized,
    {
        let buffer_size = self.config.io_buffer_size_bytes();
        let reader = LineReader::open(input_file, buffer_size, Phase::Sort)?;
        self.sort(reader, comparator, work_dir, output_file)
    }

    fn run_phases<I, C>(
        &self,
        lines: I,
        comparator: &C,
        work_dir: &Path,
        output_file: &Path,
        stats: &mut SortStats,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Result<String>>,
        C: LineComparator + ?Sized,
    {
        let mut chunk_processor = ChunkProcessor::new(
            self.limit,
            self.config.io_buffer_size_bytes(),
            work_dir.to_path_buf(),
        );
        let runs = chunk_processor.process_lines_to_runs(lines, comparator, &self.shutdown, stats)?;

        let merger = ChunkMerger::new(
            self.config.io_buffer_size_bytes(),
            self.config.output_buffer_size_bytes(),
            self.config.max_merge_fan_in,
            work_dir.to_path_buf(),
        );
        merger.merge_runs(runs, comparator, output_file, &self.shutdown, stats)
    }
}

/// Move the finished output into place.
fn publish(staging_file: &Path, output_file: &Path) -> Result<()> {
    if std::fs::rename(staging_file, output_file).is_ok() {
        return Ok(());
    }

    // Rename fails across filesystems.
    std::fs::copy(staging_file, output_file)
        .map_err(|e| GroupSortError::io(Phase::Sort, output_file, e))?;
    remove_if_present(staging_file);
    Ok(())
}

fn discard(work_dir: &Path, staging_file: &Path, created_work_dir: bool) {
    cleanup_run_files(work_dir);
    remove_if_present(staging_file);
    if created_work_dir {
        if let Err(e) = std::fs::remove_dir_all(work_dir) {
            warn!("Failed to remove work directory {}: {}", work_dir.display(), e);
        }
    }
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Remove leftover run files from `work_dir`, logging instead of failing.
pub fn cleanup_run_files(work_dir: &Path) {
    let entries = match std::fs::read_dir(work_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {} for cleanup: {}", work_dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path: PathBuf = entry.path();
        let is_run = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(RUN_FILE_PREFIX) && n.ends_with(RUN_FILE_EXTENSION))
            .unwrap_or(false);
        if is_run {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove run {}: {}", path.display(), e);
            }
        }
    }
}
