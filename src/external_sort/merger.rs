use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

use crate::constants::SHUTDOWN_CHECK_INTERVAL_RECORDS;
use crate::error::{GroupSortError, Phase, Result};
use crate::external_sort::chunk::{
    run_file_path, write_line, write_run_line, RunMetadata, RunReader,
};
use crate::external_sort::comparator::LineComparator;
use crate::external_sort::SortStats;
use crate::shutdown::ShutdownSignal;

/// How a merge writes its output: as another run, or as the final plain lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Run,
    Plain,
}

#[derive(Debug)]
struct MergeEntry {
    line: String,
    run_index: usize,
}

/// Binary min-heap over the current head line of each run.
///
/// `BinaryHeap` needs an infallible `Ord`, so the sift operations are written out
/// here to let a failing comparison abort the merge. Equal lines come out in run
/// order, which keeps the merge stable.
struct MergeQueue<'c, C: ?Sized> {
    entries: Vec<MergeEntry>,
    comparator: &'c C,
}

impl<'c, C: LineComparator + ?Sized> MergeQueue<'c, C> {
    fn with_capacity(capacity: usize, comparator: &'c C) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            comparator,
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn less(&self, a: usize, b: usize) -> Result<bool> {
        let (a, b) = (&self.entries[a], &self.entries[b]);
        let ordering = self
            .comparator
            .compare(&a.line, &b.line)?
            .then(a.run_index.cmp(&b.run_index));
        Ok(ordering == Ordering::Less)
    }

    fn push(&mut self, entry: MergeEntry) -> Result<()> {
        self.entries.push(entry);
        let mut child = self.entries.len() - 1;
        while child > 0 {
            let parent = (child - 1) / 2;
            if !self.less(child, parent)? {
                break;
            }
            self.entries.swap(child, parent);
            child = parent;
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Option<MergeEntry>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let top = self.entries.pop();

        let len = self.entries.len();
        let mut parent = 0;
        loop {
            let left = 2 * parent + 1;
            let right = left + 1;
            let mut smallest = parent;
            if left < len && self.less(left, smallest)? {
                smallest = left;
            }
            if right < len && self.less(right, smallest)? {
                smallest = right;
            }
            if smallest == parent {
                break;
            }
            self.entries.swap(parent, smallest);
            parent = smallest;
        }

        Ok(top)
    }
}

/// k-way merge of sorted runs, in levels when there are more runs than the
/// fan-in allows open at once.
pub struct ChunkMerger {
    io_buffer_size: usize,
    output_buffer_size: usize,
    max_fan_in: usize,
    work_dir: PathBuf,
}

impl ChunkMerger {
    pub fn new(
        io_buffer_size: usize,
        output_buffer_size: usize,
        max_fan_in: usize,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            io_buffer_size,
            output_buffer_size,
            max_fan_in,
            work_dir,
        }
    }

    /// Merge `runs` into `output_file`, consuming (deleting) every run.
    pub fn merge_runs<C>(
        &self,
        runs: Vec<RunMetadata>,
        comparator: &C,
        output_file: &Path,
        shutdown: &ShutdownSignal,
        stats: &mut SortStats,
    ) -> Result<()>
    where
        C: LineComparator + ?Sized,
    {
        let started = Instant::now();
        let mut current = runs;
        let mut level = 0;

        while current.len() > self.max_fan_in {
            level += 1;
            let mut next_level = Vec::with_capacity(current.len() / self.max_fan_in + 1);

            for (batch_index, batch) in current.chunks(self.max_fan_in).enumerate() {
                shutdown.check(Phase::Sort)?;

                if let [single] = batch {
                    next_level.push(single.clone());
                    continue;
                }

                let file_path = run_file_path(&self.work_dir, level, batch_index);
                let line_count =
                    self.merge_batch(batch, comparator, &file_path, Framing::Run, shutdown)?;
                self.cleanup_runs(batch);
                next_level.push(RunMetadata {
                    run_id: batch_index,
                    level,
                    file_path,
                    line_count,
                });
            }

            debug!(
                "Merge level {} reduced {} runs to {}",
                level,
                current.len(),
                next_level.len()
            );
            stats.merge_levels += 1;
            current = next_level;
        }

        shutdown.check(Phase::Sort)?;
        if current.is_empty() {
            File::create(output_file)
                .map_err(|e| GroupSortError::io(Phase::Sort, output_file, e))?;
        } else {
            // A lone run still goes through the merge to drop its run framing.
            self.merge_batch(&current, comparator, output_file, Framing::Plain, shutdown)?;
            self.cleanup_runs(&current);
            if current.len() > 1 {
                stats.merge_levels += 1;
            }
        }

        stats.merge_time_ms += started.elapsed().as_millis() as u64;
        Ok(())
    }

    fn merge_batch<C>(
        &self,
        runs: &[RunMetadata],
        comparator: &C,
        output_file: &Path,
        framing: Framing,
        shutdown: &ShutdownSignal,
    ) -> Result<usize>
    where
        C: LineComparator + ?Sized,
    {
        let mut readers = Vec::with_capacity(runs.len());
        for run in runs {
            readers.push(RunReader::open(&run.file_path, self.io_buffer_size)?);
        }

        let output =
            File::create(output_file).map_err(|e| GroupSortError::io(Phase::Sort, output_file, e))?;
        let mut writer = BufWriter::with_capacity(self.output_buffer_size, output);

        let mut queue = MergeQueue::with_capacity(readers.len(), comparator);
        for (run_index, reader) in readers.iter_mut().enumerate() {
            if let Some(line) = reader.next_line()? {
                queue.push(MergeEntry { line, run_index })?;
            }
        }

        let mut lines_written = 0;
        while let Some(entry) = queue.pop()? {
            let written = match framing {
                Framing::Run => write_run_line(&mut writer, &entry.line),
                Framing::Plain => write_line(&mut writer, &entry.line),
            };
            written.map_err(|e| GroupSortError::io(Phase::Sort, output_file, e))?;
            lines_written += 1;

            if lines_written % SHUTDOWN_CHECK_INTERVAL_RECORDS == 0 {
                shutdown.check(Phase::Sort)?;
            }

            if let Some(line) = readers[entry.run_index].next_line()? {
                queue.push(MergeEntry {
                    line,
                    run_index: entry.run_index,
                })?;
            }
        }
        debug_assert!(queue.is_empty());

        writer
            .flush()
            .map_err(|e| GroupSortError::io(Phase::Sort, output_file, e))?;

        debug!(
            "Merged {} runs ({} lines) into {}",
            runs.len(),
            lines_written,
            output_file.display()
        );
        Ok(lines_written)
    }

    fn cleanup_runs(&self, runs: &[RunMetadata]) {
        for run in runs {
            if let Err(e) = std::fs::remove_file(&run.file_path) {
                warn!("Failed to remove run {}: {}", run.file_path.display(), e);
            }
        }
    }
}
