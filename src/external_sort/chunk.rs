use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

use crate::constants::{LINE_TERMINATOR, SHUTDOWN_CHECK_INTERVAL_RECORDS};
use crate::error::{GroupSortError, Phase, Result};
use crate::external_sort::comparator::{try_sort_by, LineComparator};
use crate::external_sort::config::ChunkLimit;
use crate::external_sort::constants::*;
use crate::external_sort::SortStats;
use crate::shutdown::ShutdownSignal;

/// A sorted file on disk, either a spilled chunk (level 0) or a merge output.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub run_id: usize,
    pub level: usize,
    pub file_path: PathBuf,
    pub line_count: usize,
}

pub fn run_file_path(work_dir: &Path, level: usize, run_id: usize) -> PathBuf {
    work_dir.join(format!(
        "{}L{}_{:06}{}",
        RUN_FILE_PREFIX, level, run_id, RUN_FILE_EXTENSION
    ))
}

/// Write `line` followed by the line terminator, as is.
pub fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    write!(writer, "{}", LINE_TERMINATOR)
}

/// Write one run record on a single physical line.
///
/// Run files hold arbitrary text, so a backslash and a line break inside the
/// record are escaped; [`RunReader`] reverses this.
pub fn write_run_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    if !line.contains(|c: char| c == RUN_ESCAPE || c == LINE_TERMINATOR) {
        return write_line(writer, line);
    }

    let mut escaped = String::with_capacity(line.len() + 8);
    for ch in line.chars() {
        match ch {
            RUN_ESCAPE => {
                escaped.push(RUN_ESCAPE);
                escaped.push(RUN_ESCAPE);
            }
            LINE_TERMINATOR => {
                escaped.push(RUN_ESCAPE);
                escaped.push(RUN_ESCAPED_TERMINATOR);
            }
            other => escaped.push(other),
        }
    }
    write_line(writer, &escaped)
}

/// Write lines to a fresh run file, one record per physical line.
pub fn write_lines<'a, I>(path: &Path, lines: I, buffer_size: usize) -> Result<usize>
where
    I: IntoIterator<Item = &'a String>,
{
    let file = File::create(path).map_err(|e| GroupSortError::io(Phase::Sort, path, e))?;
    let mut writer = BufWriter::with_capacity(buffer_size, file);
    let mut written = 0;

    for line in lines {
        write_run_line(&mut writer, line).map_err(|e| GroupSortError::io(Phase::Sort, path, e))?;
        written += 1;
    }

    writer
        .flush()
        .map_err(|e| GroupSortError::io(Phase::Sort, path, e))?;
    Ok(written)
}

/// Reads back the records of a run file written with [`write_run_line`].
pub struct RunReader {
    reader: BufReader<File>,
    path: PathBuf,
    buffer: String,
}

impl RunReader {
    pub fn open(path: &Path, buffer_size: usize) -> Result<Self> {
        let file = File::open(path).map_err(|e| GroupSortError::io(Phase::Sort, path, e))?;
        Ok(Self {
            reader: BufReader::with_capacity(buffer_size, file),
            path: path.to_path_buf(),
            buffer: String::new(),
        })
    }

    pub fn next_line(&mut self) -> Result<Option<String>> {
        self.buffer.clear();
        let read = self
            .reader
            .read_line(&mut self.buffer)
            .map_err(|e| GroupSortError::io(Phase::Sort, &self.path, e))?;
        if read == 0 {
            return Ok(None);
        }
        if self.buffer.ends_with(LINE_TERMINATOR) {
            self.buffer.pop();
        }
        if !self.buffer.contains(RUN_ESCAPE) {
            return Ok(Some(std::mem::take(&mut self.buffer)));
        }
        self.unescape().map(Some)
    }

    fn unescape(&self) -> Result<String> {
        let mut line = String::with_capacity(self.buffer.len());
        let mut chars = self.buffer.chars();
        while let Some(ch) = chars.next() {
            if ch != RUN_ESCAPE {
                line.push(ch);
                continue;
            }
            match chars.next() {
                Some(RUN_ESCAPE) => line.push(RUN_ESCAPE),
                Some(RUN_ESCAPED_TERMINATOR) => line.push(LINE_TERMINATOR),
                other => {
                    let message = format!("invalid escape {:?} in run file", other);
                    return Err(GroupSortError::io(
                        Phase::Sort,
                        &self.path,
                        io::Error::new(io::ErrorKind::InvalidData, message),
                    ));
                }
            }
        }
        Ok(line)
    }
}

/// Chunking pass: buffers input lines up to the chunk limit, sorts each full
/// buffer and spills it to a level-0 run.
pub struct ChunkProcessor {
    limit: ChunkLimit,
    io_buffer_size: usize,
    work_dir: PathBuf,
    next_run_id: usize,
}

impl ChunkProcessor {
    pub fn new(limit: ChunkLimit, io_buffer_size: usize, work_dir: PathBuf) -> Self {
        Self {
            limit,
            io_buffer_size,
            work_dir,
            next_run_id: 0,
        }
    }

    pub fn process_lines_to_runs<I, C>(
        &mut self,
        lines: I,
        comparator: &C,
        shutdown: &ShutdownSignal,
        stats: &mut SortStats,
    ) -> Result<Vec<RunMetadata>>
    where
        I: IntoIterator<Item = Result<String>>,
        C: LineComparator + ?Sized,
    {
        let started = Instant::now();
        let mut runs = Vec::new();
        let mut current_chunk: Vec<String> = Vec::new();
        let mut current_size = 0;
        let mut line_count = 0;

        for line in lines {
            let line = line?;
            line_count += 1;

            if line_count % SHUTDOWN_CHECK_INTERVAL_RECORDS == 0 {
                shutdown.check(Phase::Sort)?;
            }

            let line_size = line.len() + LINE_OVERHEAD_BYTES;
            if self
                .limit
                .is_full(current_chunk.len(), current_size, line_size)
            {
                shutdown.check(Phase::Sort)?;
                let full_chunk = std::mem::take(&mut current_chunk);
                let run = self.sort_and_write_chunk(full_chunk, comparator)?;
                runs.push(run);
                current_size = 0;
            }

            current_chunk.push(line);
            current_size += line_size;
            stats.peak_chunk_lines = stats.peak_chunk_lines.max(current_chunk.len());
            stats.peak_chunk_bytes = stats.peak_chunk_bytes.max(current_size);
        }

        if !current_chunk.is_empty() {
            shutdown.check(Phase::Sort)?;
            let run = self.sort_and_write_chunk(current_chunk, comparator)?;
            runs.push(run);
        }

        stats.lines_sorted += line_count;
        stats.runs_created += runs.len();
        stats.chunk_time_ms += started.elapsed().as_millis() as u64;
        Ok(runs)
    }

    pub fn sort_and_write_chunk<C>(
        &mut self,
        mut lines: Vec<String>,
        comparator: &C,
    ) -> Result<RunMetadata>
    where
        C: LineComparator + ?Sized,
    {
        try_sort_by(&mut lines, |a, b| comparator.compare(a, b))?;

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let file_path = run_file_path(&self.work_dir, 0, run_id);
        let line_count = write_lines(&file_path, &lines, self.io_buffer_size)?;

        debug!(
            "Spilled run {} with {} lines to {}",
            run_id,
            line_count,
            file_path.display()
        );

        Ok(RunMetadata {
            run_id,
            level: 0,
            file_path,
            line_count,
        })
    }
}
