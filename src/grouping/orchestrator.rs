use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::{LineCodec, LineReader, LineRecord, RecordSource};
use crate::error::{GroupSortError, Phase, Result};
use crate::external_sort::{ExternalSorter, LineComparator, SortStats, TextOrder};
use crate::grouping::config::GroupSortConfig;
use crate::grouping::partitioner::{GroupFile, GroupPartitioner};
use crate::grouping::workspace::TempWorkspace;
use crate::grouping::GroupKeyed;
use crate::shutdown::ShutdownSignal;

pub type KeyFn<R> = Box<dyn Fn(&R) -> Option<String>>;
pub type CompareFn<R> = Box<dyn Fn(&R, &R) -> anyhow::Result<Ordering>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Partitioning,
    SortingGroups,
    Streaming { group: String, index: usize },
    Completed,
    Failed { phase: Phase },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupSortStats {
    pub records_partitioned: usize,
    pub groups: usize,
    pub records_streamed: usize,
    pub writer_evictions: usize,
    pub sort: SortStats,
    pub partition_time_ms: u64,
    pub sort_time_ms: u64,
    pub stream_time_ms: u64,
    pub processing_time_ms: u64,
}

/// Lines of a sorted group file, decoded on the fly.
///
/// Forward-only and single-pass. A read or decode failure ends the sequence; the
/// pipeline raises it once the handler returns.
pub struct GroupRecords<R> {
    key: String,
    reader: LineReader,
    codec: LineCodec<R>,
    error: Option<GroupSortError>,
    yielded: usize,
    finished: bool,
}

impl<R: LineRecord> GroupRecords<R> {
    fn new(key: String, reader: LineReader, codec: LineCodec<R>) -> Self {
        Self {
            key,
            reader,
            codec,
            error: None,
            yielded: 0,
            finished: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Records handed out so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    fn take_error(&mut self) -> Option<GroupSortError> {
        self.error.take()
    }

    fn fail(&mut self, error: GroupSortError) -> Option<R> {
        self.error = Some(error);
        self.finished = true;
        None
    }
}

impl<R: LineRecord> Iterator for GroupRecords<R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        if self.finished {
            return None;
        }

        match self.reader.next_line() {
            Ok(Some(line)) => match self.codec.decode(&line) {
                Ok(record) => {
                    self.yielded += 1;
                    Some(record)
                }
                Err(source) => {
                    let error = GroupSortError::Decode {
                        phase: Phase::Stream,
                        group: Some(self.key.clone()),
                        line_number: Some(self.reader.line_number()),
                        source,
                    };
                    self.fail(error)
                }
            },
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                let error = e.in_group(Phase::Stream, &self.key);
                self.fail(error)
            }
        }
    }
}

/// Decode-then-compare adapter that lets the line sorter use a typed ordering.
struct RecordOrder<'a, R> {
    codec: LineCodec<R>,
    compare: &'a CompareFn<R>,
}

impl<R: LineRecord> RecordOrder<'_, R> {
    fn decode(&self, line: &str) -> Result<R> {
        self.codec.decode(line).map_err(|source| GroupSortError::Decode {
            phase: Phase::Sort,
            group: None,
            line_number: None,
            source,
        })
    }
}

impl<R: LineRecord> LineComparator for RecordOrder<'_, R> {
    fn compare(&self, a: &str, b: &str) -> Result<Ordering> {
        let left = self.decode(a)?;
        let right = self.decode(b)?;
        (self.compare)(&left, &right)
            .map_err(|e| GroupSortError::comparator(Phase::Sort, format!("{:#}", e)))
    }
}

/// Partition a record stream by group key, sort every group on disk and replay
/// the groups one at a time.
///
/// Groups are replayed in the order their keys were first seen in the input.
/// Within a group, records follow the comparator given to [`sort_by`], or the
/// raw text order of their encoded lines if none was given.
///
/// [`sort_by`]: GroupedSort::sort_by
pub struct GroupedSort<R> {
    config: GroupSortConfig,
    codec: LineCodec<R>,
    key_of: Option<KeyFn<R>>,
    compare: Option<CompareFn<R>>,
    shutdown: ShutdownSignal,
    state: PipelineState,
}

impl<R: LineRecord> GroupedSort<R> {
    pub fn new(config: GroupSortConfig) -> Self {
        let codec = LineCodec::new(config.delimiter);
        Self {
            config,
            codec,
            key_of: None,
            compare: None,
            shutdown: ShutdownSignal::new(),
            state: PipelineState::Created,
        }
    }

    /// Group by a key computed from each record.
    pub fn group_by<F>(mut self, key_of: F) -> Self
    where
        F: Fn(&R) -> String + 'static,
    {
        self.key_of = Some(Box::new(move |r: &R| Some(key_of(r))));
        self
    }

    /// Group by the key the record type exposes itself.
    pub fn group_by_key(mut self) -> Self
    where
        R: GroupKeyed,
    {
        self.key_of = Some(Box::new(|r: &R| r.group_key()));
        self
    }

    pub fn sort_by<F>(mut self, compare: F) -> Self
    where
        F: Fn(&R, &R) -> anyhow::Result<Ordering> + 'static,
    {
        self.compare = Some(Box::new(compare));
        self
    }

    pub fn sort_by_key<K, F>(self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&R) -> K + 'static,
    {
        self.sort_by(move |a, b| Ok(key(a).cmp(&key(b))))
    }

    pub fn with_shutdown_signal(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn codec(&self) -> LineCodec<R> {
        self.codec
    }

    /// Run the pipeline, calling `handler` once per group.
    ///
    /// Either every group is handed to the handler exactly once, or a single
    /// error is returned. The temporary workspace is removed in both cases.
    pub fn process<S, H>(&mut self, mut source: S, mut handler: H) -> Result<GroupSortStats>
    where
        S: RecordSource<R>,
        H: FnMut(&str, &mut GroupRecords<R>) -> anyhow::Result<()>,
    {
        self.state = PipelineState::Created;
        let result = self.run(&mut source, &mut handler);

        match &result {
            Ok(stats) => {
                self.state = PipelineState::Completed;
                info!(
                    "Processed {} records in {} groups in {} ms",
                    stats.records_streamed, stats.groups, stats.processing_time_ms
                );
            }
            Err(e) => {
                let phase = e.phase().unwrap_or(Phase::Setup);
                self.state = PipelineState::Failed { phase };
                warn!("Group sort failed during {}: {}", phase, e);
            }
        }
        result
    }

    fn run<S, H>(&mut self, source: &mut S, handler: &mut H) -> Result<GroupSortStats>
    where
        S: RecordSource<R>,
        H: FnMut(&str, &mut GroupRecords<R>) -> anyhow::Result<()>,
    {
        let started = Instant::now();

        // Setup errors surface before any file is touched.
        let Some(key_of) = self.key_of.as_ref() else {
            return Err(GroupSortError::config("No group key: call group_by or group_by_key"));
        };
        self.config.validate()?;
        let sorter = ExternalSorter::new(self.config.sort.clone())?
            .with_shutdown_signal(self.shutdown.clone());

        let mut workspace = TempWorkspace::create(&self.config.temp_root)?;
        let mut pipeline = Pipeline {
            config: &self.config,
            codec: self.codec,
            compare: self.compare.as_ref(),
            shutdown: &self.shutdown,
            state: &mut self.state,
            workspace: &workspace,
            sorter: &sorter,
            stats: GroupSortStats::default(),
        };
        let result = pipeline.execute(source, key_of, handler);
        let mut stats = pipeline.stats;
        workspace.teardown();

        result?;
        stats.processing_time_ms = started.elapsed().as_millis() as u64;
        Ok(stats)
    }
}

/// Borrowed view of one invocation's moving parts.
struct Pipeline<'a, R> {
    config: &'a GroupSortConfig,
    codec: LineCodec<R>,
    compare: Option<&'a CompareFn<R>>,
    shutdown: &'a ShutdownSignal,
    state: &'a mut PipelineState,
    workspace: &'a TempWorkspace,
    sorter: &'a ExternalSorter,
    stats: GroupSortStats,
}

impl<R: LineRecord> Pipeline<'_, R> {
    fn execute<S, H>(&mut self, source: &mut S, key_of: &KeyFn<R>, handler: &mut H) -> Result<()>
    where
        S: RecordSource<R>,
        H: FnMut(&str, &mut GroupRecords<R>) -> anyhow::Result<()>,
    {
        *self.state = PipelineState::Partitioning;
        let partition = GroupPartitioner::new(
            self.workspace,
            self.config.sort.io_buffer_size_bytes(),
            self.config.max_open_writers,
        )
        .with_shutdown_signal(self.shutdown.clone())
        .partition(source, |r: &R| key_of(r), &self.codec)?;

        self.stats.records_partitioned = partition.records;
        self.stats.groups = partition.groups.len();
        self.stats.writer_evictions = partition.writer_evictions;
        self.stats.partition_time_ms = partition.elapsed_ms;

        *self.state = PipelineState::SortingGroups;
        let sorted = self.sort_groups(&partition.groups)?;

        let started = Instant::now();
        for (group, sorted_path) in partition.groups.iter().zip(sorted) {
            self.shutdown.check(Phase::Stream)?;
            *self.state = PipelineState::Streaming {
                group: group.key.clone(),
                index: group.index,
            };
            self.stream_group(group, sorted_path, handler)?;
        }
        self.stats.stream_time_ms = started.elapsed().as_millis() as u64;

        Ok(())
    }

    fn sort_groups(&mut self, groups: &[GroupFile]) -> Result<Vec<PathBuf>> {
        let started = Instant::now();
        let typed_order = self.compare.map(|compare| RecordOrder {
            codec: self.codec,
            compare,
        });
        let comparator: &dyn LineComparator = match &typed_order {
            Some(order) => order,
            None => &TextOrder,
        };

        let mut sorted_paths = Vec::with_capacity(groups.len());
        for group in groups {
            self.shutdown.check(Phase::Sort)?;

            let sorted_path = self.workspace.sorted_path(group.index, &group.key);
            let stats = self
                .sort_group(group, comparator, &sorted_path)
                .map_err(|e| e.in_group(Phase::Sort, &group.key))?;

            debug!(
                "Sorted group '{}': {} records, {} runs",
                group.key, stats.lines_sorted, stats.runs_created
            );
            self.stats.sort.accumulate(&stats);
            remove_quietly(&group.path);
            sorted_paths.push(sorted_path);
        }

        self.stats.sort_time_ms = started.elapsed().as_millis() as u64;
        Ok(sorted_paths)
    }

    fn sort_group(
        &self,
        group: &GroupFile,
        comparator: &dyn LineComparator,
        sorted_path: &Path,
    ) -> Result<SortStats> {
        let buffer_size = self.config.sort.io_buffer_size_bytes();
        let lines = LineReader::open(&group.path, buffer_size, Phase::Sort)?
            .with_delimiter(self.codec.delimiter());
        let work_dir = self.workspace.sort_dir(group.index);
        self.sorter.sort(lines, comparator, &work_dir, sorted_path)
    }

    fn stream_group<H>(
        &mut self,
        group: &GroupFile,
        sorted_path: PathBuf,
        handler: &mut H,
    ) -> Result<()>
    where
        H: FnMut(&str, &mut GroupRecords<R>) -> anyhow::Result<()>,
    {
        let buffer_size = self.config.sort.io_buffer_size_bytes();
        let reader = LineReader::open(&sorted_path, buffer_size, Phase::Stream)
            .map_err(|e| e.in_group(Phase::Stream, &group.key))?
            .with_delimiter(self.codec.delimiter());
        let mut records = GroupRecords::new(group.key.clone(), reader, self.codec);

        let handled = handler(group.key.as_str(), &mut records);
        let read_error = records.take_error();
        self.stats.records_streamed += records.yielded();
        // Close the group file before anything else happens.
        drop(records);
        remove_quietly(&sorted_path);

        if let Some(e) = read_error {
            return Err(e);
        }
        handled.map_err(|e| GroupSortError::Handler {
            group: group.key.clone(),
            source: e.into(),
        })?;

        debug!("Streamed group '{}'", group.key);
        Ok(())
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}
