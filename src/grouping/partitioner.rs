use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::{LineCodec, LineRecord, RecordSource};
use crate::constants::SHUTDOWN_CHECK_INTERVAL_RECORDS;
use crate::error::{GroupSortError, Phase, Result};
use crate::external_sort::chunk::write_line;
use crate::grouping::workspace::TempWorkspace;
use crate::shutdown::ShutdownSignal;

/// One discovered group and its unsorted file.
#[derive(Debug, Clone)]
pub struct GroupFile {
    pub key: String,
    pub index: usize,
    pub path: PathBuf,
    pub record_count: usize,
}

struct OpenWriter {
    writer: BufWriter<File>,
    last_used: u64,
}

/// Result of one partitioning pass; groups are in discovery order.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub groups: Vec<GroupFile>,
    pub records: usize,
    pub writer_evictions: usize,
    pub elapsed_ms: u64,
}

/// Single sequential pass that appends every record to the file of its group.
///
/// Writers are opened lazily per key. At most `max_open_writers` are held at a
/// time; past that the least recently used one is flushed, closed and later
/// reopened in append mode.
pub struct GroupPartitioner<'w> {
    workspace: &'w TempWorkspace,
    io_buffer_size: usize,
    max_open_writers: usize,
    shutdown: ShutdownSignal,
}

impl<'w> GroupPartitioner<'w> {
    pub fn new(
        workspace: &'w TempWorkspace,
        io_buffer_size: usize,
        max_open_writers: usize,
    ) -> Self {
        Self {
            workspace,
            io_buffer_size,
            max_open_writers: max_open_writers.max(1),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_shutdown_signal(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn partition<R, S, K>(
        &self,
        source: &mut S,
        key_of: K,
        codec: &LineCodec<R>,
    ) -> Result<Partition>
    where
        R: LineRecord,
        S: RecordSource<R> + ?Sized,
        K: Fn(&R) -> Option<String>,
    {
        let started = Instant::now();
        let mut partition = Partition::default();
        let mut writers: HashMap<usize, OpenWriter> = HashMap::new();

        let result = self.fill(source, &key_of, codec, &mut partition, &mut writers);
        let closed = close_writers(&mut writers, &partition.groups);

        // A fill error wins over a close error.
        result?;
        closed?;

        partition.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Partitioned {} records into {} groups",
            partition.records,
            partition.groups.len()
        );
        Ok(partition)
    }

    fn fill<R, S, K>(
        &self,
        source: &mut S,
        key_of: &K,
        codec: &LineCodec<R>,
        partition: &mut Partition,
        writers: &mut HashMap<usize, OpenWriter>,
    ) -> Result<()>
    where
        R: LineRecord,
        S: RecordSource<R> + ?Sized,
        K: Fn(&R) -> Option<String>,
    {
        let mut index_by_key: HashMap<String, usize> = HashMap::new();
        let mut tick: u64 = 0;

        while let Some(record) = source.next_record()? {
            tick += 1;
            if partition.records % SHUTDOWN_CHECK_INTERVAL_RECORDS == 0 {
                self.shutdown.check(Phase::Partition)?;
            }

            let key = match key_of(&record) {
                Some(key) if !key.is_empty() => key,
                _ => {
                    return Err(GroupSortError::config(format!(
                        "Record {} has no group key",
                        partition.records + 1
                    )))
                }
            };

            let index = match index_by_key.get(&key) {
                Some(&index) => index,
                None => {
                    let index = partition.groups.len();
                    let path = self.workspace.unsorted_path(index, &key);
                    debug!("Discovered group '{}' -> {}", key, path.display());
                    index_by_key.insert(key.clone(), index);
                    partition.groups.push(GroupFile {
                        key,
                        index,
                        path,
                        record_count: 0,
                    });
                    index
                }
            };

            if !writers.contains_key(&index) {
                if writers.len() >= self.max_open_writers {
                    self.evict_least_recent(writers, &partition.groups)?;
                    partition.writer_evictions += 1;
                }
                let writer = self.open_writer(&partition.groups[index])?;
                writers.insert(index, writer);
            }

            let group = &mut partition.groups[index];
            if let Some(open) = writers.get_mut(&index) {
                open.last_used = tick;
                write_line(&mut open.writer, &codec.encode(&record)).map_err(|e| {
                    GroupSortError::Io {
                        phase: Phase::Partition,
                        group: Some(group.key.clone()),
                        path: group.path.clone(),
                        source: e,
                    }
                })?;
            }
            group.record_count += 1;
            partition.records += 1;
        }

        Ok(())
    }

    fn open_writer(&self, group: &GroupFile) -> Result<OpenWriter> {
        // The workspace is fresh, so append mode serves the first open and reopens after eviction.
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&group.path)
            .map_err(|e| GroupSortError::Io {
                phase: Phase::Partition,
                group: Some(group.key.clone()),
                path: group.path.clone(),
                source: e,
            })?;
        Ok(OpenWriter {
            writer: BufWriter::with_capacity(self.io_buffer_size, file),
            last_used: 0,
        })
    }

    fn evict_least_recent(
        &self,
        writers: &mut HashMap<usize, OpenWriter>,
        groups: &[GroupFile],
    ) -> Result<()> {
        let Some(&victim) = writers
            .iter()
            .min_by_key(|(_, open)| open.last_used)
            .map(|(index, _)| index)
        else {
            return Ok(());
        };

        if let Some(mut open) = writers.remove(&victim) {
            let group = &groups[victim];
            open.writer.flush().map_err(|e| GroupSortError::Io {
                phase: Phase::Partition,
                group: Some(group.key.clone()),
                path: group.path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}

fn close_writers(writers: &mut HashMap<usize, OpenWriter>, groups: &[GroupFile]) -> Result<()> {
    let mut first_error = None;
    for (index, mut open) in writers.drain() {
        if let Err(e) = open.writer.flush() {
            let group = &groups[index];
            warn!("Failed to flush group file {}: {}", group.path.display(), e);
            if first_error.is_none() {
                first_error = Some(GroupSortError::Io {
                    phase: Phase::Partition,
                    group: Some(group.key.clone()),
                    path: group.path.clone(),
                    source: e,
                });
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
