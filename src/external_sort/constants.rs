pub const DEFAULT_CHUNK_LINES: usize = 100_000;
pub const DEFAULT_IO_BUFFER_SIZE_KB: usize = 64;
pub const DEFAULT_MAX_MERGE_FAN_IN: usize = 64;

pub const MIN_CHUNK_LINES: usize = 1;
pub const MIN_CHUNK_BYTES: usize = 1;
pub const MIN_MEMORY_USAGE_PERCENT: f64 = 1.0;
pub const MAX_MEMORY_USAGE_PERCENT: f64 = 90.0;
pub const MIN_IO_BUFFER_SIZE_KB: usize = 4;
pub const MAX_IO_BUFFER_SIZE_KB: usize = 16_384;
pub const MIN_MERGE_FAN_IN: usize = 2;
pub const MAX_MERGE_FAN_IN: usize = 1024;

// Accounted per buffered line on top of its text under a byte budget.
pub const LINE_OVERHEAD_BYTES: usize = std::mem::size_of::<String>();

pub const RUN_FILE_PREFIX: &str = "run_";
pub const RUN_FILE_EXTENSION: &str = ".csv";

// Run files keep one record per physical line: `\\` and `\n` stand for a
// backslash and a line break inside the record.
pub const RUN_ESCAPE: char = '\\';
pub const RUN_ESCAPED_TERMINATOR: char = 'n';

// Final output is merged here and renamed into place only on success.
pub const STAGING_FILE_NAME: &str = "output.partial";

pub const OUTPUT_BUFFER_SIZE_KB: usize = 512;

// Below this length chunks are sorted by insertion instead of merging.
pub const INSERTION_SORT_THRESHOLD: usize = 16;
