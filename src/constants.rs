pub const BYTES_PER_KB: usize = 1024;
pub const BYTES_PER_MB: usize = 1_048_576;
pub const BYTES_PER_GB: f64 = 1_073_741_824.0;

pub const DEFAULT_DELIMITER: char = ',';
pub const QUOTE_CHAR: char = '"';
pub const LINE_TERMINATOR: char = '\n';

pub const SUPPORTED_ENCODING: &str = "utf-8";

// Shutdown polling inside long loops
pub const SHUTDOWN_CHECK_INTERVAL_RECORDS: usize = 1000;
