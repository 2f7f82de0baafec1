pub const WORKSPACE_PREFIX: &str = "groupsort_";
pub const GROUPS_DIR_NAME: &str = "groups";
pub const SORT_DIR_NAME: &str = "sort";

pub const UNSORTED_SUFFIX: &str = "_unsorted";
pub const SORTED_SUFFIX: &str = "_sorted";
pub const GROUP_FILE_EXTENSION: &str = ".csv";

pub const MAX_SANITIZED_KEY_LENGTH: usize = 64;
pub const SANITIZE_REPLACEMENT: char = '_';

pub const DEFAULT_MAX_OPEN_WRITERS: usize = 256;
pub const MIN_MAX_OPEN_WRITERS: usize = 1;
pub const MAX_MAX_OPEN_WRITERS: usize = 4096;
