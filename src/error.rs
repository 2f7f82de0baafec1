use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;

pub type Result<T> = std::result::Result<T, GroupSortError>;

/// Pipeline phase an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Partition,
    Sort,
    Stream,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::Partition => "partition",
            Phase::Sort => "sort",
            Phase::Stream => "stream",
        };
        f.write_str(name)
    }
}

/// Terminal error of a sort or grouping run.
#[derive(Error, Debug)]
pub enum GroupSortError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("IO error during {phase}{} at {}: {source}", group_suffix(.group), .path.display())]
    Io {
        phase: Phase,
        group: Option<String>,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "Decode error during {phase}{}{}: {source}",
        group_suffix(.group),
        line_suffix(.line_number)
    )]
    Decode {
        phase: Phase,
        group: Option<String>,
        line_number: Option<usize>,
        #[source]
        source: CodecError,
    },

    #[error("Comparator failed during {phase}{}: {message}", group_suffix(.group))]
    Comparator {
        phase: Phase,
        group: Option<String>,
        message: String,
    },

    #[error("Group handler failed for group '{group}': {source}")]
    Handler {
        group: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Cancelled during {phase}")]
    Cancelled { phase: Phase },
}

fn group_suffix(group: &Option<String>) -> String {
    match group {
        Some(key) => format!(" of group '{}'", key),
        None => String::new(),
    }
}

fn line_suffix(line_number: &Option<usize>) -> String {
    match line_number {
        Some(n) => format!(" at line {}", n),
        None => String::new(),
    }
}

impl GroupSortError {
    pub fn config(message: impl Into<String>) -> Self {
        GroupSortError::Configuration {
            message: message.into(),
        }
    }

    pub fn io(phase: Phase, path: impl Into<PathBuf>, source: io::Error) -> Self {
        GroupSortError::Io {
            phase,
            group: None,
            path: path.into(),
            source,
        }
    }

    pub fn comparator(phase: Phase, message: impl Into<String>) -> Self {
        GroupSortError::Comparator {
            phase,
            group: None,
            message: message.into(),
        }
    }

    /// The phase the error belongs to, if it is tied to one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            GroupSortError::Configuration { .. } => Some(Phase::Setup),
            GroupSortError::Io { phase, .. }
            | GroupSortError::Decode { phase, .. }
            | GroupSortError::Comparator { phase, .. }
            | GroupSortError::Cancelled { phase } => Some(*phase),
            GroupSortError::Handler { .. } => Some(Phase::Stream),
        }
    }

    pub fn group(&self) -> Option<&str> {
        match self {
            GroupSortError::Io { group, .. }
            | GroupSortError::Decode { group, .. }
            | GroupSortError::Comparator { group, .. } => group.as_deref(),
            GroupSortError::Handler { group, .. } => Some(group),
            _ => None,
        }
    }

    /// Re-tag an engine-level error with the pipeline phase and group it occurred in.
    pub fn in_group(self, phase: Phase, key: &str) -> Self {
        match self {
            GroupSortError::Io { path, source, .. } => GroupSortError::Io {
                phase,
                group: Some(key.to_string()),
                path,
                source,
            },
            GroupSortError::Decode {
                line_number,
                source,
                ..
            } => GroupSortError::Decode {
                phase,
                group: Some(key.to_string()),
                line_number,
                source,
            },
            GroupSortError::Comparator { message, .. } => GroupSortError::Comparator {
                phase,
                group: Some(key.to_string()),
                message,
            },
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GroupSortError::Cancelled { .. })
    }
}
