//! Record <-> delimited line conversion.
//!
//! Sorting and partitioning work on text lines on disk. This module turns a typed
//! record into exactly one such line and back, using the record type's
//! [`FieldOrder`] table.

pub mod fields;
pub mod line;
pub mod source;

#[cfg(test)]
mod tests;

pub use fields::{FieldOrder, FieldOrderBuilder, LineRecord};
pub use line::{join_fields, split_fields, LineReader};
pub use source::{DelimitedFileSource, RecordSource};

use std::marker::PhantomData;
use thiserror::Error;

use crate::constants::DEFAULT_DELIMITER;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unterminated quoted field")]
    UnterminatedQuote,

    #[error("unexpected {found:?} after closing quote at column {column}")]
    TrailingAfterQuote { found: char, column: usize },

    #[error("expected {}{expected} fields, found {found}", at_least_prefix(.at_least))]
    FieldCount {
        expected: usize,
        found: usize,
        at_least: bool,
    },

    #[error("field '{field}' has invalid value {value:?}: {message}")]
    InvalidField {
        field: &'static str,
        value: String,
        message: String,
    },
}

fn at_least_prefix(at_least: &bool) -> &'static str {
    if *at_least {
        "at least "
    } else {
        ""
    }
}

/// Encoder/decoder for one record type and one delimiter.
#[derive(Debug)]
pub struct LineCodec<R> {
    delimiter: char,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for LineCodec<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for LineCodec<R> {}

impl<R: LineRecord> Default for LineCodec<R> {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER)
    }
}

impl<R: LineRecord> LineCodec<R> {
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            _record: PhantomData,
        }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn encode(&self, record: &R) -> String {
        let fields = R::field_order().to_fields(record);
        let mut line = String::new();
        join_fields(&fields, self.delimiter, &mut line);
        line
    }

    pub fn decode(&self, line: &str) -> Result<R, CodecError> {
        let fields = split_fields(line, self.delimiter)?;
        R::field_order().from_fields(fields)
    }

    /// Column names joined the same way a record would be.
    pub fn header(&self) -> String {
        let names = R::field_order().names();
        let mut line = String::new();
        join_fields(&names, self.delimiter, &mut line);
        line
    }
}
