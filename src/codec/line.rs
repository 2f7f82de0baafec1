use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::codec::CodecError;
use crate::constants::{DEFAULT_DELIMITER, LINE_TERMINATOR, QUOTE_CHAR};
use crate::error::{GroupSortError, Phase, Result};

/// Whether a field has to be wrapped in quotes to survive a round trip.
pub fn needs_quoting(field: &str, delimiter: char) -> bool {
    field
        .chars()
        .any(|c| c == delimiter || c == QUOTE_CHAR || c == '\n' || c == '\r')
}

/// Append `fields` to `out` as one delimited line, quoting only where required.
///
/// A record with no fields encodes as the empty line, so a single empty field is
/// always written quoted to keep the two apart.
pub fn join_fields<S: AsRef<str>>(fields: &[S], delimiter: char, out: &mut String) {
    if fields.len() == 1 && fields[0].as_ref().is_empty() {
        out.push(QUOTE_CHAR);
        out.push(QUOTE_CHAR);
        return;
    }

    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            out.push(delimiter);
        }
        let field = field.as_ref();
        if needs_quoting(field, delimiter) {
            out.push(QUOTE_CHAR);
            for ch in field.chars() {
                if ch == QUOTE_CHAR {
                    out.push(QUOTE_CHAR);
                }
                out.push(ch);
            }
            out.push(QUOTE_CHAR);
        } else {
            out.push_str(field);
        }
    }
}

/// Split one logical line into its fields.
///
/// A field opened with a quote runs until the matching unescaped quote; a doubled
/// quote inside it is a literal quote. Anything but a delimiter after the closing
/// quote is rejected, as is a quote that is never closed.
pub fn split_fields(line: &str, delimiter: char) -> std::result::Result<Vec<String>, CodecError> {
    let mut fields = Vec::new();
    if line.is_empty() {
        return Ok(fields);
    }

    let mut current = String::new();
    let mut in_quotes = false;
    let mut after_quote = false;
    let mut at_field_start = true;
    let mut chars = line.chars().enumerate().peekable();

    while let Some((column, ch)) = chars.next() {
        if in_quotes {
            if ch == QUOTE_CHAR {
                if matches!(chars.peek(), Some((_, next)) if *next == QUOTE_CHAR) {
                    chars.next();
                    current.push(QUOTE_CHAR);
                } else {
                    in_quotes = false;
                    after_quote = true;
                }
            } else {
                current.push(ch);
            }
            continue;
        }

        if ch == delimiter {
            fields.push(std::mem::take(&mut current));
            after_quote = false;
            at_field_start = true;
            continue;
        }

        if after_quote {
            return Err(CodecError::TrailingAfterQuote { found: ch, column });
        }

        if ch == QUOTE_CHAR && at_field_start {
            in_quotes = true;
        } else {
            current.push(ch);
        }
        at_field_start = false;
    }

    if in_quotes {
        return Err(CodecError::UnterminatedQuote);
    }

    fields.push(current);
    Ok(fields)
}

/// Quote tracking across the physical lines of one logical line.
///
/// Follows [`split_fields`]: a quote opens a field only at the start of that
/// field, and a doubled quote inside a quoted field reopens it at once.
struct QuoteState {
    delimiter: char,
    in_quotes: bool,
    at_field_start: bool,
    just_closed: bool,
}

impl QuoteState {
    fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            in_quotes: false,
            at_field_start: true,
            just_closed: false,
        }
    }

    fn feed(&mut self, text: &str) {
        for ch in text.chars() {
            if self.in_quotes {
                if ch == QUOTE_CHAR {
                    self.in_quotes = false;
                    self.just_closed = true;
                }
                continue;
            }

            if ch == QUOTE_CHAR && (self.at_field_start || self.just_closed) {
                self.in_quotes = true;
            }
            self.just_closed = false;
            self.at_field_start = ch == self.delimiter;
        }
    }

    fn is_open(&self) -> bool {
        self.in_quotes
    }
}

/// Reads logical lines from a delimited file.
///
/// Physical lines are joined while a quoted field is still open, so values with
/// embedded newlines come back as one line. The trailing terminator is removed.
pub struct LineReader {
    reader: BufReader<File>,
    path: PathBuf,
    phase: Phase,
    delimiter: char,
    line_number: usize,
    buffer: String,
}

impl LineReader {
    pub fn open(path: &Path, buffer_size: usize, phase: Phase) -> Result<Self> {
        let file = File::open(path).map_err(|e| GroupSortError::io(phase, path, e))?;
        Ok(Self {
            reader: BufReader::with_capacity(buffer_size, file),
            path: path.to_path_buf(),
            phase,
            delimiter: DEFAULT_DELIMITER,
            line_number: 0,
            buffer: String::new(),
        })
    }

    /// Field delimiter used to tell where a quoted field may start.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Number of logical lines returned so far.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_line(&mut self) -> Result<Option<String>> {
        self.buffer.clear();
        let mut quotes = QuoteState::new(self.delimiter);

        loop {
            let start = self.buffer.len();
            let read = self
                .reader
                .read_line(&mut self.buffer)
                .map_err(|e| GroupSortError::io(self.phase, &self.path, e))?;

            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                if quotes.is_open() {
                    self.line_number += 1;
                    return Err(GroupSortError::Decode {
                        phase: self.phase,
                        group: None,
                        line_number: Some(self.line_number),
                        source: CodecError::UnterminatedQuote,
                    });
                }
                break;
            }

            quotes.feed(&self.buffer[start..]);
            if !quotes.is_open() {
                break;
            }
        }

        if self.buffer.ends_with(LINE_TERMINATOR) {
            self.buffer.pop();
        }
        self.line_number += 1;
        Ok(Some(std::mem::take(&mut self.buffer)))
    }
}

impl Iterator for LineReader {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}
