use std::path::Path;

use crate::codec::{LineCodec, LineReader, LineRecord};
use crate::error::{GroupSortError, Phase, Result};

/// Producer of input records: yields the next record, `Ok(None)` at end of stream.
///
/// Every `Iterator<Item = Result<R>>` is a source, so in-memory data can be fed
/// with `records.into_iter().map(Ok)`.
pub trait RecordSource<R> {
    fn next_record(&mut self) -> Result<Option<R>>;
}

impl<R, I> RecordSource<R> for I
where
    I: Iterator<Item = Result<R>>,
{
    fn next_record(&mut self) -> Result<Option<R>> {
        self.next().transpose()
    }
}

/// Reads records from a delimited text file written in the codec's format.
///
/// Blank lines are skipped and a trailing carriage return is dropped, so files
/// with CRLF line endings are accepted.
pub struct DelimitedFileSource<R> {
    reader: LineReader,
    codec: LineCodec<R>,
    skip_header: bool,
}

impl<R: LineRecord> DelimitedFileSource<R> {
    pub fn open(path: &Path, codec: LineCodec<R>, buffer_size: usize) -> Result<Self> {
        let reader = LineReader::open(path, buffer_size, Phase::Partition)?
            .with_delimiter(codec.delimiter());
        Ok(Self {
            reader,
            codec,
            skip_header: false,
        })
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.skip_header = has_header;
        self
    }

    fn read_record(&mut self) -> Result<Option<R>> {
        loop {
            let Some(mut line) = self.reader.next_line()? else {
                return Ok(None);
            };
            if line.ends_with('\r') {
                line.pop();
            }
            if self.skip_header {
                self.skip_header = false;
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            return self
                .codec
                .decode(&line)
                .map(Some)
                .map_err(|source| GroupSortError::Decode {
                    phase: Phase::Partition,
                    group: None,
                    line_number: Some(self.reader.line_number()),
                    source,
                });
        }
    }
}

impl<R: LineRecord> Iterator for DelimitedFileSource<R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}
