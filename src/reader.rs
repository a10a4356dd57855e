//! Pull-based sources of raw records.
//!
//! A reader hands out one batch per request and is never asked for the next batch before the
//! previous one has been processed. The end of the stream is an explicit [`Batch::EndOfStream`];
//! [`Batches`] turns that into a fused iterator.

use crate::err::ReaderError;
use crate::record::RawRecord;

use log::{debug, trace};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::iter::FusedIterator;
use std::path::Path;

/// Number of records per batch when a reader is not told otherwise.
pub const DEFAULT_READER_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Records(Vec<RawRecord>),
    EndOfStream,
}

pub trait RecordReader {
    fn read_next_batch(&mut self) -> Result<Batch, ReaderError>;

    /// Whether records arrive oldest first (archived files), as opposed to newest first.
    fn delivers_oldest_first(&self) -> bool {
        false
    }

    fn batches(self) -> Batches<Self>
    where
        Self: Sized,
    {
        Batches {
            reader: self,
            finished: false,
        }
    }
}

impl<R: RecordReader + ?Sized> RecordReader for &mut R {
    fn read_next_batch(&mut self) -> Result<Batch, ReaderError> {
        (**self).read_next_batch()
    }

    fn delivers_oldest_first(&self) -> bool {
        (**self).delivers_oldest_first()
    }
}

impl<R: RecordReader + ?Sized> RecordReader for Box<R> {
    fn read_next_batch(&mut self) -> Result<Batch, ReaderError> {
        (**self).read_next_batch()
    }

    fn delivers_oldest_first(&self) -> bool {
        (**self).delivers_oldest_first()
    }
}

/// Iterator over the batches of a reader.
///
/// Ends after end-of-stream or after the first error, and never asks the reader again.
pub struct Batches<R> {
    reader: R,
    finished: bool,
}

impl<R: RecordReader> Batches<R> {
    pub fn delivers_oldest_first(&self) -> bool {
        self.reader.delivers_oldest_first()
    }
}

impl<R: RecordReader> Iterator for Batches<R> {
    type Item = Result<Vec<RawRecord>, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.reader.read_next_batch() {
            Ok(Batch::Records(records)) => Some(Ok(records)),
            Ok(Batch::EndOfStream) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: RecordReader> FusedIterator for Batches<R> {}

/// Reads one JSON-serialized [`RawRecord`] per line. Blank lines are skipped.
pub struct JsonlRecordReader<B> {
    input: B,
    source_name: String,
    line_no: usize,
    batch_size: usize,
    oldest_first: bool,
    at_eof: bool,
}

impl JsonlRecordReader<BufReader<File>> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ReaderError::Io {
            source_name: path.display().to_string(),
            source,
        })?;
        Ok(JsonlRecordReader::new(
            BufReader::new(file),
            path.display().to_string(),
        ))
    }
}

impl<B: BufRead> JsonlRecordReader<B> {
    pub fn new(input: B, source_name: impl Into<String>) -> Self {
        JsonlRecordReader {
            input,
            source_name: source_name.into(),
            line_no: 0,
            batch_size: DEFAULT_READER_BATCH_SIZE,
            oldest_first: false,
            at_eof: false,
        }
    }

    /// Values below 1 are clamped to 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Declare that the file lists records oldest first.
    pub fn oldest_first(mut self, oldest_first: bool) -> Self {
        self.oldest_first = oldest_first;
        self
    }

    fn next_line(&mut self) -> Result<Option<String>, ReaderError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .input
                .read_line(&mut line)
                .map_err(|source| ReaderError::Io {
                    source_name: self.source_name.clone(),
                    source,
                })?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
    }
}

impl<B: BufRead> RecordReader for JsonlRecordReader<B> {
    fn read_next_batch(&mut self) -> Result<Batch, ReaderError> {
        if self.at_eof {
            return Ok(Batch::EndOfStream);
        }

        let mut records = Vec::with_capacity(self.batch_size);
        while records.len() < self.batch_size {
            let Some(line) = self.next_line()? else {
                self.at_eof = true;
                break;
            };

            let record: RawRecord =
                serde_json::from_str(&line).map_err(|source| ReaderError::Malformed {
                    source_name: self.source_name.clone(),
                    line: self.line_no,
                    source,
                })?;
            record.validate().map_err(|source| ReaderError::Invalid {
                source_name: self.source_name.clone(),
                line: self.line_no,
                source,
            })?;
            records.push(record);
        }

        if records.is_empty() {
            debug!("`{}`: end of stream after {} lines", self.source_name, self.line_no);
            return Ok(Batch::EndOfStream);
        }
        trace!("`{}`: read batch of {}", self.source_name, records.len());
        Ok(Batch::Records(records))
    }

    fn delivers_oldest_first(&self) -> bool {
        self.oldest_first
    }
}

/// Serves records already in memory, in batches.
#[derive(Debug, Clone)]
pub struct VecRecordReader {
    records: std::vec::IntoIter<RawRecord>,
    batch_size: usize,
    oldest_first: bool,
}

impl VecRecordReader {
    pub fn new(records: Vec<RawRecord>) -> Self {
        VecRecordReader {
            records: records.into_iter(),
            batch_size: DEFAULT_READER_BATCH_SIZE,
            oldest_first: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn oldest_first(mut self, oldest_first: bool) -> Self {
        self.oldest_first = oldest_first;
        self
    }
}

impl RecordReader for VecRecordReader {
    fn read_next_batch(&mut self) -> Result<Batch, ReaderError> {
        let batch: Vec<RawRecord> = self.records.by_ref().take(self.batch_size).collect();
        if batch.is_empty() {
            Ok(Batch::EndOfStream)
        } else {
            Ok(Batch::Records(batch))
        }
    }

    fn delivers_oldest_first(&self) -> bool {
        self.oldest_first
    }
}
