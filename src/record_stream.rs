//! Lazy reader for recorded traffic files.
//!
//! Each non-blank line of the input is `timestamp,url`, where `timestamp` is an
//! epoch-milliseconds number (decimal or scientific notation, e.g. `1.23E12`)
//! and `url` is the absolute URL that was requested. Records are produced one
//! at a time in file order, so arbitrarily large captures can be replayed
//! without loading them into memory.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// One recorded request: when it happened and what was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Recorded time in epoch milliseconds (may be fractional)
    pub scheduled_time: f64,

    /// Requested URL, trimmed and non-empty
    pub url: String,
}

/// Errors produced while reading the record stream.
///
/// All of these are fatal to a replay run.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("line {line}: expected 2 columns, found {found}")]
    ColumnCount { line: u64, found: usize },

    #[error("line {line}: invalid time '{value}'")]
    InvalidTime { line: u64, value: String },

    #[error("line {line}: invalid URL")]
    InvalidUrl { line: u64 },

    #[error("Failed to open replay file '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read replay file: {0}")]
    Read(#[from] csv::Error),
}

impl RecordError {
    /// Input line the error refers to, when there is one.
    pub fn line(&self) -> Option<u64> {
        match self {
            RecordError::ColumnCount { line, .. }
            | RecordError::InvalidTime { line, .. }
            | RecordError::InvalidUrl { line } => Some(*line),
            RecordError::Read(e) => e.position().map(|p| p.line()),
            RecordError::Open { .. } => None,
        }
    }

    /// Short machine-stable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            RecordError::ColumnCount { .. } => "expected 2 columns",
            RecordError::InvalidTime { .. } => "invalid time",
            RecordError::InvalidUrl { .. } => "invalid URL",
            RecordError::Open { .. } => "cannot open input",
            RecordError::Read(_) => "cannot read input",
        }
    }
}

/// Single forward pass over a `timestamp,url` source.
///
/// Blank lines are skipped. With `skip_header` the first non-blank line is
/// discarded unparsed. After the first error the stream yields nothing more.
pub struct RecordStream<R: Read> {
    rows: csv::StringRecordsIntoIter<R>,
    skip_header: bool,
    finished: bool,
}

impl RecordStream<File> {
    /// Opens a replay file from disk.
    pub fn from_path<P: AsRef<Path>>(path: P, skip_header: bool) -> Result<Self, RecordError> {
        let path_ref = path.as_ref();
        info!(path = ?path_ref, skip_header = skip_header, "Opening replay file");

        let file = File::open(path_ref).map_err(|source| RecordError::Open {
            path: path_ref.display().to_string(),
            source,
        })?;
        Ok(Self::new(file, skip_header))
    }
}

impl<R: Read> RecordStream<R> {
    /// Wraps any reader. Nothing is read until the first `next()`.
    pub fn new(reader: R, skip_header: bool) -> Self {
        let rows = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_records();

        Self {
            rows,
            skip_header,
            finished: false,
        }
    }

    fn fail(&mut self, error: RecordError) -> Option<Result<Record, RecordError>> {
        self.finished = true;
        Some(Err(error))
    }
}

fn is_blank(row: &csv::StringRecord) -> bool {
    row.len() == 1 && row[0].is_empty()
}

fn parse_row(row: &csv::StringRecord, line: u64) -> Result<Record, RecordError> {
    if row.len() != 2 {
        return Err(RecordError::ColumnCount {
            line,
            found: row.len(),
        });
    }

    let time_str = &row[0];
    let scheduled_time = match time_str.parse::<f64>() {
        Ok(t) if t.is_finite() => t,
        _ => {
            return Err(RecordError::InvalidTime {
                line,
                value: time_str.to_string(),
            })
        }
    };

    let url = &row[1];
    if url.is_empty() {
        return Err(RecordError::InvalidUrl { line });
    }

    Ok(Record {
        scheduled_time,
        url: url.to_string(),
    })
}

impl<R: Read> Iterator for RecordStream<R> {
    type Item = Result<Record, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let row = match self.rows.next() {
                Some(Ok(row)) => row,
                Some(Err(e)) => return self.fail(RecordError::Read(e)),
                None => {
                    self.finished = true;
                    return None;
                }
            };

            if is_blank(&row) {
                continue;
            }

            let line = row.position().map(|p| p.line()).unwrap_or(0);

            if self.skip_header {
                self.skip_header = false;
                debug!(line = line, "Skipping header line");
                continue;
            }

            return match parse_row(&row, line) {
                Ok(record) => Some(Ok(record)),
                Err(e) => self.fail(e),
            };
        }
    }
}
