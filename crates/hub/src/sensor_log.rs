//! Reading the append-only sensor logs written by the node.
//!
//! Each row is `value,timestamp` with no header:
//!
//! ```text
//! 1712.5,2024-05-01 08:00:00
//! 1710.0,2024-05-01 08:05:00
//! ```

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use time::PrimitiveDateTime;

use crate::cycle::{parse_timestamp, CycleError, Reading};

/// Readings parsed from a chunk of log, plus whatever had to be patched
/// or skipped along the way.
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub readings: Vec<Reading>,
    pub issues: Vec<CycleError>,
}

// ---------------------------------------------------------------------------
// Row parsing
// ---------------------------------------------------------------------------

/// Turns raw records into readings.  Remembers the last good timestamp so a
/// row with a broken timestamp can borrow it.
#[derive(Debug, Default)]
struct RowParser {
    row: usize,
    last_good: Option<PrimitiveDateTime>,
}

impl RowParser {
    fn push(&mut self, record: &csv::StringRecord, out: &mut ParsedLog) {
        let row = self.row;
        self.row += 1;

        let value_field = record.get(0).unwrap_or("").trim();
        let ts_field = record.get(1).unwrap_or("").trim();

        // Hand-made logs sometimes carry a header.
        if row == 0 && ts_field.eq_ignore_ascii_case("timestamp") {
            return;
        }

        let value = match value_field.parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                out.issues.push(CycleError::MalformedValue {
                    row,
                    value: value_field.to_string(),
                });
                return;
            }
        };

        let timestamp = match parse_timestamp(ts_field) {
            Ok(ts) => {
                self.last_good = Some(ts);
                ts
            }
            Err(_) => {
                out.issues.push(CycleError::MalformedTimestamp {
                    row,
                    value: ts_field.to_string(),
                });
                match self.last_good {
                    Some(ts) => ts,
                    // Nothing to fall back on yet.
                    None => return,
                }
            }
        };

        out.readings.push(Reading::new(timestamp, value));
    }
}

/// Parse a complete log held in memory.
pub fn parse_log(bytes: &[u8]) -> Result<ParsedLog> {
    let mut parser = RowParser::default();
    parse_chunk(&mut parser, bytes)
}

fn parse_chunk(parser: &mut RowParser, bytes: &[u8]) -> Result<ParsedLog> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut out = ParsedLog::default();
    let mut record = csv::StringRecord::new();
    while rdr
        .read_record(&mut record)
        .context("failed to read log record")?
    {
        parser.push(&record, &mut out);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tail follower
// ---------------------------------------------------------------------------

/// Follows one log file, returning only complete rows appended since the
/// previous call.  A file that shrinks is treated as replaced and re-read
/// from the start.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    parser: RowParser,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            parser: RowParser::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_new(&mut self) -> Result<ParsedLog> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ParsedLog::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open log {}", self.path.display()))
            }
        };

        let len = file
            .metadata()
            .with_context(|| format!("failed to stat log {}", self.path.display()))?
            .len();
        if len < self.offset {
            tracing::warn!(path = %self.path.display(), "log shrank, re-reading from start");
            self.offset = 0;
            self.parser = RowParser::default();
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .with_context(|| format!("failed to read log {}", self.path.display()))?;

        // Leave a partially written last line for the next call.
        let complete = match buf.iter().rposition(|&b| b == b'\n') {
            Some(i) => i + 1,
            None => return Ok(ParsedLog::default()),
        };

        let parsed = parse_chunk(&mut self.parser, &buf[..complete])?;
        self.offset += complete as u64;
        Ok(parsed)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
