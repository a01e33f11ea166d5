//! NDJSON feed adapter
//!
//! Input records arrive one JSON object per line, tagged by `type`. Blank
//! lines are skipped and a malformed line is reported with its 1-based
//! line number so the caller can drop it and keep reading. Snapshots go
//! out the same way, one camelCase object per line.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::controller::{ControlInput, StateSnapshot};
use crate::error::{FeedError, GreenwaveError};

// ============================================================================
// Parsing
// ============================================================================

/// Parses one feed line. Returns `Ok(None)` for a blank line.
///
/// # Errors
///
/// Returns `FeedError::Malformed` if the line is not a valid record.
pub fn parse_line<T>(text: &str, line: usize) -> Result<Option<T>, FeedError>
where
    T: for<'de> Deserialize<'de>,
{
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| FeedError::Malformed {
            line,
            message: e.to_string(),
        })
}

/// Streaming reader over a live NDJSON feed.
#[derive(Debug)]
pub struct FeedReader<R> {
    lines: Lines<R>,
    line: usize,
}

impl<R: AsyncBufRead + Unpin> FeedReader<R> {
    /// Wraps a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    /// Number of lines consumed so far.
    #[must_use]
    pub const fn line(&self) -> usize {
        self.line
    }

    /// Reads the next record, skipping blank lines. `Ok(None)` means EOF.
    ///
    /// A `Malformed` error consumes the offending line only; calling again
    /// continues with the next one.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Malformed` for an unparseable line and
    /// `FeedError::Io` if the underlying read fails.
    pub async fn next_record(&mut self) -> Result<Option<ControlInput>, FeedError> {
        while let Some(text) = self.lines.next_line().await? {
            self.line += 1;
            if let Some(input) = parse_line(&text, self.line)? {
                return Ok(Some(input));
            }
        }
        Ok(None)
    }
}

// ============================================================================
// Simulation Schedule
// ============================================================================

/// Input record pinned to the tick on which it is delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedInput {
    /// Tick whose inbox drain sees the record (1-based; 0 is treated as 1)
    #[serde(default)]
    pub tick: u64,
    /// The record itself
    #[serde(flatten)]
    pub input: ControlInput,
}

/// Records grouped by delivery tick, in file order within a tick.
#[derive(Debug, Default)]
pub struct Schedule {
    by_tick: BTreeMap<u64, Vec<ControlInput>>,
    len: usize,
}

impl Schedule {
    /// Parses a complete NDJSON replay file.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Malformed` on the first bad line; a replay is
    /// rejected as a whole rather than replayed with holes.
    pub fn parse(text: &str) -> Result<Self, FeedError> {
        let mut schedule = Self::default();
        for (index, raw) in text.lines().enumerate() {
            if let Some(timed) = parse_line::<TimedInput>(raw, index + 1)? {
                schedule.push(timed);
            }
        }
        Ok(schedule)
    }

    /// Adds one record.
    pub fn push(&mut self, timed: TimedInput) {
        self.by_tick
            .entry(timed.tick.max(1))
            .or_default()
            .push(timed.input);
        self.len += 1;
    }

    /// Removes and returns the records due on `tick`.
    pub fn take(&mut self, tick: u64) -> Vec<ControlInput> {
        self.by_tick.remove(&tick).unwrap_or_default()
    }

    /// Last tick with a scheduled record.
    #[must_use]
    pub fn last_tick(&self) -> Option<u64> {
        self.by_tick.keys().next_back().copied()
    }

    /// Total records parsed.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing was scheduled.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ============================================================================
// Snapshot Output
// ============================================================================

/// Writes snapshots as NDJSON, flushing after every line.
#[derive(Debug)]
pub struct SnapshotWriter<W> {
    writer: W,
    written: u64,
}

impl<W: AsyncWrite + Unpin> SnapshotWriter<W> {
    /// Wraps a writer.
    pub const fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Serializes one snapshot followed by `\n`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn write(&mut self, snapshot: &StateSnapshot) -> Result<(), GreenwaveError> {
        let mut line = serde_json::to_vec(snapshot)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        self.written += 1;
        Ok(())
    }

    /// Number of snapshots written.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
