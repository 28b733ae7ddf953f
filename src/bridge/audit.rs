//! Append-only chat logs.
//!
//! - `ChatLog`: the cleaned, human readable transcript (`log.txt`)
//! - `RawChangeLog`: every row change observed on the feed (`raw.txt`)

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::{Local, TimeZone};
use parking_lot::Mutex;

use crate::common::ChatMessageRecord;

/// Timestamp layout used in the cleaned log.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A UTF-8 file opened for appending, flushed after every line.
#[derive(Debug)]
struct LogFile {
    writer: Mutex<BufWriter<File>>,
}

impl LogFile {
    fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn append_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()
    }
}

/// Render a unix timestamp in local time.
pub fn format_timestamp(unix_seconds: i64) -> String {
    match Local.timestamp_opt(unix_seconds, 0).single() {
        Some(datetime) => datetime.format(TIMESTAMP_FORMAT).to_string(),
        None => unix_seconds.to_string(),
    }
}

/// The cleaned transcript.
#[derive(Debug)]
pub struct ChatLog {
    file: LogFile,
}

impl ChatLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: LogFile::open(path)?,
        })
    }

    pub fn append(&self, line: &str) -> io::Result<()> {
        self.file.append_line(line)
    }
}

/// Audit trail of raw row changes, one line per change.
#[derive(Debug)]
pub struct RawChangeLog {
    table: String,
    file: LogFile,
}

impl RawChangeLog {
    pub fn open(path: impl AsRef<Path>, table: &str) -> io::Result<Self> {
        Ok(Self {
            table: table.to_string(),
            file: LogFile::open(path)?,
        })
    }

    pub fn record_insert(&self, row: &ChatMessageRecord) -> io::Result<()> {
        let json = serde_json::to_string(row)?;
        self.file.append_line(&format!("[{}] +{}", self.table, json))
    }

    pub fn record_delete(&self, row: &ChatMessageRecord) -> io::Result<()> {
        let json = serde_json::to_string(row)?;
        self.file.append_line(&format!("[{}] -{}", self.table, json))
    }

    pub fn record_update(&self, old: &ChatMessageRecord, new: &ChatMessageRecord) -> io::Result<()> {
        let old_json = serde_json::to_string(old)?;
        let new_json = serde_json::to_string(new)?;
        self.file
            .append_line(&format!("[{}] *{} -> {}", self.table, old_json, new_json))
    }
}
