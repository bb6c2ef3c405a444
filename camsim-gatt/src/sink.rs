//! Command log sink
//!
//! Every accepted write produces one [`CommandRecord`], appended synchronously
//! before dispatch returns. The file sink holds a mutex around the file so
//! concurrent writes never interleave within a line.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::BleUuid;

/// One observed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub service: BleUuid,
    pub characteristic: BleUuid,
    /// Decoded text, lossy for invalid UTF-8
    pub command: String,
    pub raw: Vec<u8>,
    /// Unix seconds
    pub timestamp: u64,
}

impl CommandRecord {
    pub fn new(service: BleUuid, characteristic: BleUuid, command: String, raw: &[u8]) -> Self {
        Self {
            service,
            characteristic,
            command,
            raw: raw.to_vec(),
            timestamp: current_timestamp(),
        }
    }

    /// `Service UUID: <uuid>, Characteristic UUID: <uuid>, Command: <text>\n`
    ///
    /// Line breaks inside the command are escaped so a record is always one line.
    pub fn to_line(&self) -> String {
        let command = self.command.replace('\r', "\\r").replace('\n', "\\n");
        format!(
            "Service UUID: {}, Characteristic UUID: {}, Command: {}\n",
            self.service, self.characteristic, command
        )
    }
}

/// Append-only destination for command records
pub trait CommandSink: Send + Sync {
    fn append(&self, record: &CommandRecord) -> io::Result<()>;
}

/// Appends records to a text file, never truncating it
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CommandSink for FileSink {
    fn append(&self, record: &CommandRecord) -> io::Result<()> {
        let line = record.to_line();
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

/// Keeps records in memory; for embedding and tests
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<CommandRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CommandRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.records().iter().map(CommandRecord::to_line).collect()
    }
}

impl CommandSink for MemorySink {
    fn append(&self, record: &CommandRecord) -> io::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
