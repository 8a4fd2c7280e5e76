//! Sync log sinks.
//!
//! The sync log is the operator-facing record of what happened: one entry per
//! captured event, per reconciliation pass and per skipped operation. Writing
//! to a sink is best-effort and never interrupts synchronization.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use crate::LogEntry;

pub trait LogSink: Send + Sync {
    fn append(&self, entry: &LogEntry);
}

/// Appends entries to a text file: a timestamp line followed by the message.
pub struct FileLogSink {
    file: Mutex<File>,
}

impl FileLogSink {
    /// Open the log file, discarding anything written by a previous run.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileLogSink {
    fn append(&self, entry: &LogEntry) {
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        let result = writeln!(file, "{}\n{}", entry.formatted_timestamp(), entry.message)
            .and_then(|_| file.flush());
        if let Err(err) = result {
            tracing::warn!("Failed to write sync log: {}", err);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Timestamp followed by the message
    #[default]
    Text,
    /// One JSON object per line for scripting
    Json,
    /// Message only
    Compact,
    /// No console output
    Quiet,
}

/// Echoes entries to stdout.
pub struct ConsoleSink {
    format: OutputFormat,
}

impl ConsoleSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl LogSink for ConsoleSink {
    fn append(&self, entry: &LogEntry) {
        match self.format {
            OutputFormat::Text => println!("[{}] {}", entry.formatted_timestamp(), entry.message),
            OutputFormat::Json => match serde_json::to_string(entry) {
                Ok(line) => println!("{}", line),
                Err(err) => tracing::warn!("Failed to serialize log entry: {}", err),
            },
            OutputFormat::Compact => println!("{}", entry.message),
            OutputFormat::Quiet => {}
        }
    }
}

/// Keeps every entry in memory.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.message).collect()
    }
}

impl LogSink for MemorySink {
    fn append(&self, entry: &LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry.clone());
    }
}

/// Forwards each entry to several sinks in order.
#[derive(Default)]
pub struct TeeSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl TeeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl LogSink for TeeSink {
    fn append(&self, entry: &LogEntry) {
        for sink in &self.sinks {
            sink.append(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_sink_writes_timestamp_then_message() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.log");
        fs::write(&path, "stale contents from a previous run\n").unwrap();

        let sink = FileLogSink::create(&path).unwrap();
        sink.append(&LogEntry::new("Deleted: notes.txt"));
        sink.append(&LogEntry::new("Added: todo.txt"));

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].len(), "2024-01-01 00:00:00".len());
        assert_eq!(lines[1], "Deleted: notes.txt");
        assert_eq!(lines[3], "Added: todo.txt");
        assert!(!text.contains("stale"));
    }

    #[test]
    fn test_tee_forwards_to_all() {
        let first = Arc::new(MemorySink::new());
        let second = Arc::new(MemorySink::new());
        let tee = TeeSink::new()
            .with(first.clone())
            .with(second.clone())
            .with(Arc::new(ConsoleSink::new(OutputFormat::Quiet)));

        tee.append(&LogEntry::new("hello"));

        assert_eq!(first.messages(), vec!["hello"]);
        assert_eq!(second.messages(), vec!["hello"]);
    }
}
