//! Bounded, observable log of timestamped lines.
//!
//! Every append replaces the whole list, so readers holding a snapshot never
//! see a partial update. Entries are mirrored to `tracing` as they arrive.

use crate::models::{LogEntry, LogLevel};
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

/// Number of entries retained. Older entries are evicted first.
pub const MAX_ENTRIES: usize = 100;

pub type LogSnapshot = Arc<Vec<LogEntry>>;

#[derive(Clone)]
pub struct LogBuffer {
    tx: Arc<watch::Sender<LogSnapshot>>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self { tx: Arc::new(tx) }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.append(message, LogLevel::Info);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.append(message, LogLevel::Warn);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.append(message, LogLevel::Error);
    }

    pub fn append(&self, message: impl Into<String>, level: LogLevel) {
        let entry = LogEntry {
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            message: message.into(),
            level,
        };
        self.push(entry);
    }

    fn push(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => tracing::info!(target: "zingy::log", "{}", entry.message),
            LogLevel::Warn => tracing::warn!(target: "zingy::log", "{}", entry.message),
            LogLevel::Error => tracing::error!(target: "zingy::log", "{}", entry.message),
            LogLevel::Debug => tracing::debug!(target: "zingy::log", "{}", entry.message),
        }

        self.tx.send_modify(|current| {
            let keep_from = (current.len() + 1).saturating_sub(MAX_ENTRIES);
            let mut next = Vec::with_capacity(MAX_ENTRIES.min(current.len() + 1));
            next.extend(current[keep_from..].iter().cloned());
            next.push(entry);
            *current = Arc::new(next);
        });
    }

    pub fn clear(&self) {
        self.tx.send_modify(|current| *current = Arc::new(Vec::new()));
        self.info("Logs cleared");
    }

    pub fn snapshot(&self) -> LogSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LogSnapshot> {
        self.tx.subscribe()
    }

    /// All entries as `[timestamp] [LEVEL] message` lines.
    pub fn format(&self) -> String {
        self.snapshot()
            .iter()
            .map(|entry| entry.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn export(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, format!("{}\n", self.format()))
    }
}

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[([^\]]+)\] \[([^\]]+)\] (.+)").expect("static regex"))
}

/// Splits an engine line of the form `[timestamp] [LEVEL] message`.
///
/// Returns the level and message, or `None` if the line is not in that shape
/// or names an unknown level.
pub fn parse_line(raw: &str) -> Option<(LogLevel, String)> {
    let caps = line_pattern().captures(raw)?;
    let level = caps.get(2)?.as_str().parse::<LogLevel>().ok()?;
    Some((level, caps.get(3)?.as_str().to_string()))
}
