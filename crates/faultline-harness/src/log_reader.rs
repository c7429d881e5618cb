#![forbid(unsafe_code)]

//! Reader for application logs written by [`AppLog`](crate::app_log::AppLog).

use std::fs;
use std::path::Path;

use crate::app_log::LOG_FILE_NAME;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogReader {
    entries: Vec<LogEntry>,
}

impl LogReader {
    /// Parse log text. Lines that do not start a new entry are appended to
    /// the previous entry; leading orphan lines are dropped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut entries: Vec<LogEntry> = Vec::new();
        for line in text.lines() {
            match parse_line(line) {
                Some(entry) => entries.push(entry),
                None => {
                    if let Some(last) = entries.last_mut() {
                        last.text.push('\n');
                        last.text.push_str(line);
                    }
                }
            }
        }
        Self { entries }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Read `main.log` from a log directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_file(dir.as_ref().join(LOG_FILE_NAME))
    }

    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entry texts in order.
    #[must_use]
    pub fn format(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.text.clone()).collect()
    }
}

fn parse_line(line: &str) -> Option<LogEntry> {
    let rest = line.strip_prefix('[')?;
    let (timestamp, rest) = rest.split_once("] [")?;
    let (level, text) = rest.split_once("] ").or_else(|| {
        rest.strip_suffix(']').map(|level| (level, ""))
    })?;
    if level.is_empty() || level.contains(char::is_whitespace) {
        return None;
    }
    Some(LogEntry {
        timestamp: timestamp.to_string(),
        level: level.to_string(),
        text: text.to_string(),
    })
}
