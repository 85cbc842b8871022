use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log levels recognized in the head line, from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl LogLevel {
    /// The levels worth watching for rate spikes.
    pub const ELEVATED: [LogLevel; 5] = [
        LogLevel::Emergency,
        LogLevel::Alert,
        LogLevel::Critical,
        LogLevel::Error,
        LogLevel::Warning,
    ];

    /// Parse a level token, case-insensitive. Unrecognized tokens fall back
    /// to `Info` so a head line with an exotic level still produces an entry.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "emergency" => LogLevel::Emergency,
            "alert" => LogLevel::Alert,
            "critical" => LogLevel::Critical,
            "error" => LogLevel::Error,
            "warning" => LogLevel::Warning,
            "notice" => LogLevel::Notice,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Emergency => "emergency",
            LogLevel::Alert => "alert",
            LogLevel::Critical => "critical",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Notice => "notice",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// One parsed log statement, possibly spanning multiple raw lines.
///
/// Immutable once built; the `hash` field is the stable fingerprint used to
/// join entries to their error pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub context: HashMap<String, String>,
    pub channel: String,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    pub exception_class: Option<String>,
    pub stack_trace: Option<String>,
    pub hash: String,
    pub logged_at: DateTime<Utc>,
}

impl LogEntry {
    /// Message truncated for list displays.
    pub fn short_message(&self) -> String {
        if self.message.chars().count() > 100 {
            let head: String = self.message.chars().take(100).collect();
            format!("{head}...")
        } else {
            self.message.clone()
        }
    }
}
