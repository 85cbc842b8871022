pub mod classify;
pub mod similarity;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::parser::entry::{LogEntry, LogLevel};

/// Severity of an error pattern, derived from the log level that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Fixed level-to-severity mapping.
    pub fn from_level(level: LogLevel) -> Self {
        match level {
            LogLevel::Emergency | LogLevel::Alert | LogLevel::Critical => Severity::Critical,
            LogLevel::Error => Severity::High,
            LogLevel::Warning => Severity::Medium,
            LogLevel::Notice | LogLevel::Info | LogLevel::Debug => Severity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// How a pattern's recent activity compares to the window before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    New,
    Resolved,
    Stable,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::New => "new",
            Trend::Resolved => "resolved",
            Trend::Stable => "stable",
        }
    }
}

// Remediation hints for well-known exception classes, matched by substring
// against the pattern signature.
const SOLUTION_HINTS: &[(&str, &str)] = &[
    (
        "SqlException",
        "Review the query for syntax errors or missing table/column references.",
    ),
    (
        "ConnectionException",
        "Check that the remote service is reachable and connection settings are correct.",
    ),
    (
        "TimeoutException",
        "Check for slow downstream calls and consider raising the operation timeout.",
    ),
    (
        "AuthenticationException",
        "Verify credentials and authentication configuration.",
    ),
    (
        "AuthorizationException",
        "Check the acting user's permissions and authorization policies.",
    ),
    (
        "ValidationException",
        "Check input validation rules and ensure all required fields are provided.",
    ),
    (
        "FileNotFoundException",
        "Ensure the file exists at the specified path and check file permissions.",
    ),
    (
        "OutOfMemoryException",
        "Inspect recent allocations and consider raising the process memory limit.",
    ),
];

/// A cluster of structurally similar log entries.
///
/// Created by the clustering engine on the first unmatched entry and mutated
/// as further entries join the cluster; never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    /// Fingerprint of the entry that created the pattern; unique.
    pub pattern_hash: String,
    /// Representative cleaned message.
    pub pattern_signature: String,
    /// Exception class, or "Unknown" when the entry carried none.
    pub error_type: String,
    pub severity: Severity,
    pub occurrence_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sample_context: HashMap<String, String>,
    pub suggested_solution: Option<String>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ErrorPattern {
    pub fn from_entry(entry: &LogEntry) -> Self {
        ErrorPattern {
            pattern_hash: entry.hash.clone(),
            pattern_signature: entry.message.clone(),
            error_type: entry
                .exception_class
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            severity: Severity::from_level(entry.level),
            occurrence_count: 1,
            first_seen: entry.logged_at,
            last_seen: entry.logged_at,
            sample_context: entry.context.clone(),
            suggested_solution: None,
            is_resolved: false,
            resolved_at: None,
        }
    }

    /// Count another occurrence. `last_seen` only moves forward so
    /// out-of-order ingestion cannot violate `first_seen <= last_seen`.
    pub fn record_occurrence(&mut self, seen_at: DateTime<Utc>) {
        self.occurrence_count += 1;
        if seen_at > self.last_seen {
            self.last_seen = seen_at;
        }
    }

    /// Keep the first non-empty context seen for the cluster.
    pub fn absorb_context(&mut self, context: &HashMap<String, String>) {
        if self.sample_context.is_empty() && !context.is_empty() {
            self.sample_context = context.clone();
        }
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.is_resolved = true;
        self.resolved_at = Some(now);
    }

    pub fn unresolve(&mut self) {
        self.is_resolved = false;
        self.resolved_at = None;
    }

    /// Occurrences per hour between first and last sighting.
    pub fn frequency_rate(&self) -> f64 {
        let hours = (self.last_seen - self.first_seen).num_hours();
        if hours <= 0 {
            return self.occurrence_count as f64;
        }
        self.occurrence_count as f64 / hours as f64
    }

    /// First seen within the trailing 24 hours.
    pub fn is_new(&self, now: DateTime<Utc>) -> bool {
        self.first_seen >= now - Duration::hours(24)
    }

    /// The stored solution if one was set, otherwise a hint looked up from
    /// the known exception classes in the signature.
    pub fn solution(&self) -> Option<&str> {
        if let Some(stored) = self.suggested_solution.as_deref() {
            return Some(stored);
        }
        SOLUTION_HINTS
            .iter()
            .find(|(class, _)| self.pattern_signature.contains(class))
            .map(|(_, hint)| *hint)
    }
}
