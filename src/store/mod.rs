// logsift - GPL-3.0-or-later
// This file is part of logsift.
//
// logsift is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// logsift is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with logsift.  If not, see <https://www.gnu.org/licenses/>.

//! Storage and cache contracts consumed by the engine.
//!
//! The engine never owns persistence: it is handed trait objects for the
//! entry, pattern and anomaly stores plus a memoizing cache, and propagates
//! every failure to the caller unchanged.

pub mod memory;

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::anomaly::{AnomalyDetection, AnomalyType};
use crate::parser::entry::{LogEntry, LogLevel};
use crate::pattern::{ErrorPattern, Severity};

/// A store or cache call failed. Classification and detection cycles are
/// retried wholesale by the scheduler, never resumed mid-way.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Predicate for counting or fetching raw entries.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub level: Option<LogLevel>,
    pub channel: Option<String>,
    /// Restrict to entries belonging to one pattern (join on fingerprint).
    pub pattern_hash: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if self.level.is_some_and(|level| entry.level != level) {
            return false;
        }
        if self
            .channel
            .as_ref()
            .is_some_and(|channel| &entry.channel != channel)
        {
            return false;
        }
        if self
            .pattern_hash
            .as_ref()
            .is_some_and(|hash| &entry.hash != hash)
        {
            return false;
        }
        if self.from.is_some_and(|from| entry.logged_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.logged_at >= to) {
            return false;
        }
        true
    }
}

/// Persistence for raw entries. Insertion is idempotent on
/// `(hash, logged_at)` so at-least-once ingestion never duplicates rows.
pub trait EntryStore: Send + Sync {
    /// Returns `false` when an entry with the same `(hash, logged_at)` was
    /// already present.
    fn insert(&self, entry: &LogEntry) -> Result<bool, StoreError>;

    fn count(&self, filter: &EntryFilter) -> Result<u64, StoreError>;

    fn find(&self, filter: &EntryFilter) -> Result<Vec<LogEntry>, StoreError>;
}

/// Predicate for selecting patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    pub severity: Option<Severity>,
    pub error_type: Option<String>,
    pub last_seen_after: Option<DateTime<Utc>>,
    pub first_seen_after: Option<DateTime<Utc>>,
    pub unresolved_only: bool,
    pub min_occurrences: Option<u64>,
}

impl PatternFilter {
    pub fn matches(&self, pattern: &ErrorPattern) -> bool {
        if self.severity.is_some_and(|severity| pattern.severity != severity) {
            return false;
        }
        if self
            .error_type
            .as_ref()
            .is_some_and(|error_type| &pattern.error_type != error_type)
        {
            return false;
        }
        if self
            .last_seen_after
            .is_some_and(|after| pattern.last_seen < after)
        {
            return false;
        }
        if self
            .first_seen_after
            .is_some_and(|after| pattern.first_seen < after)
        {
            return false;
        }
        if self.unresolved_only && pattern.is_resolved {
            return false;
        }
        if self
            .min_occurrences
            .is_some_and(|min| pattern.occurrence_count < min)
        {
            return false;
        }
        true
    }
}

/// Persistence for error patterns, keyed by `pattern_hash`.
pub trait PatternStore: Send + Sync {
    fn find_by_hash(&self, hash: &str) -> Result<Option<ErrorPattern>, StoreError>;

    /// Matching patterns ordered by `last_seen`, most recent first.
    fn find_matching(&self, filter: &PatternFilter) -> Result<Vec<ErrorPattern>, StoreError>;

    fn insert(&self, pattern: &ErrorPattern) -> Result<(), StoreError>;

    /// Persist a mutated pattern (count, last_seen, context, resolution).
    fn update(&self, pattern: &ErrorPattern) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<ErrorPattern>, StoreError>;
}

/// Persistence for anomaly records, keyed by their id.
pub trait AnomalyStore: Send + Sync {
    /// Most recent *active* anomaly for `(anomaly_type, metric)` detected at
    /// or after `detected_after`, if any.
    fn find_active(
        &self,
        anomaly_type: AnomalyType,
        metric: &str,
        detected_after: DateTime<Utc>,
    ) -> Result<Option<AnomalyDetection>, StoreError>;

    fn insert(&self, anomaly: &AnomalyDetection) -> Result<(), StoreError>;

    fn update(&self, anomaly: &AnomalyDetection) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<AnomalyDetection>, StoreError>;
}

/// A memoizing cache: return the value stored under `key` if it is younger
/// than `ttl`, otherwise run `compute`, remember its result and return it.
/// Compute failures are never cached.
pub trait Cache<V: Clone>: Send + Sync {
    fn get_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        compute: &mut dyn FnMut() -> Result<V, StoreError>,
    ) -> Result<V, StoreError>;
}
