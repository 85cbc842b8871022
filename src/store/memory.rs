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

//! In-memory store and cache implementations.
//!
//! Back the CLI and serve as test doubles; a deployment with history worth
//! keeping brings its own database-backed implementations of the same traits.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::anomaly::{AnomalyDetection, AnomalyStatus, AnomalyType};
use crate::parser::entry::LogEntry;
use crate::pattern::ErrorPattern;
use crate::store::{
    AnomalyStore, Cache, EntryFilter, EntryStore, PatternFilter, PatternStore, StoreError,
};

fn poisoned(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{what} lock poisoned"))
}

/// Entry rows plus a `(hash, logged_at)` index for idempotent insertion.
#[derive(Default)]
pub struct MemoryEntryStore {
    entries: RwLock<Vec<LogEntry>>,
    seen: RwLock<HashSet<(String, DateTime<Utc>)>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntryStore for MemoryEntryStore {
    fn insert(&self, entry: &LogEntry) -> Result<bool, StoreError> {
        let key = (entry.hash.clone(), entry.logged_at);
        let mut seen = self.seen.write().map_err(|_| poisoned("entry"))?;
        if !seen.insert(key) {
            return Ok(false);
        }
        self.entries
            .write()
            .map_err(|_| poisoned("entry"))?
            .push(entry.clone());
        Ok(true)
    }

    fn count(&self, filter: &EntryFilter) -> Result<u64, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned("entry"))?;
        Ok(entries.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    fn find(&self, filter: &EntryFilter) -> Result<Vec<LogEntry>, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned("entry"))?;
        Ok(entries.iter().filter(|e| filter.matches(e)).cloned().collect())
    }
}

/// Patterns keyed by fingerprint.
#[derive(Default)]
pub struct MemoryPatternStore {
    patterns: RwLock<HashMap<String, ErrorPattern>>,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatternStore for MemoryPatternStore {
    fn find_by_hash(&self, hash: &str) -> Result<Option<ErrorPattern>, StoreError> {
        let patterns = self.patterns.read().map_err(|_| poisoned("pattern"))?;
        Ok(patterns.get(hash).cloned())
    }

    fn find_matching(&self, filter: &PatternFilter) -> Result<Vec<ErrorPattern>, StoreError> {
        let patterns = self.patterns.read().map_err(|_| poisoned("pattern"))?;
        let mut matching: Vec<ErrorPattern> = patterns
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(matching)
    }

    fn insert(&self, pattern: &ErrorPattern) -> Result<(), StoreError> {
        let mut patterns = self.patterns.write().map_err(|_| poisoned("pattern"))?;
        patterns.insert(pattern.pattern_hash.clone(), pattern.clone());
        Ok(())
    }

    fn update(&self, pattern: &ErrorPattern) -> Result<(), StoreError> {
        let mut patterns = self.patterns.write().map_err(|_| poisoned("pattern"))?;
        patterns.insert(pattern.pattern_hash.clone(), pattern.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<ErrorPattern>, StoreError> {
        let patterns = self.patterns.read().map_err(|_| poisoned("pattern"))?;
        Ok(patterns.values().cloned().collect())
    }
}

/// Anomaly rows keyed by record id.
#[derive(Default)]
pub struct MemoryAnomalyStore {
    anomalies: RwLock<Vec<AnomalyDetection>>,
}

impl MemoryAnomalyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnomalyStore for MemoryAnomalyStore {
    fn find_active(
        &self,
        anomaly_type: AnomalyType,
        metric: &str,
        detected_after: DateTime<Utc>,
    ) -> Result<Option<AnomalyDetection>, StoreError> {
        let anomalies = self.anomalies.read().map_err(|_| poisoned("anomaly"))?;
        Ok(anomalies
            .iter()
            .filter(|a| {
                a.status == AnomalyStatus::Active
                    && a.anomaly_type == anomaly_type
                    && a.metric == metric
                    && a.detection_time >= detected_after
            })
            .max_by_key(|a| a.detection_time)
            .cloned())
    }

    fn insert(&self, anomaly: &AnomalyDetection) -> Result<(), StoreError> {
        self.anomalies
            .write()
            .map_err(|_| poisoned("anomaly"))?
            .push(anomaly.clone());
        Ok(())
    }

    fn update(&self, anomaly: &AnomalyDetection) -> Result<(), StoreError> {
        let mut anomalies = self.anomalies.write().map_err(|_| poisoned("anomaly"))?;
        match anomalies.iter_mut().find(|a| a.id == anomaly.id) {
            Some(existing) => {
                *existing = anomaly.clone();
                Ok(())
            }
            None => Err(StoreError::Unavailable(format!(
                "anomaly {} not found for update",
                anomaly.id
            ))),
        }
    }

    fn list(&self) -> Result<Vec<AnomalyDetection>, StoreError> {
        let anomalies = self.anomalies.read().map_err(|_| poisoned("anomaly"))?;
        Ok(anomalies.clone())
    }
}

struct CachedValue<V> {
    computed_at: Instant,
    value: V,
}

/// TTL-expiring memoization. Values are cloned out; the compute closure runs
/// under the lock, which also serializes concurrent computes for one key.
pub struct MemoryCache<V> {
    values: Mutex<HashMap<String, CachedValue<V>>>,
}

impl<V> MemoryCache<V> {
    pub fn new() -> Self {
        MemoryCache {
            values: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send> Cache<V> for MemoryCache<V> {
    fn get_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        compute: &mut dyn FnMut() -> Result<V, StoreError>,
    ) -> Result<V, StoreError> {
        let mut values = self.values.lock().map_err(|_| poisoned("cache"))?;

        if let Some(cached) = values.get(key) {
            if cached.computed_at.elapsed() < ttl {
                return Ok(cached.value.clone());
            }
        }

        let value = compute()?;
        values.insert(
            key.to_string(),
            CachedValue {
                computed_at: Instant::now(),
                value: value.clone(),
            },
        );
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::entry::LogLevel;
    use crate::parser::fingerprint;
    use chrono::TimeZone;

    fn entry(message: &str, at: DateTime<Utc>) -> LogEntry {
        LogEntry {
            level: LogLevel::Error,
            message: message.to_string(),
            context: HashMap::new(),
            channel: "app".to_string(),
            file_path: None,
            line_number: None,
            exception_class: None,
            stack_trace: None,
            hash: fingerprint(message, None, None),
            logged_at: at,
        }
    }

    #[test]
    fn test_entry_insert_is_idempotent_on_hash_and_time() {
        let store = MemoryEntryStore::new();
        let t = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();
        let e = entry("disk full", t);

        assert!(store.insert(&e).unwrap());
        assert!(!store.insert(&e).unwrap());
        // Same fingerprint at a different time is a separate row.
        assert!(store.insert(&entry("disk full", t + chrono::Duration::seconds(1))).unwrap());

        assert_eq!(store.count(&EntryFilter::default()).unwrap(), 2);
    }

    #[test]
    fn test_entry_filters() {
        let store = MemoryEntryStore::new();
        let t = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();
        store.insert(&entry("one", t)).unwrap();
        store.insert(&entry("two", t + chrono::Duration::hours(2))).unwrap();

        let windowed = EntryFilter {
            from: Some(t + chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert_eq!(store.count(&windowed).unwrap(), 1);

        let by_hash = EntryFilter {
            pattern_hash: Some(fingerprint("one", None, None)),
            ..Default::default()
        };
        let found = store.find(&by_hash).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "one");

        let other_channel = EntryFilter {
            channel: Some("queue".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count(&other_channel).unwrap(), 0);
        let by_level = EntryFilter {
            level: Some(LogLevel::Error),
            ..Default::default()
        };
        assert_eq!(store.count(&by_level).unwrap(), 2);
    }

    #[test]
    fn test_pattern_find_matching_sorts_by_last_seen_desc() {
        let store = MemoryPatternStore::new();
        let t = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();

        let older = ErrorPattern::from_entry(&entry("older", t));
        let newer = ErrorPattern::from_entry(&entry("newer", t + chrono::Duration::hours(1)));
        store.insert(&older).unwrap();
        store.insert(&newer).unwrap();

        let all = store.find_matching(&PatternFilter::default()).unwrap();
        assert_eq!(all[0].pattern_signature, "newer");
        assert_eq!(all[1].pattern_signature, "older");
    }

    #[test]
    fn test_anomaly_update_unknown_id_fails() {
        let store = MemoryAnomalyStore::new();
        let t = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap();
        let anomaly = AnomalyDetection::new(
            AnomalyType::Spike,
            "error_rate_error".to_string(),
            1.0,
            6.0,
            6.0,
            t,
            t,
            t,
            HashMap::new(),
        );

        assert!(store.update(&anomaly).is_err());
        store.insert(&anomaly).unwrap();
        assert!(store.update(&anomaly).is_ok());
    }

    #[test]
    fn test_cache_ttl() {
        let cache = MemoryCache::new();
        let mut calls = 0;

        let mut compute = || -> Result<u32, StoreError> {
            calls += 1;
            Ok(calls)
        };

        let hour = Duration::from_secs(3600);
        assert_eq!(cache.get_or_compute("k", hour, &mut compute).unwrap(), 1);
        assert_eq!(cache.get_or_compute("k", hour, &mut compute).unwrap(), 1);
        // Zero TTL forces recomputation.
        assert_eq!(cache.get_or_compute("k", Duration::ZERO, &mut compute).unwrap(), 2);
        // Other keys are independent.
        assert_eq!(cache.get_or_compute("j", hour, &mut compute).unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_cache_does_not_store_failures() {
        let cache: MemoryCache<u32> = MemoryCache::new();
        let mut attempts = 0;

        let mut failing = || -> Result<u32, StoreError> {
            attempts += 1;
            Err(StoreError::Unavailable("db down".to_string()))
        };
        let hour = Duration::from_secs(3600);
        assert!(cache.get_or_compute("k", hour, &mut failing).is_err());

        let mut working = || -> Result<u32, StoreError> { Ok(7) };
        assert_eq!(cache.get_or_compute("k", hour, &mut working).unwrap(), 7);
        assert_eq!(attempts, 1);
    }
}
