//! Clusters structured entries into long-lived error patterns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::debug;

use crate::error::AnalyzerError;
use crate::parser::entry::LogEntry;
use crate::pattern::similarity::message_similarity;
use crate::pattern::{ErrorPattern, Severity, Trend};
use crate::store::{Cache, EntryFilter, EntryStore, PatternFilter, PatternStore, StoreError};

/// Tunables for pattern recognition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum blended similarity for an entry to join an existing pattern.
    pub similarity_threshold: f64,
    /// Patterns below this count are left out of group reports.
    pub min_occurrences: u64,
    /// Only patterns seen this recently are fuzzy-match candidates.
    pub time_window_secs: i64,
    /// How long a fuzzy-candidate set may be served from cache.
    pub candidate_ttl_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            similarity_threshold: 0.8,
            min_occurrences: 3,
            time_window_secs: 3600,
            candidate_ttl_secs: 300,
        }
    }
}

/// Outcome of classifying one entry.
#[derive(Debug, Clone)]
pub struct Classification {
    pub pattern: ErrorPattern,
    /// True when no existing pattern matched and a new one was created.
    pub created: bool,
}

/// Patterns similar to a group leader, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PatternGroup {
    /// Leader first, then the patterns pulled in by similarity to it.
    pub patterns: Vec<ErrorPattern>,
    pub total_occurrences: u64,
    pub average_similarity: f64,
}

/// The pattern clustering engine.
///
/// Classification is a read-then-write sequence against the pattern store;
/// callers that ingest concurrently must serialize `classify` per
/// fingerprint bucket or duplicate patterns can be created for the same
/// fuzzy cluster.
pub struct PatternClassifier {
    patterns: Arc<dyn PatternStore>,
    entries: Arc<dyn EntryStore>,
    candidates: Arc<dyn Cache<Vec<ErrorPattern>>>,
    config: ClassifierConfig,
}

impl PatternClassifier {
    pub fn new(
        patterns: Arc<dyn PatternStore>,
        entries: Arc<dyn EntryStore>,
        candidates: Arc<dyn Cache<Vec<ErrorPattern>>>,
        config: ClassifierConfig,
    ) -> Self {
        PatternClassifier {
            patterns,
            entries,
            candidates,
            config,
        }
    }

    /// Assign an entry to an error pattern, creating one if nothing matches.
    ///
    /// Tier 1 is an exact fingerprint lookup, tier 2 a similarity scan over a
    /// cached candidate set, tier 3 creation from the entry itself.
    pub fn classify(
        &self,
        entry: &LogEntry,
        now: DateTime<Utc>,
    ) -> Result<Classification, AnalyzerError> {
        if let Some(mut existing) = self.patterns.find_by_hash(&entry.hash)? {
            existing.record_occurrence(entry.logged_at);
            self.patterns.update(&existing)?;
            return Ok(Classification {
                pattern: existing,
                created: false,
            });
        }

        if let Some(similar) = self.find_similar(entry, now)? {
            // The candidate set may be stale; mutate the stored row, not the
            // cached copy.
            let mut fresh = self
                .patterns
                .find_by_hash(&similar.pattern_hash)?
                .unwrap_or(similar);
            fresh.record_occurrence(entry.logged_at);
            fresh.absorb_context(&entry.context);
            self.patterns.update(&fresh)?;
            return Ok(Classification {
                pattern: fresh,
                created: false,
            });
        }

        let pattern = ErrorPattern::from_entry(entry);
        self.patterns.insert(&pattern)?;
        debug!(
            hash = %pattern.pattern_hash,
            error_type = %pattern.error_type,
            "created new error pattern"
        );
        Ok(Classification {
            pattern,
            created: true,
        })
    }

    /// First recently-active pattern of matching severity (and error type,
    /// when known) whose signature is similar enough to the entry's message.
    fn find_similar(
        &self,
        entry: &LogEntry,
        now: DateTime<Utc>,
    ) -> Result<Option<ErrorPattern>, StoreError> {
        let key = format!(
            "similar_patterns_{}_{}",
            entry.level.as_str(),
            entry.exception_class.as_deref().unwrap_or("none")
        );
        let filter = PatternFilter {
            severity: Some(Severity::from_level(entry.level)),
            error_type: entry.exception_class.clone(),
            last_seen_after: Some(now - Duration::seconds(self.config.time_window_secs)),
            ..Default::default()
        };

        let candidates = self.candidates.get_or_compute(
            &key,
            StdDuration::from_secs(self.config.candidate_ttl_secs),
            &mut || self.patterns.find_matching(&filter),
        )?;

        for candidate in candidates {
            let similarity = message_similarity(&entry.message, &candidate.pattern_signature);
            if similarity >= self.config.similarity_threshold {
                debug!(
                    hash = %candidate.pattern_hash,
                    similarity,
                    "fuzzy-matched entry to existing pattern"
                );
                return Ok(Some(candidate));
            }
        }

        Ok(None)
    }

    /// Trend of one pattern: activity in the trailing 24h against the 24h
    /// before that. A pattern first seen within the trailing day reports as
    /// `New` regardless of the ratio; a resolved one as `Resolved`.
    pub fn pattern_trend(
        &self,
        pattern: &ErrorPattern,
        now: DateTime<Utc>,
    ) -> Result<Trend, AnalyzerError> {
        if pattern.is_new(now) {
            return Ok(Trend::New);
        }
        if pattern.is_resolved {
            return Ok(Trend::Resolved);
        }

        let recent = self.pattern_entry_count(
            &pattern.pattern_hash,
            now - Duration::hours(24),
            now,
        )?;
        let previous = self.pattern_entry_count(
            &pattern.pattern_hash,
            now - Duration::hours(48),
            now - Duration::hours(24),
        )?;

        if previous == 0 {
            return Ok(if recent > 0 {
                Trend::Increasing
            } else {
                Trend::Stable
            });
        }

        let ratio = recent as f64 / previous as f64;
        Ok(if ratio > 1.5 {
            Trend::Increasing
        } else if ratio < 0.5 {
            Trend::Decreasing
        } else {
            Trend::Stable
        })
    }

    /// Trends for every pattern active in the trailing week.
    pub fn trend_report(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(ErrorPattern, Trend)>, AnalyzerError> {
        let active = self.patterns.find_matching(&PatternFilter {
            last_seen_after: Some(now - Duration::days(7)),
            ..Default::default()
        })?;

        let mut report = Vec::with_capacity(active.len());
        for pattern in active {
            let trend = self.pattern_trend(&pattern, now)?;
            report.push((pattern, trend));
        }
        Ok(report)
    }

    /// Greedy similarity grouping of frequent unresolved patterns.
    ///
    /// Each unprocessed pattern seeds a group and pulls in the remaining
    /// unprocessed patterns similar to *it*. Deliberately not a transitive
    /// closure: members are similar to their leader, not necessarily to each
    /// other. Only groups with more than one member are reported.
    pub fn group_similar(&self) -> Result<Vec<PatternGroup>, AnalyzerError> {
        let pool = self.patterns.find_matching(&PatternFilter {
            unresolved_only: true,
            min_occurrences: Some(self.config.min_occurrences),
            ..Default::default()
        })?;

        let mut groups = Vec::new();
        let mut processed = vec![false; pool.len()];

        for leader_idx in 0..pool.len() {
            if processed[leader_idx] {
                continue;
            }
            processed[leader_idx] = true;
            let leader = &pool[leader_idx];
            let mut members = vec![leader.clone()];

            for other_idx in leader_idx + 1..pool.len() {
                if processed[other_idx] {
                    continue;
                }
                let other = &pool[other_idx];
                let similarity =
                    message_similarity(&leader.pattern_signature, &other.pattern_signature);
                if similarity >= self.config.similarity_threshold {
                    members.push(other.clone());
                    processed[other_idx] = true;
                }
            }

            if members.len() > 1 {
                groups.push(PatternGroup {
                    total_occurrences: members.iter().map(|p| p.occurrence_count).sum(),
                    average_similarity: average_pairwise_similarity(&members),
                    patterns: members,
                });
            }
        }

        Ok(groups)
    }

    fn pattern_entry_count(
        &self,
        hash: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.entries.count(&EntryFilter {
            pattern_hash: Some(hash.to_string()),
            from: Some(from),
            to: Some(to),
            ..Default::default()
        })
    }
}

fn average_pairwise_similarity(patterns: &[ErrorPattern]) -> f64 {
    if patterns.len() < 2 {
        return 1.0;
    }

    let mut total = 0.0;
    let mut pairs = 0u32;
    for i in 0..patterns.len() {
        for j in i + 1..patterns.len() {
            total += message_similarity(
                &patterns[i].pattern_signature,
                &patterns[j].pattern_signature,
            );
            pairs += 1;
        }
    }

    total / f64::from(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::entry::LogLevel;
    use crate::parser::fingerprint;
    use crate::store::memory::{MemoryCache, MemoryEntryStore, MemoryPatternStore};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn entry_at(message: &str, level: LogLevel, at: DateTime<Utc>) -> LogEntry {
        LogEntry {
            level,
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

    struct Fixture {
        classifier: PatternClassifier,
        entries: Arc<MemoryEntryStore>,
        now: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let patterns = Arc::new(MemoryPatternStore::new());
        let entries = Arc::new(MemoryEntryStore::new());
        let cache = Arc::new(MemoryCache::<Vec<ErrorPattern>>::new());
        let classifier = PatternClassifier::new(
            patterns,
            entries.clone(),
            cache,
            ClassifierConfig::default(),
        );
        Fixture {
            classifier,
            entries,
            now: Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_exact_tier_is_idempotent_on_fingerprint() {
        let fix = fixture();
        // Different raw text, identical after normalization.
        let a = entry_at(
            "Connection failed to host 10.0.0.5 at 14:02",
            LogLevel::Error,
            fix.now,
        );
        let b = entry_at(
            "Connection failed to host 10.0.0.9 at 14:03",
            LogLevel::Error,
            fix.now + Duration::minutes(1),
        );
        assert_eq!(a.hash, b.hash);

        let first = fix.classifier.classify(&a, fix.now).unwrap();
        assert!(first.created);
        assert_eq!(first.pattern.occurrence_count, 1);

        let second = fix.classifier.classify(&b, fix.now).unwrap();
        assert!(!second.created);
        assert_eq!(second.pattern.pattern_hash, a.hash);
        assert_eq!(second.pattern.occurrence_count, 2);
        assert_eq!(second.pattern.last_seen, b.logged_at);
    }

    // Builds a classifier over a store pre-seeded with one pattern, so the
    // candidate cache is first computed while the seed already exists.
    fn seeded(seed: &LogEntry, entries: Arc<MemoryEntryStore>) -> PatternClassifier {
        let store = MemoryPatternStore::new();
        store.insert(&ErrorPattern::from_entry(seed)).unwrap();
        PatternClassifier::new(
            Arc::new(store),
            entries,
            Arc::new(MemoryCache::<Vec<ErrorPattern>>::new()),
            ClassifierConfig::default(),
        )
    }

    #[test]
    fn test_fuzzy_tier_merges_near_duplicates() {
        let fix = fixture();
        let a = entry_at(
            "failed to refresh oauth token for tenant acme",
            LogLevel::Error,
            fix.now - Duration::minutes(10),
        );
        let b = entry_at(
            "failed to refresh oauth token for tenant globex",
            LogLevel::Error,
            fix.now - Duration::minutes(5),
        );
        assert_ne!(a.hash, b.hash);

        let classifier = seeded(&a, fix.entries.clone());
        let merged = classifier.classify(&b, fix.now).unwrap();
        assert!(!merged.created);
        assert_eq!(merged.pattern.pattern_hash, a.hash);
        assert_eq!(merged.pattern.occurrence_count, 2);
    }

    #[test]
    fn test_fuzzy_match_respects_severity() {
        let fix = fixture();
        let a = entry_at(
            "failed to refresh oauth token for tenant acme",
            LogLevel::Error,
            fix.now - Duration::minutes(10),
        );
        let b = entry_at(
            "failed to refresh oauth token for tenant globex",
            LogLevel::Warning,
            fix.now - Duration::minutes(5),
        );

        fix.classifier.classify(&a, fix.now).unwrap();
        let second = fix.classifier.classify(&b, fix.now).unwrap();
        assert!(second.created, "severity mismatch must not merge");
    }

    #[test]
    fn test_fuzzy_updates_survive_stale_candidate_cache() {
        let fix = fixture();
        let seed = entry_at(
            "failed to refresh oauth token for tenant acme",
            LogLevel::Error,
            fix.now - Duration::minutes(10),
        );
        let classifier = seeded(&seed, fix.entries.clone());

        // The second classification reuses the candidate set cached by the
        // first (which still carries occurrence_count = 1); counts keep
        // accumulating because the store row is re-read before mutation.
        for (i, tenant) in ["globex", "initech"].iter().enumerate() {
            let entry = entry_at(
                &format!("failed to refresh oauth token for tenant {tenant}"),
                LogLevel::Error,
                fix.now - Duration::minutes(8 - i as i64),
            );
            let result = classifier.classify(&entry, fix.now).unwrap();
            assert!(!result.created);
            assert_eq!(result.pattern.occurrence_count, (i as u64) + 2);
        }
    }

    #[test]
    fn test_unmatched_entry_creates_pattern_with_entry_fields() {
        let fix = fixture();
        let mut entry = entry_at(
            "Unhandled TimeoutException contacting billing",
            LogLevel::Critical,
            fix.now,
        );
        entry.exception_class = Some("TimeoutException".to_string());
        entry.context.insert("order".to_string(), "17".to_string());

        let result = fix.classifier.classify(&entry, fix.now).unwrap();
        assert!(result.created);
        let pattern = result.pattern;
        assert_eq!(pattern.error_type, "TimeoutException");
        assert_eq!(pattern.severity, Severity::Critical);
        assert_eq!(pattern.first_seen, entry.logged_at);
        assert_eq!(pattern.last_seen, entry.logged_at);
        assert_eq!(pattern.sample_context.get("order").map(String::as_str), Some("17"));
    }

    #[test]
    fn test_trend_new_overrides_ratio() {
        let fix = fixture();
        let entry = entry_at("fresh problem", LogLevel::Error, fix.now - Duration::hours(1));
        let pattern = fix.classifier.classify(&entry, fix.now).unwrap().pattern;

        let trend = fix.classifier.pattern_trend(&pattern, fix.now).unwrap();
        assert_eq!(trend, Trend::New);
    }

    #[test]
    fn test_trend_increasing_and_decreasing() {
        let fix = fixture();
        let first_seen = fix.now - Duration::days(3);
        let seed = entry_at("recurring issue", LogLevel::Error, first_seen);
        let mut pattern = fix.classifier.classify(&seed, fix.now).unwrap().pattern;

        // Three entries in the trailing day, one in the day before.
        fix.entries.insert(&seed).unwrap();
        let older = entry_at("recurring issue", LogLevel::Error, fix.now - Duration::hours(30));
        fix.entries.insert(&older).unwrap();
        for hours in [2, 5, 9] {
            let recent =
                entry_at("recurring issue", LogLevel::Error, fix.now - Duration::hours(hours));
            fix.entries.insert(&recent).unwrap();
        }

        assert_eq!(
            fix.classifier.pattern_trend(&pattern, fix.now).unwrap(),
            Trend::Increasing
        );

        // Resolved wins over the ratio once the pattern is no longer new.
        pattern.resolve(fix.now);
        assert_eq!(
            fix.classifier.pattern_trend(&pattern, fix.now).unwrap(),
            Trend::Resolved
        );
    }

    #[test]
    fn test_trend_report_covers_only_the_trailing_week() {
        let fix = fixture();
        let store = MemoryPatternStore::new();

        let recent = ErrorPattern::from_entry(&entry_at(
            "seen this morning",
            LogLevel::Error,
            fix.now - Duration::hours(3),
        ));
        let mut dormant = ErrorPattern::from_entry(&entry_at(
            "seen last month",
            LogLevel::Error,
            fix.now - Duration::days(30),
        ));
        dormant.last_seen = fix.now - Duration::days(30);
        store.insert(&recent).unwrap();
        store.insert(&dormant).unwrap();

        let classifier = PatternClassifier::new(
            Arc::new(store),
            fix.entries.clone(),
            Arc::new(MemoryCache::<Vec<ErrorPattern>>::new()),
            ClassifierConfig::default(),
        );

        let report = classifier.trend_report(fix.now).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].0.pattern_signature, "seen this morning");
        assert_eq!(report[0].1, Trend::New);
    }

    #[test]
    fn test_trend_stable_when_quiet() {
        let fix = fixture();
        let seed = entry_at("ancient history", LogLevel::Error, fix.now - Duration::days(5));
        let pattern = fix.classifier.classify(&seed, fix.now).unwrap().pattern;

        assert_eq!(
            fix.classifier.pattern_trend(&pattern, fix.now).unwrap(),
            Trend::Stable
        );
    }

    #[test]
    fn test_group_similar_is_greedy_not_transitive() {
        let fix = fixture();
        let mk = |message: &str, minutes: i64| {
            let entry = entry_at(message, LogLevel::Error, fix.now - Duration::minutes(minutes));
            let mut pattern = ErrorPattern::from_entry(&entry);
            pattern.occurrence_count = 5;
            pattern
        };

        let store = MemoryPatternStore::new();
        store.insert(&mk("failed to refresh oauth token for tenant acme", 1)).unwrap();
        store.insert(&mk("failed to refresh oauth token for tenant globex", 2)).unwrap();
        store.insert(&mk("disk quota exhausted on volume data", 3)).unwrap();

        let classifier = PatternClassifier::new(
            Arc::new(store),
            fix.entries.clone(),
            Arc::new(MemoryCache::<Vec<ErrorPattern>>::new()),
            ClassifierConfig::default(),
        );

        let groups = classifier.group_similar().unwrap();
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.patterns.len(), 2);
        assert_eq!(group.total_occurrences, 10);
        assert!(group.average_similarity >= 0.8);
    }

    #[test]
    fn test_group_similar_skips_infrequent_and_resolved() {
        let fix = fixture();
        let mk = |message: &str, count: u64, resolved: bool| {
            let entry = entry_at(message, LogLevel::Error, fix.now);
            let mut pattern = ErrorPattern::from_entry(&entry);
            pattern.occurrence_count = count;
            if resolved {
                pattern.resolve(fix.now);
            }
            pattern
        };

        let store = MemoryPatternStore::new();
        store.insert(&mk("failed to refresh oauth token for tenant acme", 2, false)).unwrap();
        store.insert(&mk("failed to refresh oauth token for tenant globex", 5, true)).unwrap();
        store.insert(&mk("failed to refresh oauth token for tenant initech", 5, false)).unwrap();

        let classifier = PatternClassifier::new(
            Arc::new(store),
            fix.entries.clone(),
            Arc::new(MemoryCache::<Vec<ErrorPattern>>::new()),
            ClassifierConfig::default(),
        );

        // Only one pattern survives the filters, so nothing groups.
        assert!(classifier.group_similar().unwrap().is_empty());
    }
}
