//! Baseline-driven anomaly detection over stored entries and patterns.
//!
//! One detection cycle runs four independent checks: per-level rate spikes,
//! per-pattern spikes, total volume spikes/drops and newly appearing critical
//! patterns. Baselines are trailing-window means memoized through the
//! injected cache, because cycles run far more often than baselines change.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info};

use crate::anomaly::{AnomalyDetection, AnomalyStatus, AnomalyType};
use crate::error::AnalyzerError;
use crate::parser::entry::LogLevel;
use crate::pattern::Severity;
use crate::store::{
    AnomalyStore, Cache, EntryFilter, EntryStore, PatternFilter, PatternStore, StoreError,
};

// Asymmetric drop rule: small baselines never trigger drops.
const VOLUME_DROP_RATIO: f64 = 0.2;
const VOLUME_DROP_MIN_BASELINE: f64 = 10.0;

/// Tunables for anomaly detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub enabled: bool,
    /// Current-to-baseline ratio at which a spike is flagged.
    pub spike_threshold: f64,
    /// Length of the trailing baseline window.
    pub minimum_baseline_hours: i64,
    /// Detection cadence; also the dedup window for re-triggered anomalies,
    /// in seconds.
    pub check_interval_secs: i64,
    /// TTL for level and volume baselines.
    pub baseline_ttl_secs: u64,
    /// TTL for per-pattern baselines, shorter because patterns churn.
    pub pattern_baseline_ttl_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            enabled: true,
            spike_threshold: 5.0,
            minimum_baseline_hours: 24,
            check_interval_secs: 300,
            baseline_ttl_secs: 3600,
            pattern_baseline_ttl_secs: 1800,
        }
    }
}

/// Counts over the anomaly store for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyStatistics {
    pub total: u64,
    pub active: u64,
    pub resolved: u64,
    pub ignored: u64,
    pub by_type: HashMap<String, u64>,
}

pub struct AnomalyDetector {
    entries: Arc<dyn EntryStore>,
    patterns: Arc<dyn PatternStore>,
    anomalies: Arc<dyn AnomalyStore>,
    baselines: Arc<dyn Cache<f64>>,
    config: DetectorConfig,
}

impl AnomalyDetector {
    pub fn new(
        entries: Arc<dyn EntryStore>,
        patterns: Arc<dyn PatternStore>,
        anomalies: Arc<dyn AnomalyStore>,
        baselines: Arc<dyn Cache<f64>>,
        config: DetectorConfig,
    ) -> Self {
        AnomalyDetector {
            entries,
            patterns,
            anomalies,
            baselines,
            config,
        }
    }

    /// Run one detection cycle at `now` and return the anomalies that were
    /// created or refreshed. Safe to re-run: an anomaly re-detected within
    /// the check interval updates the existing active record in place.
    pub fn run(&self, now: DateTime<Utc>) -> Result<Vec<AnomalyDetection>, AnalyzerError> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }

        let mut found = self.detect_rate_spikes(now)?;
        found.extend(self.detect_pattern_spikes(now)?);
        found.extend(self.detect_volume_anomalies(now)?);
        found.extend(self.detect_new_critical_patterns(now)?);

        info!(anomalies = found.len(), "detection cycle complete");
        Ok(found)
    }

    /// Check 1: the current hour's rate per elevated level against that
    /// level's trailing baseline.
    fn detect_rate_spikes(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AnomalyDetection>, AnalyzerError> {
        let hour_start = hour_floor(now);
        let hour_end = hour_start + Duration::hours(1);
        let mut found = Vec::new();

        for level in LogLevel::ELEVATED {
            let current = self.entry_rate(Some(level), hour_start, hour_end)?;
            let key = format!(
                "baseline_error_rate_{}_{}",
                level.as_str(),
                hour_start.format("%Y-%m-%d-%H")
            );
            let baseline = self.baselines.get_or_compute(
                &key,
                StdDuration::from_secs(self.config.baseline_ttl_secs),
                &mut || self.trailing_baseline(Some(level), hour_start),
            )?;

            if baseline > 0.0 && current / baseline >= self.config.spike_threshold {
                let metadata = HashMap::from([
                    ("level".to_string(), level.as_str().to_string()),
                    (
                        "threshold_multiplier".to_string(),
                        self.config.spike_threshold.to_string(),
                    ),
                ]);
                found.push(self.upsert(AnomalyDetection::new(
                    AnomalyType::Spike,
                    format!("error_rate_{}", level.as_str()),
                    baseline,
                    current,
                    current / baseline,
                    now,
                    hour_start,
                    hour_end,
                    metadata,
                ), now)?);
            }
        }

        Ok(found)
    }

    /// Check 2: every pattern active in the last hour against its own
    /// trailing baseline.
    fn detect_pattern_spikes(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AnomalyDetection>, AnalyzerError> {
        let active = self.patterns.find_matching(&PatternFilter {
            last_seen_after: Some(now - Duration::hours(1)),
            ..Default::default()
        })?;
        let mut found = Vec::new();

        for pattern in active {
            let current = self.pattern_rate(&pattern.pattern_hash, now - Duration::hours(1), now)?;
            let key = format!("baseline_pattern_rate_{}", pattern.pattern_hash);
            let baseline = self.baselines.get_or_compute(
                &key,
                StdDuration::from_secs(self.config.pattern_baseline_ttl_secs),
                &mut || self.pattern_baseline(&pattern.pattern_hash, now),
            )?;

            if baseline > 0.0 && current / baseline >= self.config.spike_threshold {
                let short_hash: String = pattern.pattern_hash.chars().take(12).collect();
                let metadata = HashMap::from([
                    ("pattern_hash".to_string(), pattern.pattern_hash.clone()),
                    ("error_type".to_string(), pattern.error_type.clone()),
                    (
                        "severity".to_string(),
                        pattern.severity.as_str().to_string(),
                    ),
                ]);
                found.push(self.upsert(AnomalyDetection::new(
                    AnomalyType::PatternSpike,
                    format!("pattern_{short_hash}"),
                    baseline,
                    current,
                    current / baseline,
                    now,
                    now - Duration::hours(1),
                    now,
                    metadata,
                ), now)?);
            }
        }

        Ok(found)
    }

    /// Check 3: total entry volume for the current hour, spike or drop.
    fn detect_volume_anomalies(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AnomalyDetection>, AnalyzerError> {
        let hour_start = hour_floor(now);
        let hour_end = hour_start + Duration::hours(1);
        let mut found = Vec::new();

        let current = self.entry_rate(None, hour_start, hour_end)?;
        let key = format!("baseline_log_volume_{}", hour_start.format("%Y-%m-%d-%H"));
        let baseline = self.baselines.get_or_compute(
            &key,
            StdDuration::from_secs(self.config.baseline_ttl_secs),
            &mut || self.trailing_baseline(None, hour_start),
        )?;

        if baseline > 0.0 {
            let ratio = current / baseline;
            if ratio >= self.config.spike_threshold {
                let metadata = HashMap::from([(
                    "threshold_multiplier".to_string(),
                    self.config.spike_threshold.to_string(),
                )]);
                found.push(self.upsert(AnomalyDetection::new(
                    AnomalyType::VolumeSpike,
                    "total_log_volume".to_string(),
                    baseline,
                    current,
                    ratio,
                    now,
                    hour_start,
                    hour_end,
                    metadata,
                ), now)?);
            } else if ratio <= VOLUME_DROP_RATIO && baseline > VOLUME_DROP_MIN_BASELINE {
                let metadata = HashMap::from([(
                    "drop_threshold".to_string(),
                    VOLUME_DROP_RATIO.to_string(),
                )]);
                found.push(self.upsert(AnomalyDetection::new(
                    AnomalyType::VolumeDrop,
                    "total_log_volume".to_string(),
                    baseline,
                    current,
                    baseline / current.max(1.0),
                    now,
                    hour_start,
                    hour_end,
                    metadata,
                ), now)?);
            }
        }

        Ok(found)
    }

    /// Check 4: a critical pattern first seen within the last hour is an
    /// anomaly in itself.
    fn detect_new_critical_patterns(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AnomalyDetection>, AnalyzerError> {
        let fresh = self.patterns.find_matching(&PatternFilter {
            severity: Some(Severity::Critical),
            first_seen_after: Some(now - Duration::hours(1)),
            ..Default::default()
        })?;
        let mut found = Vec::new();

        for pattern in fresh {
            let occurrences = pattern.occurrence_count as f64;
            let metadata = HashMap::from([
                ("pattern_hash".to_string(), pattern.pattern_hash.clone()),
                ("error_type".to_string(), pattern.error_type.clone()),
                (
                    "severity".to_string(),
                    pattern.severity.as_str().to_string(),
                ),
            ]);
            found.push(self.upsert(AnomalyDetection::new(
                AnomalyType::NewCriticalPattern,
                format!("new_pattern_{}", pattern.error_type),
                0.0,
                occurrences,
                occurrences,
                now,
                pattern.first_seen,
                pattern.last_seen,
                metadata,
            ), now)?);
        }

        Ok(found)
    }

    /// Update the matching active anomaly when one was already detected
    /// within the check interval, insert otherwise.
    ///
    /// The dedup window is `check_interval_secs` interpreted as seconds; see
    /// DESIGN.md for the resolution of the seconds/minutes ambiguity.
    fn upsert(
        &self,
        candidate: AnomalyDetection,
        now: DateTime<Utc>,
    ) -> Result<AnomalyDetection, StoreError> {
        let window_start = now - Duration::seconds(self.config.check_interval_secs);

        if let Some(mut existing) =
            self.anomalies
                .find_active(candidate.anomaly_type, &candidate.metric, window_start)?
        {
            existing.refresh(
                candidate.detected_value,
                candidate.deviation_score,
                candidate.detection_time,
                candidate.metadata,
            );
            self.anomalies.update(&existing)?;
            debug!(metric = %existing.metric, "refreshed active anomaly");
            return Ok(existing);
        }

        self.anomalies.insert(&candidate)?;
        debug!(
            metric = %candidate.metric,
            anomaly_type = candidate.anomaly_type.as_str(),
            score = candidate.deviation_score,
            "recorded new anomaly"
        );
        Ok(candidate)
    }

    /// Entries per hour for one level (or all levels) in `[start, end)`.
    fn entry_rate(
        &self,
        level: Option<LogLevel>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let count = self.entries.count(&EntryFilter {
            level,
            from: Some(start),
            to: Some(end),
            ..Default::default()
        })?;
        let hours = (end - start).num_hours();
        Ok(if hours > 0 {
            count as f64 / hours as f64
        } else {
            count as f64
        })
    }

    /// Mean hourly rate over `[hour_start - baseline_hours, hour_start - 1h)`.
    fn trailing_baseline(
        &self,
        level: Option<LogLevel>,
        hour_start: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let start = hour_start - Duration::hours(self.config.minimum_baseline_hours);
        let end = hour_start - Duration::hours(1);
        if start >= end {
            return Ok(0.0);
        }
        self.entry_rate(level, start, end)
    }

    fn pattern_rate(
        &self,
        hash: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let count = self.entries.count(&EntryFilter {
            pattern_hash: Some(hash.to_string()),
            from: Some(start),
            to: Some(end),
            ..Default::default()
        })?;
        let hours = (end - start).num_hours();
        Ok(if hours > 0 {
            count as f64 / hours as f64
        } else {
            count as f64
        })
    }

    fn pattern_baseline(&self, hash: &str, now: DateTime<Utc>) -> Result<f64, StoreError> {
        let end = now - Duration::hours(1);
        let start = end - Duration::hours(self.config.minimum_baseline_hours);
        let count = self.entries.count(&EntryFilter {
            pattern_hash: Some(hash.to_string()),
            from: Some(start),
            to: Some(end),
            ..Default::default()
        })?;
        let hours = (end - start).num_hours();
        Ok(if hours > 0 {
            count as f64 / hours as f64
        } else {
            0.0
        })
    }

    /// Counts by status and type over the whole anomaly store.
    pub fn statistics(&self) -> Result<AnomalyStatistics, AnalyzerError> {
        let all = self.anomalies.list()?;
        let mut stats = AnomalyStatistics {
            total: all.len() as u64,
            active: 0,
            resolved: 0,
            ignored: 0,
            by_type: HashMap::new(),
        };

        for anomaly in &all {
            match anomaly.status {
                AnomalyStatus::Active => stats.active += 1,
                AnomalyStatus::Resolved => stats.resolved += 1,
                AnomalyStatus::Ignored => stats.ignored += 1,
            }
            *stats
                .by_type
                .entry(anomaly.anomaly_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        Ok(stats)
    }
}

fn hour_floor(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::hours(1)).unwrap_or(t)
}
