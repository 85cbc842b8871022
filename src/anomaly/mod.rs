pub mod detector;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::pattern::Severity;

/// What kind of deviation a detection describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Spike,
    VolumeSpike,
    VolumeDrop,
    PatternSpike,
    NewCriticalPattern,
}

impl AnomalyType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyType::Spike => "spike",
            AnomalyType::VolumeSpike => "volume_spike",
            AnomalyType::VolumeDrop => "volume_drop",
            AnomalyType::PatternSpike => "pattern_spike",
            AnomalyType::NewCriticalPattern => "new_critical_pattern",
        }
    }
}

/// Lifecycle of an anomaly record. Detections start `Active`; the detector
/// never closes them, only an operator does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyStatus {
    Active,
    Resolved,
    Ignored,
}

/// One detected deviation from baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetection {
    pub id: Uuid,
    pub anomaly_type: AnomalyType,
    /// Free-form metric identifier, e.g. `error_rate_critical` or
    /// `total_log_volume`.
    pub metric: String,
    pub baseline_value: f64,
    pub detected_value: f64,
    pub deviation_score: f64,
    pub detection_time: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    pub status: AnomalyStatus,
}

impl AnomalyDetection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        anomaly_type: AnomalyType,
        metric: String,
        baseline_value: f64,
        detected_value: f64,
        deviation_score: f64,
        detection_time: DateTime<Utc>,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        metadata: HashMap<String, String>,
    ) -> Self {
        AnomalyDetection {
            id: Uuid::new_v4(),
            anomaly_type,
            metric,
            baseline_value,
            detected_value,
            deviation_score,
            detection_time,
            period_start,
            period_end,
            metadata,
            status: AnomalyStatus::Active,
        }
    }

    /// Refresh an ongoing detection in place: new value, score and time,
    /// merged metadata. Used instead of inserting a duplicate row while the
    /// anomaly is still active within the dedup window.
    pub fn refresh(
        &mut self,
        detected_value: f64,
        deviation_score: f64,
        detection_time: DateTime<Utc>,
        metadata: HashMap<String, String>,
    ) {
        self.detected_value = detected_value;
        self.deviation_score = deviation_score;
        self.detection_time = detection_time;
        self.metadata.extend(metadata);
    }

    /// Derived severity bucket; not persisted.
    pub fn severity(&self) -> Severity {
        if self.deviation_score >= 5.0 {
            Severity::Critical
        } else if self.deviation_score >= 3.0 {
            Severity::High
        } else if self.deviation_score >= 2.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Percent change against the baseline; 100% when there was no baseline
    /// but something was detected.
    pub fn change_percentage(&self) -> f64 {
        if self.baseline_value == 0.0 {
            return if self.detected_value > 0.0 { 100.0 } else { 0.0 };
        }
        (self.detected_value - self.baseline_value) / self.baseline_value * 100.0
    }

    /// One-line human description for reports.
    pub fn describe(&self) -> String {
        let change_type = if self.detected_value > self.baseline_value {
            "increase"
        } else {
            "decrease"
        };
        format!(
            "{} anomaly detected: {} {} by {:.1}% (from {:.2} to {:.2})",
            self.anomaly_type.as_str(),
            self.metric,
            change_type,
            self.change_percentage().abs(),
            self.baseline_value,
            self.detected_value
        )
    }

    /// Operator action: close the anomaly as handled. Terminal.
    pub fn mark_resolved(&mut self) {
        self.status = AnomalyStatus::Resolved;
    }

    /// Operator action: close the anomaly as noise. Terminal.
    pub fn mark_ignored(&mut self) {
        self.status = AnomalyStatus::Ignored;
    }
}
