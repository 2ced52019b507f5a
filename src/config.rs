//! Engine policy configuration
//!
//! Every threshold and debounce window used by the engine lives here. The
//! defaults reproduce the stock alerting heuristics; they are policy, not
//! physiology, and facilities are expected to tune them.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::TriageError;

/// Default number of previous readings kept per patient
pub const DEFAULT_HISTORY_WINDOW: usize = 5;

/// Vital-sign thresholds used by the status classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalThresholds {
    pub heart_rate_critical_high: f64,
    pub heart_rate_critical_low: f64,
    pub heart_rate_warning_high: f64,
    pub heart_rate_warning_low: f64,
    pub temperature_critical_high: f64,
    pub temperature_critical_low: f64,
    pub temperature_warning_high: f64,
    pub temperature_warning_low: f64,
    /// SpO2 below this is CRITICAL (debounced)
    pub oxygen_critical_low: f64,
    /// SpO2 below this is CRITICAL immediately, without debounce
    pub oxygen_immediate_low: f64,
    pub systolic_warning_high: f64,
}

impl Default for VitalThresholds {
    fn default() -> Self {
        Self {
            heart_rate_critical_high: 130.0,
            heart_rate_critical_low: 40.0,
            heart_rate_warning_high: 100.0,
            heart_rate_warning_low: 60.0,
            temperature_critical_high: 39.0,
            temperature_critical_low: 35.0,
            temperature_warning_high: 37.5,
            temperature_warning_low: 36.0,
            oxygen_critical_low: 90.0,
            oxygen_immediate_low: 80.0,
            systolic_warning_high: 140.0,
        }
    }
}

/// Escalation debounce for the status classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Previous readings kept per patient (N)
    pub history_window: usize,
    /// Consecutive abnormal readings required to escalate
    pub min_consecutive: usize,
    /// Elapsed reading time that also satisfies the escalation debounce
    pub min_persist_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            min_consecutive: 2,
            min_persist_secs: 10,
        }
    }
}

impl ClassifierConfig {
    pub fn min_persist(&self) -> Duration {
        secs(self.min_persist_secs)
    }
}

/// Telemetry liveness timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Silence after which the stream is DEGRADED
    pub grace_period_secs: u64,
    /// Silence after which the stream is DISCONNECTED
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 15,
            timeout_secs: 60,
        }
    }
}

impl ConnectionConfig {
    pub fn grace_period(&self) -> Duration {
        secs(self.grace_period_secs)
    }

    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }
}

/// Alert lifecycle policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Sustained NORMAL time required before clinical alerts auto-resolve
    pub clear_debounce_secs: u64,
    /// Battery percentage below which BATTERY_LOW opens
    pub battery_low_pct: f64,
    /// Resolved alerts remembered per patient for lookups
    pub resolved_history: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            clear_debounce_secs: 30,
            battery_low_pct: 15.0,
            resolved_history: 64,
        }
    }
}

impl AlertConfig {
    pub fn clear_debounce(&self) -> Duration {
        secs(self.clear_debounce_secs)
    }
}

/// Facility-side aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageSettings {
    /// Resolved alert ids the aggregator can still route commands for
    pub resolved_retention: usize,
    /// Capacity of the alert event broadcast channel
    pub event_capacity: usize,
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            resolved_retention: 1024,
            event_capacity: 1024,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub thresholds: VitalThresholds,
    pub classifier: ClassifierConfig,
    pub connection: ConnectionConfig,
    pub alerts: AlertConfig,
    pub triage: TriageSettings,
}

impl TriageConfig {
    /// Parse and validate a JSON policy document
    pub fn from_json(json: &str) -> Result<Self, TriageError> {
        let config: TriageConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON policy file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TriageError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| TriageError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, TriageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject internally inconsistent policy
    pub fn validate(&self) -> Result<(), TriageError> {
        let t = &self.thresholds;
        if t.heart_rate_warning_high > t.heart_rate_critical_high
            || t.heart_rate_warning_low < t.heart_rate_critical_low
        {
            return Err(TriageError::Config(
                "heart rate warning band must sit inside the critical band".into(),
            ));
        }
        if t.temperature_warning_high > t.temperature_critical_high
            || t.temperature_warning_low < t.temperature_critical_low
        {
            return Err(TriageError::Config(
                "temperature warning band must sit inside the critical band".into(),
            ));
        }
        if t.oxygen_immediate_low > t.oxygen_critical_low {
            return Err(TriageError::Config(
                "oxygen_immediate_low must not exceed oxygen_critical_low".into(),
            ));
        }
        if self.classifier.history_window == 0 || self.classifier.min_consecutive == 0 {
            return Err(TriageError::Config(
                "history_window and min_consecutive must be at least 1".into(),
            ));
        }
        if self.connection.timeout_secs < self.connection.grace_period_secs {
            return Err(TriageError::Config(
                "connection timeout must not be shorter than the grace period".into(),
            ));
        }
        if self.triage.event_capacity == 0 {
            return Err(TriageError::Config("event_capacity must be at least 1".into()));
        }
        if self.triage.resolved_retention == 0 {
            // Owners of resolved alerts guard against late re-delivery
            return Err(TriageError::Config("resolved_retention must be at least 1".into()));
        }
        Ok(())
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}
