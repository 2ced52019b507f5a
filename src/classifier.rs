//! Health status classification
//!
//! Maps the current reading plus a short history to a status tier. Rules are
//! evaluated most severe first. Escalation is debounced: an abnormal tier must
//! persist for a minimum number of consecutive readings (or a minimum span of
//! reading time) before it is reported. Unambiguous triggers, a fall flag or
//! severe desaturation, escalate immediately.

use serde::{Deserialize, Serialize};

use crate::config::{ClassifierConfig, VitalThresholds};
use crate::types::{AlertKind, HealthStatus, Reading};

/// One abnormal vital sign found in a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: AlertKind,
    /// Tier of this finding on its own (WARNING or CRITICAL)
    pub tier: HealthStatus,
    /// Whether this cause has itself outlasted the debounce
    pub sustained: bool,
}

/// Classifier output for one reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Debounced status tier
    pub status: HealthStatus,
    /// Findings of the current reading, each with its own debounce verdict
    pub findings: Vec<Finding>,
    /// Set when the status escalated without debounce
    pub immediate: bool,
}

impl Classification {
    /// Tier of the current reading alone, ignoring the debounce
    pub fn raw_tier(&self) -> HealthStatus {
        self.findings
            .iter()
            .map(|f| f.tier)
            .max()
            .unwrap_or(HealthStatus::Normal)
    }
}

/// Pure status classifier
#[derive(Debug, Clone, Default)]
pub struct StatusClassifier {
    thresholds: VitalThresholds,
    debounce: ClassifierConfig,
}

impl StatusClassifier {
    pub fn new(thresholds: VitalThresholds, debounce: ClassifierConfig) -> Self {
        Self {
            thresholds,
            debounce,
        }
    }

    /// Classify `current` given the previous readings, oldest first.
    pub fn classify(&self, current: &Reading, history: &[Reading]) -> Classification {
        let mut findings = self.findings(current);
        for finding in &mut findings {
            finding.sustained = self.is_immediate_cause(finding.kind, current)
                || self.cause_persisted(finding.kind, current, history);
        }

        if self.is_immediate(current) {
            return Classification {
                status: HealthStatus::Critical,
                findings,
                immediate: true,
            };
        }

        let raw = findings
            .iter()
            .map(|f| f.tier)
            .max()
            .unwrap_or(HealthStatus::Normal);

        let status = [HealthStatus::Critical, HealthStatus::Warning]
            .into_iter()
            .filter(|tier| raw >= *tier)
            .find(|tier| self.persisted(*tier, current, history))
            .unwrap_or(HealthStatus::Normal);

        Classification {
            status,
            findings,
            immediate: false,
        }
    }

    /// Tier of a single reading, no debounce
    pub fn tier_of(&self, reading: &Reading) -> HealthStatus {
        self.findings(reading)
            .iter()
            .map(|f| f.tier)
            .max()
            .unwrap_or(HealthStatus::Normal)
    }

    /// Abnormal vital signs of a single reading, most severe rules first
    pub fn findings(&self, reading: &Reading) -> Vec<Finding> {
        let t = &self.thresholds;
        let mut findings = Vec::new();

        let hr = reading.heart_rate;
        if hr > t.heart_rate_critical_high {
            findings.push(critical(AlertKind::HeartRateHigh));
        } else if hr < t.heart_rate_critical_low {
            findings.push(critical(AlertKind::HeartRateLow));
        } else if hr > t.heart_rate_warning_high {
            findings.push(warning(AlertKind::HeartRateHigh));
        } else if hr < t.heart_rate_warning_low {
            findings.push(warning(AlertKind::HeartRateLow));
        }

        if let Some(temp) = reading.temperature {
            if temp > t.temperature_critical_high {
                findings.push(critical(AlertKind::TempHigh));
            } else if temp < t.temperature_critical_low {
                findings.push(critical(AlertKind::TempLow));
            } else if temp > t.temperature_warning_high {
                findings.push(warning(AlertKind::TempHigh));
            } else if temp < t.temperature_warning_low {
                findings.push(warning(AlertKind::TempLow));
            }
        }

        if let Some(spo2) = reading.oxygen_saturation {
            if spo2 < t.oxygen_critical_low {
                findings.push(critical(AlertKind::OxygenLow));
            }
        }

        if let Some(systolic) = reading.systolic {
            if systolic > t.systolic_warning_high {
                findings.push(warning(AlertKind::BloodPressureHigh));
            }
        }

        if reading.fall_detected {
            findings.push(critical(AlertKind::FallDetected));
        }

        findings
    }

    fn is_immediate(&self, reading: &Reading) -> bool {
        reading.fall_detected || self.is_immediate_cause(AlertKind::OxygenLow, reading)
    }

    fn is_immediate_cause(&self, kind: AlertKind, reading: &Reading) -> bool {
        match kind {
            AlertKind::FallDetected => reading.fall_detected,
            AlertKind::OxygenLow => reading
                .oxygen_saturation
                .is_some_and(|spo2| spo2 < self.thresholds.oxygen_immediate_low),
            _ => false,
        }
    }

    /// Whether readings at or above `tier` have persisted long enough,
    /// counting back from `current` through consecutive history entries.
    fn persisted(&self, tier: HealthStatus, current: &Reading, history: &[Reading]) -> bool {
        let mut run = 1usize;
        let mut run_start = current.timestamp;

        for previous in history.iter().rev() {
            if self.tier_of(previous) < tier {
                break;
            }
            run += 1;
            run_start = previous.timestamp;
        }

        self.long_enough(run, current.timestamp - run_start)
    }

    /// Same rule as [`Self::persisted`], applied to one cause regardless of tier
    fn cause_persisted(&self, kind: AlertKind, current: &Reading, history: &[Reading]) -> bool {
        let mut run = 1usize;
        let mut run_start = current.timestamp;

        for previous in history.iter().rev() {
            if !self.findings(previous).iter().any(|f| f.kind == kind) {
                break;
            }
            run += 1;
            run_start = previous.timestamp;
        }

        self.long_enough(run, current.timestamp - run_start)
    }

    fn long_enough(&self, run: usize, span: chrono::Duration) -> bool {
        run >= self.debounce.min_consecutive || span >= self.debounce.min_persist()
    }
}

fn critical(kind: AlertKind) -> Finding {
    Finding {
        kind,
        tier: HealthStatus::Critical,
        sustained: false,
    }
}

fn warning(kind: AlertKind) -> Finding {
    Finding {
        kind,
        tier: HealthStatus::Warning,
        sustained: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn reading(secs: i64, heart_rate: f64) -> Reading {
        Reading {
            patient_id: "p-1".to_string(),
            timestamp: at(secs),
            heart_rate,
            temperature: Some(36.8),
            oxygen_saturation: Some(98.0),
            systolic: None,
            diastolic: None,
            battery_level: None,
            location: None,
            fall_detected: false,
            suspect: false,
        }
    }

    fn classifier() -> StatusClassifier {
        StatusClassifier::default()
    }

    #[test]
    fn test_normal_reading() {
        let c = classifier().classify(&reading(0, 72.0), &[]);
        assert_eq!(c.status, HealthStatus::Normal);
        assert!(c.findings.is_empty());
    }

    #[test]
    fn test_single_noisy_sample_does_not_escalate() {
        let history = vec![reading(0, 72.0), reading(5, 74.0)];

        let c = classifier().classify(&reading(10, 61.0), &history);
        assert_eq!(c.status, HealthStatus::Normal);

        let c = classifier().classify(&reading(10, 58.0), &history);
        assert_eq!(c.status, HealthStatus::Normal);
        assert_eq!(c.raw_tier(), HealthStatus::Warning);
    }

    #[test]
    fn test_two_consecutive_warning_samples_escalate() {
        let history = vec![reading(0, 72.0), reading(5, 105.0)];
        let c = classifier().classify(&reading(10, 108.0), &history);
        assert_eq!(c.status, HealthStatus::Warning);
        assert_eq!(
            c.findings,
            vec![Finding {
                kind: AlertKind::HeartRateHigh,
                tier: HealthStatus::Warning,
                sustained: true,
            }]
        );
    }

    #[test]
    fn test_each_cause_is_debounced_on_its_own() {
        let hot = |secs, hr| {
            let mut r = reading(secs, hr);
            r.temperature = Some(40.2);
            r
        };
        let history = vec![reading(0, 142.0), reading(5, 145.0)];

        let c = classifier().classify(&hot(10, 145.0), &history);
        assert_eq!(c.status, HealthStatus::Critical);
        let sustained: Vec<(AlertKind, bool)> =
            c.findings.iter().map(|f| (f.kind, f.sustained)).collect();
        assert_eq!(
            sustained,
            vec![(AlertKind::HeartRateHigh, true), (AlertKind::TempHigh, false)]
        );

        let history = vec![reading(0, 142.0), reading(5, 145.0), hot(10, 145.0)];
        let c = classifier().classify(&hot(15, 145.0), &history);
        assert!(c.findings.iter().all(|f| f.sustained));
    }

    #[test]
    fn test_critical_sample_after_warning_run_reports_warning() {
        let history = vec![reading(0, 105.0)];
        let c = classifier().classify(&reading(5, 140.0), &history);
        assert_eq!(c.status, HealthStatus::Warning);

        let history = vec![reading(0, 105.0), reading(5, 140.0)];
        let c = classifier().classify(&reading(10, 142.0), &history);
        assert_eq!(c.status, HealthStatus::Critical);
    }

    #[test]
    fn test_elapsed_time_satisfies_debounce() {
        let strict = StatusClassifier::new(
            VitalThresholds::default(),
            ClassifierConfig {
                history_window: 5,
                min_consecutive: 4,
                min_persist_secs: 10,
            },
        );

        let history = vec![reading(0, 105.0)];
        assert_eq!(
            strict.classify(&reading(4, 106.0), &history).status,
            HealthStatus::Normal
        );
        assert_eq!(
            strict.classify(&reading(12, 106.0), &history).status,
            HealthStatus::Warning
        );
    }

    #[test]
    fn test_fall_and_severe_hypoxia_escalate_immediately() {
        let mut fall = reading(0, 80.0);
        fall.fall_detected = true;
        let c = classifier().classify(&fall, &[]);
        assert_eq!(c.status, HealthStatus::Critical);
        assert!(c.immediate);
        assert!(c
            .findings
            .iter()
            .any(|f| f.kind == AlertKind::FallDetected && f.sustained));

        let mut hypoxic = reading(0, 80.0);
        hypoxic.oxygen_saturation = Some(78.0);
        let c = classifier().classify(&hypoxic, &[]);
        assert_eq!(c.status, HealthStatus::Critical);
        assert!(c.immediate);

        let mut low = reading(0, 80.0);
        low.oxygen_saturation = Some(86.0);
        let c = classifier().classify(&low, &[]);
        assert_eq!(c.status, HealthStatus::Normal);
        assert!(!c.immediate);
    }

    #[test]
    fn test_bounded_vitals_never_critical() {
        let classifier = classifier();
        let heart_rates = [40.0, 55.0, 72.0, 101.0, 130.0];
        let temps = [35.0, 35.9, 37.0, 37.6, 39.0];
        let oxygen = [90.0, 95.0, 100.0];

        for &hr in &heart_rates {
            for &temp in &temps {
                for &spo2 in &oxygen {
                    let make = |secs| {
                        let mut r = reading(secs, hr);
                        r.temperature = Some(temp);
                        r.oxygen_saturation = Some(spo2);
                        r.systolic = Some(150.0);
                        r
                    };
                    let history: Vec<Reading> = (0..5).map(|i| make(i * 5)).collect();
                    let status = classifier.classify(&make(25), &history).status;
                    assert!(
                        status == HealthStatus::Normal || status == HealthStatus::Warning,
                        "hr={hr} temp={temp} spo2={spo2} gave {status}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_findings_cover_each_vital() {
        let mut r = reading(0, 35.0);
        r.temperature = Some(39.5);
        r.oxygen_saturation = Some(88.0);
        r.systolic = Some(150.0);

        let kinds: Vec<AlertKind> = classifier().findings(&r).iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::HeartRateLow,
                AlertKind::TempHigh,
                AlertKind::OxygenLow,
                AlertKind::BloodPressureHigh
            ]
        );
    }
}
