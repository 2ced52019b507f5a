//! Per-patient alert lifecycle management
//!
//! Turns classifier output, connection transitions and device battery levels
//! into deduplicated alerts. Each alert kind has at most one open alert per
//! patient; re-triggering refreshes it instead of opening a duplicate. Every
//! mutation, refreshes included, yields an [`AlertEvent`].

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::classifier::Classification;
use crate::config::AlertConfig;
use crate::connection::ConnectionTransition;
use crate::error::TriageError;
use crate::types::{
    Alert, AlertEvent, AlertEventType, AlertId, AlertKind, AlertState, HealthStatus, Reading,
    Resolution, Severity,
};

/// Alert manager for one patient
#[derive(Debug, Clone)]
pub struct AlertManager {
    patient_id: String,
    open: HashMap<AlertKind, Alert>,
    resolved: VecDeque<Alert>,
    /// Kinds closed by hand whose cause has not cleared yet
    suppressed: HashSet<AlertKind>,
    last_status: HealthStatus,
    /// Start of the current uninterrupted NORMAL run
    normal_since: Option<DateTime<Utc>>,
    clear_debounce: Duration,
    battery_low_pct: f64,
    resolved_history: usize,
}

impl AlertManager {
    pub fn new(patient_id: impl Into<String>, config: &AlertConfig) -> Self {
        Self {
            patient_id: patient_id.into(),
            open: HashMap::new(),
            resolved: VecDeque::with_capacity(config.resolved_history),
            suppressed: HashSet::new(),
            last_status: HealthStatus::Unknown,
            normal_since: None,
            clear_debounce: config.clear_debounce(),
            battery_low_pct: config.battery_low_pct,
            resolved_history: config.resolved_history,
        }
    }

    /// Status of the last classification seen
    pub fn last_status(&self) -> HealthStatus {
        self.last_status
    }

    pub fn open_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.open.values()
    }

    pub fn open_alert(&self, kind: AlertKind) -> Option<&Alert> {
        self.open.get(&kind)
    }

    /// Look up an open or recently resolved alert
    pub fn get(&self, alert_id: AlertId) -> Option<&Alert> {
        self.open
            .values()
            .find(|a| a.id == alert_id)
            .or_else(|| self.resolved.iter().find(|a| a.id == alert_id))
    }

    /// React to a new classification.
    ///
    /// While the status is abnormal every sustained cause opens (or refreshes)
    /// its own alert, and a fall always does. A cause closed by hand stays
    /// closed until a reading no longer shows it. Clinical alerts resolve once
    /// every reading has been NORMAL for the clear debounce.
    pub fn on_classification(
        &mut self,
        classification: &Classification,
        reading: &Reading,
    ) -> Vec<AlertEvent> {
        let status = classification.status;
        self.last_status = status;
        self.suppressed.retain(|kind| {
            !kind.is_clinical() || classification.findings.iter().any(|f| f.kind == *kind)
        });
        let mut events = Vec::new();

        if status > HealthStatus::Normal {
            self.normal_since = None;

            for finding in &classification.findings {
                let kind = finding.kind;
                let severity = match kind {
                    AlertKind::FallDetected => Some(Severity::Critical),
                    _ => Severity::from_status(finding.tier.min(status)),
                };
                let Some(severity) = severity else { continue };

                let fresh = finding.sustained && !self.suppressed.contains(&kind);
                if kind == AlertKind::FallDetected || fresh || self.open.contains_key(&kind) {
                    let message = describe(finding.kind, Some(reading));
                    events.extend(self.raise(
                        finding.kind,
                        severity,
                        Some(reading),
                        reading.timestamp,
                        message,
                    ));
                }
            }
        } else if classification.raw_tier() > HealthStatus::Normal {
            // Debounced away, but still not a clean sample
            self.normal_since = None;
        } else if status == HealthStatus::Normal {
            let since = *self.normal_since.get_or_insert(reading.timestamp);
            if reading.timestamp - since >= self.clear_debounce {
                let cleared: Vec<AlertKind> = self
                    .open
                    .keys()
                    .filter(|kind| kind.is_clinical())
                    .copied()
                    .collect();
                for kind in cleared {
                    events.extend(self.close(kind, reading.timestamp, Resolution::Cleared));
                }
            }
        }

        events
    }

    /// React to a connection change: loss raises DEVICE_OFFLINE, recovery
    /// resolves it.
    pub fn on_connection(
        &mut self,
        transition: &ConnectionTransition,
        last_reading: Option<&Reading>,
    ) -> Vec<AlertEvent> {
        if transition.is_loss() {
            let message = describe(AlertKind::DeviceOffline, last_reading);
            self.raise(
                AlertKind::DeviceOffline,
                Severity::High,
                last_reading,
                transition.at,
                message,
            )
            .into_iter()
            .collect()
        } else if transition.is_recovery() {
            self.close(AlertKind::DeviceOffline, transition.at, Resolution::Reconnected)
                .into_iter()
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Track device battery; no level in the reading means no change.
    pub fn on_battery(&mut self, reading: &Reading) -> Vec<AlertEvent> {
        let Some(level) = reading.battery_level else {
            return Vec::new();
        };

        if level < self.battery_low_pct {
            if self.suppressed.contains(&AlertKind::BatteryLow) {
                return Vec::new();
            }
            let message = describe(AlertKind::BatteryLow, Some(reading));
            self.raise(
                AlertKind::BatteryLow,
                Severity::Low,
                Some(reading),
                reading.timestamp,
                message,
            )
            .into_iter()
            .collect()
        } else {
            self.suppressed.remove(&AlertKind::BatteryLow);
            self.close(AlertKind::BatteryLow, reading.timestamp, Resolution::Cleared)
                .into_iter()
                .collect()
        }
    }

    /// Move an ACTIVE alert to RESPONDING.
    ///
    /// Returns `Ok(None)` when the alert is already RESPONDING with the same
    /// responder.
    pub fn dispatch(
        &mut self,
        alert_id: AlertId,
        responder: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>, TriageError> {
        let Some(alert) = self.open.values_mut().find(|a| a.id == alert_id) else {
            return Err(self.closed_or_missing(alert_id));
        };

        if let AlertState::Responding { responder: current, .. } = &alert.state {
            if current == responder {
                return Ok(None);
            }
            return Err(TriageError::invalid_state(
                "alert",
                alert_id,
                format!("already responding by {}", current),
            ));
        }

        alert.state = AlertState::Responding {
            responder: responder.to_string(),
            dispatched_at: now,
        };
        alert.version += 1;
        tracing::info!(
            alert_id = %alert.id,
            patient_id = %alert.patient_id,
            kind = %alert.kind,
            responder,
            "Alert dispatched"
        );
        Ok(Some(AlertEvent::new(AlertEventType::Dispatched, alert)))
    }

    /// Manual override: force an open alert to RESOLVED regardless of vitals.
    pub fn resolve(
        &mut self,
        alert_id: AlertId,
        now: DateTime<Utc>,
    ) -> Result<AlertEvent, TriageError> {
        let kind = self
            .open
            .values()
            .find(|a| a.id == alert_id)
            .map(|a| a.kind)
            .ok_or_else(|| self.closed_or_missing(alert_id))?;

        if kind != AlertKind::DeviceOffline {
            self.suppressed.insert(kind);
        }
        self.close(kind, now, Resolution::Manual)
            .ok_or_else(|| TriageError::not_found("alert", alert_id))
    }

    /// Close every open alert, most recently opened last
    pub fn close_all(&mut self, now: DateTime<Utc>, resolution: Resolution) -> Vec<AlertEvent> {
        let mut kinds: Vec<(DateTime<Utc>, AlertKind)> =
            self.open.values().map(|a| (a.opened_at, a.kind)).collect();
        kinds.sort_by_key(|(opened_at, kind)| (*opened_at, kind.as_str()));
        kinds
            .into_iter()
            .filter_map(|(_, kind)| self.close(kind, now, resolution))
            .collect()
    }

    fn closed_or_missing(&self, alert_id: AlertId) -> TriageError {
        if self.resolved.iter().any(|a| a.id == alert_id) {
            TriageError::invalid_state("alert", alert_id, "already resolved")
        } else {
            TriageError::not_found("alert", alert_id)
        }
    }

    /// Open a new alert for `kind`, or refresh the open one.
    ///
    /// A refresh yields `Escalated` when the severity rose and `Updated`
    /// otherwise.
    fn raise(
        &mut self,
        kind: AlertKind,
        severity: Severity,
        trigger: Option<&Reading>,
        at: DateTime<Utc>,
        message: String,
    ) -> Option<AlertEvent> {
        if let Some(alert) = self.open.get_mut(&kind) {
            alert.updated_at = at;
            alert.triggering_reading = trigger.cloned().or(alert.triggering_reading.take());
            alert.message = message;
            alert.version += 1;

            if severity > alert.severity {
                tracing::info!(
                    alert_id = %alert.id,
                    patient_id = %alert.patient_id,
                    kind = %kind,
                    from = %alert.severity,
                    to = %severity,
                    "Alert escalated"
                );
                alert.severity = severity;
                return Some(AlertEvent::new(AlertEventType::Escalated, alert));
            }
            return Some(AlertEvent::new(AlertEventType::Updated, alert));
        }

        let alert = Alert {
            id: AlertId::new(),
            patient_id: self.patient_id.clone(),
            kind,
            severity,
            state: AlertState::Active,
            opened_at: at,
            updated_at: at,
            message,
            triggering_reading: trigger.cloned(),
            version: 1,
        };
        tracing::info!(
            alert_id = %alert.id,
            patient_id = %alert.patient_id,
            kind = %kind,
            severity = %severity,
            "Alert opened"
        );
        let event = AlertEvent::new(AlertEventType::Opened, &alert);
        self.open.insert(kind, alert);
        Some(event)
    }

    fn close(
        &mut self,
        kind: AlertKind,
        at: DateTime<Utc>,
        resolution: Resolution,
    ) -> Option<AlertEvent> {
        let mut alert = self.open.remove(&kind)?;
        let responder = alert.responder().map(str::to_string);
        alert.state = AlertState::Resolved {
            closed_at: at,
            responder,
            resolution,
        };
        alert.version += 1;

        tracing::info!(
            alert_id = %alert.id,
            patient_id = %alert.patient_id,
            kind = %kind,
            resolution = ?resolution,
            "Alert resolved"
        );

        let event = AlertEvent::new(AlertEventType::Resolved, &alert);
        if self.resolved_history > 0 {
            if self.resolved.len() == self.resolved_history {
                self.resolved.pop_front();
            }
            self.resolved.push_back(alert);
        }
        Some(event)
    }
}

/// Human-readable alert message
fn describe(kind: AlertKind, reading: Option<&Reading>) -> String {
    let Some(r) = reading else {
        return match kind {
            AlertKind::DeviceOffline => "No telemetry received from device".to_string(),
            other => other.as_str().to_string(),
        };
    };

    match kind {
        AlertKind::HeartRateHigh | AlertKind::HeartRateLow => {
            format!("Heart rate {:.0} bpm", r.heart_rate)
        }
        AlertKind::TempHigh | AlertKind::TempLow => match r.temperature {
            Some(t) => format!("Temperature {:.1} °C", t),
            None => "Temperature out of range".to_string(),
        },
        AlertKind::OxygenLow => match r.oxygen_saturation {
            Some(s) => format!("SpO2 {:.0}%", s),
            None => "Low oxygen saturation".to_string(),
        },
        AlertKind::BloodPressureHigh => match r.systolic {
            Some(s) => format!("Systolic pressure {:.0} mmHg", s),
            None => "High blood pressure".to_string(),
        },
        AlertKind::FallDetected => "Fall or impact detected".to_string(),
        AlertKind::DeviceOffline => format!(
            "No telemetry since {}",
            r.timestamp.format("%Y-%m-%dT%H:%M:%SZ")
        ),
        AlertKind::BatteryLow => match r.battery_level {
            Some(b) => format!("Device battery at {:.0}%", b),
            None => "Device battery low".to_string(),
        },
    }
}
