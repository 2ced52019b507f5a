//! Facility-wide triage
//!
//! The aggregator consumes alert lifecycle events from every patient pipeline,
//! keeps the live set of open alerts and ranks them for responder attention:
//! severity first, then age (oldest first), then arrival order.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use crate::error::TriageError;
use crate::ledger::ResourceLedger;
use crate::types::{
    Alert, AlertEvent, AlertId, AlertKind, AlertStatus, ConnectionStatus, FacilitySummary,
    HealthStatus, PatientSnapshot, ResourceRecommendation, ResourceType, Severity, TriageEntry,
};

#[derive(Debug, Clone)]
struct TrackedAlert {
    alert: Alert,
    /// Insertion order, the final tie-break
    seq: u64,
}

/// Live, ranked view of open alerts across the facility
#[derive(Debug, Default)]
pub struct TriageAggregator {
    open: HashMap<AlertId, TrackedAlert>,
    ranking: Vec<AlertId>,
    next_seq: u64,
    patients: HashMap<String, PatientSnapshot>,
    /// Which patient owns an alert, kept for a while after resolution
    owners: HashMap<AlertId, String>,
    retired: VecDeque<AlertId>,
    retention: usize,
}

impl TriageAggregator {
    pub fn new(retention: usize) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    /// Apply one lifecycle event. Stale or duplicate deliveries (same or
    /// older version) are ignored. Returns whether the event was applied.
    ///
    /// Refreshes that keep the severity replace the stored alert in place
    /// without re-ranking.
    pub fn apply(&mut self, event: &AlertEvent) -> bool {
        let alert = &event.alert;
        let mut reorder = true;

        if let Some(tracked) = self.open.get(&alert.id) {
            if alert.version <= tracked.alert.version {
                return false;
            }
            reorder = !alert.is_open() || alert.severity != tracked.alert.severity;
        } else if !alert.is_open() || self.owners.contains_key(&alert.id) {
            // Already resolved here, or a close for an alert never seen
            return false;
        }

        self.owners
            .entry(alert.id)
            .or_insert_with(|| alert.patient_id.clone());

        if alert.is_open() {
            let seq = match self.open.get(&alert.id) {
                Some(tracked) => tracked.seq,
                None => {
                    self.next_seq += 1;
                    self.next_seq
                }
            };
            self.open.insert(
                alert.id,
                TrackedAlert {
                    alert: alert.clone(),
                    seq,
                },
            );
        } else {
            self.open.remove(&alert.id);
            self.retire(alert.id);
        }

        if reorder {
            self.rerank();
        }
        true
    }

    /// Forget a patient's snapshot. Alerts are left to their own events.
    pub fn remove_patient(&mut self, patient_id: &str) -> Option<PatientSnapshot> {
        self.patients.remove(patient_id)
    }

    /// Record the latest snapshot of a patient. Does not re-rank.
    pub fn upsert_patient(&mut self, snapshot: PatientSnapshot) {
        self.patients.insert(snapshot.patient_id.clone(), snapshot);
    }

    pub fn patient(&self, patient_id: &str) -> Option<&PatientSnapshot> {
        self.patients.get(patient_id)
    }

    pub fn patients(&self) -> impl Iterator<Item = &PatientSnapshot> {
        self.patients.values()
    }

    /// Patient that owns an open or recently resolved alert
    pub fn locate(&self, alert_id: AlertId) -> Option<&str> {
        self.owners.get(&alert_id).map(String::as_str)
    }

    pub fn open_alert(&self, alert_id: AlertId) -> Option<&Alert> {
        self.open.get(&alert_id).map(|t| &t.alert)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Ranked open alerts, optionally restricted to one facility
    pub fn ranked(&self, facility_id: Option<&str>) -> Vec<TriageEntry> {
        self.ranking
            .iter()
            .filter_map(|id| self.open.get(id))
            .map(|tracked| (tracked, self.patients.get(&tracked.alert.patient_id)))
            .filter(|(_, patient)| match facility_id {
                None => true,
                Some(facility) => {
                    patient.and_then(|p| p.facility_id.as_deref()) == Some(facility)
                }
            })
            .enumerate()
            .map(|(i, (tracked, patient))| TriageEntry {
                rank: i + 1,
                alert: tracked.alert.clone(),
                patient: patient.cloned(),
            })
            .collect()
    }

    /// Suggest units for an open alert without binding them.
    ///
    /// Fails with `NoResourceAvailable` for the first required type that has
    /// no AVAILABLE unit; the alert stays open and unassigned.
    pub fn recommend_resource(
        &self,
        alert_id: AlertId,
        ledger: &ResourceLedger,
    ) -> Result<ResourceRecommendation, TriageError> {
        let alert = self
            .open_alert(alert_id)
            .ok_or_else(|| TriageError::not_found("alert", alert_id))?;

        let mut units = Vec::new();
        for resource_type in resource_plan(alert.kind, alert.severity) {
            match ledger.first_available(resource_type) {
                Some(unit) => units.push(unit),
                None => {
                    tracing::warn!(
                        alert_id = %alert_id,
                        patient_id = %alert.patient_id,
                        resource_type = %resource_type,
                        "No resource available for alert"
                    );
                    return Err(TriageError::NoResourceAvailable(resource_type));
                }
            }
        }

        Ok(ResourceRecommendation {
            alert_id,
            patient_id: alert.patient_id.clone(),
            units,
        })
    }

    /// Command-center counters, optionally for one facility
    pub fn summary(&self, facility_id: Option<&str>, ledger: &ResourceLedger) -> FacilitySummary {
        let patients: Vec<&PatientSnapshot> = self
            .patients
            .values()
            .filter(|p| facility_id.is_none() || p.facility_id.as_deref() == facility_id)
            .collect();
        let count_status =
            |status: HealthStatus| patients.iter().filter(|p| p.status == status).count();

        let entries = self.ranked(facility_id);
        let count_alerts = |status: AlertStatus| {
            entries
                .iter()
                .filter(|e| e.alert.status() == status)
                .count()
        };

        let resources = ledger.availability();
        let bed_utilization = resources
            .iter()
            .find(|r| r.resource_type == ResourceType::Bed)
            .and_then(|beds| {
                let in_service = beds.total - beds.maintenance;
                (in_service > 0).then(|| (beds.reserved + beds.occupied) as f64 / in_service as f64)
            });

        FacilitySummary {
            facility_id: facility_id.map(str::to_string),
            total_patients: patients.len(),
            critical_patients: count_status(HealthStatus::Critical),
            warning_patients: count_status(HealthStatus::Warning),
            normal_patients: count_status(HealthStatus::Normal),
            unknown_patients: count_status(HealthStatus::Unknown),
            devices_offline: patients
                .iter()
                .filter(|p| {
                    p.connection.status == ConnectionStatus::Disconnected
                        && p.connection.last_reading_at.is_some()
                })
                .count(),
            active_alerts: count_alerts(AlertStatus::Active),
            responding_alerts: count_alerts(AlertStatus::Responding),
            resources,
            bed_utilization,
        }
    }

    fn rerank(&mut self) {
        let mut ranked: Vec<&TrackedAlert> = self.open.values().collect();
        ranked.sort_by(|a, b| compare(a, b));
        self.ranking = ranked.into_iter().map(|t| t.alert.id).collect();
    }

    fn retire(&mut self, alert_id: AlertId) {
        self.retired.push_back(alert_id);
        while self.retired.len() > self.retention {
            if let Some(old) = self.retired.pop_front() {
                self.owners.remove(&old);
            }
        }
    }
}

/// Severity descending, then opened_at ascending, then insertion order
fn compare(a: &TrackedAlert, b: &TrackedAlert) -> Ordering {
    b.alert
        .severity
        .cmp(&a.alert.severity)
        .then_with(|| a.alert.opened_at.cmp(&b.alert.opened_at))
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Resource types implied by an alert
pub fn resource_plan(kind: AlertKind, severity: Severity) -> Vec<ResourceType> {
    match kind {
        k if k.is_cardiorespiratory() && severity == Severity::Critical => {
            vec![ResourceType::Bed, ResourceType::Ventilator]
        }
        AlertKind::FallDetected => vec![ResourceType::Ambulance],
        AlertKind::DeviceOffline | AlertKind::BatteryLow => vec![ResourceType::Staff],
        _ => vec![ResourceType::Bed],
    }
}
