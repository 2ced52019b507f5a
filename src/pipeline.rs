//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Triage.
//! Each patient gets an independent [`PatientPipeline`] (normalize → classify →
//! alert) guarded by its own lock; the [`TriageEngine`] routes readings and
//! commands to pipelines and publishes their alert events to the shared
//! aggregator and to subscribers.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::alerts::AlertManager;
use crate::classifier::StatusClassifier;
use crate::config::TriageConfig;
use crate::connection::{ConnectionMonitor, ConnectionTransition};
use crate::error::TriageError;
use crate::ledger::ResourceLedger;
use crate::normalizer::Normalizer;
use crate::triage::TriageAggregator;
use crate::types::{
    Alert, AlertEvent, AlertId, FacilitySummary, HealthStatus, PatientSnapshot, RawReading,
    Reading, Resolution, ResourceAvailability, ResourceRecommendation, ResourceUnit, TriageEntry,
};

/// Classification and alert pipeline for one patient.
///
/// Readings must be fed in arrival order; the pipeline is not shared between
/// threads without a lock.
#[derive(Debug, Clone)]
pub struct PatientPipeline {
    patient_id: String,
    facility_id: Option<String>,
    last_accepted: Option<DateTime<Utc>>,
    history: VecDeque<Reading>,
    window: usize,
    status: HealthStatus,
    classifier: StatusClassifier,
    connection: ConnectionMonitor,
    alerts: AlertManager,
    retired: bool,
}

impl PatientPipeline {
    pub fn new(patient_id: impl Into<String>, config: &TriageConfig) -> Self {
        let patient_id = patient_id.into();
        Self {
            connection: ConnectionMonitor::new(patient_id.clone(), &config.connection),
            alerts: AlertManager::new(patient_id.clone(), &config.alerts),
            classifier: StatusClassifier::new(config.thresholds.clone(), config.classifier.clone()),
            history: VecDeque::with_capacity(config.classifier.history_window),
            window: config.classifier.history_window,
            status: HealthStatus::Unknown,
            last_accepted: None,
            facility_id: None,
            retired: false,
            patient_id,
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn facility_id(&self) -> Option<&str> {
        self.facility_id.as_deref()
    }

    pub fn set_facility(&mut self, facility_id: Option<String>) {
        self.facility_id = facility_id;
    }

    /// Debounced status; UNKNOWN until the first accepted reading
    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn latest_reading(&self) -> Option<&Reading> {
        self.history.back()
    }

    /// Look up an open or recently resolved alert of this patient
    pub fn alert(&self, alert_id: AlertId) -> Option<&Alert> {
        self.alerts.get(alert_id)
    }

    pub fn open_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.open_alerts()
    }

    /// Process one raw sample end to end.
    ///
    /// Rejected samples are logged and dropped; the pipeline state is left
    /// untouched.
    pub fn ingest(&mut self, raw: &RawReading) -> Result<Vec<AlertEvent>, TriageError> {
        let reading = match Normalizer::normalize(raw, self.last_accepted) {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!(patient_id = %self.patient_id, error = %e, "Dropped reading");
                return Err(e);
            }
        };

        let mut events = Vec::new();
        if let Some(transition) = self.connection.on_reading(reading.timestamp) {
            events.extend(self.alerts.on_connection(&transition, Some(&reading)));
        }

        let classification = self
            .classifier
            .classify(&reading, self.history.make_contiguous());
        self.status = classification.status;
        events.extend(self.alerts.on_classification(&classification, &reading));
        events.extend(self.alerts.on_battery(&reading));

        tracing::debug!(
            patient_id = %self.patient_id,
            status = %self.status,
            suspect = reading.suspect,
            events = events.len(),
            "Accepted reading"
        );

        self.last_accepted = Some(reading.timestamp);
        if self.history.len() >= self.window {
            self.history.pop_front();
        }
        self.history.push_back(reading);

        Ok(events)
    }

    /// Liveness sweep at `now`
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let transition = self.connection.sweep(now);
        self.on_transition(transition)
    }

    /// Close the telemetry stream: DISCONNECTED plus DEVICE_OFFLINE, and no
    /// further sweeps until a reading re-opens it.
    pub fn close(&mut self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let transition = self.connection.close(now);
        self.on_transition(transition)
    }

    /// Close the stream and resolve every open alert. A retired pipeline is
    /// no longer swept.
    pub fn retire(&mut self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let mut events = self.close(now);
        events.extend(self.alerts.close_all(now, Resolution::Discharged));
        self.retired = true;
        events
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn dispatch(
        &mut self,
        alert_id: AlertId,
        responder: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>, TriageError> {
        self.alerts.dispatch(alert_id, responder, now)
    }

    pub fn resolve(
        &mut self,
        alert_id: AlertId,
        now: DateTime<Utc>,
    ) -> Result<AlertEvent, TriageError> {
        self.alerts.resolve(alert_id, now)
    }

    pub fn snapshot(&self) -> PatientSnapshot {
        PatientSnapshot {
            patient_id: self.patient_id.clone(),
            facility_id: self.facility_id.clone(),
            status: self.status,
            connection: self.connection.state(),
            latest_reading: self.history.back().cloned(),
        }
    }

    fn on_transition(&mut self, transition: Option<ConnectionTransition>) -> Vec<AlertEvent> {
        match transition {
            Some(t) => {
                let last = self.history.back().cloned();
                self.alerts.on_connection(&t, last.as_ref())
            }
            None => Vec::new(),
        }
    }
}

/// Facility-wide engine: telemetry ingestion, queries and commands.
///
/// All methods take `&self`; the engine is meant to be shared behind an
/// `Arc` between ingestion workers, the sweep timer and command handlers.
pub struct TriageEngine {
    config: TriageConfig,
    patients: RwLock<HashMap<String, Arc<Mutex<PatientPipeline>>>>,
    aggregator: RwLock<TriageAggregator>,
    ledger: ResourceLedger,
    events: broadcast::Sender<AlertEvent>,
}

impl Default for TriageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TriageEngine {
    /// Create an engine with the default policy
    pub fn new() -> Self {
        Self::build(TriageConfig::default())
    }

    /// Create an engine with a validated policy
    pub fn with_config(config: TriageConfig) -> Result<Self, TriageError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Seed the resource ledger
    pub fn with_resources(
        self,
        units: impl IntoIterator<Item = ResourceUnit>,
    ) -> Result<Self, TriageError> {
        for unit in units {
            self.ledger.register(unit)?;
        }
        Ok(self)
    }

    fn build(config: TriageConfig) -> Self {
        let (events, _) = broadcast::channel(config.triage.event_capacity.max(1));
        Self {
            aggregator: RwLock::new(TriageAggregator::new(config.triage.resolved_retention)),
            patients: RwLock::new(HashMap::new()),
            ledger: ResourceLedger::new(),
            events,
            config,
        }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Subscribe to the alert event feed. Consumers dedupe on
    /// `(alert.id, alert.version)`.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    /// Register a patient, or move an existing one to another facility
    pub fn register_patient(
        &self,
        patient_id: &str,
        facility_id: Option<&str>,
    ) -> Result<PatientSnapshot, TriageError> {
        let patient_id = valid_patient_id(Some(patient_id))?;
        loop {
            let slot = self.pipeline(patient_id);
            let mut pipeline = slot.lock();
            if pipeline.is_retired() {
                // Removed while we waited; the next lookup starts afresh
                continue;
            }
            pipeline.set_facility(facility_id.map(str::to_string));
            tracing::info!(patient_id, ?facility_id, "Registered patient");
            self.publish(&pipeline, &[]);
            return Ok(pipeline.snapshot());
        }
    }

    /// Telemetry ingestion. Unknown patients are registered on first reading.
    pub fn submit_reading(&self, raw: &RawReading) -> Result<Vec<AlertEvent>, TriageError> {
        let patient_id = match valid_patient_id(raw.patient_id.as_deref()) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "Dropped reading");
                return Err(e);
            }
        };
        loop {
            let slot = self.pipeline(patient_id);
            let mut pipeline = slot.lock();
            if pipeline.is_retired() {
                continue;
            }
            let events = pipeline.ingest(raw)?;
            self.publish(&pipeline, &events);
            return Ok(events);
        }
    }

    /// Periodic liveness sweep over every open stream
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let slots: Vec<Arc<Mutex<PatientPipeline>>> =
            self.patients.read().values().cloned().collect();

        let mut events = Vec::new();
        for slot in slots {
            let mut pipeline = slot.lock();
            if pipeline.is_retired() {
                continue;
            }
            let swept = pipeline.sweep(now);
            if !swept.is_empty() {
                self.publish(&pipeline, &swept);
                events.extend(swept);
            } else {
                // Degradation changes the snapshot without an alert
                self.aggregator.write().upsert_patient(pipeline.snapshot());
            }
        }
        events
    }

    /// Close a patient's telemetry stream
    pub fn close_stream(
        &self,
        patient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertEvent>, TriageError> {
        let slot = self.existing(patient_id)?;
        let mut pipeline = slot.lock();
        if pipeline.is_retired() {
            return Err(TriageError::not_found("patient", patient_id));
        }
        let events = pipeline.close(now);
        tracing::info!(patient_id, "Closed telemetry stream");
        self.publish(&pipeline, &events);
        Ok(events)
    }

    /// Stop monitoring a patient: close the stream, resolve whatever is still
    /// open and forget the patient. A later reading starts a fresh pipeline.
    pub fn remove_patient(
        &self,
        patient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertEvent>, TriageError> {
        let slot = self
            .patients
            .write()
            .remove(patient_id.trim())
            .ok_or_else(|| TriageError::not_found("patient", patient_id))?;
        let mut pipeline = slot.lock();
        let events = pipeline.retire(now);
        self.publish(&pipeline, &events);
        self.aggregator.write().remove_patient(pipeline.patient_id());
        tracing::info!(patient_id, resolved = events.len(), "Removed patient");
        Ok(events)
    }

    pub fn patient_status(&self, patient_id: &str) -> Result<PatientSnapshot, TriageError> {
        let slot = self.existing(patient_id)?;
        let snapshot = slot.lock().snapshot();
        Ok(snapshot)
    }

    /// Ranked open alerts, optionally for one facility
    pub fn open_alerts(&self, facility_id: Option<&str>) -> Vec<TriageEntry> {
        self.aggregator.read().ranked(facility_id)
    }

    pub fn resource_availability(&self) -> Vec<ResourceAvailability> {
        self.ledger.availability()
    }

    pub fn facility_summary(&self, facility_id: Option<&str>) -> FacilitySummary {
        self.aggregator.read().summary(facility_id, &self.ledger)
    }

    /// Send a responder to an alert
    pub fn dispatch(&self, alert_id: AlertId, responder: &str) -> Result<Alert, TriageError> {
        self.dispatch_at(alert_id, responder, Utc::now())
    }

    pub fn dispatch_at(
        &self,
        alert_id: AlertId,
        responder: &str,
        now: DateTime<Utc>,
    ) -> Result<Alert, TriageError> {
        let slot = self.owner_of(alert_id)?;
        let mut pipeline = slot.lock();
        match pipeline.dispatch(alert_id, responder, now)? {
            Some(event) => {
                self.publish(&pipeline, std::slice::from_ref(&event));
                Ok(event.alert)
            }
            None => pipeline
                .alert(alert_id)
                .cloned()
                .ok_or_else(|| TriageError::not_found("alert", alert_id)),
        }
    }

    /// Manually resolve an alert
    pub fn resolve(&self, alert_id: AlertId) -> Result<Alert, TriageError> {
        self.resolve_at(alert_id, Utc::now())
    }

    pub fn resolve_at(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<Alert, TriageError> {
        let slot = self.owner_of(alert_id)?;
        let mut pipeline = slot.lock();
        let event = pipeline.resolve(alert_id, now)?;
        self.publish(&pipeline, std::slice::from_ref(&event));
        Ok(event.alert)
    }

    /// Read-only resource suggestion for an open alert
    pub fn recommend_resource(
        &self,
        alert_id: AlertId,
    ) -> Result<ResourceRecommendation, TriageError> {
        self.aggregator
            .read()
            .recommend_resource(alert_id, &self.ledger)
    }

    /// Bind a unit to an open alert (validated reserve)
    pub fn assign(&self, alert_id: AlertId, resource_id: &str) -> Result<ResourceUnit, TriageError> {
        {
            let aggregator = self.aggregator.read();
            if aggregator.open_alert(alert_id).is_none() {
                return Err(match aggregator.locate(alert_id) {
                    Some(_) => TriageError::invalid_state("alert", alert_id, "already resolved"),
                    None => TriageError::not_found("alert", alert_id),
                });
            }
        }
        self.ledger.reserve(resource_id, alert_id)
    }

    pub fn reserve(&self, resource_id: &str, alert_id: AlertId) -> Result<ResourceUnit, TriageError> {
        self.ledger.reserve(resource_id, alert_id)
    }

    pub fn commit(&self, resource_id: &str) -> Result<ResourceUnit, TriageError> {
        self.ledger.commit(resource_id)
    }

    pub fn release(&self, resource_id: &str) -> Result<ResourceUnit, TriageError> {
        self.ledger.release(resource_id)
    }

    pub fn mark_maintenance(&self, resource_id: &str) -> Result<ResourceUnit, TriageError> {
        self.ledger.mark_maintenance(resource_id)
    }

    fn pipeline(&self, patient_id: &str) -> Arc<Mutex<PatientPipeline>> {
        if let Some(slot) = self.patients.read().get(patient_id) {
            return Arc::clone(slot);
        }
        let mut patients = self.patients.write();
        let slot = patients.entry(patient_id.to_string()).or_insert_with(|| {
            tracing::debug!(patient_id, "New patient pipeline");
            Arc::new(Mutex::new(PatientPipeline::new(patient_id, &self.config)))
        });
        Arc::clone(slot)
    }

    fn existing(&self, patient_id: &str) -> Result<Arc<Mutex<PatientPipeline>>, TriageError> {
        self.patients
            .read()
            .get(patient_id.trim())
            .cloned()
            .ok_or_else(|| TriageError::not_found("patient", patient_id))
    }

    fn owner_of(&self, alert_id: AlertId) -> Result<Arc<Mutex<PatientPipeline>>, TriageError> {
        let patient_id = self
            .aggregator
            .read()
            .locate(alert_id)
            .map(str::to_string)
            .ok_or_else(|| TriageError::not_found("alert", alert_id))?;
        self.existing(&patient_id)
    }

    /// Hand events to the aggregator and subscribers. Called with the
    /// patient's lock held so per-patient event order is preserved.
    fn publish(&self, pipeline: &PatientPipeline, events: &[AlertEvent]) {
        {
            let mut aggregator = self.aggregator.write();
            aggregator.upsert_patient(pipeline.snapshot());
            for event in events {
                aggregator.apply(event);
            }
        }
        for event in events {
            // No subscribers is not an error
            let _ = self.events.send(event.clone());
        }
    }
}

fn valid_patient_id(patient_id: Option<&str>) -> Result<&str, TriageError> {
    patient_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| TriageError::Validation("missing patient_id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AlertEventType, AlertKind, AlertState, AlertStatus, ConnectionStatus, ResourceStatus,
        ResourceType, Severity,
    };
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::sync::Barrier;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn make_raw(patient: &str, secs: i64, heart_rate: f64) -> RawReading {
        RawReading {
            patient_id: Some(patient.to_string()),
            timestamp: Some(at(secs)),
            heart_rate: Some(heart_rate),
            temperature: Some(36.8),
            oxygen_saturation: Some(98.0),
            battery_level: Some(80.0),
            ..RawReading::default()
        }
    }

    /// Feed sustained tachycardia until a critical alert opens
    fn open_critical(engine: &TriageEngine, patient: &str) -> Alert {
        engine.submit_reading(&make_raw(patient, 0, 142.0)).unwrap();
        let events = engine.submit_reading(&make_raw(patient, 5, 145.0)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AlertEventType::Opened);
        events[0].alert.clone()
    }

    fn engine_with_units() -> TriageEngine {
        TriageEngine::new()
            .with_resources([
                ResourceUnit::new("bed-1", ResourceType::Bed).with_location("ICU 1"),
                ResourceUnit::new("vent-1", ResourceType::Ventilator),
                ResourceUnit::new("amb-1", ResourceType::Ambulance),
            ])
            .unwrap()
    }

    #[test]
    fn test_pipeline_status_unknown_until_first_reading() {
        let mut pipeline = PatientPipeline::new("p-1", &TriageConfig::default());
        assert_eq!(pipeline.status(), HealthStatus::Unknown);

        let events = pipeline.ingest(&make_raw("p-1", 0, 72.0)).unwrap();
        assert!(events.is_empty());
        assert_eq!(pipeline.status(), HealthStatus::Normal);
        assert_eq!(pipeline.snapshot().connection.status, ConnectionStatus::Connected);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut pipeline = PatientPipeline::new("p-1", &TriageConfig::default());
        for i in 0..12 {
            pipeline.ingest(&make_raw("p-1", i * 5, 72.0)).unwrap();
        }
        assert_eq!(pipeline.history.len(), 5);
        assert_eq!(pipeline.latest_reading().map(|r| r.timestamp), Some(at(55)));
    }

    #[test]
    fn test_out_of_order_reading_dropped() {
        let engine = TriageEngine::new();
        engine.submit_reading(&make_raw("p-1", 10, 72.0)).unwrap();

        let err = engine.submit_reading(&make_raw("p-1", 5, 150.0)).unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));
        let err = engine.submit_reading(&make_raw("p-1", 10, 150.0)).unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));

        let status = engine.patient_status("p-1").unwrap();
        assert_eq!(status.latest_reading.map(|r| r.heart_rate), Some(72.0));
        assert!(engine.open_alerts(None).is_empty());
    }

    #[test]
    fn test_missing_patient_id_rejected() {
        let engine = TriageEngine::new();
        let mut raw = make_raw("p-1", 0, 72.0);
        raw.patient_id = Some("   ".to_string());
        assert!(matches!(
            engine.submit_reading(&raw),
            Err(TriageError::Validation(_))
        ));
        assert!(matches!(
            engine.patient_status("p-1"),
            Err(TriageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_device_offline_exactly_at_timeout() {
        let engine = TriageEngine::new();
        engine.submit_reading(&make_raw("p-1", 0, 72.0)).unwrap();

        assert!(engine.sweep(at(15)).is_empty());
        assert_eq!(
            engine.patient_status("p-1").unwrap().connection.status,
            ConnectionStatus::Degraded
        );
        assert!(engine.sweep(at(59)).is_empty());

        let events = engine.sweep(at(60));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AlertEventType::Opened);
        assert_eq!(events[0].alert.kind, AlertKind::DeviceOffline);
        assert_eq!(events[0].alert.severity, Severity::High);
        assert_eq!(events[0].alert.opened_at, at(60));
        assert!(engine.sweep(at(120)).is_empty());

        let events = engine.submit_reading(&make_raw("p-1", 121, 72.0)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AlertEventType::Resolved);
        assert!(matches!(
            events[0].alert.state,
            crate::types::AlertState::Resolved {
                resolution: Resolution::Reconnected,
                ..
            }
        ));
        assert!(engine.open_alerts(None).is_empty());
    }

    #[test]
    fn test_dispatch_and_resolve_through_engine() {
        let engine = TriageEngine::new();
        let alert = open_critical(&engine, "p-1");

        assert!(matches!(
            engine.dispatch_at(AlertId::new(), "medic-1", at(6)),
            Err(TriageError::NotFound { .. })
        ));

        let dispatched = engine.dispatch_at(alert.id, "medic-1", at(6)).unwrap();
        assert_eq!(dispatched.status(), AlertStatus::Responding);
        assert_eq!(dispatched.responder(), Some("medic-1"));

        // Same responder again is a no-op
        let again = engine.dispatch_at(alert.id, "medic-1", at(7)).unwrap();
        assert_eq!(again.version, dispatched.version);

        let board = engine.open_alerts(None);
        assert_eq!(board[0].alert.status(), AlertStatus::Responding);

        let resolved = engine.resolve_at(alert.id, at(8)).unwrap();
        assert_eq!(resolved.status(), AlertStatus::Resolved);
        assert!(engine.open_alerts(None).is_empty());

        assert!(matches!(
            engine.dispatch_at(alert.id, "medic-1", at(9)),
            Err(TriageError::InvalidState { .. })
        ));
        assert!(matches!(
            engine.resolve_at(alert.id, at(9)),
            Err(TriageError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_event_feed_delivers_lifecycle_in_order() {
        let engine = TriageEngine::new();
        let mut rx = engine.subscribe();
        let alert = open_critical(&engine, "p-1");
        engine.dispatch_at(alert.id, "medic-1", at(6)).unwrap();
        engine.resolve_at(alert.id, at(7)).unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.alert.id, alert.id);
            seen.push((event.event_type, event.alert.version));
        }
        assert_eq!(
            seen,
            vec![
                (AlertEventType::Opened, 1),
                (AlertEventType::Dispatched, 2),
                (AlertEventType::Resolved, 3),
            ]
        );
    }

    #[test]
    fn test_close_stream_raises_device_offline() {
        let engine = TriageEngine::new();
        engine.submit_reading(&make_raw("p-1", 0, 72.0)).unwrap();

        let events = engine.close_stream("p-1", at(3)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert.kind, AlertKind::DeviceOffline);
        assert_eq!(
            engine.patient_status("p-1").unwrap().connection.status,
            ConnectionStatus::Disconnected
        );
        assert!(engine.sweep(at(600)).is_empty());

        assert!(matches!(
            engine.close_stream("p-404", at(3)),
            Err(TriageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_refreshed_alert_reaches_board() {
        let engine = TriageEngine::new();
        let mut rx = engine.subscribe();
        let alert = open_critical(&engine, "p-1");

        for secs in [10, 15, 20] {
            let events = engine.submit_reading(&make_raw("p-1", secs, 150.0)).unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].event_type, AlertEventType::Updated);
        }

        let board = engine.open_alerts(None);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].alert.id, alert.id);
        assert_eq!(board[0].alert.opened_at, at(5));
        assert_eq!(board[0].alert.updated_at, at(20));
        assert_eq!(board[0].alert.version, 4);
        assert_eq!(board[0].alert.message, "Heart rate 150 bpm");
        assert_eq!(
            board[0].alert.triggering_reading.as_ref().map(|r| r.timestamp),
            Some(at(20))
        );

        let mut versions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            versions.push(event.alert.version);
        }
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_remove_patient_forgets_everything() {
        let engine = TriageEngine::new();
        engine.register_patient("p-1", Some("north")).unwrap();
        engine.register_patient("p-2", Some("north")).unwrap();
        let alert = open_critical(&engine, "p-1");
        engine.submit_reading(&make_raw("p-2", 0, 72.0)).unwrap();

        let events = engine.remove_patient("p-1", at(10)).unwrap();
        let seen: Vec<(AlertEventType, AlertKind)> = events
            .iter()
            .map(|e| (e.event_type, e.alert.kind))
            .collect();
        assert_eq!(
            seen,
            vec![
                (AlertEventType::Opened, AlertKind::DeviceOffline),
                (AlertEventType::Resolved, AlertKind::HeartRateHigh),
                (AlertEventType::Resolved, AlertKind::DeviceOffline),
            ]
        );
        assert!(events[1..].iter().all(|e| matches!(
            e.alert.state,
            AlertState::Resolved {
                resolution: Resolution::Discharged,
                ..
            }
        )));

        assert!(engine.open_alerts(None).is_empty());
        assert_eq!(engine.facility_summary(Some("north")).total_patients, 1);
        assert!(matches!(
            engine.patient_status("p-1"),
            Err(TriageError::NotFound { .. })
        ));
        assert!(matches!(
            engine.remove_patient("p-1", at(11)),
            Err(TriageError::NotFound { .. })
        ));
        assert!(matches!(
            engine.resolve_at(alert.id, at(12)),
            Err(TriageError::NotFound { .. })
        ));

        // Only the remaining patient goes silent
        let swept = engine.sweep(at(600));
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].alert.patient_id, "p-2");

        // A new reading starts over
        engine.submit_reading(&make_raw("p-1", 700, 72.0)).unwrap();
        let snapshot = engine.patient_status("p-1").unwrap();
        assert_eq!(snapshot.status, HealthStatus::Normal);
        assert_eq!(snapshot.facility_id, None);
    }

    #[test]
    fn test_recommend_and_assign() {
        let engine = engine_with_units();
        let alert = open_critical(&engine, "p-1");

        let rec = engine.recommend_resource(alert.id).unwrap();
        let ids: Vec<&str> = rec.units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["bed-1", "vent-1"]);
        assert_eq!(rec.units[0].location.as_deref(), Some("ICU 1"));

        let unit = engine.assign(alert.id, "bed-1").unwrap();
        assert_eq!(unit.status, ResourceStatus::Reserved);
        assert_eq!(unit.assigned_alert_id, Some(alert.id));

        // Bed is taken, so a second critical patient gets no recommendation
        let other = open_critical(&engine, "p-2");
        assert!(matches!(
            engine.recommend_resource(other.id),
            Err(TriageError::NoResourceAvailable(ResourceType::Bed))
        ));
        assert!(matches!(
            engine.assign(other.id, "bed-1"),
            Err(TriageError::Conflict { .. })
        ));

        assert_eq!(engine.commit("bed-1").unwrap().status, ResourceStatus::Occupied);
        engine.resolve_at(alert.id, at(20)).unwrap();
        assert!(matches!(
            engine.assign(alert.id, "vent-1"),
            Err(TriageError::InvalidState { .. })
        ));
        assert_eq!(engine.release("bed-1").unwrap().status, ResourceStatus::Available);
    }

    #[test]
    fn test_facility_filter_and_summary() {
        let engine = engine_with_units();
        engine.register_patient("p-1", Some("north")).unwrap();
        engine.register_patient("p-2", Some("south")).unwrap();
        let north = open_critical(&engine, "p-1");
        open_critical(&engine, "p-2");

        let board = engine.open_alerts(Some("north"));
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].alert.id, north.id);
        assert_eq!(engine.open_alerts(None).len(), 2);

        let summary = engine.facility_summary(Some("north"));
        assert_eq!(summary.total_patients, 1);
        assert_eq!(summary.critical_patients, 1);
        assert_eq!(summary.active_alerts, 1);
        assert_eq!(summary.resources.len(), 4);

        let registered = engine.register_patient("p-3", None).unwrap();
        assert_eq!(registered.status, HealthStatus::Unknown);
        assert_eq!(engine.facility_summary(None).unknown_patients, 1);
    }

    #[test]
    fn test_concurrent_patients_are_independent() {
        let engine = TriageEngine::new();
        let patients: Vec<String> = (0..8).map(|i| format!("p-{i}")).collect();
        let barrier = Barrier::new(patients.len());

        std::thread::scope(|s| {
            for patient in &patients {
                let engine = &engine;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    for i in 0..4 {
                        engine
                            .submit_reading(&make_raw(patient, i * 5, 142.0))
                            .unwrap();
                    }
                });
            }
        });

        let board = engine.open_alerts(None);
        assert_eq!(board.len(), patients.len());
        assert!(board
            .iter()
            .all(|e| e.alert.kind == AlertKind::HeartRateHigh
                && e.alert.severity == Severity::Critical));
        assert_eq!(engine.facility_summary(None).critical_patients, patients.len());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TriageConfig::default();
        config.connection.timeout_secs = 5;
        assert!(matches!(
            TriageEngine::with_config(config),
            Err(TriageError::Config(_))
        ));
    }
}
