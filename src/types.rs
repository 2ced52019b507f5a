//! Core types for the Synheart Triage engine
//!
//! This module defines the data structures that flow through each stage of the
//! engine: raw and canonical readings, derived health status, connection state,
//! alerts and their lifecycle events, resource units, and triage views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Geographic position reported by the wearable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Sample as delivered by the telemetry transport, before validation.
///
/// Every field is optional here; the normalizer decides what is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawReading {
    pub patient_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Beats per minute
    pub heart_rate: Option<f64>,
    /// Degrees Celsius
    pub temperature: Option<f64>,
    /// SpO2 percentage
    pub oxygen_saturation: Option<f64>,
    /// mmHg
    pub systolic: Option<f64>,
    /// mmHg
    pub diastolic: Option<f64>,
    /// Device battery percentage
    pub battery_level: Option<f64>,
    pub location: Option<Location>,
    /// Fall/impact event flag raised by the device
    pub fall_detected: Option<bool>,
}

/// Canonical vital-sign sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub patient_id: String,
    pub timestamp: DateTime<Utc>,
    pub heart_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oxygen_saturation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub systolic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diastolic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub fall_detected: bool,
    /// Set when any input value had to be clamped or discarded
    pub suspect: bool,
}

/// Health status tier, ordered from least to most severe.
///
/// `Unknown` only applies before the first reading arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Unknown,
    Normal,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "UNKNOWN",
            HealthStatus::Normal => "NORMAL",
            HealthStatus::Warning => "WARNING",
            HealthStatus::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness of a patient's telemetry stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Degraded,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Degraded => "DEGRADED",
            ConnectionStatus::Disconnected => "DISCONNECTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub patient_id: String,
    pub status: ConnectionStatus,
    pub last_reading_at: Option<DateTime<Utc>>,
}

/// Unique alert identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AlertId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Cause of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    HeartRateHigh,
    HeartRateLow,
    TempHigh,
    TempLow,
    OxygenLow,
    BloodPressureHigh,
    FallDetected,
    DeviceOffline,
    BatteryLow,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::HeartRateHigh => "HEART_RATE_HIGH",
            AlertKind::HeartRateLow => "HEART_RATE_LOW",
            AlertKind::TempHigh => "TEMP_HIGH",
            AlertKind::TempLow => "TEMP_LOW",
            AlertKind::OxygenLow => "OXYGEN_LOW",
            AlertKind::BloodPressureHigh => "BLOOD_PRESSURE_HIGH",
            AlertKind::FallDetected => "FALL_DETECTED",
            AlertKind::DeviceOffline => "DEVICE_OFFLINE",
            AlertKind::BatteryLow => "BATTERY_LOW",
        }
    }

    /// Kinds raised from vital signs, cleared by sustained NORMAL status
    pub fn is_clinical(&self) -> bool {
        !matches!(self, AlertKind::DeviceOffline | AlertKind::BatteryLow)
    }

    /// Cardiac or respiratory causes
    pub fn is_cardiorespiratory(&self) -> bool {
        matches!(
            self,
            AlertKind::HeartRateHigh | AlertKind::HeartRateLow | AlertKind::OxygenLow
        )
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity implied by a (debounced) health status tier
    pub fn from_status(status: HealthStatus) -> Option<Self> {
        match status {
            HealthStatus::Critical => Some(Severity::Critical),
            HealthStatus::Warning => Some(Severity::Medium),
            HealthStatus::Normal | HealthStatus::Unknown => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Flat view of an alert's lifecycle position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Responding,
    Resolved,
}

/// Why an alert was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// Underlying condition cleared for the debounce period
    Cleared,
    /// Closed by a human override
    Manual,
    /// Telemetry stream came back
    Reconnected,
    /// Patient removed from monitoring
    Discharged,
}

/// Alert lifecycle. Data only exists in the states where it is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    Active,
    Responding {
        responder: String,
        dispatched_at: DateTime<Utc>,
    },
    Resolved {
        closed_at: DateTime<Utc>,
        responder: Option<String>,
        resolution: Resolution,
    },
}

/// A tracked emergency condition for one patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub patient_id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    #[serde(flatten)]
    pub state: AlertState,
    pub opened_at: DateTime<Utc>,
    /// Last time the condition re-triggered
    pub updated_at: DateTime<Utc>,
    pub message: String,
    /// Reading that (last) triggered the alert, if any
    pub triggering_reading: Option<Reading>,
    /// Bumped on every mutation; consumers dedupe on (id, version)
    pub version: u64,
}

impl Alert {
    pub fn status(&self) -> AlertStatus {
        match self.state {
            AlertState::Active => AlertStatus::Active,
            AlertState::Responding { .. } => AlertStatus::Responding,
            AlertState::Resolved { .. } => AlertStatus::Resolved,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, AlertState::Resolved { .. })
    }

    pub fn responder(&self) -> Option<&str> {
        match &self.state {
            AlertState::Active => None,
            AlertState::Responding { responder, .. } => Some(responder),
            AlertState::Resolved { responder, .. } => responder.as_deref(),
        }
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            AlertState::Resolved { closed_at, .. } => Some(closed_at),
            _ => None,
        }
    }
}

/// Alert lifecycle event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEventType {
    Opened,
    /// Severity increased
    Escalated,
    /// Re-triggered without a severity change: new trigger, message and timestamp
    Updated,
    Dispatched,
    Resolved,
}

/// Event published on every alert lifecycle transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(rename = "type")]
    pub event_type: AlertEventType,
    pub alert: Alert,
}

impl AlertEvent {
    pub fn new(event_type: AlertEventType, alert: &Alert) -> Self {
        Self {
            event_type,
            alert: alert.clone(),
        }
    }
}

/// Kind of assignable facility asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Bed,
    Ventilator,
    Ambulance,
    Staff,
}

impl ResourceType {
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Bed,
        ResourceType::Ventilator,
        ResourceType::Ambulance,
        ResourceType::Staff,
    ];
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceType::Bed => "BED",
            ResourceType::Ventilator => "VENTILATOR",
            ResourceType::Ambulance => "AMBULANCE",
            ResourceType::Staff => "STAFF",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Available,
    Reserved,
    Occupied,
    Maintenance,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Available => "AVAILABLE",
            ResourceStatus::Reserved => "RESERVED",
            ResourceStatus::Occupied => "OCCUPIED",
            ResourceStatus::Maintenance => "MAINTENANCE",
        };
        f.write_str(s)
    }
}

/// A finite facility asset tracked by the resource ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUnit {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default = "default_resource_status")]
    pub status: ResourceStatus,
    #[serde(default)]
    pub assigned_alert_id: Option<AlertId>,
    /// Ward, bay or depot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

fn default_resource_status() -> ResourceStatus {
    ResourceStatus::Available
}

impl ResourceUnit {
    pub fn new(id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            id: id.into(),
            resource_type,
            status: ResourceStatus::Available,
            assigned_alert_id: None,
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Per-type availability counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAvailability {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub total: usize,
    pub available: usize,
    pub reserved: usize,
    pub occupied: usize,
    pub maintenance: usize,
}

/// Latest known state of one monitored patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSnapshot {
    pub patient_id: String,
    pub facility_id: Option<String>,
    pub status: HealthStatus,
    pub connection: ConnectionState,
    pub latest_reading: Option<Reading>,
}

/// Ranked view of one open alert; recomputed on every aggregation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageEntry {
    /// 1-based position in the ranking
    pub rank: usize,
    pub alert: Alert,
    pub patient: Option<PatientSnapshot>,
}

/// Non-binding suggestion of units to assign to an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecommendation {
    pub alert_id: AlertId,
    pub patient_id: String,
    pub units: Vec<ResourceUnit>,
}

/// Facility-wide counters for the command center
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitySummary {
    pub facility_id: Option<String>,
    pub total_patients: usize,
    pub critical_patients: usize,
    pub warning_patients: usize,
    pub normal_patients: usize,
    pub unknown_patients: usize,
    pub devices_offline: usize,
    pub active_alerts: usize,
    pub responding_alerts: usize,
    pub resources: Vec<ResourceAvailability>,
    /// Share of non-maintenance beds that are reserved or occupied
    pub bed_utilization: Option<f64>,
}
