//! Synheart Triage - Real-time health telemetry and emergency triage engine
//!
//! Triage turns streams of wearable vital-sign samples into a ranked board of
//! emergencies through a per-patient pipeline: normalization → status
//! classification → alert lifecycle, with connection liveness tracked
//! alongside. A facility-wide aggregator ranks open alerts and recommends
//! resources from an atomic resource ledger.
//!
//! ## Modules
//!
//! - **Patient pipeline**: normalize, classify and alert per patient
//! - **Triage**: rank open alerts across the facility
//! - **Resource ledger**: reserve, commit and release beds, ventilators, ambulances and staff

pub mod alerts;
pub mod classifier;
pub mod config;
pub mod connection;
pub mod error;
pub mod ledger;
pub mod normalizer;
pub mod pipeline;
pub mod simulator;
pub mod triage;
pub mod types;

pub use config::TriageConfig;
pub use error::TriageError;
pub use ledger::ResourceLedger;
pub use pipeline::{PatientPipeline, TriageEngine};
pub use simulator::{Scenario, VitalsSimulator};
pub use triage::TriageAggregator;
pub use types::{Alert, AlertEvent, AlertId, RawReading, Reading, ResourceUnit};

/// Triage version reported by the CLI
pub const TRIAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for emitted records
pub const PRODUCER_NAME: &str = "synheart-triage";
