//! Reading normalization
//!
//! This module validates raw telemetry samples and turns them into canonical readings.
//! - Mandatory fields (patient id, timestamp, heart rate) must be present
//! - Timestamps must strictly increase per patient; late samples are rejected
//! - Numeric fields are clamped to physiological bounds and flagged suspect
//! - Optional fields stay absent rather than being filled in

use chrono::{DateTime, Utc};

use crate::error::TriageError;
use crate::types::{Location, RawReading, Reading};

/// Heart rate bounds (bpm)
pub const HEART_RATE_BOUNDS: (f64, f64) = (0.0, 300.0);
/// Body temperature bounds (°C)
pub const TEMPERATURE_BOUNDS: (f64, f64) = (20.0, 45.0);
/// SpO2 bounds (%)
pub const OXYGEN_BOUNDS: (f64, f64) = (0.0, 100.0);
/// Systolic pressure bounds (mmHg)
pub const SYSTOLIC_BOUNDS: (f64, f64) = (0.0, 300.0);
/// Diastolic pressure bounds (mmHg)
pub const DIASTOLIC_BOUNDS: (f64, f64) = (0.0, 200.0);
/// Battery bounds (%)
pub const BATTERY_BOUNDS: (f64, f64) = (0.0, 100.0);

/// Normalizer for converting raw samples to canonical readings
pub struct Normalizer;

impl Normalizer {
    /// Normalize a raw sample.
    ///
    /// `last_accepted` is the timestamp of the last reading accepted for the
    /// same patient; anything not strictly newer is rejected.
    pub fn normalize(
        raw: &RawReading,
        last_accepted: Option<DateTime<Utc>>,
    ) -> Result<Reading, TriageError> {
        let patient_id = raw
            .patient_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TriageError::Validation("missing patient_id".into()))?;

        let timestamp = raw
            .timestamp
            .ok_or_else(|| TriageError::Validation("missing timestamp".into()))?;

        if let Some(last) = last_accepted {
            if timestamp <= last {
                return Err(TriageError::Validation(format!(
                    "out-of-order reading for {}: {} is not after {}",
                    patient_id,
                    timestamp.to_rfc3339(),
                    last.to_rfc3339()
                )));
            }
        }

        let heart_rate = raw
            .heart_rate
            .ok_or_else(|| TriageError::Validation("missing heart_rate".into()))?;
        if !heart_rate.is_finite() {
            return Err(TriageError::Validation("heart_rate is not a number".into()));
        }

        let mut suspect = false;

        let heart_rate = clamp(heart_rate, HEART_RATE_BOUNDS, &mut suspect);
        let temperature = clamp_optional(raw.temperature, TEMPERATURE_BOUNDS, &mut suspect);
        let oxygen_saturation =
            clamp_optional(raw.oxygen_saturation, OXYGEN_BOUNDS, &mut suspect);
        let systolic = clamp_optional(raw.systolic, SYSTOLIC_BOUNDS, &mut suspect);
        let diastolic = clamp_optional(raw.diastolic, DIASTOLIC_BOUNDS, &mut suspect);
        let battery_level = clamp_optional(raw.battery_level, BATTERY_BOUNDS, &mut suspect);
        let location = raw
            .location
            .and_then(|loc| normalize_location(loc, &mut suspect));

        Ok(Reading {
            patient_id: patient_id.to_string(),
            timestamp,
            heart_rate,
            temperature,
            oxygen_saturation,
            systolic,
            diastolic,
            battery_level,
            location,
            fall_detected: raw.fall_detected.unwrap_or(false),
            suspect,
        })
    }
}

fn clamp(value: f64, (min, max): (f64, f64), suspect: &mut bool) -> f64 {
    if value < min || value > max {
        *suspect = true;
    }
    value.clamp(min, max)
}

/// Non-finite optional values are dropped, since there is nothing to clamp.
fn clamp_optional(value: Option<f64>, bounds: (f64, f64), suspect: &mut bool) -> Option<f64> {
    match value {
        Some(v) if v.is_finite() => Some(clamp(v, bounds, suspect)),
        Some(_) => {
            *suspect = true;
            None
        }
        None => None,
    }
}

fn normalize_location(loc: Location, suspect: &mut bool) -> Option<Location> {
    if !loc.latitude.is_finite() || !loc.longitude.is_finite() {
        *suspect = true;
        return None;
    }
    Some(Location {
        latitude: clamp(loc.latitude, (-90.0, 90.0), suspect),
        longitude: clamp(loc.longitude, (-180.0, 180.0), suspect),
    })
}
