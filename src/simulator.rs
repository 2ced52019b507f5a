//! Simulated wearable
//!
//! Generates near-canonical samples for demos and tests. Output is fully
//! determined by the seed. Every scenario starts with a few stable samples
//! before its condition sets in.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TriageError;
use crate::types::{Location, RawReading};

/// Stable samples emitted before a scenario's condition starts
pub const ONSET_TICKS: u64 = 3;

/// Default sample interval (seconds)
pub const DEFAULT_INTERVAL_SECS: i64 = 5;

/// Simulated clinical course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Stable,
    Tachycardia,
    Hypoxia,
    Fever,
    Fall,
    /// Device goes silent
    Dropout,
    LowBattery,
}

impl Scenario {
    pub const ALL: [Scenario; 7] = [
        Scenario::Stable,
        Scenario::Tachycardia,
        Scenario::Hypoxia,
        Scenario::Fever,
        Scenario::Fall,
        Scenario::Dropout,
        Scenario::LowBattery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Stable => "stable",
            Scenario::Tachycardia => "tachycardia",
            Scenario::Hypoxia => "hypoxia",
            Scenario::Fever => "fever",
            Scenario::Fall => "fall",
            Scenario::Dropout => "dropout",
            Scenario::LowBattery => "low_battery",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == wanted)
            .ok_or_else(|| TriageError::Validation(format!("unknown scenario: {}", s)))
    }
}

/// Seeded vital-sign generator for one patient
#[derive(Debug, Clone)]
pub struct VitalsSimulator {
    patient_id: String,
    scenario: Scenario,
    rng: StdRng,
    clock: DateTime<Utc>,
    interval: Duration,
    tick: u64,
    heart_rate: f64,
    battery: f64,
    home: Location,
}

impl VitalsSimulator {
    pub fn new(
        patient_id: impl Into<String>,
        scenario: Scenario,
        seed: u64,
        start: DateTime<Utc>,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let heart_rate = 75.0 + rng.gen::<f64>() * 10.0;
        let home = Location {
            latitude: 40.7128 + rng.gen_range(-0.05..0.05),
            longitude: -74.0060 + rng.gen_range(-0.05..0.05),
        };
        Self {
            patient_id: patient_id.into(),
            scenario,
            rng,
            clock: start,
            interval: Duration::seconds(DEFAULT_INTERVAL_SECS),
            tick: 0,
            heart_rate,
            battery: 85.0,
            home,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Advance one interval. `None` means the device stayed silent.
    pub fn next_reading(&mut self) -> Option<RawReading> {
        let timestamp = self.clock;
        let tick = self.tick;
        self.clock = self.clock + self.interval;
        self.tick += 1;

        let onset = tick >= ONSET_TICKS;
        if onset && self.scenario == Scenario::Dropout {
            return None;
        }

        // Baseline random walk, kept inside the normal band
        self.heart_rate = (self.heart_rate + self.jitter(2.0)).clamp(62.0, 95.0);
        self.battery = (self.battery - 0.05 + self.jitter(0.02)).clamp(20.0, 100.0);

        let mut reading = RawReading {
            patient_id: Some(self.patient_id.clone()),
            timestamp: Some(timestamp),
            heart_rate: Some(self.heart_rate),
            temperature: Some(36.5 + self.jitter(0.5)),
            oxygen_saturation: Some(98.0 + self.jitter(1.0)),
            systolic: Some(120.0 + self.jitter(10.0)),
            diastolic: Some(80.0 + self.jitter(5.0)),
            battery_level: Some(self.battery),
            location: Some(Location {
                latitude: self.home.latitude + self.jitter(0.0002),
                longitude: self.home.longitude + self.jitter(0.0002),
            }),
            fall_detected: Some(false),
        };

        if onset {
            match self.scenario {
                Scenario::Stable | Scenario::Dropout => {}
                Scenario::Tachycardia => {
                    reading.heart_rate = Some(140.0 + self.rng.gen::<f64>() * 10.0);
                }
                Scenario::Hypoxia => {
                    reading.oxygen_saturation = Some(85.0 + self.jitter(2.0));
                }
                Scenario::Fever => {
                    reading.temperature = Some(39.5 + self.jitter(0.4));
                    reading.heart_rate = Some(self.heart_rate.max(90.0));
                }
                Scenario::Fall => {
                    reading.fall_detected = Some(tick == ONSET_TICKS);
                }
                Scenario::LowBattery => {
                    reading.battery_level = Some(10.0 + self.jitter(2.0));
                }
            }
        }

        Some(reading)
    }

    /// The next `ticks` intervals, skipping silent ones
    pub fn readings(&mut self, ticks: usize) -> Vec<RawReading> {
        (0..ticks).filter_map(|_| self.next_reading()).collect()
    }

    /// Uniform noise in `[-width/2, width/2)`
    fn jitter(&mut self, width: f64) -> f64 {
        (self.rng.gen::<f64>() - 0.5) * width
    }
}
