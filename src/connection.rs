//! Telemetry liveness tracking
//!
//! Derives a per-patient connection state purely from reading arrival times.
//! Any reading moves the stream back to CONNECTED; silence is detected by a
//! periodic sweep that runs independently of arrivals.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;
use crate::types::{ConnectionState, ConnectionStatus};

/// A change of connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTransition {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
    pub at: DateTime<Utc>,
}

impl ConnectionTransition {
    /// Stream was lost
    pub fn is_loss(&self) -> bool {
        self.to == ConnectionStatus::Disconnected && self.from != ConnectionStatus::Disconnected
    }

    /// Stream came back after degradation or loss
    pub fn is_recovery(&self) -> bool {
        self.to == ConnectionStatus::Connected && self.from != ConnectionStatus::Connected
    }
}

/// Connection state machine for one patient
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    patient_id: String,
    status: ConnectionStatus,
    last_reading_at: Option<DateTime<Utc>>,
    grace_period: Duration,
    timeout: Duration,
    closed: bool,
}

impl ConnectionMonitor {
    /// A new monitor starts DISCONNECTED with no reading seen.
    pub fn new(patient_id: impl Into<String>, config: &ConnectionConfig) -> Self {
        Self {
            patient_id: patient_id.into(),
            status: ConnectionStatus::Disconnected,
            last_reading_at: None,
            grace_period: config.grace_period(),
            timeout: config.timeout(),
            closed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState {
            patient_id: self.patient_id.clone(),
            status: self.status,
            last_reading_at: self.last_reading_at,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Closed streams are skipped by liveness sweeps
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Record a reading arrival; re-opens a closed stream.
    pub fn on_reading(&mut self, at: DateTime<Utc>) -> Option<ConnectionTransition> {
        self.last_reading_at = Some(at);
        self.closed = false;
        self.transition(ConnectionStatus::Connected, at)
    }

    /// Periodic liveness check. May jump straight to DISCONNECTED when the
    /// sweep interval is longer than the grace period.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Option<ConnectionTransition> {
        if self.closed {
            return None;
        }
        let last = self.last_reading_at?;
        let silence = now - last;

        let target = if silence >= self.timeout {
            ConnectionStatus::Disconnected
        } else if silence >= self.grace_period {
            ConnectionStatus::Degraded
        } else {
            ConnectionStatus::Connected
        };

        // Sweeps only ever degrade; recovery needs a reading.
        if rank(target) <= rank(self.status) {
            return None;
        }
        self.transition(target, now)
    }

    /// Close the stream: force DISCONNECTED and stop sweeping.
    pub fn close(&mut self, now: DateTime<Utc>) -> Option<ConnectionTransition> {
        self.closed = true;
        if self.status == ConnectionStatus::Disconnected && self.last_reading_at.is_none() {
            return None;
        }
        self.transition(ConnectionStatus::Disconnected, now)
    }

    fn transition(
        &mut self,
        to: ConnectionStatus,
        at: DateTime<Utc>,
    ) -> Option<ConnectionTransition> {
        if self.status == to {
            return None;
        }
        let from = std::mem::replace(&mut self.status, to);
        match to {
            ConnectionStatus::Disconnected => tracing::warn!(
                patient_id = %self.patient_id,
                from = %from,
                "Telemetry stream disconnected"
            ),
            ConnectionStatus::Degraded => tracing::debug!(
                patient_id = %self.patient_id,
                "Telemetry stream degraded"
            ),
            ConnectionStatus::Connected => tracing::debug!(
                patient_id = %self.patient_id,
                from = %from,
                "Telemetry stream connected"
            ),
        }
        Some(ConnectionTransition { from, to, at })
    }
}

fn rank(status: ConnectionStatus) -> u8 {
    match status {
        ConnectionStatus::Connected => 0,
        ConnectionStatus::Degraded => 1,
        ConnectionStatus::Disconnected => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn monitor() -> ConnectionMonitor {
        ConnectionMonitor::new("p-1", &ConnectionConfig::default())
    }

    #[test]
    fn test_first_reading_connects() {
        let mut m = monitor();
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
        assert!(m.sweep(at(600)).is_none());

        let t = m.on_reading(at(0)).unwrap();
        assert_eq!(t.to, ConnectionStatus::Connected);
        assert!(!t.is_loss());
        assert_eq!(m.state().last_reading_at, Some(at(0)));
    }

    #[test]
    fn test_silence_degrades_then_disconnects() {
        let mut m = monitor();
        m.on_reading(at(0));

        assert!(m.sweep(at(14)).is_none());
        let t = m.sweep(at(15)).unwrap();
        assert_eq!(t.to, ConnectionStatus::Degraded);
        assert!(m.sweep(at(30)).is_none());

        assert!(m.sweep(at(59)).is_none());
        let t = m.sweep(at(60)).unwrap();
        assert_eq!(t.from, ConnectionStatus::Degraded);
        assert_eq!(t.to, ConnectionStatus::Disconnected);
        assert!(t.is_loss());
        assert!(m.sweep(at(120)).is_none());
    }

    #[test]
    fn test_sweep_can_skip_degraded() {
        let mut m = monitor();
        m.on_reading(at(0));
        let t = m.sweep(at(90)).unwrap();
        assert_eq!(t.from, ConnectionStatus::Connected);
        assert_eq!(t.to, ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_reading_recovers_from_any_state() {
        let mut m = monitor();
        m.on_reading(at(0));
        m.sweep(at(70));

        let t = m.on_reading(at(71)).unwrap();
        assert!(t.is_recovery());
        assert_eq!(m.status(), ConnectionStatus::Connected);
        assert!(m.on_reading(at(72)).is_none());
    }

    #[test]
    fn test_close_forces_disconnect_and_stops_sweeps() {
        let mut m = monitor();
        m.on_reading(at(0));

        let t = m.close(at(5)).unwrap();
        assert!(t.is_loss());
        assert!(m.is_closed());
        assert!(m.sweep(at(500)).is_none());

        m.on_reading(at(600));
        assert!(!m.is_closed());
        assert_eq!(m.status(), ConnectionStatus::Connected);
    }
}
