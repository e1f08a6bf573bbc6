//! Defines the per-day dose record, its lifecycle states, and the health
//! snapshot attached to a completed dose.

use crate::common::DoseId;
use crate::error::SnapshotError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::ops::RangeInclusive;

/// Accepted body temperatures in °C.
pub const TEMPERATURE_RANGE_C: RangeInclusive<f32> = 30.0..=45.0;

/// The lifecycle of one dose.
///
/// ```text
///  Pending ──▶ Due ──▶ Verifying ──▶ Dispensing ──▶ Completed
///     │         ▲ │        │               │
///     │         │ │        ▼               └──▶ DispenseFailed
///     │         └─┼── VerificationFailed
///     │           │        │
///     └───────────┴────────┴──▶ Missed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoseState {
    Pending,
    Due,
    Verifying,
    VerificationFailed,
    Dispensing,
    Completed,
    DispenseFailed,
    Missed,
}

impl DoseState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: DoseState) -> bool {
        use DoseState::*;
        matches!(
            (self, next),
            (Pending, Due)
                | (Pending, Missed)
                | (Due, Verifying)
                | (Due, Missed)
                | (Verifying, Dispensing)
                | (Verifying, VerificationFailed)
                | (Verifying, Missed)
                | (VerificationFailed, Due)
                | (VerificationFailed, Missed)
                | (Dispensing, Completed)
                | (Dispensing, DispenseFailed)
        )
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DoseState::Completed | DoseState::DispenseFailed | DoseState::Missed
        )
    }

    /// States from which a dose can still be declared missed, i.e. the
    /// dose has not reached `Dispensing`.
    pub fn awaiting_dispense(self) -> bool {
        matches!(
            self,
            DoseState::Pending
                | DoseState::Due
                | DoseState::Verifying
                | DoseState::VerificationFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DoseState::Pending => "pending",
            DoseState::Due => "due",
            DoseState::Verifying => "verifying",
            DoseState::VerificationFailed => "verification-failed",
            DoseState::Dispensing => "dispensing",
            DoseState::Completed => "completed",
            DoseState::DispenseFailed => "dispense-failed",
            DoseState::Missed => "missed",
        }
    }
}

impl fmt::Display for DoseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable capture of health measurements taken after a dispense.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    heart_rate_bpm: u16,
    spo2_percent: u8,
    temperature_c: f32,
}

impl SensorSnapshot {
    pub fn new(
        heart_rate_bpm: u16,
        spo2_percent: u8,
        temperature_c: f32,
    ) -> Result<Self, SnapshotError> {
        if heart_rate_bpm == 0 {
            return Err(SnapshotError::HeartRate(heart_rate_bpm));
        }
        if spo2_percent > 100 {
            return Err(SnapshotError::Spo2(spo2_percent));
        }
        if !TEMPERATURE_RANGE_C.contains(&temperature_c) {
            return Err(SnapshotError::Temperature(temperature_c));
        }
        Ok(Self {
            heart_rate_bpm,
            spo2_percent,
            temperature_c,
        })
    }

    pub fn heart_rate_bpm(&self) -> u16 {
        self.heart_rate_bpm
    }

    pub fn spo2_percent(&self) -> u8 {
        self.spo2_percent
    }

    pub fn temperature_c(&self) -> f32 {
        self.temperature_c
    }
}

impl fmt::Display for SensorSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "heart_rate={} bpm spo2={} % temperature={:.1} °C",
            self.heart_rate_bpm, self.spo2_percent, self.temperature_c
        )
    }
}

/// A raw, possibly partial, reading as delivered by the sensor hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReading {
    pub heart_rate_bpm: Option<u16>,
    pub spo2_percent: Option<u8>,
    pub temperature_c: Option<f32>,
}

impl TryFrom<SensorReading> for SensorSnapshot {
    type Error = SnapshotError;

    fn try_from(reading: SensorReading) -> Result<Self, Self::Error> {
        SensorSnapshot::new(
            reading
                .heart_rate_bpm
                .ok_or(SnapshotError::Missing("heart_rate"))?,
            reading.spo2_percent.ok_or(SnapshotError::Missing("spo2"))?,
            reading
                .temperature_c
                .ok_or(SnapshotError::Missing("temperature"))?,
        )
    }
}

/// One calendar-day instance of a dose slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseRecord {
    pub dose: DoseId,
    pub scheduled_at: DateTime<Utc>,
    state: DoseState,
    pub verification_attempts: u32,
    pub verification_attempted_at: Option<DateTime<Utc>>,
    pub dispensed_at: Option<DateTime<Utc>>,
    pub snapshot: Option<SensorSnapshot>,
    /// Set while a post-dispense sample is outstanding.
    pub sample_pending: bool,
    pub missed_notification_sent: bool,
}

impl DoseRecord {
    pub fn new(dose: DoseId, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            dose,
            scheduled_at,
            state: DoseState::Pending,
            verification_attempts: 0,
            verification_attempted_at: None,
            dispensed_at: None,
            snapshot: None,
            sample_pending: false,
            missed_notification_sent: false,
        }
    }

    pub fn state(&self) -> DoseState {
        self.state
    }

    /// Moves the record to `next`, returning the previous state.
    ///
    /// Disallowed moves leave the record untouched and hand back the
    /// current state as the error.
    pub(crate) fn advance(&mut self, next: DoseState) -> Result<DoseState, DoseState> {
        if !self.state.can_transition_to(next) {
            return Err(self.state);
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    const ALL: [DoseState; 8] = [
        DoseState::Pending,
        DoseState::Due,
        DoseState::Verifying,
        DoseState::VerificationFailed,
        DoseState::Dispensing,
        DoseState::Completed,
        DoseState::DispenseFailed,
        DoseState::Missed,
    ];

    fn record() -> DoseRecord {
        DoseRecord::new(
            DoseId::new("morning", NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()),
            Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
        )
    }

    #[test]
    fn nothing_returns_to_pending() {
        for from in ALL {
            assert!(!from.can_transition_to(DoseState::Pending), "{from} -> pending");
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn missed_is_unreachable_once_dispensing() {
        assert!(!DoseState::Dispensing.can_transition_to(DoseState::Missed));
        assert!(!DoseState::Dispensing.awaiting_dispense());
        assert!(DoseState::VerificationFailed.awaiting_dispense());
    }

    #[test]
    fn advance_rejects_illegal_moves() {
        let mut record = record();
        assert_eq!(record.advance(DoseState::Dispensing), Err(DoseState::Pending));
        assert_eq!(record.state(), DoseState::Pending);
        assert_eq!(record.advance(DoseState::Due), Ok(DoseState::Pending));
        assert_eq!(record.state(), DoseState::Due);
    }

    #[test]
    fn snapshot_validates_ranges() {
        assert!(SensorSnapshot::new(72, 98, 36.6).is_ok());
        assert_eq!(SensorSnapshot::new(0, 98, 36.6), Err(SnapshotError::HeartRate(0)));
        assert_eq!(SensorSnapshot::new(72, 101, 36.6), Err(SnapshotError::Spo2(101)));
        assert!(matches!(
            SensorSnapshot::new(72, 98, 12.0),
            Err(SnapshotError::Temperature(_))
        ));
    }

    #[test]
    fn partial_reading_is_not_a_snapshot() {
        let reading = SensorReading {
            heart_rate_bpm: Some(72),
            spo2_percent: None,
            temperature_c: Some(36.6),
        };
        assert_eq!(
            SensorSnapshot::try_from(reading),
            Err(SnapshotError::Missing("spo2"))
        );
    }
}
