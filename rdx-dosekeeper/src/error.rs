//! Error types for the Dosekeeper crate.
//!
//! Only [`ConfigError`] is fatal, and only at startup. Everything the control
//! loop can hit while tracking doses is recoverable: the engine logs it and
//! moves on to the next request.

use crate::common::DoseId;
use crate::components::record::DoseState;
use thiserror::Error;

/// Contract violations at the boundary between the scheduler and the
/// driving loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A result was fed back for a dose that is not in the state the
    /// result belongs to (e.g. a dispense result for a `Missed` dose).
    #[error("invalid transition for {dose}: {operation} requires {expected}, record is {actual}")]
    InvalidTransition {
        dose: DoseId,
        operation: &'static str,
        expected: &'static str,
        actual: DoseState,
    },

    /// A result was fed back for a dose the scheduler has never opened.
    #[error("unknown dose {0}")]
    UnknownDose(DoseId),
}

/// Failures reported by an external device while serving a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device timed out")]
    Timeout,
    #[error("device unavailable: {0}")]
    Unavailable(String),
    #[error("device I/O failure: {0}")]
    Io(String),
}

/// A hardware-level failure reported by the dispense actuator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct DispenseFault {
    pub reason: String,
}

impl DispenseFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A sensor reading that cannot form a valid snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapshotError {
    #[error("missing measurement: {0}")]
    Missing(&'static str),
    #[error("heart rate must be positive, got {0} bpm")]
    HeartRate(u16),
    #[error("SpO2 must be within 0-100 %, got {0}")]
    Spo2(u8),
    #[error("temperature {0} °C is outside the physiological range")]
    Temperature(f32),
}

/// Unrecoverable problems with the dispenser configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("the schedule does not define any dose slots")]
    EmptySchedule,
    #[error("slot identifiers must not be empty")]
    EmptySlotId,
    #[error("slot '{0}' is defined more than once")]
    DuplicateSlot(String),
    #[error("slot '{slot}' has an unparsable time of day '{value}'")]
    InvalidTime { slot: String, value: String },
    #[error("slot '{slot}': {reason}")]
    InvalidWindow { slot: String, reason: &'static str },
    #[error("invalid setting '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
