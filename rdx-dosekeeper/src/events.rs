//! Defines the values the scheduler emits and the events the engine
//! broadcasts.
//!
//! The scheduler never touches a device. Each tick it returns a
//! [`TickOutput`] listing the side effects to perform ([`Request`]), the
//! doses that reached an end ([`Outcome`]) and every state change it made
//! ([`Transition`]). The engine executes the requests and republishes the
//! rest on its event bus.

use crate::common::DoseId;
use crate::components::record::{DoseState, SensorSnapshot};
use crate::error::SchedulerError;
use chrono::{DateTime, Utc};
use std::fmt;
use tokio::time::Instant;

/// How urgently a notification should reach the caregiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

/// A side effect the driving loop must perform against a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Ask the verification device to confirm the patient for this dose.
    Verify(DoseId),
    /// Release one dose.
    Dispense(DoseId),
    /// Take a post-dispense health sample.
    Sample(DoseId),
    /// Deliver a message to the caregiver channel.
    Notify {
        dose: DoseId,
        message: String,
        severity: Severity,
    },
}

impl Request {
    pub fn dose(&self) -> &DoseId {
        match self {
            Request::Verify(dose) | Request::Dispense(dose) | Request::Sample(dose) => dose,
            Request::Notify { dose, .. } => dose,
        }
    }
}

/// Why a verification attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    Denied,
    TimedOut,
}

/// A dose reached an end state, or recorded its post-dispense sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        dose: DoseId,
        dispensed_at: DateTime<Utc>,
    },
    SnapshotRecorded {
        dose: DoseId,
        snapshot: Option<SensorSnapshot>,
    },
    VerificationFailed {
        dose: DoseId,
        attempt: u32,
        reason: VerificationFailure,
    },
    DispenseFailed {
        dose: DoseId,
        reason: String,
    },
    Missed {
        dose: DoseId,
    },
}

/// One state change applied to a dose record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub dose: DoseId,
    pub from: DoseState,
    pub to: DoseState,
}

/// Everything one scheduler call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutput {
    pub requests: Vec<Request>,
    pub outcomes: Vec<Outcome>,
    pub transitions: Vec<Transition>,
}

impl TickOutput {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.outcomes.is_empty() && self.transitions.is_empty()
    }

    /// Appends everything in `other` after this output's own entries.
    pub fn merge(&mut self, other: TickOutput) {
        self.requests.extend(other.requests);
        self.outcomes.extend(other.outcomes);
        self.transitions.extend(other.transitions);
    }
}

/// Events related to the lifecycle of the engine itself.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Fired once when the engine's `run` loop begins.
    EngineStarted { timestamp: Instant },
    /// Fired after every control cycle.
    CycleCompleted {
        cycle: u64,
        at: DateTime<Utc>,
        requests_served: usize,
    },
    /// Fired once when the engine's `run` loop is about to exit.
    EngineShutdown,
}

/// Dose-level events republished by the engine.
#[derive(Debug, Clone)]
pub enum DoseEvent {
    StateChanged(Transition),
    Finished(Outcome),
    /// The notifier failed; the dose itself is unaffected.
    NotificationFailed {
        dose: DoseId,
        severity: Severity,
        error: String,
    },
    /// A device result was rejected by the scheduler.
    DriverError(SchedulerError),
}
