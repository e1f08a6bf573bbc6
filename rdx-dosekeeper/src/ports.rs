//! Port traits: the boundary between the engine and dispenser hardware.
//!
//! ```text
//!   Device driver ──▶ Port trait ──▶ DispenserEngine ──▶ DoseScheduler
//! ```
//!
//! Fingerprint readers, the dispensing disk, health sensors and the
//! GSM/Wi-Fi notifier implement these traits. The engine consumes them via
//! generics, so the scheduling core never touches hardware directly.
//!
//! Every call may take real time (a fingerprint scan, a motor rotation), so
//! each port returns a `Send` future. The engine awaits one at a time.

use crate::common::DoseId;
use crate::components::record::SensorReading;
use crate::error::{DeviceError, DispenseFault};
use crate::events::Severity;
use std::future::Future;

/// The verification device's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

/// Confirms the patient before a dose is released.
///
/// `dose` names both the slot and the day, so a driver can tell a late
/// evening dose from the next day's.
pub trait Verifier {
    fn verify(&mut self, dose: &DoseId)
        -> impl Future<Output = Result<Verdict, DeviceError>> + Send;
}

/// Performs exactly one physical dispense.
pub trait Actuator {
    fn dispense(&mut self, dose: &DoseId) -> impl Future<Output = Result<(), DispenseFault>> + Send;
}

/// Takes one set of health measurements.
pub trait SensorPort {
    fn sample(&mut self) -> impl Future<Output = Result<SensorReading, DeviceError>> + Send;
}

/// Sends a message to the caregiver or patient channel. Best-effort.
pub trait Notifier {
    fn send(
        &mut self,
        message: &str,
        severity: Severity,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;
}

/// The full set of devices one dispenser drives.
pub struct Devices<V, A, S, N> {
    pub verifier: V,
    pub actuator: A,
    pub sensors: S,
    pub notifier: N,
}
