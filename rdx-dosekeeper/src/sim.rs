//! Simulated devices.
//!
//! Two families live here:
//!
//! - **Placeholder devices** ([`SimVerifier`], [`SimActuator`],
//!   [`SimSensors`], [`LogNotifier`]) stand in for hardware that is not
//!   wired up yet. They always succeed and log what real hardware would do.
//! - **Scripted devices**, built from a [`ScriptedRig`], answer from queues
//!   that a test or the bench shell fills in advance, and record every call
//!   in a shared [`DeviceLog`].

use crate::common::DoseId;
use crate::components::record::SensorReading;
use crate::error::{DeviceError, DispenseFault};
use crate::events::Severity;
use crate::ports::{Actuator, Devices, Notifier, SensorPort, Verdict, Verifier};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::info;

/// The measurements the placeholder sensors report.
pub const NOMINAL_READING: SensorReading = SensorReading {
    heart_rate_bpm: Some(72),
    spo2_percent: Some(98),
    temperature_c: Some(36.6),
};

// --- Placeholder devices ---

/// Accepts every fingerprint after a simulated scan.
#[derive(Debug, Clone)]
pub struct SimVerifier {
    pub scan_time: Duration,
}

impl Default for SimVerifier {
    fn default() -> Self {
        Self {
            scan_time: Duration::from_secs(1),
        }
    }
}

impl Verifier for SimVerifier {
    async fn verify(&mut self, dose: &DoseId) -> Result<Verdict, DeviceError> {
        info!(
            "Waiting for fingerprint scan for the {} dose of {}...",
            dose.slot, dose.date
        );
        tokio::time::sleep(self.scan_time).await;
        info!("Fingerprint verified.");
        Ok(Verdict::Allow)
    }
}

/// Logs the disk rotation instead of driving a stepper motor.
#[derive(Debug, Clone, Default)]
pub struct SimActuator;

impl Actuator for SimActuator {
    async fn dispense(&mut self, dose: &DoseId) -> Result<(), DispenseFault> {
        info!("Dispensing pill for {}...", dose);
        Ok(())
    }
}

/// Reports fixed, healthy measurements.
#[derive(Debug, Clone, Default)]
pub struct SimSensors;

impl SensorPort for SimSensors {
    async fn sample(&mut self) -> Result<SensorReading, DeviceError> {
        Ok(NOMINAL_READING)
    }
}

/// Writes notifications to the log instead of a GSM modem.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(&mut self, message: &str, severity: Severity) -> Result<(), DeviceError> {
        info!("Sending {} notification: {}", severity, message);
        Ok(())
    }
}

/// The placeholder device set used by `dosekeeperd`.
pub fn placeholder_devices() -> Devices<SimVerifier, SimActuator, SimSensors, LogNotifier> {
    Devices {
        verifier: SimVerifier::default(),
        actuator: SimActuator,
        sensors: SimSensors,
        notifier: LogNotifier,
    }
}

// --- Scripted devices ---

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A shared queue of canned answers with a fallback once it runs dry.
#[derive(Debug)]
pub struct Script<T> {
    inner: Arc<Mutex<ScriptState<T>>>,
}

#[derive(Debug)]
struct ScriptState<T> {
    queued: VecDeque<T>,
    fallback: T,
}

impl<T> Clone for Script<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Script<T> {
    pub fn new(fallback: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptState {
                queued: VecDeque::new(),
                fallback,
            })),
        }
    }

    /// Queues an answer for the next call.
    pub fn push(&self, step: T) {
        lock(&self.inner).queued.push_back(step);
    }

    /// Changes the answer given once the queue is empty.
    pub fn set_fallback(&self, step: T) {
        lock(&self.inner).fallback = step;
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner).queued.len()
    }

    fn next(&self) -> T {
        let mut state = lock(&self.inner);
        match state.queued.pop_front() {
            Some(step) => step,
            None => state.fallback.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyStep {
    Allow,
    Deny,
    /// Never answers; the engine's timeout has to fire.
    Hang,
    Fail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispenseStep {
    Ok,
    Fault(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorStep {
    Reading(SensorReading),
    Hang,
    Fail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyStep {
    Ok,
    Fail(String),
}

/// One call made against a scripted device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Verify(DoseId),
    Dispense(DoseId),
    Sample,
    Notify { message: String, severity: Severity },
}

/// The ordered history of calls across all scripted devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceLog {
    calls: Arc<Mutex<Vec<DeviceCall>>>,
}

impl DeviceLog {
    fn push(&self, call: DeviceCall) {
        lock(&self.calls).push(call);
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.calls).clone()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    /// Messages handed to the notifier, in order.
    pub fn notifications(&self) -> Vec<(String, Severity)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                DeviceCall::Notify { message, severity } => Some((message.clone(), *severity)),
                _ => None,
            })
            .collect()
    }
}

/// Owns the scripts for one set of scripted devices.
#[derive(Debug, Clone)]
pub struct ScriptedRig {
    pub verify: Script<VerifyStep>,
    pub dispense: Script<DispenseStep>,
    pub sensor: Script<SensorStep>,
    pub notify: Script<NotifyStep>,
    pub log: DeviceLog,
}

impl Default for ScriptedRig {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRig {
    /// A rig whose devices all succeed until told otherwise.
    pub fn new() -> Self {
        Self {
            verify: Script::new(VerifyStep::Allow),
            dispense: Script::new(DispenseStep::Ok),
            sensor: Script::new(SensorStep::Reading(NOMINAL_READING)),
            notify: Script::new(NotifyStep::Ok),
            log: DeviceLog::default(),
        }
    }

    pub fn devices(
        &self,
    ) -> Devices<ScriptedVerifier, ScriptedActuator, ScriptedSensors, ScriptedNotifier> {
        Devices {
            verifier: ScriptedVerifier {
                script: self.verify.clone(),
                log: self.log.clone(),
            },
            actuator: ScriptedActuator {
                script: self.dispense.clone(),
                log: self.log.clone(),
            },
            sensors: ScriptedSensors {
                script: self.sensor.clone(),
                log: self.log.clone(),
            },
            notifier: ScriptedNotifier {
                script: self.notify.clone(),
                log: self.log.clone(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedVerifier {
    script: Script<VerifyStep>,
    log: DeviceLog,
}

impl Verifier for ScriptedVerifier {
    async fn verify(&mut self, dose: &DoseId) -> Result<Verdict, DeviceError> {
        self.log.push(DeviceCall::Verify(dose.clone()));
        match self.script.next() {
            VerifyStep::Allow => Ok(Verdict::Allow),
            VerifyStep::Deny => Ok(Verdict::Deny),
            VerifyStep::Hang => std::future::pending().await,
            VerifyStep::Fail(reason) => Err(DeviceError::Unavailable(reason)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedActuator {
    script: Script<DispenseStep>,
    log: DeviceLog,
}

impl Actuator for ScriptedActuator {
    async fn dispense(&mut self, dose: &DoseId) -> Result<(), DispenseFault> {
        self.log.push(DeviceCall::Dispense(dose.clone()));
        match self.script.next() {
            DispenseStep::Ok => Ok(()),
            DispenseStep::Fault(reason) => Err(DispenseFault::new(reason)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedSensors {
    script: Script<SensorStep>,
    log: DeviceLog,
}

impl SensorPort for ScriptedSensors {
    async fn sample(&mut self) -> Result<SensorReading, DeviceError> {
        self.log.push(DeviceCall::Sample);
        match self.script.next() {
            SensorStep::Reading(reading) => Ok(reading),
            SensorStep::Hang => std::future::pending().await,
            SensorStep::Fail(reason) => Err(DeviceError::Io(reason)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedNotifier {
    script: Script<NotifyStep>,
    log: DeviceLog,
}

impl Notifier for ScriptedNotifier {
    async fn send(&mut self, message: &str, severity: Severity) -> Result<(), DeviceError> {
        self.log.push(DeviceCall::Notify {
            message: message.to_string(),
            severity,
        });
        match self.script.next() {
            NotifyStep::Ok => Ok(()),
            NotifyStep::Fail(reason) => Err(DeviceError::Unavailable(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_falls_back_when_queue_is_empty() {
        let script = Script::new(VerifyStep::Allow);
        script.push(VerifyStep::Deny);
        assert_eq!(script.pending(), 1);
        assert_eq!(script.next(), VerifyStep::Deny);
        assert_eq!(script.next(), VerifyStep::Allow);
        script.set_fallback(VerifyStep::Hang);
        assert_eq!(script.next(), VerifyStep::Hang);
    }

    #[tokio::test]
    async fn scripted_devices_share_one_log() {
        let rig = ScriptedRig::new();
        rig.dispense.push(DispenseStep::Fault("jam".into()));
        let mut devices = rig.devices();
        let dose = DoseId::new("morning", chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());

        assert_eq!(devices.verifier.verify(&dose).await, Ok(Verdict::Allow));
        assert_eq!(
            devices.actuator.dispense(&dose).await,
            Err(DispenseFault::new("jam"))
        );
        assert_eq!(devices.sensors.sample().await, Ok(NOMINAL_READING));
        devices.notifier.send("hello", Severity::Info).await.unwrap();

        assert_eq!(
            rig.log.calls(),
            vec![
                DeviceCall::Verify(dose.clone()),
                DeviceCall::Dispense(dose),
                DeviceCall::Sample,
                DeviceCall::Notify {
                    message: "hello".into(),
                    severity: Severity::Info
                },
            ]
        );
    }
}
