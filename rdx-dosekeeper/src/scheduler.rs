//! The dose scheduler: a pure, tick-driven state machine.
//!
//! The scheduler owns the configured slots and one [`DoseRecord`] per
//! `(slot, date)`. It never performs I/O and never reads a clock. The caller
//! passes `now` into [`DoseScheduler::tick`], executes the returned
//! [`Request`]s against real devices, and posts each result back through the
//! `record_*` methods.
//!
//! ```text
//!            tick(now)                       record_*(dose, result)
//!   loop ──────────────▶ DoseScheduler ◀────────────────────────── loop
//!        ◀──────────────  TickOutput { requests, outcomes, transitions }
//! ```
//!
//! Given the same sequence of inputs the outputs are identical, so the whole
//! lifecycle can be scripted in tests without hardware or wall-clock sleeps.
//!
//! The verification device and the dispensing mechanism are single, shared
//! resources. At most one dose holds them at a time: from the moment it
//! starts verifying until its dispense result is recorded, or until it
//! fails verification or is declared missed.

use crate::common::{DoseId, RecordId};
use crate::components::record::{DoseRecord, DoseState, SensorSnapshot};
use crate::components::slot::DoseSlot;
use crate::error::{DispenseFault, SchedulerError};
use crate::events::{Outcome, Request, Severity, TickOutput, Transition, VerificationFailure};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use slotmap::SlotMap;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Scheduling policy that is not specific to a single slot.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub timezone: Tz,
    pub max_verification_attempts: u32,
    /// Minimum gap between two verification attempts for one dose.
    pub retry_after: Duration,
    /// Finished records older than this many days are dropped.
    pub audit_retention_days: u32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            max_verification_attempts: 3,
            retry_after: Duration::seconds(30),
            audit_retention_days: 7,
        }
    }
}

/// Owns the daily schedule and every dose record.
pub struct DoseScheduler {
    slots: Vec<DoseSlot>,
    options: SchedulerOptions,
    records: SlotMap<RecordId, DoseRecord>,
    index: HashMap<DoseId, RecordId>,
    /// The dose currently holding the verifier and the dispenser.
    active: Option<RecordId>,
    /// Time of the most recent tick; stamps results fed back afterwards.
    last_tick: Option<DateTime<Utc>>,
    opened_through: Option<NaiveDate>,
}

impl DoseScheduler {
    /// Creates a scheduler for `slots`. Slot order does not matter.
    pub fn new(mut slots: Vec<DoseSlot>, options: SchedulerOptions) -> Self {
        slots.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
        Self {
            slots,
            options,
            records: SlotMap::with_key(),
            index: HashMap::new(),
            active: None,
            last_tick: None,
            opened_through: None,
        }
    }

    /// Advances every open record to `now` and returns the side effects to
    /// perform.
    ///
    /// Records are evaluated in ascending scheduled instant, then slot id.
    /// At most one `Verify` request is issued per tick, and none while
    /// another dose holds the dispenser.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutput {
        self.last_tick = Some(now);
        let today = now.with_timezone(&self.options.timezone).date_naive();
        self.open_day(today);

        let mut out = TickOutput::default();
        for id in self.open_records_in_order() {
            self.evaluate(id, now, &mut out);
        }
        self.prune(today);
        out
    }

    /// Posts the verification device's answer for `dose`.
    ///
    /// `allowed` moves the dose to `Dispensing` and requests the dispense.
    /// A deny moves it to `VerificationFailed`; a later tick may offer
    /// another attempt inside the grace window.
    pub fn record_verification_result(
        &mut self,
        dose: &DoseId,
        allowed: bool,
    ) -> Result<TickOutput, SchedulerError> {
        let id = self.expect_state(dose, DoseState::Verifying, "record_verification_result")?;
        let mut out = TickOutput::default();
        if allowed {
            self.transition(id, DoseState::Dispensing, &mut out);
            out.requests.push(Request::Dispense(dose.clone()));
        } else {
            self.fail_verification(id, VerificationFailure::Denied, &mut out);
        }
        Ok(out)
    }

    /// Gives up on an outstanding verification that never answered.
    ///
    /// A timeout counts as a deny for this attempt.
    pub fn abandon_verification(&mut self, dose: &DoseId) -> Result<TickOutput, SchedulerError> {
        let id = self.expect_state(dose, DoseState::Verifying, "abandon_verification")?;
        let mut out = TickOutput::default();
        self.fail_verification(id, VerificationFailure::TimedOut, &mut out);
        Ok(out)
    }

    /// Posts the dispense actuator's result for `dose`.
    ///
    /// Success completes the dose and requests a health sample. A fault is
    /// terminal and raises a critical notification.
    pub fn record_dispense_result(
        &mut self,
        dose: &DoseId,
        result: Result<(), DispenseFault>,
    ) -> Result<TickOutput, SchedulerError> {
        let id = self.expect_state(dose, DoseState::Dispensing, "record_dispense_result")?;
        // Records only exist once a tick has run.
        let stamped = self
            .last_tick
            .ok_or_else(|| SchedulerError::UnknownDose(dose.clone()))?;
        let mut out = TickOutput::default();
        self.release(id);
        match result {
            Ok(()) => {
                let dispensed_at = stamped;
                let record = &mut self.records[id];
                record.dispensed_at = Some(dispensed_at);
                record.sample_pending = true;
                self.transition(id, DoseState::Completed, &mut out);
                info!("Dose {} dispensed.", dose);
                out.outcomes.push(Outcome::Completed {
                    dose: dose.clone(),
                    dispensed_at,
                });
                out.requests.push(Request::Sample(dose.clone()));
            }
            Err(fault) => {
                self.transition(id, DoseState::DispenseFailed, &mut out);
                warn!("Dispense fault on {}: {}", dose, fault);
                out.requests.push(Request::Notify {
                    dose: dose.clone(),
                    message: format!("Dispense fault on {} dose: {}", dose.slot, fault),
                    severity: Severity::Critical,
                });
                out.outcomes.push(Outcome::DispenseFailed {
                    dose: dose.clone(),
                    reason: fault.reason,
                });
            }
        }
        Ok(out)
    }

    /// Attaches the post-dispense health sample, or records its absence.
    ///
    /// Accepted once per completed dose. A missing snapshot never changes
    /// the dose's state.
    pub fn record_sensor_snapshot(
        &mut self,
        dose: &DoseId,
        snapshot: Option<SensorSnapshot>,
    ) -> Result<TickOutput, SchedulerError> {
        let id = self.lookup(dose)?;
        let record = &mut self.records[id];
        if record.state() != DoseState::Completed || !record.sample_pending {
            return Err(SchedulerError::InvalidTransition {
                dose: dose.clone(),
                operation: "record_sensor_snapshot",
                expected: "completed awaiting sample",
                actual: record.state(),
            });
        }
        record.sample_pending = false;
        record.snapshot = snapshot;
        match &snapshot {
            Some(snapshot) => info!("Measurements for {}: {}", dose, snapshot),
            None => warn!("No measurements recorded for {}.", dose),
        }
        Ok(TickOutput {
            outcomes: vec![Outcome::SnapshotRecorded {
                dose: dose.clone(),
                snapshot,
            }],
            ..Default::default()
        })
    }

    /// Looks up the record for `dose`, if it has been opened.
    pub fn record(&self, dose: &DoseId) -> Option<&DoseRecord> {
        self.index.get(dose).map(|&id| &self.records[id])
    }

    /// All retained records, ordered by scheduled instant then slot id.
    pub fn records(&self) -> Vec<&DoseRecord> {
        let mut records: Vec<&DoseRecord> = self.records.values().collect();
        records.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.dose.slot.cmp(&b.dose.slot))
        });
        records
    }

    /// The dose currently holding the verifier and dispenser, if any.
    pub fn active_dose(&self) -> Option<&DoseId> {
        self.active.map(|id| &self.records[id].dose)
    }

    pub fn slots(&self) -> &[DoseSlot] {
        &self.slots
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }
}

// Internal state machine.
impl DoseScheduler {
    /// Opens one `Pending` record per slot for `today`, once per day.
    fn open_day(&mut self, today: NaiveDate) {
        if self.opened_through.is_some_and(|opened| opened >= today) {
            return;
        }
        for slot in &self.slots {
            let dose = DoseId::new(slot.id.clone(), today);
            if self.index.contains_key(&dose) {
                continue;
            }
            let scheduled_at = slot.scheduled_at(today, &self.options.timezone);
            let id = self.records.insert(DoseRecord::new(dose.clone(), scheduled_at));
            self.index.insert(dose, id);
        }
        debug!("Opened dose records for {}.", today);
        self.opened_through = Some(today);
    }

    fn open_records_in_order(&self) -> Vec<RecordId> {
        let mut open: Vec<(RecordId, &DoseRecord)> = self
            .records
            .iter()
            .filter(|(_, record)| !record.state().is_terminal())
            .collect();
        open.sort_by(|(_, a), (_, b)| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.dose.slot.cmp(&b.dose.slot))
        });
        open.into_iter().map(|(id, _)| id).collect()
    }

    /// Moves one open record forward.
    ///
    /// A dose that became `Due` inside its grace window but waited for the
    /// lock keeps its place and may start its first verification after the
    /// window has closed. Only the missed threshold ends the wait. Retries,
    /// in contrast, are offered inside the grace window only.
    fn evaluate(&mut self, id: RecordId, now: DateTime<Utc>, out: &mut TickOutput) {
        let Some(slot) = self.slot_for(id).cloned() else {
            return;
        };
        let record = &self.records[id];
        let state = record.state();
        let scheduled_at = record.scheduled_at;

        if state.awaiting_dispense() && slot.is_overdue(scheduled_at, now) {
            self.miss(id, &slot, out);
            return;
        }

        match state {
            DoseState::Pending if slot.is_due(scheduled_at, now) => {
                self.transition(id, DoseState::Due, out);
            }
            DoseState::VerificationFailed if self.may_retry(id, &slot, now) => {
                self.transition(id, DoseState::Due, out);
            }
            _ => {}
        }

        if self.records[id].state() == DoseState::Due && self.active.is_none() {
            self.active = Some(id);
            let record = &mut self.records[id];
            record.verification_attempts += 1;
            record.verification_attempted_at = Some(now);
            let dose = record.dose.clone();
            self.transition(id, DoseState::Verifying, out);
            out.requests.push(Request::Verify(dose));
        }
    }

    fn may_retry(&self, id: RecordId, slot: &DoseSlot, now: DateTime<Utc>) -> bool {
        let record = &self.records[id];
        if record.verification_attempts >= self.options.max_verification_attempts {
            return false;
        }
        if !slot.is_due(record.scheduled_at, now) {
            return false;
        }
        record
            .verification_attempted_at
            .map_or(true, |last| now - last >= self.options.retry_after)
    }

    fn miss(&mut self, id: RecordId, slot: &DoseSlot, out: &mut TickOutput) {
        if self.active == Some(id) {
            self.release(id);
        }
        self.transition(id, DoseState::Missed, out);
        let record = &mut self.records[id];
        let dose = record.dose.clone();
        if !record.missed_notification_sent {
            record.missed_notification_sent = true;
            warn!("Dose {} missed.", dose);
            out.requests.push(Request::Notify {
                dose: dose.clone(),
                message: slot.missed_message(),
                severity: Severity::Warning,
            });
        }
        out.outcomes.push(Outcome::Missed { dose });
    }

    fn fail_verification(
        &mut self,
        id: RecordId,
        reason: VerificationFailure,
        out: &mut TickOutput,
    ) {
        self.release(id);
        self.transition(id, DoseState::VerificationFailed, out);
        let record = &self.records[id];
        warn!(
            "Verification for {} failed ({:?}) on attempt {}; skipping dispense.",
            record.dose, reason, record.verification_attempts
        );
        out.outcomes.push(Outcome::VerificationFailed {
            dose: record.dose.clone(),
            attempt: record.verification_attempts,
            reason,
        });
    }

    fn transition(&mut self, id: RecordId, next: DoseState, out: &mut TickOutput) {
        let record = &mut self.records[id];
        // Callers only request moves the table permits.
        if let Ok(from) = record.advance(next) {
            debug!("Dose {}: {} -> {}", record.dose, from, next);
            out.transitions.push(Transition {
                dose: record.dose.clone(),
                from,
                to: next,
            });
        }
    }

    fn release(&mut self, id: RecordId) {
        if self.active == Some(id) {
            self.active = None;
        }
    }

    fn expect_state(
        &self,
        dose: &DoseId,
        expected: DoseState,
        operation: &'static str,
    ) -> Result<RecordId, SchedulerError> {
        let id = self.lookup(dose)?;
        let actual = self.records[id].state();
        if actual != expected {
            return Err(SchedulerError::InvalidTransition {
                dose: dose.clone(),
                operation,
                expected: expected.as_str(),
                actual,
            });
        }
        Ok(id)
    }

    fn lookup(&self, dose: &DoseId) -> Result<RecordId, SchedulerError> {
        self.index
            .get(dose)
            .copied()
            .ok_or_else(|| SchedulerError::UnknownDose(dose.clone()))
    }

    fn slot_for(&self, id: RecordId) -> Option<&DoseSlot> {
        let slot_id = &self.records[id].dose.slot;
        self.slots.iter().find(|slot| &slot.id == slot_id)
    }

    /// Drops terminal records dated before the retention window.
    fn prune(&mut self, today: NaiveDate) {
        let Some(cutoff) =
            today.checked_sub_days(chrono::Days::new(u64::from(self.options.audit_retention_days)))
        else {
            return;
        };
        let expired: Vec<RecordId> = self
            .records
            .iter()
            .filter(|(_, record)| record.dose.date < cutoff && record.state().is_terminal())
            .map(|(id, _)| id)
            .collect();
        for id in expired {
            if let Some(record) = self.records.remove(id) {
                self.index.remove(&record.dose);
                debug!("Pruned dose record {}.", record.dose);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use pretty_assertions::assert_eq;

    fn slot(id: &str, hour: u32, minute: u32) -> DoseSlot {
        DoseSlot::new(
            id,
            NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
            Duration::minutes(5),
            Duration::minutes(60),
        )
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn morning() -> DoseId {
        DoseId::new("morning", today())
    }

    fn scheduler(slots: Vec<DoseSlot>) -> DoseScheduler {
        DoseScheduler::new(slots, SchedulerOptions::default())
    }

    fn notifications(out: &TickOutput) -> Vec<&str> {
        out.requests
            .iter()
            .filter_map(|r| match r {
                Request::Notify { message, .. } => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_tick_opens_pending_records() {
        let mut s = scheduler(vec![slot("morning", 8, 0), slot("evening", 20, 0)]);
        let out = s.tick(at(6, 0));
        assert!(out.is_empty());
        assert_eq!(s.records().len(), 2);
        assert_eq!(s.record(&morning()).unwrap().state(), DoseState::Pending);
    }

    #[test]
    fn happy_path_completes_without_snapshot() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        let out = s.tick(at(8, 2));
        assert_eq!(out.requests, vec![Request::Verify(morning())]);
        assert_eq!(s.record(&morning()).unwrap().state(), DoseState::Verifying);
        assert_eq!(s.active_dose(), Some(&morning()));

        let out = s.record_verification_result(&morning(), true).unwrap();
        assert_eq!(out.requests, vec![Request::Dispense(morning())]);
        assert_eq!(s.record(&morning()).unwrap().state(), DoseState::Dispensing);

        let out = s.record_dispense_result(&morning(), Ok(())).unwrap();
        assert_eq!(out.requests, vec![Request::Sample(morning())]);
        assert_eq!(s.active_dose(), None);

        s.record_sensor_snapshot(&morning(), None).unwrap();
        let record = s.record(&morning()).unwrap();
        assert_eq!(record.state(), DoseState::Completed);
        assert_eq!(record.snapshot, None);
        assert_eq!(record.dispensed_at, Some(at(8, 2)));
    }

    #[test]
    fn snapshot_is_attached_once() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(8, 0));
        s.record_verification_result(&morning(), true).unwrap();
        s.record_dispense_result(&morning(), Ok(())).unwrap();
        let snapshot = SensorSnapshot::new(72, 98, 36.6).unwrap();
        s.record_sensor_snapshot(&morning(), Some(snapshot)).unwrap();
        assert_eq!(s.record(&morning()).unwrap().snapshot, Some(snapshot));

        let err = s.record_sensor_snapshot(&morning(), None).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
        assert_eq!(s.record(&morning()).unwrap().snapshot, Some(snapshot));
    }

    #[test]
    fn undispensed_dose_is_missed_with_single_notification() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(7, 0));
        let out = s.tick(at(9, 5));
        assert_eq!(notifications(&out), vec!["Missed morning dose!"]);
        assert_eq!(s.record(&morning()).unwrap().state(), DoseState::Missed);
        assert!(s.record(&morning()).unwrap().missed_notification_sent);

        for minute in 6..20 {
            let out = s.tick(at(9, minute));
            assert!(notifications(&out).is_empty());
        }
    }

    #[test]
    fn completed_dose_is_never_reported_missed() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(8, 1));
        s.record_verification_result(&morning(), true).unwrap();
        s.record_dispense_result(&morning(), Ok(())).unwrap();
        let out = s.tick(at(9, 30));
        assert!(out.is_empty());
        assert_eq!(s.record(&morning()).unwrap().state(), DoseState::Completed);
    }

    #[test]
    fn denied_dose_retries_inside_grace_window() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(8, 0));
        let out = s.record_verification_result(&morning(), false).unwrap();
        assert!(matches!(
            out.outcomes[..],
            [Outcome::VerificationFailed {
                attempt: 1,
                reason: VerificationFailure::Denied,
                ..
            }]
        ));
        assert_eq!(s.active_dose(), None);

        // Same instant: retry_after has not elapsed.
        assert!(s.tick(at(8, 0)).requests.is_empty());

        let out = s.tick(at(8, 1));
        assert_eq!(out.requests, vec![Request::Verify(morning())]);
        assert_eq!(s.record(&morning()).unwrap().verification_attempts, 2);
    }

    #[test]
    fn attempts_are_capped() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        for minute in 0..3 {
            let out = s.tick(at(8, minute));
            assert_eq!(out.requests, vec![Request::Verify(morning())]);
            s.record_verification_result(&morning(), false).unwrap();
        }
        assert!(s.tick(at(8, 4)).requests.is_empty());
        assert_eq!(
            s.record(&morning()).unwrap().state(),
            DoseState::VerificationFailed
        );
    }

    #[test]
    fn denied_dose_is_missed_after_threshold() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(8, 0));
        s.record_verification_result(&morning(), false).unwrap();
        let out = s.tick(at(9, 1));
        assert_eq!(notifications(&out), vec!["Missed morning dose!"]);
        assert_eq!(s.record(&morning()).unwrap().state(), DoseState::Missed);
    }

    #[test]
    fn no_retry_after_grace_window() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(8, 4));
        s.record_verification_result(&morning(), false).unwrap();
        assert!(s.tick(at(8, 6)).requests.is_empty());
    }

    #[test]
    fn timed_out_verification_counts_as_failed_attempt() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(8, 0));
        let out = s.abandon_verification(&morning()).unwrap();
        assert!(matches!(
            out.outcomes[..],
            [Outcome::VerificationFailed {
                reason: VerificationFailure::TimedOut,
                ..
            }]
        ));
        assert_eq!(s.tick(at(8, 1)).requests, vec![Request::Verify(morning())]);
    }

    #[test]
    fn dispense_fault_is_terminal_and_critical() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(8, 0));
        s.record_verification_result(&morning(), true).unwrap();
        let out = s
            .record_dispense_result(&morning(), Err(DispenseFault::new("disk jammed")))
            .unwrap();
        assert_eq!(
            out.requests,
            vec![Request::Notify {
                dose: morning(),
                message: "Dispense fault on morning dose: disk jammed".to_string(),
                severity: Severity::Critical,
            }]
        );
        assert_eq!(
            s.record(&morning()).unwrap().state(),
            DoseState::DispenseFailed
        );
        // Not reported a second time as missed.
        assert!(s.tick(at(9, 30)).is_empty());
    }

    #[test]
    fn results_in_wrong_state_are_rejected() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(7, 0));
        let err = s.record_verification_result(&morning(), true).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::InvalidTransition {
                dose: morning(),
                operation: "record_verification_result",
                expected: "verifying",
                actual: DoseState::Pending,
            }
        );
        assert!(matches!(
            s.record_dispense_result(&morning(), Ok(())),
            Err(SchedulerError::InvalidTransition { .. })
        ));
        let unknown = DoseId::new("noon", today());
        assert_eq!(
            s.abandon_verification(&unknown),
            Err(SchedulerError::UnknownDose(unknown))
        );
    }

    #[test]
    fn late_verification_result_after_miss_is_rejected() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(8, 0));
        s.tick(at(9, 1));
        assert_eq!(s.active_dose(), None);
        assert!(s.record_verification_result(&morning(), true).is_err());
    }

    #[test]
    fn simultaneous_slots_are_served_one_at_a_time_in_order() {
        let mut s = scheduler(vec![slot("zeta", 8, 0), slot("alpha", 8, 0)]);
        let alpha = DoseId::new("alpha", today());
        let zeta = DoseId::new("zeta", today());

        let out = s.tick(at(8, 0));
        assert_eq!(out.requests, vec![Request::Verify(alpha.clone())]);
        assert_eq!(s.record(&zeta).unwrap().state(), DoseState::Due);

        // Still held while alpha is dispensing.
        s.record_verification_result(&alpha, true).unwrap();
        assert!(s.tick(at(8, 0)).requests.is_empty());

        s.record_dispense_result(&alpha, Ok(())).unwrap();
        let out = s.tick(at(8, 0));
        assert_eq!(out.requests, vec![Request::Verify(zeta)]);
    }

    #[test]
    fn dose_waiting_on_the_lock_may_start_after_its_grace_window() {
        let mut s = scheduler(vec![slot("zeta", 8, 0), slot("alpha", 8, 0)]);
        let alpha = DoseId::new("alpha", today());
        let zeta = DoseId::new("zeta", today());

        s.tick(at(8, 0));
        s.record_verification_result(&alpha, true).unwrap();
        // Alpha's dispense outlasts zeta's five minute grace window.
        assert!(s.tick(at(8, 7)).requests.is_empty());
        assert_eq!(s.record(&zeta).unwrap().state(), DoseState::Due);

        s.record_dispense_result(&alpha, Ok(())).unwrap();
        let out = s.tick(at(8, 10));
        assert_eq!(out.requests, vec![Request::Verify(zeta.clone())]);
        assert_eq!(s.record(&zeta).unwrap().verification_attempts, 1);

        // A denial at this point is not retried; the dose runs out at the threshold.
        s.record_verification_result(&zeta, false).unwrap();
        assert!(s.tick(at(8, 45)).requests.is_empty());
        let out = s.tick(at(9, 1));
        assert_eq!(notifications(&out), vec!["Missed zeta dose!"]);
    }

    #[test]
    fn dispense_is_stamped_with_the_latest_tick() {
        let mut s = scheduler(vec![slot("morning", 8, 0)]);
        s.tick(at(8, 0));
        s.record_verification_result(&morning(), true).unwrap();
        s.tick(at(8, 3));

        let out = s.record_dispense_result(&morning(), Ok(())).unwrap();
        assert_eq!(s.record(&morning()).unwrap().dispensed_at, Some(at(8, 3)));
        assert!(matches!(
            &out.outcomes[..],
            [Outcome::Completed { dispensed_at, .. }] if *dispensed_at == at(8, 3)
        ));
    }

    #[test]
    fn ticks_are_deterministic() {
        let run = || {
            let mut s = scheduler(vec![slot("morning", 8, 0), slot("noon", 12, 0)]);
            let mut log = Vec::new();
            log.push(s.tick(at(8, 0)));
            log.push(s.record_verification_result(&morning(), false).unwrap());
            log.push(s.tick(at(8, 1)));
            log.push(s.record_verification_result(&morning(), true).unwrap());
            log.push(s.record_dispense_result(&morning(), Ok(())).unwrap());
            log.push(s.tick(at(13, 30)));
            log
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn transitions_never_revisit_pending() {
        let mut s = scheduler(vec![slot("morning", 8, 0), slot("noon", 12, 0)]);
        let mut transitions = Vec::new();
        transitions.extend(s.tick(at(8, 0)).transitions);
        transitions.extend(s.record_verification_result(&morning(), false).unwrap().transitions);
        transitions.extend(s.tick(at(8, 2)).transitions);
        transitions.extend(s.record_verification_result(&morning(), true).unwrap().transitions);
        transitions.extend(s.record_dispense_result(&morning(), Ok(())).unwrap().transitions);
        transitions.extend(s.tick(at(13, 30)).transitions);
        assert!(!transitions.is_empty());
        assert!(transitions.iter().all(|t| t.to != DoseState::Pending));
        assert!(transitions.iter().all(|t| t.from.can_transition_to(t.to)));
    }

    #[test]
    fn late_evening_slot_is_missed_after_midnight() {
        let mut s = scheduler(vec![slot("late", 23, 30)]);
        s.tick(at(22, 0));
        let next_day = Utc.with_ymd_and_hms(2026, 3, 3, 0, 31, 0).unwrap();
        let out = s.tick(next_day);
        assert_eq!(notifications(&out), vec!["Missed late dose!"]);
        let tomorrow = DoseId::new("late", NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
        assert_eq!(s.record(&tomorrow).unwrap().state(), DoseState::Pending);
    }

    #[test]
    fn old_terminal_records_are_pruned() {
        let mut s = DoseScheduler::new(
            vec![slot("morning", 8, 0)],
            SchedulerOptions {
                audit_retention_days: 1,
                ..Default::default()
            },
        );
        s.tick(at(10, 0));
        assert_eq!(s.record(&morning()).unwrap().state(), DoseState::Missed);
        s.tick(Utc.with_ymd_and_hms(2026, 3, 3, 6, 0, 0).unwrap());
        assert!(s.record(&morning()).is_some());
        s.tick(Utc.with_ymd_and_hms(2026, 3, 4, 6, 0, 0).unwrap());
        assert!(s.record(&morning()).is_none());
    }
}
