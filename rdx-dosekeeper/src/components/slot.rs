//! Defines the recurring, configured time-of-day targets for dosing.

use crate::common::SlotId;
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A named recurring time-of-day target, e.g. "morning" at 08:00.
///
/// Slots are built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoseSlot {
    pub id: SlotId,
    /// Local wall-clock time in the scheduler's timezone.
    pub time: NaiveTime,
    /// How long after `time` the dose still counts as "on time".
    pub grace_window: Duration,
    /// How long after `time` an undispensed dose is declared missed.
    pub missed_threshold: Duration,
}

impl DoseSlot {
    pub fn new(
        id: impl Into<SlotId>,
        time: NaiveTime,
        grace_window: Duration,
        missed_threshold: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            time,
            grace_window,
            missed_threshold,
        }
    }

    /// Resolves this slot's local time on `date` to an absolute instant.
    ///
    /// On a DST fold the earlier instant wins. Inside a DST gap the local
    /// time does not exist, so the slot is pushed forward past the gap.
    pub fn scheduled_at(&self, date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
        let local = date.and_time(self.time);
        match tz.from_local_datetime(&local) {
            LocalResult::Single(at) => at.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                let shifted = local + Duration::hours(1);
                tz.from_local_datetime(&shifted)
                    .earliest()
                    .map(|at| at.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&local))
            }
        }
    }

    /// True while `now` lies in `[scheduled_at, scheduled_at + grace_window)`.
    pub fn is_due(&self, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= scheduled_at && now < scheduled_at + self.grace_window
    }

    /// True once more than `missed_threshold` has elapsed since `scheduled_at`.
    pub fn is_overdue(&self, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - scheduled_at > self.missed_threshold
    }

    /// The message sent to the caregiver when this slot's dose is missed.
    pub fn missed_message(&self) -> String {
        format!("Missed {} dose!", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn morning() -> DoseSlot {
        DoseSlot::new(
            "morning",
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            Duration::minutes(5),
            Duration::minutes(60),
        )
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[test]
    fn utc_slot_resolves_to_same_wall_time() {
        let at = morning().scheduled_at(date(), &Tz::UTC);
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn local_slot_is_offset_from_utc() {
        let at = morning().scheduled_at(date(), &chrono_tz::Europe::Berlin);
        // CET is UTC+1 in early March.
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap());
    }

    #[test]
    fn slot_inside_dst_gap_moves_past_it() {
        let slot = DoseSlot::new(
            "night",
            NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            Duration::minutes(5),
            Duration::minutes(60),
        );
        let spring_forward = NaiveDate::from_ymd_opt(2026, 3, 29).unwrap();
        let at = slot.scheduled_at(spring_forward, &chrono_tz::Europe::Berlin);
        // 03:30 CEST.
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 3, 29, 1, 30, 0).unwrap());
    }

    #[test]
    fn slot_inside_dst_fold_takes_the_first_occurrence() {
        let slot = DoseSlot::new(
            "night",
            NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            Duration::minutes(5),
            Duration::minutes(60),
        );
        let fall_back = NaiveDate::from_ymd_opt(2026, 10, 25).unwrap();
        let at = slot.scheduled_at(fall_back, &chrono_tz::Europe::Berlin);
        // 02:30 CEST, one hour before the repeated 02:30 CET.
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 10, 25, 0, 30, 0).unwrap());
    }

    #[test]
    fn due_window_is_half_open() {
        let slot = morning();
        let at = slot.scheduled_at(date(), &Tz::UTC);
        assert!(!slot.is_due(at, at - Duration::seconds(1)));
        assert!(slot.is_due(at, at));
        assert!(slot.is_due(at, at + Duration::seconds(299)));
        assert!(!slot.is_due(at, at + Duration::minutes(5)));
    }

    #[test]
    fn overdue_only_after_threshold_is_exceeded() {
        let slot = morning();
        let at = slot.scheduled_at(date(), &Tz::UTC);
        assert!(!slot.is_overdue(at, at + Duration::minutes(60)));
        assert!(slot.is_overdue(at, at + Duration::minutes(60) + Duration::seconds(1)));
    }

    #[test]
    fn missed_message_names_the_slot() {
        assert_eq!(morning().missed_message(), "Missed morning dose!");
    }
}
