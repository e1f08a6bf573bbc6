//! Contains common, primitive types used across the Dosekeeper crate.
//!
//! This module defines the identifiers that name slots, dose records and
//! their internal storage keys. Using distinct types keeps a slot name from
//! being confused with an arbitrary string and a record key from leaking
//! outside the scheduler.

use chrono::NaiveDate;
use serde::Deserialize;
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Uniquely identifies a stored `DoseRecord` inside the scheduler.
    ///
    /// Keys are never reused after a record is pruned, so a stale key cannot
    /// silently address a newer record.
    pub struct RecordId;
}

/// The unique name of a recurring dose slot, e.g. `"morning"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub String);

impl SlotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SlotId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The external identity of one dose: a slot on one local calendar day.
///
/// Every side-effect request and every result fed back into the scheduler
/// is addressed by a `DoseId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DoseId {
    pub slot: SlotId,
    pub date: NaiveDate,
}

impl DoseId {
    pub fn new(slot: impl Into<SlotId>, date: NaiveDate) -> Self {
        Self {
            slot: slot.into(),
            date,
        }
    }
}

impl fmt::Display for DoseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.slot, self.date)
    }
}
