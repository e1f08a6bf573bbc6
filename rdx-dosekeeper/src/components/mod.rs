//! Contains the building blocks the scheduler manipulates.
//!
//! This module provides the immutable, configured dose slots and the
//! per-day dose records that move through the dispensing lifecycle. The
//! `DoseScheduler` owns collections of these components and drives their
//! transitions on every tick.

pub mod record;
pub mod slot;
