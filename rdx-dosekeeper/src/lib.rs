//! # Dosekeeper
//!
//! A tick-driven dose scheduler and dispensing state machine for medication
//! dispensers.
//!
//! Dosekeeper decides *when* and *whether* a dose is dispensed, retried or
//! reported missed. Fingerprint readers, the dispensing disk, health sensors
//! and the caregiver notifier are external devices reached through the port
//! traits in [`ports`].
//!
//! ## Core Concepts
//!
//! - **DoseSlot**: A named recurring time of day ("morning" at 08:00) with a
//!   grace window and a missed threshold.
//! - **DoseRecord**: One slot on one calendar day, moving through
//!   `Pending → Due → Verifying → Dispensing → Completed` or ending as
//!   `DispenseFailed` or `Missed`.
//! - **DoseScheduler**: A pure state machine. `tick(now)` returns the side
//!   effects to perform; device results are fed back through `record_*`.
//! - **DispenserEngine**: The control loop. It reads a `Clock`, serves
//!   requests one at a time against the devices and broadcasts events.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dosekeeper::prelude::*;
//! use dosekeeper::sim::placeholder_devices;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. Load the schedule, falling back to the built-in defaults.
//!     let config = DispenserConfig::default();
//!
//!     // 2. Create the engine with a clock and a set of devices.
//!     let mut engine = DispenserEngine::new(&config, SystemClock, placeholder_devices())?;
//!
//!     // 3. Subscribe to dose events before starting the engine.
//!     let mut dose_events = engine.subscribe_dose_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = dose_events.recv().await {
//!             println!("Dose event: {:?}", event);
//!         }
//!     });
//!
//!     // 4. Run the engine. It will shut down on Ctrl+C.
//!     engine.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Dosekeeper";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod common;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ports;
pub mod scheduler;
pub mod sim;
pub mod time;

/// A prelude module for easy importing of the most common Dosekeeper types.
pub mod prelude {
    pub use crate::common::{DoseId, SlotId};
    pub use crate::components::record::{DoseRecord, DoseState, SensorReading, SensorSnapshot};
    pub use crate::components::slot::DoseSlot;
    pub use crate::config::DispenserConfig;
    pub use crate::engine::DispenserEngine;
    pub use crate::error::{ConfigError, DeviceError, DispenseFault, SchedulerError};
    pub use crate::events::{DoseEvent, Outcome, Request, Severity, SystemEvent, TickOutput};
    pub use crate::ports::{Actuator, Devices, Notifier, SensorPort, Verdict, Verifier};
    pub use crate::scheduler::{DoseScheduler, SchedulerOptions};
    pub use crate::time::{Clock, ManualClock, SystemClock};
}
