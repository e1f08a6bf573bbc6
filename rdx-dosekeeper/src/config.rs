//! Defines all configuration structures for the Dosekeeper engine.
//!
//! These structs are deserialized with `serde` from a TOML file layered with
//! `DOSEKEEPER__*` environment overrides via the `config` crate. The daily
//! schedule, the verification policy and the device timeouts are all defined
//! here, outside the application code.
//!
//! ```toml
//! tick_interval_secs = 30
//! timezone = "Europe/Berlin"
//!
//! [[slots]]
//! id = "morning"
//! time = "08:00"
//! grace_window_secs = 300
//! missed_threshold_secs = 3600
//! ```

use crate::common::SlotId;
use crate::components::slot::DoseSlot;
use crate::error::ConfigError;
use crate::scheduler::SchedulerOptions;
use chrono::{Duration, NaiveTime};
use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Prefix for environment overrides, e.g. `DOSEKEEPER__TICK_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "DOSEKEEPER";

/// Longest accepted grace window, missed threshold or retry gap: one day.
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// The top-level configuration for the `DispenserEngine`.
#[derive(Debug, Clone, Deserialize)]
pub struct DispenserConfig {
    /// Seconds between control cycles.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// The timezone slot times are expressed in. Uses the IANA names
    /// (e.g. "America/New_York").
    #[serde(default = "default_timezone")]
    pub timezone: Tz,

    /// The daily schedule.
    #[serde(default = "default_slots")]
    pub slots: Vec<SlotConfig>,

    #[serde(default)]
    pub verification: VerificationConfig,

    /// Seconds to wait for a health sample before recording it absent.
    #[serde(default = "default_sensor_timeout_secs")]
    pub sensor_timeout_secs: u64,

    /// Days a finished dose record stays available for inspection.
    #[serde(default = "default_audit_retention_days")]
    pub audit_retention_days: u32,
}

/// Defines a single dose slot in the daily schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct SlotConfig {
    pub id: String,
    /// Local time of day, `HH:MM` or `HH:MM:SS`.
    pub time: String,
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,
    #[serde(default = "default_missed_threshold_secs")]
    pub missed_threshold_secs: u64,
}

/// How identity verification is attempted and retried.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    /// Seconds before an unanswered verification counts as a deny.
    #[serde(default = "default_verification_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts allowed per dose, all within the grace window.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Minimum seconds between two attempts for the same dose.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

impl DispenserConfig {
    /// Loads the configuration from a TOML file, applying environment
    /// overrides on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()).format(FileFormat::Toml))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without consulting the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every cross-field rule. Any failure here is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_interval_secs",
                reason: "must be greater than zero",
            });
        }
        if self.verification.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "verification.max_attempts",
                reason: "must allow at least one attempt",
            });
        }
        if self.verification.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "verification.timeout_secs",
                reason: "must be greater than zero",
            });
        }
        if self.sensor_timeout_secs == 0
            || self.sensor_timeout_secs >= self.verification.timeout_secs
        {
            return Err(ConfigError::Invalid {
                field: "sensor_timeout_secs",
                reason: "must be non-zero and shorter than the verification timeout",
            });
        }
        if self.verification.retry_after_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::Invalid {
                field: "verification.retry_after_secs",
                reason: "must not exceed one day",
            });
        }
        self.dose_slots().map(|_| ())
    }

    /// Builds the immutable slot list, sorted by time of day then id.
    pub fn dose_slots(&self) -> Result<Vec<DoseSlot>, ConfigError> {
        if self.slots.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }
        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let id = slot.id.trim();
            if id.is_empty() {
                return Err(ConfigError::EmptySlotId);
            }
            if !seen.insert(id.to_string()) {
                return Err(ConfigError::DuplicateSlot(id.to_string()));
            }
            let time = parse_time_of_day(&slot.time).ok_or_else(|| ConfigError::InvalidTime {
                slot: id.to_string(),
                value: slot.time.clone(),
            })?;
            if slot.grace_window_secs == 0 {
                return Err(ConfigError::InvalidWindow {
                    slot: id.to_string(),
                    reason: "grace window must be greater than zero",
                });
            }
            if slot.missed_threshold_secs > MAX_WINDOW_SECS {
                return Err(ConfigError::InvalidWindow {
                    slot: id.to_string(),
                    reason: "missed threshold must not exceed one day",
                });
            }
            if slot.grace_window_secs >= slot.missed_threshold_secs {
                return Err(ConfigError::InvalidWindow {
                    slot: id.to_string(),
                    reason: "grace window must be shorter than the missed threshold",
                });
            }
            let window = |secs| {
                seconds(secs).ok_or_else(|| ConfigError::InvalidWindow {
                    slot: id.to_string(),
                    reason: "window does not fit a duration",
                })
            };
            slots.push(DoseSlot::new(
                SlotId::new(id),
                time,
                window(slot.grace_window_secs)?,
                window(slot.missed_threshold_secs)?,
            ));
        }
        slots.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
        Ok(slots)
    }

    /// The scheduler policy derived from this configuration.
    pub fn scheduler_options(&self) -> Result<SchedulerOptions, ConfigError> {
        let retry_after = seconds(self.verification.retry_after_secs)
            .filter(|_| self.verification.retry_after_secs <= MAX_WINDOW_SECS)
            .ok_or(ConfigError::Invalid {
                field: "verification.retry_after_secs",
                reason: "must not exceed one day",
            })?;
        Ok(SchedulerOptions {
            timezone: self.timezone,
            max_verification_attempts: self.verification.max_attempts,
            retry_after,
            audit_retention_days: self.audit_retention_days,
        })
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_secs)
    }

    pub fn verification_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.verification.timeout_secs)
    }

    pub fn sensor_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sensor_timeout_secs)
    }
}

fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

fn seconds(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

// --- Default value functions for serde ---

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_timezone() -> Tz {
    Tz::UTC
}

fn default_grace_window_secs() -> u64 {
    60
}

fn default_missed_threshold_secs() -> u64 {
    3600
}

fn default_sensor_timeout_secs() -> u64 {
    5
}

fn default_audit_retention_days() -> u32 {
    7
}

fn default_verification_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_after_secs() -> u64 {
    30
}

fn default_slots() -> Vec<SlotConfig> {
    [("morning", "08:00"), ("afternoon", "13:00"), ("evening", "20:00")]
        .into_iter()
        .map(|(id, time)| SlotConfig {
            id: id.to_string(),
            time: time.to_string(),
            grace_window_secs: default_grace_window_secs(),
            missed_threshold_secs: default_missed_threshold_secs(),
        })
        .collect()
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_verification_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

impl Default for DispenserConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            timezone: default_timezone(),
            slots: default_slots(),
            verification: VerificationConfig::default(),
            sensor_timeout_secs: default_sensor_timeout_secs(),
            audit_retention_days: default_audit_retention_days(),
        }
    }
}
