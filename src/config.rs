//! Engine configuration.
//!
//! Loaded from an optional TOML file with `CALSCHED_`-prefixed environment
//! overrides. Durations are humantime strings ("10s", "2m").

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{SchedError, SchedResult};
use crate::recurrence::DEFAULT_RECURRENCE_CAP;

fn default_recurrence_cap() -> u32 {
    DEFAULT_RECURRENCE_CAP
}

fn default_freebusy_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_slot_minutes() -> u32 {
    30
}

fn default_undo_ttl() -> Duration {
    Duration::from_secs(15)
}

fn duration_str<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Notification site policy.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyPolicy {
    /// Master switch: when false, mutations produce no scheduling messages.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Honor per-attendee opt-out (`noreply`) flags.
    #[serde(default = "default_true")]
    pub honor_opt_out: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        NotifyPolicy {
            enabled: true,
            honor_opt_out: true,
        }
    }
}

/// Business hours used by the off-hours slot policy.
/// Hours are in the viewer's local time; work days are ISO weekday
/// numbers (1 = Monday .. 7 = Sunday).
#[derive(Debug, Clone, Deserialize)]
pub struct BusinessHours {
    #[serde(default = "default_first_hour")]
    pub first_hour: u32,
    #[serde(default = "default_last_hour")]
    pub last_hour: u32,
    #[serde(default = "default_work_days")]
    pub work_days: Vec<u8>,
}

fn default_first_hour() -> u32 {
    8
}

fn default_last_hour() -> u32 {
    18
}

fn default_work_days() -> Vec<u8> {
    vec![1, 2, 3, 4, 5]
}

impl Default for BusinessHours {
    fn default() -> Self {
        BusinessHours {
            first_hour: default_first_hour(),
            last_hour: default_last_hour(),
            work_days: default_work_days(),
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Safety cap on recurrence candidate iterations.
    #[serde(default = "default_recurrence_cap")]
    pub recurrence_cap: u32,

    /// Per-attendee free/busy lookup timeout.
    #[serde(
        default = "default_freebusy_timeout",
        deserialize_with = "duration_str"
    )]
    pub freebusy_timeout: Duration,

    /// Grid slot width in minutes.
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,

    /// How long a removed event stays recoverable in an undo ledger.
    #[serde(default = "default_undo_ttl", deserialize_with = "duration_str")]
    pub undo_ttl: Duration,

    #[serde(default)]
    pub notify: NotifyPolicy,

    #[serde(default)]
    pub business_hours: BusinessHours,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            recurrence_cap: default_recurrence_cap(),
            freebusy_timeout: default_freebusy_timeout(),
            slot_minutes: default_slot_minutes(),
            undo_ttl: default_undo_ttl(),
            notify: NotifyPolicy::default(),
            business_hours: BusinessHours::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional file plus `CALSCHED_`-prefixed
    /// environment variables (`CALSCHED_SLOT_MINUTES=15`,
    /// `CALSCHED_NOTIFY__ENABLED=false`, ...).
    pub fn load(path: Option<&Path>) -> SchedResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CALSCHED").separator("__"),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SchedError::Config(e.to_string()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> SchedResult<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SchedError::Config(e.to_string()))
    }
}
