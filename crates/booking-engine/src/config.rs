//! Engine configuration.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};
use crate::time::{parse_timezone, WeekStartDay};

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_horizon_days() -> u32 {
    90
}

/// Settings shared by every provider an engine serves.
///
/// ```
/// use booking_engine::config::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{"timezone":"Europe/Berlin","week_start":"sunday"}"#).unwrap();
/// assert_eq!(config.horizon_days, 90);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// IANA zone the providers' dates and times are expressed in. Only used
    /// to turn a UTC "now" into the local date and minute.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// First day of the week the booking calendar opens on.
    #[serde(default)]
    pub week_start: WeekStartDay,
    /// Longest date range a slot query may span, in days.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            week_start: WeekStartDay::default(),
            horizon_days: default_horizon_days(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config document.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidConfig`] for malformed JSON or a zero
    /// horizon, and [`BookingError::InvalidTimezone`] for an unknown zone.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BookingError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.horizon_days == 0 {
            return Err(BookingError::InvalidConfig(
                "horizon_days must be positive".to_string(),
            ));
        }
        self.tz().map(|_| ())
    }

    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }
}
