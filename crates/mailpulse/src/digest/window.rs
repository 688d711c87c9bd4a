//! Local-time period windows.
//!
//! Windows are defined in wall-clock time and evaluated against the account's
//! timezone on every call, so DST shifts move the UTC boundaries with them.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use super::model::DigestPeriod;
use crate::config::DigestConfig;
use crate::error::ConfigError;

/// Local midnight up to `split` is the first half, `[split, second_end)` the
/// second. Anything at or after `second_end` rolls into the next day's first
/// half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindows {
    split: NaiveTime,
    second_end: NaiveTime,
}

pub fn parse_local_time(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ConfigError::InvalidTime {
        field,
        value: value.to_string(),
    })
}

impl PeriodWindows {
    pub fn new(split: NaiveTime, second_end: NaiveTime) -> Result<Self, ConfigError> {
        if !(NaiveTime::MIN < split && split < second_end) {
            return Err(ConfigError::Validation {
                message: format!(
                    "digest periods must satisfy 00:00 < split < second_half_end, got {} / {}",
                    split.format("%H:%M"),
                    second_end.format("%H:%M")
                ),
            });
        }
        Ok(Self { split, second_end })
    }

    pub fn from_config(config: &DigestConfig) -> Result<Self, ConfigError> {
        Self::new(
            parse_local_time("digest.split", &config.split)?,
            parse_local_time("digest.second_half_end", &config.second_half_end)?,
        )
    }

    /// The local calendar date and period `at` falls into in `tz`.
    pub fn locate(&self, at: DateTime<Utc>, tz: Tz) -> (NaiveDate, DigestPeriod) {
        let local = at.with_timezone(&tz);
        let date = local.date_naive();
        let time = local.time();

        if time >= self.second_end {
            let next = date.succ_opt().unwrap_or(date);
            (next, DigestPeriod::FirstHalf)
        } else if time >= self.split {
            (date, DigestPeriod::SecondHalf)
        } else {
            (date, DigestPeriod::FirstHalf)
        }
    }
}

impl Default for PeriodWindows {
    fn default() -> Self {
        Self {
            split: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            second_end: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// Parses an IANA timezone name, falling back to `default` when unknown.
pub fn resolve_timezone(name: &str, default: Tz) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %name, fallback = default.name(), "unknown timezone, using fallback");
            default
        }
    }
}
