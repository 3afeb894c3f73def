use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;

use beton_core::delivery::parse_time_of_day;
use beton_core::policy::{self, DispatchPolicy};
use beton_events::bus::DEFAULT_CAPACITY;

/// A configuration variable held a value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Dispatch configuration loaded from environment variables.
///
/// All fields have defaults matching the plant's standard operating rules.
/// Override via environment variables (a `.env` file is honoured).
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How often the board re-fetches without a push notification.
    pub poll_interval: Duration,
    /// Window within which change notifications collapse into one re-fetch.
    pub debounce_window: Duration,
    /// Buffer size of the change bus.
    pub bus_capacity: usize,
    pub policy: DispatchPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            debounce_window: Duration::from_millis(100),
            bus_capacity: DEFAULT_CAPACITY,
            policy: DispatchPolicy::default(),
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                                   | Default |
    /// |-------------------------------------------|---------|
    /// | `DISPATCH_POLL_INTERVAL_SECS`             | `30`    |
    /// | `DISPATCH_DEBOUNCE_MS`                    | `100`   |
    /// | `DISPATCH_BUS_CAPACITY`                   | `1024`  |
    /// | `DISPATCH_CONFLICT_WINDOW_MINUTES`        | `15`    |
    /// | `DISPATCH_PRODUCTION_LOOKAHEAD_MINUTES`   | `120`   |
    /// | `DISPATCH_MIN_JUSTIFICATION_CHARS`        | `20`    |
    /// | `DISPATCH_NIGHT_WINDOW_START`             | `18:00` |
    /// | `DISPATCH_NIGHT_WINDOW_END`               | `00:00` |
    /// | `DISPATCH_OVERDUE_INVOICE_DAYS`           | `30`    |
    /// | `PLANT_UTC_OFFSET_MINUTES`                | `0`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = DispatchPolicy::default();
        let poll_secs: u64 =
            parse_var(&lookup, "DISPATCH_POLL_INTERVAL_SECS", 30, "a positive integer")?;
        if poll_secs == 0 {
            return Err(invalid("DISPATCH_POLL_INTERVAL_SECS", "a positive integer", "0"));
        }
        let debounce_ms: u64 = parse_var(&lookup, "DISPATCH_DEBOUNCE_MS", 100, "an integer")?;
        let bus_capacity: usize =
            parse_var(&lookup, "DISPATCH_BUS_CAPACITY", DEFAULT_CAPACITY, "a positive integer")?;
        if bus_capacity == 0 {
            return Err(invalid("DISPATCH_BUS_CAPACITY", "a positive integer", "0"));
        }

        let policy = DispatchPolicy {
            conflict_window_minutes: parse_var(
                &lookup,
                "DISPATCH_CONFLICT_WINDOW_MINUTES",
                policy::DEFAULT_CONFLICT_WINDOW_MINUTES,
                "an integer",
            )?,
            production_lookahead_minutes: parse_var(
                &lookup,
                "DISPATCH_PRODUCTION_LOOKAHEAD_MINUTES",
                policy::DEFAULT_PRODUCTION_LOOKAHEAD_MINUTES,
                "an integer",
            )?,
            min_justification_chars: parse_var(
                &lookup,
                "DISPATCH_MIN_JUSTIFICATION_CHARS",
                policy::DEFAULT_MIN_JUSTIFICATION_CHARS,
                "an integer",
            )?,
            night_window_start: parse_time_var(
                &lookup,
                "DISPATCH_NIGHT_WINDOW_START",
                defaults.night_window_start,
            )?,
            night_window_end: parse_time_var(
                &lookup,
                "DISPATCH_NIGHT_WINDOW_END",
                defaults.night_window_end,
            )?,
            overdue_invoice_days: parse_var(
                &lookup,
                "DISPATCH_OVERDUE_INVOICE_DAYS",
                policy::DEFAULT_OVERDUE_INVOICE_DAYS,
                "an integer",
            )?,
            utc_offset_minutes: parse_var(&lookup, "PLANT_UTC_OFFSET_MINUTES", 0, "an integer")?,
        };
        if policy.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(invalid(
                "PLANT_UTC_OFFSET_MINUTES",
                "within +/-1439 minutes",
                &policy.utc_offset_minutes.to_string(),
            ));
        }

        Ok(Self {
            poll_interval: Duration::from_secs(poll_secs),
            debounce_window: Duration::from_millis(debounce_ms),
            bus_capacity,
            policy,
        })
    }
}

fn invalid(var: &'static str, expected: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        expected,
        value: value.to_string(),
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| invalid(var, expected, &raw)),
    }
}

fn parse_time_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: NaiveTime,
) -> Result<NaiveTime, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => parse_time_of_day(&raw).map_err(|_| invalid(var, "a time as HH:MM", &raw)),
    }
}
