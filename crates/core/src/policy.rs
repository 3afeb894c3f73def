//! Dispatch policy thresholds.
//!
//! Every threshold the dispatch core enforces lives here with its default.
//! The async layer loads overrides from the environment
//! (`beton_dispatch::config`); this crate only defines the values and the
//! pure helpers that read them.

use chrono::{FixedOffset, NaiveDateTime, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Two planned deliveries closer than this collide.
pub const DEFAULT_CONFLICT_WINDOW_MINUTES: i64 = 15;

/// Planned deliveries due within this horizon are due for production.
pub const DEFAULT_PRODUCTION_LOOKAHEAD_MINUTES: i64 = 120;

/// Minimum justification length for a night-window production start.
pub const DEFAULT_MIN_JUSTIFICATION_CHARS: usize = 20;

/// An unpaid invoice older than this makes the client overdue.
pub const DEFAULT_OVERDUE_INVOICE_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// DispatchPolicy
// ---------------------------------------------------------------------------

/// Thresholds governing conflicts, production timing and the night window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPolicy {
    pub conflict_window_minutes: i64,
    pub production_lookahead_minutes: i64,
    pub min_justification_chars: usize,
    /// Start of the night window (inclusive), plant wall-clock.
    pub night_window_start: NaiveTime,
    /// End of the night window (exclusive). Midnight means end of day.
    pub night_window_end: NaiveTime,
    pub overdue_invoice_days: i64,
    /// Plant offset from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            conflict_window_minutes: DEFAULT_CONFLICT_WINDOW_MINUTES,
            production_lookahead_minutes: DEFAULT_PRODUCTION_LOOKAHEAD_MINUTES,
            min_justification_chars: DEFAULT_MIN_JUSTIFICATION_CHARS,
            night_window_start: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            night_window_end: NaiveTime::MIN,
            overdue_invoice_days: DEFAULT_OVERDUE_INVOICE_DAYS,
            utc_offset_minutes: 0,
        }
    }
}

impl DispatchPolicy {
    /// The plant's fixed UTC offset. Out-of-range offsets fall back to UTC.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Convert a UTC stamp to plant wall-clock time.
    pub fn local(&self, at: Timestamp) -> NaiveDateTime {
        at.with_timezone(&self.offset()).naive_local()
    }

    /// Whether a wall-clock time falls inside the night window.
    ///
    /// Handles windows that wrap past midnight; an end of `00:00` closes
    /// the window at the end of the day.
    pub fn in_night_window(&self, time: NaiveTime) -> bool {
        let (start, end) = (self.night_window_start, self.night_window_end);
        if start < end {
            start <= time && time < end
        } else {
            time >= start || time < end
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn default_night_window_is_evening_until_midnight() {
        let policy = DispatchPolicy::default();
        assert!(!policy.in_night_window(hm(17, 59)));
        assert!(policy.in_night_window(hm(18, 0)));
        assert!(policy.in_night_window(hm(23, 59)));
        assert!(!policy.in_night_window(hm(0, 0)));
        assert!(!policy.in_night_window(hm(6, 30)));
    }

    #[test]
    fn wrapping_window_covers_early_morning() {
        let policy = DispatchPolicy {
            night_window_start: hm(22, 0),
            night_window_end: hm(5, 0),
            ..Default::default()
        };
        assert!(policy.in_night_window(hm(23, 0)));
        assert!(policy.in_night_window(hm(4, 59)));
        assert!(!policy.in_night_window(hm(5, 0)));
        assert!(!policy.in_night_window(hm(12, 0)));
    }

    #[test]
    fn daytime_window_is_half_open() {
        let policy = DispatchPolicy {
            night_window_start: hm(12, 0),
            night_window_end: hm(14, 0),
            ..Default::default()
        };
        assert!(policy.in_night_window(hm(12, 0)));
        assert!(!policy.in_night_window(hm(14, 0)));
    }

    #[test]
    fn local_time_applies_offset() {
        let policy = DispatchPolicy {
            utc_offset_minutes: 60,
            ..Default::default()
        };
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 17, 30, 0).unwrap();
        assert_eq!(policy.local(at).time(), hm(18, 30));
    }

    #[test]
    fn invalid_offset_falls_back_to_utc() {
        let policy = DispatchPolicy {
            utc_offset_minutes: 100_000,
            ..Default::default()
        };
        assert_eq!(policy.offset(), Utc.fix());
    }
}
