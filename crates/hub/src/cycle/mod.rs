//! Irrigation-cycle estimator.
//!
//! Pipeline, leaf first:
//!
//! ```text
//! raw log ──▶ calibration ──▶ calibrated series ──▶ segment (uses detector)
//!                                                        │
//!                         prediction ◀── forecast ◀── current cycle
//! ```
//!
//! Everything in here is a pure transformation over an explicit input
//! series.  The polling loop owns all state and passes it in on each call.

pub mod calibration;
pub mod detector;
pub mod error;
pub mod estimator;
pub mod forecast;
pub mod segment;

use serde::Serialize;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub use calibration::Calibration;
pub use detector::{detect_events, last_event, WateringEvent};
pub use error::CycleError;
pub use estimator::{CycleConfig, CycleState, Estimate, Estimator};
pub use forecast::{ForecastConfig, Prediction};
pub use segment::{dedup_by_timestamp, prepare_series, retain_trailing, segment, Segment};

// "YYYY-MM-DD HH:MM:SS", the format the sensor logger writes.
time::serde::format_description!(
    pub log_timestamp,
    PrimitiveDateTime,
    "[year]-[month]-[day] [hour]:[minute]:[second]"
);

// ---------------------------------------------------------------------------
// Series types
// ---------------------------------------------------------------------------

/// One raw sample as it appears in a sensor log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    #[serde(with = "log_timestamp")]
    pub timestamp: PrimitiveDateTime,
    pub raw_value: f64,
}

/// A sample after calibration.  `moisture_pct` is deliberately not clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibratedReading {
    #[serde(with = "log_timestamp")]
    pub timestamp: PrimitiveDateTime,
    pub moisture_pct: f64,
}

impl Reading {
    pub fn new(timestamp: PrimitiveDateTime, raw_value: f64) -> Self {
        Self {
            timestamp,
            raw_value,
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamp helpers
// ---------------------------------------------------------------------------

/// Parse a log timestamp (`YYYY-MM-DD HH:MM:SS`).
pub fn parse_timestamp(s: &str) -> Result<PrimitiveDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(
        s.trim(),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
}

/// Render a timestamp in the log format.
pub fn format_timestamp(ts: PrimitiveDateTime) -> String {
    ts.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| ts.to_string())
}

/// The machine's local UTC offset, or UTC if it cannot be determined.
///
/// On Unix this only succeeds while the process is single-threaded, so call
/// it before starting the async runtime.
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// Wall-clock "now" as naive time at `offset`, matching the logger's clock.
pub fn now_at(offset: UtcOffset) -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc().to_offset(offset);
    PrimitiveDateTime::new(now.date(), now.time())
}


#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parse_timestamp_log_format() {
        let ts = parse_timestamp("2024-05-01 08:30:15").unwrap();
        assert_eq!(ts, datetime!(2024-05-01 08:30:15));
    }

    #[test]
    fn parse_timestamp_trims_whitespace() {
        assert!(parse_timestamp("  2024-05-01 08:30:15\n").is_ok());
    }

    #[test]
    fn parse_timestamp_rejects_iso_t_separator() {
        assert!(parse_timestamp("2024-05-01T08:30:15").is_err());
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn format_matches_parse() {
        let ts = datetime!(2023-12-31 23:59:59);
        assert_eq!(format_timestamp(ts), "2023-12-31 23:59:59");
        assert_eq!(parse_timestamp(&format_timestamp(ts)).unwrap(), ts);
    }

    #[test]
    fn reading_serializes_with_log_timestamp() {
        let r = Reading::new(datetime!(2024-05-01 08:00:00), 1750.0);
        let json = serde_json::to_value(r).unwrap();
        assert_eq!(json["timestamp"], "2024-05-01 08:00:00");
        assert_eq!(json["raw_value"], 1750.0);
    }

    #[test]
    fn now_at_applies_offset() {
        let east = time::macros::offset!(+2);
        let utc = now_at(UtcOffset::UTC);
        let local = now_at(east);
        let diff = local - utc;
        // Allow for the clock ticking between the two calls.
        assert!(diff >= time::Duration::hours(2));
        assert!(diff < time::Duration::hours(2) + time::Duration::seconds(5));
    }
}
