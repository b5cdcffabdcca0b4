//! Cycle segmentation and series hygiene.

use time::PrimitiveDateTime;

use super::detector::last_event;
use super::{CalibratedReading, Reading};

/// The current drying cycle and the watering timestamp it starts after.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment<'a> {
    pub cycle: &'a [CalibratedReading],
    pub last_watered: Option<PrimitiveDateTime>,
}

/// Slice `series` down to the readings after the last watering.
///
/// With a known `last_watered` the cycle is everything strictly after it,
/// and the timestamp is echoed back.  Without one, the detector scans the
/// full series; if it finds nothing the whole series is the cycle.
///
/// `series` must be ordered by timestamp.
pub fn segment(
    series: &[CalibratedReading],
    last_watered: Option<PrimitiveDateTime>,
    threshold_pct: f64,
) -> Segment<'_> {
    let resolved = match last_watered {
        Some(ts) => Some(ts),
        None => last_event(series, threshold_pct).map(|e| e.timestamp),
    };

    let cycle = match resolved {
        Some(ts) => &series[series.partition_point(|r| r.timestamp <= ts)..],
        None => series,
    };

    Segment {
        cycle,
        last_watered: resolved,
    }
}

/// Sort by timestamp and collapse duplicate timestamps.
///
/// The sort is stable, so among rows sharing a timestamp the one appended
/// last wins.
pub fn prepare_series(readings: &[Reading]) -> Vec<Reading> {
    let mut out = readings.to_vec();
    out.sort_by_key(|r| r.timestamp);
    dedup_by_timestamp(&mut out);
    out
}

/// Collapse runs of equal timestamps in an ordered series, keeping the
/// last value of each run.
pub fn dedup_by_timestamp(readings: &mut Vec<Reading>) {
    readings.dedup_by(|later, kept| {
        if later.timestamp == kept.timestamp {
            *kept = *later;
            true
        } else {
            false
        }
    });
}

/// Bounded retention: drop the oldest entries so at most `limit` remain.
pub fn retain_trailing<T>(window: &mut Vec<T>, limit: usize) {
    if window.len() > limit {
        let excess = window.len() - limit;
        window.drain(..excess);
    }
}
