//! Watering-event detection: single-step upward jumps in moisture.

use serde::Serialize;
use time::PrimitiveDateTime;

use super::{log_timestamp, CalibratedReading};

/// Jump size, in percentage points, that counts as a watering.
///
/// Not derived from sensor noise or sampling cadence; tune per deployment.
pub const DEFAULT_JUMP_THRESHOLD_PCT: f64 = 10.0;

/// A detected watering: the reading that landed after the jump.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WateringEvent {
    /// Position of the post-jump reading in the scanned series.
    pub index: usize,
    #[serde(with = "log_timestamp")]
    pub timestamp: PrimitiveDateTime,
    pub delta_pct: f64,
}

/// All indices where `moisture[i] - moisture[i - 1] > threshold_pct`.
///
/// Deltas are taken between neighbouring readings only.  No smoothing is
/// applied, so a single noisy spike above the threshold counts.
pub fn detect_events(series: &[CalibratedReading], threshold_pct: f64) -> Vec<WateringEvent> {
    series
        .windows(2)
        .enumerate()
        .filter_map(|(i, pair)| jump_at(i + 1, pair, threshold_pct))
        .collect()
}

/// The most recent watering event, if any.
pub fn last_event(series: &[CalibratedReading], threshold_pct: f64) -> Option<WateringEvent> {
    series
        .windows(2)
        .enumerate()
        .rev()
        .find_map(|(i, pair)| jump_at(i + 1, pair, threshold_pct))
}

fn jump_at(
    index: usize,
    pair: &[CalibratedReading],
    threshold_pct: f64,
) -> Option<WateringEvent> {
    let delta = pair[1].moisture_pct - pair[0].moisture_pct;
    (delta > threshold_pct).then(|| WateringEvent {
        index,
        timestamp: pair[1].timestamp,
        delta_pct: delta,
    })
}
