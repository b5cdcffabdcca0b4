//! Composes calibration, detection, segmentation and forecasting into the
//! two questions the dashboard asks: when was the plant last watered, and
//! when does it need water next.

use serde::Serialize;
use time::{Date, PrimitiveDateTime};

use super::detector::{last_event, DEFAULT_JUMP_THRESHOLD_PCT};
use super::forecast::{forecast, ForecastConfig, Prediction};
use super::segment::{prepare_series, retain_trailing, segment};
use super::{log_timestamp, Calibration, CycleError, Reading};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleConfig {
    pub calibration: Calibration,
    /// Single-step rise, in percentage points, that counts as a watering.
    pub jump_threshold_pct: f64,
    /// Moisture level at which the plant needs water.
    pub target_pct: f64,
    pub forecast: ForecastConfig,
    /// Readings retained in the caller's trailing window.
    pub window_len: usize,
}

impl CycleConfig {
    pub fn new(calibration: Calibration) -> Self {
        Self {
            calibration,
            jump_threshold_pct: DEFAULT_JUMP_THRESHOLD_PCT,
            target_pct: 71.0,
            forecast: ForecastConfig::default(),
            window_len: 2500,
        }
    }
}

// ---------------------------------------------------------------------------
// Caller-owned state
// ---------------------------------------------------------------------------

/// Everything the estimator needs to remember between polls.  The polling
/// loop owns it; the estimator only reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleState {
    pub last_watered: Option<PrimitiveDateTime>,
    window: Vec<Reading>,
    window_len: usize,
}

impl CycleState {
    pub fn new(window_len: usize) -> Self {
        Self {
            last_watered: None,
            window: Vec::new(),
            window_len,
        }
    }

    /// Append readings, then trim to the retention limit.
    pub fn extend<I: IntoIterator<Item = Reading>>(&mut self, readings: I) {
        self.window.extend(readings);
        retain_trailing(&mut self.window, self.window_len);
    }

    pub fn window(&self) -> &[Reading] {
        &self.window
    }

    /// Carry forward what an estimate learned.
    pub fn apply(&mut self, estimate: &Estimate) {
        self.last_watered = estimate.last_watered;
    }

    /// Day of the last known watering.
    pub fn last_watered_date(&self) -> Option<Date> {
        self.last_watered.map(|ts| ts.date())
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    #[serde(with = "log_timestamp::option")]
    pub last_watered: Option<PrimitiveDateTime>,
    pub prediction: Prediction,
    /// Readings in the current cycle the forecast was based on.
    pub cycle_len: usize,
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Estimator {
    config: CycleConfig,
}

impl Estimator {
    /// Fails only for a degenerate calibration.
    pub fn new(config: CycleConfig) -> Result<Self, CycleError> {
        // Re-validate: the fields are public and may have been edited.
        Calibration::new(config.calibration.dry_value(), config.calibration.wet_value())?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Run the whole pipeline over `raw_log`.
    ///
    /// The detector's latest event refreshes a stale `last_watered` before
    /// segmenting, so the cycle never spans a detected watering.  `None`
    /// orders before any timestamp, so `max` picks whichever is known.
    pub fn estimate(
        &self,
        raw_log: &[Reading],
        last_watered: Option<PrimitiveDateTime>,
        now: PrimitiveDateTime,
    ) -> Estimate {
        let cfg = &self.config;
        let series = cfg.calibration.calibrate(&prepare_series(raw_log));

        let detected = last_event(&series, cfg.jump_threshold_pct).map(|e| e.timestamp);
        let seg = segment(&series, last_watered.max(detected), cfg.jump_threshold_pct);
        let prediction = forecast(seg.cycle, cfg.target_pct, &cfg.forecast, now);

        Estimate {
            last_watered: seg.last_watered,
            prediction,
            cycle_len: seg.cycle.len(),
        }
    }

    /// Estimate from the caller's state snapshot.
    pub fn estimate_state(&self, state: &CycleState, now: PrimitiveDateTime) -> Estimate {
        self.estimate(state.window(), state.last_watered, now)
    }

    /// Query: when the plant was last watered, at day granularity.
    pub fn last_watered(&self, state: &CycleState) -> Option<Date> {
        let series = self.config.calibration.calibrate(&prepare_series(state.window()));
        let detected = last_event(&series, self.config.jump_threshold_pct).map(|e| e.timestamp);
        state.last_watered.max(detected).map(|ts| ts.date())
    }

    /// Query: when the plant needs water next.
    pub fn next_watering(&self, state: &CycleState, now: PrimitiveDateTime) -> Prediction {
        self.estimate_state(state, now).prediction
    }
}
