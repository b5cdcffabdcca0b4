//! Two-point linear calibration from raw sensor units to moisture percent.

use serde::Serialize;

use super::{CalibratedReading, CycleError, Reading};

/// Calibration anchors: `dry_value` maps to 0 %, `wet_value` to 100 %.
///
/// Capacitive probes read *lower* when wetter, so `wet_value < dry_value`
/// is the usual case.  Either orientation is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    dry_value: f64,
    wet_value: f64,
}

impl Calibration {
    pub fn new(dry_value: f64, wet_value: f64) -> Result<Self, CycleError> {
        if !dry_value.is_finite() || !wet_value.is_finite() || dry_value == wet_value {
            return Err(CycleError::InvalidCalibration {
                dry: dry_value,
                wet: wet_value,
            });
        }
        Ok(Self {
            dry_value,
            wet_value,
        })
    }

    pub fn dry_value(&self) -> f64 {
        self.dry_value
    }

    pub fn wet_value(&self) -> f64 {
        self.wet_value
    }

    /// Map a raw reading to percent.  Values beyond the anchors extrapolate.
    #[inline]
    pub fn convert(&self, reading: f64) -> f64 {
        (reading - self.dry_value) / (self.wet_value - self.dry_value) * 100.0
    }

    /// Inverse of [`convert`](Self::convert).
    #[inline]
    pub fn invert(&self, moisture_pct: f64) -> f64 {
        moisture_pct / 100.0 * (self.wet_value - self.dry_value) + self.dry_value
    }

    /// Calibrate a whole series element by element.
    pub fn calibrate(&self, series: &[Reading]) -> Vec<CalibratedReading> {
        series
            .iter()
            .map(|r| CalibratedReading {
                timestamp: r.timestamp,
                moisture_pct: self.convert(r.raw_value),
            })
            .collect()
    }
}

/// One-shot conversion that validates the anchors on every call.
pub fn convert(reading: f64, dry_value: f64, wet_value: f64) -> Result<f64, CycleError> {
    Calibration::new(dry_value, wet_value).map(|c| c.convert(reading))
}
