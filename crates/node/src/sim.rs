//! Stateful plant sensor simulator for local development.
//!
//! Models a capacitive moisture probe read through an ADC in millivolts
//! (higher = drier) plus a DHT-style temperature/humidity sensor:
//! - Gradual drying drift between samples, with a random walk
//! - Per-read electronic noise and occasional spikes on the moisture probe
//! - Day/night swing in temperature and humidity
//! - Automatic watering when the soil gets dry, which shows up in the log as
//!   a sharp jump in moisture

use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

/// Full-scale ADC input, in millivolts.
const ADC_MAX_MV: f64 = 3300.0;

/// Moisture (percent) below which the simulated gardener waters.
const WATER_BELOW_PCT: f64 = 30.0;

/// Fraction of the calibration range a watering restores.
const WATERING_GAIN: f64 = 0.45;

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries steadily.  Moderate noise, ~3% spike
    /// rate.  Waters roughly every couple of days.
    Drying,
    /// Hovers near the centre.  Low noise, rare spikes.
    Stable,
    /// High noise and ~10% spike rate.  Exercises the batch median.
    Flaky,
    /// Starts near the wet end and dries very slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Moisture,
    Temperature,
    Humidity,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Self::Moisture, Self::Temperature, Self::Humidity];

    /// Log file stem, matching the hub's sensor names.
    pub fn name(self) -> &'static str {
        match self {
            Self::Moisture => "moisture",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct PlantSim {
    /// Current "true" probe voltage.  Evolves once per [`step`](Self::step).
    moisture_mv: f64,

    raw_dry: f64,
    raw_wet: f64,

    drift_per_step: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,

    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
}

impl PlantSim {
    /// `raw_dry` / `raw_wet` should match the hub's `[calibration]`
    /// (2000 / 1400 mV for the stock probe).
    pub fn new(scenario: Scenario, raw_dry: f64, raw_wet: f64) -> Self {
        // start_frac: 0.0 = at raw_wet (wettest), 1.0 = at raw_dry (driest)
        let (drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, start_frac) =
            match scenario {
                Scenario::Drying => (0.3, 0.5, 0.0, 8.0, 0.03_f32, 150.0, 0.5),
                Scenario::Stable => (0.05, 0.3, 0.05, 4.0, 0.005, 80.0, 0.5),
                Scenario::Flaky => (0.3, 1.0, 0.0, 20.0, 0.10, 300.0, 0.5),
                Scenario::Wet => (0.1, 0.4, 0.0, 6.0, 0.02, 120.0, 0.1),
            };

        let start = raw_wet + start_frac * (raw_dry - raw_wet);

        Self {
            moisture_mv: start,
            raw_dry,
            raw_wet,
            drift_per_step: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            center: start,
            noise_sigma,
            spike_prob,
            spike_sigma,
        }
    }

    /// Current true moisture as a percentage of the calibration range.
    pub fn moisture_pct(&self) -> f64 {
        (self.moisture_mv - self.raw_dry) / (self.raw_wet - self.raw_dry) * 100.0
    }

    /// Advance one sampling interval.  Returns `true` if the plant was
    /// watered during this step.
    pub fn step(&mut self) -> bool {
        let pull = self.mean_reversion * (self.center - self.moisture_mv);
        let walk = gaussian(0.0, self.walk_sigma);
        // Drying moves toward raw_dry, whichever side of raw_wet it is on.
        let dry = self.drift_per_step * (self.raw_dry - self.raw_wet).signum();

        self.moisture_mv += dry + pull + walk;

        if self.moisture_pct() < WATER_BELOW_PCT {
            self.water();
            return true;
        }
        false
    }

    /// Pour water: moisture jumps toward the wet end.
    pub fn water(&mut self) {
        self.moisture_mv -= WATERING_GAIN * (self.raw_dry - self.raw_wet);
        let (lo, hi) = if self.raw_wet < self.raw_dry {
            (self.raw_wet, self.raw_dry)
        } else {
            (self.raw_dry, self.raw_wet)
        };
        self.moisture_mv = self.moisture_mv.clamp(lo, hi);
    }

    /// One instantaneous reading.  `day_phase` is the time of day in
    /// `[0, 1)`; temperature peaks mid-afternoon and humidity dips with it.
    pub fn read(&self, channel: Channel, day_phase: f64) -> f64 {
        let diurnal = (2.0 * std::f64::consts::PI * (day_phase - 0.375)).sin();

        match channel {
            Channel::Moisture => {
                let spike = if fastrand::f32() < self.spike_prob {
                    gaussian(0.0, self.spike_sigma)
                } else {
                    0.0
                };
                let reading = self.moisture_mv + gaussian(0.0, self.noise_sigma) + spike;
                reading.round().clamp(0.0, ADC_MAX_MV)
            }
            Channel::Temperature => gaussian(21.0 + 4.0 * diurnal, 0.3),
            Channel::Humidity => gaussian(55.0 - 10.0 * diurnal, 1.0).clamp(0.0, 100.0),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
