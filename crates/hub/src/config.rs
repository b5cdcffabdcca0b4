//! TOML config file loading and validation for calibration, the cycle
//! estimator, polling cadence, sensors and MQTT publishing.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::cycle::{Calibration, CycleConfig, CycleError, ForecastConfig};
use crate::sensor::SensorKind;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `<sensor>_log.csv` files.
    pub data_dir: String,
    pub calibration: CalibrationEntry,
    pub cycle: CycleEntry,
    pub poll: PollEntry,
    pub sensors: Vec<SensorEntry>,
    pub mqtt: MqttEntry,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationEntry {
    pub dry_value: f64,
    pub wet_value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CycleEntry {
    pub jump_threshold_pct: f64,
    pub target_pct: f64,
    pub lag_order: usize,
    pub horizon_steps: usize,
    pub sample_interval_secs: u64,
    pub window_len: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PollEntry {
    /// Seconds between reads of the sensor logs.
    pub dashboard_update_secs: u64,
    /// Re-estimate after this many polls.
    pub prediction_every: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorEntry {
    pub name: String,
    pub kind: SensorKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttEntry {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_root: String,
    pub keep_alive_secs: u64,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            calibration: CalibrationEntry::default(),
            cycle: CycleEntry::default(),
            poll: PollEntry::default(),
            sensors: default_sensors(),
            mqtt: MqttEntry::default(),
        }
    }
}

impl Default for CalibrationEntry {
    fn default() -> Self {
        Self {
            dry_value: 2000.0,
            wet_value: 1400.0,
        }
    }
}

impl Default for CycleEntry {
    fn default() -> Self {
        let forecast = ForecastConfig::default();
        Self {
            jump_threshold_pct: 10.0,
            target_pct: 71.0,
            lag_order: forecast.lag_order,
            horizon_steps: forecast.horizon_steps,
            sample_interval_secs: forecast.sample_interval_secs,
            window_len: 2500,
        }
    }
}

impl Default for PollEntry {
    fn default() -> Self {
        Self {
            dashboard_update_secs: 10,
            prediction_every: 25,
        }
    }
}

impl Default for MqttEntry {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "plantwatch-hub".to_string(),
            username: None,
            password: None,
            topic_root: "home/plants/".to_string(),
            keep_alive_secs: 60,
        }
    }
}

fn default_sensors() -> Vec<SensorEntry> {
    [
        ("moisture", SensorKind::Moisture),
        ("temperature", SensorKind::Temperature),
        ("humidity", SensorKind::Humidity),
    ]
    .into_iter()
    .map(|(name, kind)| SensorEntry {
        name: name.to_string(),
        kind,
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_calibration(&mut errors);
        self.validate_cycle(&mut errors);
        self.validate_poll(&mut errors);
        self.validate_sensors(&mut errors);
        self.validate_mqtt(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_calibration(&self, errors: &mut Vec<String>) {
        let c = &self.calibration;
        if !c.dry_value.is_finite() || !c.wet_value.is_finite() {
            errors.push(format!(
                "calibration: dry_value {} and wet_value {} must be finite",
                c.dry_value, c.wet_value
            ));
        } else if c.dry_value == c.wet_value {
            errors.push(format!(
                "calibration: dry_value and wet_value are both {}; calibration range is zero",
                c.dry_value
            ));
        }
    }

    fn validate_cycle(&self, errors: &mut Vec<String>) {
        let c = &self.cycle;

        if !c.jump_threshold_pct.is_finite() || c.jump_threshold_pct <= 0.0 {
            errors.push(format!(
                "cycle: jump_threshold_pct must be a positive number, got {}",
                c.jump_threshold_pct
            ));
        }
        if !c.target_pct.is_finite() {
            errors.push(format!("cycle: target_pct must be finite, got {}", c.target_pct));
        }
        if c.lag_order == 0 {
            errors.push("cycle: lag_order must be positive".to_string());
        }
        if c.horizon_steps == 0 {
            errors.push("cycle: horizon_steps must be positive".to_string());
        }
        if c.sample_interval_secs == 0 {
            errors.push("cycle: sample_interval_secs must be positive".to_string());
        }

        // The window has to be able to hold a fittable cycle.
        let min_obs = 2 * c.lag_order + 1;
        if c.lag_order > 0 && c.window_len < min_obs {
            errors.push(format!(
                "cycle: window_len ({}) is shorter than the {} readings a lag_order of {} needs",
                c.window_len, min_obs, c.lag_order
            ));
        }
    }

    fn validate_poll(&self, errors: &mut Vec<String>) {
        if self.poll.dashboard_update_secs == 0 {
            errors.push("poll: dashboard_update_secs must be positive".to_string());
        }
        if self.poll.prediction_every == 0 {
            errors.push("poll: prediction_every must be positive".to_string());
        }
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<&str> = HashSet::new();

        for (i, s) in self.sensors.iter().enumerate() {
            if s.name.trim().is_empty() {
                errors.push(format!("sensors[{i}]: name is empty"));
            } else if !seen.insert(&s.name) {
                errors.push(format!("sensor '{}': duplicate name", s.name));
            }
            if s.name.contains(['/', '\\']) {
                errors.push(format!(
                    "sensor '{}': name must not contain path separators",
                    s.name
                ));
            }
        }

        let moisture = self
            .sensors
            .iter()
            .filter(|s| s.kind.drives_estimate())
            .count();
        if moisture != 1 {
            errors.push(format!(
                "sensors: exactly one moisture sensor is required, found {moisture}"
            ));
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if !m.enabled {
            return;
        }
        if m.host.trim().is_empty() {
            errors.push("mqtt: host is empty".to_string());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt: client_id is empty".to_string());
        }
        if m.username.is_some() != m.password.is_some() {
            errors.push("mqtt: username and password must be set together".to_string());
        }
    }

    // -----------------------------------------------------------------------
    // Derived values
    // -----------------------------------------------------------------------

    /// Estimator settings.  Fails on a degenerate calibration.
    pub fn cycle_config(&self) -> Result<CycleConfig, CycleError> {
        let calibration = Calibration::new(self.calibration.dry_value, self.calibration.wet_value)?;
        Ok(CycleConfig {
            calibration,
            jump_threshold_pct: self.cycle.jump_threshold_pct,
            target_pct: self.cycle.target_pct,
            forecast: ForecastConfig {
                lag_order: self.cycle.lag_order,
                horizon_steps: self.cycle.horizon_steps,
                sample_interval_secs: self.cycle.sample_interval_secs,
            },
            window_len: self.cycle.window_len,
        })
    }

    pub fn log_path(&self, sensor: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join(format!("{sensor}_log.csv"))
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

/// Parse and validate config text.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
