//! Sensor kinds and their conversion rules.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cycle::Calibration;

/// What a sensor measures, which decides how its raw log values are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Capacitive soil probe; raw units need calibration.
    Moisture,
    /// Already in degrees Celsius.
    Temperature,
    /// Already in percent relative humidity.
    Humidity,
}

impl SensorKind {
    pub fn convert(self, raw: f64, calibration: &Calibration) -> f64 {
        match self {
            Self::Moisture => calibration.convert(raw),
            Self::Temperature | Self::Humidity => raw,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Moisture => "%",
            Self::Temperature => "°C",
            Self::Humidity => "%RH",
        }
    }

    /// Only moisture feeds the watering-cycle estimate.
    pub fn drives_estimate(self) -> bool {
        matches!(self, Self::Moisture)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Moisture => write!(f, "moisture"),
            Self::Temperature => write!(f, "temperature"),
            Self::Humidity => write!(f, "humidity"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cal() -> Calibration {
        Calibration::new(2000.0, 1400.0).unwrap()
    }

    #[test]
    fn moisture_is_calibrated() {
        assert!((SensorKind::Moisture.convert(1700.0, &cal()) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn temperature_and_humidity_pass_through() {
        assert_eq!(SensorKind::Temperature.convert(21.5, &cal()), 21.5);
        assert_eq!(SensorKind::Humidity.convert(48.0, &cal()), 48.0);
    }

    #[test]
    fn only_moisture_drives_estimate() {
        assert!(SensorKind::Moisture.drives_estimate());
        assert!(!SensorKind::Temperature.drives_estimate());
        assert!(!SensorKind::Humidity.drives_estimate());
    }

    #[test]
    fn deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrap {
            kind: SensorKind,
        }
        let w: Wrap = toml::from_str(r#"kind = "humidity""#).unwrap();
        assert_eq!(w.kind, SensorKind::Humidity);
        assert!(toml::from_str::<Wrap>(r#"kind = "pressure""#).is_err());
    }

    #[test]
    fn display_and_unit() {
        assert_eq!(SensorKind::Moisture.to_string(), "moisture");
        assert_eq!(SensorKind::Temperature.unit(), "°C");
    }
}
