use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use tokio::sync::RwLock;

use crate::config::SensorEntry;
use crate::cycle::{format_timestamp, log_timestamp, Estimate, Prediction};
use crate::metrics::{RollingMetrics, SensorMetrics};
use crate::sensor::SensorKind;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub sensors: BTreeMap<String, SensorState>,
    pub estimate: Option<EstimateRecord>,
    pub events: VecDeque<SystemEvent>,
}

pub struct SensorState {
    pub kind: SensorKind,
    pub latest: Option<LatestReading>,
    pub metrics: RollingMetrics,
}

#[derive(Clone, Copy, Serialize)]
pub struct LatestReading {
    #[serde(with = "log_timestamp")]
    pub timestamp: PrimitiveDateTime,
    pub value: f64,
}

#[derive(Clone, Copy, Serialize)]
pub struct EstimateRecord {
    #[serde(flatten)]
    pub estimate: Estimate,
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Estimate,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON responses (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub sensors: BTreeMap<String, SensorStatus>,
    pub estimate: Option<EstimateRecord>,
    pub events: Vec<SystemEvent>,
}

#[derive(Serialize)]
pub struct SensorStatus {
    pub kind: SensorKind,
    pub unit: &'static str,
    pub latest: Option<LatestReading>,
    pub metrics: SensorMetrics,
}

/// The two dashboard questions, as structured values plus plain text.
#[derive(Serialize)]
pub struct WateringResponse {
    /// `YYYY-MM-DD`, or null before any watering is known.
    pub last_watered: Option<String>,
    pub next_watering: Prediction,
    pub next_watering_text: String,
    pub cycle_len: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub computed_at: Option<OffsetDateTime>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(sensors: &[SensorEntry]) -> Self {
        let sensors = sensors
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    SensorState {
                        kind: s.kind,
                        latest: None,
                        metrics: RollingMetrics::new(),
                    },
                )
            })
            .collect();

        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            sensors,
            estimate: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record converted readings for a sensor, oldest first.
    pub fn record_readings(&mut self, sensor: &str, readings: &[LatestReading]) {
        let Some(last) = readings.last().copied() else {
            return;
        };
        let Some(entry) = self.sensors.get_mut(sensor) else {
            self.record_error(format!("readings for unknown sensor '{sensor}'"));
            return;
        };

        for r in readings {
            entry.metrics.push(r.value);
        }
        entry.latest = Some(last);

        let unit = entry.kind.unit();
        let detail = if readings.len() == 1 {
            format!("{sensor}={:.2}{unit}", last.value)
        } else {
            format!(
                "{sensor}: {} readings, latest {:.2}{unit}",
                readings.len(),
                last.value
            )
        };
        self.push_event(EventKind::Reading, detail);
    }

    /// Record a fresh cycle estimate.
    pub fn record_estimate(&mut self, estimate: Estimate) {
        let last = estimate
            .last_watered
            .map(format_timestamp)
            .unwrap_or_else(|| "unknown".to_string());
        self.push_event(
            EventKind::Estimate,
            format!(
                "last watered {last}, water next: {}",
                estimate.prediction
            ),
        );
        self.estimate = Some(EstimateRecord {
            estimate,
            computed_at: OffsetDateTime::now_utc(),
        });
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            sensors: self
                .sensors
                .iter()
                .map(|(name, s)| {
                    (
                        name.clone(),
                        SensorStatus {
                            kind: s.kind,
                            unit: s.kind.unit(),
                            latest: s.latest,
                            metrics: s.metrics.snapshot(),
                        },
                    )
                })
                .collect(),
            estimate: self.estimate,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    /// Answer "last watered" / "next watering" from the latest estimate.
    pub fn to_watering(&self) -> WateringResponse {
        match &self.estimate {
            Some(rec) => WateringResponse {
                last_watered: rec.estimate.last_watered.map(|ts| format_date(ts.date())),
                next_watering: rec.estimate.prediction,
                next_watering_text: rec.estimate.prediction.to_string(),
                cycle_len: rec.estimate.cycle_len,
                computed_at: Some(rec.computed_at),
            },
            None => WateringResponse {
                last_watered: None,
                next_watering: Prediction::InsufficientData,
                next_watering_text: "No estimate yet".to_string(),
                cycle_len: 0,
                computed_at: None,
            },
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    )
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn sensors() -> Vec<SensorEntry> {
        vec![
            SensorEntry {
                name: "moisture".into(),
                kind: SensorKind::Moisture,
            },
            SensorEntry {
                name: "temperature".into(),
                kind: SensorKind::Temperature,
            },
        ]
    }

    fn reading(value: f64) -> LatestReading {
        LatestReading {
            timestamp: datetime!(2024-05-01 08:00:00),
            value,
        }
    }

    #[test]
    fn new_state_lists_configured_sensors() {
        let st = SystemState::new(&sensors());
        let status = st.to_status();
        assert_eq!(status.sensors.len(), 2);
        assert!(status.sensors["moisture"].latest.is_none());
        assert!(status.estimate.is_none());
    }

    #[test]
    fn record_readings_updates_latest_and_metrics() {
        let mut st = SystemState::new(&sensors());
        st.record_readings("temperature", &[reading(20.0), reading(22.0)]);

        let status = st.to_status();
        let t = &status.sensors["temperature"];
        assert_eq!(t.latest.unwrap().value, 22.0);
        assert_eq!(t.metrics.all_time_avg, Some(21.0));
        assert_eq!(t.unit, "°C");
        assert_eq!(status.events.len(), 1);
        assert!(status.events[0].detail.contains("2 readings"));
    }

    #[test]
    fn record_readings_ignores_empty_batch() {
        let mut st = SystemState::new(&sensors());
        st.record_readings("moisture", &[]);
        assert!(st.events.is_empty());
    }

    #[test]
    fn unknown_sensor_records_error() {
        let mut st = SystemState::new(&sensors());
        st.record_readings("pressure", &[reading(1.0)]);
        assert!(matches!(st.events[0].kind, EventKind::Error));
    }

    #[test]
    fn events_are_bounded() {
        let mut st = SystemState::new(&sensors());
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        // Newest first in the status view.
        assert_eq!(
            st.to_status().events[0].detail,
            format!("event {}", MAX_EVENTS + 24)
        );
    }

    #[test]
    fn watering_without_estimate() {
        let st = SystemState::new(&sensors());
        let w = st.to_watering();
        assert_eq!(w.last_watered, None);
        assert_eq!(w.next_watering, Prediction::InsufficientData);
        assert!(w.computed_at.is_none());
    }

    #[test]
    fn watering_reports_day_and_prediction() {
        let mut st = SystemState::new(&sensors());
        st.record_estimate(Estimate {
            last_watered: Some(datetime!(2024-05-02 09:00:00)),
            prediction: Prediction::WaterOn(datetime!(2024-05-04 18:30:00)),
            cycle_len: 299,
        });

        let w = st.to_watering();
        assert_eq!(w.last_watered.as_deref(), Some("2024-05-02"));
        assert_eq!(w.next_watering_text, "2024-05-04 18:30");
        assert_eq!(w.cycle_len, 299);
        assert!(matches!(st.events.back().unwrap().kind, EventKind::Estimate));
    }

    #[test]
    fn status_serializes() {
        let mut st = SystemState::new(&sensors());
        st.record_readings("moisture", &[reading(55.0)]);
        st.record_estimate(Estimate {
            last_watered: None,
            prediction: Prediction::WaterNow,
            cycle_len: 12,
        });

        let json = serde_json::to_value(st.to_status()).unwrap();
        assert_eq!(json["sensors"]["moisture"]["kind"], "moisture");
        assert_eq!(json["sensors"]["moisture"]["latest"]["timestamp"], "2024-05-01 08:00:00");
        assert_eq!(json["estimate"]["prediction"]["kind"], "water_now");
        assert!(json["estimate"]["last_watered"].is_null());
        assert_eq!(json["events"][0]["kind"], "estimate");
    }

    #[test]
    fn format_date_pads() {
        assert_eq!(format_date(date!(2024 - 03 - 07)), "2024-03-07");
    }
}
