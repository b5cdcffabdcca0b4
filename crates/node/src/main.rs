mod log_file;
mod sim;

use anyhow::Result;
use std::{env, path::PathBuf, time::Duration};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use log_file::{append_row, log_path, median, LogRow};
use sim::{Channel, PlantSim, Scenario};

/// Raw probe calibration; keep in step with the hub's `[calibration]`.
const RAW_DRY_MV: f64 = 2000.0;
const RAW_WET_MV: f64 = 1400.0;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Naive wall-clock time at `offset`, the form written to the logs.
fn now_at(offset: UtcOffset) -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc().to_offset(offset);
    PrimitiveDateTime::new(now.date(), now.time())
}

fn format_timestamp(ts: PrimitiveDateTime) -> String {
    ts.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| ts.to_string())
}

/// Fraction of the day elapsed, in `[0, 1)`.
fn day_phase(ts: PrimitiveDateTime) -> f64 {
    f64::from(ts.time().hour()) / 24.0
        + f64::from(ts.time().minute()) / 1440.0
        + f64::from(ts.time().second()) / 86400.0
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Read before anything can spawn a thread.
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    // Env config
    let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 300);
    let batch_size: usize = env_or("BATCH_SIZE", 50).max(1);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());

    let mut plant = PlantSim::new(scenario, RAW_DRY_MV, RAW_WET_MV);

    info!(
        data_dir = %data_dir.display(),
        sample_every_s,
        batch_size,
        %scenario,
        "sensor logger started"
    );

    loop {
        if plant.step() {
            info!(moisture_pct = format!("{:.1}", plant.moisture_pct()), "plant watered");
        }

        let now = now_at(offset);
        let phase = day_phase(now);
        let stamp = format_timestamp(now);

        for channel in Channel::ALL {
            let batch: Vec<f64> = (0..batch_size).map(|_| plant.read(channel, phase)).collect();
            let Some(value) = median(&batch) else {
                warn!(sensor = channel.name(), "empty batch, nothing logged");
                continue;
            };

            let path = log_path(&data_dir, channel.name());
            match append_row(&path, &LogRow { value, timestamp: &stamp }) {
                Ok(()) => info!(sensor = channel.name(), value, ts = %stamp, "logged"),
                Err(e) => error!(sensor = channel.name(), "{e:#}"),
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(sample_every_s)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn format_timestamp_matches_log_format() {
        assert_eq!(
            format_timestamp(datetime!(2024-05-01 08:05:09)),
            "2024-05-01 08:05:09"
        );
    }

    #[test]
    fn day_phase_bounds() {
        assert_eq!(day_phase(datetime!(2024-05-01 00:00:00)), 0.0);
        assert_eq!(day_phase(datetime!(2024-05-01 12:00:00)), 0.5);
        assert!(day_phase(datetime!(2024-05-01 23:59:59)) < 1.0);
    }

    #[test]
    fn now_at_utc_is_recent() {
        let now = now_at(UtcOffset::UTC);
        assert!(now.year() >= 2024, "clock looks wrong: {now}");
    }

    #[test]
    fn env_or_falls_back() {
        assert_eq!(env_or("PLANTWATCH_NODE_TEST_UNSET", 300_u64), 300);
    }
}
