use anyhow::{Context, Result};
use std::{env, sync::Arc};
use time::UtcOffset;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use plantwatch_hub::cycle::{local_offset, Estimator};
use plantwatch_hub::poller::Poller;
use plantwatch_hub::state::SystemState;
use plantwatch_hub::{config, mqtt, web};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Must be read while the process is still single-threaded.
    let offset = local_offset();

    tokio::runtime::Runtime::new()
        .context("failed to start async runtime")?
        .block_on(run(offset))
}

async fn run(offset: UtcOffset) -> Result<()> {
    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let mut cfg = config::load(&config_path)?;
    if let Ok(dir) = env::var("DATA_DIR") {
        cfg.data_dir = dir;
    }

    // ── Estimator ───────────────────────────────────────────────────
    let cycle_cfg = cfg.cycle_config().context("invalid calibration")?;
    let estimator = Estimator::new(cycle_cfg).context("invalid calibration")?;

    info!(
        config = %config_path,
        data_dir = %cfg.data_dir,
        sensors = cfg.sensors.len(),
        lag_order = cycle_cfg.forecast.lag_order,
        target_pct = cycle_cfg.target_pct,
        %offset,
        "hub configured"
    );

    // ── Shared state (ephemeral, for the status API) ────────────────
    let shared = Arc::new(RwLock::new(SystemState::new(&cfg.sensors)));
    {
        let mut st = shared.write().await;
        st.record_system("hub started".to_string());
    }

    // ── Web server ──────────────────────────────────────────────────
    let web_state = Arc::clone(&shared);
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state).await {
            error!("{e:#}");
        }
    });

    // ── MQTT (optional) ─────────────────────────────────────────────
    let publisher = if cfg.mqtt.enabled {
        let (publisher, eventloop) = mqtt::connect(&cfg.mqtt);
        info!(
            host = %cfg.mqtt.host,
            port = cfg.mqtt.port,
            topic_root = %cfg.mqtt.topic_root,
            "mqtt publishing enabled"
        );
        tokio::spawn(mqtt::drive(eventloop, Arc::clone(&shared)));
        Some(publisher)
    } else {
        warn!("mqtt disabled; estimates are only served over http");
        None
    };

    // ── Poller ──────────────────────────────────────────────────────
    Poller::new(&cfg, estimator, shared, publisher, offset)
        .run()
        .await;

    Ok(())
}
