//! Polling loop: follows the sensor logs, keeps the dashboard state current,
//! and periodically re-runs the cycle estimator.
//!
//! ```text
//! every dashboard_update_secs ──▶ read new rows ──▶ shared state + window
//! every prediction_every polls ──▶ spawn_blocking(estimate) ──▶ apply if newest
//! ```
//!
//! Estimation runs off the async workers.  Each run is tagged with a
//! generation number and only the result of the most recently started run is
//! applied, so a slow fit can never overwrite a newer answer.

use std::time::Duration;

use time::UtcOffset;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::cycle::{now_at, CycleState, Estimate, Estimator};
use crate::mqtt::Publisher;
use crate::sensor::SensorKind;
use crate::sensor_log::{LogTail, ParsedLog};
use crate::state::{LatestReading, SharedState};

// ---------------------------------------------------------------------------
// Per-sensor feed
// ---------------------------------------------------------------------------

pub struct SensorFeed {
    pub name: String,
    pub kind: SensorKind,
    tail: LogTail,
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct Poller {
    estimator: Estimator,
    feeds: Vec<SensorFeed>,
    cycle: CycleState,
    shared: SharedState,
    publisher: Option<Publisher>,
    offset: UtcOffset,
    poll_every: Duration,
    prediction_every: u32,
    polls: u32,
    generation: u64,
}

impl Poller {
    pub fn new(
        cfg: &Config,
        estimator: Estimator,
        shared: SharedState,
        publisher: Option<Publisher>,
        offset: UtcOffset,
    ) -> Self {
        let feeds = cfg
            .sensors
            .iter()
            .map(|s| SensorFeed {
                name: s.name.clone(),
                kind: s.kind,
                tail: LogTail::new(cfg.log_path(&s.name)),
            })
            .collect();
        let window_len = estimator.config().window_len;

        Self {
            estimator,
            feeds,
            cycle: CycleState::new(window_len),
            shared,
            publisher,
            offset,
            poll_every: Duration::from_secs(cfg.poll.dashboard_update_secs.max(1)),
            prediction_every: cfg.poll.prediction_every.max(1),
            polls: 0,
            generation: 0,
        }
    }

    pub fn cycle(&self) -> &CycleState {
        &self.cycle
    }

    /// Run forever.  Intended to be awaited from main.
    pub async fn run(mut self) {
        let (tx, mut rx) = mpsc::channel::<(u64, Estimate)>(4);

        // Initial load: whatever the logs already hold.
        let loaded = self.poll_once().await;
        info!(
            sensors = self.feeds.len(),
            readings = loaded,
            poll_sec = self.poll_every.as_secs(),
            prediction_every = self.prediction_every,
            "poller started"
        );
        self.shared
            .write()
            .await
            .record_system(format!("poller started ({loaded} readings loaded)"));
        self.start_estimate(&tx);

        let mut ticker = tokio::time::interval(self.poll_every);
        // The first tick fires immediately and the initial load already ran.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                    self.polls += 1;
                    if self.polls % self.prediction_every == 0 {
                        self.start_estimate(&tx);
                    }
                }
                Some((generation, estimate)) = rx.recv() => {
                    self.apply(generation, estimate).await;
                }
            }
        }
    }

    /// Read newly appended rows from every log.  Returns how many readings
    /// were accepted.
    pub async fn poll_once(&mut self) -> usize {
        let calibration = self.estimator.config().calibration;
        let mut accepted = 0;

        for feed in &mut self.feeds {
            let parsed = match feed.tail.read_new() {
                Ok(p) => p,
                Err(e) => {
                    error!(sensor = %feed.name, "failed to read log: {e:#}");
                    self.shared
                        .write()
                        .await
                        .record_error(format!("{}: {e:#}", feed.name));
                    continue;
                }
            };
            let ParsedLog { readings, issues } = parsed;

            for issue in &issues {
                warn!(sensor = %feed.name, path = %feed.tail.path().display(), "{issue}");
            }
            if !issues.is_empty() {
                self.shared.write().await.record_error(format!(
                    "{}: {} malformed row(s)",
                    feed.name,
                    issues.len()
                ));
            }
            if readings.is_empty() {
                continue;
            }

            let converted: Vec<LatestReading> = readings
                .iter()
                .map(|r| LatestReading {
                    timestamp: r.timestamp,
                    value: feed.kind.convert(r.raw_value, &calibration),
                })
                .collect();
            debug!(sensor = %feed.name, rows = readings.len(), "new readings");

            self.shared
                .write()
                .await
                .record_readings(&feed.name, &converted);

            if feed.kind.drives_estimate() {
                self.cycle.extend(readings.iter().copied());
            }
            accepted += readings.len();
        }

        accepted
    }

    /// Snapshot the cycle state and estimate on the blocking pool.
    fn start_estimate(&mut self, tx: &mpsc::Sender<(u64, Estimate)>) {
        self.generation += 1;
        let generation = self.generation;
        let snapshot = self.cycle.clone();
        let estimator = self.estimator.clone();
        let now = now_at(self.offset);
        let tx = tx.clone();

        debug!(generation, window = snapshot.window().len(), "estimate started");
        tokio::task::spawn_blocking(move || {
            let estimate = estimator.estimate_state(&snapshot, now);
            // The receiver only goes away on shutdown.
            let _ = tx.blocking_send((generation, estimate));
        });
    }

    /// Apply an estimate unless a newer one has been started since.
    pub async fn apply(&mut self, generation: u64, estimate: Estimate) {
        if generation != self.generation {
            debug!(
                generation,
                latest = self.generation,
                "discarding stale estimate"
            );
            return;
        }

        self.cycle.apply(&estimate);
        info!(
            last_watered = ?self.cycle.last_watered_date(),
            prediction = %estimate.prediction,
            cycle_len = estimate.cycle_len,
            "estimate updated"
        );
        self.shared.write().await.record_estimate(estimate);

        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish_estimate(&estimate).await {
                error!("mqtt publish failed: {e:#}");
                self.shared
                    .write()
                    .await
                    .record_error(format!("mqtt publish failed: {e:#}"));
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
