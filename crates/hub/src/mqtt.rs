use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::MqttEntry;
use crate::cycle::Estimate;
use crate::state::{format_date, SharedState};

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Join a topic root and a leaf, tolerating a missing trailing slash.
pub(crate) fn topic(root: &str, leaf: &str) -> String {
    if root.is_empty() || root.ends_with('/') {
        format!("{root}{leaf}")
    } else {
        format!("{root}/{leaf}")
    }
}

/// `{"water_next": "<prediction text>"}`
pub(crate) fn water_next_payload(estimate: &Estimate) -> String {
    json!({ "water_next": estimate.prediction.to_string() }).to_string()
}

/// `{"water_last": "YYYY-MM-DD"}`, or null before any watering is known.
pub(crate) fn water_last_payload(estimate: &Estimate) -> String {
    let day = estimate.last_watered.map(|ts| format_date(ts.date()));
    json!({ "water_last": day }).to_string()
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Publisher {
    client: AsyncClient,
    topic_root: String,
}

impl Publisher {
    pub async fn publish_estimate(&self, estimate: &Estimate) -> Result<()> {
        for (leaf, payload) in [
            ("water_next", water_next_payload(estimate)),
            ("water_last", water_last_payload(estimate)),
        ] {
            let t = topic(&self.topic_root, leaf);
            self.client
                .publish(t.as_str(), QoS::AtLeastOnce, false, payload.clone().into_bytes())
                .await
                .with_context(|| format!("failed to publish {t}"))?;
            info!(topic = %t, %payload, "published");
        }
        Ok(())
    }
}

/// Build the client and its event loop.  Nothing is sent until the event
/// loop is polled by [`drive`].
pub fn connect(cfg: &MqttEntry) -> (Publisher, EventLoop) {
    let mut options = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
    options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        options.set_credentials(user, pass);
    }

    let (client, eventloop) = AsyncClient::new(options, 20);
    (
        Publisher {
            client,
            topic_root: cfg.topic_root.clone(),
        },
        eventloop,
    )
}

/// Poll the event loop forever, tracking connectivity in shared state.
/// rumqttc reconnects on the next poll after an error.
pub async fn drive(mut eventloop: EventLoop, shared: SharedState) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                {
                    let mut st = shared.write().await;
                    st.mqtt_connected = false;
                    st.record_error(format!("mqtt error: {e}"));
                }
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
