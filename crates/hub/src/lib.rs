//! Plant watering hub: follows sensor logs written by the node, estimates
//! when the plant was last watered and when it needs water next, and serves
//! the answers over HTTP and (optionally) MQTT.

pub mod config;
pub mod cycle;
pub mod metrics;
pub mod mqtt;
pub mod poller;
pub mod sensor;
pub mod sensor_log;
pub mod state;
pub mod web;
