//! Engine configuration, kept as plain, `serde`-deserializable data so
//! `fanout-cli` can load it straight out of a YAML file and layer CLI
//! flags on top.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fan-out strategy, fixed for the process lifetime once selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Synchronous per-client transmission; the slowest client dominates.
    Naive,
    /// Per-client bounded queue with drop-oldest and disconnect policies.
    Queue,
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::Queue
    }
}

/// All engine-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub mode: DispatchMode,
    pub host: String,
    pub port: u16,
    /// Messages per second produced by the Publisher.
    pub rate: f64,
    pub payload_bytes: u32,
    /// Per-session queue capacity (queue mode only).
    pub maxsize: u32,
    /// Max drops within `drop_window_secs` before disconnect.
    pub drop_limit: u32,
    pub drop_window_secs: f64,
    /// Max continuous queue-full duration before disconnect.
    pub full_timeout: f64,
    pub ping_interval: f64,
    pub ping_timeout: f64,
    /// Per-send hard timeout in naive mode.
    pub naive_send_timeout: f64,
    pub metrics_period: f64,
    pub shutdown_grace: f64,
    pub log_json: bool,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Queue,
            host: "0.0.0.0".to_string(),
            port: 8765,
            rate: 100.0,
            payload_bytes: 64,
            maxsize: 100,
            drop_limit: 50,
            drop_window_secs: 10.0,
            full_timeout: 5.0,
            ping_interval: 20.0,
            ping_timeout: 20.0,
            naive_send_timeout: 1.0,
            metrics_period: 5.0,
            shutdown_grace: 5.0,
            log_json: false,
        }
    }
}

impl FanoutConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate.max(0.001))
    }

    pub fn drop_window(&self) -> Duration {
        Duration::from_secs_f64(self.drop_window_secs)
    }

    pub fn full_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.full_timeout)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ping_timeout)
    }

    pub fn naive_send_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.naive_send_timeout)
    }

    pub fn metrics_period(&self) -> Duration {
        Duration::from_secs_f64(self.metrics_period)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_grace)
    }
}
