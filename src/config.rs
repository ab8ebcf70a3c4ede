use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{controller_name, Device};

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(10);
pub const IDLE_READ_BACKOFF: Duration = Duration::from_secs(1);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings a host application persists for one controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Overrides the name derived from `host`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default)]
    pub devices: Vec<Device>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_scan_interval_secs() -> u64 {
    DEFAULT_SCAN_INTERVAL.as_secs()
}

impl ControllerConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            name: None,
            scan_interval_secs: default_scan_interval_secs(),
            devices: Vec::new(),
        }
    }

    pub fn controller_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| controller_name(&self.host))
    }

    /// Scan interval with the minimum applied.
    pub fn scan_interval(&self) -> Duration {
        clamp_scan_interval(Duration::from_secs(self.scan_interval_secs))
    }
}

pub fn clamp_scan_interval(interval: Duration) -> Duration {
    interval.max(MIN_SCAN_INTERVAL)
}

/// Backoff applied between reconnection attempts after the link drops.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the second attempt; the first is immediate.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
