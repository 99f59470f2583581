use std::time::Duration;

use log::{info, warn};

use crate::liveness::LivenessTracker;

/// Settings for one charge controller connection
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Advertised BLE name to connect to. `None` accepts the first device offering the service.
    pub device_name: Option<String>,
    /// Time between read requests
    pub poll_interval: Duration,
    /// Poll cycles without a response before the device is reported offline
    pub max_no_response_count: u8,
    /// Reject frames whose trailing MODBUS CRC does not match. Off by default, since the
    /// controller's responses are consumed unchecked.
    pub verify_checksum: bool,
    /// How long to scan for the device before giving up
    pub discovery_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: None,
            poll_interval: Duration::from_secs(2),
            max_no_response_count: LivenessTracker::MAX_NO_RESPONSE_COUNT,
            verify_checksum: false,
            discovery_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }
}

/// Log the effective configuration
pub fn log_config(config: &Config) {
    info!("LiTime MPPT BLE:");
    info!("  Device name: {}", config.device_name.as_deref().unwrap_or("<any>"));
    info!("  Update interval: {:?}", config.poll_interval);
    info!("  Offline after: {} missed polls", config.max_no_response_count);
    info!("  Discovery timeout: {:?}", config.discovery_timeout);
    if config.verify_checksum {
        warn!("  Checksum verification enabled, frames with a bad CRC will be dropped");
    }
}

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.poll_interval, Duration::from_secs(2));
    assert_eq!(config.max_no_response_count, 10);
    assert!(!config.verify_checksum);
    assert_eq!(config.device_name, None);
}

#[test]
fn test_builders() {
    let config = Config::default()
        .with_device_name("BT-TH-1234")
        .with_poll_interval(Duration::from_secs(5))
        .with_verify_checksum(true);
    assert_eq!(config.device_name.as_deref(), Some("BT-TH-1234"));
    assert_eq!(config.poll_interval, Duration::from_secs(5));
    assert!(config.verify_checksum);
}
