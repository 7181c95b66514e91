//! Player configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Bounds of the now-playing time refresh period
const MIN_TIME_REFRESH: Duration = Duration::from_millis(10);
const MAX_TIME_REFRESH: Duration = Duration::from_secs(3600);

/// Player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Install remote commands and publish now-playing info
    pub controls_enabled: bool,
    /// Forward skip interval announced to remote controls (seconds)
    pub forward_skip_interval: f64,
    /// Backward skip interval announced to remote controls (seconds)
    pub backward_skip_interval: f64,
    /// Number of queue elements, from the current one, attached to the engine
    pub engine_item_window: usize,
    /// Hardware content key delivery is available
    pub content_key_delivery: bool,
    /// Capacity of internal event channels
    pub channel_capacity: usize,
    /// Period of playback time refreshes of the now-playing info (seconds)
    pub time_refresh_interval: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            controls_enabled: true,
            forward_skip_interval: 10.0,
            backward_skip_interval: 10.0,
            engine_item_window: 2,
            content_key_delivery: true,
            channel_capacity: 64,
            time_refresh_interval: 1.0,
        }
    }
}

impl PlayerConfig {
    /// Parse a configuration from JSON, missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Period of now-playing time refreshes, between 10ms and one hour
    pub fn time_refresh_period(&self) -> Result<Duration> {
        let invalid = || {
            Error::InvalidConfig(format!(
                "time_refresh_interval must be between {}s and {}s, got {}",
                MIN_TIME_REFRESH.as_secs_f64(),
                MAX_TIME_REFRESH.as_secs_f64(),
                self.time_refresh_interval
            ))
        };
        let period = Duration::try_from_secs_f64(self.time_refresh_interval).map_err(|_| invalid())?;
        if period < MIN_TIME_REFRESH || period > MAX_TIME_REFRESH {
            return Err(invalid());
        }
        Ok(period)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.forward_skip_interval > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "forward_skip_interval must be positive, got {}",
                self.forward_skip_interval
            )));
        }
        if !(self.backward_skip_interval > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "backward_skip_interval must be positive, got {}",
                self.backward_skip_interval
            )));
        }
        self.time_refresh_period()?;
        if self.engine_item_window == 0 {
            return Err(Error::InvalidConfig("engine_item_window must be at least 1".into()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig("channel_capacity must be at least 1".into()));
        }
        Ok(())
    }
}
