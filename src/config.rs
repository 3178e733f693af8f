//! Runtime configuration for a viewing session
//!
//! Everything has a sensible default; `SyncConfig::from_env` layers
//! `REELSYNC_*` environment overrides on top.

use std::time::Duration;

/// Bounds for the playing-time sampler
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
const MAX_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

pub const ENV_MIN_DELAY_MS: &str = "REELSYNC_MIN_DELAY_MS";
pub const ENV_PENDING_TIMEOUT_MS: &str = "REELSYNC_PENDING_TIMEOUT_MS";
pub const ENV_SAMPLE_INTERVAL_MS: &str = "REELSYNC_SAMPLE_INTERVAL_MS";
pub const ENV_ZERO_FALLBACK: &str = "REELSYNC_ZERO_FALLBACK";
pub const ENV_PLAYER_URL: &str = "REELSYNC_PLAYER_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// What to do when no time can be read from a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionFallback {
    /// Fail the capture; nothing is seeked
    #[default]
    Reject,
    /// Legacy behaviour: treat unreadable text as 00:00:00
    ZeroTime,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Floor for the capture-to-resolution delay added to the seek target
    pub minimum_delay: Duration,
    pub fallback: ExtractionFallback,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            minimum_delay: Duration::from_millis(2500),
            fallback: ExtractionFallback::Reject,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long a command may wait while the player is loading
    pub pending_timeout: Duration,
    /// Current-time sampling period while playing
    pub sample_interval: Duration,
    /// How often pending commands are checked against `pending_timeout`
    pub expiry_check_interval: Duration,
    pub allow_seek_ahead: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::from_secs(5),
            sample_interval: Duration::from_millis(150),
            expiry_check_interval: Duration::from_millis(250),
            allow_seek_ahead: true,
        }
    }
}

impl BridgeConfig {
    /// Sampling period clamped to 100..=200ms
    pub fn effective_sample_interval(&self) -> Duration {
        self.sample_interval
            .clamp(MIN_SAMPLE_INTERVAL, MAX_SAMPLE_INTERVAL)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub capture: CaptureConfig,
    pub bridge: BridgeConfig,
    /// Control-script socket of the embedded player
    pub player_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            bridge: BridgeConfig::default(),
            player_url: "ws://127.0.0.1:9230/player".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults plus whatever `lookup` returns for each key
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MIN_DELAY_MS) {
            config.capture.minimum_delay = parse_millis(ENV_MIN_DELAY_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_PENDING_TIMEOUT_MS) {
            config.bridge.pending_timeout = parse_millis(ENV_PENDING_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_SAMPLE_INTERVAL_MS) {
            config.bridge.sample_interval = parse_millis(ENV_SAMPLE_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_ZERO_FALLBACK) {
            config.capture.fallback = if parse_flag(ENV_ZERO_FALLBACK, &value)? {
                ExtractionFallback::ZeroTime
            } else {
                ExtractionFallback::Reject
            };
        }
        if let Some(value) = lookup(ENV_PLAYER_URL) {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: ENV_PLAYER_URL,
                    value,
                    reason: "must not be empty".to_string(),
                });
            }
            config.player_url = value;
        }

        Ok(config)
    }
}

fn parse_millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    let value = value.trim();
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected 1/0/true/false".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.capture.minimum_delay, Duration::from_millis(2500));
        assert_eq!(config.capture.fallback, ExtractionFallback::Reject);
        assert_eq!(config.bridge.pending_timeout, Duration::from_secs(5));
        assert!(config.bridge.allow_seek_ahead);
    }

    #[test]
    fn test_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            (ENV_MIN_DELAY_MS, "1000"),
            (ENV_PENDING_TIMEOUT_MS, " 8000 "),
            (ENV_ZERO_FALLBACK, "TRUE"),
            (ENV_PLAYER_URL, "ws://player.local/ctl"),
        ]))
        .unwrap();
        assert_eq!(config.capture.minimum_delay, Duration::from_secs(1));
        assert_eq!(config.bridge.pending_timeout, Duration::from_secs(8));
        assert_eq!(config.capture.fallback, ExtractionFallback::ZeroTime);
        assert_eq!(config.player_url, "ws://player.local/ctl");
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(SyncConfig::from_lookup(lookup(&[(ENV_MIN_DELAY_MS, "2.5s")])).is_err());
        assert!(SyncConfig::from_lookup(lookup(&[(ENV_ZERO_FALLBACK, "maybe")])).is_err());
        assert!(SyncConfig::from_lookup(lookup(&[(ENV_PLAYER_URL, "  ")])).is_err());
    }

    #[test]
    fn test_sample_interval_is_clamped() {
        let mut bridge = BridgeConfig::default();
        assert_eq!(bridge.effective_sample_interval(), Duration::from_millis(150));
        bridge.sample_interval = Duration::from_millis(10);
        assert_eq!(bridge.effective_sample_interval(), Duration::from_millis(100));
        bridge.sample_interval = Duration::from_secs(2);
        assert_eq!(bridge.effective_sample_interval(), Duration::from_millis(200));
    }
}
