use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::feed::FeedConfig;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_BUFFER_CAPACITY: usize = 5000;
const DEFAULT_DIAG_SAMPLES: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream feed endpoint and credentials.
    pub feed: FeedConfig,
    /// JSON instrument dump consumed when the cache is cold.
    pub instruments_file: PathBuf,
    /// Address the WebSocket/HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Capacity of the batch staging buffer.
    pub buffer_capacity: usize,
    /// How many decode anomalies are logged in full before sampling stops.
    pub diag_samples: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let feed = FeedConfig {
            url: require("TICKSTREAM_FEED_URL")?,
            api_key: require("TICKSTREAM_API_KEY")?,
            access_token: require("TICKSTREAM_ACCESS_TOKEN")?,
        };

        let instruments_file = PathBuf::from(require("TICKSTREAM_INSTRUMENTS_FILE")?);

        let bind_addr = parse_or("TICKSTREAM_BIND_ADDR", DEFAULT_BIND_ADDR.parse().ok())?;
        let buffer_capacity =
            parse_or("TICKSTREAM_BUFFER_CAPACITY", Some(DEFAULT_BUFFER_CAPACITY))?;
        let diag_samples = parse_or("TICKSTREAM_DIAG_SAMPLES", Some(DEFAULT_DIAG_SAMPLES))?;

        Ok(Self {
            feed,
            instruments_file,
            bind_addr,
            buffer_capacity,
            diag_samples,
        })
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    default: Option<T>,
) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
        }),
        Err(_) => default.ok_or(ConfigError::Missing(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state and must not interleave.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn set_required() {
        std::env::set_var("TICKSTREAM_FEED_URL", "wss://feed.example.com/stream");
        std::env::set_var("TICKSTREAM_API_KEY", "key");
        std::env::set_var("TICKSTREAM_ACCESS_TOKEN", "token");
        std::env::set_var("TICKSTREAM_INSTRUMENTS_FILE", "/tmp/instruments.json");
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required();
        std::env::remove_var("TICKSTREAM_BIND_ADDR");
        std::env::remove_var("TICKSTREAM_BUFFER_CAPACITY");
        std::env::remove_var("TICKSTREAM_DIAG_SAMPLES");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(config.diag_samples, DEFAULT_DIAG_SAMPLES);
        assert_eq!(config.feed.url, "wss://feed.example.com/stream");
    }

    #[test]
    fn invalid_numeric_override_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required();
        std::env::set_var("TICKSTREAM_BUFFER_CAPACITY", "lots");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name, .. } if name == "TICKSTREAM_BUFFER_CAPACITY"));
        std::env::remove_var("TICKSTREAM_BUFFER_CAPACITY");
    }

    #[test]
    fn blank_required_var_counts_as_missing() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required();
        std::env::set_var("TICKSTREAM_API_KEY", "   ");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TICKSTREAM_API_KEY")));
        std::env::set_var("TICKSTREAM_API_KEY", "key");
    }
}
