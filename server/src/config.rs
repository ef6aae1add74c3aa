//! Command-line and programmatic server configuration

use clap::Parser;
use shared::{DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_MAX_PLAYERS, DEFAULT_PORT, LARGEST_PAYLOAD_SIZE};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OUTGOING_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("lobby capacity must be at least 1")]
    NoCapacity,
    #[error("max payload size {0} is smaller than the largest packet payload")]
    PayloadLimitTooSmall(u16),
    #[error("handshake timeout must be greater than zero")]
    ZeroHandshakeTimeout,
    #[error("housekeeping interval must be greater than zero")]
    ZeroHousekeepingInterval,
    #[error("outgoing queue capacity must be at least 1")]
    ZeroQueueCapacity,
}

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about = "Lobby server for the multiplayer action game")]
pub struct ServerConfig {
    /// Address to bind the listener to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// TCP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Lobby capacity (1-255)
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_MAX_PLAYERS,
        value_parser = clap::value_parser!(u8).range(1..)
    )]
    pub max_players: u8,

    /// Largest payload accepted before the connection is dropped
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD_SIZE as u16)]
    pub max_payload_size: u16,

    /// Evict connections that have not logged in after this many seconds
    #[arg(long = "handshake-timeout", value_name = "SECS")]
    pub handshake_timeout_secs: Option<u64>,

    /// How often stale connections are checked for, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub housekeeping_interval_ms: u64,

    /// Packets buffered per connection before a slow reader is dropped
    #[arg(long, default_value_t = DEFAULT_OUTGOING_QUEUE_CAPACITY)]
    pub outgoing_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_players: DEFAULT_MAX_PLAYERS,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE as u16,
            handshake_timeout_secs: None,
            housekeeping_interval_ms: 1000,
            outgoing_queue_capacity: DEFAULT_OUTGOING_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_players == 0 {
            return Err(ConfigError::NoCapacity);
        }
        if (self.max_payload_size as usize) < LARGEST_PAYLOAD_SIZE {
            return Err(ConfigError::PayloadLimitTooSmall(self.max_payload_size));
        }
        if self.handshake_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }
        if self.housekeeping_interval_ms == 0 {
            return Err(ConfigError::ZeroHousekeepingInterval);
        }
        if self.outgoing_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 50000);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.max_payload_size, 1024);
        assert_eq!(config.handshake_timeout(), None);
        assert_eq!(config.bind_addr(), "0.0.0.0:50000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_matches_default() {
        let parsed = ServerConfig::try_parse_from(["server"]).unwrap();
        assert_eq!(parsed, ServerConfig::default());
    }

    #[test]
    fn test_parse_all_flags() {
        let parsed = ServerConfig::try_parse_from([
            "server",
            "-H",
            "127.0.0.1",
            "--port",
            "4242",
            "-m",
            "8",
            "--max-payload-size",
            "512",
            "--handshake-timeout",
            "30",
            "--housekeeping-interval-ms",
            "250",
            "--outgoing-queue-capacity",
            "32",
        ])
        .unwrap();

        assert_eq!(parsed.bind_addr(), "127.0.0.1:4242");
        assert_eq!(parsed.max_players, 8);
        assert_eq!(parsed.max_payload_size, 512);
        assert_eq!(parsed.handshake_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(parsed.housekeeping_interval(), Duration::from_millis(250));
        assert_eq!(parsed.outgoing_queue_capacity, 32);
    }

    #[test]
    fn test_zero_capacity_rejected_by_parser() {
        assert!(ServerConfig::try_parse_from(["server", "-m", "0"]).is_err());
        assert!(ServerConfig::try_parse_from(["server", "-m", "256"]).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ServerConfig {
            max_players: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoCapacity));

        let config = ServerConfig {
            max_payload_size: 8,
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::PayloadLimitTooSmall(8)));

        let config = ServerConfig {
            handshake_timeout_secs: Some(0),
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroHandshakeTimeout));

        let config = ServerConfig {
            housekeeping_interval_ms: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroHousekeepingInterval));

        let config = ServerConfig {
            outgoing_queue_capacity: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueCapacity));
    }
}
