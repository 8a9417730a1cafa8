//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::input_buffer::InputBufferConfig;
use crate::util::rate_limit::INPUT_RATE_LIMIT;
use crate::util::time::DEFAULT_TICK_RATE_HZ;

/// Messages per second a connection needs beyond one INPUT per tick (PING, JOIN)
pub const RATE_LIMIT_HEADROOM: u32 = 10;

/// Inbound allowance used when `INPUT_RATE_LIMIT` is not set
pub fn default_input_rate_limit(tick_rate_hz: u32) -> u32 {
    INPUT_RATE_LIMIT.max(tick_rate_hz.saturating_mul(2))
}

/// Server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
    /// Allowed client origins for CORS (comma-separated, `*` for any)
    pub client_origin: String,

    /// Authoritative simulation rate
    pub tick_rate_hz: u32,
    /// Per-connection input queue capacity
    pub input_buffer_capacity: usize,
    /// Per-session outbound frame capacity
    pub outbound_queue_capacity: usize,
    pub max_players_per_room: usize,
    /// How far ahead of server time an input timestamp may be
    pub input_max_future_ms: u64,
    /// How far behind server time an input timestamp may be
    pub input_max_age_ms: u64,
    /// Inbound messages allowed per connection per second
    pub input_rate_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            log_json: false,
            client_origin: "*".to_string(),
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            input_buffer_capacity: 32,
            outbound_queue_capacity: 32,
            max_players_per_room: 8,
            input_max_future_ms: 1_000,
            input_max_age_ms: 5_000,
            input_rate_limit: INPUT_RATE_LIMIT,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // PORT wins for hosted deployments, then SERVER_ADDR
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| defaults.server_addr.to_string())
        };

        let tick_rate_hz = parse_var("TICK_RATE_HZ", defaults.tick_rate_hz)?;

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or(defaults.client_origin),

            tick_rate_hz,
            input_buffer_capacity: parse_var("INPUT_BUFFER_CAPACITY", defaults.input_buffer_capacity)?,
            outbound_queue_capacity: parse_var("OUTBOUND_QUEUE_CAPACITY", defaults.outbound_queue_capacity)?,
            max_players_per_room: parse_var("MAX_PLAYERS_PER_ROOM", defaults.max_players_per_room)?,
            input_max_future_ms: parse_var("INPUT_MAX_FUTURE_MS", defaults.input_max_future_ms)?,
            input_max_age_ms: parse_var("INPUT_MAX_AGE_MS", defaults.input_max_age_ms)?,
            input_rate_limit: parse_var("INPUT_RATE_LIMIT", default_input_rate_limit(tick_rate_hz))?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > 240 {
            return Err(ConfigError::OutOfRange("TICK_RATE_HZ"));
        }
        if self.input_buffer_capacity == 0 {
            return Err(ConfigError::OutOfRange("INPUT_BUFFER_CAPACITY"));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::OutOfRange("OUTBOUND_QUEUE_CAPACITY"));
        }
        if self.max_players_per_room == 0 {
            return Err(ConfigError::OutOfRange("MAX_PLAYERS_PER_ROOM"));
        }
        // Every tick's INPUT must fit under the limit
        if self.input_rate_limit < self.tick_rate_hz.saturating_add(RATE_LIMIT_HEADROOM) {
            return Err(ConfigError::OutOfRange("INPUT_RATE_LIMIT"));
        }
        Ok(())
    }

    pub fn input_buffer_config(&self) -> InputBufferConfig {
        InputBufferConfig {
            capacity: self.input_buffer_capacity,
            max_future_ms: self.input_max_future_ms,
            max_age_ms: self.input_max_age_ms,
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Value out of range for environment variable: {0}")]
    OutOfRange(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
