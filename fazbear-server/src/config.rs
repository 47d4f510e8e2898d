//! Server Configuration
//!
//! Defaults plus overrides from environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

/// Slowest allowed simulation rate (Hz).
pub const MIN_TICK_RATE: u32 = 10;

/// Fastest allowed simulation rate (Hz).
pub const MAX_TICK_RATE: u32 = 200;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connections are dropped after this long without a frame.
    pub connection_timeout: Duration,
    /// Tick rate for new lobbies (Hz), within `MIN_TICK_RATE..=MAX_TICK_RATE`.
    pub tick_rate: u32,
    /// Capacity of lobbies created without one.
    pub lobby_capacity: usize,
    /// Per-connection outbound queue length.
    pub outbound_buffer: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 7121),
            max_connections: 1000,
            connection_timeout: Duration::from_secs(60),
            tick_rate: MIN_TICK_RATE,
            lobby_capacity: 5,
            outbound_buffer: 256,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but doesn't parse.
    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

impl ServerConfig {
    /// Create config from environment variables.
    ///
    /// `BIND_ADDR`, `PORT`, `TICK_RATE` and `LOBBY_CAPACITY` override the
    /// defaults. Unset variables keep them.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        let ip: IpAddr = parse_var(&lookup, "BIND_ADDR")?.unwrap_or(config.bind_addr.ip());
        let port: u16 = parse_var(&lookup, "PORT")?.unwrap_or(config.bind_addr.port());
        config.bind_addr = SocketAddr::new(ip, port);

        if let Some(rate) = parse_var::<u32, _>(&lookup, "TICK_RATE")? {
            config.tick_rate = rate.clamp(MIN_TICK_RATE, MAX_TICK_RATE);
        }
        if let Some(capacity) = parse_var(&lookup, "LOBBY_CAPACITY")? {
            config.lobby_capacity = capacity;
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
