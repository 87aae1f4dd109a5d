//! Broker connection and bus configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Default broker port.
pub const DEFAULT_PORT: u16 = 5672;

/// Default exchange name.
pub const DEFAULT_EXCHANGE: &str = "bus";

/// Default timeout for outbound command calls.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection and behavior settings for a bus.
///
/// Validated at startup; a bad field fails `Bus::start` before any broker
/// call is made.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Broker hostname. Required.
    pub host: String,
    /// Broker virtual host.
    pub virtual_host: String,
    /// Broker port.
    pub port: u16,
    /// Credential: user name.
    pub username: String,
    /// Credential: password.
    pub password: String,
    /// Name of the topic exchange all traffic flows through.
    pub exchange_name: String,
    /// Default timeout for outbound command calls.
    pub rpc_timeout: Duration,
}

impl BusConfig {
    /// Creates a configuration for `host` with defaults everywhere else.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            virtual_host: "/".to_string(),
            port: DEFAULT_PORT,
            username: "guest".to_string(),
            password: "guest".to_string(),
            exchange_name: DEFAULT_EXCHANGE.to_string(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    /// Checks every field, naming the first offender.
    ///
    /// # Errors
    /// `ConfigError` naming the rejected field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError { field: "host" });
        }
        if self.virtual_host.is_empty() {
            return Err(ConfigError {
                field: "virtual_host",
            });
        }
        if self.port == 0 {
            return Err(ConfigError { field: "port" });
        }
        if self.exchange_name.trim().is_empty() {
            return Err(ConfigError {
                field: "exchange_name",
            });
        }
        if self.rpc_timeout.is_zero() {
            return Err(ConfigError {
                field: "rpc_timeout",
            });
        }
        Ok(())
    }
}
