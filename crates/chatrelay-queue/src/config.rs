//! Queue relay configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chatrelay_types::config::TransportTimeouts;
use chatrelay_types::{RelayError, Result};

/// Default broker URI (local RabbitMQ, default vhost).
pub const DEFAULT_BROKER_URI: &str = "amqp://127.0.0.1:5672/%2f";

/// Default queue name.
pub const DEFAULT_QUEUE_NAME: &str = "chat";

/// Default number of connection attempts before giving up.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

/// Default pause between connection attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// AMQP short strings (queue names) are limited to 255 bytes.
pub const MAX_QUEUE_NAME_BYTES: usize = 255;

/// URI schemes accepted for `broker_uri`.
const ACCEPTED_SCHEMES: [&str; 3] = ["amqp://", "amqps://", "memory://"];

// ---------------------------------------------------------------------------
// AckMode
// ---------------------------------------------------------------------------

/// When a delivery is acknowledged to the broker.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    /// The broker considers a message consumed on delivery. A payload
    /// that fails to decode is lost.
    Auto,
    /// Decode first, then ack. A payload that fails to decode is
    /// rejected without requeue so a dead-letter exchange can keep it.
    #[default]
    Manual,
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for AckMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(RelayError::ConfigError {
                reason: format!("unknown ack mode '{other}' (expected 'auto' or 'manual')"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

/// Configuration for the queue relay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Broker URI: `amqp://`, `amqps://`, or `memory://` for the
    /// in-process broker.
    pub broker_uri: String,

    /// Queue joined at startup and used for publishing.
    pub queue_name: String,

    /// Acknowledgement mode for consumed deliveries.
    pub ack_mode: AckMode,

    /// Connection attempts before reporting `BrokerUnavailable`.
    pub connect_attempts: u32,

    /// Pause between failed connection attempts.
    pub retry_delay_ms: u64,

    /// Connect and per-publish deadlines.
    pub timeouts: TransportTimeouts,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broker_uri: DEFAULT_BROKER_URI.into(),
            queue_name: DEFAULT_QUEUE_NAME.into(),
            ack_mode: AckMode::default(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            timeouts: TransportTimeouts::default(),
        }
    }
}

impl QueueConfig {
    /// Pause between failed connection attempts as a `Duration`.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Validates all values.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ConfigError` if the URI scheme is not
    /// supported, the queue name is invalid, `connect_attempts` is zero,
    /// or any timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if !ACCEPTED_SCHEMES
            .iter()
            .any(|scheme| self.broker_uri.starts_with(scheme))
        {
            return Err(RelayError::ConfigError {
                reason: format!(
                    "broker uri '{}' must start with one of {}",
                    self.broker_uri,
                    ACCEPTED_SCHEMES.join(", ")
                ),
            });
        }

        validate_queue_name(&self.queue_name)?;

        if self.connect_attempts == 0 {
            return Err(RelayError::ConfigError {
                reason: "connect_attempts must be greater than 0".into(),
            });
        }

        self.timeouts.validate()
    }
}

/// Checks that `name` is usable as a queue name.
///
/// # Errors
///
/// Returns `RelayError::ConfigError` for an empty name or one longer
/// than [`MAX_QUEUE_NAME_BYTES`].
pub fn validate_queue_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RelayError::ConfigError {
            reason: "queue name must not be empty".into(),
        });
    }
    if name.len() > MAX_QUEUE_NAME_BYTES {
        return Err(RelayError::ConfigError {
            reason: format!(
                "queue name is {} bytes (max {MAX_QUEUE_NAME_BYTES})",
                name.len()
            ),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
