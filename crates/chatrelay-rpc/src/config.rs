//! Direct relay configuration.
//!
//! The server side needs a listen address; the client side needs the
//! peer's gRPC endpoint. Both share the connect / per-call deadlines
//! from [`TransportTimeouts`].

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tonic::transport::Endpoint;

use chatrelay_types::config::TransportTimeouts;
use chatrelay_types::{RelayError, Result};

/// Default gRPC listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 50051;

/// Default number of attempts to reach the peer at startup.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;

/// Default pause between peer connection attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

// ---------------------------------------------------------------------------
// DirectConfig
// ---------------------------------------------------------------------------

/// Configuration for one direct relay node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    /// Address the server binds (e.g. `0.0.0.0:50051`). Port `0` picks
    /// an ephemeral port.
    pub listen_addr: SocketAddr,

    /// Peer gRPC endpoint, e.g. `http://127.0.0.1:50052`.
    pub peer_endpoint: String,

    /// Attempts to reach the peer before startup fails. Two nodes that
    /// point at each other can then be started in either order.
    pub connect_attempts: u32,

    /// Pause between peer connection attempts.
    pub retry_delay_ms: u64,

    /// Connect and per-call deadlines for the client.
    pub timeouts: TransportTimeouts,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
            peer_endpoint: peer_endpoint("127.0.0.1", DEFAULT_LISTEN_PORT + 1),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            timeouts: TransportTimeouts::default(),
        }
    }
}

impl DirectConfig {
    /// Pause between peer connection attempts as a `Duration`.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - Peer endpoint is not an `http://` or `https://` URI.
    /// - `connect_attempts` is zero.
    /// - Any timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if !(self.peer_endpoint.starts_with("http://") || self.peer_endpoint.starts_with("https://")) {
            return Err(RelayError::ConfigError {
                reason: format!(
                    "peer endpoint '{}' must start with http:// or https://",
                    self.peer_endpoint
                ),
            });
        }

        Endpoint::from_shared(self.peer_endpoint.clone()).map_err(|e| RelayError::ConfigError {
            reason: format!("invalid peer endpoint '{}': {e}", self.peer_endpoint),
        })?;

        if self.connect_attempts == 0 {
            return Err(RelayError::ConfigError {
                reason: "connect_attempts must be greater than 0".into(),
            });
        }

        self.timeouts.validate()
    }
}

/// Formats a plaintext gRPC endpoint for `host:port`.
pub fn peer_endpoint(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
