//! Timeout settings shared by both delivery mechanisms.
//!
//! Every network operation in the core is bounded: connection setup by
//! `connect_timeout_ms`, each outbound call by `request_timeout_ms`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{RelayError, Result};

/// Default connection-establishment timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default per-call deadline in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Connect and per-call deadlines.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportTimeouts {
    /// Upper bound on establishing a connection (peer or broker).
    pub connect_timeout_ms: u64,

    /// Upper bound on a single outbound call or publish.
    pub request_timeout_ms: u64,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl TransportTimeouts {
    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-call deadline as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validates all values.
    ///
    /// Returns an error if any timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(RelayError::ConfigError {
                reason: "connect_timeout_ms must be greater than 0".into(),
            });
        }

        if self.request_timeout_ms == 0 {
            return Err(RelayError::ConfigError {
                reason: "request_timeout_ms must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
