//! Core shared types for the chatrelay message-delivery core.
//!
//! This crate defines the types every other crate in the workspace
//! agrees on: the chat [`Envelope`], the [`RelayEvent`]s the core
//! posts to its UI, and the [`RelayError`] taxonomy.

pub mod config;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One chat message: sender name plus text.
///
/// Immutable once constructed. Carries no timestamp, sequence number,
/// or identifier; delivery order is whatever order the transport
/// produces, with no deduplication.
///
/// `user_name` is supplied by the sender and is untrusted. The only
/// check applied is that it is not blank.
///
/// Only `Serialize` is derived: every envelope entering the process goes
/// through [`Envelope::new`] or the wire codec, both of which validate.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct Envelope {
    user_name: String,
    message_text: String,
}

impl Envelope {
    /// Builds an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedEnvelope`] if `user_name` is empty
    /// or whitespace only. `message_text` may be empty.
    pub fn new(user_name: impl Into<String>, message_text: impl Into<String>) -> Result<Self> {
        let user_name = user_name.into();
        if user_name.trim().is_empty() {
            return Err(RelayError::MalformedEnvelope {
                reason: "user_name must not be empty".into(),
            });
        }
        Ok(Self {
            user_name,
            message_text: message_text.into(),
        })
    }

    /// Sender-supplied display name.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Message body.
    pub fn message_text(&self) -> &str {
        &self.message_text
    }

    /// Consumes the envelope, returning `(user_name, message_text)`.
    pub fn into_parts(self) -> (String, String) {
        (self.user_name, self.message_text)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.user_name, self.message_text)
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Which delivery mechanism an event relates to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// Point-to-point gRPC relay.
    Direct,
    /// Broker-backed named queue.
    Queue,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

// ---------------------------------------------------------------------------
// RelayEvent
// ---------------------------------------------------------------------------

/// Events posted by the core to the UI.
///
/// The core never calls into UI code. Inbound messages and
/// per-message failures are delivered as values on a bounded channel
/// that the UI drains on its own thread.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum RelayEvent {
    /// A message was received and decoded successfully.
    MessageReceived {
        /// Mechanism that delivered the message.
        transport: Transport,
        /// The decoded envelope.
        envelope: Envelope,
    },

    /// An outbound send failed. Never retried.
    SendFailed {
        /// Mechanism the send was attempted on.
        transport: Transport,
        /// Human-readable failure description.
        reason: String,
    },

    /// An inbound payload could not be decoded and was skipped.
    MalformedEnvelope {
        /// Mechanism that delivered the payload.
        transport: Transport,
        /// Decoder error description.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// RelayError
// ---------------------------------------------------------------------------

/// Unified error type for the chatrelay workspace.
///
/// Startup-time variants (`ConnectFailure`, `BrokerUnavailable`,
/// `ChannelError`, `ConfigError`) abort startup. Per-message variants
/// (`SendFailure`, `MalformedEnvelope`) are isolated to one message.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A listener could not be bound or a peer connection could not be
    /// established.
    #[error("connect failure: {reason}")]
    ConnectFailure {
        /// Human-readable description of the connection failure.
        reason: String,
    },

    /// An outbound message could not be handed to the transport.
    #[error("send failure: {reason}")]
    SendFailure {
        /// Human-readable description of the send failure.
        reason: String,
    },

    /// Bytes did not decode to a valid envelope.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// Human-readable description of the decode failure.
        reason: String,
    },

    /// The broker could not be reached.
    #[error("broker unavailable: {reason}")]
    BrokerUnavailable {
        /// Human-readable description of the broker failure.
        reason: String,
    },

    /// A logical channel could not be opened or a queue operation on it
    /// failed.
    #[error("channel error: {reason}")]
    ChannelError {
        /// Human-readable description of the channel failure.
        reason: String,
    },

    /// The relay has been closed.
    #[error("relay closed: {reason}")]
    Closed {
        /// What was attempted after close.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },
}

/// Convenience result type using [`RelayError`].
pub type Result<T> = std::result::Result<T, RelayError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
