//! Broker abstraction.
//!
//! [`Broker`] opens a [`BrokerSession`]: one connection plus one logical
//! channel. The queue relay only talks to these traits, so the AMQP
//! client and the in-process broker are interchangeable.

use async_trait::async_trait;
use futures::stream::BoxStream;

use chatrelay_types::config::TransportTimeouts;
use chatrelay_types::RelayError;

use crate::config::AckMode;

/// Convenience alias.
pub type BResult<T> = std::result::Result<T, RelayError>;

/// Stream of deliveries for one subscription. Ends when the channel
/// closes.
pub type DeliveryStream = BoxStream<'static, BResult<Delivery>>;

// ---------------------------------------------------------------------------
// Broker traits
// ---------------------------------------------------------------------------

/// Something that can open broker sessions.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Opens a connection and one logical channel on it.
    ///
    /// Network implementations give up on the connection after
    /// `timeouts.connect_timeout()`.
    ///
    /// # Errors
    ///
    /// - `RelayError::BrokerUnavailable` if the broker cannot be reached
    ///   in time.
    /// - `RelayError::ChannelError` if the connection succeeded but the
    ///   channel could not be opened. The connection is released before
    ///   returning.
    async fn connect(&self, timeouts: &TransportTimeouts) -> BResult<Box<dyn BrokerSession>>;

    /// Human-readable broker location for logs.
    fn describe(&self) -> String;
}

/// An open connection + channel pair.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Declares `queue` (non-durable, non-exclusive, no auto-delete).
    /// Declaring an existing queue with the same properties is a no-op.
    async fn declare_queue(&self, queue: &str) -> BResult<()>;

    /// Starts a subscription on `queue`.
    async fn consume(&self, queue: &str, ack_mode: AckMode) -> BResult<DeliveryStream>;

    /// Publishes `payload` to `queue` through the default exchange.
    /// Does not wait for a broker confirm.
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> BResult<()>;

    /// Releases the channel, then the connection. Idempotent.
    async fn close(&self) -> BResult<()>;
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send {
    /// Marks the delivery consumed.
    async fn ack(self: Box<Self>) -> BResult<()>;

    /// Rejects the delivery without requeue.
    async fn reject(self: Box<Self>) -> BResult<()>;
}

/// One message handed over by the broker.
pub struct Delivery {
    payload: Vec<u8>,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    /// A delivery that the broker has already settled (auto-ack).
    pub fn settled(payload: Vec<u8>) -> Self {
        Self {
            payload,
            acker: None,
        }
    }

    /// A delivery that must be acked or rejected.
    pub fn pending(payload: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            payload,
            acker: Some(acker),
        }
    }

    /// Raw message body.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acks the delivery. No-op for settled deliveries.
    pub async fn ack(self) -> BResult<()> {
        match self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Rejects the delivery without requeue. No-op for settled
    /// deliveries.
    pub async fn reject(self) -> BResult<()> {
        match self.acker {
            Some(acker) => acker.reject().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("pending", &self.acker.is_some())
            .finish()
    }
}
