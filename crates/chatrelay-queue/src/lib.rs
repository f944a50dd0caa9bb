//! Queue relay: many-to-many chat delivery through a broker queue.
//!
//! Every participant declares the same named queue, publishes encoded
//! envelopes to it through the default exchange, and subscribes to it.
//! Subscribers on one queue compete for messages, so each published
//! message reaches at most one of them.
//!
//! Unlike the direct relay, publish failures are returned to the caller.
//!
//! # Modules
//!
//! - [`broker`]: `Broker` / `BrokerSession` seam and `Delivery`.
//! - [`amqp`]: RabbitMQ implementation over `lapin`.
//! - [`memory`]: in-process implementation.
//! - [`config`]: `QueueConfig`, `AckMode`.
//! - [`relay`]: `QueueRelay` (connect, join, publish, close).

pub mod amqp;
pub mod broker;
pub mod config;
pub mod memory;
pub mod relay;

use std::sync::Arc;

use chatrelay_types::{RelayError, Result};

pub use amqp::AmqpBroker;
pub use broker::{Broker, BrokerSession, Delivery};
pub use config::{AckMode, QueueConfig};
pub use memory::MemoryBroker;
pub use relay::QueueRelay;

/// Picks a broker implementation from the URI scheme.
///
/// `memory://` gives a fresh in-process broker; `amqp://` and
/// `amqps://` give an [`AmqpBroker`].
///
/// # Errors
///
/// Returns `RelayError::ConfigError` for any other scheme.
pub fn broker_for_uri(uri: &str) -> Result<Arc<dyn Broker>> {
    if uri.starts_with("memory://") {
        Ok(Arc::new(MemoryBroker::new()))
    } else if uri.starts_with("amqp://") || uri.starts_with("amqps://") {
        Ok(Arc::new(AmqpBroker::new(uri)))
    } else {
        Err(RelayError::ConfigError {
            reason: format!("unsupported broker uri '{uri}'"),
        })
    }
}
