//! AMQP 0-9-1 broker (RabbitMQ) via `lapin`.
//!
//! Queues are declared non-durable, non-exclusive, without auto-delete.
//! Messages go through the default exchange with the queue name as the
//! routing key and no properties. Several consumers on the same queue
//! compete for messages (work-queue semantics), so a publish reaches at
//! most one subscriber.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use chatrelay_types::config::TransportTimeouts;
use chatrelay_types::RelayError;

use crate::broker::{Acknowledger, BResult, Broker, BrokerSession, Delivery, DeliveryStream};
use crate::config::AckMode;

/// Default exchange: routes by queue name.
const DEFAULT_EXCHANGE: &str = "";

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

// ---------------------------------------------------------------------------
// AmqpBroker
// ---------------------------------------------------------------------------

/// Broker reached over AMQP at a fixed URI.
pub struct AmqpBroker {
    uri: String,
}

impl AmqpBroker {
    /// Creates a broker handle for `uri` (e.g. `amqp://127.0.0.1:5672/%2f`).
    /// Nothing is opened until [`Broker::connect`].
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self, timeouts: &TransportTimeouts) -> BResult<Box<dyn BrokerSession>> {
        let connect_timeout = timeouts.connect_timeout();
        let connection = match tokio::time::timeout(
            connect_timeout,
            Connection::connect(&self.uri, ConnectionProperties::default()),
        )
        .await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                return Err(RelayError::BrokerUnavailable {
                    reason: format!("cannot connect to {}: {e}", redact(&self.uri)),
                });
            }
            Err(_) => {
                return Err(RelayError::BrokerUnavailable {
                    reason: format!(
                        "connect to {} timed out after {connect_timeout:?}",
                        redact(&self.uri)
                    ),
                });
            }
        };

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                // Release the connection before reporting.
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "channel open failed").await {
                    tracing::debug!(%close_err, "connection close after channel failure");
                }
                return Err(RelayError::ChannelError {
                    reason: format!("cannot open channel: {e}"),
                });
            }
        };

        tracing::debug!(broker = %redact(&self.uri), channel_id = channel.id(), "amqp session opened");

        Ok(Box::new(AmqpSession {
            connection,
            channel,
            closed: AtomicBool::new(false),
        }))
    }

    fn describe(&self) -> String {
        redact(&self.uri)
    }
}

// ---------------------------------------------------------------------------
// AmqpSession
// ---------------------------------------------------------------------------

/// One connection and one channel.
///
/// lapin serializes frames per channel, so concurrent `publish` calls
/// share the channel safely.
struct AmqpSession {
    connection: Connection,
    channel: Channel,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    async fn declare_queue(&self, queue: &str) -> BResult<()> {
        self.channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map(|_| ())
            .map_err(|e| RelayError::ChannelError {
                reason: format!("queue_declare '{queue}' failed: {e}"),
            })
    }

    async fn consume(&self, queue: &str, ack_mode: AckMode) -> BResult<DeliveryStream> {
        let options = BasicConsumeOptions {
            no_ack: ack_mode == AckMode::Auto,
            ..BasicConsumeOptions::default()
        };
        let tag = format!("chatrelay-{queue}");

        let consumer = self
            .channel
            .basic_consume(queue, &tag, options, FieldTable::default())
            .await
            .map_err(|e| RelayError::ChannelError {
                reason: format!("basic_consume '{queue}' failed: {e}"),
            })?;

        let stream = consumer.map(move |item| {
            item.map(|delivery| match ack_mode {
                AckMode::Auto => Delivery::settled(delivery.data),
                AckMode::Manual => Delivery::pending(
                    delivery.data,
                    Box::new(AmqpAcker {
                        acker: delivery.acker,
                    }),
                ),
            })
            .map_err(|e| RelayError::ChannelError {
                reason: format!("consumer error: {e}"),
            })
        });

        Ok(stream.boxed())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> BResult<()> {
        // The returned confirm is dropped; no confirm wait.
        self.channel
            .basic_publish(
                DEFAULT_EXCHANGE,
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map(|_confirm| ())
            .map_err(|e| RelayError::SendFailure {
                reason: format!("publish to '{queue}' failed: {e}"),
            })
    }

    async fn close(&self) -> BResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Channel first, then connection. Both are attempted even if
        // the first fails.
        let channel_result = if self.channel.status().connected() {
            self.channel.close(REPLY_SUCCESS, "bye").await
        } else {
            Ok(())
        };
        let connection_result = if self.connection.status().connected() {
            self.connection.close(REPLY_SUCCESS, "bye").await
        } else {
            Ok(())
        };

        channel_result.map_err(|e| RelayError::ChannelError {
            reason: format!("channel close failed: {e}"),
        })?;
        connection_result.map_err(|e| RelayError::BrokerUnavailable {
            reason: format!("connection close failed: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// AmqpAcker
// ---------------------------------------------------------------------------

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(self: Box<Self>) -> BResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| RelayError::ChannelError {
                reason: format!("ack failed: {e}"),
            })
    }

    async fn reject(self: Box<Self>) -> BResult<()> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| RelayError::ChannelError {
                reason: format!("reject failed: {e}"),
            })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Strips `user:password@` from a URI before logging it.
pub fn redact(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    match rest.rsplit_once('@') {
        Some((_credentials, host)) => format!("{scheme}://***@{host}"),
        None => uri.to_string(),
    }
}
