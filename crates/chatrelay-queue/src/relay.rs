//! Queue relay: publish/subscribe over a named broker queue.
//!
//! # Lifecycle
//!
//! ```text
//! connect() ──▶ open ──join()/publish()──▶ open ──close()──▶ closed
//! ```
//!
//! - `connect` retries up to `connect_attempts` times, each attempt
//!   bounded by `connect_timeout`.
//! - `join` starts at most one consumer task per queue name.
//! - `close` stops consumers, then releases the channel and the
//!   connection. After it, `join` and `publish` fail with
//!   `RelayError::Closed`.
//!
//! Dropping an open relay stops its consumers and releases the session
//! in the background.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use chatrelay_protocol::codec;
use chatrelay_types::{Envelope, RelayError, RelayEvent, Transport};

use crate::broker::{BResult, Broker, BrokerSession, Delivery, DeliveryStream};
use crate::config::{validate_queue_name, AckMode, QueueConfig};

// ---------------------------------------------------------------------------
// QueueRelay
// ---------------------------------------------------------------------------

/// Broker-backed relay. Share it behind an `Arc`; every method takes
/// `&self`.
pub struct QueueRelay {
    session: Arc<dyn BrokerSession>,
    broker_name: String,
    config: QueueConfig,
    event_tx: mpsc::Sender<RelayEvent>,
    consumers: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl QueueRelay {
    /// Connects to `broker`.
    ///
    /// Does not join any queue; call [`join`](Self::join) with
    /// `config.queue_name` (or another queue) afterwards.
    ///
    /// # Errors
    ///
    /// - `RelayError::ConfigError` if `config` is invalid.
    /// - `RelayError::BrokerUnavailable` once all attempts are used up.
    /// - `RelayError::ChannelError` if a connection was made but no
    ///   channel could be opened on it. Not retried.
    pub async fn connect(
        broker: Arc<dyn Broker>,
        config: QueueConfig,
        event_tx: mpsc::Sender<RelayEvent>,
    ) -> BResult<Self> {
        config.validate()?;

        let broker_name = broker.describe();
        let session = connect_with_retry(broker.as_ref(), &config, &broker_name).await?;

        tracing::info!(broker = %broker_name, ack_mode = %config.ack_mode, "queue relay connected");

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            session: Arc::from(session),
            broker_name,
            config,
            event_tx,
            consumers: Mutex::new(HashMap::new()),
            shutdown_tx,
            closed: AtomicBool::new(false),
        })
    }

    /// Declares `queue` and subscribes to it.
    ///
    /// Joining an already joined queue re-declares it and returns `Ok`
    /// without adding a second subscription.
    ///
    /// # Errors
    ///
    /// - `RelayError::Closed` after [`close`](Self::close).
    /// - `RelayError::ConfigError` for an invalid queue name.
    /// - `RelayError::ChannelError` if the declare or subscribe fails.
    pub async fn join(&self, queue: &str) -> BResult<()> {
        self.ensure_open("join")?;
        validate_queue_name(queue)?;

        self.session.declare_queue(queue).await?;

        let mut consumers = self.consumers.lock().await;
        if let Some(handle) = consumers.get(queue) {
            if !handle.is_finished() {
                tracing::debug!(%queue, "queue already joined");
                return Ok(());
            }
        }
        // Re-check under the lock; close() may have run meanwhile.
        self.ensure_open("join")?;

        let stream = self.session.consume(queue, self.config.ack_mode).await?;
        // close() may have run while the subscribe was in flight.
        if self.is_closed() {
            return Err(RelayError::Closed {
                reason: format!("queue relay closed while joining '{queue}'"),
            });
        }
        let handle = tokio::spawn(consume_loop(
            stream,
            queue.to_string(),
            self.config.ack_mode,
            self.event_tx.clone(),
            self.shutdown_tx.subscribe(),
        ));
        consumers.insert(queue.to_string(), handle);

        tracing::info!(%queue, broker = %self.broker_name, "joined queue");
        Ok(())
    }

    /// Encodes and publishes one message to `queue`.
    ///
    /// Returns once the broker client has accepted the frame. Does not
    /// wait for a broker confirm.
    ///
    /// # Errors
    ///
    /// - `RelayError::Closed` after [`close`](Self::close).
    /// - `RelayError::MalformedEnvelope` if `user_name` is blank.
    /// - `RelayError::SendFailure` if the encoded message exceeds
    ///   `MAX_ENVELOPE_BYTES`, or the publish fails or exceeds
    ///   `request_timeout`.
    pub async fn publish(&self, queue: &str, user_name: &str, message_text: &str) -> BResult<()> {
        self.ensure_open("publish")?;

        let envelope = Envelope::new(user_name, message_text)?;
        let payload = codec::encode_for_send(&envelope)?;

        let deadline = self.config.timeouts.request_timeout();
        match tokio::time::timeout(deadline, self.session.publish(queue, payload)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::SendFailure {
                reason: format!("publish to '{queue}' timed out after {deadline:?}"),
            }),
        }
    }

    /// Stops all consumers and releases the broker session. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the session's close error, if any. The relay counts as
    /// closed either way.
    pub async fn close(&self) -> BResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.shutdown_tx.send(true);

        let handles: Vec<(String, JoinHandle<()>)> =
            self.consumers.lock().await.drain().collect();
        for (queue, handle) in handles {
            if let Err(e) = handle.await {
                tracing::error!(%queue, %e, "consumer task panicked");
            }
        }

        let result = self.session.close().await;
        tracing::info!(broker = %self.broker_name, "queue relay closed");
        result
    }

    /// Queue configured for this relay.
    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    /// Acknowledgement mode in use.
    pub fn ack_mode(&self) -> AckMode {
        self.config.ack_mode
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Names of queues with a live consumer task.
    pub async fn joined_queues(&self) -> Vec<String> {
        let consumers = self.consumers.lock().await;
        let mut names: Vec<String> = consumers
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn ensure_open(&self, op: &str) -> BResult<()> {
        if self.is_closed() {
            return Err(RelayError::Closed {
                reason: format!("{op} after queue relay close"),
            });
        }
        Ok(())
    }
}

impl Drop for QueueRelay {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(true);

        let session = Arc::clone(&self.session);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        tracing::warn!(%e, "background session close failed");
                    }
                });
            }
            Err(_) => tracing::warn!("queue relay dropped outside a runtime; session not closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

async fn connect_with_retry(
    broker: &dyn Broker,
    config: &QueueConfig,
    broker_name: &str,
) -> BResult<Box<dyn BrokerSession>> {
    let timeouts = config.timeouts;
    let mut last_error = String::new();

    for attempt in 1..=config.connect_attempts {
        let outcome = tokio::time::timeout(timeouts.connect_timeout(), broker.connect(&timeouts)).await;

        match outcome {
            Ok(Ok(session)) => return Ok(session),
            Ok(Err(e @ RelayError::ChannelError { .. })) => return Err(e),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => {
                last_error = format!("connect timed out after {:?}", timeouts.connect_timeout());
            }
        }

        tracing::warn!(
            broker = %broker_name,
            attempt,
            max_attempts = config.connect_attempts,
            error = %last_error,
            "broker connect attempt failed"
        );

        if attempt < config.connect_attempts {
            tokio::time::sleep(config.retry_delay()).await;
        }
    }

    Err(RelayError::BrokerUnavailable {
        reason: format!(
            "{broker_name} unreachable after {} attempt(s): {last_error}",
            config.connect_attempts
        ),
    })
}

// ---------------------------------------------------------------------------
// Consumer task
// ---------------------------------------------------------------------------

async fn consume_loop(
    mut stream: DeliveryStream,
    queue: String,
    ack_mode: AckMode,
    event_tx: mpsc::Sender<RelayEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!(%queue, %ack_mode, "consumer started");

    // A receiver subscribed after shutdown was signalled never sees a
    // change.
    if *shutdown_rx.borrow_and_update() {
        tracing::debug!(%queue, "consumer stopped before first delivery");
        return;
    }

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            next = stream.next() => {
                match next {
                    Some(Ok(delivery)) => {
                        let event = settle(delivery, &queue).await;
                        // A full event channel must not block close().
                        tokio::select! {
                            sent = event_tx.send(event) => {
                                if sent.is_err() {
                                    tracing::debug!(%queue, "event receiver dropped; stopping consumer");
                                    break;
                                }
                            }
                            _ = shutdown_rx.changed() => break,
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(%queue, %e, "consumer stream error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::debug!(%queue, "consumer stopped");
}

/// Decodes and settles one delivery, returning the event to report.
///
/// The delivery is acked only after a successful decode. A payload that
/// fails to decode is rejected without requeue. With `AckMode::Auto`
/// both are no-ops.
async fn settle(delivery: Delivery, queue: &str) -> RelayEvent {
    match codec::decode(delivery.payload()) {
        Ok(envelope) => {
            if let Err(e) = delivery.ack().await {
                tracing::warn!(%queue, %e, "ack failed");
            }
            RelayEvent::MessageReceived {
                transport: Transport::Queue,
                envelope,
            }
        }
        Err(e) => {
            tracing::warn!(%queue, %e, "skipping malformed queue message");
            if let Err(reject_err) = delivery.reject().await {
                tracing::warn!(%queue, %reject_err, "reject failed");
            }
            RelayEvent::MalformedEnvelope {
                transport: Transport::Queue,
                reason: e.to_string(),
            }
        }
    }
}
