//! `MessageSender` gRPC implementation.
//!
//! Each inbound `Send` call is handled on its own tonic task: validate
//! the envelope, post it to the event channel, acknowledge. The `Ack`
//! is returned unconditionally, including for envelopes that fail
//! validation, so a sender cannot learn anything from it.
//!
//! Posting to the event channel waits while the channel is full, but
//! gives up once the server is stopping, so a UI that stopped draining
//! cannot hold `RelayServer::stop` open.

use tokio::sync::{mpsc, watch};
use tonic::{Request, Response, Status};

use chatrelay_protocol::{codec, proto};
use chatrelay_types::{RelayEvent, Transport};

use crate::server::wait_for_shutdown;

// ---------------------------------------------------------------------------
// Service state
// ---------------------------------------------------------------------------

/// gRPC implementation of `MessageSender`.
///
/// Holds only a cloneable event sender and the server's shutdown
/// watch; there is no shared mutable state between concurrent calls.
pub struct MessageSenderImpl {
    event_tx: mpsc::Sender<RelayEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MessageSenderImpl {
    /// Creates a new `MessageSenderImpl` posting to `event_tx` until
    /// `shutdown_rx` turns `true`.
    pub fn new(event_tx: mpsc::Sender<RelayEvent>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            event_tx,
            shutdown_rx,
        }
    }
}

// ---------------------------------------------------------------------------
// tonic trait implementation
// ---------------------------------------------------------------------------

#[tonic::async_trait]
impl proto::message_sender_server::MessageSender for MessageSenderImpl {
    /// Accepts one chat message from a peer.
    async fn send(
        &self,
        request: Request<proto::Envelope>,
    ) -> std::result::Result<Response<proto::Ack>, Status> {
        let remote = request.remote_addr();

        let event = match codec::from_wire(request.into_inner()) {
            Ok(envelope) => {
                tracing::debug!(
                    ?remote,
                    user = %envelope.user_name(),
                    "direct message received"
                );
                RelayEvent::MessageReceived {
                    transport: Transport::Direct,
                    envelope,
                }
            }
            Err(e) => {
                tracing::warn!(?remote, %e, "dropping malformed direct envelope");
                RelayEvent::MalformedEnvelope {
                    transport: Transport::Direct,
                    reason: e.to_string(),
                }
            }
        };

        // Backpressure: waits if the UI has fallen behind, but never
        // past shutdown.
        tokio::select! {
            biased;
            sent = self.event_tx.send(event) => {
                if sent.is_err() {
                    tracing::warn!("event receiver dropped; inbound message discarded");
                }
            }
            _ = wait_for_shutdown(self.shutdown_rx.clone()) => {
                tracing::warn!(?remote, "relay stopping; inbound message discarded");
            }
        }

        Ok(Response::new(proto::Ack {}))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
