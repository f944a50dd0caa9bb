//! Direct relay client.
//!
//! Connects once to the configured peer and issues one `Send` call per
//! outbound message. Calls are fire-and-forget from the caller's point
//! of view: [`DirectClient::send`] returns immediately and any failure
//! is reported later as [`RelayEvent::SendFailed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tonic::transport::Channel;

use chatrelay_protocol::codec;
use chatrelay_protocol::proto::message_sender_client::MessageSenderClient;
use chatrelay_types::config::TransportTimeouts;
use chatrelay_types::{Envelope, RelayError, RelayEvent, Transport};

use crate::config::DirectConfig;

/// Convenience alias.
type BResult<T> = std::result::Result<T, RelayError>;

/// Reason reported for sends attempted after [`DirectClient::close`].
pub const CLIENT_CLOSED: &str = "client closed";

// ---------------------------------------------------------------------------
// DirectClient
// ---------------------------------------------------------------------------

/// Outbound half of the direct relay.
///
/// Cheap to share behind an `Arc`; every call clones the underlying
/// tonic channel, which multiplexes over one HTTP/2 connection.
pub struct DirectClient {
    inner: MessageSenderClient<Channel>,
    endpoint: String,
    runtime: Handle,
    event_tx: mpsc::Sender<RelayEvent>,
    closed: Arc<AtomicBool>,
}

impl DirectClient {
    /// Connects to `endpoint` (e.g. `http://127.0.0.1:50052`).
    ///
    /// Must be called from within a tokio runtime; that runtime is
    /// captured and later used by [`send`](Self::send), so `send` itself
    /// can be called from a plain UI thread.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ConnectFailure` if the endpoint is invalid or
    /// the peer cannot be reached within `connect_timeout`.
    pub async fn connect(
        endpoint: &str,
        timeouts: &TransportTimeouts,
        event_tx: mpsc::Sender<RelayEvent>,
    ) -> BResult<Self> {
        let channel = Channel::from_shared(endpoint.to_string())
            .map_err(|e| RelayError::ConnectFailure {
                reason: format!("invalid endpoint '{endpoint}': {e}"),
            })?
            .connect_timeout(timeouts.connect_timeout())
            .timeout(timeouts.request_timeout())
            .connect()
            .await
            .map_err(|e| RelayError::ConnectFailure {
                reason: format!("failed to connect to '{endpoint}': {e}"),
            })?;

        tracing::info!(%endpoint, "direct relay connected to peer");

        let inner = MessageSenderClient::new(channel)
            .max_decoding_message_size(codec::MAX_ENVELOPE_BYTES)
            .max_encoding_message_size(codec::MAX_ENVELOPE_BYTES);

        Ok(Self {
            inner,
            endpoint: endpoint.to_string(),
            runtime: Handle::current(),
            event_tx,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Connects to `config.peer_endpoint`, retrying up to
    /// `config.connect_attempts` times with `config.retry_delay` between
    /// attempts.
    ///
    /// # Errors
    ///
    /// Returns the last `RelayError::ConnectFailure` once all attempts
    /// fail.
    pub async fn connect_with_retry(
        config: &DirectConfig,
        event_tx: mpsc::Sender<RelayEvent>,
    ) -> BResult<Self> {
        let mut attempt = 1;
        loop {
            match Self::connect(&config.peer_endpoint, &config.timeouts, event_tx.clone()).await {
                Ok(client) => return Ok(client),
                Err(e) if attempt < config.connect_attempts => {
                    tracing::warn!(
                        endpoint = %config.peer_endpoint,
                        attempt,
                        max_attempts = config.connect_attempts,
                        %e,
                        "peer connect attempt failed"
                    );
                    attempt += 1;
                    tokio::time::sleep(config.retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends one message without waiting for the outcome.
    ///
    /// The call runs on the captured runtime. On any failure (invalid
    /// envelope, closed client, transport error, deadline) a
    /// `RelayEvent::SendFailed` is posted to the event channel. Never
    /// retries.
    pub fn send(&self, user_name: &str, message_text: &str) {
        let envelope = Envelope::new(user_name, message_text);
        let client = self.inner.clone();
        let closed = Arc::clone(&self.closed);
        let event_tx = self.event_tx.clone();
        let endpoint = self.endpoint.clone();

        self.runtime.spawn(async move {
            let result = match envelope {
                Ok(envelope) => call(client, &closed, &envelope).await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                tracing::warn!(%endpoint, %e, "direct send failed");
                let event = RelayEvent::SendFailed {
                    transport: Transport::Direct,
                    reason: e.to_string(),
                };
                if event_tx.send(event).await.is_err() {
                    tracing::debug!("event receiver dropped; send failure not reported");
                }
            }
        });
    }

    /// Sends one envelope and waits for the call to complete.
    ///
    /// The returned `Ok(())` only means the peer's server accepted the
    /// call. It is not a delivery receipt.
    ///
    /// # Errors
    ///
    /// - `RelayError::Closed` after [`close`](Self::close).
    /// - `RelayError::SendFailure` on transport error or deadline, or if
    ///   the encoded envelope exceeds `MAX_ENVELOPE_BYTES`.
    pub async fn deliver(&self, envelope: &Envelope) -> BResult<()> {
        call(self.inner.clone(), &self.closed, envelope).await
    }

    /// Marks the client closed. Later sends issue no call. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!(endpoint = %self.endpoint, "direct client closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Peer endpoint this client sends to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Issues one `Send` call. The returned `Ack` is discarded.
async fn call(
    mut client: MessageSenderClient<Channel>,
    closed: &AtomicBool,
    envelope: &Envelope,
) -> BResult<()> {
    if closed.load(Ordering::SeqCst) {
        return Err(RelayError::Closed {
            reason: CLIENT_CLOSED.into(),
        });
    }

    codec::check_size(envelope)?;

    client
        .send(codec::to_wire(envelope))
        .await
        .map(|_ack| ())
        .map_err(map_status)
}

/// Maps a tonic status to a `SendFailure` with a readable reason.
fn map_status(status: tonic::Status) -> RelayError {
    let msg = status.message();
    let reason = match status.code() {
        tonic::Code::Unavailable => format!("peer unavailable ({msg})"),
        tonic::Code::DeadlineExceeded => format!("request timed out ({msg})"),
        tonic::Code::Cancelled => format!("request cancelled ({msg})"),
        tonic::Code::ResourceExhausted => format!("message too large ({msg})"),
        tonic::Code::Unimplemented => format!("peer does not implement MessageSender ({msg})"),
        code => format!("rpc error {code:?}: {msg}"),
    };
    RelayError::SendFailure { reason }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
