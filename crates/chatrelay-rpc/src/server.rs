//! Direct relay server.
//!
//! [`RelayServer::start`] binds the listen address eagerly, so a port
//! conflict fails startup instead of surfacing later inside the serve
//! task. Serving then runs as a tokio task until [`RelayServer::stop`].
//!
//! # State machine
//!
//! ```text
//! Unbound ──start()──▶ Listening ──stop()──▶ Stopped
//! ```
//!
//! `Listening` loops once per accepted call; calls are independent
//! tonic tasks. A serve error also ends in `Stopped`.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use chatrelay_protocol::proto::message_sender_server::MessageSenderServer;
use chatrelay_protocol::MAX_ENVELOPE_BYTES;
use chatrelay_types::{RelayError, RelayEvent};

use crate::message_service::MessageSenderImpl;

/// Convenience alias.
type BResult<T> = std::result::Result<T, RelayError>;

// ---------------------------------------------------------------------------
// ServerState
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`RelayServer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerState {
    /// Created, not yet bound.
    Unbound,
    /// Bound and accepting calls.
    Listening,
    /// Shut down (explicitly or after a serve error).
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbound => write!(f, "unbound"),
            Self::Listening => write!(f, "listening"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Shutdown helper
// ---------------------------------------------------------------------------

/// Resolves once the shutdown watch holds `true`, including when it
/// already did before this was called, or when the sender is gone.
pub(crate) async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// Manages the lifecycle of the direct relay gRPC server.
pub struct RelayServer {
    listen_addr: SocketAddr,
    event_tx: mpsc::Sender<RelayEvent>,
    state: ServerState,
    local_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    task_handle: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Creates an unbound server that will post inbound messages to
    /// `event_tx`.
    pub fn new(listen_addr: SocketAddr, event_tx: mpsc::Sender<RelayEvent>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            listen_addr,
            event_tx,
            state: ServerState::Unbound,
            local_addr: None,
            shutdown_tx,
            task_handle: None,
        }
    }

    /// Binds the listen address and starts serving.
    ///
    /// Returns the bound local address (useful with port `0`).
    ///
    /// # Errors
    ///
    /// - `RelayError::ConfigError` if the server is not `Unbound`.
    /// - `RelayError::ConnectFailure` if the address cannot be bound.
    pub async fn start(&mut self) -> BResult<SocketAddr> {
        if self.state != ServerState::Unbound {
            return Err(RelayError::ConfigError {
                reason: format!(
                    "cannot start relay server in state '{}'; expected 'unbound'",
                    self.state
                ),
            });
        }

        let listener = TcpListener::bind(self.listen_addr).await.map_err(|e| {
            RelayError::ConnectFailure {
                reason: format!("failed to bind {}: {e}", self.listen_addr),
            }
        })?;
        let local_addr = listener.local_addr().map_err(|e| RelayError::ConnectFailure {
            reason: format!("failed to read bound address: {e}"),
        })?;

        tracing::info!(%local_addr, "direct relay listening");

        let service = MessageSenderServer::new(MessageSenderImpl::new(
            self.event_tx.clone(),
            self.shutdown_tx.subscribe(),
        ))
        .max_decoding_message_size(MAX_ENVELOPE_BYTES);
        let router = Server::builder().add_service(service);
        let stream = TcpListenerStream::new(listener);
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let result = router
                .serve_with_incoming_shutdown(stream, wait_for_shutdown(shutdown_rx))
                .await;

            if let Err(e) = result {
                tracing::error!(%e, "direct relay server error");
            }

            tracing::info!(%local_addr, "direct relay stopped");
        });

        self.state = ServerState::Listening;
        self.local_addr = Some(local_addr);
        self.task_handle = Some(handle);

        Ok(local_addr)
    }

    /// Stops accepting calls, drains in-flight ones, and waits for the
    /// serve task to exit. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ConfigError` if the server was never started.
    pub async fn stop(&mut self) -> BResult<()> {
        match self.state {
            ServerState::Unbound => {
                return Err(RelayError::ConfigError {
                    reason: "cannot stop a relay server that has not been started".into(),
                });
            }
            ServerState::Stopped => return Ok(()),
            ServerState::Listening => {}
        }

        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(%e, "direct relay serve task panicked");
            }
        }

        self.state = ServerState::Stopped;
        Ok(())
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ServerState {
        match (&self.state, &self.task_handle) {
            (ServerState::Listening, Some(handle)) if handle.is_finished() => ServerState::Stopped,
            (state, _) => *state,
        }
    }

    /// Bound local address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        // Let the serve task wind down on its own.
        let _ = self.shutdown_tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
