//! Commands and handles for UI → node communication.
//!
//! [`NodeCommand`] is the bounded-channel message type the UI shell
//! uses to drive the node. [`ChatHandle`] wraps the command sender with
//! non-blocking helpers so a UI thread never awaits the network.
//!
//! All commands are processed sequentially inside the event loop.

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};

use chatrelay_queue::AckMode;
use chatrelay_types::{RelayError, RelayEvent, Transport};

use crate::node::NodeState;

/// Convenience alias.
type BResult<T> = std::result::Result<T, RelayError>;

// ---------------------------------------------------------------------------
// NodeCommand
// ---------------------------------------------------------------------------

/// Commands accepted by the node event loop.
pub enum NodeCommand {
    /// Send one chat message through every active mechanism.
    ///
    /// Failures come back as `RelayEvent::SendFailed`, never as a
    /// reply.
    SendMessage {
        /// Sender display name.
        user_name: String,
        /// Message body.
        message_text: String,
    },

    /// Query the current node status.
    GetStatus {
        /// Reply channel for the status snapshot.
        reply: oneshot::Sender<NodeStatus>,
    },

    /// Stop the event loop and release every transport.
    Shutdown,
}

// Manual Debug because oneshot::Sender does not implement Debug.
impl std::fmt::Debug for NodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendMessage { user_name, .. } => f
                .debug_struct("SendMessage")
                .field("user_name", user_name)
                .finish_non_exhaustive(),
            Self::GetStatus { .. } => f.write_str("GetStatus"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeStatus
// ---------------------------------------------------------------------------

/// Snapshot of the node's current state.
#[derive(Clone, Debug)]
pub struct NodeStatus {
    /// Current state machine state.
    pub state: NodeState,
    /// Bound direct relay address, if the direct relay is active.
    pub listen_addr: Option<SocketAddr>,
    /// Direct relay peer endpoint.
    pub peer_endpoint: Option<String>,
    /// Joined queue, if the queue relay is active.
    pub queue_name: Option<String>,
    /// Acknowledgement mode of the queue relay.
    pub ack_mode: Option<AckMode>,
    /// `SendMessage` commands processed so far.
    pub messages_sent: u64,
}

// ---------------------------------------------------------------------------
// ChatHandle
// ---------------------------------------------------------------------------

/// Cloneable, non-blocking UI handle to a running node.
#[derive(Clone, Debug)]
pub struct ChatHandle {
    command_tx: mpsc::Sender<NodeCommand>,
    event_tx: mpsc::Sender<RelayEvent>,
    transports: Vec<Transport>,
}

impl ChatHandle {
    pub(crate) fn new(
        command_tx: mpsc::Sender<NodeCommand>,
        event_tx: mpsc::Sender<RelayEvent>,
        transports: Vec<Transport>,
    ) -> Self {
        Self {
            command_tx,
            event_tx,
            transports,
        }
    }

    /// Queues a message for sending and returns immediately.
    ///
    /// If the command channel is full or the node has stopped, one
    /// `RelayEvent::SendFailed` per active transport is posted instead.
    pub fn send_message(&self, user_name: &str, message_text: &str) {
        let cmd = NodeCommand::SendMessage {
            user_name: user_name.to_string(),
            message_text: message_text.to_string(),
        };

        let reason = match self.command_tx.try_send(cmd) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(_)) => "node busy: command queue full",
            Err(mpsc::error::TrySendError::Closed(_)) => "node stopped",
        };

        tracing::warn!(%reason, "message not queued");
        for transport in &self.transports {
            let event = RelayEvent::SendFailed {
                transport: *transport,
                reason: reason.to_string(),
            };
            if self.event_tx.try_send(event).is_err() {
                tracing::warn!(%transport, "event channel full; send failure not reported");
            }
        }
    }

    /// Asks the event loop for a status snapshot.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Closed` if the event loop has exited.
    pub async fn status(&self) -> BResult<NodeStatus> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(NodeCommand::GetStatus { reply })
            .await
            .map_err(|_| RelayError::Closed {
                reason: "node event loop has exited".into(),
            })?;
        rx.await.map_err(|_| RelayError::Closed {
            reason: "node event loop dropped the status request".into(),
        })
    }

    /// Requests shutdown without waiting for it.
    ///
    /// Returns `false` if the request could not be queued (channel full
    /// or loop already gone).
    pub fn request_shutdown(&self) -> bool {
        self.command_tx.try_send(NodeCommand::Shutdown).is_ok()
    }

    /// Mechanisms this node sends through.
    pub fn transports(&self) -> &[Transport] {
        &self.transports
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
