//! Main event loop driving the node.
//!
//! [`run_event_loop`] is spawned as a tokio task by [`ChatNode::start`].
//! It uses `tokio::select!` to multiplex:
//!
//! 1. **Commands**: `SendMessage`, `GetStatus`, `Shutdown` from the UI.
//! 2. **Shutdown signal**: graceful exit via `watch` channel.
//!
//! Inbound messages never pass through here. The server and the queue
//! consumers post straight to the event channel.
//!
//! [`ChatNode::start`]: crate::node::ChatNode::start

use chatrelay_types::{RelayEvent, Transport};

use crate::command::{NodeCommand, NodeStatus};
use crate::node::{NodeRuntime, NodeState};

// ---------------------------------------------------------------------------
// Event loop entry point
// ---------------------------------------------------------------------------

/// Runs the node event loop until shutdown, then releases the
/// transports.
pub(crate) async fn run_event_loop(mut rt: NodeRuntime) {
    tracing::info!("node event loop started");

    let mut messages_sent: u64 = 0;

    loop {
        tokio::select! {
            // ---------------------------------------------------------------
            // 1. Commands from the UI.
            // ---------------------------------------------------------------
            cmd = rt.command_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::info!("all command senders dropped -- exiting event loop");
                    break;
                };
                if handle_command(cmd, &rt, &mut messages_sent).await {
                    tracing::info!("shutdown command received -- exiting event loop");
                    break;
                }
            }

            // ---------------------------------------------------------------
            // 2. Shutdown signal via watch channel.
            // ---------------------------------------------------------------
            changed = rt.shutdown_rx.changed() => {
                if changed.is_err() || *rt.shutdown_rx.borrow() {
                    tracing::info!("shutdown signal received -- exiting event loop");
                    break;
                }
            }
        }
    }

    rt.release().await;

    tracing::info!(messages_sent, "node event loop exited");
}

// ---------------------------------------------------------------------------
// Command handler
// ---------------------------------------------------------------------------

/// Handles one command. Returns `true` if the loop should exit.
async fn handle_command(cmd: NodeCommand, rt: &NodeRuntime, messages_sent: &mut u64) -> bool {
    match cmd {
        NodeCommand::SendMessage {
            user_name,
            message_text,
        } => {
            *messages_sent += 1;
            send_everywhere(rt, &user_name, &message_text).await;
            false
        }

        NodeCommand::GetStatus { reply } => {
            let status = NodeStatus {
                state: NodeState::Running,
                listen_addr: rt.server.as_ref().and_then(|s| s.local_addr()),
                peer_endpoint: rt.direct.as_ref().map(|c| c.endpoint().to_string()),
                queue_name: rt.queue.as_ref().map(|q| q.queue_name().to_string()),
                ack_mode: rt.queue.as_ref().map(|q| q.ack_mode()),
                messages_sent: *messages_sent,
            };
            let _ = reply.send(status);
            false
        }

        NodeCommand::Shutdown => true,
    }
}

/// Fans one message out to every active mechanism.
///
/// The direct send returns immediately and reports failures itself.
/// The queue publish is awaited here, which serializes all publishes
/// through this loop; its error becomes a `SendFailed` event.
async fn send_everywhere(rt: &NodeRuntime, user_name: &str, message_text: &str) {
    if let Some(client) = &rt.direct {
        client.send(user_name, message_text);
    }

    if let Some(queue) = &rt.queue {
        if let Err(e) = queue.publish(queue.queue_name(), user_name, message_text).await {
            tracing::warn!(queue = %queue.queue_name(), %e, "queue publish failed");
            let event = RelayEvent::SendFailed {
                transport: Transport::Queue,
                reason: e.to_string(),
            };
            if rt.event_tx.send(event).await.is_err() {
                tracing::debug!("event receiver dropped; publish failure not reported");
            }
        }
    }
}
