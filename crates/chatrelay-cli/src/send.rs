//! One-shot send: hand a message to every transport, then listen briefly.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use chatrelay_node::ChatHandle;
use chatrelay_types::RelayEvent;

use crate::output;
use crate::GlobalOpts;

/// Sends `text` as `user` and prints events for `wait_ms`.
///
/// # Errors
///
/// Returns an error if any transport reported a send failure while
/// waiting.
pub async fn run(
    opts: &GlobalOpts,
    handle: ChatHandle,
    mut events: mpsc::Receiver<RelayEvent>,
    user: &str,
    text: &str,
    wait_ms: u64,
) -> std::result::Result<(), String> {
    handle.send_message(user, text);

    let deadline = Instant::now() + Duration::from_millis(wait_ms);
    let mut failures = Vec::new();

    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => event,
            // Deadline reached, or the node stopped.
            Ok(None) | Err(_) => break,
        };
        output::print_event(&event, opts.json);
        if let RelayEvent::SendFailed { transport, reason } = event {
            failures.push(format!("{transport}: {reason}"));
        }
    }

    if !failures.is_empty() {
        return Err(format!("send failed on {}", failures.join("; ")));
    }

    output::print_success("sent", opts.json);
    Ok(())
}
