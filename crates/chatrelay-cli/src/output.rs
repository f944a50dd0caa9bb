//! Output formatting for human-readable and JSON modes.
//!
//! Human mode uses colored terminal output.
//! JSON mode outputs one JSON object per line with no ANSI escapes.

use colored::Colorize;
use serde::Serialize;

use chatrelay_types::RelayEvent;

use crate::chat_log::{EntryKind, LogEntry};

/// Prints a success message.
pub fn print_success(msg: &str, json_mode: bool) {
    if json_mode {
        let obj = serde_json::json!({ "status": "ok", "message": msg });
        println!("{obj}");
    } else {
        println!("{} {}", "✓".green().bold(), msg);
    }
}

/// Prints a single key-value pair.
pub fn print_kv(key: &str, value: &str, json_mode: bool) {
    if json_mode {
        let obj = serde_json::json!({ key: value });
        println!("{obj}");
    } else {
        println!("{}: {}", key.bold(), value);
    }
}

/// Prints a serializable value as one line of JSON.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("{{\"error\":\"json serialization failed: {e}\"}}"),
    }
}

/// Prints an error message.
pub fn print_error(msg: &str, json_mode: bool) {
    if json_mode {
        let obj = serde_json::json!({ "error": msg });
        eprintln!("{obj}");
    } else {
        eprintln!("{} {}", "error:".red().bold(), msg);
    }
}

/// Prints a relay event as it arrives.
///
/// Failures go to stderr so they never interleave with a piped chat
/// transcript.
pub fn print_event(event: &RelayEvent, json_mode: bool) {
    if json_mode {
        print_json(event);
        return;
    }

    match event {
        RelayEvent::MessageReceived { transport, envelope } => {
            println!(
                "{} {} {} {}",
                format!("[{transport}]").dimmed(),
                envelope.user_name().cyan().bold(),
                "|".dimmed(),
                envelope.message_text(),
            );
        }
        RelayEvent::SendFailed { transport, reason } => {
            eprintln!(
                "{} {}",
                format!("send failed ({transport}):").yellow().bold(),
                reason
            );
        }
        RelayEvent::MalformedEnvelope { transport, reason } => {
            eprintln!(
                "{} {}",
                format!("dropped malformed message ({transport}):").yellow(),
                reason.dimmed()
            );
        }
    }
}

/// Prints one display-list entry with its receive time.
pub fn print_log_entry(entry: &LogEntry, json_mode: bool) {
    if json_mode {
        print_json(entry);
        return;
    }

    let time = entry.at.format("%H:%M:%S").to_string();
    let text = match &entry.kind {
        EntryKind::Incoming { .. } => entry.text.normal(),
        EntryKind::Outgoing => entry.text.green(),
        EntryKind::Problem { .. } => entry.text.yellow(),
    };
    println!("  {} {}", time.dimmed(), text);
}
