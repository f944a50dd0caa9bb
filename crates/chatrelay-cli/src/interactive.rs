//! Interactive REPL chat mode.
//!
//! Every non-command line is sent as a message from the current user.
//! Incoming messages are printed as they arrive and recorded in the
//! session's [`ChatLog`].
//!
//! # Graceful shutdown
//!
//! Handles `SIGINT` (Ctrl+C) via `tokio::signal::ctrl_c`. The loop
//! exits cleanly without panic; the caller shuts the node down.

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use chatrelay_node::ChatHandle;
use chatrelay_types::RelayEvent;

use crate::chat_log::{ChatLog, EntryKind};
use crate::output;
use crate::GlobalOpts;

pub async fn run(
    opts: &GlobalOpts,
    handle: ChatHandle,
    mut events: mpsc::Receiver<RelayEvent>,
    user: String,
) -> std::result::Result<(), String> {
    let mut user = user;
    let mut log = ChatLog::default();

    if !opts.json {
        let transports: Vec<String> = handle.transports().iter().map(|t| t.to_string()).collect();
        println!("\n{}", "chatrelay interactive mode".bright_cyan().bold());
        println!("  User:       {}", user.green());
        println!("  Transports: {}", transports.join(", "));
        println!(
            "Commands: {} {} {} {} {}",
            "/user <name>".bold(),
            "/history".bold(),
            "/clear".bold(),
            "/status".bold(),
            "/quit".bold(),
        );
        println!();
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            result = lines.next_line() => {
                let line = match result {
                    Ok(Some(line)) => line,
                    // EOF (stdin closed).
                    Ok(None) => break,
                    Err(e) => {
                        output::print_error(&format!("failed to read input: {e}"), opts.json);
                        break;
                    }
                };

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                if trimmed.starts_with('/') {
                    match handle_slash_command(trimmed, &handle, opts, &mut user, &mut log).await {
                        SlashResult::Continue => continue,
                        SlashResult::Quit => break,
                    }
                }

                handle.send_message(&user, trimmed);
                log.push(EntryKind::Outgoing, format!("{user} | {trimmed}"));
            }

            Some(event) = events.recv() => {
                output::print_event(&event, opts.json);
                record(&mut log, &event);
            }

            _ = tokio::signal::ctrl_c() => {
                if !opts.json {
                    println!("\n{}", "Exiting interactive mode.".dimmed());
                }
                break;
            }
        }
    }

    if !opts.json {
        println!("{}", "Goodbye.".dimmed());
    }

    Ok(())
}

/// Adds an event to the display list.
pub fn record(log: &mut ChatLog, event: &RelayEvent) {
    match event {
        RelayEvent::MessageReceived { transport, envelope } => {
            log.push(
                EntryKind::Incoming {
                    transport: *transport,
                },
                envelope.to_string(),
            );
        }
        RelayEvent::SendFailed { transport, reason } => {
            log.push(
                EntryKind::Problem {
                    transport: *transport,
                },
                format!("send failed: {reason}"),
            );
        }
        RelayEvent::MalformedEnvelope { transport, reason } => {
            log.push(
                EntryKind::Problem {
                    transport: *transport,
                },
                format!("malformed message dropped: {reason}"),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Slash commands
// ---------------------------------------------------------------------------

enum SlashResult {
    Continue,
    Quit,
}

async fn handle_slash_command(
    input: &str,
    handle: &ChatHandle,
    opts: &GlobalOpts,
    user: &mut String,
    log: &mut ChatLog,
) -> SlashResult {
    let (cmd, arg) = match input.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (input, ""),
    };

    match cmd {
        "/quit" | "/exit" | "/q" => return SlashResult::Quit,

        "/user" => {
            if arg.is_empty() {
                output::print_error("usage: /user <name>", opts.json);
                return SlashResult::Continue;
            }
            *user = arg.to_string();
            if !opts.json {
                println!("  {} {}", "user set:".green(), user);
            }
        }

        "/history" => {
            if log.is_empty() && !opts.json {
                println!("  {}", "(no messages yet)".dimmed());
            }
            for entry in log.iter() {
                output::print_log_entry(entry, opts.json);
            }
        }

        "/clear" => {
            log.clear();
            if !opts.json {
                println!("  {}", "history cleared".dimmed());
            }
        }

        "/status" => match handle.status().await {
            Ok(status) => {
                output::print_kv("State", &status.state.to_string(), opts.json);
                if let Some(addr) = status.listen_addr {
                    output::print_kv("Listening", &addr.to_string(), opts.json);
                }
                if let Some(peer) = &status.peer_endpoint {
                    output::print_kv("Peer", peer, opts.json);
                }
                if let Some(queue) = &status.queue_name {
                    output::print_kv("Queue", queue, opts.json);
                }
                if let Some(mode) = status.ack_mode {
                    output::print_kv("Ack mode", &mode.to_string(), opts.json);
                }
                output::print_kv("Sent", &status.messages_sent.to_string(), opts.json);
            }
            Err(e) => output::print_error(&e.to_string(), opts.json),
        },

        "/help" => {
            if !opts.json {
                println!("  /user <name>  set the name attached to your messages");
                println!("  /history      show this session's messages");
                println!("  /clear        forget this session's messages");
                println!("  /status       show node status");
                println!("  /quit         exit interactive mode");
            }
        }

        _ => {
            output::print_error(&format!("unknown command '{cmd}' (try /help)"), opts.json);
        }
    }

    SlashResult::Continue
}
