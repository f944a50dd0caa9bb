//! chatrelay terminal shell.
//!
//! Starts a local chat node with the configured transports and either
//! opens an interactive session or sends a single message.

mod chat_log;
mod config;
mod interactive;
mod output;
mod send;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use chatrelay_node::ChatNode;
use chatrelay_queue::AckMode;

use crate::config::{ChatConfig, CliOverrides, ConfigFile};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// chatrelay: peer-to-peer chat over gRPC and a broker queue.
#[derive(Parser)]
#[command(name = "chatrelay", version, about)]
struct Cli {
    /// Output in JSON format (no colors, machine-readable).
    #[arg(long, global = true)]
    json: bool,

    /// JSON config file. Flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Display name attached to outgoing messages.
    #[arg(long, global = true)]
    user: Option<String>,

    /// Port the direct relay listens on.
    #[arg(long, global = true)]
    listen_port: Option<u16>,

    /// Direct relay peer, as host:port or http(s):// URI.
    #[arg(long, global = true)]
    peer: Option<String>,

    /// Broker URI (amqp://, amqps:// or memory://).
    #[arg(long, global = true)]
    broker: Option<String>,

    /// Queue joined on startup.
    #[arg(long, global = true)]
    queue: Option<String>,

    /// Acknowledgement mode for consumed messages: auto or manual.
    #[arg(long, global = true)]
    ack_mode: Option<AckMode>,

    /// Connection attempts before giving up on a peer or broker.
    #[arg(long, global = true)]
    connect_attempts: Option<u32>,

    /// Connect timeout in milliseconds.
    #[arg(long, global = true)]
    connect_timeout: Option<u64>,

    /// Per-request timeout in milliseconds.
    #[arg(long, global = true)]
    request_timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat mode (REPL). The default.
    Run,
    /// Send one message, print what arrives for a moment, then exit.
    Send {
        /// Message text.
        text: String,
        /// How long to keep listening after sending, in milliseconds.
        #[arg(long, default_value = "500")]
        wait_ms: u64,
    },
}

// ---------------------------------------------------------------------------
// Global options passed to every command handler
// ---------------------------------------------------------------------------

/// Shared options threaded into command handlers.
pub struct GlobalOpts {
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays a clean chat transcript.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    if let Err(e) = dispatch(cli).await {
        output::print_error(&e, json);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> std::result::Result<(), String> {
    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let overrides = CliOverrides {
        user: cli.user,
        listen_port: cli.listen_port,
        peer: cli.peer,
        broker: cli.broker,
        queue: cli.queue,
        ack_mode: cli.ack_mode,
        connect_attempts: cli.connect_attempts,
        connect_timeout_ms: cli.connect_timeout,
        request_timeout_ms: cli.request_timeout,
    };
    let config = ChatConfig::resolve(file, &overrides)?;
    let opts = GlobalOpts { json: cli.json };

    tracing::debug!(user = %config.user, transports = ?config.node.transports(), "starting node");

    let mut node = ChatNode::new(config.node)
        .await
        .map_err(|e| e.to_string())?;
    let events = node
        .take_event_receiver()
        .ok_or_else(|| "event receiver already taken".to_string())?;
    if let Err(e) = node.start() {
        node.shutdown().await;
        return Err(e.to_string());
    }

    let handle = node.handle();
    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => interactive::run(&opts, handle, events, config.user).await,
        Commands::Send { text, wait_ms } => {
            send::run(&opts, handle, events, &config.user, &text, wait_ms).await
        }
    };

    node.shutdown().await;
    result
}
