//! Node lifecycle and state machine.
//!
//! The [`ChatNode`] is the public entry point of the core. It owns the
//! configured delivery mechanisms and exposes a channel-based API to
//! the UI shell.
//!
//! # State machine
//!
//! ```text
//! Initializing ──start()──▶ Running ──shutdown()──▶ ShuttingDown ──▶ (dropped)
//! ```
//!
//! - `Initializing`: transports connected, event loop not started.
//! - `Running`: event loop active, processing commands.
//! - `ShuttingDown`: transports closed or closing.
//!
//! Double-start is rejected with `RelayError::ConfigError`.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use chatrelay_queue::{broker_for_uri, Broker, QueueConfig, QueueRelay};
use chatrelay_rpc::{DirectClient, DirectConfig, RelayServer};
use chatrelay_types::{RelayError, RelayEvent, Transport};

use crate::command::{ChatHandle, NodeCommand};
use crate::event_loop;

/// Convenience alias.
type BResult<T> = std::result::Result<T, RelayError>;

// ---------------------------------------------------------------------------
// Channel buffer sizes
// ---------------------------------------------------------------------------

/// Bounded command channel capacity.
pub const COMMAND_CHANNEL_SIZE: usize = 256;

/// Bounded event channel capacity. Larger than the command channel to
/// absorb bursts of inbound messages while the UI is busy.
pub const EVENT_CHANNEL_SIZE: usize = 1024;

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Which mechanisms to run. At least one must be set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Direct (gRPC) relay settings.
    pub direct: Option<DirectConfig>,
    /// Queue (broker) relay settings.
    pub queue: Option<QueueConfig>,
}

impl NodeConfig {
    /// Validates every configured mechanism.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ConfigError` if neither mechanism is
    /// configured or a configured one is invalid.
    pub fn validate(&self) -> BResult<()> {
        if self.direct.is_none() && self.queue.is_none() {
            return Err(RelayError::ConfigError {
                reason: "at least one of direct or queue relay must be configured".into(),
            });
        }
        if let Some(direct) = &self.direct {
            direct.validate()?;
        }
        if let Some(queue) = &self.queue {
            queue.validate()?;
        }
        Ok(())
    }

    /// Mechanisms this configuration enables, direct first.
    pub fn transports(&self) -> Vec<Transport> {
        let mut transports = Vec::with_capacity(2);
        if self.direct.is_some() {
            transports.push(Transport::Direct);
        }
        if self.queue.is_some() {
            transports.push(Transport::Queue);
        }
        transports
    }
}

// ---------------------------------------------------------------------------
// NodeState
// ---------------------------------------------------------------------------

/// Lifecycle state of the node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    /// Transports up, event loop not started.
    Initializing,
    /// Event loop is active.
    Running,
    /// Graceful shutdown in progress or done.
    ShuttingDown,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeRuntime (internal)
// ---------------------------------------------------------------------------

/// Owned transports moved into the event loop task.
pub(crate) struct NodeRuntime {
    pub server: Option<RelayServer>,
    pub direct: Option<DirectClient>,
    pub queue: Option<Arc<QueueRelay>>,
    pub event_tx: mpsc::Sender<RelayEvent>,
    pub command_rx: mpsc::Receiver<NodeCommand>,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl NodeRuntime {
    /// Closes the direct client, stops the server, and closes the queue
    /// relay. Errors are logged, never propagated.
    pub(crate) async fn release(&mut self) {
        if let Some(client) = &self.direct {
            client.close();
        }

        if let Some(server) = self.server.as_mut() {
            if let Err(e) = server.stop().await {
                tracing::warn!(%e, "direct relay server stop failed");
            }
        }

        if let Some(queue) = &self.queue {
            if let Err(e) = queue.close().await {
                tracing::warn!(%e, "queue relay close failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChatNode
// ---------------------------------------------------------------------------

/// Chat relay node: owns the transports and drives the event loop.
///
/// After construction via [`ChatNode::new`], call [`ChatNode::start`]
/// to spawn the event loop. Interact through:
///
/// - [`ChatNode::handle`] / [`ChatNode::command_sender`] to send.
/// - [`ChatNode::take_event_receiver`] to receive `RelayEvent`s.
/// - [`ChatNode::shutdown`] or `NodeCommand::Shutdown` to stop.
pub struct ChatNode {
    state: NodeState,
    runtime: Option<NodeRuntime>,
    command_tx: mpsc::Sender<NodeCommand>,
    event_tx: mpsc::Sender<RelayEvent>,
    event_rx: Option<mpsc::Receiver<RelayEvent>>,
    shutdown_tx: watch::Sender<bool>,
    task_handle: Option<JoinHandle<()>>,
    transports: Vec<Transport>,
    listen_addr: Option<SocketAddr>,
}

impl ChatNode {
    /// Starts every configured transport.
    ///
    /// The broker for the queue relay is chosen from its URI scheme.
    ///
    /// # Errors
    ///
    /// - `RelayError::ConfigError` for an invalid configuration.
    /// - `RelayError::ConnectFailure` if the listen address cannot be
    ///   bound or the peer cannot be reached.
    /// - `RelayError::BrokerUnavailable` / `RelayError::ChannelError`
    ///   from the queue relay.
    ///
    /// Anything started before the failing step is released first.
    pub async fn new(config: NodeConfig) -> BResult<Self> {
        let broker = match &config.queue {
            Some(queue) => Some(broker_for_uri(&queue.broker_uri)?),
            None => None,
        };
        Self::build(config, broker).await
    }

    /// Like [`new`](Self::new) but with an explicit broker, e.g. a
    /// shared `MemoryBroker`. `broker` is ignored when no queue relay is
    /// configured.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub async fn with_broker(config: NodeConfig, broker: Arc<dyn Broker>) -> BResult<Self> {
        Self::build(config, Some(broker)).await
    }

    async fn build(config: NodeConfig, broker: Option<Arc<dyn Broker>>) -> BResult<Self> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut runtime = NodeRuntime {
            server: None,
            direct: None,
            queue: None,
            event_tx: event_tx.clone(),
            command_rx,
            shutdown_rx,
        };

        // Anything already running is released on failure.
        if let Err(e) = start_transports(&config, broker, &mut runtime).await {
            runtime.release().await;
            return Err(e);
        }

        let listen_addr = runtime.server.as_ref().and_then(RelayServer::local_addr);

        tracing::info!(
            transports = ?config.transports(),
            ?listen_addr,
            "chat node initialized"
        );

        Ok(Self {
            state: NodeState::Initializing,
            runtime: Some(runtime),
            command_tx,
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
            task_handle: None,
            transports: config.transports(),
            listen_addr,
        })
    }

    /// Starts the event loop in a new tokio task.
    ///
    /// # Errors
    ///
    /// - `RelayError::ConfigError` if the node is not in
    ///   `Initializing` state (prevents double-start).
    pub fn start(&mut self) -> BResult<()> {
        if self.state != NodeState::Initializing {
            return Err(RelayError::ConfigError {
                reason: format!(
                    "cannot start node in state '{}'; expected 'initializing'",
                    self.state,
                ),
            });
        }

        let runtime = self.runtime.take().ok_or_else(|| RelayError::ConfigError {
            reason: "runtime already consumed (double start?)".into(),
        })?;

        self.task_handle = Some(tokio::spawn(event_loop::run_event_loop(runtime)));
        self.state = NodeState::Running;
        Ok(())
    }

    /// Shuts the node down and waits until every transport is released.
    ///
    /// Idempotent. A node that was never started releases its
    /// transports directly.
    pub async fn shutdown(&mut self) {
        if self.state == NodeState::ShuttingDown {
            return;
        }
        self.state = NodeState::ShuttingDown;

        if let Some(mut runtime) = self.runtime.take() {
            runtime.release().await;
        }

        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(%e, "node event loop panicked");
            }
        }

        tracing::info!("chat node shut down");
    }

    /// Non-blocking UI handle.
    pub fn handle(&self) -> ChatHandle {
        ChatHandle::new(
            self.command_tx.clone(),
            self.event_tx.clone(),
            self.transports.clone(),
        )
    }

    /// Returns a sender for submitting commands to the node.
    pub fn command_sender(&self) -> mpsc::Sender<NodeCommand> {
        self.command_tx.clone()
    }

    /// Takes the event receiver (can only be called once).
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Bound direct relay address, if the direct relay is active.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    /// Mechanisms this node runs.
    pub fn transports(&self) -> &[Transport] {
        &self.transports
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Brings up the configured transports in order: server, client, queue.
async fn start_transports(
    config: &NodeConfig,
    broker: Option<Arc<dyn Broker>>,
    runtime: &mut NodeRuntime,
) -> BResult<()> {
    if let Some(direct) = &config.direct {
        let mut server = RelayServer::new(direct.listen_addr, runtime.event_tx.clone());
        server.start().await?;
        runtime.server = Some(server);

        let client = DirectClient::connect_with_retry(direct, runtime.event_tx.clone()).await?;
        runtime.direct = Some(client);
    }

    if let Some(queue_config) = &config.queue {
        let broker = broker.ok_or_else(|| RelayError::ConfigError {
            reason: "queue relay configured without a broker".into(),
        })?;
        let queue_name = queue_config.queue_name.clone();
        let relay = Arc::new(
            QueueRelay::connect(broker, queue_config.clone(), runtime.event_tx.clone()).await?,
        );
        runtime.queue = Some(Arc::clone(&relay));
        relay.join(&queue_name).await?;
    }

    Ok(())
}
