//! Integration tests for the chat node.
//!
//! Direct relay tests use real loopback gRPC on ephemeral ports; queue
//! relay tests share one in-process broker between nodes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use chatrelay_node::{ChatNode, NodeCommand, NodeConfig, NodeState};
use chatrelay_queue::{AckMode, MemoryBroker, QueueConfig};
use chatrelay_rpc::config::peer_endpoint;
use chatrelay_rpc::{DirectClient, DirectConfig, RelayServer};
use chatrelay_types::config::TransportTimeouts;
use chatrelay_types::{RelayError, RelayEvent, Transport};

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn timeouts() -> TransportTimeouts {
    TransportTimeouts {
        connect_timeout_ms: 1_000,
        request_timeout_ms: 1_000,
    }
}

fn direct_config(peer: SocketAddr) -> DirectConfig {
    DirectConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        peer_endpoint: peer_endpoint(&peer.ip().to_string(), peer.port()),
        connect_attempts: 1,
        retry_delay_ms: 10,
        timeouts: timeouts(),
    }
}

fn queue_config() -> QueueConfig {
    QueueConfig {
        broker_uri: "memory://".into(),
        queue_name: "room".into(),
        ack_mode: AckMode::Manual,
        connect_attempts: 1,
        retry_delay_ms: 10,
        timeouts: timeouts(),
    }
}

async fn peer_server() -> Result<(RelayServer, SocketAddr, mpsc::Receiver<RelayEvent>), RelayError> {
    let (tx, rx) = mpsc::channel(16);
    let mut server = RelayServer::new(SocketAddr::from(([127, 0, 0, 1], 0)), tx);
    let addr = server.start().await?;
    Ok((server, addr, rx))
}

async fn next_event(rx: &mut mpsc::Receiver<RelayEvent>) -> Option<RelayEvent> {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .ok()
        .flatten()
}

// ---------------------------------------------------------------------------
// Configuration / lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_config_is_rejected() {
    let result = ChatNode::new(NodeConfig::default()).await;
    assert!(matches!(result, Err(RelayError::ConfigError { .. })));
}

#[tokio::test]
async fn double_start_is_rejected_and_shutdown_is_idempotent() -> TestResult {
    let broker = MemoryBroker::new();
    let config = NodeConfig {
        direct: None,
        queue: Some(queue_config()),
    };
    let mut node = ChatNode::with_broker(config, Arc::new(broker.clone())).await?;
    assert_eq!(node.state(), NodeState::Initializing);

    node.start()?;
    assert_eq!(node.state(), NodeState::Running);
    assert!(matches!(node.start(), Err(RelayError::ConfigError { .. })));

    node.shutdown().await;
    node.shutdown().await;
    assert_eq!(node.state(), NodeState::ShuttingDown);
    assert_eq!(broker.open_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn shutdown_before_start_releases_transports() -> TestResult {
    let (mut peer, peer_addr, _peer_rx) = peer_server().await?;
    let broker = MemoryBroker::new();
    let config = NodeConfig {
        direct: Some(direct_config(peer_addr)),
        queue: Some(queue_config()),
    };
    let mut node = ChatNode::with_broker(config, Arc::new(broker.clone())).await?;
    let listen = node.listen_addr().ok_or("direct relay not listening")?;

    node.shutdown().await;
    assert_eq!(broker.open_sessions(), 0);

    // The listen port is free again.
    let rebound = tokio::net::TcpListener::bind(listen).await;
    assert!(rebound.is_ok());

    peer.stop().await?;
    Ok(())
}

#[tokio::test]
async fn unreachable_peer_fails_startup_and_frees_port() -> TestResult {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let dead = listener.local_addr()?;
    drop(listener);

    let broker = MemoryBroker::new();
    let config = NodeConfig {
        direct: Some(direct_config(dead)),
        queue: Some(queue_config()),
    };
    let result = ChatNode::with_broker(config, Arc::new(broker.clone())).await;
    assert!(matches!(result, Err(RelayError::ConnectFailure { .. })));
    assert_eq!(broker.open_sessions(), 0, "queue relay must not be started");
    Ok(())
}

#[tokio::test]
async fn broker_failure_releases_direct_relay() -> TestResult {
    let (mut peer, peer_addr, _peer_rx) = peer_server().await?;
    let broker = MemoryBroker::new();
    broker.fail_next_connects(1);

    let config = NodeConfig {
        direct: Some(direct_config(peer_addr)),
        queue: Some(queue_config()),
    };
    let result = ChatNode::with_broker(config, Arc::new(broker)).await;
    assert!(matches!(result, Err(RelayError::BrokerUnavailable { .. })));

    peer.stop().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn direct_send_reaches_peer_and_inbound_reaches_ui() -> TestResult {
    let (mut peer, peer_addr, mut peer_rx) = peer_server().await?;
    let config = NodeConfig {
        direct: Some(direct_config(peer_addr)),
        queue: None,
    };
    let mut node = ChatNode::new(config).await?;
    let mut events = node.take_event_receiver().ok_or("receiver already taken")?;
    assert!(node.take_event_receiver().is_none());
    node.start()?;

    // Outbound.
    node.handle().send_message("alice", "hi bob");
    match next_event(&mut peer_rx).await {
        Some(RelayEvent::MessageReceived { envelope, .. }) => {
            assert_eq!(envelope.to_string(), "alice | hi bob");
        }
        other => panic!("peer expected MessageReceived, got {other:?}"),
    }

    // Inbound, from the peer's side.
    let listen = node.listen_addr().ok_or("direct relay not listening")?;
    let (peer_fail_tx, _peer_fail_rx) = mpsc::channel(4);
    let back = DirectClient::connect(
        &peer_endpoint(&listen.ip().to_string(), listen.port()),
        &timeouts(),
        peer_fail_tx,
    )
    .await?;
    back.send("bob", "hi alice");
    match next_event(&mut events).await {
        Some(RelayEvent::MessageReceived { transport, envelope }) => {
            assert_eq!(transport, Transport::Direct);
            assert_eq!(envelope.to_string(), "bob | hi alice");
        }
        other => panic!("node expected MessageReceived, got {other:?}"),
    }

    node.shutdown().await;
    peer.stop().await?;
    Ok(())
}

#[tokio::test]
async fn queue_message_reaches_exactly_one_node() -> TestResult {
    let broker = MemoryBroker::new();
    let config = NodeConfig {
        direct: None,
        queue: Some(queue_config()),
    };
    let mut a = ChatNode::with_broker(config.clone(), Arc::new(broker.clone())).await?;
    let mut b = ChatNode::with_broker(config, Arc::new(broker.clone())).await?;
    let mut a_rx = a.take_event_receiver().ok_or("a receiver taken")?;
    let mut b_rx = b.take_event_receiver().ok_or("b receiver taken")?;
    a.start()?;
    b.start()?;

    a.handle().send_message("alice", "who gets this?");

    let first = tokio::time::timeout(Duration::from_secs(3), async {
        tokio::select! {
            e = a_rx.recv() => e,
            e = b_rx.recv() => e,
        }
    })
    .await?;
    assert!(matches!(
        first,
        Some(RelayEvent::MessageReceived { transport: Transport::Queue, .. })
    ));

    // Nobody gets a second copy.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(a_rx.try_recv().is_err());
    assert!(b_rx.try_recv().is_err());

    a.shutdown().await;
    b.shutdown().await;
    assert_eq!(broker.open_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn blank_user_fails_on_every_transport() -> TestResult {
    let (mut peer, peer_addr, _peer_rx) = peer_server().await?;
    let broker = MemoryBroker::new();
    let config = NodeConfig {
        direct: Some(direct_config(peer_addr)),
        queue: Some(queue_config()),
    };
    let mut node = ChatNode::with_broker(config, Arc::new(broker)).await?;
    let mut events = node.take_event_receiver().ok_or("receiver taken")?;
    node.start()?;

    node.handle().send_message("", "anonymous");

    let mut failed = Vec::new();
    for _ in 0..2 {
        match next_event(&mut events).await {
            Some(RelayEvent::SendFailed { transport, .. }) => failed.push(transport),
            other => panic!("expected SendFailed, got {other:?}"),
        }
    }
    failed.sort_by_key(|t| t.to_string());
    assert_eq!(failed, vec![Transport::Direct, Transport::Queue]);

    node.shutdown().await;
    peer.stop().await?;
    Ok(())
}

#[tokio::test]
async fn status_and_shutdown_command() -> TestResult {
    let broker = MemoryBroker::new();
    let config = NodeConfig {
        direct: None,
        queue: Some(queue_config()),
    };
    let mut node = ChatNode::with_broker(config, Arc::new(broker.clone())).await?;
    let _events = node.take_event_receiver();
    node.start()?;

    let handle = node.handle();
    handle.send_message("alice", "one");
    handle.send_message("alice", "two");

    let status = handle.status().await?;
    assert_eq!(status.state, NodeState::Running);
    assert_eq!(status.queue_name.as_deref(), Some("room"));
    assert_eq!(status.ack_mode, Some(AckMode::Manual));
    assert_eq!(status.listen_addr, None);
    assert_eq!(status.messages_sent, 2);

    node.command_sender().send(NodeCommand::Shutdown).await?;
    for _ in 0..50 {
        if broker.open_sessions() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(broker.open_sessions(), 0);
    assert!(matches!(handle.status().await, Err(RelayError::Closed { .. })));

    node.shutdown().await;
    Ok(())
}
