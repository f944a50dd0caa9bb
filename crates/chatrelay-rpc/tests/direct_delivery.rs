//! End-to-end tests for the direct relay over loopback gRPC.
//!
//! Each test starts a real `RelayServer` on `127.0.0.1:0` and connects a
//! `DirectClient` to it.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;

use chatrelay_protocol::proto;
use chatrelay_protocol::proto::message_sender_client::MessageSenderClient;
use chatrelay_rpc::config::peer_endpoint;
use chatrelay_rpc::{DirectClient, RelayServer, ServerState};
use chatrelay_types::config::TransportTimeouts;
use chatrelay_types::{Envelope, RelayError, RelayEvent, Transport};

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn timeouts() -> TransportTimeouts {
    TransportTimeouts {
        connect_timeout_ms: 1_000,
        request_timeout_ms: 2_000,
    }
}

async fn start_server(
    capacity: usize,
) -> Result<(RelayServer, SocketAddr, mpsc::Receiver<RelayEvent>), RelayError> {
    let (tx, rx) = mpsc::channel(capacity);
    let mut server = RelayServer::new(SocketAddr::from(([127, 0, 0, 1], 0)), tx);
    let addr = server.start().await?;
    Ok((server, addr, rx))
}

fn endpoint_for(addr: SocketAddr) -> String {
    peer_endpoint(&addr.ip().to_string(), addr.port())
}

async fn next_event(rx: &mut mpsc::Receiver<RelayEvent>) -> Option<RelayEvent> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .ok()
        .flatten()
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn message_is_delivered_exactly_once() -> TestResult {
    let (mut server, addr, mut server_rx) = start_server(16).await?;
    let (client_tx, mut client_rx) = mpsc::channel(16);
    let client = DirectClient::connect(&endpoint_for(addr), &timeouts(), client_tx).await?;

    client.send("alice", "hi");

    match next_event(&mut server_rx).await {
        Some(RelayEvent::MessageReceived { transport, envelope }) => {
            assert_eq!(transport, Transport::Direct);
            assert_eq!(envelope.user_name(), "alice");
            assert_eq!(envelope.message_text(), "hi");
        }
        other => panic!("expected MessageReceived, got {other:?}"),
    }

    // No duplicate, and no failure on the sending side.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server_rx.try_recv().is_err());
    assert!(client_rx.try_recv().is_err());

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn empty_text_is_delivered() -> TestResult {
    let (mut server, addr, mut server_rx) = start_server(4).await?;
    let (client_tx, _client_rx) = mpsc::channel(4);
    let client = DirectClient::connect(&endpoint_for(addr), &timeouts(), client_tx).await?;

    client.deliver(&Envelope::new("bob", "")?).await?;

    match next_event(&mut server_rx).await {
        Some(RelayEvent::MessageReceived { envelope, .. }) => {
            assert_eq!(envelope.message_text(), "");
        }
        other => panic!("expected MessageReceived, got {other:?}"),
    }

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn concurrent_sends_are_all_received() -> TestResult {
    const COUNT: usize = 50;

    let (mut server, addr, mut server_rx) = start_server(COUNT).await?;
    let (client_tx, _client_rx) = mpsc::channel(COUNT);
    let client = DirectClient::connect(&endpoint_for(addr), &timeouts(), client_tx).await?;

    for i in 0..COUNT {
        client.send("alice", &format!("msg-{i}"));
    }

    let mut seen = Vec::with_capacity(COUNT);
    for _ in 0..COUNT {
        match next_event(&mut server_rx).await {
            Some(RelayEvent::MessageReceived { envelope, .. }) => {
                seen.push(envelope.message_text().to_string());
            }
            other => panic!("expected MessageReceived, got {other:?}"),
        }
    }

    // Order across concurrent calls is not guaranteed; the set is.
    seen.sort();
    let mut expected: Vec<String> = (0..COUNT).map(|i| format!("msg-{i}")).collect();
    expected.sort();
    assert_eq!(seen, expected);

    server.stop().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_peer_is_connect_failure() -> TestResult {
    // Reserve a port, then release it so nothing is listening there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let (tx, _rx) = mpsc::channel(1);
    let result = DirectClient::connect(&endpoint_for(addr), &timeouts(), tx).await;
    assert!(matches!(result, Err(RelayError::ConnectFailure { .. })));
    Ok(())
}

#[tokio::test]
async fn send_to_stopped_peer_reports_send_failed() -> TestResult {
    let (mut server, addr, _server_rx) = start_server(4).await?;
    let (client_tx, mut client_rx) = mpsc::channel(4);
    let client = DirectClient::connect(&endpoint_for(addr), &timeouts(), client_tx).await?;

    server.stop().await?;
    client.send("alice", "anyone there?");

    match next_event(&mut client_rx).await {
        Some(RelayEvent::SendFailed { transport, reason }) => {
            assert_eq!(transport, Transport::Direct);
            assert!(!reason.is_empty());
        }
        other => panic!("expected SendFailed, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn blank_user_is_reported_locally_and_not_sent() -> TestResult {
    let (mut server, addr, mut server_rx) = start_server(4).await?;
    let (client_tx, mut client_rx) = mpsc::channel(4);
    let client = DirectClient::connect(&endpoint_for(addr), &timeouts(), client_tx).await?;

    client.send("  ", "who am i");

    assert!(matches!(
        next_event(&mut client_rx).await,
        Some(RelayEvent::SendFailed { transport: Transport::Direct, .. })
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server_rx.try_recv().is_err(), "nothing should reach the peer");

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn closed_client_reports_send_failed() -> TestResult {
    let (mut server, addr, mut server_rx) = start_server(4).await?;
    let (client_tx, mut client_rx) = mpsc::channel(4);
    let client = DirectClient::connect(&endpoint_for(addr), &timeouts(), client_tx).await?;

    client.close();
    client.close();
    assert!(client.is_closed());
    client.send("alice", "too late");

    match next_event(&mut client_rx).await {
        Some(RelayEvent::SendFailed { reason, .. }) => {
            assert!(reason.contains("client closed"), "{reason}");
        }
        other => panic!("expected SendFailed, got {other:?}"),
    }
    assert!(matches!(
        client.deliver(&Envelope::new("alice", "again")?).await,
        Err(RelayError::Closed { .. })
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server_rx.try_recv().is_err());

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn raw_blank_user_is_acked_and_flagged() -> TestResult {
    let (mut server, addr, mut server_rx) = start_server(4).await?;
    let mut raw = MessageSenderClient::connect(endpoint_for(addr)).await?;

    let ack = raw
        .send(proto::Envelope {
            user_name: String::new(),
            message_text: "orphan".into(),
        })
        .await;
    assert!(ack.is_ok(), "ack is unconditional");

    assert!(matches!(
        next_event(&mut server_rx).await,
        Some(RelayEvent::MalformedEnvelope { transport: Transport::Direct, .. })
    ));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn oversized_message_is_refused_before_sending() -> TestResult {
    let (mut server, addr, mut server_rx) = start_server(4).await?;
    let (client_tx, mut client_rx) = mpsc::channel(4);
    let client = DirectClient::connect(&endpoint_for(addr), &timeouts(), client_tx).await?;

    let text = "x".repeat(70 * 1024);
    assert!(matches!(
        client.deliver(&Envelope::new("alice", text.as_str())?).await,
        Err(RelayError::SendFailure { .. })
    ));

    client.send("alice", &text);
    match next_event(&mut client_rx).await {
        Some(RelayEvent::SendFailed { transport, reason }) => {
            assert_eq!(transport, Transport::Direct);
            assert!(reason.contains("limit"), "{reason}");
        }
        other => panic!("expected SendFailed, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server_rx.try_recv().is_err(), "nothing should reach the peer");

    server.stop().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_does_not_wait_on_full_event_channel() -> TestResult {
    // One slot and nobody draining it.
    let (mut server, addr, _server_rx) = start_server(1).await?;
    let (client_tx, _client_rx) = mpsc::channel(8);
    let client = DirectClient::connect(&endpoint_for(addr), &timeouts(), client_tx).await?;

    for i in 0..3 {
        client.send("alice", &format!("msg {i}"));
    }
    // Let the calls reach the server and block on the channel.
    tokio::time::sleep(Duration::from_millis(300)).await;

    tokio::time::timeout(Duration::from_secs(3), server.stop())
        .await
        .map_err(|_| "stop blocked on a full event channel")??;
    assert_eq!(server.state(), ServerState::Stopped);
    Ok(())
}

#[tokio::test]
async fn server_stop_reaches_stopped_and_frees_port() -> TestResult {
    let (mut server, addr, _rx) = start_server(4).await?;
    assert_eq!(server.state(), ServerState::Listening);

    server.stop().await?;
    server.stop().await?;
    assert_eq!(server.state(), ServerState::Stopped);

    // The port can be bound again.
    let (tx, _rx2) = mpsc::channel(4);
    let mut again = RelayServer::new(addr, tx);
    again.start().await?;
    again.stop().await?;
    Ok(())
}

#[tokio::test]
async fn two_nodes_exchange_messages() -> TestResult {
    let (mut a_server, a_addr, mut a_rx) = start_server(4).await?;
    let (mut b_server, b_addr, mut b_rx) = start_server(4).await?;

    let (fail_tx, _fail_rx) = mpsc::channel(4);
    let a_client = DirectClient::connect(&endpoint_for(b_addr), &timeouts(), fail_tx.clone()).await?;
    let b_client = DirectClient::connect(&endpoint_for(a_addr), &timeouts(), fail_tx).await?;

    a_client.send("alice", "hello bob");
    b_client.send("bob", "hello alice");

    match next_event(&mut b_rx).await {
        Some(RelayEvent::MessageReceived { envelope, .. }) => {
            assert_eq!(envelope.to_string(), "alice | hello bob");
        }
        other => panic!("b expected MessageReceived, got {other:?}"),
    }
    match next_event(&mut a_rx).await {
        Some(RelayEvent::MessageReceived { envelope, .. }) => {
            assert_eq!(envelope.to_string(), "bob | hello alice");
        }
        other => panic!("a expected MessageReceived, got {other:?}"),
    }

    a_server.stop().await?;
    b_server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn connect_with_retry_waits_for_late_peer() -> TestResult {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let config = chatrelay_rpc::DirectConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        peer_endpoint: endpoint_for(addr),
        connect_attempts: 20,
        retry_delay_ms: 50,
        timeouts: timeouts(),
    };

    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let (tx, rx) = mpsc::channel(4);
        let mut server = RelayServer::new(addr, tx);
        server.start().await.map(|_| (server, rx))
    });

    let (client_tx, _client_rx) = mpsc::channel(4);
    let client = DirectClient::connect_with_retry(&config, client_tx).await?;
    let (mut server, mut server_rx) = late.await??;

    client.send("alice", "made it");
    assert!(matches!(
        next_event(&mut server_rx).await,
        Some(RelayEvent::MessageReceived { .. })
    ));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn connect_with_retry_gives_up() -> TestResult {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let config = chatrelay_rpc::DirectConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        peer_endpoint: endpoint_for(addr),
        connect_attempts: 2,
        retry_delay_ms: 10,
        timeouts: timeouts(),
    };
    let (tx, _rx) = mpsc::channel(1);
    assert!(matches!(
        DirectClient::connect_with_retry(&config, tx).await,
        Err(RelayError::ConnectFailure { .. })
    ));
    Ok(())
}
