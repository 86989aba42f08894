//! Integration tests for the HLO / ACK+HLO / ACK handshake.
//!
//! Each test binds real `tokio::net::UdpSocket`s on loopback. Where a test
//! needs a misbehaving peer, that peer is a raw socket speaking segments by
//! hand.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use rat::{Connection, ConnectionState, FlagSet, Listener, RatConfig, RatError, Role, Segment};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn fast() -> RatConfig {
    RatConfig::default().with_reply_timeout(Duration::from_millis(200))
}

fn impatient() -> RatConfig {
    RatConfig::default().with_reply_timeout(Duration::from_millis(40))
}

async fn listening(config: RatConfig) -> (Arc<Listener>, SocketAddr) {
    let mut listener = Listener::new(config).unwrap();
    listener.listen(loopback(), 4).await.expect("listen");
    let addr = listener.local_addr().unwrap();
    (Arc::new(listener), addr)
}

/// Read every segment already queued on `socket` or arriving within 100 ms.
async fn drain(socket: &UdpSocket) -> Vec<(Segment, SocketAddr)> {
    let mut buf = [0u8; 1024];
    let mut out = Vec::new();
    while let Ok(Ok((n, from))) =
        tokio::time::timeout(Duration::from_millis(100), socket.recv_from(&mut buf)).await
    {
        out.push((Segment::decode(&buf[..n]).unwrap(), from));
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both ends are established on the same stream, both sequence spaces at 1.
#[tokio::test]
async fn handshake_both_sides_reach_established() {
    init_logging();
    let (listener, addr) = listening(fast()).await;
    let server_task = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.accept().await })
    };

    let mut client = Connection::bind(loopback(), fast()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), client.connect(addr))
        .await
        .expect("client connect timed out")
        .expect("client connect failed");

    let server = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked")
        .expect("server accept failed");

    assert_eq!(client.state(), ConnectionState::Established);
    assert_eq!(server.state(), ConnectionState::Established);
    assert_eq!(client.stream_id(), server.stream_id());
    assert_ne!(client.stream_id(), 0);
    assert_eq!(client.seq_num(), 1);
    assert_eq!(server.seq_num(), 1);
    assert_eq!(client.expected_seq(), 1);
    assert_eq!(server.expected_seq(), 1);

    assert_eq!(client.role(), Role::Client);
    assert_eq!(server.role(), Role::ServerChild);
    // The child talks from its own socket, not the listener's.
    assert_eq!(client.peer_addr(), server.local_addr());
    assert_ne!(server.local_addr(), Some(addr));
    assert_eq!(listener.active_streams(), 1);
}

/// Two clients get two distinct streams from one listener.
#[tokio::test]
async fn concurrent_clients_get_distinct_streams() {
    init_logging();
    let (listener, addr) = listening(fast()).await;
    let acceptor = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            let a = listener.accept().await.unwrap();
            let b = listener.accept().await.unwrap();
            (a, b)
        })
    };

    let mut one = Connection::bind(loopback(), fast()).await.unwrap();
    let mut two = Connection::bind(loopback(), fast()).await.unwrap();
    let (r1, r2) = tokio::join!(one.connect(addr), two.connect(addr));
    r1.unwrap();
    r2.unwrap();
    let (a, b) = acceptor.await.unwrap();

    assert_ne!(one.stream_id(), two.stream_id());
    assert_ne!(a.stream_id(), b.stream_id());
    assert_eq!(listener.active_streams(), 2);
}

/// A silent listener costs exactly `retry_times` HLOs, then the client
/// falls back to `Unopened`.
#[tokio::test]
async fn connect_to_silent_peer_exhausts_budget() {
    init_logging();
    let silent = UdpSocket::bind(loopback()).await.unwrap();
    let mut client = Connection::bind(loopback(), impatient()).await.unwrap();

    let res = client.connect(silent.local_addr().unwrap()).await;
    assert!(matches!(res, Err(RatError::RetryExhausted { attempts: 5 })));
    assert_eq!(client.state(), ConnectionState::Unopened);

    let seen = drain(&silent).await;
    assert_eq!(seen.len(), 5);
    for (seg, _) in &seen {
        assert!(seg.is(FlagSet::HLO));
        assert_eq!(seg.stream_id(), 0);
        assert_eq!(seg.seq_num(), 0);
    }
}

/// A client that never ACKs gets exactly `retry_times` ACK+HLOs; the
/// listener stays open for the next client.
#[tokio::test]
async fn accept_with_unresponsive_client() {
    init_logging();
    let (listener, addr) = listening(impatient()).await;
    let mute = UdpSocket::bind(loopback()).await.unwrap();
    mute.send_to(&Segment::control(0, 0, FlagSet::HLO).encode(), addr)
        .await
        .unwrap();

    let res = listener.accept().await;
    assert!(matches!(res, Err(RatError::RetryExhausted { attempts: 5 })));

    let seen = drain(&mute).await;
    assert_eq!(seen.len(), 5);
    let (first, child) = &seen[0];
    for (seg, from) in &seen {
        assert!(seg.is(FlagSet::ACK_HLO));
        assert_eq!(seg.stream_id(), first.stream_id());
        assert_eq!(seg.seq_num(), 1);
        assert_eq!(from, child);
    }
    assert_ne!(*child, addr);
    assert_eq!(listener.state(), ConnectionState::ServerOpen);
    assert_eq!(listener.active_streams(), 0);

    let server_task = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.accept().await })
    };
    let mut client = Connection::bind(loopback(), impatient()).await.unwrap();
    client.connect(addr).await.unwrap();
    let server = server_task.await.unwrap().unwrap();
    assert_eq!(server.stream_id(), client.stream_id());
}

/// A repeated HLO from an accepted peer spawns no second child.
#[tokio::test]
async fn duplicate_hello_is_ignored() {
    init_logging();
    let (listener, addr) = listening(fast()).await;
    let peer = UdpSocket::bind(loopback()).await.unwrap();
    let hello = Segment::control(0, 0, FlagSet::HLO).encode();
    peer.send_to(&hello, addr).await.unwrap();
    peer.send_to(&hello, addr).await.unwrap();

    let server_task = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.accept().await })
    };

    let mut buf = [0u8; 64];
    let (n, child) = peer.recv_from(&mut buf).await.unwrap();
    let welcome = Segment::decode(&buf[..n]).unwrap();
    assert!(welcome.is(FlagSet::ACK_HLO));
    peer.send_to(&Segment::control(welcome.stream_id(), 1, FlagSet::ACK).encode(), child)
        .await
        .unwrap();
    let server = server_task.await.unwrap().unwrap();
    assert_eq!(server.stream_id(), welcome.stream_id());

    // The queued duplicate is consumed and dropped; nothing else is waiting.
    let token = listener.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });
    assert!(matches!(listener.accept().await, Err(RatError::Cancelled)));
    assert_eq!(listener.active_streams(), 1);
    assert!(drain(&peer).await.is_empty());
}

/// Cancelling the listener also abandons a child handshake in progress.
#[tokio::test]
async fn cancel_aborts_child_handshake() {
    init_logging();
    let slow = RatConfig::default().with_reply_timeout(Duration::from_secs(10));
    let (listener, addr) = listening(slow).await;
    let mute = UdpSocket::bind(loopback()).await.unwrap();
    mute.send_to(&Segment::control(0, 0, FlagSet::HLO).encode(), addr)
        .await
        .unwrap();

    let token = listener.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });
    let res = tokio::time::timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("cancel did not interrupt the handshake");
    assert!(matches!(res, Err(RatError::Cancelled)));
}

/// A cancelled connect leaves the client unopened.
#[tokio::test]
async fn cancel_aborts_connect() {
    init_logging();
    let silent = UdpSocket::bind(loopback()).await.unwrap();
    let mut client = Connection::bind(loopback(), RatConfig::default()).await.unwrap();
    let token = client.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let res = client.connect(silent.local_addr().unwrap()).await;
    assert!(matches!(res, Err(RatError::Cancelled)));
    assert_eq!(client.state(), ConnectionState::Unopened);
}

#[tokio::test]
async fn connect_twice_is_a_state_violation() {
    init_logging();
    let (listener, addr) = listening(fast()).await;
    let server_task = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.accept().await })
    };
    let mut client = Connection::bind(loopback(), fast()).await.unwrap();
    client.connect(addr).await.unwrap();
    let _server = server_task.await.unwrap().unwrap();

    assert!(matches!(
        client.connect(addr).await,
        Err(RatError::StateViolation { op: "connect", state: ConnectionState::Established })
    ));
}

/// A client that closed cleanly can open a new stream from the same port.
#[tokio::test]
async fn reconnect_from_the_same_port_after_close() {
    init_logging();
    let (listener, addr) = listening(fast()).await;
    let first_server = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let data = conn.recv(64).await.unwrap();
            let end = conn.recv(64).await.unwrap();
            (conn, data, end)
        })
    };

    let mut first = Connection::bind(loopback(), fast()).await.unwrap();
    let local = first.local_addr().unwrap();
    first.connect(addr).await.unwrap();
    first.send(b"one").await.unwrap();
    first.close().await.unwrap();
    drop(first);

    let (conn, data, end) = first_server.await.unwrap();
    assert_eq!(data, b"one");
    assert!(end.is_empty());
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(listener.active_streams(), 0);

    let second_server = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.accept().await })
    };
    let mut second = Connection::bind(local, fast()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), second.connect(addr))
        .await
        .expect("second connect timed out")
        .expect("second connect failed");
    let server = second_server.await.unwrap().unwrap();
    assert_eq!(server.stream_id(), second.stream_id());
    assert_eq!(server.peer_addr(), Some(local));
    assert_eq!(listener.active_streams(), 1);
}
