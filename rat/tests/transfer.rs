//! Integration tests for windowed data transfer.
//!
//! Verifies:
//! - Byte streams of one segment, one full segment, and several rounds
//!   arrive intact and in order.
//! - A NACK makes the sender retransmit exactly the listed segments.
//! - A receive buffer smaller than a round discards, NACKs and recovers
//!   the overflow.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use rat::packet::{decode, encode};
use rat::{Connection, ConnectionState, FlagSet, Listener, RatConfig, RatError, Segment};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const OVALTINE: &[u8] = b"Make sure to drink your ovaltine.";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn fast() -> RatConfig {
    RatConfig::default().with_reply_timeout(Duration::from_millis(200))
}

/// An established `(client, server child)` pair on loopback.
async fn pair(config: RatConfig) -> (Connection, Connection) {
    let mut listener = Listener::new(config.clone()).unwrap();
    listener.listen(loopback(), 4).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let listener = Arc::new(listener);
    let server_task = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.accept().await })
    };
    let mut client = Connection::bind(loopback(), config).await.unwrap();
    client.connect(addr).await.expect("connect");
    let server = server_task.await.unwrap().expect("accept");
    (client, server)
}

/// Keep receiving until `len` bytes have arrived.
async fn recv_exactly(conn: &mut Connection, len: usize, buffer: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let chunk = conn.recv(buffer).await.expect("recv");
        assert!(!chunk.is_empty(), "stream ended early");
        out.extend_from_slice(&chunk);
    }
    out
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A hand-driven peer: a raw listener socket plus the raw "child" socket
/// that answers the client's HLO.
struct FakeServer {
    listener: UdpSocket,
    child: UdpSocket,
    stream_id: u16,
}

impl FakeServer {
    async fn new(stream_id: u16) -> Self {
        Self {
            listener: UdpSocket::bind(loopback()).await.unwrap(),
            child: UdpSocket::bind(loopback()).await.unwrap(),
            stream_id,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    async fn recv(&self, socket: &UdpSocket) -> (Segment, SocketAddr) {
        let mut buf = [0u8; 1024];
        let (n, from) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("fake server waited too long")
            .unwrap();
        (Segment::decode(&buf[..n]).unwrap(), from)
    }

    /// Answer one HLO and take the client's ACK.
    async fn handshake(&self) -> SocketAddr {
        let (hello, client) = self.recv(&self.listener).await;
        assert!(hello.is(FlagSet::HLO));
        self.send(&Segment::control(self.stream_id, 1, FlagSet::ACK_HLO), client).await;
        let (ack, _) = self.recv(&self.child).await;
        assert!(ack.is(FlagSet::ACK));
        client
    }

    async fn send(&self, seg: &Segment, to: SocketAddr) {
        self.child.send_to(&seg.encode(), to).await.unwrap();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn ovaltine_header_roundtrip() {
    let bytes = encode(42, 7, 0, FlagSet::ACK, 0).unwrap();
    assert_eq!(bytes, [0x00, 0x2a, 0x00, 0x07, 0x00, 0x00, 0x80, 0x00]);
    let header = decode(&bytes).unwrap();
    assert_eq!(header.stream_id(), 42);
    assert_eq!(header.seq_num(), 7);
    assert_eq!(header.length(), 0);
    assert_eq!(header.flags(), FlagSet::ACK);
    assert_eq!(header.offset(), 0);
}

#[tokio::test]
async fn ovaltine_end_to_end() {
    init_logging();
    let (mut client, mut server) = pair(fast()).await;
    let receiver = tokio::spawn(async move {
        let data = server.recv(34).await;
        (server, data)
    });

    client.send(OVALTINE).await.unwrap();
    let (_server, data) = receiver.await.unwrap();
    assert_eq!(data.unwrap(), OVALTINE);
    assert_eq!(client.seq_num(), 2);
}

#[tokio::test]
async fn streams_of_several_sizes_arrive_intact() {
    init_logging();
    for len in [1usize, 512, 1024, 3000] {
        let (mut client, mut server) = pair(fast()).await;
        let receiver = tokio::spawn(async move {
            let data = recv_exactly(&mut server, len, 4096).await;
            (server, data)
        });

        let payload = pattern(len);
        client.send(&payload).await.unwrap();
        let (server, data) = receiver.await.unwrap();
        assert_eq!(data, payload, "stream of {len} bytes");

        let segments = len.div_ceil(512) as u16;
        assert_eq!(client.seq_num(), 1 + segments);
        assert_eq!(server.expected_seq(), 1 + segments);
    }
}

#[tokio::test]
async fn consecutive_sends_keep_their_order() {
    init_logging();
    let config = fast().with_window_size(2).with_payload_size(4);
    let (mut client, mut server) = pair(config).await;
    let receiver = tokio::spawn(async move {
        let first = recv_exactly(&mut server, 10, 64).await;
        let second = recv_exactly(&mut server, 3, 64).await;
        (first, second)
    });

    client.send(b"0123456789").await.unwrap();
    client.send(b"abc").await.unwrap();
    let (first, second) = receiver.await.unwrap();
    assert_eq!(first, b"0123456789");
    assert_eq!(second, b"abc");
}

#[tokio::test]
async fn empty_send_is_a_no_op() {
    init_logging();
    let (mut client, _server) = pair(fast()).await;
    client.send(b"").await.unwrap();
    assert_eq!(client.seq_num(), 1);
    assert_eq!(client.state(), ConnectionState::Established);
}

/// After a NACK for {3, 5} only segments 3 and 5 come back.
#[tokio::test]
async fn nack_retransmits_exactly_the_listed_segments() {
    init_logging();
    let fake = FakeServer::new(9).await;
    let addr = fake.addr();
    let config = RatConfig::default()
        .with_reply_timeout(Duration::from_secs(2))
        .with_payload_size(1);

    let sender = tokio::spawn(async move {
        let mut client = Connection::bind(loopback(), config).await.unwrap();
        client.connect(addr).await.unwrap();
        client.send(b"12345").await.map(|()| client)
    });

    let client_addr = fake.handshake().await;
    let mut first_round = Vec::new();
    for _ in 0..5 {
        let (seg, _) = fake.recv(&fake.child).await;
        assert_eq!(seg.header().offset(), 5);
        first_round.push(seg.seq_num());
    }
    first_round.sort_unstable();
    assert_eq!(first_round, vec![1, 2, 3, 4, 5]);

    fake.send(&Segment::nack(9, 2, &[3, 5]).unwrap(), client_addr).await;
    let (a, _) = fake.recv(&fake.child).await;
    let (b, _) = fake.recv(&fake.child).await;
    assert_eq!((a.seq_num(), b.seq_num()), (3, 5));
    assert_eq!(a.payload(), b"3");
    assert_eq!(b.payload(), b"5");

    fake.send(&Segment::control(9, 5, FlagSet::ACK), client_addr).await;
    let client = sender.await.unwrap().unwrap();
    assert_eq!(client.seq_num(), 6);
}

#[tokio::test]
async fn misaligned_nack_surfaces_to_the_sender() {
    init_logging();
    let fake = FakeServer::new(9).await;
    let addr = fake.addr();
    let config = RatConfig::default().with_reply_timeout(Duration::from_secs(2));

    let sender = tokio::spawn(async move {
        let mut client = Connection::bind(loopback(), config).await.unwrap();
        client.connect(addr).await.unwrap();
        client.send(b"hi").await
    });

    let client_addr = fake.handshake().await;
    let (data, _) = fake.recv(&fake.child).await;
    assert_eq!(data.payload(), b"hi");
    let odd = Segment::with_payload(9, 0, FlagSet::NACK, 1, vec![0, 1, 0]).unwrap();
    fake.send(&odd, client_addr).await;

    let res = sender.await.unwrap();
    assert!(matches!(res, Err(RatError::MisalignedWords { bits: 24 })));
}

/// Data from the wrong stream is dropped; the real segment still lands.
#[tokio::test]
async fn foreign_stream_is_dropped() {
    init_logging();
    let fake = FakeServer::new(9).await;
    let addr = fake.addr();
    let receiver = tokio::spawn(async move {
        let mut client = Connection::bind(loopback(), fast()).await.unwrap();
        client.connect(addr).await.unwrap();
        client.recv(64).await
    });

    let client_addr = fake.handshake().await;
    fake.send(&Segment::data(77, 1, 1, b"spoof".to_vec()).unwrap(), client_addr).await;
    fake.send(&Segment::data(9, 1, 1, b"real".to_vec()).unwrap(), client_addr).await;

    let (ack, _) = fake.recv(&fake.child).await;
    assert!(ack.is(FlagSet::ACK));
    assert_eq!(ack.seq_num(), 1);
    assert_eq!(receiver.await.unwrap().unwrap(), b"real");
}

/// A receiver missing part of a round NACKs the gap and completes once the
/// gap is filled.
#[tokio::test]
async fn receiver_nacks_missing_segments() {
    init_logging();
    let fake = FakeServer::new(9).await;
    let addr = fake.addr();
    let config = RatConfig::default().with_reply_timeout(Duration::from_millis(100));
    let receiver = tokio::spawn(async move {
        let mut client = Connection::bind(loopback(), config).await.unwrap();
        client.connect(addr).await.unwrap();
        client.recv(64).await
    });

    let client_addr = fake.handshake().await;
    for (seq, byte) in [(1u16, b"a"), (2, b"b"), (4, b"d")] {
        fake.send(&Segment::data(9, seq, 4, byte.to_vec()).unwrap(), client_addr).await;
    }

    let (nack, _) = fake.recv(&fake.child).await;
    assert!(nack.is(FlagSet::NACK));
    assert_eq!(nack.seq_num(), 2);
    assert_eq!(nack.nacked().unwrap(), vec![3]);

    fake.send(&Segment::data(9, 3, 4, b"c".to_vec()).unwrap(), client_addr).await;
    assert_eq!(receiver.await.unwrap().unwrap(), b"abcd");
    let (ack, _) = fake.recv(&fake.child).await;
    assert!(ack.is(FlagSet::ACK));
    assert_eq!(ack.seq_num(), 4);
}

/// Segments that do not fit the buffer are discarded, NACKed and delivered
/// by the next call.
#[tokio::test]
async fn small_buffer_overflow_is_recovered() {
    init_logging();
    let (mut client, mut server) = pair(fast()).await;
    let receiver = tokio::spawn(async move {
        let first = server.recv(600).await.unwrap();
        let second = server.recv(600).await.unwrap();
        (first, second)
    });

    let payload = pattern(1024);
    client.send(&payload).await.unwrap();
    let (first, second) = receiver.await.unwrap();
    assert_eq!(first.len(), 512);
    assert_eq!(second.len(), 512);
    assert_eq!([first, second].concat(), payload);
}

/// A segment larger than the buffer is split across calls.
#[tokio::test]
async fn oversized_segment_is_carried_over() {
    init_logging();
    let (mut client, mut server) = pair(fast()).await;
    let receiver = tokio::spawn(async move {
        let mut parts = Vec::new();
        for _ in 0..3 {
            parts.push(server.recv(4).await.unwrap());
        }
        parts
    });

    client.send(b"0123456789").await.unwrap();
    let parts = receiver.await.unwrap();
    assert_eq!(parts, vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]);
}

#[tokio::test]
async fn cancel_interrupts_recv() {
    init_logging();
    let (_client, mut server) = pair(fast()).await;
    let token = server.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    assert!(matches!(server.recv(64).await, Err(RatError::Cancelled)));
    assert_eq!(server.state(), ConnectionState::Established);
}

/// A cancelled recv ends only that call; the stream carries on afterwards.
#[tokio::test]
async fn connection_is_usable_after_a_cancelled_recv() {
    init_logging();
    let (mut client, mut server) = pair(fast()).await;
    let token = server.cancel_token();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    assert!(matches!(server.recv(64).await, Err(RatError::Cancelled)));
    assert!(!token.is_cancelled());

    let receiver = tokio::spawn(async move {
        let data = server.recv(64).await.unwrap();
        let end = server.recv(64).await.unwrap();
        (server, data, end)
    });
    client.send(b"later").await.unwrap();
    client.close().await.unwrap();

    let (server, data, end) = receiver.await.unwrap();
    assert_eq!(data, b"later");
    assert!(end.is_empty());
    assert_eq!(server.state(), ConnectionState::Closed);
}
