//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Segment`] instead of raw bytes. All protocol logic lives
//! elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::error::Result;
use crate::packet::{Segment, HEADER_LEN, MAX_PAYLOAD};

/// Largest datagram a RAT peer ever sends. One extra byte lets an oversized
/// datagram be detected instead of silently truncated to a plausible size.
const MAX_DATAGRAM: usize = HEADER_LEN + MAX_PAYLOAD + 1;

/// An async, segment-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `segment` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, segment: &Segment, dest: SocketAddr) -> std::io::Result<()> {
        self.inner.send_to(&segment.encode(), dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Segment`].
    ///
    /// The outer result is the socket read; the inner one is the decode, so
    /// callers can tell a dead socket from a garbled datagram.
    pub async fn recv_from(&self) -> std::io::Result<(Result<Segment>, SocketAddr)> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        Ok((Segment::decode(&buf[..n]), addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RatError;
    use crate::flags::FlagSet;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn segments_cross_loopback() {
        let a = loopback().await;
        let b = loopback().await;
        let seg = Segment::data(3, 1, 1, b"ping".to_vec()).unwrap();
        a.send_to(&seg, b.local_addr).await.unwrap();

        let (got, from) = b.recv_from().await.unwrap();
        assert_eq!(got.unwrap(), seg);
        assert_eq!(from, a.local_addr);
    }

    #[tokio::test]
    async fn garbage_datagram_is_reported_not_fatal() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = loopback().await;
        a.send_to(&[1, 2, 3], b.local_addr).await.unwrap();
        a.send_to(&Segment::control(1, 0, FlagSet::ACK).encode(), b.local_addr)
            .await
            .unwrap();

        let (first, _) = b.recv_from().await.unwrap();
        assert!(matches!(first, Err(RatError::HeaderMalformed(_))));
        let (second, _) = b.recv_from().await.unwrap();
        assert!(second.unwrap().is(FlagSet::ACK));
    }
}
