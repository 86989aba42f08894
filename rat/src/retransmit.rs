//! Bounded-retry exchange primitive.
//!
//! Every reliable step of the protocol (handshake, data rounds, NACKs,
//! keep-alive probes and teardown) is one call to
//! [`Retransmitter::exchange`]: send a set of segments, wait for a reply the
//! caller recognises, and resend everything when an attempt times out.
//!
//! # Retry contract
//!
//! - At most `attempts` attempts; each sends every outgoing segment once and
//!   then waits up to `timeout` for an accepted reply.
//! - Timeouts, socket errors and undecodable datagrams each end the current
//!   attempt.
//! - There is no back-off: the timeout is the same for every attempt.
//! - A keep-alive seen while waiting means the peer is alive, so the budget
//!   starts over.
//! - The cancel token is observed at every wait.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::error::{RatError, Result};
use crate::packet::Segment;
use crate::socket::Socket;

/// The socket, peer and cancel signal one exchange runs over.
#[derive(Debug, Clone, Copy)]
pub struct Link<'a> {
    pub socket: &'a Socket,
    pub peer: SocketAddr,
    pub cancel: &'a CancelToken,
}

/// What the caller makes of one received segment.
#[derive(Debug)]
pub enum Verdict {
    /// This is the reply; end the exchange.
    Accept,
    /// Not for us; keep waiting.
    Ignore,
    /// Send this segment to the link's peer and keep waiting.
    Respond(Segment),
    /// A keep-alive: answer the link's peer and restart the retry budget.
    Alive(Segment),
}

#[derive(Debug, Clone, Copy)]
pub struct Retransmitter {
    attempts: u32,
    timeout: Duration,
}

impl Retransmitter {
    pub fn new(attempts: u32, timeout: Duration) -> Self {
        Self { attempts, timeout }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `outgoing` to the link's peer and wait for a reply `classify`
    /// accepts, retrying on timeout.
    ///
    /// An error returned by `classify` aborts the exchange and is passed to
    /// the caller unchanged.
    pub async fn exchange<F>(
        &self,
        link: Link<'_>,
        outgoing: &[Segment],
        mut classify: F,
    ) -> Result<(Segment, SocketAddr)>
    where
        F: FnMut(&Segment, SocketAddr) -> Result<Verdict>,
    {
        let mut attempt = 0u32;
        while attempt < self.attempts {
            attempt += 1;
            if link.cancel.is_cancelled() {
                return Err(RatError::Cancelled);
            }

            if let Err(e) = send_all(link, outgoing).await {
                log::warn!("[rat] send failed on attempt {attempt}/{}: {e}", self.attempts);
                continue;
            }

            let deadline = Instant::now() + self.timeout;
            loop {
                let received = tokio::select! {
                    biased;
                    _ = link.cancel.cancelled() => return Err(RatError::Cancelled),
                    r = tokio::time::timeout_at(deadline, link.socket.recv_from()) => r,
                };

                let (decoded, from) = match received {
                    Err(_elapsed) => {
                        log::debug!("[rat] attempt {attempt}/{} timed out", self.attempts);
                        break;
                    }
                    Ok(Err(e)) => {
                        log::warn!("[rat] receive failed on attempt {attempt}/{}: {e}", self.attempts);
                        break;
                    }
                    Ok(Ok(v)) => v,
                };
                let segment = match decoded {
                    Ok(segment) => segment,
                    Err(e) => {
                        log::warn!("[rat] dropping datagram from {from}: {e}");
                        break;
                    }
                };

                match classify(&segment, from)? {
                    Verdict::Accept => return Ok((segment, from)),
                    Verdict::Ignore => {}
                    Verdict::Respond(reply) => respond(link, &reply).await,
                    Verdict::Alive(reply) => {
                        respond(link, &reply).await;
                        attempt = 0;
                    }
                }
            }
        }

        log::debug!("[rat] too many failed retransmits; giving up");
        Err(RatError::RetryExhausted {
            attempts: self.attempts,
        })
    }

    /// Send a segment that expects no reply, retrying only on socket errors.
    pub async fn deliver(&self, link: Link<'_>, segment: &Segment) -> Result<()> {
        for attempt in 1..=self.attempts {
            if link.cancel.is_cancelled() {
                return Err(RatError::Cancelled);
            }
            match link.socket.send_to(segment, link.peer).await {
                Ok(()) => return Ok(()),
                Err(e) => log::warn!("[rat] send failed on attempt {attempt}/{}: {e}", self.attempts),
            }
        }
        Err(RatError::RetryExhausted {
            attempts: self.attempts,
        })
    }
}

async fn send_all(link: Link<'_>, outgoing: &[Segment]) -> std::io::Result<()> {
    for segment in outgoing {
        link.socket.send_to(segment, link.peer).await?;
    }
    Ok(())
}

async fn respond(link: Link<'_>, reply: &Segment) {
    if let Err(e) = link.socket.send_to(reply, link.peer).await {
        log::warn!("[rat] reply to {} failed: {e}", link.peer);
    }
}
