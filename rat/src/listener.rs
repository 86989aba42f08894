//! Passive open.
//!
//! A [`Listener`] owns the well-known socket. Each accepted HLO becomes an
//! independent [`Connection`] on its own ephemeral socket, so the listener
//! only ever sees handshake openers.
//!
//! `accept` takes `&self`: wrap the listener in an `Arc` to accept from
//! several tasks at once. The backlog and stream-id bookkeeping lives in a
//! [`Registry`] behind a mutex that is never held across an await. Each
//! accepted child carries a [`StreamLease`] that frees its id on close.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::cancel::CancelToken;
use crate::config::RatConfig;
use crate::connection::Connection;
use crate::error::{RatError, Result};
use crate::flags::Flag;
use crate::socket::Socket;
use crate::state::{ConnectionState, Role};

/// Outcome of [`Registry::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Granted(u16),
    /// The peer already has a handshake or stream with this listener.
    Duplicate,
    /// The backlog is full.
    Full,
}

#[derive(Debug, Clone, Copy)]
struct Accepted {
    peer: SocketAddr,
    at: Instant,
}

/// Pending handshakes and open streams.
///
/// A peer whose stream was accepted less than `echo` ago may still be
/// retransmitting its HLO; those HLOs are duplicates. After that, or once
/// the stream is released, the same address may open a new stream.
#[derive(Debug, Default)]
pub struct Registry {
    limit: usize,
    echo: Duration,
    pending: HashMap<SocketAddr, u16>,
    accepted: HashMap<u16, Accepted>,
}

impl Registry {
    pub fn new(limit: usize, echo: Duration) -> Self {
        Self {
            limit,
            echo,
            ..Self::default()
        }
    }

    /// Claim a fresh stream id in `[1, 65535)` for `peer`.
    pub fn reserve(&mut self, peer: SocketAddr, now: Instant, rng: &mut impl Rng) -> Reservation {
        let echoing = self
            .accepted
            .values()
            .any(|a| a.peer == peer && now.saturating_duration_since(a.at) < self.echo);
        if self.pending.contains_key(&peer) || echoing {
            return Reservation::Duplicate;
        }
        let exhausted = self.pending.len() + self.accepted.len() >= usize::from(u16::MAX - 1);
        if self.pending.len() >= self.limit || exhausted {
            return Reservation::Full;
        }
        let id = loop {
            let candidate = rng.random_range(1..u16::MAX);
            if !self.in_use(candidate) {
                break candidate;
            }
        };
        self.pending.insert(peer, id);
        Reservation::Granted(id)
    }

    /// The handshake with `peer` succeeded.
    pub fn promote(&mut self, peer: SocketAddr, now: Instant) -> Option<u16> {
        let id = self.pending.remove(&peer)?;
        self.accepted.insert(id, Accepted { peer, at: now });
        Some(id)
    }

    /// Stream `id` has closed.
    pub fn release(&mut self, id: u16) {
        self.accepted.remove(&id);
    }

    /// The handshake with `peer` failed; its id is free again.
    pub fn abandon(&mut self, peer: SocketAddr) {
        self.pending.remove(&peer);
    }

    pub fn in_use(&self, id: u16) -> bool {
        self.accepted.contains_key(&id) || self.pending.values().any(|v| *v == id)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.len()
    }
}

/// An accepted stream's claim on its id. Dropping it releases the id.
#[derive(Debug)]
pub struct StreamLease {
    registry: Arc<Mutex<Registry>>,
    stream_id: u16,
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        lock(&self.registry).release(self.stream_id);
        log::debug!("[rat] stream {} released", self.stream_id);
    }
}

#[derive(Debug)]
pub struct Listener {
    state: ConnectionState,
    config: RatConfig,
    socket: Option<Socket>,
    cancel: CancelToken,
    registry: Arc<Mutex<Registry>>,
}

impl Listener {
    pub fn new(config: RatConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: ConnectionState::Unopened,
            config,
            socket: None,
            cancel: CancelToken::new(),
            registry: Arc::new(Mutex::new(Registry::default())),
        })
    }

    /// Bind `addr` and start taking HLOs; at most `backlog` handshakes run
    /// at once.
    pub async fn listen(&mut self, addr: SocketAddr, backlog: usize) -> Result<()> {
        self.state.require(&[ConnectionState::Unopened], "listen")?;
        if backlog == 0 {
            return Err(RatError::out_of_range("backlog", 0, usize::MAX as u64));
        }
        let socket = Socket::bind(addr).await?;
        log::info!("[rat] listening on {}", socket.local_addr);
        self.socket = Some(socket);
        let echo = self.config.idle_window();
        self.registry = Arc::new(Mutex::new(Registry::new(backlog, echo)));
        self.state = ConnectionState::ServerOpen;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Role {
        Role::Listener
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(|s| s.local_addr)
    }

    pub fn config(&self) -> &RatConfig {
        &self.config
    }

    /// Aborts every `accept` in progress, including child handshakes.
    /// Unlike a connection's token this one stays raised: it is a shutdown
    /// signal.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Accepted streams not yet closed.
    pub fn active_streams(&self) -> usize {
        self.registry().accepted()
    }

    /// Stop listening. Children already accepted are unaffected.
    pub fn close(&mut self) -> Result<()> {
        self.state.require(&[ConnectionState::ServerOpen], "close")?;
        self.socket = None;
        self.state = ConnectionState::Closed;
        log::info!("[rat] listener closed");
        Ok(())
    }

    /// Wait for the next HLO and complete its handshake on a fresh socket.
    ///
    /// The wait for an HLO is unbounded; the handshake itself is bounded by
    /// the retry budget. A failed handshake releases its backlog slot and
    /// leaves the listener open.
    pub async fn accept(&self) -> Result<Connection> {
        self.state.require(&[ConnectionState::ServerOpen], "accept")?;
        let socket = self.socket.as_ref().ok_or(RatError::StateViolation {
            op: "accept",
            state: self.state,
        })?;

        let (peer, stream_id) = self.await_hello(socket).await?;
        log::debug!("[rat] ← HLO from {peer}; assigning stream {stream_id}");

        let outcome = self.spawn_child(socket, peer, stream_id).await;
        match outcome {
            Ok(mut child) => {
                if let Some(stream_id) = self.registry().promote(peer, Instant::now()) {
                    child.hold(StreamLease {
                        registry: Arc::clone(&self.registry),
                        stream_id,
                    });
                }
                log::info!(
                    "[rat] accepted {peer} as stream {stream_id} on {:?}",
                    child.local_addr()
                );
                Ok(child)
            }
            Err(e) => {
                self.registry().abandon(peer);
                log::warn!("[rat] handshake with {peer} failed: {e}");
                Err(e)
            }
        }
    }

    async fn await_hello(&self, socket: &Socket) -> Result<(SocketAddr, u16)> {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RatError::Cancelled),
                r = socket.recv_from() => r,
            };
            let (decoded, from) = match received {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("[rat] listener receive failed: {e}");
                    continue;
                }
            };
            let seg = match decoded {
                Ok(seg) => seg,
                Err(e) => {
                    log::warn!("[rat] dropping datagram from {from}: {e}");
                    continue;
                }
            };
            if !seg.has(Flag::Hlo) || seg.has(Flag::Ack) {
                log::debug!("[rat] listener ignoring {} from {from}", seg.flags());
                continue;
            }

            let reservation = {
                let mut rng = rand::rng();
                self.registry().reserve(from, Instant::now(), &mut rng)
            };
            match reservation {
                Reservation::Granted(id) => return Ok((from, id)),
                Reservation::Duplicate => log::debug!("[rat] duplicate HLO from {from}"),
                Reservation::Full => log::warn!("[rat] backlog full; dropping HLO from {from}"),
            }
        }
    }

    async fn spawn_child(&self, socket: &Socket, peer: SocketAddr, stream_id: u16) -> Result<Connection> {
        let local = SocketAddr::new(socket.local_addr.ip(), 0);
        let mut child = Connection::server_child(Socket::bind(local).await?, peer, stream_id, self.config.clone());
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RatError::Cancelled),
            r = child.complete_accept() => r,
        };
        outcome.map(|()| child)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}
