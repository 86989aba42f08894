//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one logical peer-to-peer
//! stream. Its responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - The client side of the handshake, and the child side once a
//!   [`crate::listener::Listener`] has handed over an HLO.
//! - Windowed transfer through [`SendWindow`] and [`RecvRound`].
//! - Teardown, keep-alive probes and resets.
//!
//! Every network wait is one bounded [`Retransmitter`] exchange, so every
//! operation either completes, exhausts its budget or is cancelled.
//!
//! # Usage
//!
//! ```ignore
//! let mut conn = Connection::bind("127.0.0.1:0".parse()?, RatConfig::default()).await?;
//! conn.connect(server).await?;
//! conn.send(b"Make sure to drink your ovaltine.").await?;
//! conn.close().await?;
//! ```

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::cancel::CancelToken;
use crate::config::{KeepalivePolicy, RatConfig};
use crate::error::{RatError, Result};
use crate::flags::{Flag, FlagSet};
use crate::listener::StreamLease;
use crate::packet::Segment;
use crate::retransmit::{Link, Retransmitter, Verdict};
use crate::round::{Placement, RecvRound};
use crate::socket::Socket;
use crate::state::{ConnectionState, Role};
use crate::window::SendWindow;

use ConnectionState::*;

/// A single reliable connection over UDP.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    role: Role,
    stream_id: u16,
    /// Sequence number of the next outgoing data segment.
    seq_num: u16,
    /// Sequence number of the next incoming data segment.
    expected_seq: u16,
    config: RatConfig,
    socket: Option<Socket>,
    peer: Option<SocketAddr>,
    cancel: CancelToken,
    /// A receive round not yet fully handed to the application.
    pending: Option<RecvRound>,
    /// Tail of a segment that did not fit the previous `recv` buffer.
    carry: Vec<u8>,
    /// Holds the stream id in the listener's registry until Closed.
    lease: Option<StreamLease>,
}

/// How a receive round ended.
enum RoundEnd {
    Complete,
    /// The peer started a teardown.
    Bye,
}

impl Connection {
    /// An unbound client connection. The socket is bound on `connect`.
    pub fn new(config: RatConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: Unopened,
            role: Role::Client,
            stream_id: 0,
            seq_num: 0,
            expected_seq: 0,
            config,
            socket: None,
            peer: None,
            cancel: CancelToken::new(),
            pending: None,
            carry: Vec::new(),
            lease: None,
        })
    }

    /// A client connection bound to `local`.
    pub async fn bind(local: SocketAddr, config: RatConfig) -> Result<Self> {
        let mut conn = Self::new(config)?;
        conn.socket = Some(Socket::bind(local).await?);
        Ok(conn)
    }

    /// The child a listener spawns for an accepted HLO.
    pub(crate) fn server_child(socket: Socket, peer: SocketAddr, stream_id: u16, config: RatConfig) -> Self {
        Self {
            state: HloRecv,
            role: Role::ServerChild,
            stream_id,
            seq_num: 1,
            expected_seq: 1,
            config,
            socket: Some(socket),
            peer: Some(peer),
            cancel: CancelToken::new(),
            pending: None,
            carry: Vec::new(),
            lease: None,
        }
    }

    pub(crate) fn hold(&mut self, lease: StreamLease) {
        self.lease = Some(lease);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    pub fn seq_num(&self) -> u16 {
        self.seq_num
    }

    pub fn expected_seq(&self) -> u16 {
        self.expected_seq
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(|s| s.local_addr)
    }

    pub fn config(&self) -> &RatConfig {
        &self.config
    }

    pub fn window_size(&self) -> usize {
        self.config.window_size
    }

    /// A handle that aborts whatever this connection is waiting in.
    ///
    /// The aborted operation returns `Cancelled`, the state is left as it
    /// was and the token is lowered again, so the connection stays usable.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether keep-alive probes from the peer are answered.
    pub fn allow_keepalives(&mut self, obey: bool) {
        self.config.obey_keepalives = obey;
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: HLO to the listener at `remote`, adopt the stream the
    /// child assigns, acknowledge it.
    pub async fn connect(&mut self, remote: SocketAddr) -> Result<()> {
        self.state.require(&[Unopened], "connect")?;
        if self.socket.is_none() {
            let any = match remote {
                SocketAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
                SocketAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
            };
            self.socket = Some(Socket::bind(any).await?);
        }

        self.state = HloSent;
        let outcome = self.hello(remote).await;
        match outcome {
            Ok(()) => {
                self.state = Established;
                log::info!(
                    "[rat] connected to {remote}: stream {} via {:?}",
                    self.stream_id,
                    self.peer
                );
                Ok(())
            }
            Err(e) => {
                self.state = Unopened;
                self.peer = None;
                self.stream_id = 0;
                let result = Err(e);
                self.settle(result)
            }
        }
    }

    async fn hello(&mut self, remote: SocketAddr) -> Result<()> {
        let (reply, child) = {
            let socket = self.socket.as_ref().ok_or(RatError::StateViolation {
                op: "connect",
                state: self.state,
            })?;
            let link = Link { socket, peer: remote, cancel: &self.cancel };
            log::debug!("[rat] → HLO to {remote}");
            // The answer comes from the child's own socket, not the listener's.
            self.retransmitter()
                .exchange(link, &[Segment::control(0, 0, FlagSet::HLO)], |seg, from| {
                    if from.ip() != remote.ip() {
                        return Ok(Verdict::Ignore);
                    }
                    if seg.has(Flag::Rst) {
                        return Err(RatError::ConnectionReset);
                    }
                    Ok(if seg.is(FlagSet::ACK_HLO) && seg.stream_id() != 0 {
                        Verdict::Accept
                    } else {
                        Verdict::Ignore
                    })
                })
                .await?
        };
        log::debug!(
            "[rat] ← ACK+HLO stream={} seq={} from {child}",
            reply.stream_id(),
            reply.seq_num()
        );

        self.stream_id = reply.stream_id();
        self.seq_num = reply.seq_num();
        self.expected_seq = reply.seq_num();
        self.peer = Some(child);

        let ack = Segment::control(self.stream_id, reply.seq_num(), FlagSet::ACK);
        self.retransmitter().deliver(self.link()?, &ack).await?;
        log::debug!("[rat] → ACK seq={}", ack.seq_num());
        Ok(())
    }

    /// Child side of the handshake: `{ACK,HLO}` until the client's ACK.
    /// A data segment counts as the ACK and is kept for the first `recv`.
    pub(crate) async fn complete_accept(&mut self) -> Result<()> {
        self.state.require(&[HloRecv], "accept")?;
        let outcome = {
            let link = self.link()?;
            let stream_id = self.stream_id;
            let welcome = Segment::control(stream_id, self.seq_num, FlagSet::ACK_HLO);
            log::debug!("[rat] → ACK+HLO stream={stream_id} to {}", link.peer);
            self.retransmitter()
                .exchange(link, &[welcome], |seg, from| {
                    if from != link.peer || seg.stream_id() != stream_id {
                        return Ok(Verdict::Ignore);
                    }
                    if seg.has(Flag::Rst) {
                        return Err(RatError::ConnectionReset);
                    }
                    Ok(if seg.is(FlagSet::ACK) || seg.has(Flag::Swin) {
                        Verdict::Accept
                    } else {
                        Verdict::Ignore
                    })
                })
                .await
        };

        match outcome {
            Ok((seg, _)) => {
                self.state = Established;
                if seg.has(Flag::Swin) {
                    log::debug!("[rat] ← data seq={} taken as handshake ACK", seg.seq_num());
                    self.pending = self.open_round(seg);
                } else {
                    log::debug!("[rat] ← ACK; stream {} established", self.stream_id);
                }
                Ok(())
            }
            Err(e) => {
                self.shut();
                self.settle(Err(e))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Reliably deliver `data` to the peer.
    ///
    /// Returns once every segment has been acknowledged. On
    /// `RetryExhausted` the connection stays established but the stream's
    /// continuity is no longer guaranteed.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.state.require(&[Established], "send")?;
        if data.is_empty() {
            return Ok(());
        }
        let mut window = SendWindow::new(
            self.stream_id,
            self.seq_num,
            self.config.window_size,
            self.config.payload_size,
        );
        let chunks = window.push(data);
        log::debug!("[rat] send {} bytes in {chunks} segments from seq {}", data.len(), self.seq_num);

        let result = self.transmit(&mut window).await;
        self.seq_num = window.next_seq();
        self.settle(result)
    }

    async fn transmit(&mut self, window: &mut SendWindow) -> Result<()> {
        while let Some(mut outgoing) = window.open_round()? {
            log::debug!(
                "[rat] → round of {} from seq {:?}",
                outgoing.len(),
                window.base()
            );
            while window.has_unacked() {
                let (reply, _) = {
                    let link = self.link()?;
                    let screen = self.screen(link.peer);
                    let view: &SendWindow = window;
                    self.retransmitter()
                        .exchange(link, &outgoing, |seg, from| {
                            if let Some(verdict) = screen.check(seg, from)? {
                                return Ok(verdict);
                            }
                            if seg.has(Flag::Nack) || seg.is(FlagSet::BYE) {
                                return Ok(Verdict::Accept);
                            }
                            Ok(if seg.is(FlagSet::ACK) && view.covers(seg.seq_num()).is_some() {
                                Verdict::Accept
                            } else {
                                Verdict::Ignore
                            })
                        })
                        .await?
                };

                if reply.has(Flag::Nack) {
                    let missing = reply.nacked()?;
                    log::debug!("[rat] ← NACK cum={} missing={missing:?}", reply.seq_num());
                    let resend = window.on_nack(reply.seq_num(), &missing);
                    outgoing = if resend.is_empty() { window.outstanding() } else { resend };
                } else if reply.is(FlagSet::BYE) {
                    log::debug!("[rat] ← BYE during send");
                    self.passive_close().await;
                    return Err(RatError::ConnectionClosed);
                } else {
                    let released = window.on_ack(reply.seq_num());
                    log::debug!("[rat] ← ACK seq={} (released {released})", reply.seq_num());
                    outgoing = window.outstanding();
                }
            }
        }
        Ok(())
    }

    /// Receive up to `buffer_size` bytes of the stream.
    ///
    /// An empty vector means the peer closed the stream.
    pub async fn recv(&mut self, buffer_size: usize) -> Result<Vec<u8>> {
        self.state.require(&[Established], "recv")?;
        if buffer_size == 0 {
            return Err(RatError::out_of_range("buffer_size", 0, usize::MAX as u64));
        }
        if !self.carry.is_empty() {
            let rest = self.carry.split_off(buffer_size.min(self.carry.len()));
            return Ok(std::mem::replace(&mut self.carry, rest));
        }
        let result = self.receive(buffer_size).await;
        self.settle(result)
    }

    async fn receive(&mut self, buffer_size: usize) -> Result<Vec<u8>> {
        let mut round = match self.pending.take() {
            Some(round) => round,
            None => {
                let heard = self.await_round().await;
                let first = match heard {
                    Ok(seg) => seg,
                    Err(e @ RatError::RetryExhausted { .. }) => return Err(self.idle(e).await),
                    Err(e) => return Err(e),
                };
                if first.is(FlagSet::BYE) {
                    log::debug!("[rat] ← BYE; end of stream");
                    self.passive_close().await;
                    return Ok(Vec::new());
                }
                let seq = first.seq_num();
                self.open_round(first).ok_or_else(|| {
                    RatError::HeaderMalformed(format!("data segment {seq} names no round"))
                })?
            }
        };

        let end = self.collect(&mut round).await;
        match end {
            Ok(RoundEnd::Complete) => {}
            Ok(RoundEnd::Bye) => {
                log::debug!("[rat] ← BYE mid-round; end of stream");
                self.passive_close().await;
                return Ok(Vec::new());
            }
            Err(e) => {
                self.pending = Some(round);
                return Err(e);
            }
        }

        let delivery = round.deliver(buffer_size);
        if !delivery.overflow.is_empty() {
            log::debug!(
                "[rat] buffer of {buffer_size} full; → NACK missing={:?}",
                delivery.overflow
            );
            let nack = Segment::nack(self.stream_id, round.cumulative(), &delivery.overflow)?;
            self.retransmitter().deliver(self.link()?, &nack).await?;
        }
        if round.is_finished() {
            let ack = Segment::control(self.stream_id, round.cumulative(), FlagSet::ACK);
            self.retransmitter().deliver(self.link()?, &ack).await?;
            log::debug!("[rat] → ACK seq={}", ack.seq_num());
            self.expected_seq = round.next_expected();
        } else {
            self.pending = Some(round);
        }
        self.carry = delivery.carry;
        Ok(delivery.bytes)
    }

    /// Idle wait for the first segment of a round, or a BYE.
    async fn await_round(&self) -> Result<Segment> {
        let link = self.link()?;
        let screen = self.screen(link.peer);
        let expected = self.expected_seq;
        let (seg, _) = self
            .retransmitter()
            .exchange(link, &[], |seg, from| {
                if let Some(verdict) = screen.check(seg, from)? {
                    return Ok(verdict);
                }
                if seg.is(FlagSet::BYE) {
                    return Ok(Verdict::Accept);
                }
                let len = seg.header().offset() as usize;
                Ok(
                    if seg.has(Flag::Swin) && (seg.seq_num().wrapping_sub(expected) as usize) < len {
                        Verdict::Accept
                    } else {
                        Verdict::Ignore
                    },
                )
            })
            .await?;
        Ok(seg)
    }

    /// Listen until `round` is complete, NACKing gaps after every silent
    /// `reply_timeout`.
    async fn collect(&self, round: &mut RecvRound) -> Result<RoundEnd> {
        let link = self.link()?;
        let screen = self.screen(link.peer);
        let listen = Retransmitter::new(1, self.config.reply_timeout);

        while !round.is_complete() {
            let (seg, _) = {
                let view: &RecvRound = round;
                let classify = |seg: &Segment, from: SocketAddr| -> Result<Verdict> {
                    if let Some(verdict) = screen.check(seg, from)? {
                        return Ok(verdict);
                    }
                    if seg.is(FlagSet::BYE) {
                        return Ok(Verdict::Accept);
                    }
                    Ok(
                        if seg.has(Flag::Swin) && view.placement(seg.seq_num()) == Placement::New {
                            Verdict::Accept
                        } else {
                            Verdict::Ignore
                        },
                    )
                };
                match listen.exchange(link, &[], classify).await {
                    Err(RatError::RetryExhausted { .. }) => {
                        let missing = view.missing();
                        log::debug!("[rat] → NACK cum={} missing={missing:?}", view.cumulative());
                        let nack = Segment::nack(self.stream_id, view.cumulative(), &missing)?;
                        self.retransmitter().exchange(link, &[nack], classify).await?
                    }
                    other => other?,
                }
            };
            if seg.is(FlagSet::BYE) {
                return Ok(RoundEnd::Bye);
            }
            log::trace!("[rat] ← data seq={} len={}", seg.seq_num(), seg.payload().len());
            round.insert(seg.seq_num(), seg.into_payload());
        }
        Ok(RoundEnd::Complete)
    }

    /// Start a receive round from its first arriving segment.
    fn open_round(&self, seg: Segment) -> Option<RecvRound> {
        let len = seg.header().offset();
        if len == 0 {
            log::warn!("[rat] dropping data seq={} with empty round", seg.seq_num());
            return None;
        }
        let mut round = RecvRound::new(self.expected_seq, len);
        round.insert(seg.seq_num(), seg.into_payload());
        Some(round)
    }

    /// Apply the keep-alive policy to an idle wait that ran out.
    async fn idle(&mut self, err: RatError) -> RatError {
        match self.config.keepalive_policy {
            KeepalivePolicy::Ignore => {}
            KeepalivePolicy::Log => {
                log::warn!("[rat] peer {:?} silent for {:?}", self.peer, self.config.idle_window());
            }
            KeepalivePolicy::Reset => {
                log::warn!("[rat] peer {:?} presumed dead; resetting", self.peer);
                self.reset().await;
            }
        }
        err
    }

    // -----------------------------------------------------------------------
    // Teardown, keep-alive, reset
    // -----------------------------------------------------------------------

    /// Graceful close: BYE until `{ACK,BYE}`, then the final ACK.
    pub async fn close(&mut self) -> Result<()> {
        self.state.require(&[Established], "close")?;
        self.state = ByeSent;
        let outcome = self.teardown().await;
        match outcome {
            Ok(()) => {
                self.shut();
                log::info!("[rat] stream {} closed", self.stream_id);
                Ok(())
            }
            Err(e) => {
                self.state = Established;
                let result = Err(e);
                self.settle(result)
            }
        }
    }

    async fn teardown(&mut self) -> Result<()> {
        let mut contended = false;
        let reply = {
            let link = self.link()?;
            let screen = self.screen(link.peer);
            let stream_id = self.stream_id;
            let seq = self.seq_num;
            log::debug!("[rat] → BYE");
            let (reply, _) = self
                .bye_retransmitter()
                .exchange(link, &[Segment::control(stream_id, seq, FlagSet::BYE)], |seg, from| {
                    if let Some(verdict) = screen.check(seg, from)? {
                        return Ok(verdict);
                    }
                    if seg.is(FlagSet::ACK_BYE) || (contended && seg.is(FlagSet::ACK)) {
                        return Ok(Verdict::Accept);
                    }
                    if seg.is(FlagSet::BYE) {
                        log::debug!("[rat] ← BYE while closing; → ACK+BYE");
                        contended = true;
                        return Ok(Verdict::Respond(Segment::control(stream_id, seq, FlagSet::ACK_BYE)));
                    }
                    Ok(Verdict::Ignore)
                })
                .await?;
            reply
        };
        if contended {
            self.state = ByeRecv;
        }

        if reply.is(FlagSet::ACK_BYE) {
            log::debug!("[rat] ← ACK+BYE; → ACK");
            let ack = Segment::control(self.stream_id, self.seq_num, FlagSet::ACK);
            self.bye_retransmitter().deliver(self.link()?, &ack).await?;
        } else {
            log::debug!("[rat] ← ACK of our ACK+BYE");
        }
        Ok(())
    }

    /// The peer sent BYE: `{ACK,BYE}` until the final ACK. Closed either way.
    async fn passive_close(&mut self) {
        self.state = ByeRecv;
        let outcome = match self.link() {
            Ok(link) => {
                let screen = self.screen(link.peer);
                let reply = Segment::control(self.stream_id, self.seq_num, FlagSet::ACK_BYE);
                let answer = reply.clone();
                self.bye_retransmitter()
                    .exchange(link, &[reply], |seg, from| {
                        if let Some(verdict) = screen.check(seg, from)? {
                            return Ok(verdict);
                        }
                        Ok(if seg.is(FlagSet::ACK) {
                            Verdict::Accept
                        } else if seg.is(FlagSet::BYE) {
                            Verdict::Respond(answer.clone())
                        } else {
                            Verdict::Ignore
                        })
                    })
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            log::debug!("[rat] final ACK not received ({e}); closing anyway");
        }
        self.shut();
        log::info!("[rat] stream {} closed by peer", self.stream_id);
    }

    /// Probe the peer with ALI and wait for its ACK.
    pub async fn keepalive(&mut self) -> Result<()> {
        self.state.require(&[Established], "keepalive")?;
        let result = self.probe().await;
        match result {
            Ok(reply) if reply.is(FlagSet::BYE) => {
                self.passive_close().await;
                Err(RatError::ConnectionClosed)
            }
            Ok(_) => Ok(()),
            Err(e) => self.settle(Err(e)),
        }
    }

    async fn probe(&self) -> Result<Segment> {
        let link = self.link()?;
        let screen = self.screen(link.peer);
        log::debug!("[rat] → ALI");
        let probe = Segment::control(self.stream_id, self.seq_num, FlagSet::ALI);
        let (reply, _) = self
            .retransmitter()
            .exchange(link, &[probe], |seg, from| {
                if let Some(verdict) = screen.check(seg, from)? {
                    return Ok(verdict);
                }
                Ok(if seg.is(FlagSet::ACK) || seg.is(FlagSet::BYE) {
                    Verdict::Accept
                } else {
                    Verdict::Ignore
                })
            })
            .await?;
        log::debug!("[rat] ← ACK of ALI");
        Ok(reply)
    }

    /// Send RST and close immediately.
    pub async fn abort(&mut self) -> Result<()> {
        if self.state == Closed {
            return Err(RatError::ConnectionClosed);
        }
        self.reset().await;
        Ok(())
    }

    async fn reset(&mut self) {
        // An RST goes out whatever was cancelled before.
        self.cancel.clear();
        if let Ok(link) = self.link() {
            let rst = Segment::control(self.stream_id, self.seq_num, FlagSet::RST);
            log::debug!("[rat] → RST");
            if let Err(e) = self.retransmitter().deliver(link, &rst).await {
                log::warn!("[rat] RST not sent: {e}");
            }
        }
        self.shut();
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn link(&self) -> Result<Link<'_>> {
        match (&self.socket, self.peer) {
            (Some(socket), Some(peer)) => Ok(Link { socket, peer, cancel: &self.cancel }),
            _ => Err(RatError::StateViolation { op: "link", state: self.state }),
        }
    }

    fn retransmitter(&self) -> Retransmitter {
        Retransmitter::new(self.config.retry_times, self.config.reply_timeout)
    }

    fn bye_retransmitter(&self) -> Retransmitter {
        Retransmitter::new(self.config.retry_times, self.config.bye_timeout)
    }

    fn screen(&self, peer: SocketAddr) -> Screen {
        Screen {
            peer,
            stream_id: self.stream_id,
            expected_seq: self.expected_seq,
            obey_keepalives: self.config.obey_keepalives,
        }
    }

    /// A reset from the peer is terminal whatever the operation was. A
    /// cancellation only ends the one operation.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Err(RatError::ConnectionReset) => {
                log::warn!("[rat] stream {} reset by peer", self.stream_id);
                self.shut();
            }
            Err(RatError::Cancelled) => {
                log::debug!("[rat] stream {} operation cancelled", self.stream_id);
                self.cancel.clear();
            }
            _ => {}
        }
        result
    }

    /// Enter Closed and give the stream id back to the listener.
    fn shut(&mut self) {
        self.state = Closed;
        self.pending = None;
        self.carry.clear();
        self.lease = None;
    }
}

/// Checks shared by every wait on an open connection.
#[derive(Debug, Clone, Copy)]
struct Screen {
    peer: SocketAddr,
    stream_id: u16,
    expected_seq: u16,
    obey_keepalives: bool,
}

impl Screen {
    /// `Some` when the segment is settled here; `None` leaves it to the
    /// caller's own classification.
    fn check(&self, seg: &Segment, from: SocketAddr) -> Result<Option<Verdict>> {
        if from != self.peer {
            log::debug!("[rat] ignoring {} from stranger {from}", seg.flags());
            return Ok(Some(Verdict::Ignore));
        }
        if seg.stream_id() != self.stream_id {
            let err = RatError::IntegrityViolation {
                expected: self.stream_id,
                got: seg.stream_id(),
            };
            log::warn!("[rat] dropping segment: {err}");
            return Ok(Some(Verdict::Ignore));
        }
        if seg.has(Flag::Rst) {
            return Err(RatError::ConnectionReset);
        }
        if seg.is(FlagSet::ACK_HLO) {
            // Our handshake ACK was lost.
            return Ok(Some(Verdict::Respond(self.ack(seg.seq_num()))));
        }
        if seg.is(FlagSet::ALI) {
            return Ok(Some(if self.obey_keepalives {
                log::debug!("[rat] ← ALI; → ACK");
                Verdict::Alive(self.ack(seg.seq_num()))
            } else {
                Verdict::Ignore
            }));
        }
        if seg.has(Flag::Swin) && precedes(seg.seq_num(), self.expected_seq) {
            log::debug!("[rat] ← stale data seq={}; re-ACK", seg.seq_num());
            return Ok(Some(Verdict::Respond(self.ack(self.expected_seq.wrapping_sub(1)))));
        }
        Ok(None)
    }

    fn ack(&self, seq: u16) -> Segment {
        Segment::control(self.stream_id, seq, FlagSet::ACK)
    }
}

/// `seq` lies in the half of the sequence space before `reference`.
fn precedes(seq: u16, reference: u16) -> bool {
    let distance = reference.wrapping_sub(seq);
    distance != 0 && distance <= u16::MAX / 2
}
