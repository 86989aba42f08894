//! Connection finite-state machine (FSM) types.
//!
//! Every [`crate::connection::Connection`] and [`crate::listener::Listener`]
//! occupies exactly one of these states. Transitions are driven by the
//! handshake, transfer and teardown code; this module only names the states
//! and guards which operations are legal in which of them.
//!
//! ```text
//!  UNOPENED ──listen──▶ SERVOPEN ──HLO──▶ (child) HLORECV ──ACK──▶ ESTABLISHED
//!     │                                                              ▲   │
//!     └──connect: HLO──▶ HLOSENT ──ACK+HLO, send ACK─────────────────┘   │
//!                                                            close: BYE  │
//!                                                                        ▼
//!  CLOSED ◀──ACK+BYE, send ACK── BYESENT ──peer BYE──▶ BYERECV ──ACK──▶ CLOSED
//! ```
//!
//! Any state moves to `Closed` when the peer resets the connection.

use crate::error::{RatError, Result};

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Created, no socket activity yet; initial state.
    #[default]
    Unopened,
    /// Listener bound and waiting for HLOs.
    ServerOpen,
    /// Client sent HLO; waiting for ACK+HLO.
    HloSent,
    /// Server child received HLO; ACK+HLO sent, waiting for ACK.
    HloRecv,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Local side sent BYE; waiting for ACK+BYE.
    ByeSent,
    /// Peer's BYE received; ACK+BYE sent, waiting for the final ACK.
    ByeRecv,
    /// Terminal. No further operations are possible.
    Closed,
}

impl ConnectionState {
    /// Fail unless the current state is one of `allowed`.
    ///
    /// `Closed` always yields [`RatError::ConnectionClosed`], whatever `op`
    /// would otherwise accept.
    pub fn require(self, allowed: &[ConnectionState], op: &'static str) -> Result<()> {
        if self == ConnectionState::Closed {
            return Err(RatError::ConnectionClosed);
        }
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(RatError::StateViolation { op, state: self })
        }
    }

    /// Conventional wire-level name for this state.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Unopened => "SOCK_UNOPENED",
            Self::ServerOpen => "SOCK_SERVOPEN",
            Self::HloSent => "SOCK_HLOSENT",
            Self::HloRecv => "SOCK_HLORECV",
            Self::Established => "SOCK_ESTABLISHED",
            Self::ByeSent => "SOCK_BYESENT",
            Self::ByeRecv => "SOCK_BYERECV",
            Self::Closed => "SOCK_CLOSED",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Which side of a connection an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    ServerChild,
    Client,
}
