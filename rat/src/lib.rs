//! `rat`: a reliable, connection-oriented transport over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  HLO   ┌──────────┐ spawns ┌────────────┐
//!  │ Connection │───────▶│ Listener │───────▶│ Connection │ (child)
//!  │  (client)  │◀──────────────────────────│            │
//!  └─────┬──────┘      rounds / ACK / NACK  └─────┬──────┘
//!        │                                        │
//!  ┌─────▼──────────────────────────────────────▼─────┐
//!  │   Retransmitter (bounded-retry exchange)          │
//!  │   SendWindow / RecvRound (window state)           │
//!  └─────┬─────────────────────────────────────────────┘
//!        │ segments
//!  ┌─────▼─────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format (8-byte header, segments, NACK payloads)
//! - [`flags`]: the eight header flag bits
//! - [`state`]: finite-state-machine types
//! - [`config`]: protocol constants and per-connection settings
//! - [`error`]: the shared error type
//! - [`cancel`]: cancellation signal for blocking waits
//! - [`socket`]: async UDP socket abstraction
//! - [`retransmit`]: send, wait, retry
//! - [`window`]: send-side window rounds
//! - [`round`]: receive-side round reassembly
//! - [`connection`]: per-stream lifecycle (handshake, transfer, teardown)
//! - [`listener`]: passive open and child spawning
//! - [`cli`]: argument validation for the `rat` binary

pub mod cancel;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod flags;
pub mod listener;
pub mod packet;
pub mod retransmit;
pub mod round;
pub mod socket;
pub mod state;
pub mod window;

pub use cancel::CancelToken;
pub use config::{KeepalivePolicy, RatConfig};
pub use connection::Connection;
pub use error::{RatError, Result};
pub use flags::{Flag, FlagSet};
pub use listener::Listener;
pub use packet::{Header, Segment};
pub use state::{ConnectionState, Role};
