//! Error taxonomy shared by every layer of the protocol engine.

use thiserror::Error;

use crate::state::ConnectionState;

/// Every failure an engine operation can report.
#[derive(Debug, Error)]
pub enum RatError {
    /// A header was not exactly 8 bytes, or a datagram's framing disagrees
    /// with its header.
    #[error("RAT header malformed: {0}")]
    HeaderMalformed(String),

    /// A numeric value does not fit the field it is destined for.
    #[error("number out of range: {field} = {value} (max {max})")]
    NumberOutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },

    /// Overhead data (a NACK payload) is not aligned to 16-bit words.
    #[error("overhead data is not aligned to 16 bits ({bits} bits)")]
    MisalignedWords { bits: usize },

    /// The operation is not legal in the connection's current state.
    #[error("cannot perform {op} in state {state}")]
    StateViolation {
        op: &'static str,
        state: ConnectionState,
    },

    /// A segment carried another stream's identifier.
    #[error("segment for stream {got} received on stream {expected}")]
    IntegrityViolation { expected: u16, got: u16 },

    /// The bounded retry budget was spent without a matching reply.
    #[error("no reply after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// The connection has been closed and cannot be used again.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer reset the connection.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// The operation was aborted through its cancel token.
    #[error("operation cancelled")]
    Cancelled,

    /// Socket setup or other OS-level failure outside a retry budget.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RatError>;

impl RatError {
    pub(crate) fn out_of_range(field: &'static str, value: u64, max: u64) -> Self {
        Self::NumberOutOfRange { field, value, max }
    }
}
