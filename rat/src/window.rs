//! Send-side window state machine.
//!
//! [`SendWindow`] turns an outbound byte stream into numbered segments and
//! tracks which of them are still awaiting acknowledgement.
//!
//! # Protocol contract
//!
//! - Segments leave in **rounds** of at most `window_size`; a new round only
//!   opens once every segment of the previous one has been acknowledged.
//! - Every data segment carries `SWIN` and the size of its round in `offset`,
//!   so the receiver knows how many sequence numbers to expect.
//! - ACKs are **cumulative**: `seq_num = K` acknowledges every in-flight
//!   segment up to and including `K`.
//! - NACKs are **selective**: only the listed sequence numbers are handed
//!   back for retransmission, never the whole window.
//! - Sequence numbers are u16 and wrap; every comparison is made relative to
//!   the oldest in-flight segment.
//!
//! This module only manages state; all socket I/O is the caller's responsibility.

use std::collections::VecDeque;

use crate::error::Result;
use crate::packet::Segment;

/// A single in-flight segment occupying one slot of the window.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub segment: Segment,
    /// Total number of times this segment has been handed out for transmission.
    pub tx_count: u32,
}

/// Send-side state for one `send` call.
///
/// # Sequence-number layout
///
/// ```text
///   base            base+in_flight        next_seq
///     │                    │                  │
///  ───┼────────────────────┼──────────────────┼──────▶ seq space
///     │ <── in flight ───▶ │ <── queued ────▶ │
/// ```
#[derive(Debug)]
pub struct SendWindow {
    stream_id: u16,
    /// Sequence number for the next chunk pushed.
    next_seq: u16,
    window_size: usize,
    payload_size: usize,
    /// Chunks numbered but not yet part of a round.
    queued: VecDeque<(u16, Vec<u8>)>,
    /// The current round, ordered by sequence number (front = oldest).
    in_flight: VecDeque<WindowEntry>,
}

impl SendWindow {
    /// `first_seq` is the connection's next outgoing sequence number.
    pub fn new(stream_id: u16, first_seq: u16, window_size: usize, payload_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        assert!(payload_size >= 1, "payload_size must be at least 1");
        Self {
            stream_id,
            next_seq: first_seq,
            window_size,
            payload_size,
            queued: VecDeque::new(),
            in_flight: VecDeque::with_capacity(window_size),
        }
    }

    /// Split `data` into chunks and number them. Returns the number of chunks.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let mut n = 0;
        for chunk in data.chunks(self.payload_size) {
            self.queued.push_back((self.next_seq, chunk.to_vec()));
            self.next_seq = self.next_seq.wrapping_add(1);
            n += 1;
        }
        n
    }

    /// Sequence number the next pushed chunk would get.
    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn has_unacked(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Oldest unacknowledged sequence number, if any.
    pub fn base(&self) -> Option<u16> {
        self.in_flight.front().map(|e| e.segment.seq_num())
    }

    /// Move the next round of queued chunks into the window and return the
    /// segments to transmit. `None` when the current round is still open or
    /// nothing is left to send.
    pub fn open_round(&mut self) -> Result<Option<Vec<Segment>>> {
        if self.has_unacked() || self.queued.is_empty() {
            return Ok(None);
        }
        let take = self.queued.len().min(self.window_size);
        // window_size is validated against the width of `offset` by RatConfig.
        let round_len = u8::try_from(take).unwrap_or(u8::MAX);
        let mut segments = Vec::with_capacity(take);
        for (seq, payload) in self.queued.drain(..take) {
            let segment = Segment::data(self.stream_id, seq, round_len, payload)?;
            segments.push(segment.clone());
            self.in_flight.push_back(WindowEntry { segment, tx_count: 1 });
        }
        Ok(Some(segments))
    }

    /// Number of in-flight segments a cumulative ACK of `ack` covers, or
    /// `None` when it acknowledges nothing currently in flight.
    pub fn covers(&self, ack: u16) -> Option<usize> {
        let base = self.base()?;
        let distance = ack.wrapping_sub(base) as usize;
        (distance < self.in_flight.len()).then_some(distance + 1)
    }

    /// Process a cumulative ACK. Returns the number of newly released segments.
    pub fn on_ack(&mut self, ack: u16) -> usize {
        let Some(n) = self.covers(ack) else {
            return 0;
        };
        self.in_flight.drain(..n);
        n
    }

    /// Process a NACK: release the cumulative part, then return exactly the
    /// listed segments that are still in flight, for retransmission.
    pub fn on_nack(&mut self, cumulative: u16, missing: &[u16]) -> Vec<Segment> {
        self.on_ack(cumulative);
        let mut resend = Vec::with_capacity(missing.len());
        for entry in self.in_flight.iter_mut() {
            if missing.contains(&entry.segment.seq_num()) {
                entry.tx_count += 1;
                resend.push(entry.segment.clone());
            }
        }
        resend
    }

    /// Every in-flight segment, oldest first, for a timeout retransmission.
    pub fn outstanding(&mut self) -> Vec<Segment> {
        self.in_flight
            .iter_mut()
            .map(|entry| {
                entry.tx_count += 1;
                entry.segment.clone()
            })
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry> {
        self.in_flight.iter()
    }
}
