//! Receive-side window round.
//!
//! A [`RecvRound`] collects the segments of one sender round. The round is
//! identified by its first sequence number (the receiver's next expected
//! sequence number when the round began) and its size, which every data
//! segment carries in `offset`.
//!
//! - New segments are slotted by their distance from `first`.
//! - Segments before the undelivered part of the round are **stale**: the
//!   sender missed an acknowledgement and the caller should re-ACK them.
//! - Delivery happens in sequence order and only once the round is
//!   complete; segments that do not fit the caller's buffer are dropped
//!   again and become part of the next NACK.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

/// Where an incoming sequence number falls relative to the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Fills a missing slot.
    New,
    /// Already held.
    Duplicate,
    /// Already delivered, or from an earlier round.
    Stale,
    /// Beyond the round.
    Outside,
}

/// Output of [`RecvRound::deliver`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// In-order bytes for the caller.
    pub bytes: Vec<u8>,
    /// Tail of a segment that alone exceeded the buffer.
    pub carry: Vec<u8>,
    /// Sequence numbers discarded for lack of room.
    pub overflow: Vec<u16>,
}

#[derive(Debug)]
pub struct RecvRound {
    first: u16,
    slots: Vec<Option<Vec<u8>>>,
    /// Slots `..delivered` have been handed to the application.
    delivered: usize,
}

impl RecvRound {
    pub fn new(first: u16, len: u8) -> Self {
        Self {
            first,
            slots: vec![None; len as usize],
            delivered: 0,
        }
    }

    pub fn first(&self) -> u16 {
        self.first
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn seq_at(&self, idx: usize) -> u16 {
        // idx < slots.len() <= 255
        self.first.wrapping_add(idx as u16)
    }

    pub fn placement(&self, seq: u16) -> Placement {
        let idx = seq.wrapping_sub(self.first) as usize;
        if idx < self.slots.len() {
            if idx < self.delivered {
                Placement::Stale
            } else if self.slots[idx].is_some() {
                Placement::Duplicate
            } else {
                Placement::New
            }
        } else if self.first.wrapping_sub(seq) <= u16::MAX / 2 {
            Placement::Stale
        } else {
            Placement::Outside
        }
    }

    /// Store a segment's payload. Returns where it fell; only
    /// [`Placement::New`] changes the round.
    pub fn insert(&mut self, seq: u16, payload: Vec<u8>) -> Placement {
        let placement = self.placement(seq);
        if placement == Placement::New {
            let idx = seq.wrapping_sub(self.first) as usize;
            self.slots[idx] = Some(payload);
        }
        placement
    }

    /// Undelivered sequence numbers not yet received, in order.
    pub fn missing(&self) -> Vec<u16> {
        (self.delivered..self.slots.len())
            .filter(|&i| self.slots[i].is_none())
            .map(|i| self.seq_at(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.slots[self.delivered..].iter().all(Option::is_some)
    }

    /// Every slot has been handed to the application.
    pub fn is_finished(&self) -> bool {
        self.delivered == self.slots.len()
    }

    /// Highest sequence number such that it and everything before it in the
    /// round is held or delivered. `first - 1` when nothing is.
    pub fn cumulative(&self) -> u16 {
        let held = self.delivered
            + self.slots[self.delivered..]
                .iter()
                .take_while(|s| s.is_some())
                .count();
        self.first.wrapping_add(held as u16).wrapping_sub(1)
    }

    /// Sequence number the receiver expects after what has been delivered.
    pub fn next_expected(&self) -> u16 {
        self.seq_at(self.delivered)
    }

    /// Hand out held segments in order, at most `budget` bytes.
    ///
    /// A segment that does not fit, and everything after it, is discarded
    /// and listed in [`Delivery::overflow`]. If the first segment handed out
    /// does not fit on its own, its prefix is returned and the rest goes to
    /// [`Delivery::carry`].
    pub fn deliver(&mut self, budget: usize) -> Delivery {
        let mut out = Delivery::default();
        while self.delivered < self.slots.len() {
            let Some(payload) = self.slots[self.delivered].take() else {
                break;
            };
            let room = budget - out.bytes.len();
            if payload.len() <= room {
                out.bytes.extend_from_slice(&payload);
                self.delivered += 1;
            } else if out.bytes.is_empty() {
                out.bytes.extend_from_slice(&payload[..room]);
                out.carry = payload[room..].to_vec();
                self.delivered += 1;
                break;
            } else {
                for idx in self.delivered..self.slots.len() {
                    if self.slots[idx].take().is_some() || idx == self.delivered {
                        out.overflow.push(self.seq_at(idx));
                    }
                }
                break;
            }
        }
        out
    }
}
