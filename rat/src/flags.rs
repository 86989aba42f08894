//! The eight RAT header flags and a compact set type over them.
//!
//! On the wire the flags occupy one byte in the fixed order
//! `ACK, NACK, SWIN, RST, ALI, HLO, BYE, EXP`, first flag in the most
//! significant bit:
//!
//! ```text
//!   7     6     5     4     3     2     1     0
//! +-----+-----+-----+-----+-----+-----+-----+-----+
//! | ACK |NACK |SWIN | RST | ALI | HLO | BYE | EXP |
//! +-----+-----+-----+-----+-----+-----+-----+-----+
//! ```

use std::fmt;

/// A single header flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Acknowledgement; the header seq_num is the highest contiguous seq received.
    Ack,
    /// Negative acknowledgement; the payload lists missing seq_nums.
    Nack,
    /// Data segment; `offset` holds the size of the sender's window round.
    Swin,
    /// Reset the connection.
    Rst,
    /// Keep-alive probe.
    Ali,
    /// Handshake initiation.
    Hlo,
    /// Teardown initiation.
    Bye,
    /// Reserved.
    Exp,
}

/// Canonical wire order of the flags.
pub const FLAG_ORDER: [Flag; 8] = [
    Flag::Ack,
    Flag::Nack,
    Flag::Swin,
    Flag::Rst,
    Flag::Ali,
    Flag::Hlo,
    Flag::Bye,
    Flag::Exp,
];

impl Flag {
    /// The bit this flag occupies in the flags byte.
    pub const fn mask(self) -> u8 {
        0x80 >> (self as u8)
    }

    fn name(self) -> &'static str {
        match self {
            Flag::Ack => "ACK",
            Flag::Nack => "NACK",
            Flag::Swin => "SWIN",
            Flag::Rst => "RST",
            Flag::Ali => "ALI",
            Flag::Hlo => "HLO",
            Flag::Bye => "BYE",
            Flag::Exp => "EXP",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of [`Flag`]s, stored as the on-wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FlagSet(u8);

impl FlagSet {
    pub const EMPTY: FlagSet = FlagSet(0);
    pub const ACK: FlagSet = FlagSet::of(&[Flag::Ack]);
    pub const NACK: FlagSet = FlagSet::of(&[Flag::Nack]);
    pub const SWIN: FlagSet = FlagSet::of(&[Flag::Swin]);
    pub const RST: FlagSet = FlagSet::of(&[Flag::Rst]);
    pub const ALI: FlagSet = FlagSet::of(&[Flag::Ali]);
    pub const HLO: FlagSet = FlagSet::of(&[Flag::Hlo]);
    pub const BYE: FlagSet = FlagSet::of(&[Flag::Bye]);
    pub const ACK_HLO: FlagSet = FlagSet::of(&[Flag::Ack, Flag::Hlo]);
    pub const ACK_BYE: FlagSet = FlagSet::of(&[Flag::Ack, Flag::Bye]);

    /// Build a set from a list of flags; duplicates are harmless.
    pub const fn of(flags: &[Flag]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < flags.len() {
            bits |= flags[i].mask();
            i += 1;
        }
        FlagSet(bits)
    }

    /// Decode the flags byte. Every byte value is a valid set.
    pub const fn from_bits(bits: u8) -> Self {
        FlagSet(bits)
    }

    /// Encode the set as the flags byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, flag: Flag) -> bool {
        self.0 & flag.mask() != 0
    }

    pub fn insert(&mut self, flag: Flag) {
        self.0 |= flag.mask();
    }

    pub fn remove(&mut self, flag: Flag) {
        self.0 &= !flag.mask();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flags in the set, in canonical wire order.
    pub fn iter(self) -> impl Iterator<Item = Flag> {
        FLAG_ORDER.into_iter().filter(move |f| self.contains(*f))
    }
}

impl FromIterator<Flag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        let mut set = FlagSet::EMPTY;
        for flag in iter {
            set.insert(flag);
        }
        set
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let names: Vec<&str> = self.iter().map(Flag::name).collect();
        f.write_str(&names.join("+"))
    }
}
