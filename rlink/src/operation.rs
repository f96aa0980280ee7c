//! The operations a batch can carry.
use std::fmt::{self, Display, Formatter};

#[cfg(test)]
use test_strategy::Arbitrary;

/// The seven kinds of operation the link understands.  The
/// discriminant is the opcode carried in the low three bits of the
/// command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    RegisterRead = 0,
    BlockRead = 1,
    RegisterWrite = 2,
    BlockWrite = 3,
    LatchedReadback = 4,
    AttentionQuery = 5,
    ControlFunction = 6,
}

impl OpKind {
    #[must_use]
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_opcode(opcode: u8) -> Option<OpKind> {
        match opcode {
            0 => Some(OpKind::RegisterRead),
            1 => Some(OpKind::BlockRead),
            2 => Some(OpKind::RegisterWrite),
            3 => Some(OpKind::BlockWrite),
            4 => Some(OpKind::LatchedReadback),
            5 => Some(OpKind::AttentionQuery),
            6 => Some(OpKind::ControlFunction),
            _ => None,
        }
    }

    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            OpKind::RegisterRead => "rreg",
            OpKind::BlockRead => "rblk",
            OpKind::RegisterWrite => "wreg",
            OpKind::BlockWrite => "wblk",
            OpKind::LatchedReadback => "labo",
            OpKind::AttentionQuery => "attn",
            OpKind::ControlFunction => "init",
        }
    }

    /// True for the kinds whose reply carries a single data word.
    #[must_use]
    pub const fn returns_data(self) -> bool {
        matches!(
            self,
            OpKind::RegisterRead | OpKind::LatchedReadback | OpKind::AttentionQuery
        )
    }

    #[must_use]
    pub const fn is_block(self) -> bool {
        matches!(self, OpKind::BlockRead | OpKind::BlockWrite)
    }
}

impl Display for OpKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(self.mnemonic())
    }
}

/// One operation of a batch.
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    RegisterRead {
        address: u16,
    },
    RegisterWrite {
        address: u16,
        data: u16,
    },
    BlockRead {
        address: u16,
        #[cfg_attr(test, strategy(1..=512u16))]
        count: u16,
    },
    BlockWrite {
        address: u16,
        #[cfg_attr(test, strategy(proptest::collection::vec(proptest::prelude::any::<u16>(), 1..64)))]
        words: Vec<u16>,
    },
    /// Reads back the target's latched abort word, which is non-zero
    /// when an earlier block transfer of the same batch stopped short.
    LatchedReadback,
    /// Returns (and clears) the pattern of pending attention sources.
    AttentionQuery,
    ControlFunction {
        address: u16,
        function: u16,
    },
}

impl Operation {
    #[must_use]
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::RegisterRead { .. } => OpKind::RegisterRead,
            Operation::RegisterWrite { .. } => OpKind::RegisterWrite,
            Operation::BlockRead { .. } => OpKind::BlockRead,
            Operation::BlockWrite { .. } => OpKind::BlockWrite,
            Operation::LatchedReadback => OpKind::LatchedReadback,
            Operation::AttentionQuery => OpKind::AttentionQuery,
            Operation::ControlFunction { .. } => OpKind::ControlFunction,
        }
    }

    #[must_use]
    pub fn address(&self) -> Option<u16> {
        match self {
            Operation::RegisterRead { address }
            | Operation::RegisterWrite { address, .. }
            | Operation::BlockRead { address, .. }
            | Operation::BlockWrite { address, .. }
            | Operation::ControlFunction { address, .. } => Some(*address),
            Operation::LatchedReadback | Operation::AttentionQuery => None,
        }
    }

    /// The number of words a block operation asks to transfer.
    #[must_use]
    pub fn block_size(&self) -> Option<usize> {
        match self {
            Operation::BlockRead { count, .. } => Some(usize::from(*count)),
            Operation::BlockWrite { words, .. } => Some(words.len()),
            _ => None,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Operation::RegisterRead { address } => write!(f, "rreg {address:06o}"),
            Operation::RegisterWrite { address, data } => {
                write!(f, "wreg {address:06o} {data:06o}")
            }
            Operation::BlockRead { address, count } => write!(f, "rblk {address:06o} {count}"),
            Operation::BlockWrite { address, words } => {
                write!(f, "wblk {address:06o} {}", words.len())
            }
            Operation::LatchedReadback => f.write_str("labo"),
            Operation::AttentionQuery => f.write_str("attn"),
            Operation::ControlFunction { address, function } => {
                write!(f, "init {address:06o} {function:06o}")
            }
        }
    }
}

#[test]
fn test_opcode_round_trip() {
    for opcode in 0..8u8 {
        match OpKind::from_opcode(opcode) {
            Some(kind) => assert_eq!(kind.opcode(), opcode),
            None => assert_eq!(opcode, 7),
        }
    }
}
