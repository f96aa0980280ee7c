//! The status byte returned with every reply.
//!
//! | Bits | Meaning                                        |
//! | ---- | ---------------------------------------------- |
//! | 7..4 | target specific status (e.g. w11 `CmdErr`)     |
//! | 3    | `Attn`: attention pending at the target        |
//! | 2    | `RbTout`: the target did not answer in time     |
//! | 1    | `RbNak`: no device responded at this address    |
//! | 0    | `RbErr`: the addressed device reported an error |
use std::fmt::{self, Debug, Display, Formatter};

use serde::Serialize;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Status(u8);

impl Status {
    pub const ERR: u8 = 0x01;
    pub const NAK: u8 = 0x02;
    pub const TOUT: u8 = 0x04;
    pub const ATTN: u8 = 0x08;
    pub const TARGET_MASK: u8 = 0xf0;

    /// The flags which indicate that an operation did not reach or
    /// was refused by the target.
    pub const FAULTS: u8 = Status::ERR | Status::NAK | Status::TOUT;

    pub const OK: Status = Status(0);

    #[must_use]
    pub const fn new(bits: u8) -> Status {
        Status(bits)
    }

    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn has(&self, flags: u8) -> bool {
        self.0 & flags != 0
    }

    #[must_use]
    pub const fn is_fault(&self) -> bool {
        self.has(Status::FAULTS)
    }

    #[must_use]
    pub const fn attention_pending(&self) -> bool {
        self.has(Status::ATTN)
    }

    #[must_use]
    pub const fn target_bits(&self) -> u8 {
        (self.0 & Status::TARGET_MASK) >> 4
    }

    #[must_use]
    pub const fn matches(&self, value: u8, mask: u8) -> bool {
        (self.0 & mask) == (value & mask)
    }

    #[must_use]
    pub const fn with(&self, flags: u8) -> Status {
        Status(self.0 | flags)
    }
}

impl Debug for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "Status({self})")
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:08b}", self.0)?;
        for (flag, name) in [
            (Status::ATTN, "attn"),
            (Status::TOUT, "tout"),
            (Status::NAK, "nak"),
            (Status::ERR, "err"),
        ] {
            if self.has(flag) {
                write!(f, " {name}")?;
            }
        }
        Ok(())
    }
}

#[test]
fn test_status_flags() {
    let s = Status::new(0x80 | Status::NAK);
    assert!(s.is_fault());
    assert!(!s.attention_pending());
    assert_eq!(s.target_bits(), 0b1000);
    assert!(s.matches(Status::NAK, Status::FAULTS));
    assert!(!s.matches(Status::ERR, Status::FAULTS));
    assert_eq!(s.to_string(), "10000010 nak");
}
