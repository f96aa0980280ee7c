//! PDP-11 physical addresses.
//!
//! The w11 has a 22-bit physical address space.  Memory words sit at
//! even addresses; the top 8 KiB (017760000 to 017777777) is the I/O
//! page.  Programs running in 16-bit mode see the I/O page at
//! 0160000 to 0177777.
use std::error::Error;
use std::fmt::{self, Display, Formatter, Octal};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PhysAddr(u32);

/// Start of the I/O page in the 22-bit address space.
pub const IO_PAGE_22: u32 = 0o17760000;

/// Start of the I/O page as seen through a 16-bit address.
pub const IO_PAGE_16: u16 = 0o160000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadPhysAddr {
    OutOfRange(u32),
    Odd(u32),
}

impl Display for BadPhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            BadPhysAddr::OutOfRange(a) => {
                write!(f, "address {a:o} is outside the 22-bit address space")
            }
            BadPhysAddr::Odd(a) => write!(f, "address {a:o} is not word aligned"),
        }
    }
}

impl Error for BadPhysAddr {}

impl PhysAddr {
    pub const MAX: PhysAddr = PhysAddr(0o17777777);

    /// Build a word address; odd addresses are refused.
    pub fn word(a: u32) -> Result<PhysAddr, BadPhysAddr> {
        if a > PhysAddr::MAX.0 {
            Err(BadPhysAddr::OutOfRange(a))
        } else if a & 1 != 0 {
            Err(BadPhysAddr::Odd(a))
        } else {
            Ok(PhysAddr(a))
        }
    }

    /// The physical address a 16-bit address refers to when no
    /// memory management is active.
    #[must_use]
    pub fn from_16bit(a: u16) -> PhysAddr {
        if a >= IO_PAGE_16 {
            PhysAddr(IO_PAGE_22 | u32::from(a - IO_PAGE_16))
        } else {
            PhysAddr(u32::from(a))
        }
    }

    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Low 16 bits (the value for the address-latch low register).
    #[must_use]
    pub const fn low(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    /// Bits 21..16.
    #[must_use]
    pub const fn high(&self) -> u16 {
        ((self.0 >> 16) & 0o77) as u16
    }

    #[must_use]
    pub const fn is_io_page(&self) -> bool {
        self.0 >= IO_PAGE_22
    }

    /// The address `words` words further on, wrapping within the
    /// 22-bit space.
    #[must_use]
    pub const fn offset_words(&self, words: u32) -> PhysAddr {
        PhysAddr(self.0.wrapping_add(words.wrapping_mul(2)) & PhysAddr::MAX.0 & !1)
    }
}

impl Display for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:08o}", self.0)
    }
}

impl Octal for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        Octal::fmt(&self.0, f)
    }
}

#[test]
fn test_word_address_checks() {
    assert!(PhysAddr::word(0o17777776).is_ok());
    assert_eq!(
        PhysAddr::word(0o20000000),
        Err(BadPhysAddr::OutOfRange(0o20000000))
    );
    assert_eq!(PhysAddr::word(0o1001), Err(BadPhysAddr::Odd(0o1001)));
}

#[test]
fn test_split() {
    let a = PhysAddr::word(0o17777570).unwrap();
    assert_eq!(a.low(), 0o177570);
    assert_eq!(a.high(), 0o77);
    assert!(a.is_io_page());
}

#[test]
fn test_from_16bit() {
    assert_eq!(PhysAddr::from_16bit(0o1000).bits(), 0o1000);
    assert_eq!(PhysAddr::from_16bit(0o177570).bits(), 0o17777570);
}

#[test]
fn test_offset_wraps() {
    assert_eq!(PhysAddr::MAX.offset_words(0).bits(), 0o17777776);
    assert_eq!(PhysAddr::word(0o17777776).unwrap().offset_words(1).bits(), 0);
}
