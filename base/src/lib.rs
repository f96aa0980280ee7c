//! The `base` crate defines the things which are useful both to the
//! link protocol engine and to the w11 CPU layer built on top of it,
//! without tying them to either.  Tools which only need to name
//! addresses (for example a disassembler or a map printer) can depend
//! on this crate alone.

mod addrmap;
mod number;
mod physaddr;

pub mod prelude;

pub use addrmap::{AddressMap, MapEntry, MapError};
pub use number::{parse_u16, parse_u32, ParseNumberError};
pub use physaddr::{BadPhysAddr, PhysAddr, IO_PAGE_16, IO_PAGE_22};
