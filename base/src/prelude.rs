//! The prelude exports the types most users of the base crate need.
pub use super::addrmap::{AddressMap, MapEntry, MapError};
pub use super::number::{parse_u16, parse_u32};
pub use super::physaddr::{PhysAddr, IO_PAGE_16, IO_PAGE_22};
