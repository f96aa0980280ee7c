use std::error::Error;
use std::fmt::{self, Display, Formatter};

use base::prelude::*;
use rlink::{BatchError, LinkError, Status};

use super::loader::LoadError;

#[derive(Debug)]
pub enum CpuError {
    Link(LinkError),
    Batch(BatchError),
    Map(MapError),
    /// An address which is out of range, odd, or otherwise unusable
    /// for the access requested.
    BadAddress(String),
    BadRegister(u8),
    /// A symbolic address for which no mapping exists.
    UnknownName(String),
    UnknownUnit(String),
    UnknownController(String),
    ControllerExists(String),
    /// The CPU refused a control function.
    ControlRejected {
        function: &'static str,
        status: Status,
    },
    /// A memory access did not complete.
    MemoryAccess {
        address: u32,
        requested: usize,
        done: usize,
        status: Status,
    },
    /// A register access reported a fault or failed its checks.
    AccessFailed { operation: String, status: Status },
    Load(LoadError),
}

impl Display for CpuError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            CpuError::Link(e) => write!(f, "{e}"),
            CpuError::Batch(e) => write!(f, "{e}"),
            CpuError::Map(e) => write!(f, "{e}"),
            CpuError::BadAddress(msg) => write!(f, "bad address: {msg}"),
            CpuError::BadRegister(n) => write!(f, "there is no register R{n}"),
            CpuError::UnknownName(name) => write!(f, "no address mapping known for '{name}'"),
            CpuError::UnknownUnit(name) => write!(f, "unknown unit '{name}'"),
            CpuError::UnknownController(name) => write!(f, "unknown controller '{name}'"),
            CpuError::ControllerExists(name) => write!(f, "controller '{name}' already exists"),
            CpuError::ControlRejected { function, status } => {
                write!(f, "CPU rejected {function} (status {status})")
            }
            CpuError::MemoryAccess {
                address,
                requested,
                done,
                status,
            } => write!(
                f,
                "memory access at {address:o} failed after {done} of {requested} words (status {status})"
            ),
            CpuError::AccessFailed { operation, status } => {
                write!(f, "{operation} failed (status {status})")
            }
            CpuError::Load(e) => write!(f, "{e}"),
        }
    }
}

impl Error for CpuError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CpuError::Link(e) => Some(e),
            CpuError::Batch(e) => Some(e),
            CpuError::Map(e) => Some(e),
            CpuError::Load(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LinkError> for CpuError {
    fn from(e: LinkError) -> CpuError {
        CpuError::Link(e)
    }
}

impl From<BatchError> for CpuError {
    fn from(e: BatchError) -> CpuError {
        CpuError::Batch(e)
    }
}

impl From<MapError> for CpuError {
    fn from(e: MapError) -> CpuError {
        CpuError::Map(e)
    }
}

impl From<LoadError> for CpuError {
    fn from(e: LoadError) -> CpuError {
        CpuError::Load(e)
    }
}
