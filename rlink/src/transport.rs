//! The byte-level channel to the target.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use super::attention::AttentionSignal;

#[derive(Debug)]
pub enum TransportError {
    /// Nothing arrived within the allowed time.
    TimedOut,
    /// The other end has gone away.
    Closed,
    Io(io::Error),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            TransportError::TimedOut => f.write_str("timed out waiting for the target"),
            TransportError::Closed => f.write_str("connection to the target is closed"),
            TransportError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> TransportError {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::TimedOut,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportError::Closed,
            _ => TransportError::Io(e),
        }
    }
}

/// Something which carries request frames to the target and reply
/// frames back.
///
/// Attention notices from the target are not returned by `receive`;
/// instead the transport raises the [`AttentionSignal`] it hands out
/// from `attention`.
pub trait Transport: Send {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Return the next bytes received, waiting at most `timeout`.
    /// The bytes returned may be all or part of a reply frame.
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    fn attention(&self) -> Arc<AttentionSignal>;

    /// A short description for log messages.
    fn describe(&self) -> String;
}
