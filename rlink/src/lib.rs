//! The `rlink` crate implements the remote command-batch protocol
//! used to control a w11 CPU (or any other target on the same kind of
//! link) from a host.
//!
//! Commands are collected into a [`CommandBatch`], optionally with
//! expectations about their replies, and executed as a single
//! request/reply exchange by a [`Connection`].  Attention from the
//! target (for example a CPU halting) is delivered either to a thread
//! waiting in an [`AttentionWaiter`] or, while an [`AttentionServer`]
//! runs, to registered handlers.
#![crate_name = "rlink"]

mod attention;
mod batch;
pub mod codec;
mod config;
mod connection;
mod operation;
mod server;
mod stats;
mod status;
mod tcp;
#[cfg(test)]
mod testing;
mod transport;

pub use attention::{ActivityFlag, AttentionSignal, AttentionWaiter, WaitOutcome};
pub use batch::{
    BatchError, BatchOutcome, Command, CommandBatch, ExecutionResult, Expectation,
    ExpectationFailure, ExpectationRecord, MAX_BLOCK_WORDS,
};
pub use codec::{CodecError, Reply, Response};
pub use config::LinkConfig;
pub use connection::{AttentionHandler, Connection, LinkError, LinkGuard};
pub use operation::{OpKind, Operation};
pub use server::AttentionServer;
pub use stats::LinkStats;
pub use status::Status;
pub use tcp::TcpTransport;
pub use transport::{Transport, TransportError};
