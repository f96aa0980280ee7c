//! Executing batches over a shared link.
//!
//! A [`Connection`] owns the transport.  Executing a batch takes the
//! link lock, sends the whole batch as one request frame, waits for
//! the reply frame and applies it; the lock is released on every exit
//! path, so batches from different threads never interleave on the
//! wire.  Holding a [`LinkGuard`] (from [`Connection::lock`]) lets a
//! caller run several batches, or update the common address map,
//! without other threads getting in between.
//!
//! Every exchange carries its own tag.  A reply which turns up after
//! its exchange timed out carries the old tag and is discarded when
//! it is found ahead of the reply actually awaited.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use base::prelude::*;
use tracing::{event, span, Level};

use super::attention::{relock, AttentionSignal, WaitOutcome};
use super::batch::{BatchError, BatchOutcome, CommandBatch, MAX_BLOCK_WORDS};
use super::codec::{self, CodecError};
use super::config::LinkConfig;
use super::stats::LinkStats;
use super::transport::{Transport, TransportError};

#[derive(Debug)]
pub enum LinkError {
    Transport(TransportError),
    /// The reply frame could not be decoded, or did not answer the
    /// request.
    Malformed(CodecError),
    /// Part of a reply arrived but the rest did not.
    ShortReply { expected: usize, received: usize },
    Batch(BatchError),
    Map(MapError),
    ServerAlreadyActive,
    ServerSpawn(io::Error),
}

impl Display for LinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            LinkError::Transport(e) => write!(f, "link transport failed: {e}"),
            LinkError::Malformed(e) => write!(f, "malformed reply: {e}"),
            LinkError::ShortReply { expected, received } => write!(
                f,
                "reply incomplete: received {received} of {expected} bytes"
            ),
            LinkError::Batch(e) => write!(f, "{e}"),
            LinkError::Map(e) => write!(f, "{e}"),
            LinkError::ServerAlreadyActive => f.write_str("attention server is already running"),
            LinkError::ServerSpawn(e) => write!(f, "failed to start attention server: {e}"),
        }
    }
}

impl Error for LinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LinkError::Transport(e) => Some(e),
            LinkError::Malformed(e) => Some(e),
            LinkError::Batch(e) => Some(e),
            LinkError::Map(e) => Some(e),
            LinkError::ServerSpawn(e) => Some(e),
            LinkError::ShortReply { .. } | LinkError::ServerAlreadyActive => None,
        }
    }
}

impl From<TransportError> for LinkError {
    fn from(e: TransportError) -> LinkError {
        LinkError::Transport(e)
    }
}

impl From<CodecError> for LinkError {
    fn from(e: CodecError) -> LinkError {
        LinkError::Malformed(e)
    }
}

impl From<BatchError> for LinkError {
    fn from(e: BatchError) -> LinkError {
        LinkError::Batch(e)
    }
}

impl From<MapError> for LinkError {
    fn from(e: MapError) -> LinkError {
        LinkError::Map(e)
    }
}

pub type AttentionHandler = Box<dyn Fn(u16) + Send + Sync>;

struct HandlerEntry {
    mask: u16,
    handler: AttentionHandler,
}

/// The state protected by the link lock.
struct Link {
    transport: Box<dyn Transport>,
    common_map: AddressMap,
    stats: LinkStats,
    /// The tag of the next exchange.
    next_tag: u16,
}

impl Link {
    fn execute(
        &mut self,
        config: &LinkConfig,
        batch: &mut CommandBatch,
    ) -> Result<BatchOutcome, LinkError> {
        if batch.is_empty() {
            return Ok(BatchOutcome {
                total: 0,
                failed: 0,
            });
        }
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        let span = span!(Level::DEBUG, "execute", operations = batch.len(), tag);
        let _enter = span.enter();

        batch.begin_execution();
        let request = codec::encode_request(tag, batch.operations())?;
        event!(Level::TRACE, "sending {} byte request", request.len());
        if let Err(e) = self.transport.send(&request) {
            self.stats.transport_errors += 1;
            event!(Level::ERROR, "failed to send request: {e}");
            return Err(e.into());
        }
        let expected = codec::reply_len(batch.operations());
        let reply = match self.receive_reply(tag, expected, config.reply_timeout()) {
            Ok(reply) => reply,
            Err(e) => {
                self.stats.transport_errors += 1;
                event!(Level::ERROR, "failed to receive reply: {e}");
                return Err(e);
            }
        };
        let replies = match codec::decode_reply(&reply, tag, batch.operations()) {
            Ok(replies) => replies,
            Err(e) => {
                self.stats.malformed_replies += 1;
                event!(Level::ERROR, "discarding reply: {e}");
                return Err(e.into());
            }
        };
        let outcome = batch.record_replies(replies);
        self.stats.batches += 1;
        self.stats.operations += batch.len() as u64;
        self.stats.expectation_failures += outcome.failed as u64;
        if !outcome.all_passed() {
            event!(Level::WARN, "{outcome}");
            for command in batch.iter() {
                if let Some(result) = command.result {
                    for failure in result.failures() {
                        event!(
                            Level::DEBUG,
                            "operation {} ({}): {failure}",
                            command.index,
                            command.operation
                        );
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Collect one reply frame for exchange `tag`.  Once the frame
    /// header is in, its declared length takes precedence over
    /// `expected` so that a reply of the wrong shape is reported as
    /// malformed rather than waited for.  Complete reply frames
    /// carrying another tag are dropped.
    fn receive_reply(
        &mut self,
        tag: u16,
        expected: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + timeout;
        let mut buf: Vec<u8> = Vec::with_capacity(expected);
        loop {
            if let (Some(found), Some(len)) = (codec::frame_tag(&buf), codec::frame_len(&buf)) {
                if buf[0] == codec::REPLY_MAGIC && found != tag && buf.len() >= len {
                    buf.drain(..len);
                    self.stats.stale_replies += 1;
                    event!(
                        Level::WARN,
                        "discarding late reply to exchange {found:#06x} ({len} bytes)"
                    );
                    continue;
                }
            }
            let wanted = codec::frame_len(&buf).unwrap_or(expected);
            if buf.len() >= wanted {
                return Ok(buf);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(incomplete(wanted, buf.len()));
            }
            match self.transport.receive(remaining) {
                Ok(bytes) => buf.extend_from_slice(&bytes),
                Err(TransportError::TimedOut) => return Err(incomplete(wanted, buf.len())),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn incomplete(expected: usize, received: usize) -> LinkError {
    if received == 0 {
        LinkError::Transport(TransportError::TimedOut)
    } else {
        LinkError::ShortReply { expected, received }
    }
}

/// Exclusive use of the link, obtained from [`Connection::lock`].
pub struct LinkGuard<'a> {
    link: MutexGuard<'a, Link>,
    config: &'a LinkConfig,
}

impl LinkGuard<'_> {
    pub fn execute(&mut self, batch: &mut CommandBatch) -> Result<BatchOutcome, LinkError> {
        self.link.execute(self.config, batch)
    }

    #[must_use]
    pub fn common_map(&self) -> &AddressMap {
        &self.link.common_map
    }

    pub fn common_map_mut(&mut self) -> &mut AddressMap {
        &mut self.link.common_map
    }
}

pub struct Connection {
    link: Mutex<Link>,
    attention: Arc<AttentionSignal>,
    config: LinkConfig,
    handlers: Mutex<Vec<HandlerEntry>>,
    server_active: AtomicBool,
    description: String,
}

impl Connection {
    /// Take over `transport`.  A block size outside
    /// `1..=MAX_BLOCK_WORDS` in `config` is brought into that range.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, mut config: LinkConfig) -> Connection {
        let block_size_max = config.block_size_max.clamp(1, MAX_BLOCK_WORDS);
        if block_size_max != config.block_size_max {
            event!(
                Level::WARN,
                "block_size_max {} is out of range, using {block_size_max}",
                config.block_size_max
            );
            config.block_size_max = block_size_max;
        }
        let attention = transport.attention();
        let description = transport.describe();
        event!(Level::INFO, "link connected to {description}");
        Connection {
            link: Mutex::new(Link {
                transport,
                common_map: AddressMap::new(),
                stats: LinkStats::default(),
                next_tag: 0,
            }),
            attention,
            config,
            handlers: Mutex::new(Vec::new()),
            server_active: AtomicBool::new(false),
            description,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    #[must_use]
    pub fn describe(&self) -> &str {
        &self.description
    }

    /// An empty batch sized for this link.
    #[must_use]
    pub fn new_batch(&self) -> CommandBatch {
        CommandBatch::new(self.config.block_size_max)
    }

    pub fn lock(&self) -> LinkGuard<'_> {
        LinkGuard {
            link: relock(self.link.lock()),
            config: &self.config,
        }
    }

    /// Execute `batch` as one exchange with the target.  An empty
    /// batch succeeds trivially without touching the link.
    pub fn execute(&self, batch: &mut CommandBatch) -> Result<BatchOutcome, LinkError> {
        if batch.is_empty() {
            return Ok(BatchOutcome {
                total: 0,
                failed: 0,
            });
        }
        self.lock().execute(batch)
    }

    #[must_use]
    pub fn attention_signal(&self) -> &AttentionSignal {
        &self.attention
    }

    /// Call `handler` with the attention pattern whenever the
    /// attention server sees a pattern overlapping `mask`.  Handlers
    /// run on the server thread and must not add further handlers.
    pub fn add_attention_handler(&self, mask: u16, handler: AttentionHandler) {
        relock(self.handlers.lock()).push(HandlerEntry { mask, handler });
    }

    /// Returns the number of handlers called.
    pub(crate) fn dispatch_attention(&self, pattern: u16) -> usize {
        let handlers = relock(self.handlers.lock());
        let mut called = 0;
        for entry in handlers.iter().filter(|e| e.mask & pattern != 0) {
            (entry.handler)(pattern);
            called += 1;
        }
        if called == 0 {
            event!(
                Level::WARN,
                "no handler for attention pattern {pattern:#06x}"
            );
        }
        relock(self.link.lock()).stats.attention_dispatches += 1;
        called
    }

    #[must_use]
    pub fn server_active(&self) -> bool {
        self.server_active.load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub(crate) fn set_server_active(&self, active: bool) -> bool {
        self.server_active.swap(active, Ordering::SeqCst)
    }

    pub(crate) fn note_attention_wait(&self, outcome: WaitOutcome) {
        let mut link = relock(self.link.lock());
        link.stats.attention_waits += 1;
        if !outcome.is_signaled() {
            link.stats.attention_timeouts += 1;
        }
    }

    /// Count an error detected by a user of the link.
    pub fn note_error(&self) {
        relock(self.link.lock()).stats.errors += 1;
    }

    #[must_use]
    pub fn stats(&self) -> LinkStats {
        relock(self.link.lock()).stats.clone()
    }
}

#[cfg(test)]
mod tests;
