//! A transport which answers requests from a script, for unit tests.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::attention::AttentionSignal;
use super::codec::{self, Reply, Response};
use super::operation::Operation;
use super::status::Status;
use super::transport::{Transport, TransportError};

/// Produces the bytes to return for a request with the given tag and
/// operations.
pub(crate) type Responder =
    Box<dyn FnMut(u16, &[Operation]) -> Result<Vec<u8>, TransportError> + Send>;

pub(crate) struct ScriptedTransport {
    pub(crate) sent: Arc<Mutex<Vec<Vec<Operation>>>>,
    responder: Responder,
    pending: Option<Vec<u8>>,
    attention: Arc<AttentionSignal>,
}

impl ScriptedTransport {
    pub(crate) fn new(responder: Responder) -> ScriptedTransport {
        ScriptedTransport {
            sent: Arc::new(Mutex::new(Vec::new())),
            responder,
            pending: None,
            attention: Arc::new(AttentionSignal::new()),
        }
    }

    /// A transport which answers every operation with status `OK`,
    /// computing data words with `data`.
    pub(crate) fn answering<F>(mut data: F) -> ScriptedTransport
    where
        F: FnMut(&Operation) -> Response + Send + 'static,
    {
        ScriptedTransport::new(Box::new(move |tag, ops| {
            let replies: Vec<Reply> = ops
                .iter()
                .enumerate()
                .map(|(i, op)| Reply::to(i, op, data(op), Status::OK))
                .collect();
            codec::encode_reply(tag, &replies).map_err(|_| TransportError::Closed)
        }))
    }
}

/// The reply a well-behaved target would give, with the data words
/// taken from `value`.
pub(crate) fn plain_response(op: &Operation, value: u16) -> Response {
    match op {
        Operation::RegisterRead { .. }
        | Operation::LatchedReadback
        | Operation::AttentionQuery => Response::Data(value),
        Operation::BlockRead { count, .. } => Response::Block {
            words: vec![value; usize::from(*count)],
            done: *count,
        },
        Operation::BlockWrite { words, .. } => Response::Written {
            done: words.len() as u16,
        },
        Operation::RegisterWrite { .. } | Operation::ControlFunction { .. } => Response::Ack,
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let (tag, ops) = codec::decode_request(frame).map_err(|_| TransportError::Closed)?;
        self.pending = Some((self.responder)(tag, &ops)?);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(ops);
        }
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.pending.take().ok_or(TransportError::TimedOut)
    }

    fn attention(&self) -> Arc<AttentionSignal> {
        Arc::clone(&self.attention)
    }

    fn describe(&self) -> String {
        "script".to_string()
    }
}
