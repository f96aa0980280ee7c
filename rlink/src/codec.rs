//! Wire format of request and reply frames.
//!
//! All multi-byte quantities are little-endian.  A request frame is
//!
//! ```text
//! A5 | tag:u16 | count:u16 | length:u16 | body[length] | crc:u16
//! ```
//!
//! where `tag` numbers the exchange, `count` is the number of
//! operations, `body` is the concatenation of the encoded operations
//! and the CRC (CRC-16/CCITT-FALSE) covers everything from the magic
//! byte to the end of the body.  A reply frame has the same header
//! with magic `5A` and echoes the tag of the request it answers, so a
//! reply which arrives after its exchange was given up on cannot be
//! taken for the answer to a later request of the same shape.
//!
//! Each encoded operation starts with a command byte holding the
//! operation's sequence number (its position in the batch, modulo
//! 32) in bits 7..3 and its opcode in bits 2..0; the reply to an
//! operation echoes that byte.
//!
//! | Operation        | Request fields                 | Reply fields                            |
//! | ---------------- | ------------------------------ | --------------------------------------- |
//! | RegisterRead     | addr                           | data, status                            |
//! | BlockRead        | addr, count                    | count, data\[count\], done, status      |
//! | RegisterWrite    | addr, data                     | status                                  |
//! | BlockWrite       | addr, count, data\[count\]     | done, status                            |
//! | LatchedReadback  |                                | data, status                            |
//! | AttentionQuery   |                                | data, status                            |
//! | ControlFunction  | addr, function                 | status                                  |
//!
//! Every field is a u16 apart from `status`, which is a single byte.
//! A block read reply always carries `count` data words; only the
//! first `done` of them are meaningful.
//!
//! The target may also send, between frames, a three byte attention
//! notice: `A7 | pattern:u16`.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use super::operation::{OpKind, Operation};
use super::status::Status;

pub const REQUEST_MAGIC: u8 = 0xA5;
pub const REPLY_MAGIC: u8 = 0x5A;
pub const ATTENTION_MAGIC: u8 = 0xA7;

pub const HEADER_LEN: usize = 7;
pub const CRC_LEN: usize = 2;
pub const ATTENTION_NOTICE_LEN: usize = 3;

/// The largest number of operations a single frame can describe.
pub const MAX_OPERATIONS: usize = u16::MAX as usize;

/// The largest frame body the length field can describe.
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Truncated {
        needed: usize,
        have: usize,
    },
    BadMagic(u8),
    BadCrc {
        computed: u16,
        received: u16,
    },
    LengthMismatch {
        declared: usize,
        actual: usize,
    },
    UnknownOpcode(u8),
    /// The command byte at `position` was not the one expected there.
    UnexpectedCommand {
        position: usize,
        expected: u8,
        found: u8,
    },
    CountMismatch {
        expected: usize,
        found: usize,
    },
    /// A block read reply announced a different word count than was
    /// requested.
    BlockCountMismatch {
        position: usize,
        requested: u16,
        returned: u16,
    },
    TrailingBytes(usize),
    FrameTooLong(usize),
    /// The reply answers a different exchange.
    TagMismatch {
        expected: u16,
        found: u16,
    },
    /// The reply does not have the shape of the request it answers.
    ReplyShape {
        position: usize,
        kind: OpKind,
    },
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            CodecError::Truncated { needed, have } => {
                write!(f, "frame truncated: needed {needed} bytes, have {have}")
            }
            CodecError::BadMagic(b) => write!(f, "unexpected frame start byte {b:#04x}"),
            CodecError::BadCrc { computed, received } => write!(
                f,
                "CRC mismatch: computed {computed:#06x}, received {received:#06x}"
            ),
            CodecError::LengthMismatch { declared, actual } => write!(
                f,
                "frame declares a body of {declared} bytes but carries {actual}"
            ),
            CodecError::UnknownOpcode(op) => write!(f, "unknown opcode {op}"),
            CodecError::UnexpectedCommand {
                position,
                expected,
                found,
            } => write!(
                f,
                "operation {position}: expected command byte {expected:#04x}, found {found:#04x}"
            ),
            CodecError::CountMismatch { expected, found } => write!(
                f,
                "frame describes {found} operations but {expected} were expected"
            ),
            CodecError::BlockCountMismatch {
                position,
                requested,
                returned,
            } => write!(
                f,
                "operation {position}: block of {requested} words requested, reply announces {returned}"
            ),
            CodecError::TrailingBytes(n) => write!(f, "{n} unexpected bytes after the last operation"),
            CodecError::FrameTooLong(n) => {
                write!(f, "frame body of {n} bytes is too long to encode")
            }
            CodecError::TagMismatch { expected, found } => write!(
                f,
                "reply belongs to exchange {found:#06x}, expected {expected:#06x}"
            ),
            CodecError::ReplyShape { position, kind } => {
                write!(f, "operation {position}: reply does not fit a {kind} request")
            }
        }
    }
}

impl Error for CodecError {}

const fn make_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u16; 256] = make_crc_table();

/// CRC-16/CCITT-FALSE (polynomial 0x1021, initial value 0xFFFF).
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0xffff_u16, |crc, b| {
        let index = usize::from(((crc >> 8) as u8) ^ b);
        (crc << 8) ^ CRC_TABLE[index]
    })
}

/// The command byte of the operation at `position` in a batch.
#[must_use]
pub const fn command_byte(position: usize, kind: OpKind) -> u8 {
    (((position & 0x1f) as u8) << 3) | kind.opcode()
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        match self.bytes.get(self.pos) {
            Some(b) => {
                self.pos += 1;
                Ok(*b)
            }
            None => Err(CodecError::Truncated {
                needed: self.pos + 1,
                have: self.bytes.len(),
            }),
        }
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let lo = self.u8()?;
        let hi = self.u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn words(&mut self, n: usize) -> Result<Vec<u16>, CodecError> {
        if self.remaining() < n * 2 {
            return Err(CodecError::Truncated {
                needed: self.pos + n * 2,
                have: self.bytes.len(),
            });
        }
        (0..n).map(|_| self.u16()).collect()
    }
}

fn frame(magic: u8, tag: u16, count: usize, body: &[u8]) -> Result<Vec<u8>, CodecError> {
    if count > MAX_OPERATIONS {
        return Err(CodecError::FrameTooLong(count));
    }
    let length = u16::try_from(body.len()).map_err(|_| CodecError::FrameTooLong(body.len()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len() + CRC_LEN);
    out.push(magic);
    put_u16(&mut out, tag);
    put_u16(&mut out, count as u16);
    put_u16(&mut out, length);
    out.extend_from_slice(body);
    let crc = crc16(&out);
    put_u16(&mut out, crc);
    Ok(out)
}

/// Check the framing of `bytes` and return the tag, the operation
/// count and the body.
fn unframe(magic: u8, bytes: &[u8]) -> Result<(u16, usize, &[u8]), CodecError> {
    let mut header = Reader::new(bytes);
    let found = header.u8()?;
    if found != magic {
        return Err(CodecError::BadMagic(found));
    }
    let tag = header.u16()?;
    let count = usize::from(header.u16()?);
    let length = usize::from(header.u16()?);
    let total = HEADER_LEN + length + CRC_LEN;
    if bytes.len() < total {
        return Err(CodecError::Truncated {
            needed: total,
            have: bytes.len(),
        });
    }
    if bytes.len() > total {
        return Err(CodecError::LengthMismatch {
            declared: length,
            actual: bytes.len() - HEADER_LEN - CRC_LEN,
        });
    }
    let covered = &bytes[..HEADER_LEN + length];
    let received = u16::from_le_bytes([bytes[total - 2], bytes[total - 1]]);
    let computed = crc16(covered);
    if computed != received {
        return Err(CodecError::BadCrc { computed, received });
    }
    Ok((tag, count, &bytes[HEADER_LEN..HEADER_LEN + length]))
}

/// The total frame length announced by a frame header, if `header`
/// holds at least [`HEADER_LEN`] bytes.
#[must_use]
pub fn frame_len(header: &[u8]) -> Option<usize> {
    match header {
        [_, _, _, _, _, lo, hi, ..] => {
            Some(HEADER_LEN + usize::from(u16::from_le_bytes([*lo, *hi])) + CRC_LEN)
        }
        _ => None,
    }
}

/// The exchange tag in a frame header.
#[must_use]
pub fn frame_tag(header: &[u8]) -> Option<u16> {
    match header {
        [_, lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

/// The number of body bytes `op` occupies in a request frame.
#[must_use]
pub fn request_body_len(op: &Operation) -> usize {
    1 + match op {
        Operation::RegisterRead { .. } => 2,
        Operation::RegisterWrite { .. }
        | Operation::BlockRead { .. }
        | Operation::ControlFunction { .. } => 4,
        Operation::BlockWrite { words, .. } => 4 + 2 * words.len(),
        Operation::LatchedReadback | Operation::AttentionQuery => 0,
    }
}

/// The number of body bytes the reply to `op` occupies in a reply
/// frame.
#[must_use]
pub fn reply_body_len(op: &Operation) -> usize {
    1 + match op {
        Operation::RegisterRead { .. } | Operation::LatchedReadback | Operation::AttentionQuery => {
            2 + 1
        }
        Operation::BlockRead { count, .. } => 2 + 2 * usize::from(*count) + 2 + 1,
        Operation::BlockWrite { .. } => 2 + 1,
        Operation::RegisterWrite { .. } | Operation::ControlFunction { .. } => 1,
    }
}

pub fn encode_request(tag: u16, ops: &[Operation]) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    for (position, op) in ops.iter().enumerate() {
        body.push(command_byte(position, op.kind()));
        match op {
            Operation::RegisterRead { address } => put_u16(&mut body, *address),
            Operation::RegisterWrite { address, data } => {
                put_u16(&mut body, *address);
                put_u16(&mut body, *data);
            }
            Operation::BlockRead { address, count } => {
                put_u16(&mut body, *address);
                put_u16(&mut body, *count);
            }
            Operation::BlockWrite { address, words } => {
                let count =
                    u16::try_from(words.len()).map_err(|_| CodecError::FrameTooLong(words.len()))?;
                put_u16(&mut body, *address);
                put_u16(&mut body, count);
                for w in words {
                    put_u16(&mut body, *w);
                }
            }
            Operation::LatchedReadback | Operation::AttentionQuery => (),
            Operation::ControlFunction { address, function } => {
                put_u16(&mut body, *address);
                put_u16(&mut body, *function);
            }
        }
    }
    frame(REQUEST_MAGIC, tag, ops.len(), &body)
}

fn check_command(position: usize, found: u8) -> Result<OpKind, CodecError> {
    let kind = OpKind::from_opcode(found & 0x07).ok_or(CodecError::UnknownOpcode(found & 0x07))?;
    let expected = command_byte(position, kind);
    if found == expected {
        Ok(kind)
    } else {
        Err(CodecError::UnexpectedCommand {
            position,
            expected,
            found,
        })
    }
}

/// Decode a request frame into its tag and operations.
pub fn decode_request(bytes: &[u8]) -> Result<(u16, Vec<Operation>), CodecError> {
    let (tag, count, body) = unframe(REQUEST_MAGIC, bytes)?;
    let mut r = Reader::new(body);
    let mut ops = Vec::with_capacity(count);
    for position in 0..count {
        let op = match check_command(position, r.u8()?)? {
            OpKind::RegisterRead => Operation::RegisterRead { address: r.u16()? },
            OpKind::RegisterWrite => Operation::RegisterWrite {
                address: r.u16()?,
                data: r.u16()?,
            },
            OpKind::BlockRead => Operation::BlockRead {
                address: r.u16()?,
                count: r.u16()?,
            },
            OpKind::BlockWrite => {
                let address = r.u16()?;
                let n = usize::from(r.u16()?);
                Operation::BlockWrite {
                    address,
                    words: r.words(n)?,
                }
            }
            OpKind::LatchedReadback => Operation::LatchedReadback,
            OpKind::AttentionQuery => Operation::AttentionQuery,
            OpKind::ControlFunction => Operation::ControlFunction {
                address: r.u16()?,
                function: r.u16()?,
            },
        };
        ops.push(op);
    }
    match r.remaining() {
        0 => Ok((tag, ops)),
        n => Err(CodecError::TrailingBytes(n)),
    }
}

/// What the target returned for one operation, apart from its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Reply to a register read, latched readback or attention query.
    Data(u16),
    /// Reply to a block read.  `words` holds as many words as were
    /// requested, of which the first `done` are valid.
    Block { words: Vec<u16>, done: u16 },
    /// Reply to a block write: the number of words accepted.
    Written { done: u16 },
    /// Reply to a register write or control function.
    Ack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub command: u8,
    pub response: Response,
    pub status: Status,
}

impl Reply {
    /// Build the reply to the operation at `position`.
    #[must_use]
    pub fn to(position: usize, op: &Operation, response: Response, status: Status) -> Reply {
        Reply {
            command: command_byte(position, op.kind()),
            response,
            status,
        }
    }
}

/// The exact length of the reply frame answering `ops`.
#[must_use]
pub fn reply_len(ops: &[Operation]) -> usize {
    let body: usize = ops.iter().map(reply_body_len).sum();
    HEADER_LEN + body + CRC_LEN
}

pub fn encode_reply(tag: u16, replies: &[Reply]) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    for reply in replies {
        body.push(reply.command);
        match &reply.response {
            Response::Data(data) => put_u16(&mut body, *data),
            Response::Block { words, done } => {
                let count =
                    u16::try_from(words.len()).map_err(|_| CodecError::FrameTooLong(words.len()))?;
                put_u16(&mut body, count);
                for w in words {
                    put_u16(&mut body, *w);
                }
                put_u16(&mut body, *done);
            }
            Response::Written { done } => put_u16(&mut body, *done),
            Response::Ack => (),
        }
        body.push(reply.status.bits());
    }
    frame(REPLY_MAGIC, tag, replies.len(), &body)
}

/// Decode the reply frame answering the request `ops` sent with
/// `tag`.  The frame must answer every operation, in order, with the
/// shape that operation calls for.
pub fn decode_reply(bytes: &[u8], tag: u16, ops: &[Operation]) -> Result<Vec<Reply>, CodecError> {
    let (found, count, body) = unframe(REPLY_MAGIC, bytes)?;
    if found != tag {
        return Err(CodecError::TagMismatch {
            expected: tag,
            found,
        });
    }
    if count != ops.len() {
        return Err(CodecError::CountMismatch {
            expected: ops.len(),
            found: count,
        });
    }
    let mut r = Reader::new(body);
    let mut replies = Vec::with_capacity(count);
    for (position, op) in ops.iter().enumerate() {
        let expected = command_byte(position, op.kind());
        let found = r.u8()?;
        if found != expected {
            return Err(CodecError::UnexpectedCommand {
                position,
                expected,
                found,
            });
        }
        let response = match op {
            Operation::RegisterRead { .. }
            | Operation::LatchedReadback
            | Operation::AttentionQuery => Response::Data(r.u16()?),
            Operation::BlockRead { count, .. } => {
                let returned = r.u16()?;
                if returned != *count {
                    return Err(CodecError::BlockCountMismatch {
                        position,
                        requested: *count,
                        returned,
                    });
                }
                let words = r.words(usize::from(returned))?;
                let done = r.u16()?;
                if done > returned {
                    return Err(CodecError::ReplyShape {
                        position,
                        kind: op.kind(),
                    });
                }
                Response::Block { words, done }
            }
            Operation::BlockWrite { words, .. } => {
                let done = r.u16()?;
                if usize::from(done) > words.len() {
                    return Err(CodecError::ReplyShape {
                        position,
                        kind: op.kind(),
                    });
                }
                Response::Written { done }
            }
            Operation::RegisterWrite { .. } | Operation::ControlFunction { .. } => Response::Ack,
        };
        let status = Status::new(r.u8()?);
        replies.push(Reply {
            command: found,
            response,
            status,
        });
    }
    match r.remaining() {
        0 => Ok(replies),
        n => Err(CodecError::TrailingBytes(n)),
    }
}

#[must_use]
pub fn encode_attention(pattern: u16) -> [u8; ATTENTION_NOTICE_LEN] {
    let [lo, hi] = pattern.to_le_bytes();
    [ATTENTION_MAGIC, lo, hi]
}

#[cfg(test)]
mod tests;
