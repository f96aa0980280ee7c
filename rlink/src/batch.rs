//! Command batches and expectations.
//!
//! A [`CommandBatch`] is an ordered list of operations which is sent
//! to the target as a single request frame.  Each operation can carry
//! an [`Expectation`] describing what its reply should look like; after
//! execution each operation has an [`ExecutionResult`] recording what
//! was actually returned and which expectations failed.
//!
//! Expectations can only be attached to the most recently added
//! operation, and only when they fit its shape (data checks on
//! operations which return a data word, block checks on block reads,
//! completion counts on block transfers).  Once a batch has been sent
//! it is sealed: it can be executed again (which overwrites the
//! previous results) but not extended until it is cleared.
//!
//! A batch never grows beyond what one request frame and its reply
//! frame can carry; an operation which would not fit is refused when
//! it is added.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::ops::Index;

use super::codec::{self, Reply, Response, MAX_BODY_LEN, MAX_OPERATIONS};
use super::operation::Operation;
use super::status::Status;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// A block operation with a bad size, or too many operations.
    InvalidArgument(String),
    /// An expectation was aimed at an operation it cannot apply to.
    InvalidTarget(String),
    /// The batch has been sent and can no longer be extended.
    Sealed,
}

impl Display for BatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            BatchError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            BatchError::InvalidTarget(msg) => write!(f, "invalid expectation target: {msg}"),
            BatchError::Sealed => f.write_str("batch has already been sent; clear it first"),
        }
    }
}

impl Error for BatchError {}

/// The largest block a batch accepts, whatever block size it was
/// created with.  A block of this size still leaves room in its frame
/// for the address latch writes which usually accompany it.
pub const MAX_BLOCK_WORDS: usize = 32_000;

/// An expectation to attach to the most recent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectationRecord {
    /// The data word, compared under `mask`.
    Data { value: u16, mask: u16 },
    /// The words of a block read.  `masks` is either empty (compare
    /// every bit) or one mask per value.
    Block { values: Vec<u16>, masks: Vec<u16> },
    /// The completion count of a block transfer.
    CompletionCount(u16),
    /// The status byte, compared under `mask`.  Setting this replaces
    /// the default check that none of the fault flags are set.
    Status { value: u8, mask: u8 },
}

/// The checks to apply to the reply of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectation {
    data: Option<(u16, u16)>,
    block: Option<(Vec<u16>, Vec<u16>)>,
    done: Option<u16>,
    status: Option<(u8, u8)>,
}

impl Expectation {
    #[must_use]
    pub fn data(&self) -> Option<(u16, u16)> {
        self.data
    }

    #[must_use]
    pub fn block(&self) -> Option<(&[u16], &[u16])> {
        self.block
            .as_ref()
            .map(|(values, masks)| (values.as_slice(), masks.as_slice()))
    }

    #[must_use]
    pub fn completion_count(&self) -> Option<u16> {
        self.done
    }

    #[must_use]
    pub fn status(&self) -> Option<(u8, u8)> {
        self.status
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Expectation::default()
    }
}

/// One way in which a reply did not meet its expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectationFailure {
    Status {
        expected: u8,
        mask: u8,
        actual: Status,
    },
    Data {
        expected: u16,
        mask: u16,
        actual: u16,
    },
    BlockWord {
        offset: usize,
        expected: u16,
        mask: u16,
        actual: u16,
    },
    CompletionCount {
        expected: u16,
        actual: u16,
    },
}

impl Display for ExpectationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ExpectationFailure::Status {
                expected,
                mask,
                actual,
            } => write!(
                f,
                "status {:08b} (mask {mask:08b}) expected {expected:08b}",
                actual.bits()
            ),
            ExpectationFailure::Data {
                expected,
                mask,
                actual,
            } => write!(
                f,
                "data {actual:06o} (mask {mask:06o}) expected {expected:06o}"
            ),
            ExpectationFailure::BlockWord {
                offset,
                expected,
                mask,
                actual,
            } => write!(
                f,
                "block word {offset}: {actual:06o} (mask {mask:06o}) expected {expected:06o}"
            ),
            ExpectationFailure::CompletionCount { expected, actual } => {
                write!(f, "completed {actual} words, expected {expected}")
            }
        }
    }
}

/// What came back for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    status: Status,
    data: Option<u16>,
    block: Vec<u16>,
    done: Option<u16>,
    failures: Vec<ExpectationFailure>,
}

impl ExecutionResult {
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// The data word of a register read, latched readback or
    /// attention query; zero for other operations.
    #[must_use]
    pub fn data(&self) -> u16 {
        self.data.unwrap_or(0)
    }

    /// The valid words of a block read: exactly as many as the
    /// target reported completing.
    #[must_use]
    pub fn block(&self) -> &[u16] {
        &self.block
    }

    /// The completion count of a block transfer.
    #[must_use]
    pub fn done(&self) -> Option<u16> {
        self.done
    }

    #[must_use]
    pub fn failures(&self) -> &[ExpectationFailure] {
        &self.failures
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The overall result of executing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub total: usize,
    pub failed: usize,
}

impl BatchOutcome {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl Display for BatchOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{} of {} operations failed expectation",
            self.failed, self.total
        )
    }
}

/// A read-only view of one operation of a batch.
#[derive(Debug, Clone, Copy)]
pub struct Command<'a> {
    pub index: usize,
    pub operation: &'a Operation,
    pub expectation: &'a Expectation,
    pub result: Option<&'a ExecutionResult>,
}

#[derive(Debug, Clone)]
pub struct CommandBatch {
    ops: Vec<Operation>,
    expectations: Vec<Expectation>,
    results: Vec<Option<ExecutionResult>>,
    block_size_max: usize,
    /// Body bytes of the request frame so far.
    request_len: usize,
    /// Body bytes of the reply frame so far.
    reply_len: usize,
    sealed: bool,
}

impl CommandBatch {
    /// Create an empty batch whose block operations may transfer at
    /// most `block_size_max` words.  The limit is kept within
    /// `1..=MAX_BLOCK_WORDS`.
    #[must_use]
    pub fn new(block_size_max: usize) -> CommandBatch {
        CommandBatch {
            ops: Vec::new(),
            expectations: Vec::new(),
            results: Vec::new(),
            block_size_max: block_size_max.clamp(1, MAX_BLOCK_WORDS),
            request_len: 0,
            reply_len: 0,
            sealed: false,
        }
    }

    #[must_use]
    pub fn block_size_max(&self) -> usize {
        self.block_size_max
    }

    fn push(&mut self, op: Operation) -> Result<usize, BatchError> {
        if self.sealed {
            return Err(BatchError::Sealed);
        }
        if self.ops.len() >= MAX_OPERATIONS {
            return Err(BatchError::InvalidArgument(format!(
                "a batch holds at most {MAX_OPERATIONS} operations"
            )));
        }
        let request_len = self.request_len + codec::request_body_len(&op);
        let reply_len = self.reply_len + codec::reply_body_len(&op);
        if request_len > MAX_BODY_LEN || reply_len > MAX_BODY_LEN {
            return Err(BatchError::InvalidArgument(format!(
                "{op} does not fit in the frame ({request_len} request and \
                 {reply_len} reply bytes, at most {MAX_BODY_LEN})"
            )));
        }
        self.request_len = request_len;
        self.reply_len = reply_len;
        self.ops.push(op);
        self.expectations.push(Expectation::default());
        self.results.push(None);
        Ok(self.ops.len() - 1)
    }

    fn check_block_size(&self, size: usize) -> Result<(), BatchError> {
        if size == 0 || size > self.block_size_max {
            Err(BatchError::InvalidArgument(format!(
                "block size {size} is not in the range 1..={}",
                self.block_size_max
            )))
        } else {
            Ok(())
        }
    }

    pub fn add_register_read(&mut self, address: u16) -> Result<usize, BatchError> {
        self.push(Operation::RegisterRead { address })
    }

    pub fn add_register_write(&mut self, address: u16, data: u16) -> Result<usize, BatchError> {
        self.push(Operation::RegisterWrite { address, data })
    }

    pub fn add_block_read(&mut self, address: u16, count: usize) -> Result<usize, BatchError> {
        self.check_block_size(count)?;
        let count = u16::try_from(count)
            .map_err(|_| BatchError::InvalidArgument(format!("block size {count} is too large")))?;
        self.push(Operation::BlockRead { address, count })
    }

    pub fn add_block_write(&mut self, address: u16, words: Vec<u16>) -> Result<usize, BatchError> {
        self.check_block_size(words.len())?;
        if u16::try_from(words.len()).is_err() {
            return Err(BatchError::InvalidArgument(format!(
                "block size {} is too large",
                words.len()
            )));
        }
        self.push(Operation::BlockWrite { address, words })
    }

    pub fn add_latched_readback(&mut self) -> Result<usize, BatchError> {
        self.push(Operation::LatchedReadback)
    }

    pub fn add_attention_query(&mut self) -> Result<usize, BatchError> {
        self.push(Operation::AttentionQuery)
    }

    pub fn add_control_function(&mut self, address: u16, function: u16) -> Result<usize, BatchError> {
        self.push(Operation::ControlFunction { address, function })
    }

    /// Attach `record` to the operation at `index`, which must be the
    /// most recently added one.  A record of the same kind already
    /// attached there is replaced.
    pub fn set_expectation(
        &mut self,
        index: usize,
        record: ExpectationRecord,
    ) -> Result<(), BatchError> {
        if self.sealed {
            return Err(BatchError::Sealed);
        }
        let last = match self.ops.len().checked_sub(1) {
            Some(last) => last,
            None => {
                return Err(BatchError::InvalidTarget(
                    "the batch has no operations".to_string(),
                ))
            }
        };
        if index != last {
            return Err(BatchError::InvalidTarget(format!(
                "operation {index} is not the most recent one ({last})"
            )));
        }
        let op = &self.ops[last];
        let kind = op.kind();
        let expectation = &mut self.expectations[last];
        match record {
            ExpectationRecord::Data { value, mask } => {
                if !kind.returns_data() {
                    return Err(BatchError::InvalidTarget(format!(
                        "a {kind} operation returns no data word"
                    )));
                }
                expectation.data = Some((value, mask));
            }
            ExpectationRecord::Block { values, masks } => {
                let requested = match op {
                    Operation::BlockRead { count, .. } => usize::from(*count),
                    _ => {
                        return Err(BatchError::InvalidTarget(format!(
                            "block expectations need a block read, not {kind}"
                        )))
                    }
                };
                if values.len() != requested {
                    return Err(BatchError::InvalidTarget(format!(
                        "{} expected values for a read of {requested} words",
                        values.len()
                    )));
                }
                if !masks.is_empty() && masks.len() != values.len() {
                    return Err(BatchError::InvalidTarget(format!(
                        "{} masks for {} values",
                        masks.len(),
                        values.len()
                    )));
                }
                expectation.block = Some((values, masks));
            }
            ExpectationRecord::CompletionCount(done) => {
                if !kind.is_block() {
                    return Err(BatchError::InvalidTarget(format!(
                        "a {kind} operation has no completion count"
                    )));
                }
                expectation.done = Some(done);
            }
            ExpectationRecord::Status { value, mask } => {
                expectation.status = Some((value, mask));
            }
        }
        Ok(())
    }

    /// Attach `record` to the most recently added operation.
    pub fn expect_last(&mut self, record: ExpectationRecord) -> Result<(), BatchError> {
        let index = self.ops.len().saturating_sub(1);
        self.set_expectation(index, record)
    }

    /// Whether a block transfer of `words` words, in either
    /// direction, can still be added.
    #[must_use]
    pub fn has_room_for_block(&self, words: usize) -> bool {
        let read = Operation::BlockRead {
            address: 0,
            count: u16::try_from(words).unwrap_or(u16::MAX),
        };
        let write_request = codec::request_body_len(&read) + 2 * words;
        !self.sealed
            && words <= self.block_size_max
            && self.ops.len() < MAX_OPERATIONS
            && self.request_len + write_request <= MAX_BODY_LEN
            && self.reply_len + codec::reply_body_len(&read) <= MAX_BODY_LEN
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Command<'_>> {
        let operation = self.ops.get(index)?;
        Some(Command {
            index,
            operation,
            expectation: &self.expectations[index],
            result: self.results[index].as_ref(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Command<'_>> + '_ {
        (0..self.ops.len()).filter_map(|i| self.get(i))
    }

    /// The result of the operation at `index`, once executed.
    #[must_use]
    pub fn result(&self, index: usize) -> Option<&ExecutionResult> {
        self.results.get(index).and_then(Option::as_ref)
    }

    /// The number of executed operations which failed an expectation.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .flatten()
            .filter(|r| !r.passed())
            .count()
    }

    /// Remove all operations, making the batch extensible again.
    pub fn clear(&mut self) {
        self.ops.clear();
        self.expectations.clear();
        self.results.clear();
        self.request_len = 0;
        self.reply_len = 0;
        self.sealed = false;
    }

    /// Seal the batch and forget the results of any earlier execution.
    pub(crate) fn begin_execution(&mut self) {
        self.sealed = true;
        for r in self.results.iter_mut() {
            *r = None;
        }
    }

    /// Apply the decoded replies (one per operation, in order) and
    /// return the outcome.
    pub(crate) fn record_replies(&mut self, replies: Vec<Reply>) -> BatchOutcome {
        for ((reply, expectation), slot) in replies
            .into_iter()
            .zip(self.expectations.iter())
            .zip(self.results.iter_mut())
        {
            *slot = Some(evaluate(expectation, reply));
        }
        BatchOutcome {
            total: self.ops.len(),
            failed: self.failed_count(),
        }
    }
}

impl Index<usize> for CommandBatch {
    type Output = Operation;

    fn index(&self, index: usize) -> &Operation {
        &self.ops[index]
    }
}

/// One line per operation with its result, the words of block reads
/// eight to a line, and one indented line per failed expectation.
impl Display for CommandBatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        for command in self.iter() {
            let op = command.operation.to_string();
            write!(f, "{:4} {op:<20}", command.index)?;
            let result = match command.result {
                Some(result) => result,
                None => {
                    writeln!(f, " -")?;
                    continue;
                }
            };
            if let Some(data) = result.data {
                write!(f, " d={data:06o}")?;
            }
            if let Some(done) = result.done {
                write!(f, " n={done}")?;
            }
            writeln!(
                f,
                " s={} {}",
                result.status,
                if result.passed() { "OK" } else { "FAIL" }
            )?;
            for (row, words) in result.block.chunks(8).enumerate() {
                write!(f, "       {:5}:", row * 8)?;
                for w in words {
                    write!(f, " {w:06o}")?;
                }
                writeln!(f)?;
            }
            for failure in &result.failures {
                writeln!(f, "       FAIL {failure}")?;
            }
        }
        Ok(())
    }
}

fn evaluate(expectation: &Expectation, reply: Reply) -> ExecutionResult {
    let mut result = ExecutionResult {
        status: reply.status,
        ..ExecutionResult::default()
    };
    let (status_value, status_mask) = expectation.status.unwrap_or((0, Status::FAULTS));
    if !reply.status.matches(status_value, status_mask) {
        result.failures.push(ExpectationFailure::Status {
            expected: status_value,
            mask: status_mask,
            actual: reply.status,
        });
    }
    match reply.response {
        Response::Data(data) => {
            result.data = Some(data);
            if let Some((expected, mask)) = expectation.data {
                if data & mask != expected & mask {
                    result.failures.push(ExpectationFailure::Data {
                        expected,
                        mask,
                        actual: data,
                    });
                }
            }
        }
        Response::Block { mut words, done } => {
            words.truncate(usize::from(done));
            if let Some((values, masks)) = &expectation.block {
                for (offset, (actual, expected)) in words.iter().zip(values.iter()).enumerate() {
                    let mask = masks.get(offset).copied().unwrap_or(0xffff);
                    if actual & mask != expected & mask {
                        result.failures.push(ExpectationFailure::BlockWord {
                            offset,
                            expected: *expected,
                            mask,
                            actual: *actual,
                        });
                    }
                }
            }
            result.block = words;
            result.done = Some(done);
        }
        Response::Written { done } => {
            result.done = Some(done);
        }
        Response::Ack => (),
    }
    if let (Some(expected), Some(actual)) = (expectation.done, result.done) {
        if expected != actual {
            result
                .failures
                .push(ExpectationFailure::CompletionCount { expected, actual });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(position: usize, op: &Operation, response: Response, status: u8) -> Reply {
        Reply::to(position, op, response, Status::new(status))
    }

    #[test]
    fn test_block_size_limits() {
        let mut batch = CommandBatch::new(256);
        assert!(matches!(
            batch.add_block_read(0x06, 0),
            Err(BatchError::InvalidArgument(_))
        ));
        assert!(matches!(
            batch.add_block_read(0x06, 257),
            Err(BatchError::InvalidArgument(_))
        ));
        assert!(matches!(
            batch.add_block_write(0x06, vec![]),
            Err(BatchError::InvalidArgument(_))
        ));
        assert_eq!(batch.add_block_read(0x06, 256), Ok(0));
        assert_eq!(batch.add_block_write(0x06, vec![0; 256]), Ok(1));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_expectation_must_target_last_operation() {
        let mut batch = CommandBatch::new(16);
        assert!(matches!(
            batch.set_expectation(0, ExpectationRecord::CompletionCount(1)),
            Err(BatchError::InvalidTarget(_))
        ));
        batch.add_register_read(1).unwrap();
        batch.add_register_read(2).unwrap();
        assert!(matches!(
            batch.set_expectation(0, ExpectationRecord::Data { value: 0, mask: 0 }),
            Err(BatchError::InvalidTarget(_))
        ));
        assert!(batch
            .set_expectation(1, ExpectationRecord::Data { value: 0, mask: 0 })
            .is_ok());
    }

    #[test]
    fn test_expectation_shape_checks() {
        let mut batch = CommandBatch::new(16);
        batch.add_register_write(1, 2).unwrap();
        assert!(matches!(
            batch.expect_last(ExpectationRecord::Data { value: 0, mask: 0 }),
            Err(BatchError::InvalidTarget(_))
        ));
        assert!(matches!(
            batch.expect_last(ExpectationRecord::CompletionCount(1)),
            Err(BatchError::InvalidTarget(_))
        ));
        assert!(batch
            .expect_last(ExpectationRecord::Status { value: 0, mask: 0 })
            .is_ok());

        batch.add_block_read(6, 2).unwrap();
        assert!(matches!(
            batch.expect_last(ExpectationRecord::Block {
                values: vec![1, 2, 3],
                masks: vec![]
            }),
            Err(BatchError::InvalidTarget(_))
        ));
        assert!(matches!(
            batch.expect_last(ExpectationRecord::Block {
                values: vec![1, 2],
                masks: vec![0xffff]
            }),
            Err(BatchError::InvalidTarget(_))
        ));
        assert!(batch
            .expect_last(ExpectationRecord::Block {
                values: vec![1, 2],
                masks: vec![]
            })
            .is_ok());
        assert!(batch
            .expect_last(ExpectationRecord::CompletionCount(2))
            .is_ok());
        let expectation = batch.get(1).unwrap().expectation;
        assert_eq!(expectation.completion_count(), Some(2));
        assert_eq!(expectation.block().map(|(v, _)| v.len()), Some(2));
    }

    #[test]
    fn test_masked_data_expectation() {
        let mut batch = CommandBatch::new(16);
        let op = batch.add_register_read(0x02).unwrap();
        batch
            .set_expectation(
                op,
                ExpectationRecord::Data {
                    value: 0x00ff,
                    mask: 0x00ff,
                },
            )
            .unwrap();
        let read = batch[0].clone();

        batch.begin_execution();
        let outcome = batch.record_replies(vec![reply(0, &read, Response::Data(0x1aff), 0)]);
        assert!(outcome.all_passed());
        assert_eq!(batch.result(0).unwrap().data(), 0x1aff);

        // Executing again overwrites the previous result.
        batch.begin_execution();
        assert!(batch.result(0).is_none());
        let outcome = batch.record_replies(vec![reply(0, &read, Response::Data(0x1a00), 0)]);
        assert_eq!(outcome, BatchOutcome { total: 1, failed: 1 });
        assert_eq!(outcome.to_string(), "1 of 1 operations failed expectation");
        assert_eq!(
            batch.result(0).unwrap().failures(),
            &[ExpectationFailure::Data {
                expected: 0x00ff,
                mask: 0x00ff,
                actual: 0x1a00
            }]
        );
    }

    #[test]
    fn test_default_status_check() {
        let mut batch = CommandBatch::new(16);
        batch.add_register_write(1, 2).unwrap();
        batch.add_register_write(1, 3).unwrap();
        batch
            .expect_last(ExpectationRecord::Status {
                value: Status::NAK,
                mask: Status::NAK,
            })
            .unwrap();
        let ops = batch.operations().to_vec();
        batch.begin_execution();
        let outcome = batch.record_replies(vec![
            reply(0, &ops[0], Response::Ack, Status::NAK),
            reply(1, &ops[1], Response::Ack, Status::NAK),
        ]);
        // The first fails the default check, the second expects NAK.
        assert_eq!(outcome.failed, 1);
        assert!(!batch.result(0).unwrap().passed());
        assert!(batch.result(1).unwrap().passed());
    }

    #[test]
    fn test_short_block_read() {
        let mut batch = CommandBatch::new(16);
        batch.add_block_read(0x06, 4).unwrap();
        batch
            .expect_last(ExpectationRecord::CompletionCount(4))
            .unwrap();
        let op = batch[0].clone();
        batch.begin_execution();
        let outcome = batch.record_replies(vec![reply(
            0,
            &op,
            Response::Block {
                words: vec![1, 2, 0, 0],
                done: 2,
            },
            Status::ERR,
        )]);
        let result = batch.result(0).unwrap();
        assert_eq!(result.block(), &[1, 2]);
        assert_eq!(result.done(), Some(2));
        assert!(result
            .failures()
            .contains(&ExpectationFailure::CompletionCount {
                expected: 4,
                actual: 2
            }));
        assert_eq!(outcome.failed, 1);
    }

    #[test]
    fn test_block_expectation_uses_masks() {
        let mut batch = CommandBatch::new(16);
        batch.add_block_read(0x06, 2).unwrap();
        batch
            .expect_last(ExpectationRecord::Block {
                values: vec![0o1234, 0o7700],
                masks: vec![0xffff, 0o7700],
            })
            .unwrap();
        let op = batch[0].clone();
        batch.begin_execution();
        let outcome = batch.record_replies(vec![reply(
            0,
            &op,
            Response::Block {
                words: vec![0o1234, 0o7777],
                done: 2,
            },
            0,
        )]);
        assert!(outcome.all_passed());
    }

    #[test]
    fn test_block_size_is_clamped() {
        assert_eq!(CommandBatch::new(0).block_size_max(), 1);
        assert_eq!(CommandBatch::new(usize::MAX).block_size_max(), MAX_BLOCK_WORDS);
        let mut batch = CommandBatch::new(0);
        assert_eq!(batch.add_block_read(0x06, 1), Ok(0));
    }

    #[test]
    fn test_batch_must_fit_in_one_frame() {
        // Each 256 word read needs 518 reply bytes, so 126 of them fit
        // in a reply body and the 127th does not.
        let mut batch = CommandBatch::new(256);
        for i in 0..126 {
            assert_eq!(batch.add_block_read(0x06, 256), Ok(i));
        }
        assert!(!batch.has_room_for_block(256));
        assert!(batch.has_room_for_block(1));
        assert!(matches!(
            batch.add_block_read(0x06, 256),
            Err(BatchError::InvalidArgument(_))
        ));
        assert_eq!(batch.len(), 126);
        // A refused operation leaves the batch usable.
        assert_eq!(batch.add_register_read(0x02), Ok(126));

        // The request side is limited the same way by block writes.
        let mut batch = CommandBatch::new(MAX_BLOCK_WORDS);
        assert!(batch.has_room_for_block(MAX_BLOCK_WORDS));
        batch.add_block_write(0, vec![0; MAX_BLOCK_WORDS]).unwrap();
        assert!(!batch.has_room_for_block(MAX_BLOCK_WORDS));
        assert!(matches!(
            batch.add_block_write(0, vec![0; MAX_BLOCK_WORDS]),
            Err(BatchError::InvalidArgument(_))
        ));
        batch.clear();
        assert!(batch.has_room_for_block(MAX_BLOCK_WORDS));
    }

    #[test]
    fn test_display_lists_results() {
        let mut batch = CommandBatch::new(16);
        batch.add_register_read(0x02).unwrap();
        batch
            .expect_last(ExpectationRecord::Data {
                value: 0o17,
                mask: 0o17,
            })
            .unwrap();
        batch.add_block_read(0x06, 2).unwrap();
        batch.add_register_write(0x03, 1).unwrap();
        assert_eq!(
            batch.to_string(),
            concat!(
                "   0 rreg 000002          -\n",
                "   1 rblk 000006 2        -\n",
                "   2 wreg 000003 000001   -\n",
            )
        );

        let ops = batch.operations().to_vec();
        batch.begin_execution();
        batch.record_replies(vec![
            reply(0, &ops[0], Response::Data(0o1234), 0),
            reply(
                1,
                &ops[1],
                Response::Block {
                    words: vec![0o7, 0o10],
                    done: 2,
                },
                0,
            ),
            reply(2, &ops[2], Response::Ack, 0),
        ]);
        assert_eq!(
            batch.to_string(),
            concat!(
                "   0 rreg 000002          d=001234 s=00000000 FAIL\n",
                "       FAIL data 001234 (mask 000017) expected 000017\n",
                "   1 rblk 000006 2        n=2 s=00000000 OK\n",
                "           0: 000007 000010\n",
                "   2 wreg 000003 000001   s=00000000 OK\n",
            )
        );
    }

    #[test]
    fn test_sealed_after_execution() {
        let mut batch = CommandBatch::new(16);
        batch.add_attention_query().unwrap();
        batch.begin_execution();
        assert!(batch.is_sealed());
        assert_eq!(batch.add_attention_query(), Err(BatchError::Sealed));
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.add_attention_query(), Ok(0));
    }
}
