use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::*;
use crate::attention::{ActivityFlag, AttentionWaiter};
use crate::batch::ExpectationRecord;
use crate::codec::{Reply, Response};
use crate::operation::Operation;
use crate::status::Status;
use crate::testing::{plain_response, ScriptedTransport};

fn quick() -> LinkConfig {
    LinkConfig {
        reply_timeout_ms: 50,
        ..LinkConfig::default()
    }
}

#[test]
fn test_empty_batch_sends_nothing() {
    let transport = ScriptedTransport::answering(|op| plain_response(op, 0));
    let sent = Arc::clone(&transport.sent);
    let conn = Connection::new(Box::new(transport), quick());
    let mut batch = conn.new_batch();
    assert_eq!(
        conn.execute(&mut batch).unwrap(),
        BatchOutcome {
            total: 0,
            failed: 0
        }
    );
    assert!(sent.lock().unwrap().is_empty());
    assert_eq!(conn.stats().batches, 0);
}

#[test]
fn test_masked_expectation_through_link() {
    for (returned, failed) in [(0x1aff_u16, 0_usize), (0x1a00, 1)] {
        let conn = Connection::new(
            Box::new(ScriptedTransport::answering(move |op| {
                plain_response(op, returned)
            })),
            quick(),
        );
        let mut batch = conn.new_batch();
        let i = batch.add_register_read(0x02).unwrap();
        batch
            .set_expectation(
                i,
                ExpectationRecord::Data {
                    value: 0x00ff,
                    mask: 0x00ff,
                },
            )
            .unwrap();
        let outcome = conn.execute(&mut batch).unwrap();
        assert_eq!(outcome.failed, failed);
        assert_eq!(batch.result(0).unwrap().data(), returned);
        assert_eq!(conn.stats().expectation_failures, failed as u64);
    }
}

#[test]
fn test_short_block_completion() {
    let conn = Connection::new(
        Box::new(ScriptedTransport::answering(|op| match op {
            Operation::BlockRead { count, .. } => Response::Block {
                words: (0..*count).collect(),
                done: count / 2,
            },
            other => plain_response(other, 0),
        })),
        quick(),
    );
    let mut batch = conn.new_batch();
    batch.add_block_read(0x06, 8).unwrap();
    batch
        .expect_last(ExpectationRecord::CompletionCount(8))
        .unwrap();
    let outcome = conn.execute(&mut batch).unwrap();
    assert_eq!(outcome.failed, 1);
    assert_eq!(batch.result(0).unwrap().block(), &[0, 1, 2, 3]);

    // Without a completion count expectation a short transfer is
    // merely reported.
    let mut batch = conn.new_batch();
    batch.add_block_read(0x06, 8).unwrap();
    let outcome = conn.execute(&mut batch).unwrap();
    assert!(outcome.all_passed());
    assert_eq!(batch.result(0).unwrap().done(), Some(4));
}

#[test]
fn test_send_failure_releases_the_link() {
    let mut fail = true;
    let transport = ScriptedTransport::new(Box::new(move |tag, ops| {
        if fail {
            fail = false;
            return Err(TransportError::Closed);
        }
        let replies: Vec<Reply> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| Reply::to(i, op, plain_response(op, 7), Status::OK))
            .collect();
        crate::codec::encode_reply(tag, &replies).map_err(|_| TransportError::Closed)
    }));
    let conn = Connection::new(Box::new(transport), quick());
    let mut batch = conn.new_batch();
    batch.add_register_read(1).unwrap();
    assert!(matches!(
        conn.execute(&mut batch),
        Err(LinkError::Transport(TransportError::Closed))
    ));
    assert!(batch.result(0).is_none());
    // The lock was released, so the same batch can run again.
    assert!(conn.execute(&mut batch).unwrap().all_passed());
    assert_eq!(batch.result(0).unwrap().data(), 7);
    assert_eq!(conn.stats().transport_errors, 1);
}

#[test]
fn test_missing_reply_times_out() {
    let transport = ScriptedTransport::new(Box::new(|_, _| Ok(Vec::new())));
    let conn = Connection::new(Box::new(transport), quick());
    let mut batch = conn.new_batch();
    batch.add_attention_query().unwrap();
    assert!(matches!(
        conn.execute(&mut batch),
        Err(LinkError::Transport(TransportError::TimedOut))
    ));
}

#[test]
fn test_partial_reply_is_short() {
    let transport = ScriptedTransport::new(Box::new(|tag, ops| {
        let reply = Reply::to(0, &ops[0], Response::Data(1), Status::OK);
        let mut frame = crate::codec::encode_reply(tag, &[reply]).map_err(|_| TransportError::Closed)?;
        frame.truncate(4);
        Ok(frame)
    }));
    let conn = Connection::new(Box::new(transport), quick());
    let mut batch = conn.new_batch();
    batch.add_register_read(1).unwrap();
    assert!(matches!(
        conn.execute(&mut batch),
        Err(LinkError::ShortReply {
            expected: 13,
            received: 4
        })
    ));
}

#[test]
fn test_corrupt_reply_is_malformed() {
    let transport = ScriptedTransport::new(Box::new(|tag, ops| {
        let reply = Reply::to(0, &ops[0], Response::Data(1), Status::OK);
        let mut frame = crate::codec::encode_reply(tag, &[reply]).map_err(|_| TransportError::Closed)?;
        let n = frame.len();
        frame[n - 1] ^= 0xff;
        Ok(frame)
    }));
    let conn = Connection::new(Box::new(transport), quick());
    let mut batch = conn.new_batch();
    batch.add_register_read(1).unwrap();
    assert!(matches!(
        conn.execute(&mut batch),
        Err(LinkError::Malformed(CodecError::BadCrc { .. }))
    ));
    assert_eq!(conn.stats().malformed_replies, 1);
    assert!(batch.result(0).is_none());
}

#[test]
fn test_late_reply_is_not_taken_for_the_next() {
    // The first exchange gets no answer in time; its reply turns up in
    // front of the reply to the second, identically shaped, exchange.
    let mut late: Option<Vec<u8>> = None;
    let transport = ScriptedTransport::new(Box::new(move |tag, ops| {
        let replies: Vec<Reply> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| Reply::to(i, op, plain_response(op, tag + 0o100), Status::OK))
            .collect();
        let frame = crate::codec::encode_reply(tag, &replies).map_err(|_| TransportError::Closed)?;
        match late.take() {
            None => {
                late = Some(frame);
                Ok(Vec::new())
            }
            Some(mut bytes) => {
                bytes.extend_from_slice(&frame);
                Ok(bytes)
            }
        }
    }));
    let conn = Connection::new(Box::new(transport), quick());
    let mut batch = conn.new_batch();
    batch.add_register_read(0x02).unwrap();
    assert!(matches!(
        conn.execute(&mut batch),
        Err(LinkError::Transport(TransportError::TimedOut))
    ));

    assert!(conn.execute(&mut batch).unwrap().all_passed());
    assert_eq!(batch.result(0).unwrap().data(), 0o101);
    let stats = conn.stats();
    assert_eq!(stats.stale_replies, 1);
    assert_eq!(stats.malformed_replies, 0);
}

#[test]
fn test_reply_with_wrong_tag_alone_is_malformed() {
    let transport = ScriptedTransport::new(Box::new(|tag, ops| {
        let reply = Reply::to(0, &ops[0], Response::Data(1), Status::OK);
        crate::codec::encode_reply(tag.wrapping_sub(1), &[reply])
            .map_err(|_| TransportError::Closed)
    }));
    let conn = Connection::new(Box::new(transport), quick());
    let mut batch = conn.new_batch();
    batch.add_register_read(1).unwrap();
    // The frame is dropped, leaving nothing to decode.
    assert!(matches!(
        conn.execute(&mut batch),
        Err(LinkError::Transport(TransportError::TimedOut))
    ));
    assert_eq!(conn.stats().stale_replies, 1);
    assert!(batch.result(0).is_none());
}

#[test]
fn test_out_of_range_block_size_is_clamped() {
    let conn = Connection::new(
        Box::new(ScriptedTransport::answering(|op| plain_response(op, 3))),
        LinkConfig {
            block_size_max: 0,
            ..quick()
        },
    );
    assert_eq!(conn.config().block_size_max, 1);
    let mut batch = conn.new_batch();
    batch.add_block_read(0x06, 1).unwrap();
    assert!(conn.execute(&mut batch).unwrap().all_passed());
    assert_eq!(batch.result(0).unwrap().block(), &[3]);

    let conn = Connection::new(
        Box::new(ScriptedTransport::answering(|op| plain_response(op, 3))),
        LinkConfig {
            block_size_max: 1 << 20,
            ..quick()
        },
    );
    assert_eq!(conn.config().block_size_max, crate::batch::MAX_BLOCK_WORDS);
}

#[test]
fn test_concurrent_batches_do_not_interleave() {
    let conn = Arc::new(Connection::new(
        Box::new(ScriptedTransport::answering(|op| {
            plain_response(op, op.address().unwrap_or(0))
        })),
        quick(),
    ));
    let workers: Vec<_> = (0..4u16)
        .map(|t| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                for n in 0..50u16 {
                    let mut batch = conn.new_batch();
                    let address = t * 1000 + n;
                    batch.add_register_read(address).unwrap();
                    batch.add_register_read(address + 1).unwrap();
                    conn.execute(&mut batch).unwrap();
                    assert_eq!(batch.result(0).unwrap().data(), address);
                    assert_eq!(batch.result(1).unwrap().data(), address + 1);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(conn.stats().batches, 200);
}

#[test]
fn test_guard_holds_common_map() {
    let conn = Connection::new(
        Box::new(ScriptedTransport::answering(|op| plain_response(op, 0))),
        quick(),
    );
    {
        let mut guard = conn.lock();
        guard.common_map_mut().insert("rbtest", 0xffe0).unwrap();
    }
    assert_eq!(conn.lock().common_map().find_by_name("rbtest"), Some(0xffe0));
}

#[test]
fn test_passive_attention_wait() {
    let conn = Connection::new(
        Box::new(ScriptedTransport::answering(|op| plain_response(op, 0x0001))),
        quick(),
    );
    let activity = ActivityFlag::new();
    activity.set_up();

    conn.attention_signal().notify();
    let outcome = AttentionWaiter::new(&conn, 0x0001, &activity)
        .wait(Duration::from_secs(5))
        .unwrap();
    assert!(outcome.is_signaled());
    assert!(!activity.is_up());

    // A pattern outside the mask is discarded and the wait times out.
    activity.set_up();
    conn.attention_signal().notify();
    let outcome = AttentionWaiter::new(&conn, 0x0002, &activity)
        .wait(Duration::from_millis(100))
        .unwrap();
    assert!(!outcome.is_signaled());
    assert!(outcome.elapsed() >= Duration::from_millis(100));
    let stats = conn.stats();
    assert_eq!(stats.attention_waits, 2);
    assert_eq!(stats.attention_timeouts, 1);
}
