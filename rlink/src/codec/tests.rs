use test_strategy::proptest;

use super::*;
use crate::batch::MAX_BLOCK_WORDS;
use crate::config::LinkConfig;

#[test]
fn test_crc_check_value() {
    // The standard check value for CRC-16/CCITT-FALSE.
    assert_eq!(crc16(b"123456789"), 0x29B1);
    assert_eq!(crc16(&[]), 0xFFFF);
}

#[test]
fn test_command_byte_layout() {
    assert_eq!(command_byte(0, OpKind::RegisterRead), 0x00);
    assert_eq!(command_byte(1, OpKind::BlockWrite), 0x0B);
    assert_eq!(command_byte(31, OpKind::ControlFunction), 0xFE);
    // The sequence number wraps at 32.
    assert_eq!(command_byte(32, OpKind::AttentionQuery), 0x05);
}

#[test]
fn test_request_layout() {
    let ops = vec![
        Operation::RegisterWrite {
            address: 0x0004,
            data: 0o177570,
        },
        Operation::RegisterRead { address: 0x0006 },
    ];
    let frame = encode_request(0x1234, &ops).unwrap();
    assert_eq!(
        &frame[..frame.len() - CRC_LEN],
        &[
            0xA5, 0x34, 0x12, 0x02, 0x00, 0x08, 0x00, // header: tag, 2 ops, 8 body bytes
            0x02, 0x04, 0x00, 0x78, 0xFF, // wreg 0x0004 0o177570
            0x08, 0x06, 0x00, // rreg 0x0006
        ]
    );
    assert_eq!(frame_len(&frame), Some(frame.len()));
    assert_eq!(frame_tag(&frame), Some(0x1234));
    assert_eq!(
        frame.len(),
        HEADER_LEN + ops.iter().map(request_body_len).sum::<usize>() + CRC_LEN
    );
    assert_eq!(decode_request(&frame), Ok((0x1234, ops)));
}

#[test]
fn test_empty_request() {
    let frame = encode_request(0, &[]).unwrap();
    assert_eq!(frame.len(), HEADER_LEN + CRC_LEN);
    assert_eq!(decode_request(&frame), Ok((0, vec![])));
}

#[test]
fn test_reply_length_matches_encoding() {
    let ops = vec![
        Operation::RegisterRead { address: 1 },
        Operation::BlockRead {
            address: 6,
            count: 3,
        },
        Operation::BlockWrite {
            address: 6,
            words: vec![1, 2],
        },
        Operation::ControlFunction {
            address: 1,
            function: 4,
        },
    ];
    let replies = vec![
        Reply::to(0, &ops[0], Response::Data(7), Status::OK),
        Reply::to(
            1,
            &ops[1],
            Response::Block {
                words: vec![1, 2, 0],
                done: 2,
            },
            Status::new(Status::ERR),
        ),
        Reply::to(2, &ops[2], Response::Written { done: 2 }, Status::OK),
        Reply::to(3, &ops[3], Response::Ack, Status::OK),
    ];
    let frame = encode_reply(7, &replies).unwrap();
    assert_eq!(frame.len(), reply_len(&ops));
    assert_eq!(decode_reply(&frame, 7, &ops), Ok(replies));
}

#[test]
fn test_reply_to_another_exchange_is_rejected() {
    let ops = vec![Operation::AttentionQuery];
    let frame = encode_reply(41, &[Reply::to(0, &ops[0], Response::Data(1), Status::OK)]).unwrap();
    assert_eq!(
        decode_reply(&frame, 42, &ops),
        Err(CodecError::TagMismatch {
            expected: 42,
            found: 41
        })
    );
}

#[test]
fn test_boundary_values_round_trip() {
    let link_max = LinkConfig::default().block_size_max;
    let table = vec![
        Operation::RegisterRead { address: 0x0000 },
        Operation::RegisterRead { address: 0xFFFF },
        Operation::RegisterWrite {
            address: 0x0000,
            data: 0x0000,
        },
        Operation::RegisterWrite {
            address: 0xFFFF,
            data: 0xFFFF,
        },
        Operation::BlockRead {
            address: 0x0000,
            count: 1,
        },
        Operation::BlockRead {
            address: 0xFFFF,
            count: link_max as u16,
        },
        Operation::BlockRead {
            address: 0xFFFF,
            count: MAX_BLOCK_WORDS as u16,
        },
        Operation::BlockWrite {
            address: 0x0000,
            words: vec![0xFFFF],
        },
        Operation::BlockWrite {
            address: 0xFFFF,
            words: vec![0x8000; link_max],
        },
        Operation::BlockWrite {
            address: 0xFFFF,
            words: vec![0x0001; MAX_BLOCK_WORDS],
        },
        Operation::LatchedReadback,
        Operation::AttentionQuery,
        Operation::ControlFunction {
            address: 0x0000,
            function: 0x0000,
        },
        Operation::ControlFunction {
            address: 0xFFFF,
            function: 0xFFFF,
        },
    ];
    for tag in [0x0000, 0xFFFF] {
        for op in &table {
            let ops = std::slice::from_ref(op);
            let frame = encode_request(tag, ops).unwrap();
            assert_eq!(decode_request(&frame), Ok((tag, ops.to_vec())), "{op}");

            let reply = Reply::to(0, op, crate::testing::plain_response(op, 0xFFFF), Status::new(0xFF));
            let frame = encode_reply(tag, std::slice::from_ref(&reply)).unwrap();
            assert_eq!(frame.len(), reply_len(ops), "{op}");
            assert_eq!(decode_reply(&frame, tag, ops), Ok(vec![reply]), "{op}");
        }
    }
}

#[test]
fn test_reply_with_wrong_sequence_is_rejected() {
    let ops = vec![
        Operation::RegisterRead { address: 1 },
        Operation::RegisterRead { address: 2 },
    ];
    // Both replies claim sequence number 0.
    let replies = vec![
        Reply::to(0, &ops[0], Response::Data(1), Status::OK),
        Reply::to(0, &ops[1], Response::Data(2), Status::OK),
    ];
    let frame = encode_reply(0, &replies).unwrap();
    assert_eq!(
        decode_reply(&frame, 0, &ops),
        Err(CodecError::UnexpectedCommand {
            position: 1,
            expected: 0x08,
            found: 0x00
        })
    );
}

#[test]
fn test_reply_for_fewer_operations_is_rejected() {
    let ops = vec![
        Operation::AttentionQuery,
        Operation::RegisterRead { address: 2 },
    ];
    let frame =
        encode_reply(0, &[Reply::to(0, &ops[0], Response::Data(0), Status::OK)]).unwrap();
    assert_eq!(
        decode_reply(&frame, 0, &ops),
        Err(CodecError::CountMismatch {
            expected: 2,
            found: 1
        })
    );
}

#[test]
fn test_block_reply_with_wrong_count_is_rejected() {
    let ops = vec![Operation::BlockRead {
        address: 6,
        count: 4,
    }];
    let frame = encode_reply(0, &[Reply::to(
        0,
        &ops[0],
        Response::Block {
            words: vec![0; 3],
            done: 3,
        },
        Status::OK,
    )])
    .unwrap();
    assert_eq!(
        decode_reply(&frame, 0, &ops),
        Err(CodecError::BlockCountMismatch {
            position: 0,
            requested: 4,
            returned: 3
        })
    );
}

#[test]
fn test_unknown_opcode_is_rejected() {
    let mut frame = encode_request(0, &[Operation::AttentionQuery]).unwrap();
    frame[HEADER_LEN] = 0x07;
    let crc = crc16(&frame[..frame.len() - CRC_LEN]);
    let n = frame.len();
    frame[n - 2..].copy_from_slice(&crc.to_le_bytes());
    assert_eq!(decode_request(&frame), Err(CodecError::UnknownOpcode(7)));
}

#[test]
fn test_truncated_and_padded_frames() {
    let frame = encode_request(0, &[Operation::RegisterRead { address: 3 }]).unwrap();
    assert!(matches!(
        decode_request(&frame[..frame.len() - 1]),
        Err(CodecError::Truncated { .. })
    ));
    assert!(matches!(
        decode_request(&frame[..2]),
        Err(CodecError::Truncated { .. })
    ));
    let mut padded = frame.clone();
    padded.push(0);
    assert!(matches!(
        decode_request(&padded),
        Err(CodecError::LengthMismatch { .. })
    ));
}

#[test]
fn test_attention_notice() {
    assert_eq!(encode_attention(0x8001), [0xA7, 0x01, 0x80]);
}

#[proptest]
fn request_round_trip(
    #[strategy(proptest::collection::vec(proptest::prelude::any::<Operation>(), 0..24))] ops: Vec<Operation>,
    tag: u16,
) {
    let frame = encode_request(tag, &ops).unwrap();
    assert_eq!(frame_len(&frame), Some(frame.len()));
    assert_eq!(decode_request(&frame).unwrap(), (tag, ops));
}

/// A reply to `op` whose contents are derived from `seed`.
fn response_to(op: &Operation, seed: u16) -> Response {
    match op {
        Operation::RegisterRead { .. }
        | Operation::LatchedReadback
        | Operation::AttentionQuery => Response::Data(seed),
        Operation::BlockRead { count, .. } => Response::Block {
            words: (0..*count).map(|i| i.wrapping_mul(seed)).collect(),
            done: seed % (count + 1),
        },
        Operation::BlockWrite { words, .. } => Response::Written {
            done: seed % (words.len() as u16 + 1),
        },
        Operation::RegisterWrite { .. } | Operation::ControlFunction { .. } => Response::Ack,
    }
}

#[proptest]
fn reply_round_trip(
    #[strategy(proptest::collection::vec(proptest::prelude::any::<Operation>(), 0..24))] ops: Vec<Operation>,
    tag: u16,
    seed: u16,
    status: u8,
) {
    let replies: Vec<Reply> = ops
        .iter()
        .enumerate()
        .map(|(i, op)| {
            Reply::to(
                i,
                op,
                response_to(op, seed.wrapping_add(i as u16)),
                Status::new(status.wrapping_add(i as u8)),
            )
        })
        .collect();
    let frame = encode_reply(tag, &replies).unwrap();
    assert_eq!(frame.len(), reply_len(&ops));
    assert_eq!(decode_reply(&frame, tag, &ops).unwrap(), replies);
    assert!(decode_reply(&frame, tag.wrapping_add(1), &ops).is_err());
}

#[proptest]
fn any_single_byte_corruption_is_detected(
    #[strategy(proptest::collection::vec(proptest::prelude::any::<Operation>(), 1..8))] ops: Vec<Operation>,
    position: proptest::sample::Index,
    #[strategy(1..=255u8)] flip: u8,
) {
    let mut frame = encode_request(0, &ops).unwrap();
    let i = position.index(frame.len());
    frame[i] ^= flip;
    assert!(decode_request(&frame).is_err());
}
