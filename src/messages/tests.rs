// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Cursor;

use super::*;

fn iteration_request() -> Message {
    let mut eq = NormalEquations::new(2);
    eq.add_condition(&[1.0, 0.5], 0.25, 1.0).unwrap();
    Message::IterationBatch(vec![
        IterationRequest {
            domain_index: 3,
            normal_equations: eq.clone(),
        },
        IterationRequest {
            domain_index: 4,
            normal_equations: eq,
        },
    ])
}

#[test]
fn test_stream_of_messages() {
    let msgs = vec![
        iteration_request(),
        Message::ChunkDone(ChunkDoneMsg { kernel_id: 2 }),
        Message::IterationResult(IterationResult::not_tracked(7)),
    ];
    let mut buf = vec![];
    for msg in &msgs {
        write_message(&mut buf, msg).unwrap();
    }

    let mut cursor = Cursor::new(buf);
    for expected in &msgs {
        let got = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(&got, expected);
    }
    // The stream ended cleanly.
    assert!(read_message(&mut cursor).unwrap().is_none());
}

#[test]
fn test_truncated_frame() {
    let mut buf = vec![];
    write_message(&mut buf, &iteration_request()).unwrap();
    buf.truncate(buf.len() - 3);
    let result = read_message(&mut Cursor::new(buf));
    assert!(matches!(result, Err(CodecError::Truncated)));

    // Part of a header.
    let result = read_message(&mut Cursor::new(b"DC".to_vec()));
    assert!(matches!(result, Err(CodecError::Truncated)));
}

#[test]
fn test_corrupt_stream() {
    let mut buf = vec![];
    write_message(&mut buf, &iteration_request()).unwrap();
    buf[0] = b'X';
    let result = read_message(&mut Cursor::new(buf.clone()));
    assert!(matches!(result, Err(CodecError::BadMagic { .. })));

    buf[0] = b'D';
    buf[4] = 99;
    let result = read_message(&mut Cursor::new(buf));
    assert!(matches!(result, Err(CodecError::BadVersion { got: 99 })));
}

#[test]
fn test_undecodable_payload() {
    let payload = b"{\"NotAMessage\":1}";
    let mut buf = b"DCAL".to_vec();
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(payload);
    let result = read_message(&mut Cursor::new(buf));
    assert!(matches!(result, Err(CodecError::Decode(_))));
}

#[test]
fn test_misshapen_equations_are_undecodable() {
    let payload = br#"{"Iteration":{"domain_index":0,"normal_equations":{"matrix":{"v":1,"dim":[2,2],"data":[1.0,0.0,0.0,1.0]},"rhs":{"v":1,"dim":[1],"data":[0.0]},"num_observations":1,"sum_weights":1.0,"sum_sq_residuals":0.0}}}"#;
    let mut buf = b"DCAL".to_vec();
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(payload);
    let result = read_message(&mut Cursor::new(buf));
    assert!(matches!(result, Err(CodecError::Decode(_))));
}

#[test]
fn test_message_kind() {
    assert_eq!(iteration_request().kind(), MessageKind::IterationBatch);
    assert_eq!(
        Message::ChunkDone(ChunkDoneMsg { kernel_id: 0 })
            .kind()
            .to_string(),
        "ChunkDone"
    );
}

#[test]
fn test_not_tracked_placeholder() {
    let r = IterationResult::not_tracked(7);
    assert_eq!(r.domain_index, 7);
    assert_eq!(r.ready_code, ReadyCode::NotTracked);
    assert!(r.unknowns.is_empty());
    assert_eq!(r.rank, 0);
    assert_eq!(r.chi_squared, -1.0);
    assert_eq!(r.lm_factor, -1.0);

    let s = CellSolution::from(r);
    assert_eq!(s.id, 7);
    assert_eq!(s.result, ReadyCode::NotTracked);
}
