use tk_core::Move;
use tk_runtime::SearchBudget;

use crate::codec::{decode_envelope, encode_envelope, DecodeError};
use crate::protocol::{service_name, Envelope, Message, WorkerCommand, PROTOCOL_VERSION};

fn env(request_id: u64, msg: Message) -> Envelope {
    Envelope { request_id, msg }
}

#[test]
fn every_message_kind_survives_the_wire() {
    let msgs = vec![
        Message::AddWorker {
            name: "node-7".to_string(),
            player: "mcts".to_string(),
        },
        Message::AcceptResults {
            worker_id: 3,
            search_id: 11,
            complete: true,
            runs: vec![3, 5, 0],
            wins: vec![1, 2, 0],
        },
        Message::RemoveWorker { worker_id: 3 },
        Message::Heartbeat { worker_id: 3 },
        Message::Registered { worker_id: 9 },
        Message::error("unknown property \"x\""),
        Message::Command(WorkerCommand::BeginSearch {
            search_id: 4,
            budget: SearchBudget::Millis(250),
        }),
        Message::Command(WorkerCommand::AcceptMove {
            turn: 12,
            mv: Move::Pass,
        }),
        Message::Command(WorkerCommand::AcceptMove {
            turn: 13,
            mv: Move::Play(40),
        }),
        Message::Command(WorkerCommand::SetKomi(6.5)),
        Message::Command(WorkerCommand::SetProperty {
            key: "threads".to_string(),
            value: "8".to_string(),
        }),
        Message::Command(WorkerCommand::ApplyTotals {
            runs: vec![5, 6],
            wins: vec![3, 2],
        }),
        Message::Command(WorkerCommand::Reset),
        Message::Command(WorkerCommand::StopSearch),
    ];
    for (i, msg) in msgs.into_iter().enumerate() {
        let e = env(1000 + i as u64, msg);
        let bytes = encode_envelope(&e);
        assert_eq!(decode_envelope(&bytes).unwrap(), e);
    }
}

#[test]
fn header_layout_is_stable() {
    let bytes = encode_envelope(&env(0x0102, Message::Heartbeat { worker_id: 5 }));
    assert_eq!(&bytes[0..4], &PROTOCOL_VERSION.to_le_bytes());
    assert_eq!(bytes[4], 4);
    assert_eq!(&bytes[5..8], &[0, 0, 0]);
    assert_eq!(&bytes[8..16], &0x0102u64.to_le_bytes());
    assert_eq!(&bytes[16..], &5u64.to_le_bytes());
}

#[test]
fn wrong_version_and_kind_are_rejected() {
    let mut bytes = encode_envelope(&env(1, Message::Command(WorkerCommand::GetPlayer)));
    bytes[0] = 9;
    assert!(matches!(
        decode_envelope(&bytes),
        Err(DecodeError::BadVersion(9))
    ));

    let mut bytes = encode_envelope(&env(1, Message::Command(WorkerCommand::GetPlayer)));
    bytes[4] = 42;
    assert!(matches!(decode_envelope(&bytes), Err(DecodeError::BadKind(42))));

    let mut bytes = encode_envelope(&env(1, Message::Command(WorkerCommand::GetPlayer)));
    bytes[16] = 99;
    assert!(matches!(
        decode_envelope(&bytes),
        Err(DecodeError::BadCommand(99))
    ));
}

#[test]
fn truncated_and_padded_payloads_are_rejected() {
    let bytes = encode_envelope(&env(
        1,
        Message::AddWorker {
            name: "w".to_string(),
            player: "random".to_string(),
        },
    ));
    for cut in [0, 7, 15, bytes.len() - 1] {
        assert!(
            matches!(decode_envelope(&bytes[..cut]), Err(DecodeError::TooShort)),
            "cut at {cut}"
        );
    }
    let mut padded = bytes.clone();
    padded.push(0);
    assert!(matches!(
        decode_envelope(&padded),
        Err(DecodeError::TrailingBytes(1))
    ));
}

#[test]
fn totals_with_different_lengths_are_rejected() {
    let bytes = encode_envelope(&env(
        1,
        Message::AcceptResults {
            worker_id: 1,
            search_id: 1,
            complete: false,
            runs: vec![1, 2, 3],
            wins: vec![1],
        },
    ));
    assert!(matches!(
        decode_envelope(&bytes),
        Err(DecodeError::LengthMismatch { runs: 3, wins: 1 })
    ));
}

#[test]
fn huge_vector_length_does_not_allocate() {
    let mut bytes = encode_envelope(&env(
        1,
        Message::Command(WorkerCommand::ApplyTotals {
            runs: vec![],
            wins: vec![],
        }),
    ));
    // Overwrite the runs length with u32::MAX.
    bytes[17..21].copy_from_slice(&u32::MAX.to_le_bytes());
    assert!(matches!(decode_envelope(&bytes), Err(DecodeError::TooShort)));
}

#[test]
fn shard_suffix_names_the_controller() {
    assert_eq!(service_name("SearchController", None), "SearchController");
    assert_eq!(service_name("SearchController", Some(2)), "SearchController2");
}
