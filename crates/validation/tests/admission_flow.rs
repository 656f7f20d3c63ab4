use ssv_types::{
    DecodedMessage, DomainType, Height, MessageId, OperatorId, PartialSigMsgType,
    PartialSignatureMessages, QbftMessage, QbftMessageType, Round, RunnerRole, Slot,
};
use ssv_validation::{
    AdmissionError, AdmissionKey, AdmissionTracker, MessageAdmission, MessageCounts, MessageKind,
    MessageLimits, StaticCommittee, ValidationError, ValidationOutcome,
};

const DUTY: [u8; 32] = [0xd0; 32];

fn msg_id() -> MessageId {
    MessageId::new(DomainType([0, 0, 0, 1]), RunnerRole::Committee, DUTY.to_vec())
}

fn qbft(msg_type: QbftMessageType, signers: &[u64]) -> DecodedMessage {
    let message = QbftMessage {
        msg_type,
        height: Height(10),
        round: Round(1),
        identifier: msg_id().duty_executor_id,
        root: [0x11; 32],
    };
    let signed_by = signers
        .iter()
        .map(|id| (OperatorId(*id), vec![*id as u8; 96]))
        .collect();
    DecodedMessage::consensus(msg_id(), signed_by, message).expect("encode consensus message")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn key() -> AdmissionKey {
    AdmissionKey::new(DUTY.to_vec(), Slot(10), Round(1), OperatorId(3))
}

#[test]
fn proposal_prepare_commit_then_duplicate_commit() {
    let tracker = AdmissionTracker::new();
    let key = key();

    for msg_type in [
        QbftMessageType::Proposal,
        QbftMessageType::Prepare,
        QbftMessageType::Commit,
    ] {
        tracker
            .admit(&key, 4, &qbft(msg_type, &[3]))
            .unwrap_or_else(|err| panic!("{msg_type} should be admitted: {err}"));
    }

    let err = tracker
        .admit(&key, 4, &qbft(QbftMessageType::Commit, &[3]))
        .unwrap_err();
    assert!(matches!(err, AdmissionError::UnexpectedMessageType { .. }));

    let counts = tracker.counts(&key).unwrap();
    assert_eq!(counts.proposal, 1);
    assert_eq!(counts.prepare, 1);
    assert_eq!(counts.commit, 1);
}

#[test]
fn decided_deliveries_up_to_committee_limit() {
    let limits = MessageLimits::for_committee(4);
    assert_eq!(limits.decided, 5);

    let mut counts = MessageCounts::new();
    let decided = qbft(QbftMessageType::Commit, &[1, 2, 3]);

    for _ in 0..4 {
        counts.validate(&decided, &limits).expect("decided within limit");
        counts.record(&decided);
    }
    assert_eq!(counts.decided, 4);
    assert!(!counts.reached_limits(&limits));

    counts.validate(&decided, &limits).expect("fifth decided still within limit");
    counts.record(&decided);
    assert!(counts.reached_limits(&limits));
    assert_eq!(counts.count(MessageKind::Decided), limits.limit(MessageKind::Decided));

    assert!(matches!(
        counts.validate(&decided, &limits),
        Err(AdmissionError::UnexpectedMessageType { .. })
    ));
}

#[test]
fn pipeline_handles_a_full_duty() {
    init_tracing();
    let admission = MessageAdmission::new(StaticCommittee(4));

    let pre = DecodedMessage::partial_signatures(
        msg_id(),
        (OperatorId(3), vec![3u8; 96]),
        PartialSignatureMessages {
            msg_type: PartialSigMsgType::Randao,
            slot: Slot(10),
            messages: Vec::new(),
        },
    )
    .unwrap();
    let post = DecodedMessage::partial_signatures(
        msg_id(),
        (OperatorId(3), vec![3u8; 96]),
        PartialSignatureMessages {
            msg_type: PartialSigMsgType::PostConsensus,
            slot: Slot(10),
            messages: Vec::new(),
        },
    )
    .unwrap();

    let sequence = vec![
        pre.clone(),
        qbft(QbftMessageType::Proposal, &[3]),
        qbft(QbftMessageType::Prepare, &[3]),
        qbft(QbftMessageType::Commit, &[3]),
        qbft(QbftMessageType::Commit, &[1, 3, 4]),
        post.clone(),
    ];
    for msg in &sequence {
        let bytes = msg.encode().unwrap();
        let outcome = admission.validate(&bytes);
        assert!(outcome.is_accept(), "{:?}", outcome);
    }

    for late in [pre, post, qbft(QbftMessageType::Commit, &[1, 3])] {
        let outcome = admission.validate(&late.encode().unwrap());
        assert!(matches!(
            outcome,
            ValidationOutcome::Reject {
                error: ValidationError::Admission(_),
                ..
            }
        ));
    }
}
