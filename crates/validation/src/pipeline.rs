//! Admission of raw gossip payloads.

use crate::error::{AdmissionError, ValidationError};
use crate::kind::MessageKind;
use crate::logger_fields::LoggerFields;
use crate::tracker::{Admission, AdmissionKey, AdmissionTracker};
use ssv_types::{DecodedMessage, MessageId, Slot};
use tracing::debug;

/// Resolves the size of the committee responsible for a duty.
pub trait CommitteeProvider: Send + Sync {
    fn committee_size(&self, msg_id: &MessageId) -> Option<usize>;
}

/// Every duty is run by a committee of the same size.
#[derive(Debug, Clone, Copy)]
pub struct StaticCommittee(pub usize);

impl CommitteeProvider for StaticCommittee {
    fn committee_size(&self, _msg_id: &MessageId) -> Option<usize> {
        Some(self.0)
    }
}

/// Decision for one gossip payload.
#[derive(Debug)]
pub enum ValidationOutcome {
    Accept {
        fields: LoggerFields,
        /// One admission per signer of the message.
        admissions: Vec<Admission>,
    },
    Reject {
        fields: LoggerFields,
        error: ValidationError,
    },
}

impl ValidationOutcome {
    pub fn is_accept(&self) -> bool {
        matches!(self, ValidationOutcome::Accept { .. })
    }

    pub fn fields(&self) -> &LoggerFields {
        match self {
            ValidationOutcome::Accept { fields, .. } | ValidationOutcome::Reject { fields, .. } => {
                fields
            }
        }
    }

    /// True when any signer's counters reached a limit with this message.
    pub fn saturated(&self) -> bool {
        match self {
            ValidationOutcome::Accept { admissions, .. } => {
                admissions.iter().any(|admission| admission.reached_limits)
            }
            ValidationOutcome::Reject { .. } => false,
        }
    }
}

/// Decodes gossip payloads and admits them through an [`AdmissionTracker`].
pub struct MessageAdmission<C> {
    tracker: AdmissionTracker,
    committees: C,
}

impl<C: CommitteeProvider> MessageAdmission<C> {
    pub fn new(committees: C) -> Self {
        Self {
            tracker: AdmissionTracker::new(),
            committees,
        }
    }

    pub fn tracker(&self) -> &AdmissionTracker {
        &self.tracker
    }

    /// Decode and admit raw gossip data.
    pub fn validate(&self, data: &[u8]) -> ValidationOutcome {
        match DecodedMessage::decode(data) {
            Ok(msg) => self.admit(&msg),
            Err(err) => {
                debug!(error = %err, "could not decode gossip message");
                ValidationOutcome::Reject {
                    fields: LoggerFields::describe(None),
                    error: err.into(),
                }
            }
        }
    }

    /// Admit a decoded message under the key of each of its signers. The
    /// message is counted for all signers or, when any signer's counters
    /// refuse it, for none.
    pub fn admit(&self, msg: &DecodedMessage) -> ValidationOutcome {
        let fields = LoggerFields::describe(Some(msg));
        let span = fields.span();
        let _entered = span.enter();

        match self.admit_signers(msg) {
            Ok(admissions) => {
                debug!(saturated = admissions.iter().any(|a| a.reached_limits), "accepted message");
                ValidationOutcome::Accept { fields, admissions }
            }
            Err(error) => {
                debug!(error = %error, "rejected message");
                ValidationOutcome::Reject { fields, error }
            }
        }
    }

    fn admit_signers(&self, msg: &DecodedMessage) -> Result<Vec<Admission>, ValidationError> {
        let msg_id = msg.msg_id();
        let committee_size = self.committees.committee_size(msg_id).ok_or_else(|| {
            ValidationError::UnknownCommittee {
                role: msg_id.role(),
                duty_executor_id: hex::encode(msg_id.duty_executor_id()),
            }
        })?;

        msg.signed.check_distinct_signers()?;
        MessageKind::classify(msg)?;
        let keys = msg
            .signers()
            .iter()
            .map(|signer| AdmissionKey::for_message(msg, *signer))
            .collect::<Option<Vec<_>>>()
            .ok_or(AdmissionError::UnrecognizedMessageBody {
                msg_type: msg.msg_type().into(),
            })?;

        Ok(self.tracker.admit_all(&keys, committee_size, msg)?)
    }

    /// Forget counters for slots before `slot`.
    pub fn prune_before(&self, slot: Slot) -> usize {
        let removed = self.tracker.evict_older_than(slot);
        if removed > 0 {
            debug!(removed, slot = slot.0, "pruned admission counters");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdmissionError;
    use ssv_types::{
        CodecError, DomainType, Height, MsgType, OperatorId, PartialSigMsgType,
        PartialSignatureMessages, QbftMessage, QbftMessageType, Round, RunnerRole,
        SignedSsvMessage, SsvMessage,
    };

    struct NoCommittee;

    impl CommitteeProvider for NoCommittee {
        fn committee_size(&self, _msg_id: &MessageId) -> Option<usize> {
            None
        }
    }

    fn msg_id() -> MessageId {
        MessageId::new(DomainType::default(), RunnerRole::Committee, vec![4u8; 32])
    }

    fn qbft_bytes(msg_type: QbftMessageType, round: Round, signers: &[u64]) -> Vec<u8> {
        let message = QbftMessage {
            msg_type,
            height: Height(10),
            round,
            identifier: Vec::new(),
            root: [0u8; 32],
        };
        let signed_by = signers.iter().map(|id| (OperatorId(*id), vec![1u8; 4])).collect();
        DecodedMessage::consensus(msg_id(), signed_by, message)
            .unwrap()
            .encode()
            .unwrap()
    }

    fn commit_bytes(signers: &[u64]) -> Vec<u8> {
        qbft_bytes(QbftMessageType::Commit, Round::FIRST, signers)
    }

    fn post_consensus_bytes(signer: u64) -> Vec<u8> {
        let messages = PartialSignatureMessages {
            msg_type: PartialSigMsgType::PostConsensus,
            slot: Slot(10),
            messages: Vec::new(),
        };
        DecodedMessage::partial_signatures(msg_id(), (OperatorId(signer), vec![1u8; 4]), messages)
            .unwrap()
            .encode()
            .unwrap()
    }

    fn signer_key(signer: u64, round: Round) -> AdmissionKey {
        AdmissionKey::new(vec![4u8; 32], Slot(10), round, OperatorId(signer))
    }

    fn is_admission_reject(outcome: &ValidationOutcome) -> bool {
        matches!(
            outcome,
            ValidationOutcome::Reject {
                error: ValidationError::Admission(AdmissionError::UnexpectedMessageType { .. }),
                ..
            }
        )
    }

    #[test]
    fn garbage_is_rejected_with_empty_fields() {
        let admission = MessageAdmission::new(StaticCommittee(4));
        let outcome = admission.validate(&[1, 2, 3]);
        assert!(!outcome.is_accept());
        assert_eq!(outcome.fields(), &LoggerFields::default());
        assert!(matches!(
            outcome,
            ValidationOutcome::Reject {
                error: ValidationError::Codec(_),
                ..
            }
        ));
    }

    #[test]
    fn decided_is_counted_for_every_signer() {
        let admission = MessageAdmission::new(StaticCommittee(4));
        let outcome = admission.validate(&commit_bytes(&[1, 2, 3]));
        match outcome {
            ValidationOutcome::Accept { admissions, .. } => assert_eq!(admissions.len(), 3),
            other => panic!("expected accept, got {other:?}"),
        }
        assert_eq!(admission.tracker().len(), 3);
    }

    #[test]
    fn single_commit_saturates_its_key() {
        let admission = MessageAdmission::new(StaticCommittee(4));
        let outcome = admission.validate(&commit_bytes(&[2]));
        assert!(outcome.is_accept());
        assert!(outcome.saturated());

        let outcome = admission.validate(&commit_bytes(&[2]));
        assert!(matches!(
            outcome,
            ValidationOutcome::Reject {
                error: ValidationError::Admission(AdmissionError::UnexpectedMessageType { .. }),
                ..
            }
        ));
    }

    #[test]
    fn unknown_committee_is_rejected() {
        let admission = MessageAdmission::new(NoCommittee);
        let outcome = admission.validate(&commit_bytes(&[2]));
        assert!(matches!(
            outcome,
            ValidationOutcome::Reject {
                error: ValidationError::UnknownCommittee { .. },
                ..
            }
        ));
    }

    #[test]
    fn unknown_body_is_unrecognized() {
        let admission = MessageAdmission::new(StaticCommittee(4));
        let signed = SignedSsvMessage::new(
            vec![(OperatorId(1), vec![0u8; 4])],
            SsvMessage {
                msg_type: MsgType::Unknown(6),
                msg_id: msg_id(),
                data: Vec::new(),
            },
        );
        let outcome = admission.validate(&signed.encode().unwrap());
        assert!(matches!(
            outcome,
            ValidationOutcome::Reject {
                error: ValidationError::Admission(AdmissionError::UnrecognizedMessageBody {
                    msg_type: 6
                }),
                ..
            }
        ));
        // Descriptor is still populated from the envelope.
        assert_eq!(outcome.fields().operator_ids, vec![OperatorId(1)]);
    }

    #[test]
    fn refused_decided_leaves_other_signers_untouched() {
        let admission = MessageAdmission::new(StaticCommittee(4));
        assert!(admission.validate(&post_consensus_bytes(3)).is_accept());

        // Signer 3 already finished the duty, so every copy is refused.
        for _ in 0..5 {
            assert!(is_admission_reject(&admission.validate(&commit_bytes(&[1, 3]))));
        }
        assert_eq!(admission.tracker().counts(&signer_key(1, Round::FIRST)), None);
        assert_eq!(
            admission
                .tracker()
                .counts(&signer_key(3, Round::FIRST))
                .map(|counts| counts.decided),
            Some(0)
        );

        assert!(admission.validate(&commit_bytes(&[1, 2])).is_accept());
        assert_eq!(
            admission
                .tracker()
                .counts(&signer_key(1, Round::FIRST))
                .map(|counts| counts.decided),
            Some(1)
        );
    }

    #[test]
    fn refusal_by_a_later_signer_rolls_back_earlier_ones() {
        let admission = MessageAdmission::new(StaticCommittee(4));
        assert!(admission
            .validate(&qbft_bytes(QbftMessageType::Commit, Round::FIRST, &[4]))
            .is_accept());

        assert!(admission.validate(&commit_bytes(&[1, 2, 4])).is_accept());
        assert!(admission.validate(&post_consensus_bytes(4)).is_accept());

        // Signer 4 is last in the list and refuses; 1 and 2 keep one decided.
        assert!(is_admission_reject(
            &admission.validate(&commit_bytes(&[1, 2, 4]))
        ));
        for signer in [1, 2] {
            assert_eq!(
                admission
                    .tracker()
                    .counts(&signer_key(signer, Round::FIRST))
                    .map(|counts| counts.decided),
                Some(1)
            );
        }
    }

    #[test]
    fn repeated_signer_is_refused() {
        let admission = MessageAdmission::new(StaticCommittee(4));
        let message = QbftMessage {
            msg_type: QbftMessageType::Commit,
            height: Height(10),
            round: Round::FIRST,
            identifier: Vec::new(),
            root: [0u8; 32],
        };
        let valid =
            DecodedMessage::consensus(msg_id(), vec![(OperatorId(3), vec![1u8; 4])], message)
                .unwrap();
        let forged = SignedSsvMessage::new(
            vec![(OperatorId(3), vec![1u8; 4]), (OperatorId(3), vec![2u8; 4])],
            valid.signed.ssv_message.clone(),
        );

        let outcome = admission.validate(&forged.encode().unwrap());
        assert!(matches!(
            outcome,
            ValidationOutcome::Reject {
                error: ValidationError::Codec(CodecError::DuplicateSigner(OperatorId(3))),
                ..
            }
        ));
        assert!(admission.tracker().is_empty());
    }

    #[test]
    fn post_consensus_closes_every_round_of_the_slot() {
        let admission = MessageAdmission::new(StaticCommittee(4));
        assert!(admission.validate(&post_consensus_bytes(2)).is_accept());

        for msg_type in [
            QbftMessageType::Proposal,
            QbftMessageType::Prepare,
            QbftMessageType::Commit,
        ] {
            let outcome = admission.validate(&qbft_bytes(msg_type, Round(3), &[2]));
            assert!(is_admission_reject(&outcome), "{msg_type} in round 3: {outcome:?}");
        }
        assert!(is_admission_reject(
            &admission.validate(&qbft_bytes(QbftMessageType::Commit, Round(3), &[1, 2]))
        ));
        assert!(admission
            .validate(&qbft_bytes(QbftMessageType::RoundChange, Round(3), &[2]))
            .is_accept());

        // Other signers are unaffected.
        assert!(admission
            .validate(&qbft_bytes(QbftMessageType::Proposal, Round(3), &[1]))
            .is_accept());
        assert_eq!(
            admission
                .tracker()
                .counts(&signer_key(1, Round(3)))
                .map(|counts| counts.decided),
            Some(0)
        );
    }

    #[test]
    fn pruning_drops_old_slots() {
        let admission = MessageAdmission::new(StaticCommittee(4));
        admission.validate(&commit_bytes(&[1, 2]));
        assert_eq!(admission.prune_before(Slot(11)), 2);
        assert!(admission.tracker().is_empty());
    }
}
