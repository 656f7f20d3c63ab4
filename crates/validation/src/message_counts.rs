//! Counting and ordering of messages per signer, slot and round.

use crate::error::AdmissionError;
use crate::kind::{MessageKind, MessageLimits};
use ssv_types::DecodedMessage;
use std::fmt;

/// Messages observed from one signer within one slot and round.
///
/// Counts only grow. The owner of the counter drops it once the round is
/// finished; nothing here resets it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    pub pre_consensus: usize,
    pub proposal: usize,
    pub prepare: usize,
    pub commit: usize,
    pub decided: usize,
    pub round_change: usize,
    pub post_consensus: usize,
}

impl MessageCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        match kind {
            MessageKind::PreConsensus => self.pre_consensus,
            MessageKind::Proposal => self.proposal,
            MessageKind::Prepare => self.prepare,
            MessageKind::Commit => self.commit,
            MessageKind::Decided => self.decided,
            MessageKind::RoundChange => self.round_change,
            MessageKind::PostConsensus => self.post_consensus,
        }
    }

    fn count_mut(&mut self, kind: MessageKind) -> &mut usize {
        match kind {
            MessageKind::PreConsensus => &mut self.pre_consensus,
            MessageKind::Proposal => &mut self.proposal,
            MessageKind::Prepare => &mut self.prepare,
            MessageKind::Commit => &mut self.commit,
            MessageKind::Decided => &mut self.decided,
            MessageKind::RoundChange => &mut self.round_change,
            MessageKind::PostConsensus => &mut self.post_consensus,
        }
    }

    /// Check that `msg` may be accepted given what the signer already sent.
    ///
    /// Within a round a kind is accepted while its count is below its limit,
    /// and consensus messages must keep protocol order: proposal and prepare
    /// before any commit, single commit before decided, decided before
    /// post-consensus.
    pub fn validate(&self, msg: &DecodedMessage, limits: &MessageLimits) -> Result<(), AdmissionError> {
        let kind = MessageKind::classify(msg)?;

        let at_limit = self.count(kind) >= limits.limit(kind);
        let conflicting = match kind {
            MessageKind::Proposal | MessageKind::Prepare => {
                self.commit > 0 || self.decided > 0 || self.post_consensus > 0
            }
            MessageKind::Commit => self.decided > 0 || self.post_consensus > 0,
            MessageKind::Decided => self.post_consensus > 0,
            MessageKind::RoundChange | MessageKind::PreConsensus | MessageKind::PostConsensus => {
                false
            }
        };

        if at_limit || conflicting {
            return Err(AdmissionError::unexpected(format!("{kind}, having {self}")));
        }
        Ok(())
    }

    /// Count `msg`. Messages that cannot be classified are ignored; callers
    /// run [`validate`](Self::validate) first.
    pub fn record(&mut self, msg: &DecodedMessage) {
        if let Ok(kind) = MessageKind::classify(msg) {
            *self.count_mut(kind) += 1;
        }
    }

    /// True once any single kind has reached its limit.
    pub fn reached_limits(&self, limits: &MessageLimits) -> bool {
        MessageKind::ALL
            .iter()
            .any(|kind| self.count(*kind) >= limits.limit(*kind))
    }
}

impl fmt::Display for MessageCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pre-consensus: {}, proposal: {}, prepare: {}, commit: {}, decided: {}, round change: {}, post-consensus: {}",
            self.pre_consensus,
            self.proposal,
            self.prepare,
            self.commit,
            self.decided,
            self.round_change,
            self.post_consensus,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssv_types::{
        DomainType, Height, MessageId, OperatorId, PartialSigMsgType, PartialSignatureMessages,
        QbftMessage, QbftMessageType, Round, RunnerRole, Slot,
    };

    fn msg_id() -> MessageId {
        MessageId::new(DomainType::default(), RunnerRole::Committee, vec![3u8; 32])
    }

    fn qbft(msg_type: QbftMessageType, signers: &[u64]) -> DecodedMessage {
        let message = QbftMessage {
            msg_type,
            height: Height(10),
            round: Round::FIRST,
            identifier: Vec::new(),
            root: [0u8; 32],
        };
        let signed_by = signers.iter().map(|id| (OperatorId(*id), vec![0u8; 4])).collect();
        DecodedMessage::consensus(msg_id(), signed_by, message).unwrap()
    }

    fn partial(msg_type: PartialSigMsgType) -> DecodedMessage {
        let messages = PartialSignatureMessages {
            msg_type,
            slot: Slot(10),
            messages: Vec::new(),
        };
        DecodedMessage::partial_signatures(msg_id(), (OperatorId(3), vec![0u8; 4]), messages)
            .unwrap()
    }

    fn proposal() -> DecodedMessage {
        qbft(QbftMessageType::Proposal, &[3])
    }

    fn prepare() -> DecodedMessage {
        qbft(QbftMessageType::Prepare, &[3])
    }

    fn commit() -> DecodedMessage {
        qbft(QbftMessageType::Commit, &[3])
    }

    fn decided() -> DecodedMessage {
        qbft(QbftMessageType::Commit, &[1, 2, 3])
    }

    fn accept(counts: &mut MessageCounts, msg: &DecodedMessage, limits: &MessageLimits) {
        counts.validate(msg, limits).expect("message should be accepted");
        counts.record(msg);
    }

    fn assert_unexpected(result: Result<(), AdmissionError>) {
        assert!(
            matches!(result, Err(AdmissionError::UnexpectedMessageType { .. })),
            "expected UnexpectedMessageType, got {result:?}"
        );
    }

    #[test]
    fn commit_after_proposal_is_accepted() {
        let limits = MessageLimits::for_committee(4);
        let mut counts = MessageCounts::new();
        accept(&mut counts, &proposal(), &limits);
        assert!(counts.validate(&commit(), &limits).is_ok());
    }

    #[test]
    fn proposal_after_commit_is_rejected() {
        let limits = MessageLimits::for_committee(4);
        let mut counts = MessageCounts::new();
        accept(&mut counts, &commit(), &limits);
        assert_unexpected(counts.validate(&proposal(), &limits));
    }

    #[test]
    fn proposal_after_decided_or_post_consensus_is_rejected() {
        let limits = MessageLimits::for_committee(4);

        let mut counts = MessageCounts::new();
        accept(&mut counts, &decided(), &limits);
        assert_unexpected(counts.validate(&proposal(), &limits));

        let mut counts = MessageCounts::new();
        accept(&mut counts, &partial(PartialSigMsgType::PostConsensus), &limits);
        assert_unexpected(counts.validate(&proposal(), &limits));
    }

    #[test]
    fn duplicate_or_late_prepare_is_rejected() {
        let limits = MessageLimits::for_committee(4);
        let mut counts = MessageCounts::new();
        accept(&mut counts, &prepare(), &limits);
        assert_unexpected(counts.validate(&prepare(), &limits));

        let mut counts = MessageCounts::new();
        accept(&mut counts, &commit(), &limits);
        assert_unexpected(counts.validate(&prepare(), &limits));
    }

    #[test]
    fn commit_after_decided_is_rejected() {
        let limits = MessageLimits::for_committee(4);
        let mut counts = MessageCounts::new();
        accept(&mut counts, &decided(), &limits);
        assert_unexpected(counts.validate(&commit(), &limits));
    }

    #[test]
    fn decided_after_commit_is_accepted() {
        let limits = MessageLimits::for_committee(4);
        let mut counts = MessageCounts::new();
        accept(&mut counts, &commit(), &limits);
        assert!(counts.validate(&decided(), &limits).is_ok());
    }

    #[test]
    fn decided_after_post_consensus_is_rejected() {
        let limits = MessageLimits::for_committee(4);
        let mut counts = MessageCounts::new();
        accept(&mut counts, &partial(PartialSigMsgType::PostConsensus), &limits);
        assert_unexpected(counts.validate(&decided(), &limits));
    }

    #[test]
    fn decided_is_capped_by_committee_limit() {
        let limits = MessageLimits::for_committee(4);
        let mut counts = MessageCounts::new();
        for _ in 0..limits.decided {
            accept(&mut counts, &decided(), &limits);
        }
        assert_unexpected(counts.validate(&decided(), &limits));
    }

    #[test]
    fn round_change_and_partial_signatures_allowed_once() {
        let limits = MessageLimits::for_committee(4);
        let mut counts = MessageCounts::new();

        let round_change = qbft(QbftMessageType::RoundChange, &[3]);
        accept(&mut counts, &round_change, &limits);
        assert_unexpected(counts.validate(&round_change, &limits));

        let randao = partial(PartialSigMsgType::Randao);
        accept(&mut counts, &randao, &limits);
        assert_unexpected(counts.validate(&partial(PartialSigMsgType::SelectionProof), &limits));

        let post = partial(PartialSigMsgType::PostConsensus);
        accept(&mut counts, &post, &limits);
        assert_unexpected(counts.validate(&post, &limits));
    }

    #[test]
    fn error_describes_prior_state() {
        let limits = MessageLimits::for_committee(4);
        let mut counts = MessageCounts::new();
        accept(&mut counts, &commit(), &limits);
        match counts.validate(&proposal(), &limits) {
            Err(AdmissionError::UnexpectedMessageType { got }) => {
                assert!(got.starts_with("proposal, having"));
                assert!(got.contains("commit: 1"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn reached_limits_is_any_kind() {
        let limits = MessageLimits::for_committee(4);
        let mut counts = MessageCounts::new();
        assert!(!counts.reached_limits(&limits));

        counts.record(&qbft(QbftMessageType::RoundChange, &[3]));
        assert!(counts.reached_limits(&limits));
        assert_eq!(counts.proposal, 0);
        assert_eq!(counts.decided, 0);
    }

    #[test]
    fn record_routes_commit_by_signer_count() {
        let mut counts = MessageCounts::new();
        counts.record(&commit());
        counts.record(&decided());
        counts.record(&decided());
        assert_eq!(counts.commit, 1);
        assert_eq!(counts.decided, 2);
    }

    #[test]
    fn record_ignores_unclassifiable_messages() {
        let mut counts = MessageCounts::new();
        counts.record(&qbft(QbftMessageType::Unknown(9), &[3]));
        counts.record(&partial(PartialSigMsgType::VoluntaryExit));
        assert_eq!(counts, MessageCounts::default());
    }
}
