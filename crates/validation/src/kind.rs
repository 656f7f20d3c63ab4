//! Message taxonomy and per-round limits.

use crate::error::AdmissionError;
use ssv_types::{DecodedMessage, MessageBody, PartialSigMsgType, QbftMessageType};
use std::fmt;

/// Kind of a message as far as admission counting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PreConsensus,
    Proposal,
    Prepare,
    /// Commit carrying exactly one signer.
    Commit,
    /// Commit aggregated from more than one signer.
    Decided,
    RoundChange,
    PostConsensus,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        MessageKind::PreConsensus,
        MessageKind::Proposal,
        MessageKind::Prepare,
        MessageKind::Commit,
        MessageKind::Decided,
        MessageKind::RoundChange,
        MessageKind::PostConsensus,
    ];

    /// Classify a decoded message.
    ///
    /// Unknown QBFT or partial-signature types are `UnexpectedMessageType`;
    /// unknown SSV bodies are `UnrecognizedMessageBody`.
    pub fn classify(msg: &DecodedMessage) -> Result<MessageKind, AdmissionError> {
        match &msg.body {
            MessageBody::Consensus(qbft) => match qbft.msg_type {
                QbftMessageType::Proposal => Ok(MessageKind::Proposal),
                QbftMessageType::Prepare => Ok(MessageKind::Prepare),
                QbftMessageType::Commit => match msg.signers().len() {
                    0 => Err(AdmissionError::NoSigners),
                    1 => Ok(MessageKind::Commit),
                    _ => Ok(MessageKind::Decided),
                },
                QbftMessageType::RoundChange => Ok(MessageKind::RoundChange),
                QbftMessageType::Unknown(other) => Err(AdmissionError::unexpected(format!(
                    "unknown qbft message type {other}"
                ))),
            },
            MessageBody::PartialSignature(partial) => match partial.msg_type {
                PartialSigMsgType::Randao
                | PartialSigMsgType::SelectionProof
                | PartialSigMsgType::ContributionProofs
                | PartialSigMsgType::ValidatorRegistration => Ok(MessageKind::PreConsensus),
                PartialSigMsgType::PostConsensus => Ok(MessageKind::PostConsensus),
                other => Err(AdmissionError::unexpected(format!(
                    "unsupported partial signature type {other}"
                ))),
            },
            MessageBody::Unknown(msg_type) => Err(AdmissionError::UnrecognizedMessageBody {
                msg_type: *msg_type,
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PreConsensus => "pre-consensus",
            MessageKind::Proposal => "proposal",
            MessageKind::Prepare => "prepare",
            MessageKind::Commit => "commit",
            MessageKind::Decided => "decided",
            MessageKind::RoundChange => "round change",
            MessageKind::PostConsensus => "post-consensus",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum number of messages of each kind a signer may send within one
/// slot and round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLimits {
    pub pre_consensus: usize,
    pub proposal: usize,
    pub prepare: usize,
    pub commit: usize,
    pub decided: usize,
    pub round_change: usize,
    pub post_consensus: usize,
}

impl MessageLimits {
    /// Limits for a committee of `committee_size` operators. Decided messages
    /// may be re-delivered with growing signer sets, up to one more than the
    /// committee size.
    pub fn for_committee(committee_size: usize) -> Self {
        Self {
            pre_consensus: 1,
            proposal: 1,
            prepare: 1,
            commit: 1,
            decided: committee_size + 1,
            round_change: 1,
            post_consensus: 1,
        }
    }

    pub fn limit(&self, kind: MessageKind) -> usize {
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
}
