//! SSV message types
//!
//! A gossip payload is a [`SignedSsvMessage`]: the operator signatures over an
//! [`SsvMessage`] whose `data` carries either a QBFT consensus message or a
//! batch of partial signatures. [`DecodedMessage`] pairs the signed envelope
//! with its decoded [`MessageBody`].

use crate::ids::{Height, MessageId, OperatorId, Round, Slot};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SSV-level message type carried by [`SsvMessage::msg_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum MsgType {
    Consensus,
    PartialSignature,
    Unknown(u64),
}

impl From<u64> for MsgType {
    fn from(value: u64) -> Self {
        match value {
            0 => MsgType::Consensus,
            1 => MsgType::PartialSignature,
            other => MsgType::Unknown(other),
        }
    }
}

impl From<MsgType> for u64 {
    fn from(value: MsgType) -> Self {
        match value {
            MsgType::Consensus => 0,
            MsgType::PartialSignature => 1,
            MsgType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgType::Consensus => f.write_str("consensus"),
            MsgType::PartialSignature => f.write_str("partial_signature"),
            MsgType::Unknown(other) => write!(f, "unknown({other})"),
        }
    }
}

/// QBFT message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum QbftMessageType {
    Proposal,
    Prepare,
    Commit,
    RoundChange,
    Unknown(u64),
}

impl From<u64> for QbftMessageType {
    fn from(value: u64) -> Self {
        match value {
            0 => QbftMessageType::Proposal,
            1 => QbftMessageType::Prepare,
            2 => QbftMessageType::Commit,
            3 => QbftMessageType::RoundChange,
            other => QbftMessageType::Unknown(other),
        }
    }
}

impl From<QbftMessageType> for u64 {
    fn from(value: QbftMessageType) -> Self {
        match value {
            QbftMessageType::Proposal => 0,
            QbftMessageType::Prepare => 1,
            QbftMessageType::Commit => 2,
            QbftMessageType::RoundChange => 3,
            QbftMessageType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for QbftMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QbftMessageType::Proposal => f.write_str("proposal"),
            QbftMessageType::Prepare => f.write_str("prepare"),
            QbftMessageType::Commit => f.write_str("commit"),
            QbftMessageType::RoundChange => f.write_str("round_change"),
            QbftMessageType::Unknown(other) => write!(f, "unknown({other})"),
        }
    }
}

/// Partial signature message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum PartialSigMsgType {
    PostConsensus,
    Randao,
    SelectionProof,
    ContributionProofs,
    ValidatorRegistration,
    VoluntaryExit,
    Unknown(u64),
}

impl From<u64> for PartialSigMsgType {
    fn from(value: u64) -> Self {
        match value {
            0 => PartialSigMsgType::PostConsensus,
            1 => PartialSigMsgType::Randao,
            2 => PartialSigMsgType::SelectionProof,
            3 => PartialSigMsgType::ContributionProofs,
            4 => PartialSigMsgType::ValidatorRegistration,
            5 => PartialSigMsgType::VoluntaryExit,
            other => PartialSigMsgType::Unknown(other),
        }
    }
}

impl From<PartialSigMsgType> for u64 {
    fn from(value: PartialSigMsgType) -> Self {
        match value {
            PartialSigMsgType::PostConsensus => 0,
            PartialSigMsgType::Randao => 1,
            PartialSigMsgType::SelectionProof => 2,
            PartialSigMsgType::ContributionProofs => 3,
            PartialSigMsgType::ValidatorRegistration => 4,
            PartialSigMsgType::VoluntaryExit => 5,
            PartialSigMsgType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for PartialSigMsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialSigMsgType::PostConsensus => f.write_str("post_consensus"),
            PartialSigMsgType::Randao => f.write_str("randao"),
            PartialSigMsgType::SelectionProof => f.write_str("selection_proof"),
            PartialSigMsgType::ContributionProofs => f.write_str("contribution_proofs"),
            PartialSigMsgType::ValidatorRegistration => f.write_str("validator_registration"),
            PartialSigMsgType::VoluntaryExit => f.write_str("voluntary_exit"),
            PartialSigMsgType::Unknown(other) => write!(f, "unknown({other})"),
        }
    }
}

/// QBFT consensus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QbftMessage {
    pub msg_type: QbftMessageType,
    pub height: Height,
    pub round: Round,
    #[serde(with = "serde_bytes")]
    pub identifier: Vec<u8>,
    pub root: [u8; 32],
}

/// One operator's partial signature for a single validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignatureMessage {
    #[serde(with = "serde_bytes")]
    pub partial_signature: Vec<u8>,
    pub signing_root: [u8; 32],
    pub signer: OperatorId,
    pub validator_index: u64,
}

/// Batch of partial signatures produced by one operator for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignatureMessages {
    pub msg_type: PartialSigMsgType,
    pub slot: Slot,
    pub messages: Vec<PartialSignatureMessage>,
}

/// Unsigned SSV message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsvMessage {
    pub msg_type: MsgType,
    pub msg_id: MessageId,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// SSV message signed by one or more operators.
///
/// `operator_ids[i]` produced `signatures[i]`. More than one operator id on a
/// commit message makes it an aggregated (decided) commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedSsvMessage {
    pub operator_ids: Vec<OperatorId>,
    pub signatures: Vec<Vec<u8>>,
    pub ssv_message: SsvMessage,
}

/// Decoded message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Consensus(QbftMessage),
    PartialSignature(PartialSignatureMessages),
    /// Body of an SSV message type this node does not understand.
    Unknown(u64),
}

/// Signed message together with its decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub signed: SignedSsvMessage,
    pub body: MessageBody,
}

impl DecodedMessage {
    pub fn msg_id(&self) -> &MessageId {
        &self.signed.ssv_message.msg_id
    }

    pub fn msg_type(&self) -> MsgType {
        self.signed.ssv_message.msg_type
    }

    pub fn signers(&self) -> &[OperatorId] {
        &self.signed.operator_ids
    }

    /// Slot the message refers to, if the body carries one.
    pub fn slot(&self) -> Option<Slot> {
        match &self.body {
            MessageBody::Consensus(msg) => Some(msg.height.into()),
            MessageBody::PartialSignature(msgs) => Some(msgs.slot),
            MessageBody::Unknown(_) => None,
        }
    }

    /// QBFT round for consensus messages.
    pub fn round(&self) -> Option<Round> {
        match &self.body {
            MessageBody::Consensus(msg) => Some(msg.round),
            _ => None,
        }
    }
}
