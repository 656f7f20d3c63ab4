//! Binary codec for gossip payloads.

use crate::ids::{MessageId, OperatorId};
use crate::message::{
    DecodedMessage, MessageBody, MsgType, PartialSignatureMessages, QbftMessage,
    SignedSsvMessage, SsvMessage,
};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed message encoding: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("signed message carries no signers")]
    EmptySigners,
    #[error("signed message has {signers} signers but {signatures} signatures")]
    SignatureCountMismatch { signers: usize, signatures: usize },
    #[error("operator {0} signs the message more than once")]
    DuplicateSigner(OperatorId),
}

impl SignedSsvMessage {
    /// Build a signed message from `(signer, signature)` pairs.
    pub fn new(signed_by: Vec<(OperatorId, Vec<u8>)>, ssv_message: SsvMessage) -> Self {
        let (operator_ids, signatures) = signed_by.into_iter().unzip();
        Self {
            operator_ids,
            signatures,
            ssv_message,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let signed: SignedSsvMessage = bincode::deserialize(bytes)?;
        signed.check_signers()?;
        Ok(signed)
    }

    /// Envelope checks applied on decode.
    pub fn check_signers(&self) -> Result<(), CodecError> {
        if self.operator_ids.is_empty() {
            return Err(CodecError::EmptySigners);
        }
        if self.operator_ids.len() != self.signatures.len() {
            return Err(CodecError::SignatureCountMismatch {
                signers: self.operator_ids.len(),
                signatures: self.signatures.len(),
            });
        }
        self.check_distinct_signers()
    }

    /// No operator may appear twice among the signers.
    pub fn check_distinct_signers(&self) -> Result<(), CodecError> {
        let mut seen = HashSet::with_capacity(self.operator_ids.len());
        match self.operator_ids.iter().find(|id| !seen.insert(**id)) {
            Some(duplicate) => Err(CodecError::DuplicateSigner(*duplicate)),
            None => Ok(()),
        }
    }
}

impl DecodedMessage {
    /// Decode raw gossip bytes into a signed envelope and its body.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_signed(SignedSsvMessage::decode(bytes)?)
    }

    pub fn from_signed(signed: SignedSsvMessage) -> Result<Self, CodecError> {
        signed.check_signers()?;
        let data = &signed.ssv_message.data;
        let body = match signed.ssv_message.msg_type {
            MsgType::Consensus => MessageBody::Consensus(bincode::deserialize(data)?),
            MsgType::PartialSignature => {
                MessageBody::PartialSignature(bincode::deserialize(data)?)
            }
            MsgType::Unknown(other) => MessageBody::Unknown(other),
        };
        Ok(Self { signed, body })
    }

    /// Wrap a QBFT message signed by `signed_by`.
    pub fn consensus(
        msg_id: MessageId,
        signed_by: Vec<(OperatorId, Vec<u8>)>,
        message: QbftMessage,
    ) -> Result<Self, CodecError> {
        let ssv_message = SsvMessage {
            msg_type: MsgType::Consensus,
            msg_id,
            data: bincode::serialize(&message)?,
        };
        let signed = SignedSsvMessage::new(signed_by, ssv_message);
        signed.check_distinct_signers()?;
        Ok(Self {
            signed,
            body: MessageBody::Consensus(message),
        })
    }

    /// Wrap a partial signature batch signed by `signer`.
    pub fn partial_signatures(
        msg_id: MessageId,
        signer: (OperatorId, Vec<u8>),
        messages: PartialSignatureMessages,
    ) -> Result<Self, CodecError> {
        let ssv_message = SsvMessage {
            msg_type: MsgType::PartialSignature,
            msg_id,
            data: bincode::serialize(&messages)?,
        };
        Ok(Self {
            signed: SignedSsvMessage::new(vec![signer], ssv_message),
            body: MessageBody::PartialSignature(messages),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        self.signed.encode()
    }
}
