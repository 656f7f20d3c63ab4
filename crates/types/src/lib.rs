//! SSV wire types
//!
//! Identifiers, QBFT and partial-signature messages exchanged over the gossip
//! mesh, and the codec that turns raw gossip payloads into [`DecodedMessage`].

pub mod codec;
pub mod ids;
pub mod message;

pub use codec::CodecError;
pub use ids::{DomainType, Height, MessageId, OperatorId, Round, RunnerRole, Slot};
pub use message::{
    DecodedMessage, MessageBody, MsgType, PartialSigMsgType, PartialSignatureMessage,
    PartialSignatureMessages, QbftMessage, QbftMessageType, SignedSsvMessage, SsvMessage,
};
