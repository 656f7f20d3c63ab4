use ssv_types::{CodecError, RunnerRole};
use thiserror::Error;

/// Reasons a message is refused by the admission counter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The message kind conflicts with what this signer already sent in the
    /// round, or the kind is outside the known taxonomy.
    #[error("unexpected message type (got {got})")]
    UnexpectedMessageType { got: String },
    /// The SSV message type is not one this node can decode.
    #[error("unrecognized message body (ssv message type {msg_type})")]
    UnrecognizedMessageBody { msg_type: u64 },
    /// A consensus message without any signer.
    #[error("message has no signers")]
    NoSigners,
}

impl AdmissionError {
    pub(crate) fn unexpected(got: impl Into<String>) -> Self {
        AdmissionError::UnexpectedMessageType { got: got.into() }
    }
}

/// Reasons the admission pipeline refuses raw gossip data.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("no committee known for {role} duty executor {duty_executor_id}")]
    UnknownCommittee {
        role: RunnerRole,
        duty_executor_id: String,
    },
}
