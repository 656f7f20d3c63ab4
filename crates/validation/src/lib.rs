//! SSV message admission
//!
//! Enforces, per signer and per round of a duty, how many messages of each
//! kind a signer may contribute and in which order, before messages reach
//! the QBFT state machine.
//!
//! ## Modules
//! - `kind`: message taxonomy and per-round limits
//! - `message_counts`: the admission counter (validate, record, limits)
//! - `logger_fields`: loggable message descriptor
//! - `tracker`: sharded per-key counters with atomic validate+record
//! - `pipeline`: decoding and admission of raw gossip payloads

pub mod error;
pub mod kind;
pub mod logger_fields;
pub mod message_counts;
pub mod pipeline;
pub mod tracker;

pub use error::{AdmissionError, ValidationError};
pub use kind::{MessageKind, MessageLimits};
pub use logger_fields::{ConsensusFields, LoggerFields};
pub use message_counts::MessageCounts;
pub use pipeline::{CommitteeProvider, MessageAdmission, StaticCommittee, ValidationOutcome};
pub use tracker::{Admission, AdmissionKey, AdmissionTracker, PARTIAL_SIGNATURE_ROUND};
