//! Loggable description of an incoming message.

use ssv_types::{DecodedMessage, MessageBody, MsgType, OperatorId, QbftMessageType, Round, RunnerRole, Slot};
use tracing::field::Empty;
use tracing::Span;

/// Consensus details of a message, present for QBFT messages only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusFields {
    pub round: Round,
    pub qbft_message_type: QbftMessageType,
}

/// Facts about a message used for logs and metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggerFields {
    pub duty_executor_id: Vec<u8>,
    pub role: Option<RunnerRole>,
    pub ssv_message_type: Option<MsgType>,
    pub slot: Slot,
    pub consensus: Option<ConsensusFields>,
    pub operator_ids: Vec<OperatorId>,
}

impl LoggerFields {
    /// Describe `msg`. An absent message yields the empty descriptor so the
    /// result can always be attached to a log record.
    pub fn describe(msg: Option<&DecodedMessage>) -> Self {
        let Some(msg) = msg else {
            return Self::default();
        };

        let msg_id = msg.msg_id();
        let mut fields = Self {
            duty_executor_id: msg_id.duty_executor_id().to_vec(),
            role: Some(msg_id.role()),
            ssv_message_type: Some(msg.msg_type()),
            slot: Slot::default(),
            consensus: None,
            operator_ids: msg.signers().to_vec(),
        };

        match &msg.body {
            MessageBody::Consensus(qbft) => {
                fields.slot = qbft.height.into();
                fields.consensus = Some(ConsensusFields {
                    round: qbft.round,
                    qbft_message_type: qbft.msg_type,
                });
            }
            MessageBody::PartialSignature(partial) => fields.slot = partial.slot,
            MessageBody::Unknown(_) => {}
        }

        fields
    }

    /// Key/value pairs in log order.
    pub fn as_fields(&self) -> Vec<(&'static str, String)> {
        let mut result = vec![
            ("duty_executor_id", hex::encode(&self.duty_executor_id)),
            (
                "role",
                self.role.map(|role| role.to_string()).unwrap_or_default(),
            ),
            (
                "ssv_message_type",
                self.ssv_message_type
                    .map(|msg_type| msg_type.to_string())
                    .unwrap_or_default(),
            ),
            ("slot", self.slot.to_string()),
            ("operator_ids", format_operator_ids(&self.operator_ids)),
        ];

        if let Some(consensus) = &self.consensus {
            result.push(("round", consensus.round.to_string()));
            result.push(("qbft_message_type", consensus.qbft_message_type.to_string()));
        }

        result
    }

    /// Debug span carrying the descriptor.
    pub fn span(&self) -> Span {
        let span = tracing::debug_span!(
            "ssv_message",
            duty_executor_id = %hex::encode(&self.duty_executor_id),
            role = Empty,
            ssv_message_type = Empty,
            slot = self.slot.0,
            operator_ids = %format_operator_ids(&self.operator_ids),
            round = Empty,
            qbft_message_type = Empty,
        );

        if let Some(role) = self.role {
            span.record("role", role.as_str());
        }
        if let Some(msg_type) = self.ssv_message_type {
            span.record("ssv_message_type", tracing::field::display(msg_type));
        }
        if let Some(consensus) = &self.consensus {
            span.record("round", consensus.round.0);
            span.record(
                "qbft_message_type",
                tracing::field::display(consensus.qbft_message_type),
            );
        }

        span
    }
}

fn format_operator_ids(ids: &[OperatorId]) -> String {
    let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("[{}]", ids.join(","))
}
