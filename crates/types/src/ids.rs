use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a committee operator (a message signer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct OperatorId(pub u64);

/// Beacon chain slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Slot(pub u64);

/// QBFT instance height. Heights are assigned one per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Height(pub u64);

/// QBFT round within a single height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Round(pub u64);

impl Round {
    /// Rounds start at one; zero is reserved for "no round".
    pub const FIRST: Round = Round(1);
}

impl From<Height> for Slot {
    fn from(height: Height) -> Self {
        Slot(height.0)
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network domain separator (fork/network version).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DomainType(pub [u8; 4]);

/// Duty runner role a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunnerRole {
    #[default]
    Committee,
    AggregatorCommittee,
    Proposer,
    SyncCommitteeContribution,
    ValidatorRegistration,
    VoluntaryExit,
}

impl RunnerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerRole::Committee => "COMMITTEE_RUNNER",
            RunnerRole::AggregatorCommittee => "AGGREGATOR_COMMITTEE_RUNNER",
            RunnerRole::Proposer => "PROPOSER_RUNNER",
            RunnerRole::SyncCommitteeContribution => "SYNC_COMMITTEE_CONTRIBUTION_RUNNER",
            RunnerRole::ValidatorRegistration => "VALIDATOR_REGISTRATION_RUNNER",
            RunnerRole::VoluntaryExit => "VOLUNTARY_EXIT_RUNNER",
        }
    }
}

impl fmt::Display for RunnerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the duty a message belongs to: domain, role and the duty
/// executor (a validator public key or a committee id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MessageId {
    pub domain: DomainType,
    pub role: RunnerRole,
    #[serde(with = "serde_bytes")]
    pub duty_executor_id: Vec<u8>,
}

impl MessageId {
    pub fn new(domain: DomainType, role: RunnerRole, duty_executor_id: impl Into<Vec<u8>>) -> Self {
        Self {
            domain,
            role,
            duty_executor_id: duty_executor_id.into(),
        }
    }

    pub fn duty_executor_id(&self) -> &[u8] {
        &self.duty_executor_id
    }

    pub fn role(&self) -> RunnerRole {
        self.role
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            hex::encode(self.domain.0),
            self.role,
            hex::encode(&self.duty_executor_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_display_is_hex() {
        let id = MessageId::new(DomainType([0, 0, 0, 1]), RunnerRole::Proposer, vec![0xab, 0xcd]);
        assert_eq!(id.to_string(), "00000001:PROPOSER_RUNNER:abcd");
    }

    #[test]
    fn slot_from_height() {
        assert_eq!(Slot::from(Height(42)), Slot(42));
    }
}
