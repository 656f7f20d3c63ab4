//! Sharded store of admission counters.
//!
//! Every (duty, slot, round, signer) key owns a [`MessageCounts`]. Validation
//! and recording for one key happen under the lock of the shard holding it, so
//! two deliveries for the same key can never both pass the check before either
//! is counted. Keys in different shards proceed in parallel.
//!
//! A message with several signers is admitted under all of its keys or none:
//! the shards involved are locked in ascending index order, every key is
//! validated, and only then is anything recorded.

use crate::error::AdmissionError;
use crate::kind::{MessageKind, MessageLimits};
use crate::message_counts::MessageCounts;
use parking_lot::{Mutex, MutexGuard};
use ssv_types::{DecodedMessage, OperatorId, Round, Slot};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tracing::trace;

const DEFAULT_SHARDS: usize = 64;

/// Partial signature messages carry no round. They are counted under this
/// round of their slot, and consensus messages of later rounds consult it so
/// that nothing is accepted after a signer's post-consensus message.
pub const PARTIAL_SIGNATURE_ROUND: Round = Round::FIRST;

type Shard = HashMap<AdmissionKey, MessageCounts>;

/// Counting scope: one signer, in one round of one duty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdmissionKey {
    pub duty_executor_id: Vec<u8>,
    pub slot: Slot,
    pub round: Round,
    pub signer: OperatorId,
}

impl AdmissionKey {
    pub fn new(duty_executor_id: impl Into<Vec<u8>>, slot: Slot, round: Round, signer: OperatorId) -> Self {
        Self {
            duty_executor_id: duty_executor_id.into(),
            slot,
            round,
            signer,
        }
    }

    /// Key for `signer` of `msg`. Partial signature messages are counted
    /// under [`PARTIAL_SIGNATURE_ROUND`].
    pub fn for_message(msg: &DecodedMessage, signer: OperatorId) -> Option<Self> {
        let slot = msg.slot()?;
        let round = msg.round().unwrap_or(PARTIAL_SIGNATURE_ROUND);
        Some(Self::new(msg.msg_id().duty_executor_id(), slot, round, signer))
    }

    /// Key holding the partial signature counts of this signer's slot.
    fn slot_key(&self) -> Self {
        Self {
            round: PARTIAL_SIGNATURE_ROUND,
            ..self.clone()
        }
    }
}

/// Result of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub kind: MessageKind,
    /// Counts for the key after this message was recorded.
    pub counts: MessageCounts,
    /// Whether any kind is now at its limit for this key.
    pub reached_limits: bool,
}

/// Admission counters for all live keys.
#[derive(Debug)]
pub struct AdmissionTracker {
    shards: Vec<Mutex<HashMap<AdmissionKey, MessageCounts>>>,
}

impl AdmissionTracker {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_index(&self, key: &AdmissionKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &AdmissionKey) -> &Mutex<Shard> {
        &self.shards[self.shard_index(key)]
    }

    /// Validate and record `msg` for `key` as one step.
    pub fn admit(
        &self,
        key: &AdmissionKey,
        committee_size: usize,
        msg: &DecodedMessage,
    ) -> Result<Admission, AdmissionError> {
        let mut admissions = self.admit_all(std::slice::from_ref(key), committee_size, msg)?;
        admissions
            .pop()
            .ok_or_else(|| AdmissionError::unexpected("message without admission keys"))
    }

    /// Validate `msg` under every key, then record it under all of them.
    /// If any key refuses the message, no counter changes.
    pub fn admit_all(
        &self,
        keys: &[AdmissionKey],
        committee_size: usize,
        msg: &DecodedMessage,
    ) -> Result<Vec<Admission>, AdmissionError> {
        let limits = MessageLimits::for_committee(committee_size);
        let kind = MessageKind::classify(msg)?;

        let slot_keys: Vec<Option<AdmissionKey>> = keys
            .iter()
            .map(|key| (key.round != PARTIAL_SIGNATURE_ROUND).then(|| key.slot_key()))
            .collect();

        let mut indices: Vec<usize> = keys
            .iter()
            .chain(slot_keys.iter().flatten())
            .map(|key| self.shard_index(key))
            .collect();
        indices.sort_unstable();
        indices.dedup();
        // Ascending order: two messages sharing shards never wait on each other
        // in opposite orders.
        let guards: HashMap<usize, MutexGuard<'_, Shard>> = indices
            .iter()
            .map(|&index| (index, self.shards[index].lock()))
            .collect();
        let stored = |key: &AdmissionKey| {
            guards
                .get(&self.shard_index(key))
                .and_then(|shard| shard.get(key).copied())
        };

        let mut staged: Vec<(&AdmissionKey, MessageCounts)> = Vec::with_capacity(keys.len());
        for (key, slot_key) in keys.iter().zip(&slot_keys) {
            let mut counts = staged
                .iter()
                .rev()
                .find(|(staged_key, _)| *staged_key == key)
                .map(|(_, counts)| *counts)
                .or_else(|| stored(key))
                .unwrap_or_default();

            let mut view = counts;
            if let Some(slot_counts) = slot_key.as_ref().and_then(|slot_key| stored(slot_key)) {
                view.post_consensus = view.post_consensus.max(slot_counts.post_consensus);
            }
            view.validate(msg, &limits)?;

            counts.record(msg);
            staged.push((key, counts));
        }

        let mut guards = guards;
        let mut admissions = Vec::with_capacity(staged.len());
        for (key, counts) in staged {
            if let Some(shard) = guards.get_mut(&self.shard_index(key)) {
                shard.insert(key.clone(), counts);
            }
            let reached_limits = counts.reached_limits(&limits);
            trace!(
                signer = key.signer.0,
                slot = key.slot.0,
                round = key.round.0,
                %kind,
                reached_limits,
                "admitted message"
            );
            admissions.push(Admission {
                kind,
                counts,
                reached_limits,
            });
        }
        Ok(admissions)
    }

    /// Current counts for `key`, if any message was admitted under it.
    pub fn counts(&self, key: &AdmissionKey) -> Option<MessageCounts> {
        self.shard(key).lock().get(key).copied()
    }

    /// Drop the counter for `key`.
    pub fn evict(&self, key: &AdmissionKey) -> Option<MessageCounts> {
        self.shard(key).lock().remove(key)
    }

    /// Drop every counter for slots before `slot`. Returns the number removed.
    pub fn evict_older_than(&self, slot: Slot) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|key, _| key.slot >= slot);
            removed += before - shard.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AdmissionTracker {
    fn default() -> Self {
        Self::new()
    }
}
