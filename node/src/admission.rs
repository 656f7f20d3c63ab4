//! Gossip validation backed by the message admission pipeline.

use crate::clock::SlotClock;
use ssv_network::{GossipValidator, PeerId, ValidationResult};
use ssv_types::{DecodedMessage, Slot};
use ssv_validation::{CommitteeProvider, MessageAdmission, ValidationError, ValidationOutcome};
use std::sync::Arc;
use tracing::debug;

/// Slots around the current one for which admission counters are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    /// How many slots behind the current slot counters are kept.
    pub retain_slots: u64,
    /// How many slots ahead of the current slot a message may refer to.
    pub max_future_slots: u64,
}

pub struct AdmissionValidator<C> {
    admission: MessageAdmission<C>,
    clock: Arc<dyn SlotClock>,
    window: SlotWindow,
}

impl<C: CommitteeProvider> AdmissionValidator<C> {
    pub fn new(admission: MessageAdmission<C>, clock: Arc<dyn SlotClock>, window: SlotWindow) -> Self {
        Self {
            admission,
            clock,
            window,
        }
    }

    pub fn current_slot(&self) -> Slot {
        self.clock.current_slot()
    }

    /// Oldest slot whose counters are still kept.
    fn oldest_slot(&self, current: Slot) -> Slot {
        Slot(current.0.saturating_sub(self.window.retain_slots))
    }

    /// Drop counters of slots that fell out of the retention window.
    pub fn prune(&self) -> usize {
        let cutoff = self.oldest_slot(self.current_slot());
        if cutoff == Slot(0) {
            return 0;
        }
        self.admission.prune_before(cutoff)
    }

    pub fn tracked_keys(&self) -> usize {
        self.admission.tracker().len()
    }

    /// Messages outside the window are never counted: a counter created for
    /// them would be pruned and the message admitted again on replay.
    fn in_window(&self, slot: Slot) -> bool {
        let current = self.current_slot();
        let newest = current.0.saturating_add(self.window.max_future_slots);
        slot >= self.oldest_slot(current) && slot.0 <= newest
    }
}

impl<C: CommitteeProvider> GossipValidator for AdmissionValidator<C> {
    fn validate(&self, source: &PeerId, topic: &str, data: &[u8]) -> ValidationResult {
        let msg = match DecodedMessage::decode(data) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(peer = %source, topic, error = %err, "rejecting undecodable gossip message");
                return ValidationResult::Reject;
            }
        };

        if let Some(slot) = msg.slot() {
            if !self.in_window(slot) {
                debug!(
                    peer = %source,
                    topic,
                    slot = slot.0,
                    current_slot = self.current_slot().0,
                    "ignoring message outside the slot window"
                );
                return ValidationResult::Ignore;
            }
        }

        match self.admission.admit(&msg) {
            ValidationOutcome::Accept { .. } => ValidationResult::Accept,
            ValidationOutcome::Reject {
                error: ValidationError::UnknownCommittee { .. },
                ..
            } => {
                debug!(peer = %source, topic, "ignoring message for unknown committee");
                ValidationResult::Ignore
            }
            ValidationOutcome::Reject { ref error, .. } => {
                debug!(peer = %source, topic, error = %error, "rejecting gossip message");
                ValidationResult::Reject
            }
        }
    }
}
