//! Beacon chain slot clock.

use ssv_types::Slot;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Mainnet beacon chain genesis, seconds since the Unix epoch.
pub const MAINNET_GENESIS_TIME: u64 = 1_606_824_023;

/// Source of the current beacon slot.
pub trait SlotClock: Send + Sync {
    fn current_slot(&self) -> Slot;
}

/// Slot derived from wall-clock time since genesis.
#[derive(Debug, Clone)]
pub struct SystemSlotClock {
    genesis: SystemTime,
    slot_duration: Duration,
}

impl SystemSlotClock {
    pub fn new(genesis_unix_secs: u64, slot_duration: Duration) -> Self {
        Self {
            genesis: UNIX_EPOCH + Duration::from_secs(genesis_unix_secs),
            slot_duration,
        }
    }

    /// Slot in progress at `now`. Before genesis this is slot 0.
    pub fn slot_at(&self, now: SystemTime) -> Slot {
        let slot_millis = self.slot_duration.as_millis().max(1);
        let elapsed = now.duration_since(self.genesis).unwrap_or_default();
        Slot((elapsed.as_millis() / slot_millis) as u64)
    }
}

impl SlotClock for SystemSlotClock {
    fn current_slot(&self) -> Slot {
        self.slot_at(SystemTime::now())
    }
}
