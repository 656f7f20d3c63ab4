//! Per peer and topic delivery counters.
//!
//! The gossip engine computes scores internally but does not expose the
//! per-topic counters behind them, so the swarm task keeps its own copy,
//! decayed with the same parameters. Topics without parameters decay to zero
//! over the score retention period, and the counters of a disconnected peer
//! are dropped once that period has passed, as the engine does.

use crate::topics::params::score_decay;
use crate::topics::scoring::{PeerScoreSnapshot, TopicScoreSnapshot};
use libp2p::gossipsub::{PeerScoreParams, TopicHash};
use libp2p::PeerId;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

#[derive(Debug, Clone, Default)]
struct DeliveryCounters {
    first_message_deliveries: f64,
    mesh_message_deliveries: f64,
    invalid_message_deliveries: f64,
    in_mesh_since: Option<Instant>,
}

impl DeliveryCounters {
    fn is_idle(&self, decay_to_zero: f64) -> bool {
        self.in_mesh_since.is_none()
            && self.first_message_deliveries < decay_to_zero
            && self.mesh_message_deliveries < decay_to_zero
            && self.invalid_message_deliveries < decay_to_zero
    }
}

/// Peers that joined or left a topic mesh since the previous update.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MeshChanges {
    pub grafted: Vec<PeerId>,
    pub pruned: Vec<PeerId>,
}

#[derive(Debug, Default)]
pub struct DeliveryBook {
    entries: HashMap<(PeerId, String), DeliveryCounters>,
    disconnected: HashMap<PeerId, Instant>,
}

impl DeliveryBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A valid message first delivered by `peer`.
    pub fn record_delivery(&mut self, peer: PeerId, topic: &str) {
        let counters = self.entries.entry((peer, topic.to_string())).or_default();
        counters.first_message_deliveries += 1.0;
        if counters.in_mesh_since.is_some() {
            counters.mesh_message_deliveries += 1.0;
        }
    }

    pub fn record_invalid(&mut self, peer: PeerId, topic: &str) {
        self.entries
            .entry((peer, topic.to_string()))
            .or_default()
            .invalid_message_deliveries += 1.0;
    }

    /// Reconcile the mesh of `topic` with the engine's current view.
    pub fn update_mesh(&mut self, topic: &str, mesh: &HashSet<PeerId>) -> MeshChanges {
        let now = Instant::now();
        let mut changes = MeshChanges::default();

        for ((peer, entry_topic), counters) in self.entries.iter_mut() {
            if entry_topic != topic {
                continue;
            }
            if counters.in_mesh_since.is_some() && !mesh.contains(peer) {
                counters.in_mesh_since = None;
                changes.pruned.push(*peer);
            }
        }

        for peer in mesh {
            let counters = self.entries.entry((*peer, topic.to_string())).or_default();
            if counters.in_mesh_since.is_none() {
                counters.in_mesh_since = Some(now);
                changes.grafted.push(*peer);
            }
        }
        changes
    }

    pub fn peer_connected(&mut self, peer: &PeerId) {
        self.disconnected.remove(peer);
    }

    pub fn peer_disconnected(&mut self, peer: PeerId) {
        self.disconnected.insert(peer, Instant::now());
    }

    /// Apply one decay interval and clamp counters to their caps.
    pub fn decay(&mut self, params: &PeerScoreParams) {
        self.decay_at(params, Instant::now());
    }

    fn decay_at(&mut self, params: &PeerScoreParams, now: Instant) {
        let retain = params.retain_score;
        let expired: HashSet<PeerId> = self
            .disconnected
            .iter()
            .filter(|(_, since)| now.saturating_duration_since(**since) >= retain)
            .map(|(peer, _)| *peer)
            .collect();
        self.disconnected.retain(|peer, _| !expired.contains(peer));

        let unscored_decay = score_decay(retain, params.decay_interval).unwrap_or(0.0);
        let decay_to_zero = params.decay_to_zero;
        self.entries.retain(|(peer, topic), counters| {
            if expired.contains(peer) {
                return false;
            }
            if let Some(topic_params) = params.topics.get(&TopicHash::from_raw(topic.as_str())) {
                counters.first_message_deliveries = (counters.first_message_deliveries
                    * topic_params.first_message_deliveries_decay)
                    .min(topic_params.first_message_deliveries_cap);
                counters.mesh_message_deliveries = (counters.mesh_message_deliveries
                    * topic_params.mesh_message_deliveries_decay)
                    .min(topic_params.mesh_message_deliveries_cap);
                counters.invalid_message_deliveries *=
                    topic_params.invalid_message_deliveries_decay;
            } else {
                counters.first_message_deliveries *= unscored_decay;
                counters.mesh_message_deliveries *= unscored_decay;
                counters.invalid_message_deliveries *= unscored_decay;
            }
            for counter in [
                &mut counters.first_message_deliveries,
                &mut counters.mesh_message_deliveries,
                &mut counters.invalid_message_deliveries,
            ] {
                if *counter < decay_to_zero {
                    *counter = 0.0;
                }
            }
            !counters.is_idle(decay_to_zero)
        });
    }

    pub fn peers(&self) -> HashSet<PeerId> {
        self.entries.keys().map(|(peer, _)| *peer).collect()
    }

    pub fn snapshot(&self, peer: &PeerId, score: f64) -> PeerScoreSnapshot {
        let now = Instant::now();
        let topics = self
            .entries
            .iter()
            .filter(|((entry_peer, _), _)| entry_peer == peer)
            .map(|((_, topic), counters)| {
                (
                    topic.clone(),
                    TopicScoreSnapshot {
                        time_in_mesh: counters
                            .in_mesh_since
                            .map(|since| now.saturating_duration_since(since))
                            .unwrap_or_default(),
                        first_message_deliveries: counters.first_message_deliveries,
                        mesh_message_deliveries: counters.mesh_message_deliveries,
                        invalid_message_deliveries: counters.invalid_message_deliveries,
                    },
                )
            })
            .collect();

        PeerScoreSnapshot {
            score,
            topics,
            ..PeerScoreSnapshot::default()
        }
    }
}
