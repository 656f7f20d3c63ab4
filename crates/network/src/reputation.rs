use crate::topics::scoring::{PeerScoreSnapshot, LOW_SCORE_THRESHOLD};
use libp2p::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreIndexError {
    #[error("peer score index unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of gossip scores, consulted by connection management.
pub trait PeerScoreIndex: Send + Sync {
    fn update_peer_score(
        &self,
        peer: &PeerId,
        snapshot: &PeerScoreSnapshot,
    ) -> Result<(), ScoreIndexError>;
}

/// What the index remembers about a peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerScoreRecord {
    pub score: f64,
    /// Sum of invalid delivery counters over all topics at the last update.
    pub invalid_messages: f64,
    pub low_score: bool,
    pub updates: u64,
    pub last_update: Instant,
}

/// In-memory [`PeerScoreIndex`]
#[derive(Debug)]
pub struct PeerScoreBook {
    peers: RwLock<HashMap<PeerId, PeerScoreRecord>>,
}

impl PeerScoreBook {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, peer: &PeerId) -> Option<PeerScoreRecord> {
        self.peers.read().get(peer).cloned()
    }

    /// Peers whose last recorded score was below the severe-penalty threshold
    pub fn low_score_peers(&self) -> Vec<PeerId> {
        self.peers
            .read()
            .iter()
            .filter(|(_, record)| record.low_score)
            .map(|(peer, _)| *peer)
            .collect()
    }

    /// Forget peers not updated within `max_age`.
    pub fn prune(&self, max_age: Duration) -> usize {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|_, record| record.last_update.elapsed() <= max_age);
        before - peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

impl Default for PeerScoreBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerScoreIndex for PeerScoreBook {
    fn update_peer_score(
        &self,
        peer: &PeerId,
        snapshot: &PeerScoreSnapshot,
    ) -> Result<(), ScoreIndexError> {
        let invalid_messages = snapshot
            .topics
            .values()
            .map(|topic| topic.invalid_message_deliveries.max(0.0))
            .sum();
        let low_score = snapshot.score < LOW_SCORE_THRESHOLD;

        let mut peers = self.peers.write();
        let updates = peers.get(peer).map_or(0, |record| record.updates) + 1;
        let was_low = peers.get(peer).is_some_and(|record| record.low_score);
        peers.insert(
            *peer,
            PeerScoreRecord {
                score: snapshot.score,
                invalid_messages,
                low_score,
                updates,
                last_update: Instant::now(),
            },
        );

        if low_score && !was_low {
            warn!(%peer, score = snapshot.score, "peer score fell below threshold");
        }
        Ok(())
    }
}
