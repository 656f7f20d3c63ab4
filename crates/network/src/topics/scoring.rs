//! Peer score inspection.
//!
//! The gossip engine hands over a point-in-time copy of every peer's score.
//! The inspector summarises it into logs and the score gauge, and feeds the
//! optional [`PeerScoreIndex`] used by connection management.

use crate::metrics::GossipMetrics;
use crate::reputation::PeerScoreIndex;
use libp2p::gossipsub::{PeerScoreParams, TopicHash};
use libp2p::PeerId;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Scores strictly below this are flagged as severely penalised.
pub const LOW_SCORE_THRESHOLD: f64 = -1000.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopicScoreSnapshot {
    pub time_in_mesh: Duration,
    pub first_message_deliveries: f64,
    pub mesh_message_deliveries: f64,
    pub invalid_message_deliveries: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeerScoreSnapshot {
    pub score: f64,
    /// Keyed by topic name.
    pub topics: HashMap<String, TopicScoreSnapshot>,
    pub app_specific_score: f64,
    pub ip_colocation_factor: f64,
    pub behaviour_penalty: f64,
}

/// Summary of one peer produced by an inspection round.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInspection {
    pub peer: PeerId,
    pub score: f64,
    /// Invalid delivery counters of the topics where they are non-zero.
    pub invalid_topics: HashMap<String, f64>,
    /// Sum of the square roots of positive invalid delivery counters.
    pub total_invalid_messages: f64,
    /// Topics where mesh deliveries are under the configured threshold.
    pub total_low_mesh_deliveries: usize,
    pub connected: bool,
    pub low_score: bool,
}

type PeerConnected = dyn Fn(&PeerId) -> bool + Send + Sync;

pub struct ScoreInspector {
    metrics: Arc<GossipMetrics>,
    score_index: Option<Arc<dyn PeerScoreIndex>>,
    peer_connected: Arc<PeerConnected>,
    params: Arc<RwLock<PeerScoreParams>>,
}

impl ScoreInspector {
    pub fn new<F>(metrics: Arc<GossipMetrics>, peer_connected: F, params: PeerScoreParams) -> Self
    where
        F: Fn(&PeerId) -> bool + Send + Sync + 'static,
    {
        Self::with_shared_params(metrics, peer_connected, Arc::new(RwLock::new(params)))
    }

    /// Inspector reading parameters that the gossip engine keeps up to date.
    pub fn with_shared_params<F>(
        metrics: Arc<GossipMetrics>,
        peer_connected: F,
        params: Arc<RwLock<PeerScoreParams>>,
    ) -> Self
    where
        F: Fn(&PeerId) -> bool + Send + Sync + 'static,
    {
        Self {
            metrics,
            score_index: None,
            peer_connected: Arc::new(peer_connected),
            params,
        }
    }

    pub fn with_score_index(mut self, index: Arc<dyn PeerScoreIndex>) -> Self {
        self.score_index = Some(index);
        self
    }

    /// Replace the engine parameters used for the mesh delivery check.
    pub fn set_params(&self, params: PeerScoreParams) {
        *self.params.write() = params;
    }

    pub fn inspect(&self, scores: &HashMap<PeerId, PeerScoreSnapshot>) -> Vec<PeerInspection> {
        let params = self.params.read();
        let mut inspections = Vec::with_capacity(scores.len());

        for (peer, snapshot) in scores {
            let inspection = self.inspect_peer(peer, snapshot, &params);

            debug!(
                peer = %peer,
                score = snapshot.score,
                invalid_messages = %InvalidTopics(&inspection.invalid_topics),
                ip_colocation = snapshot.ip_colocation_factor,
                behaviour_penalty = snapshot.behaviour_penalty,
                app_specific_penalty = snapshot.app_specific_score,
                total_low_mesh_deliveries = inspection.total_low_mesh_deliveries as f64,
                total_invalid_messages = inspection.total_invalid_messages,
                connected = inspection.connected,
                low_score = inspection.low_score,
                "peer scores"
            );

            self.metrics.set_peer_score(peer, snapshot.score);

            if let Some(index) = &self.score_index {
                if let Err(err) = index.update_peer_score(peer, snapshot) {
                    warn!(peer = %peer, error = %err, "could not score peer");
                }
            }

            inspections.push(inspection);
        }

        let forgotten = self.metrics.retain_peers(|peer| scores.contains_key(peer));
        if forgotten > 0 {
            debug!(forgotten, "dropped scores of departed peers");
        }
        self.metrics.record_inspection();
        inspections
    }

    fn inspect_peer(
        &self,
        peer: &PeerId,
        snapshot: &PeerScoreSnapshot,
        params: &PeerScoreParams,
    ) -> PeerInspection {
        let mut invalid_topics = HashMap::new();
        let mut total_invalid_messages = 0.0;
        let mut total_low_mesh_deliveries = 0;

        for (topic, topic_snapshot) in &snapshot.topics {
            let invalid = topic_snapshot.invalid_message_deliveries;
            if invalid != 0.0 {
                invalid_topics.insert(topic.clone(), invalid);
            }
            if invalid > 0.0 {
                total_invalid_messages += invalid.sqrt();
            }

            let hash = TopicHash::from_raw(topic.as_str());
            if let Some(topic_params) = params.topics.get(&hash) {
                if topic_snapshot.mesh_message_deliveries
                    < topic_params.mesh_message_deliveries_threshold
                {
                    total_low_mesh_deliveries += 1;
                }
            }
        }

        PeerInspection {
            peer: *peer,
            score: snapshot.score,
            invalid_topics,
            total_invalid_messages,
            total_low_mesh_deliveries,
            connected: (self.peer_connected)(peer),
            low_score: snapshot.score < LOW_SCORE_THRESHOLD,
        }
    }
}

struct InvalidTopics<'a>(&'a HashMap<String, f64>);

impl fmt::Display for InvalidTopics<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut topics: Vec<_> = self.0.iter().collect();
        topics.sort_by(|a, b| a.0.cmp(b.0));
        write!(f, "{{")?;
        for (i, (topic, count)) in topics.into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{topic}: {count}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::{PeerScoreBook, ScoreIndexError};
    use libp2p::gossipsub::TopicScoreParams;

    fn topic(invalid: f64, mesh: f64) -> TopicScoreSnapshot {
        TopicScoreSnapshot {
            invalid_message_deliveries: invalid,
            mesh_message_deliveries: mesh,
            ..TopicScoreSnapshot::default()
        }
    }

    fn params_with_threshold(topic: &str, threshold: f64) -> PeerScoreParams {
        let mut params = PeerScoreParams::default();
        params.topics.insert(
            TopicHash::from_raw(topic),
            TopicScoreParams {
                mesh_message_deliveries_threshold: threshold,
                ..TopicScoreParams::default()
            },
        );
        params
    }

    fn inspector(params: PeerScoreParams) -> ScoreInspector {
        ScoreInspector::new(Arc::new(GossipMetrics::new()), |_| true, params)
    }

    fn inspect_one(inspector: &ScoreInspector, snapshot: PeerScoreSnapshot) -> PeerInspection {
        let peer = PeerId::random();
        let scores = HashMap::from([(peer, snapshot)]);
        inspector.inspect(&scores).pop().expect("one inspection")
    }

    #[test]
    fn invalid_deliveries_are_dampened() {
        let snapshot = PeerScoreSnapshot {
            topics: HashMap::from([
                ("ssv.v2.1".to_string(), topic(4.0, 0.0)),
                ("ssv.v2.2".to_string(), topic(0.0, 0.0)),
            ]),
            ..PeerScoreSnapshot::default()
        };
        let inspection = inspect_one(&inspector(PeerScoreParams::default()), snapshot);

        assert_eq!(inspection.total_invalid_messages, 2.0);
        assert_eq!(inspection.invalid_topics.len(), 1);
        assert_eq!(inspection.invalid_topics["ssv.v2.1"], 4.0);
    }

    #[test]
    fn negative_counters_are_logged_but_not_summed() {
        let snapshot = PeerScoreSnapshot {
            topics: HashMap::from([("ssv.v2.1".to_string(), topic(-1.0, 0.0))]),
            ..PeerScoreSnapshot::default()
        };
        let inspection = inspect_one(&inspector(PeerScoreParams::default()), snapshot);
        assert_eq!(inspection.total_invalid_messages, 0.0);
        assert!(inspection.invalid_topics.contains_key("ssv.v2.1"));
    }

    #[test]
    fn low_mesh_deliveries_only_counted_for_scored_topics() {
        let snapshot = PeerScoreSnapshot {
            topics: HashMap::from([
                ("ssv.v2.1".to_string(), topic(0.0, 2.0)),
                ("ssv.v2.2".to_string(), topic(0.0, 0.0)),
                ("ssv.v2.3".to_string(), topic(0.0, 50.0)),
            ]),
            ..PeerScoreSnapshot::default()
        };
        let mut params = params_with_threshold("ssv.v2.1", 10.0);
        params.topics.insert(
            TopicHash::from_raw("ssv.v2.3"),
            TopicScoreParams {
                mesh_message_deliveries_threshold: 10.0,
                ..TopicScoreParams::default()
            },
        );

        let inspection = inspect_one(&inspector(params), snapshot);
        assert_eq!(inspection.total_low_mesh_deliveries, 1);
    }

    #[test]
    fn low_score_boundary_is_strict() {
        let inspector = inspector(PeerScoreParams::default());
        let at_threshold = PeerScoreSnapshot {
            score: -1000.0,
            ..PeerScoreSnapshot::default()
        };
        let below = PeerScoreSnapshot {
            score: -1000.01,
            ..PeerScoreSnapshot::default()
        };
        assert!(!inspect_one(&inspector, at_threshold).low_score);
        assert!(inspect_one(&inspector, below).low_score);
    }

    #[test]
    fn gauge_and_connectivity_are_reported() {
        let metrics = Arc::new(GossipMetrics::new());
        let connected = PeerId::random();
        let inspector = ScoreInspector::new(
            metrics.clone(),
            move |peer| *peer == connected,
            PeerScoreParams::default(),
        );
        let other = PeerId::random();
        let scores = HashMap::from([
            (
                connected,
                PeerScoreSnapshot {
                    score: 12.0,
                    ..PeerScoreSnapshot::default()
                },
            ),
            (
                other,
                PeerScoreSnapshot {
                    score: -3.5,
                    ..PeerScoreSnapshot::default()
                },
            ),
        ]);

        let inspections = inspector.inspect(&scores);
        assert_eq!(inspections.len(), 2);
        for inspection in &inspections {
            assert_eq!(inspection.connected, inspection.peer == connected);
        }
        assert_eq!(metrics.peer_score(&connected), Some(12.0));
        assert_eq!(metrics.peer_score(&other), Some(-3.5));
        assert_eq!(metrics.snapshot().inspections, 1);
    }

    #[test]
    fn departed_peers_leave_the_gauge() {
        let metrics = Arc::new(GossipMetrics::new());
        let inspector = ScoreInspector::new(metrics.clone(), |_| true, PeerScoreParams::default());
        let stays = PeerId::random();
        let leaves = PeerId::random();

        inspector.inspect(&HashMap::from([
            (stays, PeerScoreSnapshot::default()),
            (leaves, PeerScoreSnapshot::default()),
        ]));
        assert_eq!(metrics.snapshot().scored_peers, 2);

        inspector.inspect(&HashMap::from([(stays, PeerScoreSnapshot::default())]));
        assert_eq!(metrics.peer_score(&stays), Some(0.0));
        assert_eq!(metrics.peer_score(&leaves), None);
        assert_eq!(metrics.snapshot().scored_peers, 1);
    }

    struct FailingIndex;

    impl PeerScoreIndex for FailingIndex {
        fn update_peer_score(
            &self,
            _peer: &PeerId,
            _snapshot: &PeerScoreSnapshot,
        ) -> Result<(), ScoreIndexError> {
            Err(ScoreIndexError::Unavailable("index closed".into()))
        }
    }

    #[test]
    fn index_failures_do_not_stop_inspection() {
        let inspector = inspector(PeerScoreParams::default()).with_score_index(Arc::new(FailingIndex));
        let scores: HashMap<_, _> = (0..3)
            .map(|_| (PeerId::random(), PeerScoreSnapshot::default()))
            .collect();
        assert_eq!(inspector.inspect(&scores).len(), 3);
    }

    #[test]
    fn index_receives_every_peer() {
        let book = Arc::new(PeerScoreBook::new());
        let inspector = inspector(PeerScoreParams::default()).with_score_index(book.clone());
        let peer = PeerId::random();
        let scores = HashMap::from([(
            peer,
            PeerScoreSnapshot {
                score: -2000.0,
                ..PeerScoreSnapshot::default()
            },
        )]);

        inspector.inspect(&scores);
        let record = book.get(&peer).expect("indexed");
        assert!(record.low_score);
        assert_eq!(record.score, -2000.0);
    }

    #[test]
    fn invalid_topics_render_sorted() {
        let topics = HashMap::from([("b".to_string(), 1.0), ("a".to_string(), 2.5)]);
        assert_eq!(InvalidTopics(&topics).to_string(), "{a: 2.5, b: 1}");
    }
}
