use libp2p::PeerId;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counter of pubsub trace events, labelled by `type`.
pub const PUBSUB_TRACE_METRIC: &str = "ssv_network_pubsub_trace";
/// Gauge of the latest inspected peer score, labelled by `pid`.
pub const PEER_SCORE_METRIC: &str = "ssv_p2p_pubsub_score_inspect";
/// Counter of completed score inspection rounds.
pub const SCORE_INSPECTIONS_METRIC: &str = "ssv_p2p_pubsub_score_inspections";
/// Counter of failed validator statistics refreshes.
pub const STATS_REFRESH_FAILURES_METRIC: &str = "ssv_p2p_validator_stats_refresh_failures";

/// Registry for gossip scoring metrics.
///
/// Constructed once by the node and handed to the tracer, the score inspector
/// and the inspection service. Values are kept in-process for snapshots and
/// forwarded to the installed `metrics` recorder, if any.
#[derive(Debug)]
pub struct GossipMetrics {
    trace_events: RwLock<HashMap<&'static str, u64>>,
    peer_scores: RwLock<HashMap<PeerId, f64>>,
    inspections: AtomicU64,
    stats_refresh_failures: AtomicU64,
    start_time: Instant,
}

impl GossipMetrics {
    pub fn new() -> Self {
        Self {
            trace_events: RwLock::new(HashMap::new()),
            peer_scores: RwLock::new(HashMap::new()),
            inspections: AtomicU64::new(0),
            stats_refresh_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Register help texts with the installed recorder.
    pub fn describe() {
        describe_counter!(PUBSUB_TRACE_METRIC, "Traced pubsub events by type");
        describe_gauge!(PEER_SCORE_METRIC, "Gossipsub score of each peer at the last inspection");
        describe_counter!(SCORE_INSPECTIONS_METRIC, "Completed peer score inspections");
        describe_counter!(
            STATS_REFRESH_FAILURES_METRIC,
            "Validator statistics reads that failed or timed out"
        );
    }

    pub fn record_trace_event(&self, kind: &'static str) {
        *self.trace_events.write().entry(kind).or_insert(0) += 1;
        counter!(PUBSUB_TRACE_METRIC, "type" => kind).increment(1);
    }

    pub fn set_peer_score(&self, peer: &PeerId, score: f64) {
        self.peer_scores.write().insert(*peer, score);
        gauge!(PEER_SCORE_METRIC, "pid" => peer.to_string()).set(score);
    }

    /// Forget the scores of peers for which `keep` is false. Their exported
    /// gauges go stale and are dropped by the exporter's idle timeout.
    pub fn retain_peers(&self, keep: impl Fn(&PeerId) -> bool) -> usize {
        let mut peer_scores = self.peer_scores.write();
        let before = peer_scores.len();
        peer_scores.retain(|peer, _| keep(peer));
        before - peer_scores.len()
    }

    pub fn record_inspection(&self) {
        self.inspections.fetch_add(1, Ordering::Relaxed);
        counter!(SCORE_INSPECTIONS_METRIC).increment(1);
    }

    pub fn record_stats_refresh_failure(&self) {
        self.stats_refresh_failures.fetch_add(1, Ordering::Relaxed);
        counter!(STATS_REFRESH_FAILURES_METRIC).increment(1);
    }

    pub fn trace_count(&self, kind: &str) -> u64 {
        self.trace_events.read().get(kind).copied().unwrap_or(0)
    }

    pub fn peer_score(&self, peer: &PeerId) -> Option<f64> {
        self.peer_scores.read().get(peer).copied()
    }

    pub fn snapshot(&self) -> GossipMetricsSnapshot {
        let peer_scores = self.peer_scores.read();
        let (lowest, highest) = peer_scores.values().fold(
            (None::<f64>, None::<f64>),
            |(lo, hi), score| {
                (
                    Some(lo.map_or(*score, |lo| lo.min(*score))),
                    Some(hi.map_or(*score, |hi| hi.max(*score))),
                )
            },
        );

        GossipMetricsSnapshot {
            trace_events: self
                .trace_events
                .read()
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
            scored_peers: peer_scores.len() as u64,
            lowest_peer_score: lowest,
            highest_peer_score: highest,
            inspections: self.inspections.load(Ordering::Relaxed),
            stats_refresh_failures: self.stats_refresh_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for GossipMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`GossipMetrics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipMetricsSnapshot {
    pub trace_events: HashMap<String, u64>,
    pub scored_peers: u64,
    pub lowest_peer_score: Option<f64>,
    pub highest_peer_score: Option<f64>,
    pub inspections: u64,
    pub stats_refresh_failures: u64,
    pub uptime_seconds: u64,
}

impl GossipMetricsSnapshot {
    pub fn total_trace_events(&self) -> u64 {
        self.trace_events.values().sum()
    }
}
