//! Gossip topics and their scoring.
//!
//! ## Modules
//!
//! - `params`: derivation of gossipsub topic and peer score parameters
//! - `scoring`: periodic inspection of peer score snapshots
//! - `tracer`: pubsub event reporting and logging

pub mod params;
pub mod scoring;
pub mod tracer;

use crate::stats::ValidatorStatsProvider;
use libp2p::gossipsub::{IdentTopic, PeerScoreParams, TopicHash, TopicScoreParams};
use params::{peer_score_params, topic_params, Options, ScoringConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub use params::ParamsError;
pub use scoring::{PeerInspection, PeerScoreSnapshot, ScoreInspector, TopicScoreSnapshot};
pub use tracer::{PubsubTracer, TraceEventKind};

/// Prefix of every subnet topic name.
pub const SUBNET_TOPIC_PREFIX: &str = "ssv.v2.";
/// Number of subnets the validator set is spread across.
pub const DEFAULT_SUBNETS: usize = 128;

pub fn subnet_topic_name(subnet: usize) -> String {
    format!("{SUBNET_TOPIC_PREFIX}{subnet}")
}

/// Subnet index of a topic name, if it is a subnet topic.
pub fn subnet_of(topic: &str) -> Option<usize> {
    topic.strip_prefix(SUBNET_TOPIC_PREFIX)?.parse().ok()
}

/// Builds score parameters for topics on demand from the current validator
/// statistics.
///
/// A topic for which no parameters can be derived is left to the engine's
/// default scoring. That includes every topic while the validator population
/// is zero or not loaded yet.
#[derive(Clone)]
pub struct TopicScoreFactory {
    stats: Arc<dyn ValidatorStatsProvider>,
    subnets: usize,
    topic_score_cap: f64,
}

impl TopicScoreFactory {
    pub fn new(stats: Arc<dyn ValidatorStatsProvider>, topic_score_cap: f64) -> Self {
        Self {
            stats,
            subnets: DEFAULT_SUBNETS,
            topic_score_cap,
        }
    }

    pub fn with_subnets(mut self, subnets: usize) -> Self {
        self.subnets = subnets;
        self
    }

    pub fn subnets(&self) -> usize {
        self.subnets
    }

    pub fn topic_score_params(&self, topic: &str) -> Option<TopicScoreParams> {
        let stats = match self.stats.validator_stats() {
            Ok(stats) => stats,
            Err(err) => {
                debug!(topic, error = %err, "could not read validator stats");
                return None;
            }
        };
        debug!(
            topic,
            total_validators = stats.total,
            active_validators = stats.active,
            my_validators = stats.mine,
            "got validator stats for score params"
        );

        let opts = Options::subnet_topic(stats.total, self.subnets, self.topic_score_cap);
        match topic_params(&opts) {
            Ok(params) => Some(params),
            Err(err) => {
                debug!(topic, error = %err, "ignoring topic score params");
                None
            }
        }
    }

    /// Engine-level parameters covering every topic in `topics` that could
    /// be scored.
    pub fn peer_score_params(&self, config: &ScoringConfig, topics: &[String]) -> PeerScoreParams {
        let resolved: HashMap<TopicHash, TopicScoreParams> = topics
            .iter()
            .filter_map(|topic| {
                self.topic_score_params(topic)
                    .map(|params| (IdentTopic::new(topic.as_str()).hash(), params))
            })
            .collect();
        peer_score_params(config, resolved)
    }
}
