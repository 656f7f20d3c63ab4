//! Derivation of gossipsub score parameters.
//!
//! Weights are sized from the expected message rate of a subnet topic, which
//! in turn follows from how many validators share the subnet. Counters decay
//! once per slot and are considered zero below [`DECAY_TO_ZERO`].

use libp2p::gossipsub::{PeerScoreParams, PeerScoreThresholds, TopicHash, TopicScoreParams};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Counter value below which a decaying counter is reset to zero.
pub const DECAY_TO_ZERO: f64 = 0.01;
/// Beacon chain slot duration; also the score decay interval.
pub const SLOT_DURATION: Duration = Duration::from_secs(12);
/// Target mesh degree of the gossip engine.
pub const DEFAULT_MESH_D: usize = 8;
/// Sum of all subnet topic weights.
pub const TOTAL_TOPICS_WEIGHT: f64 = 4.0;
/// Average number of messages one validator produces per epoch on its subnet.
pub const MSGS_PER_VALIDATOR_PER_EPOCH: f64 = 20.0;

// P1
const MAX_TIME_IN_MESH_SCORE: f64 = 10.0;
const TIME_IN_MESH_CAP: Duration = Duration::from_secs(3600);
// P2
const MAX_FIRST_MESSAGE_DELIVERIES_SCORE: f64 = 80.0;
const FIRST_MESSAGE_DECAY_EPOCHS: u32 = 4;
// P3
const MESH_MESSAGE_DECAY_EPOCHS: u32 = 16;
const MESH_MESSAGE_THRESHOLD_FRACTION: f64 = 0.05;
const MESH_MESSAGE_CAP_FACTOR: f64 = 16.0;
const MESH_MESSAGE_ACTIVATION_EPOCHS: u32 = 3;
const MESH_MESSAGE_WINDOW: Duration = Duration::from_secs(2);
// P4
const INVALID_MESSAGE_DECAY_EPOCHS: u32 = 100;
const MAX_INVALID_MESSAGES_ALLOWED: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    #[error("no validators to derive a message rate from")]
    NoValidators,
    #[error("subnet count must be positive")]
    NoSubnets,
    #[error("mesh degree must be positive")]
    NoMeshPeers,
    #[error("decay duration {total:?} is shorter than decay interval {interval:?}")]
    DecayTooShort { total: Duration, interval: Duration },
    #[error("derived {0} is not a finite number")]
    NotFinite(&'static str),
    #[error("gossipsub rejected derived parameters: {0}")]
    Rejected(String),
}

/// Gossip-engine level scoring configuration.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub ip_colocation_weight: f64,
    pub ip_colocation_threshold: f64,
    pub one_epoch_duration: Duration,
    pub decay_interval: Duration,
    pub topic_score_cap: f64,
    pub gossip_threshold: f64,
    pub publish_threshold: f64,
    pub graylist_threshold: f64,
    pub accept_px_threshold: f64,
    pub opportunistic_graft_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ip_colocation_weight: -35.11,
            ip_colocation_threshold: 10.0,
            one_epoch_duration: SLOT_DURATION * 32,
            decay_interval: SLOT_DURATION,
            topic_score_cap: 32.72,
            gossip_threshold: -4000.0,
            publish_threshold: -8000.0,
            graylist_threshold: -16000.0,
            accept_px_threshold: 100.0,
            opportunistic_graft_threshold: 5.0,
        }
    }
}

/// Network-wide inputs.
#[derive(Debug, Clone)]
pub struct NetworkOpts {
    pub validators: u64,
    pub subnets: usize,
    pub one_epoch_duration: Duration,
    pub decay_interval: Duration,
    pub total_topics_weight: f64,
    pub topic_score_cap: f64,
    pub graylist_threshold: f64,
}

/// Per-topic inputs.
#[derive(Debug, Clone)]
pub struct TopicOpts {
    pub d: usize,
    /// Expected messages per second on the topic.
    pub expected_msg_rate: f64,
    pub topic_weight: f64,
    pub first_msg_decay_epochs: u32,
    pub mesh_msg_decay_epochs: u32,
    pub mesh_msg_cap_factor: f64,
    pub mesh_msg_activation_epochs: u32,
    pub invalid_msg_decay_epochs: u32,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub network: NetworkOpts,
    pub topic: TopicOpts,
}

impl Options {
    /// Options for one of `subnets` equally weighted subnet topics.
    pub fn subnet_topic(validators: u64, subnets: usize, topic_score_cap: f64) -> Self {
        let scoring = ScoringConfig::default();
        let network = NetworkOpts {
            validators,
            subnets,
            one_epoch_duration: scoring.one_epoch_duration,
            decay_interval: scoring.decay_interval,
            total_topics_weight: TOTAL_TOPICS_WEIGHT,
            topic_score_cap,
            graylist_threshold: scoring.graylist_threshold,
        };

        let (topic_weight, expected_msg_rate) = if subnets == 0 {
            (0.0, 0.0)
        } else {
            let validators_per_subnet = validators as f64 / subnets as f64;
            let msgs_per_epoch = validators_per_subnet * MSGS_PER_VALIDATOR_PER_EPOCH;
            (
                TOTAL_TOPICS_WEIGHT / subnets as f64,
                msgs_per_epoch / network.one_epoch_duration.as_secs_f64(),
            )
        };

        Self {
            network,
            topic: TopicOpts {
                d: DEFAULT_MESH_D,
                expected_msg_rate,
                topic_weight,
                first_msg_decay_epochs: FIRST_MESSAGE_DECAY_EPOCHS,
                mesh_msg_decay_epochs: MESH_MESSAGE_DECAY_EPOCHS,
                mesh_msg_cap_factor: MESH_MESSAGE_CAP_FACTOR,
                mesh_msg_activation_epochs: MESH_MESSAGE_ACTIVATION_EPOCHS,
                invalid_msg_decay_epochs: INVALID_MESSAGE_DECAY_EPOCHS,
            },
        }
    }

    fn validate(&self) -> Result<(), ParamsError> {
        if self.network.subnets == 0 {
            return Err(ParamsError::NoSubnets);
        }
        if self.network.validators == 0 || self.topic.expected_msg_rate <= 0.0 {
            return Err(ParamsError::NoValidators);
        }
        if self.topic.d == 0 {
            return Err(ParamsError::NoMeshPeers);
        }
        Ok(())
    }

    fn epochs(&self, epochs: u32) -> Duration {
        self.network.one_epoch_duration * epochs
    }

    /// Highest positive score a peer can collect on this topic.
    fn max_positive_score(&self) -> f64 {
        let uncapped = (MAX_TIME_IN_MESH_SCORE + MAX_FIRST_MESSAGE_DELIVERIES_SCORE)
            * self.topic.topic_weight;
        if self.network.topic_score_cap > 0.0 {
            uncapped.min(self.network.topic_score_cap)
        } else {
            uncapped
        }
    }
}

/// Decay factor that takes a counter to [`DECAY_TO_ZERO`] after `total`,
/// applied once every `interval`.
pub fn score_decay(total: Duration, interval: Duration) -> Result<f64, ParamsError> {
    if total < interval || interval.is_zero() {
        return Err(ParamsError::DecayTooShort { total, interval });
    }
    let ticks = total.as_secs_f64() / interval.as_secs_f64();
    Ok(DECAY_TO_ZERO.powf(1.0 / ticks))
}

/// Value a counter converges to when it grows by `rate` per interval and
/// decays by `decay`.
pub fn decay_convergence(decay: f64, rate: f64) -> f64 {
    rate / (1.0 - decay)
}

/// Derive the score parameters of one topic.
pub fn topic_params(opts: &Options) -> Result<TopicScoreParams, ParamsError> {
    opts.validate()?;

    let interval = opts.network.decay_interval;
    let topic_weight = opts.topic.topic_weight;
    let expected_per_interval = opts.topic.expected_msg_rate * interval.as_secs_f64();
    let per_mesh_peer = expected_per_interval / opts.topic.d as f64;

    // P1: time in mesh
    let time_in_mesh_quantum = SLOT_DURATION;
    let time_in_mesh_cap = TIME_IN_MESH_CAP.as_secs_f64() / time_in_mesh_quantum.as_secs_f64();
    let time_in_mesh_weight = MAX_TIME_IN_MESH_SCORE / time_in_mesh_cap;

    // P2: first message deliveries
    let first_message_deliveries_decay =
        score_decay(opts.epochs(opts.topic.first_msg_decay_epochs), interval)?;
    let first_message_deliveries_cap =
        decay_convergence(first_message_deliveries_decay, 2.0 * per_mesh_peer);
    let first_message_deliveries_weight =
        MAX_FIRST_MESSAGE_DELIVERIES_SCORE / first_message_deliveries_cap;

    // P3: mesh message deliveries
    let mesh_message_deliveries_decay =
        score_decay(opts.epochs(opts.topic.mesh_msg_decay_epochs), interval)?;
    let mesh_message_deliveries_threshold =
        decay_convergence(mesh_message_deliveries_decay, per_mesh_peer)
            * MESH_MESSAGE_THRESHOLD_FRACTION;
    let mesh_message_deliveries_weight = -opts.max_positive_score()
        / (topic_weight * mesh_message_deliveries_threshold.powi(2));
    let mesh_message_deliveries_cap =
        mesh_message_deliveries_threshold * opts.topic.mesh_msg_cap_factor;

    // P3b: mesh failure penalty
    let mesh_failure_penalty_decay = mesh_message_deliveries_decay;
    let mesh_failure_penalty_weight = mesh_message_deliveries_weight;

    // P4: invalid messages
    let invalid_message_deliveries_decay =
        score_decay(opts.epochs(opts.topic.invalid_msg_decay_epochs), interval)?;
    let invalid_message_deliveries_weight = opts.network.graylist_threshold
        / (topic_weight * MAX_INVALID_MESSAGES_ALLOWED.powi(2));

    for (name, value) in [
        ("time_in_mesh_weight", time_in_mesh_weight),
        ("first_message_deliveries_weight", first_message_deliveries_weight),
        ("first_message_deliveries_cap", first_message_deliveries_cap),
        ("mesh_message_deliveries_weight", mesh_message_deliveries_weight),
        ("mesh_message_deliveries_threshold", mesh_message_deliveries_threshold),
        ("invalid_message_deliveries_weight", invalid_message_deliveries_weight),
    ] {
        if !value.is_finite() {
            return Err(ParamsError::NotFinite(name));
        }
    }

    let params = TopicScoreParams {
        topic_weight,
        time_in_mesh_weight,
        time_in_mesh_quantum,
        time_in_mesh_cap,
        first_message_deliveries_weight,
        first_message_deliveries_decay,
        first_message_deliveries_cap,
        mesh_message_deliveries_weight,
        mesh_message_deliveries_decay,
        mesh_message_deliveries_cap,
        mesh_message_deliveries_threshold,
        mesh_message_deliveries_window: MESH_MESSAGE_WINDOW,
        mesh_message_deliveries_activation: opts.epochs(opts.topic.mesh_msg_activation_epochs),
        mesh_failure_penalty_weight,
        mesh_failure_penalty_decay,
        invalid_message_deliveries_weight,
        invalid_message_deliveries_decay,
    };
    params
        .validate()
        .map_err(|err| ParamsError::Rejected(err.to_string()))?;
    Ok(params)
}

/// Peer-level score parameters for the gossip engine, with `topics` already
/// resolved.
pub fn peer_score_params(
    config: &ScoringConfig,
    topics: HashMap<TopicHash, TopicScoreParams>,
) -> PeerScoreParams {
    PeerScoreParams {
        topics,
        topic_score_cap: config.topic_score_cap,
        app_specific_weight: 0.0,
        ip_colocation_factor_weight: config.ip_colocation_weight,
        ip_colocation_factor_threshold: config.ip_colocation_threshold,
        behaviour_penalty_weight: config.gossip_threshold / 100.0,
        behaviour_penalty_threshold: 6.0,
        behaviour_penalty_decay: score_decay(config.one_epoch_duration * 10, config.decay_interval)
            .unwrap_or(0.9),
        decay_interval: config.decay_interval,
        decay_to_zero: DECAY_TO_ZERO,
        retain_score: config.one_epoch_duration * 100,
        ..PeerScoreParams::default()
    }
}

pub fn peer_score_thresholds(config: &ScoringConfig) -> PeerScoreThresholds {
    PeerScoreThresholds {
        gossip_threshold: config.gossip_threshold,
        publish_threshold: config.publish_threshold,
        graylist_threshold: config.graylist_threshold,
        accept_px_threshold: config.accept_px_threshold,
        opportunistic_graft_threshold: config.opportunistic_graft_threshold,
    }
}
