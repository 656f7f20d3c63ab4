//! SSV Gossip Scoring
//!
//! Scores gossipsub peers on SSV subnet topics and reports on them.
//!
//! ## Modules
//! - `topics`: topic score parameters, peer score inspection, pubsub tracing
//! - `stats`: validator population statistics and their cache
//! - `metrics`: gossip scoring metrics registry
//! - `reputation`: durable peer score index
//! - `inspector`: periodic peer score inspection service
//! - `delivery`: per peer and topic delivery counters
//! - `gossip`: libp2p swarm with message validation and peer scoring

pub mod delivery;
pub mod gossip;
pub mod inspector;
pub mod metrics;
pub mod reputation;
pub mod stats;
pub mod topics;

// ------------------------------------------------------------
// Re-exports for workspace-wide use
// ------------------------------------------------------------

// Scoring
pub use topics::params::{
    peer_score_params, peer_score_thresholds, topic_params, NetworkOpts, Options, ScoringConfig,
    TopicOpts,
};
pub use topics::{
    subnet_of, subnet_topic_name, ParamsError, PeerInspection, PeerScoreSnapshot, PubsubTracer,
    ScoreInspector, TopicScoreFactory, TopicScoreSnapshot, TraceEventKind, DEFAULT_SUBNETS,
};

// Validator statistics
pub use stats::{
    CachedValidatorStats, StaticValidatorStats, StatsError, ValidatorStats,
    ValidatorStatsProvider, ValidatorStatsSource,
};

// Reputation & inspection
pub use inspector::{
    InspectionConfig, InspectionHandle, PeerScoreSource, ScoreInspectionService, TopicParamsRefresh,
};
pub use reputation::{PeerScoreBook, PeerScoreIndex, PeerScoreRecord, ScoreIndexError};

// Metrics
pub use metrics::{GossipMetrics, GossipMetricsSnapshot};

// Gossip
pub use delivery::{DeliveryBook, MeshChanges};
pub use gossip::{
    tcp_listen_address, GossipCommand, GossipConfig, GossipEvent, GossipHandle, GossipNetwork,
    GossipValidator, ValidationResult,
};

pub use libp2p::{Multiaddr, PeerId};
