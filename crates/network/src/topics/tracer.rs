//! Pubsub event tracing.
//!
//! Every event is counted by kind. Logging is an additional state that can be
//! switched on and off while the node runs.

use crate::metrics::GossipMetrics;
use libp2p::gossipsub;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

const STATE_WITH_REPORTING: u32 = 0;
const STATE_WITH_LOGGING: u32 = 1;

/// Gossipsub trace event vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceEventKind {
    PublishMessage,
    RejectMessage,
    DuplicateMessage,
    DeliverMessage,
    AddPeer,
    RemovePeer,
    RecvRpc,
    SendRpc,
    DropRpc,
    Join,
    Leave,
    Graft,
    Prune,
}

impl TraceEventKind {
    pub const ALL: [TraceEventKind; 13] = [
        TraceEventKind::PublishMessage,
        TraceEventKind::RejectMessage,
        TraceEventKind::DuplicateMessage,
        TraceEventKind::DeliverMessage,
        TraceEventKind::AddPeer,
        TraceEventKind::RemovePeer,
        TraceEventKind::RecvRpc,
        TraceEventKind::SendRpc,
        TraceEventKind::DropRpc,
        TraceEventKind::Join,
        TraceEventKind::Leave,
        TraceEventKind::Graft,
        TraceEventKind::Prune,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TraceEventKind::PublishMessage => "PUBLISH_MESSAGE",
            TraceEventKind::RejectMessage => "REJECT_MESSAGE",
            TraceEventKind::DuplicateMessage => "DUPLICATE_MESSAGE",
            TraceEventKind::DeliverMessage => "DELIVER_MESSAGE",
            TraceEventKind::AddPeer => "ADD_PEER",
            TraceEventKind::RemovePeer => "REMOVE_PEER",
            TraceEventKind::RecvRpc => "RECV_RPC",
            TraceEventKind::SendRpc => "SEND_RPC",
            TraceEventKind::DropRpc => "DROP_RPC",
            TraceEventKind::Join => "JOIN",
            TraceEventKind::Leave => "LEAVE",
            TraceEventKind::Graft => "GRAFT",
            TraceEventKind::Prune => "PRUNE",
        }
    }

    /// Kind of a gossipsub behaviour event, if it is one we trace.
    pub fn from_gossipsub(event: &gossipsub::Event) -> Option<Self> {
        match event {
            gossipsub::Event::Message { .. } => Some(TraceEventKind::DeliverMessage),
            gossipsub::Event::Subscribed { .. } => Some(TraceEventKind::Join),
            gossipsub::Event::Unsubscribed { .. } => Some(TraceEventKind::Leave),
            _ => None,
        }
    }
}

impl fmt::Display for TraceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reports pubsub events to metrics, and to the log when enabled.
#[derive(Debug)]
pub struct PubsubTracer {
    metrics: Arc<GossipMetrics>,
    state: AtomicU32,
}

impl PubsubTracer {
    pub fn new(metrics: Arc<GossipMetrics>, with_logging: bool) -> Self {
        let state = if with_logging {
            STATE_WITH_LOGGING
        } else {
            STATE_WITH_REPORTING
        };
        Self {
            metrics,
            state: AtomicU32::new(state),
        }
    }

    pub fn set_logging(&self, enabled: bool) {
        let state = if enabled {
            STATE_WITH_LOGGING
        } else {
            STATE_WITH_REPORTING
        };
        self.state.store(state, Ordering::Relaxed);
    }

    pub fn is_logging(&self) -> bool {
        self.state.load(Ordering::Relaxed) >= STATE_WITH_LOGGING
    }

    pub fn trace(&self, kind: TraceEventKind) {
        self.metrics.record_trace_event(kind.as_str());
        if self.is_logging() {
            debug!(who = "pubsubTrace", "type" = kind.as_str(), "pubsub event");
        }
    }

    pub fn trace_gossipsub(&self, event: &gossipsub::Event) {
        if let Some(kind) = TraceEventKind::from_gossipsub(event) {
            self.trace(kind);
        }
    }
}
