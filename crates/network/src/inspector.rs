//! Periodic peer score inspection.
//!
//! Each tick refreshes the validator statistics cache under a bounded
//! timeout, pulls a score snapshot from the gossip engine and hands it to the
//! [`ScoreInspector`]. A failed statistics read only skips the refresh; the
//! inspection itself still runs. After a successful read the topic score
//! parameters are rebuilt, so topics become scored as soon as statistics
//! first arrive.

use crate::metrics::GossipMetrics;
use crate::stats::{CachedValidatorStats, ValidatorStatsSource};
use crate::topics::scoring::{PeerInspection, PeerScoreSnapshot, ScoreInspector};
use anyhow::Result;
use async_trait::async_trait;
use libp2p::PeerId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Supplies point-in-time peer score snapshots.
#[async_trait]
pub trait PeerScoreSource: Send + Sync {
    async fn peer_scores(&self) -> Result<HashMap<PeerId, PeerScoreSnapshot>>;
}

/// Reinstalls topic score parameters from the current statistics.
pub trait TopicParamsRefresh: Send + Sync {
    fn refresh_topic_params(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct InspectionConfig {
    pub interval: Duration,
    /// Upper bound on a validator statistics read.
    pub stats_timeout: Duration,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stats_timeout: Duration::from_secs(5),
        }
    }
}

pub struct ScoreInspectionService {
    inspector: Arc<ScoreInspector>,
    scores: Arc<dyn PeerScoreSource>,
    stats_cache: Arc<CachedValidatorStats>,
    stats_source: Arc<dyn ValidatorStatsSource>,
    metrics: Arc<GossipMetrics>,
    topic_params: Option<Arc<dyn TopicParamsRefresh>>,
    config: InspectionConfig,
}

impl ScoreInspectionService {
    pub fn new(
        inspector: Arc<ScoreInspector>,
        scores: Arc<dyn PeerScoreSource>,
        stats_cache: Arc<CachedValidatorStats>,
        stats_source: Arc<dyn ValidatorStatsSource>,
        metrics: Arc<GossipMetrics>,
        config: InspectionConfig,
    ) -> Self {
        Self {
            inspector,
            scores,
            stats_cache,
            stats_source,
            metrics,
            topic_params: None,
            config,
        }
    }

    pub fn with_topic_params_refresh(mut self, refresh: Arc<dyn TopicParamsRefresh>) -> Self {
        self.topic_params = Some(refresh);
        self
    }

    /// Run a single inspection round. Returns `None` when no snapshot could
    /// be obtained.
    pub async fn run_once(&self) -> Option<Vec<PeerInspection>> {
        match self
            .stats_cache
            .refresh(self.stats_source.as_ref(), self.config.stats_timeout)
            .await
        {
            Ok(_) => {
                if let Some(refresh) = &self.topic_params {
                    if let Err(err) = refresh.refresh_topic_params() {
                        warn!(error = %err, "could not refresh topic score params");
                    }
                }
            }
            Err(_) => self.metrics.record_stats_refresh_failure(),
        }

        let scores = match self.scores.peer_scores().await {
            Ok(scores) => scores,
            Err(err) => {
                warn!(error = %err, "could not read peer scores");
                return None;
            }
        };

        let inspections = self.inspector.inspect(&scores);
        debug!(
            peers = inspections.len(),
            low_score = inspections.iter().filter(|i| i.low_score).count(),
            "inspected peer scores"
        );
        Some(inspections)
    }

    /// Start inspecting on the configured interval until the handle is
    /// shut down or dropped.
    pub fn start(self) -> InspectionHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = self.config.interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?period, "peer score inspection started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            info!("peer score inspection stopped");
        });

        InspectionHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle to a running [`ScoreInspectionService`].
pub struct InspectionHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl InspectionHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(error = %err, "inspection task ended abnormally");
        }
    }
}
