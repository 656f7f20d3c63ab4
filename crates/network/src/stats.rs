//! Validator population statistics used to size topic scores.
//!
//! The beacon-chain client that knows the real numbers lives outside this
//! crate. It is reached through [`ValidatorStatsSource`], which may be slow or
//! fail; reads from the gossip engine go through [`CachedValidatorStats`],
//! which never blocks.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidatorStats {
    pub total: u64,
    pub active: u64,
    /// Validators operated by this node.
    pub mine: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    #[error("validator statistics unavailable: {0}")]
    Unavailable(String),
    #[error("validator statistics read timed out after {0:?}")]
    Timeout(Duration),
    #[error("validator statistics not loaded yet")]
    NotLoaded,
    #[error("validator statistics are stale ({age:?} old)")]
    Stale { age: Duration },
}

/// Non-blocking access to validator statistics.
pub trait ValidatorStatsProvider: Send + Sync {
    fn validator_stats(&self) -> Result<ValidatorStats, StatsError>;
}

/// Authoritative, possibly slow, source of validator statistics.
#[async_trait]
pub trait ValidatorStatsSource: Send + Sync {
    async fn fetch_validator_stats(&self) -> Result<ValidatorStats, StatsError>;
}

/// Fixed statistics, for static deployments and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticValidatorStats(pub ValidatorStats);

impl ValidatorStatsProvider for StaticValidatorStats {
    fn validator_stats(&self) -> Result<ValidatorStats, StatsError> {
        Ok(self.0)
    }
}

#[async_trait]
impl ValidatorStatsSource for StaticValidatorStats {
    async fn fetch_validator_stats(&self) -> Result<ValidatorStats, StatsError> {
        Ok(self.0)
    }
}

/// Last successfully fetched statistics.
#[derive(Debug)]
pub struct CachedValidatorStats {
    latest: RwLock<Option<(ValidatorStats, Instant)>>,
    max_age: Duration,
}

impl CachedValidatorStats {
    /// Cache whose entries are served for at most `max_age`.
    pub fn new(max_age: Duration) -> Self {
        Self {
            latest: RwLock::new(None),
            max_age,
        }
    }

    /// Fetch fresh statistics from `source`, waiting at most `timeout`.
    /// On failure the previous value is kept and keeps ageing.
    pub async fn refresh(
        &self,
        source: &dyn ValidatorStatsSource,
        timeout: Duration,
    ) -> Result<ValidatorStats, StatsError> {
        let result = match tokio::time::timeout(timeout, source.fetch_validator_stats()).await {
            Ok(result) => result,
            Err(_) => Err(StatsError::Timeout(timeout)),
        };

        match result {
            Ok(stats) => {
                debug!(
                    total = stats.total,
                    active = stats.active,
                    mine = stats.mine,
                    "refreshed validator stats"
                );
                *self.latest.write() = Some((stats, Instant::now()));
                Ok(stats)
            }
            Err(err) => {
                warn!(error = %err, "could not refresh validator stats");
                Err(err)
            }
        }
    }

    /// Seed the cache directly.
    pub fn set(&self, stats: ValidatorStats) {
        *self.latest.write() = Some((stats, Instant::now()));
    }
}

impl ValidatorStatsProvider for CachedValidatorStats {
    fn validator_stats(&self) -> Result<ValidatorStats, StatsError> {
        match *self.latest.read() {
            None => Err(StatsError::NotLoaded),
            Some((stats, fetched_at)) => {
                let age = fetched_at.elapsed();
                if age > self.max_age {
                    Err(StatsError::Stale { age })
                } else {
                    Ok(stats)
                }
            }
        }
    }
}
