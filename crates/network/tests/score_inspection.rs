use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use libp2p::gossipsub::PeerScoreParams;
use ssv_network::{
    subnet_topic_name, CachedValidatorStats, GossipMetrics, InspectionConfig, PeerScoreBook,
    PeerScoreSnapshot, PeerScoreSource, PeerId, ScoreInspectionService, ScoreInspector,
    ScoringConfig, StaticValidatorStats, StatsError, TopicParamsRefresh, TopicScoreFactory,
    TopicScoreSnapshot, ValidatorStats, ValidatorStatsSource,
};

struct FixedScores {
    scores: HashMap<PeerId, PeerScoreSnapshot>,
    calls: AtomicUsize,
}

impl FixedScores {
    fn new(scores: HashMap<PeerId, PeerScoreSnapshot>) -> Self {
        Self {
            scores,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PeerScoreSource for FixedScores {
    async fn peer_scores(&self) -> anyhow::Result<HashMap<PeerId, PeerScoreSnapshot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.clone())
    }
}

struct BrokenScores;

#[async_trait]
impl PeerScoreSource for BrokenScores {
    async fn peer_scores(&self) -> anyhow::Result<HashMap<PeerId, PeerScoreSnapshot>> {
        Err(anyhow!("swarm stopped"))
    }
}

#[derive(Default)]
struct CountingRefresh(AtomicUsize);

impl TopicParamsRefresh for CountingRefresh {
    fn refresh_topic_params(&self) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct OfflineBeacon;

#[async_trait]
impl ValidatorStatsSource for OfflineBeacon {
    async fn fetch_validator_stats(&self) -> Result<ValidatorStats, StatsError> {
        Err(StatsError::Unavailable("connection refused".into()))
    }
}

struct HangingBeacon;

#[async_trait]
impl ValidatorStatsSource for HangingBeacon {
    async fn fetch_validator_stats(&self) -> Result<ValidatorStats, StatsError> {
        std::future::pending().await
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn stats() -> ValidatorStats {
    ValidatorStats {
        total: 12_000,
        active: 11_500,
        mine: 8,
    }
}

fn penalised_peer() -> (PeerId, PeerScoreSnapshot) {
    let snapshot = PeerScoreSnapshot {
        score: -1500.0,
        topics: HashMap::from([(
            subnet_topic_name(5),
            TopicScoreSnapshot {
                invalid_message_deliveries: 9.0,
                ..TopicScoreSnapshot::default()
            },
        )]),
        ..PeerScoreSnapshot::default()
    };
    (PeerId::random(), snapshot)
}

struct Fixture {
    metrics: Arc<GossipMetrics>,
    cache: Arc<CachedValidatorStats>,
    book: Arc<PeerScoreBook>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            metrics: Arc::new(GossipMetrics::new()),
            cache: Arc::new(CachedValidatorStats::new(Duration::from_secs(600))),
            book: Arc::new(PeerScoreBook::new()),
        }
    }

    fn service(
        &self,
        scores: Arc<dyn PeerScoreSource>,
        source: Arc<dyn ValidatorStatsSource>,
        interval: Duration,
    ) -> ScoreInspectionService {
        let inspector = ScoreInspector::new(self.metrics.clone(), |_| false, PeerScoreParams::default())
            .with_score_index(self.book.clone());
        ScoreInspectionService::new(
            Arc::new(inspector),
            scores,
            self.cache.clone(),
            source,
            self.metrics.clone(),
            InspectionConfig {
                interval,
                stats_timeout: Duration::from_secs(2),
            },
        )
    }
}

#[tokio::test]
async fn inspection_round_updates_gauge_and_index() {
    init_tracing();
    let fixture = Fixture::new();
    let (peer, snapshot) = penalised_peer();
    let service = fixture.service(
        Arc::new(FixedScores::new(HashMap::from([(peer, snapshot)]))),
        Arc::new(StaticValidatorStats(stats())),
        Duration::from_secs(60),
    );

    let inspections = service.run_once().await.expect("inspections");
    assert_eq!(inspections.len(), 1);
    assert_eq!(inspections[0].total_invalid_messages, 3.0);
    assert!(inspections[0].low_score);
    assert!(!inspections[0].connected);

    assert_eq!(fixture.metrics.peer_score(&peer), Some(-1500.0));
    assert!(fixture.book.get(&peer).expect("indexed").low_score);
    assert_eq!(
        ssv_network::ValidatorStatsProvider::validator_stats(fixture.cache.as_ref()),
        Ok(stats())
    );
}

#[tokio::test]
async fn failed_stats_read_does_not_skip_inspection() {
    init_tracing();
    let fixture = Fixture::new();
    let (peer, snapshot) = penalised_peer();
    let service = fixture.service(
        Arc::new(FixedScores::new(HashMap::from([(peer, snapshot)]))),
        Arc::new(OfflineBeacon),
        Duration::from_secs(60),
    );

    assert_eq!(service.run_once().await.map(|i| i.len()), Some(1));
    let snapshot = fixture.metrics.snapshot();
    assert_eq!(snapshot.stats_refresh_failures, 1);
    assert_eq!(snapshot.inspections, 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_stats_read_is_bounded() {
    let fixture = Fixture::new();
    let service = fixture.service(
        Arc::new(FixedScores::new(HashMap::new())),
        Arc::new(HangingBeacon),
        Duration::from_secs(60),
    );

    let inspections = tokio::time::timeout(Duration::from_secs(10), service.run_once())
        .await
        .expect("round finishes within the stats timeout");
    assert_eq!(inspections.map(|i| i.len()), Some(0));
    assert_eq!(fixture.metrics.snapshot().stats_refresh_failures, 1);
}

#[tokio::test]
async fn unreadable_scores_skip_the_round() {
    let fixture = Fixture::new();
    let service = fixture.service(
        Arc::new(BrokenScores),
        Arc::new(StaticValidatorStats(stats())),
        Duration::from_secs(60),
    );

    assert!(service.run_once().await.is_none());
    assert_eq!(fixture.metrics.snapshot().inspections, 0);
}

#[tokio::test(start_paused = true)]
async fn service_runs_on_interval_until_shutdown() {
    let fixture = Fixture::new();
    let scores = Arc::new(FixedScores::new(HashMap::from([penalised_peer()])));
    let service = fixture.service(
        scores.clone(),
        Arc::new(StaticValidatorStats(stats())),
        Duration::from_secs(30),
    );

    let handle = service.start();
    tokio::time::sleep(Duration::from_secs(65)).await;
    handle.shutdown().await;

    let calls = scores.calls.load(Ordering::SeqCst);
    assert_eq!(calls, 3, "ticks at 0s, 30s and 60s");

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(scores.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn topic_params_follow_the_stats_cache() {
    let cache = Arc::new(CachedValidatorStats::new(Duration::from_secs(600)));
    let factory = TopicScoreFactory::new(cache.clone(), ScoringConfig::default().topic_score_cap);
    let topics: Vec<String> = (0..factory.subnets()).map(subnet_topic_name).collect();

    assert!(topics
        .iter()
        .all(|topic| factory.topic_score_params(topic).is_none()));

    cache
        .refresh(&StaticValidatorStats(stats()), Duration::from_secs(1))
        .await
        .expect("refresh");
    assert!(topics
        .iter()
        .all(|topic| factory.topic_score_params(topic).is_some()));
}

#[tokio::test]
async fn topic_params_are_rebuilt_after_each_stats_refresh() {
    let fixture = Fixture::new();
    let refresh = Arc::new(CountingRefresh::default());
    let service = fixture
        .service(
            Arc::new(FixedScores::new(HashMap::new())),
            Arc::new(StaticValidatorStats(stats())),
            Duration::from_secs(60),
        )
        .with_topic_params_refresh(refresh.clone());

    service.run_once().await;
    service.run_once().await;
    assert_eq!(refresh.0.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_stats_read_keeps_topic_params() {
    let fixture = Fixture::new();
    let refresh = Arc::new(CountingRefresh::default());
    let service = fixture
        .service(
            Arc::new(FixedScores::new(HashMap::new())),
            Arc::new(OfflineBeacon),
            Duration::from_secs(60),
        )
        .with_topic_params_refresh(refresh.clone());

    service.run_once().await;
    assert_eq!(refresh.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_validator_population_is_not_scored() {
    let cache = Arc::new(CachedValidatorStats::new(Duration::from_secs(600)));
    cache.set(ValidatorStats::default());
    let factory = TopicScoreFactory::new(cache, ScoringConfig::default().topic_score_cap);
    assert!(factory.topic_score_params(&subnet_topic_name(0)).is_none());
}
