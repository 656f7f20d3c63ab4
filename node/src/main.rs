use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_util::MetricKindMask;
use ssv_network::topics::params::SLOT_DURATION;
use ssv_network::{
    subnet_topic_name, CachedValidatorStats, GossipConfig, GossipEvent, GossipMetrics,
    GossipNetwork, InspectionConfig, Multiaddr, PeerScoreBook, PubsubTracer,
    ScoreInspectionService, ScoreInspector, ScoringConfig, StaticValidatorStats,
    TopicScoreFactory,
};
use ssv_validation::{MessageAdmission, StaticCommittee};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod admission;
mod clock;
mod config;
mod version;

use admission::AdmissionValidator;
use clock::SystemSlotClock;
use config::AppConfig;
use version::version_string;

fn cli() -> Command {
    Command::new("ssv-node")
        .version(version::SSV_NODE_VERSION)
        .about("SSV node gossip layer")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Override the log format"),
        )
        .arg(
            Arg::new("p2p-port")
                .long("p2p-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override P2P port"),
        )
        .arg(
            Arg::new("trace-logging")
                .long("trace-logging")
                .action(ArgAction::SetTrue)
                .help("Log every pubsub trace event"),
        )
        .arg(
            Arg::new("disable-metrics")
                .long("disable-metrics")
                .action(ArgAction::SetTrue)
                .help("Disable the Prometheus metrics endpoint"),
        )
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = AppConfig::load(config_path.as_deref())?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(p2p_port) = matches.get_one::<u16>("p2p-port") {
        config.p2p_port = *p2p_port;
    }

    if matches.get_flag("trace-logging") {
        config.trace_logging = true;
    }

    if matches.get_flag("disable-metrics") {
        config.prometheus_enabled = false;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config_with_overrides(&matches)?;

    init_logging(&config)?;
    info!(version = %version_string(), "starting SSV node");
    if let Some(path) = &config.config_path {
        info!(path = %path.display(), "loaded configuration file");
    }
    init_metrics(&config);

    let metrics = Arc::new(GossipMetrics::new());

    // Validator statistics
    if config.total_validators == 0 {
        warn!("no validators configured, subnet topics stay unscored until statistics report some");
    }
    let stats_source = Arc::new(StaticValidatorStats(config.validator_stats()));
    let stats_cache = Arc::new(CachedValidatorStats::new(config.stats_max_age()));
    if stats_cache
        .refresh(stats_source.as_ref(), config.stats_timeout())
        .await
        .is_err()
    {
        metrics.record_stats_refresh_failure();
    }

    // Gossip
    let scoring = ScoringConfig {
        topic_score_cap: config.topic_score_cap,
        ..ScoringConfig::default()
    };
    let factory = TopicScoreFactory::new(stats_cache.clone(), config.topic_score_cap)
        .with_subnets(config.subnets);
    let tracer = Arc::new(PubsubTracer::new(metrics.clone(), config.trace_logging));
    let validator = Arc::new(AdmissionValidator::new(
        MessageAdmission::new(StaticCommittee(config.committee_size)),
        Arc::new(SystemSlotClock::new(config.genesis_time, SLOT_DURATION)),
        config.slot_window(),
    ));

    let gossip_config = GossipConfig {
        listen_addresses: vec![listen_address(&config)?],
        bootstrap_peers: parse_multiaddrs(&config.bootstrap_nodes),
        topics: (0..config.subnets).map(subnet_topic_name).collect(),
        heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
        topic_params_refresh: Duration::from_secs(config.topic_params_refresh_secs),
        scoring,
        ..GossipConfig::default()
    };
    let network = GossipNetwork::new(gossip_config, validator.clone(), factory, tracer)?;
    let handle = network.handle();
    info!(peer_id = %network.peer_id(), "gossip network started");

    // Score inspection
    let score_book = Arc::new(PeerScoreBook::new());
    let inspector = ScoreInspector::with_shared_params(
        metrics.clone(),
        handle.connection_checker(),
        handle.score_params(),
    )
    .with_score_index(score_book.clone());
    let inspection = ScoreInspectionService::new(
        Arc::new(inspector),
        Arc::new(handle.clone()),
        stats_cache.clone(),
        stats_source,
        metrics.clone(),
        InspectionConfig {
            interval: config.inspection_interval(),
            stats_timeout: config.stats_timeout(),
        },
    )
    .with_topic_params_refresh(Arc::new(handle.clone()))
    .start();

    // Gossip events
    let events = network.take_event_receiver();
    let event_task = tokio::spawn(async move {
        let Some(mut events) = events else {
            return;
        };
        while let Some(event) = events.recv().await {
            match event {
                GossipEvent::Message { peer, topic, data } => {
                    debug!(%peer, %topic, bytes = data.len(), "accepted gossip message");
                }
                GossipEvent::PeerConnected { peer } => debug!(%peer, "peer connected"),
                GossipEvent::PeerDisconnected { peer } => debug!(%peer, "peer disconnected"),
                GossipEvent::NewListenAddr { address } => info!(%address, "listening"),
            }
        }
    });

    // Admission counter and score index pruning, once per epoch
    let pruning_validator = validator.clone();
    let pruning_book = score_book.clone();
    let epoch = ScoringConfig::default().one_epoch_duration;
    let score_retention = score_retention(&config);
    let pruning_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(epoch);
        loop {
            ticker.tick().await;
            let removed = pruning_validator.prune();
            debug!(
                removed,
                remaining = pruning_validator.tracked_keys(),
                current_slot = pruning_validator.current_slot().0,
                "pruned admission counters"
            );
            let forgotten = pruning_book.prune(score_retention);
            debug!(
                forgotten,
                indexed_peers = pruning_book.len(),
                low_score_peers = pruning_book.low_score_peers().len(),
                "pruned peer score index"
            );
        }
    });

    info!("SSV node is ready and running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down SSV node");

    inspection.shutdown().await;
    network.shutdown();
    pruning_task.abort();
    event_task.abort();

    let snapshot = metrics.snapshot();
    info!(
        trace_events = snapshot.total_trace_events(),
        inspections = snapshot.inspections,
        indexed_peers = score_book.len(),
        "SSV node shutdown complete"
    );
    Ok(())
}

/// How long an idle peer stays in the score index and its gauge stays
/// exported: a few inspection rounds, and never less than one epoch.
fn score_retention(config: &AppConfig) -> Duration {
    (config.inspection_interval() * 3).max(ScoringConfig::default().one_epoch_duration)
}

fn listen_address(config: &AppConfig) -> Result<Multiaddr> {
    let ip = Ipv4Addr::from_str(&config.p2p_host)
        .map_err(|err| anyhow::anyhow!("invalid p2p host {}: {err}", config.p2p_host))?;
    Ok(ssv_network::tcp_listen_address(ip, config.p2p_port))
}

fn parse_multiaddrs(values: &[String]) -> Vec<Multiaddr> {
    values
        .iter()
        .filter_map(|value| match Multiaddr::from_str(value) {
            Ok(addr) => Some(addr),
            Err(err) => {
                warn!("Invalid bootstrap multiaddr {}: {}", value, err);
                None
            }
        })
        .collect()
}

fn init_metrics(config: &AppConfig) {
    if !config.prometheus_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return;
    }

    let addr = match format!("{}:{}", config.metrics_host, config.metrics_port).parse::<SocketAddr>()
    {
        Ok(addr) => addr,
        Err(err) => {
            warn!("Invalid metrics address: {}", err);
            return;
        }
    };

    match PrometheusBuilder::new()
        .with_http_listener(addr)
        .idle_timeout(MetricKindMask::GAUGE, Some(score_retention(config)))
        .install()
    {
        Ok(()) => {
            info!(%addr, "Prometheus metrics exporter registered");
            GossipMetrics::describe();
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}
