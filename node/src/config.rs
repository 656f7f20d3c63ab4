use crate::admission::SlotWindow;
use crate::clock::MAINNET_GENESIS_TIME;
use anyhow::{anyhow, Result};
use config::{Config, File as ConfigFile};
use ssv_network::{ScoringConfig, ValidatorStats, DEFAULT_SUBNETS};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "SSV";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub config_path: Option<PathBuf>,

    // P2P
    pub p2p_host: String,
    pub p2p_port: u16,
    pub bootstrap_nodes: Vec<String>,
    pub subnets: usize,
    pub heartbeat_interval_ms: u64,

    // Scoring
    pub topic_score_cap: f64,
    pub topic_params_refresh_secs: u64,
    pub inspection_interval_secs: u64,

    // Validator statistics
    pub total_validators: u64,
    pub active_validators: u64,
    pub my_validators: u64,
    pub stats_timeout_secs: u64,
    pub stats_max_age_secs: u64,

    // Admission
    pub committee_size: usize,
    pub admission_retain_slots: u64,
    pub admission_max_future_slots: u64,
    pub genesis_time: u64,

    // Observability
    pub prometheus_enabled: bool,
    pub metrics_host: String,
    pub metrics_port: u16,
    pub trace_logging: bool,

    // Logging
    pub log_level: String,
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let scoring = ScoringConfig::default();
        Self {
            config_path: None,
            p2p_host: "0.0.0.0".to_string(),
            p2p_port: ssv_network::gossip::DEFAULT_P2P_PORT,
            bootstrap_nodes: Vec::new(),
            subnets: DEFAULT_SUBNETS,
            heartbeat_interval_ms: 700,
            topic_score_cap: scoring.topic_score_cap,
            topic_params_refresh_secs: scoring.one_epoch_duration.as_secs(),
            inspection_interval_secs: 60,
            total_validators: 0,
            active_validators: 0,
            my_validators: 0,
            stats_timeout_secs: 5,
            stats_max_age_secs: 600,
            committee_size: 4,
            admission_retain_slots: 64,
            admission_max_future_slots: 2,
            genesis_time: MAINNET_GENESIS_TIME,
            prometheus_enabled: true,
            metrics_host: "127.0.0.1".to_string(),
            metrics_port: 15000,
            trace_logging: false,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from an optional TOML file and `SSV_*` environment variables.
    /// Keys missing from both keep their defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            builder = builder.add_source(ConfigFile::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("bootstrap_nodes"),
        );
        let source = builder.build()?;

        let defaults = Self::default();
        let config = Self {
            config_path: config_path.map(Path::to_path_buf),
            p2p_host: get_string_value(&source, &["p2p.host", "p2p_host"])
                .unwrap_or(defaults.p2p_host),
            p2p_port: get_number(&source, &["p2p.port", "p2p_port"], defaults.p2p_port)?,
            bootstrap_nodes: get_list(&source, &["p2p.bootstrap_nodes", "bootstrap_nodes"])
                .unwrap_or(defaults.bootstrap_nodes),
            subnets: get_number(&source, &["p2p.subnets", "subnets"], defaults.subnets)?,
            heartbeat_interval_ms: get_number(
                &source,
                &["p2p.heartbeat_interval_ms", "heartbeat_interval_ms"],
                defaults.heartbeat_interval_ms,
            )?,
            topic_score_cap: get_float(
                &source,
                &["scoring.topic_score_cap", "topic_score_cap"],
                defaults.topic_score_cap,
            )?,
            topic_params_refresh_secs: get_number(
                &source,
                &["scoring.topic_params_refresh_secs", "topic_params_refresh_secs"],
                defaults.topic_params_refresh_secs,
            )?,
            inspection_interval_secs: get_number(
                &source,
                &["scoring.inspection_interval_secs", "inspection_interval_secs"],
                defaults.inspection_interval_secs,
            )?,
            total_validators: get_number(
                &source,
                &["validators.total", "total_validators"],
                defaults.total_validators,
            )?,
            active_validators: get_number(
                &source,
                &["validators.active", "active_validators"],
                defaults.active_validators,
            )?,
            my_validators: get_number(
                &source,
                &["validators.mine", "my_validators"],
                defaults.my_validators,
            )?,
            stats_timeout_secs: get_number(
                &source,
                &["validators.stats_timeout_secs", "stats_timeout_secs"],
                defaults.stats_timeout_secs,
            )?,
            stats_max_age_secs: get_number(
                &source,
                &["validators.stats_max_age_secs", "stats_max_age_secs"],
                defaults.stats_max_age_secs,
            )?,
            committee_size: get_number(
                &source,
                &["admission.committee_size", "committee_size"],
                defaults.committee_size,
            )?,
            admission_retain_slots: get_number(
                &source,
                &["admission.retain_slots", "admission_retain_slots"],
                defaults.admission_retain_slots,
            )?,
            admission_max_future_slots: get_number(
                &source,
                &["admission.max_future_slots", "admission_max_future_slots"],
                defaults.admission_max_future_slots,
            )?,
            genesis_time: get_number(
                &source,
                &["beacon.genesis_time", "genesis_time"],
                defaults.genesis_time,
            )?,
            prometheus_enabled: get_bool_value(
                &source,
                &["metrics.enabled", "prometheus_enabled"],
                defaults.prometheus_enabled,
            ),
            metrics_host: get_string_value(&source, &["metrics.host", "metrics_host"])
                .unwrap_or(defaults.metrics_host),
            metrics_port: get_number(
                &source,
                &["metrics.port", "metrics_port"],
                defaults.metrics_port,
            )?,
            trace_logging: get_bool_value(
                &source,
                &["logging.trace_pubsub", "trace_logging"],
                defaults.trace_logging,
            ),
            log_level: get_string_value(&source, &["logging.level", "log_level"])
                .unwrap_or(defaults.log_level),
            log_format: get_string_value(&source, &["logging.format", "log_format"])
                .unwrap_or(defaults.log_format),
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.p2p_port == 0 {
            anyhow::bail!("P2P_PORT must be greater than zero");
        }
        if self.subnets == 0 {
            anyhow::bail!("SUBNETS must be greater than zero");
        }
        if self.committee_size == 0 {
            anyhow::bail!("COMMITTEE_SIZE must be greater than zero");
        }
        if self.admission_retain_slots == 0 {
            anyhow::bail!("ADMISSION_RETAIN_SLOTS must be greater than zero");
        }
        if self.inspection_interval_secs == 0 || self.topic_params_refresh_secs == 0 {
            anyhow::bail!("inspection and topic params refresh intervals must be positive");
        }
        if self.active_validators > self.total_validators {
            anyhow::bail!(
                "ACTIVE_VALIDATORS ({}) cannot exceed TOTAL_VALIDATORS ({})",
                self.active_validators,
                self.total_validators
            );
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json', got '{}'", self.log_format);
        }
        Ok(())
    }

    pub fn validator_stats(&self) -> ValidatorStats {
        ValidatorStats {
            total: self.total_validators,
            active: self.active_validators,
            mine: self.my_validators,
        }
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_secs(self.stats_timeout_secs)
    }

    pub fn stats_max_age(&self) -> Duration {
        Duration::from_secs(self.stats_max_age_secs)
    }

    pub fn inspection_interval(&self) -> Duration {
        Duration::from_secs(self.inspection_interval_secs)
    }

    pub fn slot_window(&self) -> SlotWindow {
        SlotWindow {
            retain_slots: self.admission_retain_slots,
            max_future_slots: self.admission_max_future_slots,
        }
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn get_number<T>(config: &Config, keys: &[&str], default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_string_value(config, keys) {
        Some(raw) => raw
            .parse()
            .map_err(|err| anyhow!("invalid value '{raw}' for {}: {err}", keys[0])),
        None => Ok(default),
    }
}

fn get_float(config: &Config, keys: &[&str], default: f64) -> Result<f64> {
    get_number(config, keys, default)
}

fn get_list(config: &Config, keys: &[&str]) -> Option<Vec<String>> {
    keys.iter().find_map(|key| {
        config
            .get_array(key)
            .ok()
            .map(|values| {
                values
                    .into_iter()
                    .filter_map(|value| value.into_string().ok())
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .collect()
            })
            .or_else(|| {
                get_string_value(config, &[*key]).map(|raw| {
                    raw.split(',')
                        .map(|value| value.trim().to_string())
                        .filter(|value| !value.is_empty())
                        .collect()
                })
            })
    })
}
