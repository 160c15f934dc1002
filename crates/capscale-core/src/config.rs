//! capscale.toml configuration parser.
//!
//! Every field is optional; `resolve_*` methods fill in defaults and
//! check the values that would otherwise break the engine at runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::HumanDuration;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapscaleConfig {
    pub engine: Option<EngineSection>,
    pub store: Option<StoreSection>,
    pub api: Option<ApiSection>,
    pub capacity: Option<CapacitySection>,
    pub metrics: Option<MetricsSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSection {
    pub sync_period: Option<HumanDuration>,
    pub workers: Option<usize>,
    pub backoff_base: Option<HumanDuration>,
    pub backoff_cap: Option<HumanDuration>,
    pub scale_up_cooldown: Option<HumanDuration>,
    pub scale_down_cooldown: Option<HumanDuration>,
    pub scale_up_margin: Option<f64>,
    pub failure_log_threshold: Option<u32>,
    pub busy_requeue: Option<HumanDuration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSection {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSection {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapacitySection {
    /// Base URL of the capacity admin API, e.g. "http://10.0.0.5:9090".
    pub endpoint: Option<String>,
    pub timeout: Option<HumanDuration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSection {
    pub sample_retention: Option<HumanDuration>,
    pub prune_interval: Option<HumanDuration>,
}

/// Resolved reconciliation-engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Resync period; also the metric sampling window.
    pub sync_period: Duration,
    /// Size of the reconciliation worker pool.
    pub workers: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
    pub scale_up_margin: f64,
    /// Consecutive failures logged at warn before dropping to debug.
    pub failure_log_threshold: u32,
    /// Delay before retrying a key whose pass was already in flight.
    pub busy_requeue: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_period: Duration::from_secs(30),
            workers: 4,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300),
            scale_up_cooldown: Duration::ZERO,
            scale_down_cooldown: Duration::from_secs(300),
            scale_up_margin: 0.0,
            failure_log_threshold: 5,
            busy_requeue: Duration::from_secs(1),
        }
    }
}

/// Resolved capacity client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacitySettings {
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

/// Resolved sample retention settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionSettings {
    pub sample_retention: Duration,
    pub prune_interval: Duration,
}

pub const DEFAULT_API_PORT: u16 = 8080;
pub const DEFAULT_DATA_DIR: &str = "/var/lib/capscale";

impl CapscaleConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve the `[engine]` section against defaults.
    pub fn resolve_engine(&self) -> Result<EngineConfig, ConfigError> {
        let defaults = EngineConfig::default();
        let section = self.engine.clone().unwrap_or_default();
        let pick = |v: Option<HumanDuration>, d: Duration| v.map(Duration::from).unwrap_or(d);

        let config = EngineConfig {
            sync_period: pick(section.sync_period, defaults.sync_period),
            workers: section.workers.unwrap_or(defaults.workers),
            backoff_base: pick(section.backoff_base, defaults.backoff_base),
            backoff_cap: pick(section.backoff_cap, defaults.backoff_cap),
            scale_up_cooldown: pick(section.scale_up_cooldown, defaults.scale_up_cooldown),
            scale_down_cooldown: pick(section.scale_down_cooldown, defaults.scale_down_cooldown),
            scale_up_margin: section.scale_up_margin.unwrap_or(defaults.scale_up_margin),
            failure_log_threshold: section
                .failure_log_threshold
                .unwrap_or(defaults.failure_log_threshold),
            busy_requeue: pick(section.busy_requeue, defaults.busy_requeue),
        };

        if config.sync_period.is_zero() {
            return Err(ConfigError::Invalid("engine.sync_period must be > 0".into()));
        }
        if config.workers == 0 {
            return Err(ConfigError::Invalid("engine.workers must be > 0".into()));
        }
        if config.backoff_base.is_zero() || config.backoff_base > config.backoff_cap {
            return Err(ConfigError::Invalid(format!(
                "engine.backoff_base ({:?}) must be > 0 and <= backoff_cap ({:?})",
                config.backoff_base, config.backoff_cap
            )));
        }
        if !config.scale_up_margin.is_finite() || config.scale_up_margin < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "engine.scale_up_margin must be >= 0, got {}",
                config.scale_up_margin
            )));
        }
        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    pub fn api_port(&self) -> u16 {
        self.api
            .as_ref()
            .and_then(|a| a.port)
            .unwrap_or(DEFAULT_API_PORT)
    }

    pub fn resolve_capacity(&self) -> CapacitySettings {
        let section = self.capacity.clone().unwrap_or_default();
        CapacitySettings {
            endpoint: section.endpoint,
            timeout: section
                .timeout
                .map(Duration::from)
                .unwrap_or(Duration::from_secs(5)),
        }
    }

    pub fn resolve_retention(&self) -> RetentionSettings {
        let section = self.metrics.clone().unwrap_or_default();
        RetentionSettings {
            sample_retention: section
                .sample_retention
                .map(Duration::from)
                .unwrap_or(Duration::from_secs(3600)),
            prune_interval: section
                .prune_interval
                .map(Duration::from)
                .unwrap_or(Duration::from_secs(60)),
        }
    }

    /// Scaffold a config file with every default spelled out.
    pub fn scaffold() -> Self {
        Self::default().spelled_out(&EngineConfig::default())
    }

    /// The configuration the daemon actually runs with: every section
    /// present and every default filled in. Fails on the same values
    /// `resolve_engine` rejects.
    pub fn effective(&self) -> Result<Self, ConfigError> {
        let engine = self.resolve_engine()?;
        Ok(self.spelled_out(&engine))
    }

    fn spelled_out(&self, engine: &EngineConfig) -> Self {
        let capacity = self.resolve_capacity();
        let retention = self.resolve_retention();
        CapscaleConfig {
            engine: Some(EngineSection {
                sync_period: Some(engine.sync_period.into()),
                workers: Some(engine.workers),
                backoff_base: Some(engine.backoff_base.into()),
                backoff_cap: Some(engine.backoff_cap.into()),
                scale_up_cooldown: Some(engine.scale_up_cooldown.into()),
                scale_down_cooldown: Some(engine.scale_down_cooldown.into()),
                scale_up_margin: Some(engine.scale_up_margin),
                failure_log_threshold: Some(engine.failure_log_threshold),
                busy_requeue: Some(engine.busy_requeue.into()),
            }),
            store: Some(StoreSection {
                data_dir: Some(self.data_dir()),
            }),
            api: Some(ApiSection {
                port: Some(self.api_port()),
            }),
            capacity: Some(CapacitySection {
                endpoint: capacity.endpoint,
                timeout: Some(capacity.timeout.into()),
            }),
            metrics: Some(MetricsSection {
                sample_retention: Some(retention.sample_retention.into()),
                prune_interval: Some(retention.prune_interval.into()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_resolves_to_defaults() {
        let config = CapscaleConfig::from_toml_str("").unwrap();
        let engine = config.resolve_engine().unwrap();
        assert_eq!(engine, EngineConfig::default());
        assert_eq!(engine.sync_period, Duration::from_secs(30));
        assert_eq!(engine.scale_down_cooldown, Duration::from_secs(300));
        assert_eq!(config.api_port(), 8080);
        assert_eq!(config.resolve_capacity().endpoint, None);
    }

    #[test]
    fn parse_engine_overrides() {
        let toml_str = r#"
[engine]
sync_period = "10s"
workers = 8
backoff_cap = "2m"
scale_down_cooldown = "10m"
scale_up_margin = 0.1

[capacity]
endpoint = "http://127.0.0.1:9090"
timeout = "500ms"
"#;
        let config = CapscaleConfig::from_toml_str(toml_str).unwrap();
        let engine = config.resolve_engine().unwrap();
        assert_eq!(engine.sync_period, Duration::from_secs(10));
        assert_eq!(engine.workers, 8);
        assert_eq!(engine.backoff_cap, Duration::from_secs(120));
        assert_eq!(engine.backoff_base, Duration::from_secs(1));
        assert_eq!(engine.scale_down_cooldown, Duration::from_secs(600));
        assert_eq!(engine.scale_up_margin, 0.1);

        let capacity = config.resolve_capacity();
        assert_eq!(capacity.endpoint.as_deref(), Some("http://127.0.0.1:9090"));
        assert_eq!(capacity.timeout, Duration::from_millis(500));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_workers = CapscaleConfig::from_toml_str("[engine]\nworkers = 0\n").unwrap();
        assert!(matches!(
            zero_workers.resolve_engine(),
            Err(ConfigError::Invalid(_))
        ));

        let inverted = CapscaleConfig::from_toml_str(
            "[engine]\nbackoff_base = \"10m\"\nbackoff_cap = \"1m\"\n",
        )
        .unwrap();
        assert!(inverted.resolve_engine().is_err());

        assert!(matches!(
            CapscaleConfig::from_toml_str("[engine]\nsync_period = \"soon\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn scaffold_round_trips_through_toml() {
        let rendered = CapscaleConfig::scaffold().to_toml_string().unwrap();
        assert!(rendered.contains("sync_period = \"30s\""));
        assert!(rendered.contains("scale_down_cooldown = \"5m\""));

        let parsed = CapscaleConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed.resolve_engine().unwrap(), EngineConfig::default());
    }

    #[test]
    fn effective_fills_defaults_around_overrides() {
        let config = CapscaleConfig::from_toml_str(
            "[engine]\nworkers = 2\n\n[capacity]\nendpoint = \"http://10.0.0.5:9090\"\n",
        )
        .unwrap();
        let effective = config.effective().unwrap();

        let engine = effective.engine.as_ref().unwrap();
        assert_eq!(engine.workers, Some(2));
        assert_eq!(engine.sync_period, Some(HumanDuration::from_secs(30)));
        assert_eq!(effective.api_port(), DEFAULT_API_PORT);
        assert_eq!(
            effective.resolve_capacity().endpoint.as_deref(),
            Some("http://10.0.0.5:9090")
        );

        let invalid = CapscaleConfig::from_toml_str("[engine]\nworkers = 0\n").unwrap();
        assert!(invalid.effective().is_err());
    }
}
