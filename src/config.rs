// Analysis configuration
// Defaults reproduce the layout written by the simulator; a TOML file and
// SIMSTATS_* environment variables can override them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::{DimensionDefaults, FilterPolicy};

pub const ENV_EXPERIMENT_DIR: &str = "SIMSTATS_EXPERIMENT_DIR";
pub const ENV_OUTPUT_DIR: &str = "SIMSTATS_OUTPUT_DIR";
pub const ENV_FILTER: &str = "SIMSTATS_FILTER";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub experiment_dir: PathBuf,
    pub output_dir: PathBuf,
    pub layout: TrialLayout,
    pub filter: FilterConfig,
}

/// File and key names expected inside an experiment tree
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrialLayout {
    /// Only folders whose name starts with this are treated as experiment runs
    pub experiment_prefix: String,
    pub request_metrics_file: String,
    pub scheduling_delay_column: String,
    pub plots_dir: String,
    /// Substring identifying per-replica MFU files in the plots directory
    pub mfu_marker: String,
    pub weighted_mean_suffix: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub replica: f64,
    pub batch: f64,
    pub qps: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            experiment_dir: PathBuf::from("simulator_output"),
            output_dir: PathBuf::from("experiment_results"),
            layout: TrialLayout::default(),
            filter: FilterConfig::default(),
        }
    }
}

impl Default for TrialLayout {
    fn default() -> Self {
        Self {
            experiment_prefix: "replicas".to_string(),
            request_metrics_file: "request_metrics.csv".to_string(),
            scheduling_delay_column: "request_scheduling_delay".to_string(),
            plots_dir: "plots".to_string(),
            mfu_marker: "mfu".to_string(),
            weighted_mean_suffix: "weighted_mean".to_string(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        let defaults = DimensionDefaults::default();
        Self {
            enabled: true,
            replica: defaults.replica,
            batch: defaults.batch,
            qps: defaults.qps,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {:?}: {}", path, e))?;
        let config: AnalysisConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// `load` with an explicit variable lookup
    pub fn load_with_env<F>(path: Option<&Path>, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        // Override with environment variables
        if let Some(dir) = env(ENV_EXPERIMENT_DIR) {
            debug!("{} overrides experiment_dir with {}", ENV_EXPERIMENT_DIR, dir);
            config.experiment_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env(ENV_OUTPUT_DIR) {
            debug!("{} overrides output_dir with {}", ENV_OUTPUT_DIR, dir);
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(filter) = env(ENV_FILTER) {
            config.filter.enabled = parse_bool(&filter).ok_or_else(|| {
                anyhow::anyhow!("{} must be true or false, got '{}'", ENV_FILTER, filter)
            })?;
        }

        Ok(config)
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        if self.filter.enabled {
            FilterPolicy::Defaults(DimensionDefaults {
                replica: self.filter.replica,
                batch: self.filter.batch,
                qps: self.filter.qps,
            })
        } else {
            FilterPolicy::Unfiltered
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
