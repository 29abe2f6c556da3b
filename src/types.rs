// Domain Types
// Experiment naming, per-trial totals and the derived aggregates.
// Aggregates are plain values recomputed on every run; nothing here touches the filesystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use crate::error::{Result, StatsError};

/// A configuration axis varied across experiment runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Replica,
    Batch,
    Qps,
}

impl Dimension {
    /// All dimensions in reporting order
    pub const ALL: [Dimension; 3] = [Dimension::Replica, Dimension::Batch, Dimension::Qps];

    /// Token index of this dimension's value in an `_`-split folder name
    pub fn position(self) -> usize {
        match self {
            Dimension::Replica => 1,
            Dimension::Batch => 3,
            Dimension::Qps => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Replica => "replica",
            Dimension::Batch => "batch",
            Dimension::Qps => "qps",
        }
    }

    /// Heading used when printing grouped results ("Replica", "Batch", "Qps")
    pub fn heading(self) -> &'static str {
        match self {
            Dimension::Replica => "Replica",
            Dimension::Batch => "Batch",
            Dimension::Qps => "Qps",
        }
    }

    /// The two dimensions held fixed when grouping by `self`
    pub fn others(self) -> [Dimension; 2] {
        match self {
            Dimension::Replica => [Dimension::Batch, Dimension::Qps],
            Dimension::Batch => [Dimension::Replica, Dimension::Qps],
            Dimension::Qps => [Dimension::Replica, Dimension::Batch],
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replica" | "replicas" => Ok(Dimension::Replica),
            "batch" => Ok(Dimension::Batch),
            "qps" => Ok(Dimension::Qps),
            other => Err(StatsError::InvalidDimension(other.to_string())),
        }
    }
}

/// Experiment folder name of the form `replicas_<R>_batch_<B>_qps_<Q>`
///
/// Construction never fails; tokens are only checked when a dimension is requested,
/// so a run grouped without filtering needs just the chosen token to be present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExperimentName {
    inner: String,
}

impl ExperimentName {
    pub fn new(name: impl Into<String>) -> Self {
        Self { inner: name.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Raw token for a dimension, used as the grouping key
    pub fn token(&self, dimension: Dimension) -> Result<&str> {
        self.inner
            .split('_')
            .nth(dimension.position())
            .ok_or_else(|| {
                StatsError::experiment_name(
                    &self.inner,
                    format!(
                        "missing {} token at position {}",
                        dimension,
                        dimension.position()
                    ),
                )
            })
    }

    /// Dimension value parsed as floating point
    pub fn value(&self, dimension: Dimension) -> Result<f64> {
        let token = self.token(dimension)?;
        token.parse::<f64>().map_err(|e| {
            StatsError::experiment_name(
                &self.inner,
                format!("{dimension} token '{token}' is not a number: {e}"),
            )
        })
    }
}

impl fmt::Display for ExperimentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Totals read from one trial directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialStats {
    pub requests: u64,
    pub total_delay: f64,
    pub total_mfu: f64,
    pub replicas: u64,
}

impl TrialStats {
    pub fn is_empty(&self) -> bool {
        self.requests == 0 && self.replicas == 0
    }
}

impl AddAssign for TrialStats {
    fn add_assign(&mut self, rhs: Self) {
        self.requests += rhs.requests;
        self.total_delay += rhs.total_delay;
        self.total_mfu += rhs.total_mfu;
        self.replicas += rhs.replicas;
    }
}

/// Per-configuration totals summed over trials, with derived averages
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigAggregate {
    pub trials: usize,
    pub requests: u64,
    pub total_delay: f64,
    pub total_mfu: f64,
    pub replicas: u64,
    pub avg_request_scheduling_delay: f64,
    pub avg_mfu: f64,
}

impl ConfigAggregate {
    /// Derive averages from summed totals. Zero denominators yield 0.
    pub fn from_totals(totals: TrialStats, trials: usize) -> Self {
        let avg_request_scheduling_delay = if totals.requests == 0 {
            0.0
        } else {
            totals.total_delay / totals.requests as f64
        };
        let avg_mfu = if totals.replicas == 0 {
            0.0
        } else {
            totals.total_mfu / totals.replicas as f64
        };

        Self {
            trials,
            requests: totals.requests,
            total_delay: totals.total_delay,
            total_mfu: totals.total_mfu,
            replicas: totals.replicas,
            avg_request_scheduling_delay,
            avg_mfu,
        }
    }
}

/// Mean of per-run averages for one value of a dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionAggregate {
    pub avg_mfu: f64,
    pub avg_request_scheduling_delay: f64,
    pub runs: usize,
}

/// Fixed values the non-chosen dimensions must match under a filtered policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionDefaults {
    pub replica: f64,
    pub batch: f64,
    pub qps: f64,
}

impl Default for DimensionDefaults {
    fn default() -> Self {
        Self {
            replica: 1.0,
            batch: 1.0,
            qps: 0.5,
        }
    }
}

impl DimensionDefaults {
    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Replica => self.replica,
            Dimension::Batch => self.batch,
            Dimension::Qps => self.qps,
        }
    }
}

/// Which runs take part in cross-configuration averaging
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterPolicy {
    /// Every run is grouped
    Unfiltered,
    /// Only runs whose other two dimensions equal the defaults
    Defaults(DimensionDefaults),
}

impl Default for FilterPolicy {
    fn default() -> Self {
        FilterPolicy::Defaults(DimensionDefaults::default())
    }
}

impl FilterPolicy {
    /// Whether `name` takes part when grouping by `dimension`
    pub fn admits(&self, name: &ExperimentName, dimension: Dimension) -> Result<bool> {
        match self {
            FilterPolicy::Unfiltered => Ok(true),
            FilterPolicy::Defaults(defaults) => {
                for other in dimension.others() {
                    if name.value(other)? != defaults.get(other) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}
