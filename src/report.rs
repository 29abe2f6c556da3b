// Report formatting for stdout
// Text mirrors the nested mappings the analysis prints; JSON carries the same data for tooling.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

use crate::aggregate::{DimensionTable, ExperimentStats};
use crate::correlation::CorrelationMatrix;
use crate::types::{Dimension, DimensionAggregate, DimensionDefaults, FilterPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => anyhow::bail!("Unknown output format '{}' (expected text or json)", other),
        }
    }
}

/// Everything one invocation computed, serialized for `--format json`
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: String,
    pub experiment_dir: String,
    /// Defaults the non-grouped dimensions were held at; absent when unfiltered
    pub filter: Option<DimensionDefaults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiments: Option<ExperimentStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<BTreeMap<Dimension, DimensionTable>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationMatrix>,
    /// Image files written by the plot command
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plots: Vec<String>,
}

impl Report {
    pub fn new(experiment_dir: &Path, policy: &FilterPolicy) -> Self {
        let filter = match policy {
            FilterPolicy::Unfiltered => None,
            FilterPolicy::Defaults(defaults) => Some(*defaults),
        };
        Self {
            generated_at: Utc::now().to_rfc3339(),
            experiment_dir: experiment_dir.display().to_string(),
            filter,
            experiments: None,
            dimensions: None,
            correlation: None,
            plots: Vec::new(),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Keys ordered by numeric value when they parse, otherwise lexically after the numbers
pub fn ordered_entries(table: &DimensionTable) -> Vec<(&String, &DimensionAggregate)> {
    let mut entries: Vec<_> = table.iter().collect();
    entries.sort_by(|(a, _), (b, _)| match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    });
    entries
}

pub fn format_experiments(stats: &ExperimentStats) -> String {
    let mut out = String::new();
    for (name, aggregate) in stats {
        let _ = writeln!(
            out,
            "{name}: avg_request_scheduling_delay={:.6} avg_mfu={:.6} (trials={}, requests={}, replicas={})",
            aggregate.avg_request_scheduling_delay,
            aggregate.avg_mfu,
            aggregate.trials,
            aggregate.requests,
            aggregate.replicas
        );
    }
    out
}

pub fn format_dimension(dimension: Dimension, table: &DimensionTable) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", dimension.heading());
    if table.is_empty() {
        let _ = writeln!(out, "  (no matching runs)");
    }
    for (value, aggregate) in ordered_entries(table) {
        let _ = writeln!(
            out,
            "  {value}: avg_mfu={:.6} avg_request_scheduling_delay={:.6} (runs={})",
            aggregate.avg_mfu, aggregate.avg_request_scheduling_delay, aggregate.runs
        );
    }
    out
}

pub fn format_correlation(matrix: &CorrelationMatrix) -> String {
    let mut out = String::new();
    let _ = write!(out, "{:>8}", "");
    for column in &matrix.columns {
        let _ = write!(out, " {column:>8}");
    }
    out.push('\n');
    for (column, row) in matrix.columns.iter().zip(&matrix.values) {
        let _ = write!(out, "{column:>8}");
        for value in row {
            if value.is_nan() {
                let _ = write!(out, " {:>8}", "nan");
            } else {
                let _ = write!(out, " {value:>8.3}");
            }
        }
        out.push('\n');
    }
    out
}
