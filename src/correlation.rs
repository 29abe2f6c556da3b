// Correlation table over experiment runs
// Pure computation; the heat-map drawing lives in `render`.

use serde::Serialize;

use crate::aggregate::ExperimentStats;
use crate::error::Result;
use crate::types::{Dimension, ExperimentName};

/// Column order of the correlation table
pub const COLUMNS: [&str; 5] = ["replica", "batch", "qps", "mfu", "delay"];

/// One experiment run as a numeric row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigRow {
    pub experiment: String,
    pub replica: f64,
    pub batch: f64,
    pub qps: f64,
    pub mfu: f64,
    pub delay: f64,
}

impl ConfigRow {
    fn values(&self) -> [f64; 5] {
        [self.replica, self.batch, self.qps, self.mfu, self.delay]
    }
}

/// Pairwise Pearson coefficients, `values[i][j]` for `columns[i]` vs `columns[j]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn get(&self, row: &str, column: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == row)?;
        let j = self.columns.iter().position(|c| c == column)?;
        Some(self.values[i][j])
    }
}

/// Build the replica/batch/qps/mfu/delay table. Every name must carry all three dimensions.
pub fn build_table(stats: &ExperimentStats) -> Result<Vec<ConfigRow>> {
    stats
        .iter()
        .map(|(name, aggregate)| -> Result<ConfigRow> {
            let experiment = ExperimentName::new(name.as_str());
            Ok(ConfigRow {
                experiment: name.clone(),
                replica: experiment.value(Dimension::Replica)?,
                batch: experiment.value(Dimension::Batch)?,
                qps: experiment.value(Dimension::Qps)?,
                mfu: aggregate.avg_mfu,
                delay: aggregate.avg_request_scheduling_delay,
            })
        })
        .collect()
}

/// Pearson correlation of every column pair.
///
/// A column with zero variance (or fewer than two rows) correlates as NaN with
/// everything, itself included.
pub fn correlation_matrix(rows: &[ConfigRow]) -> CorrelationMatrix {
    let series: Vec<Vec<f64>> = (0..COLUMNS.len())
        .map(|i| rows.iter().map(|row| row.values()[i]).collect())
        .collect();

    let values = (0..COLUMNS.len())
        .map(|i| {
            (0..COLUMNS.len())
                .map(|j| pearson(&series[i], &series[j], i == j))
                .collect()
        })
        .collect();

    CorrelationMatrix {
        columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
        values,
    }
}

fn pearson(x: &[f64], y: &[f64], same: bool) -> f64 {
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }

    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }
    if same {
        return 1.0;
    }
    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}
