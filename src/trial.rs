// Per-trial statistics extraction
// Reads one trial directory: the request metrics table and the per-replica MFU files.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::TrialLayout;
use crate::error::{Result, StatsError};
use crate::observability::{log_operation, record_metric, MetricType, Operation, OperationContext};
use crate::types::TrialStats;

/// Request count and summed scheduling delay from a metrics table
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestTotals {
    pub requests: u64,
    pub total_delay: f64,
}

/// Read the totals of one trial directory.
///
/// A trial without a metrics table or without a plots directory contributes
/// zero to every total rather than failing the run.
pub fn read_trial_stats(trial_dir: &Path, layout: &TrialLayout) -> Result<TrialStats> {
    read_trial_stats_in(trial_dir, layout, OperationContext::new("read_trial_stats"))
}

/// Same as `read_trial_stats`, logging under a caller-supplied context
pub(crate) fn read_trial_stats_in(
    trial_dir: &Path,
    layout: &TrialLayout,
    mut ctx: OperationContext,
) -> Result<TrialStats> {
    ctx.add_attribute("trial", trial_dir.display().to_string());

    let metrics_path = trial_dir.join(&layout.request_metrics_file);
    let Some(totals) = read_request_totals(&metrics_path, &layout.scheduling_delay_column)? else {
        log_operation(
            &ctx,
            &Operation::TrialMissing {
                trial: trial_dir.display().to_string(),
                missing: layout.request_metrics_file.clone(),
            },
        );
        return Ok(TrialStats::default());
    };

    let plots_dir = trial_dir.join(&layout.plots_dir);
    let Some(mfu_files) = list_mfu_files(&plots_dir, &layout.mfu_marker)? else {
        log_operation(
            &ctx,
            &Operation::TrialMissing {
                trial: trial_dir.display().to_string(),
                missing: format!("{}/", layout.plots_dir),
            },
        );
        return Ok(TrialStats::default());
    };

    let mut total_mfu = 0.0;
    for file in &mfu_files {
        total_mfu += read_replica_mfu(file, &layout.weighted_mean_suffix)?;
    }
    record_metric(MetricType::Counter {
        name: "mfu.files_read",
        value: mfu_files.len() as u64,
    });

    let stats = TrialStats {
        requests: totals.requests,
        total_delay: totals.total_delay,
        total_mfu,
        replicas: mfu_files.len() as u64,
    };

    log_operation(
        &ctx,
        &Operation::TrialRead {
            trial: trial_dir.display().to_string(),
            requests: stats.requests,
            replicas: stats.replicas,
        },
    );
    Ok(stats)
}

/// Count rows and sum the delay column of a request metrics table.
///
/// Returns `None` when the file does not exist. Empty delay cells, and rows too
/// short to reach the delay column, are skipped in the sum but still count as
/// requests.
pub fn read_request_totals(path: &Path, delay_column: &str) -> Result<Option<RequestTotals>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StatsError::io(path, e)),
    };

    let csv_err = |source: csv::Error| StatsError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let column = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .position(|header| header == delay_column)
        .ok_or_else(|| StatsError::MissingColumn {
            path: path.to_path_buf(),
            column: delay_column.to_string(),
        })?;

    let mut totals = RequestTotals::default();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err)?;
        totals.requests += 1;

        let cell = record.get(column).unwrap_or_default();
        if cell.is_empty() {
            continue;
        }
        let delay = cell
            .parse::<f64>()
            .map_err(|_| StatsError::InvalidDelayValue {
                path: path.to_path_buf(),
                column: delay_column.to_string(),
                row,
                value: cell.to_string(),
            })?;
        if !delay.is_nan() {
            totals.total_delay += delay;
        }
    }

    debug!(
        "{:?}: {} requests, total delay {}",
        path, totals.requests, totals.total_delay
    );
    Ok(Some(totals))
}

/// Entries of the plots directory whose name contains `marker`, sorted by name.
///
/// Returns `None` when the directory does not exist.
pub fn list_mfu_files(plots_dir: &Path, marker: &str) -> Result<Option<Vec<PathBuf>>> {
    let entries = match fs::read_dir(plots_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StatsError::io(plots_dir, e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StatsError::io(plots_dir, e))?;
        if entry.file_name().to_string_lossy().contains(marker) {
            files.push(entry.path());
        }
    }
    // Stable order keeps floating-point sums identical across runs
    files.sort();
    Ok(Some(files))
}

/// Sum every value in one MFU file whose key ends with `suffix`
pub fn read_replica_mfu(path: &Path, suffix: &str) -> Result<f64> {
    let content = fs::read_to_string(path).map_err(|e| StatsError::io(path, e))?;
    let data: serde_json::Value =
        serde_json::from_str(&content).map_err(|source| StatsError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    let object = data.as_object().ok_or_else(|| StatsError::InvalidMfuValue {
        path: path.to_path_buf(),
        key: String::new(),
        reason: "top level is not a JSON object".to_string(),
    })?;

    let mut mfu = 0.0;
    for (key, value) in object {
        if !key.ends_with(suffix) {
            continue;
        }
        mfu += value.as_f64().ok_or_else(|| StatsError::InvalidMfuValue {
            path: path.to_path_buf(),
            key: key.clone(),
            reason: format!("expected a number, found {value}"),
        })?;
    }
    Ok(mfu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_metrics(dir: &Path, body: &str) {
        fs::write(dir.join("request_metrics.csv"), body).unwrap();
    }

    #[test]
    fn test_three_requests_without_mfu_files() {
        let dir = TempDir::new().unwrap();
        write_metrics(
            dir.path(),
            "request_id,request_scheduling_delay\n0,1\n1,2\n2,3\n",
        );
        fs::create_dir(dir.path().join("plots")).unwrap();
        fs::write(dir.path().join("plots/batch_size.json"), "{}").unwrap();

        let stats = read_trial_stats(dir.path(), &TrialLayout::default()).unwrap();
        assert_eq!(
            stats,
            TrialStats {
                requests: 3,
                total_delay: 6.0,
                total_mfu: 0.0,
                replicas: 0,
            }
        );
    }

    #[test]
    fn test_missing_metrics_file_is_zero() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("plots")).unwrap();
        fs::write(
            dir.path().join("plots/replica_1_mfu.json"),
            r#"{"replica_1_mfu_weighted_mean": 0.5}"#,
        )
        .unwrap();

        let stats = read_trial_stats(dir.path(), &TrialLayout::default()).unwrap();
        assert_eq!(stats, TrialStats::default());
    }

    #[test]
    fn test_missing_plots_dir_is_zero() {
        let dir = TempDir::new().unwrap();
        write_metrics(dir.path(), "request_scheduling_delay\n4\n");

        let stats = read_trial_stats(dir.path(), &TrialLayout::default()).unwrap();
        assert!(stats.is_empty());
    }

    #[test]
    fn test_mfu_summation_over_replicas() {
        let dir = TempDir::new().unwrap();
        write_metrics(dir.path(), "request_scheduling_delay\n");
        let plots = dir.path().join("plots");
        fs::create_dir(&plots).unwrap();
        fs::write(
            plots.join("replica_1_mfu.json"),
            r#"{"replica_1_mfu_weighted_mean": 0.3, "replica_1_mfu_mean": 9.0}"#,
        )
        .unwrap();
        fs::write(
            plots.join("replica_2_mfu.json"),
            r#"{"replica_2_mfu_weighted_mean": 0.5, "label": "gpu"}"#,
        )
        .unwrap();

        let stats = read_trial_stats(dir.path(), &TrialLayout::default()).unwrap();
        assert_eq!(stats.replicas, 2);
        assert_eq!(stats.requests, 0);
        assert!((stats.total_mfu - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_empty_delay_cells_still_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("request_metrics.csv");
        fs::write(&path, "id,request_scheduling_delay\n0,1.5\n1,\n2,2.5\n").unwrap();

        let totals = read_request_totals(&path, "request_scheduling_delay")
            .unwrap()
            .unwrap();
        assert_eq!(totals.requests, 3);
        assert_eq!(totals.total_delay, 4.0);
    }

    #[test]
    fn test_short_row_counts_without_delay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("request_metrics.csv");

        // Delay present, trailing column missing
        fs::write(&path, "request_scheduling_delay,id\n1,0\n2\n").unwrap();
        let totals = read_request_totals(&path, "request_scheduling_delay")
            .unwrap()
            .unwrap();
        assert_eq!(totals.requests, 2);
        assert_eq!(totals.total_delay, 3.0);

        // Row ends before the delay column
        fs::write(&path, "id,request_scheduling_delay\n0,1\n1\n2,2\n").unwrap();
        let totals = read_request_totals(&path, "request_scheduling_delay")
            .unwrap()
            .unwrap();
        assert_eq!(totals.requests, 3);
        assert_eq!(totals.total_delay, 3.0);
    }

    #[test]
    fn test_trial_read_under_parent_context() {
        let dir = TempDir::new().unwrap();
        write_metrics(dir.path(), "request_scheduling_delay\n2\n");
        fs::create_dir(dir.path().join("plots")).unwrap();

        let parent = OperationContext::new("aggregate_config");
        let child = parent.child("read_trial_stats");
        assert_eq!(child.parent_span_id, Some(parent.span_id));

        let layout = TrialLayout::default();
        let nested = read_trial_stats_in(dir.path(), &layout, child).unwrap();
        assert_eq!(nested, read_trial_stats(dir.path(), &layout).unwrap());
        assert_eq!(nested.requests, 1);
    }

    #[test]
    fn test_missing_column_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("request_metrics.csv");
        fs::write(&path, "id,latency\n0,1\n").unwrap();

        let err = read_request_totals(&path, "request_scheduling_delay").unwrap_err();
        assert!(matches!(err, StatsError::MissingColumn { .. }));
    }

    #[test]
    fn test_non_numeric_delay_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("request_metrics.csv");
        fs::write(&path, "request_scheduling_delay\nslow\n").unwrap();

        let err = read_request_totals(&path, "request_scheduling_delay").unwrap_err();
        assert!(matches!(err, StatsError::InvalidDelayValue { row: 0, .. }));
    }

    #[test]
    fn test_malformed_mfu_json_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mfu.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            read_replica_mfu(&path, "weighted_mean"),
            Err(StatsError::Json { .. })
        ));

        fs::write(&path, r#"{"x_weighted_mean": "high"}"#).unwrap();
        assert!(matches!(
            read_replica_mfu(&path, "weighted_mean"),
            Err(StatsError::InvalidMfuValue { .. })
        ));

        fs::write(&path, "[0.5]").unwrap();
        assert!(read_replica_mfu(&path, "weighted_mean").is_err());
    }

    #[test]
    fn test_nan_literal_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("replica_1_mfu.json");
        fs::write(&path, r#"{"replica_1_mfu_weighted_mean": NaN}"#).unwrap();
        assert!(matches!(
            read_replica_mfu(&path, "weighted_mean"),
            Err(StatsError::Json { .. })
        ));
    }

    #[test]
    fn test_list_mfu_files_is_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["replica_2_mfu.json", "replica_1_mfu.json", "memory.json"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }

        let files = list_mfu_files(dir.path(), "mfu").unwrap().unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["replica_1_mfu.json", "replica_2_mfu.json"]);
    }
}
