// Aggregation across trials, experiment runs and dimensions
//
// Trials are summed into one ConfigAggregate per experiment folder; experiment
// folders are then regrouped by a single dimension. Group values are the
// unweighted mean of per-run averages, so a run with many trials weighs the
// same as a run with one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::TrialLayout;
use crate::error::{Result, StatsError};
use crate::observability::{log_operation, Operation, OperationContext};
use crate::trial::read_trial_stats_in;
use crate::types::{
    ConfigAggregate, Dimension, DimensionAggregate, ExperimentName, FilterPolicy, TrialStats,
};

/// Experiment folder name -> per-configuration aggregate
pub type ExperimentStats = BTreeMap<String, ConfigAggregate>;

/// Dimension value (folder-name token) -> grouped averages
pub type DimensionTable = BTreeMap<String, DimensionAggregate>;

/// Sum all trials of one experiment run and derive its averages
pub fn aggregate_config(run_dir: &Path, layout: &TrialLayout) -> Result<ConfigAggregate> {
    let ctx = OperationContext::new("aggregate_config");
    let mut totals = TrialStats::default();
    let trials = sorted_subdirectories(run_dir)?;

    for trial in &trials {
        totals += read_trial_stats_in(trial, layout, ctx.child("read_trial_stats"))?;
    }

    let aggregate = ConfigAggregate::from_totals(totals, trials.len());
    log_operation(
        &ctx,
        &Operation::ConfigAggregate {
            experiment: run_dir.display().to_string(),
            trials: trials.len(),
        },
    );
    Ok(aggregate)
}

/// Walk an experiment directory and aggregate every run folder
pub fn collect_experiment_stats(
    experiment_dir: &Path,
    layout: &TrialLayout,
) -> Result<ExperimentStats> {
    let mut ctx = OperationContext::new("collect_experiment_stats");
    ctx.add_attribute("experiment_dir", experiment_dir.display().to_string());

    let entries = fs::read_dir(experiment_dir).map_err(|e| StatsError::io(experiment_dir, e))?;

    let mut results = ExperimentStats::new();
    for entry in entries {
        let entry = entry.map_err(|e| StatsError::io(experiment_dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&layout.experiment_prefix) || !entry.path().is_dir() {
            debug!("Skipping {:?}: not an experiment folder", entry.path());
            continue;
        }
        let aggregate = aggregate_config(&entry.path(), layout)?;
        results.insert(name, aggregate);
    }

    log_operation(
        &ctx,
        &Operation::ExperimentScan {
            experiment_dir: experiment_dir.display().to_string(),
            runs: results.len(),
        },
    );
    info!(
        "Aggregated {} experiment runs from {:?}",
        results.len(),
        experiment_dir
    );
    Ok(results)
}

/// Group experiment runs by one dimension and average within each group
pub fn aggregate_by_dimension(
    stats: &ExperimentStats,
    dimension: Dimension,
    policy: &FilterPolicy,
) -> Result<DimensionTable> {
    let mut groups: BTreeMap<String, (f64, f64, usize)> = BTreeMap::new();
    let mut skipped = 0;

    for (name, aggregate) in stats {
        let experiment = ExperimentName::new(name.as_str());
        if !policy.admits(&experiment, dimension)? {
            skipped += 1;
            continue;
        }

        let key = experiment.token(dimension)?.to_string();
        let group = groups.entry(key).or_insert((0.0, 0.0, 0));
        group.0 += aggregate.avg_mfu;
        group.1 += aggregate.avg_request_scheduling_delay;
        group.2 += 1;
    }

    let table: DimensionTable = groups
        .into_iter()
        .map(|(key, (mfu_sum, delay_sum, runs))| {
            let aggregate = DimensionAggregate {
                avg_mfu: mfu_sum / runs as f64,
                avg_request_scheduling_delay: delay_sum / runs as f64,
                runs,
            };
            (key, aggregate)
        })
        .collect();

    let ctx = OperationContext::new("aggregate_by_dimension");
    log_operation(
        &ctx,
        &Operation::DimensionAggregate {
            dimension: dimension.to_string(),
            groups: table.len(),
            skipped,
        },
    );
    Ok(table)
}

/// Grouped averages for every dimension, in replica, batch, qps order
pub fn aggregate_all_dimensions(
    stats: &ExperimentStats,
    policy: &FilterPolicy,
) -> Result<BTreeMap<Dimension, DimensionTable>> {
    let mut tables = BTreeMap::new();
    for dimension in Dimension::ALL {
        tables.insert(dimension, aggregate_by_dimension(stats, dimension, policy)?);
    }
    Ok(tables)
}

/// Child directories sorted by path; plain files are ignored
fn sorted_subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| StatsError::io(dir, e))?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StatsError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        } else {
            debug!("Skipping {:?}: not a trial directory", path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DimensionDefaults;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn config(avg_mfu: f64, avg_delay: f64) -> ConfigAggregate {
        ConfigAggregate {
            avg_mfu,
            avg_request_scheduling_delay: avg_delay,
            ..Default::default()
        }
    }

    fn write_trial(trial: &Path, delays: &[f64], mfus: &[f64]) {
        fs::create_dir_all(trial.join("plots")).unwrap();
        let mut csv = String::from("request_id,request_scheduling_delay\n");
        for (i, delay) in delays.iter().enumerate() {
            csv.push_str(&format!("{i},{delay}\n"));
        }
        fs::write(trial.join("request_metrics.csv"), csv).unwrap();
        for (i, mfu) in mfus.iter().enumerate() {
            fs::write(
                trial.join(format!("plots/replica_{i}_mfu.json")),
                format!(r#"{{"replica_{i}_mfu_weighted_mean": {mfu}}}"#),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_run_without_trials_averages_zero() {
        let dir = TempDir::new().unwrap();
        let run = dir.path().join("replicas_1_batch_1_qps_0.5");
        fs::create_dir(&run).unwrap();

        let aggregate = aggregate_config(&run, &TrialLayout::default()).unwrap();
        assert_eq!(aggregate.trials, 0);
        assert_eq!(aggregate.avg_request_scheduling_delay, 0.0);
        assert_eq!(aggregate.avg_mfu, 0.0);
    }

    #[test]
    fn test_trials_are_summed_before_averaging() {
        let dir = TempDir::new().unwrap();
        let run = dir.path().join("replicas_2_batch_1_qps_0.5");
        write_trial(&run.join("0"), &[1.0, 3.0], &[0.2, 0.4]);
        write_trial(&run.join("1"), &[8.0], &[0.6, 0.8]);
        fs::write(run.join("notes.txt"), "stray file").unwrap();

        let aggregate = aggregate_config(&run, &TrialLayout::default()).unwrap();
        assert_eq!(aggregate.trials, 2);
        assert_eq!(aggregate.requests, 3);
        assert_eq!(aggregate.replicas, 4);
        assert_eq!(aggregate.avg_request_scheduling_delay, 4.0);
        assert!((aggregate.avg_mfu - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_walker_only_reads_experiment_folders() {
        let dir = TempDir::new().unwrap();
        write_trial(
            &dir.path().join("replicas_1_batch_1_qps_0.5/0"),
            &[2.0],
            &[0.5],
        );
        fs::create_dir_all(dir.path().join("logs/0")).unwrap();

        let stats = collect_experiment_stats(dir.path(), &TrialLayout::default()).unwrap();
        assert_eq!(
            stats.keys().collect::<Vec<_>>(),
            vec!["replicas_1_batch_1_qps_0.5"]
        );
    }

    #[test]
    fn test_missing_experiment_dir_is_error() {
        let dir = TempDir::new().unwrap();
        let err = collect_experiment_stats(&dir.path().join("absent"), &TrialLayout::default())
            .unwrap_err();
        assert!(matches!(err, StatsError::Io { .. }));
    }

    #[test]
    fn test_group_by_replica_with_defaults() {
        let mut stats = ExperimentStats::new();
        stats.insert("replicas_1_batch_1_qps_0.5".to_string(), config(0.4, 1.0));
        stats.insert("replicas_2_batch_1_qps_0.5".to_string(), config(0.6, 2.0));
        stats.insert("replicas_1_batch_2_qps_0.5".to_string(), config(0.9, 9.0));

        let table =
            aggregate_by_dimension(&stats, Dimension::Replica, &FilterPolicy::default()).unwrap();

        let mut expected = DimensionTable::new();
        expected.insert(
            "1".to_string(),
            DimensionAggregate {
                avg_mfu: 0.4,
                avg_request_scheduling_delay: 1.0,
                runs: 1,
            },
        );
        expected.insert(
            "2".to_string(),
            DimensionAggregate {
                avg_mfu: 0.6,
                avg_request_scheduling_delay: 2.0,
                runs: 1,
            },
        );
        assert_eq!(table, expected);
    }

    #[test]
    fn test_unfiltered_groups_every_run() {
        let mut stats = ExperimentStats::new();
        stats.insert("replicas_1_batch_1_qps_0.5".to_string(), config(0.4, 1.0));
        stats.insert("replicas_1_batch_2_qps_0.5".to_string(), config(0.8, 3.0));

        let table =
            aggregate_by_dimension(&stats, Dimension::Replica, &FilterPolicy::Unfiltered).unwrap();
        let group = &table["1"];
        assert_eq!(group.runs, 2);
        assert!((group.avg_mfu - 0.6).abs() < 1e-12);
        assert_eq!(group.avg_request_scheduling_delay, 2.0);
    }

    #[test]
    fn test_unfiltered_only_needs_chosen_token() {
        let mut stats = ExperimentStats::new();
        stats.insert("replicas_4".to_string(), config(0.1, 1.0));

        let table =
            aggregate_by_dimension(&stats, Dimension::Replica, &FilterPolicy::Unfiltered).unwrap();
        assert_eq!(table["4"].runs, 1);

        assert!(aggregate_by_dimension(&stats, Dimension::Replica, &FilterPolicy::default())
            .is_err());
    }

    #[test]
    fn test_custom_defaults_select_other_runs() {
        let mut stats = ExperimentStats::new();
        stats.insert("replicas_1_batch_4_qps_2".to_string(), config(0.3, 5.0));
        stats.insert("replicas_2_batch_4_qps_2".to_string(), config(0.5, 7.0));
        stats.insert("replicas_2_batch_1_qps_0.5".to_string(), config(0.9, 1.0));

        let policy = FilterPolicy::Defaults(DimensionDefaults {
            replica: 2.0,
            batch: 4.0,
            qps: 2.0,
        });
        let by_qps = aggregate_by_dimension(&stats, Dimension::Qps, &policy).unwrap();
        assert_eq!(by_qps.keys().collect::<Vec<_>>(), vec!["2"]);
        assert_eq!(by_qps["2"].avg_mfu, 0.5);
    }

    #[test]
    fn test_all_dimensions_in_order() {
        let mut stats = ExperimentStats::new();
        stats.insert("replicas_1_batch_1_qps_0.5".to_string(), config(0.4, 1.0));

        let all = aggregate_all_dimensions(&stats, &FilterPolicy::default()).unwrap();
        assert_eq!(all.keys().copied().collect::<Vec<_>>(), Dimension::ALL.to_vec());
        assert_eq!(all[&Dimension::Qps]["0.5"].runs, 1);
    }
}
