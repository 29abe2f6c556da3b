// simstats - scheduling delay and MFU statistics for simulator output trees
// Root library module

pub mod aggregate;
pub mod config;
pub mod correlation;
pub mod error;
pub mod observability;
#[cfg(feature = "plots")]
pub mod render;
pub mod report;
pub mod trial;
pub mod types;

// Re-export key types
pub use observability::{
    get_metrics, init_logging_with_level, log_operation, record_metric,
    with_trace_id, MetricType, Operation, OperationContext,
};

pub use error::{Result, StatsError};

pub use types::{
    ConfigAggregate, Dimension, DimensionAggregate, DimensionDefaults, ExperimentName,
    FilterPolicy, TrialStats,
};

pub use config::{AnalysisConfig, FilterConfig, TrialLayout};

// Re-export the pipeline stages
pub use trial::{read_replica_mfu, read_request_totals, read_trial_stats};

pub use aggregate::{
    aggregate_all_dimensions, aggregate_by_dimension, aggregate_config, collect_experiment_stats,
    DimensionTable, ExperimentStats,
};

pub use correlation::{build_table, correlation_matrix, ConfigRow, CorrelationMatrix};

pub use report::{OutputFormat, Report};

#[cfg(feature = "plots")]
pub use render::{render_correlation, render_dimension};
