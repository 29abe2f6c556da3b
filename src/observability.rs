// Observability for the statistics pipeline
// Structured logging, operation contexts and counters for the directory walk.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

pub const DEFAULT_FILTER: &str = "simstats=warn,error";
pub const VERBOSE_FILTER: &str = "simstats=debug,info";
pub const QUIET_FILTER: &str = "error";

// Global atomic counters for metrics
static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);
static TRIAL_COUNTER: AtomicU64 = AtomicU64::new(0);
static MISSING_TRIAL_COUNTER: AtomicU64 = AtomicU64::new(0);
static MFU_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize logging with configurable verbosity
///
/// Quiet always wins over `RUST_LOG`; otherwise `RUST_LOG` overrides the
/// flag-derived filter. Log output goes to stderr so stdout stays parseable.
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::new(DEFAULT_FILTER)
    };

    let env_filter = if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(!quiet)
        .with_line_number(!quiet)
        .with_file(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("simstats observability initialized");
            }
            Ok(())
        }
        // Already initialized, which is fine in test environments
        Err(_) => Ok(()),
    }
}

/// Pipeline operations recorded through `log_operation`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    ExperimentScan {
        experiment_dir: String,
        runs: usize,
    },
    TrialRead {
        trial: String,
        requests: u64,
        replicas: u64,
    },
    TrialMissing {
        trial: String,
        missing: String,
    },
    ConfigAggregate {
        experiment: String,
        trials: usize,
    },
    DimensionAggregate {
        dimension: String,
        groups: usize,
        skipped: usize,
    },
    PlotRender {
        path: String,
    },
}

/// Metric types for pipeline counters
#[derive(Debug, Clone)]
pub enum MetricType {
    Counter { name: &'static str, value: u64 },
    Timer { name: &'static str, duration: Duration },
}

/// Operation context for tracing through the pipeline
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub parent_span_id: Option<Uuid>,
    pub operation: String,
    pub start_time: Instant,
    pub attributes: Vec<(String, String)>,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            parent_span_id: None,
            operation: operation.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn child(&self, operation: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: Uuid::new_v4(),
            parent_span_id: Some(self.span_id),
            operation: operation.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Log an operation with full context
pub fn log_operation(ctx: &OperationContext, op: &Operation) {
    let elapsed = ctx.elapsed();
    let attrs = ctx
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");

    match op {
        Operation::TrialMissing { trial, missing } => {
            warn!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                operation = %ctx.operation,
                attributes = %attrs,
                "Trial {} has no {}, counting it as zero", trial, missing
            );
            MISSING_TRIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        _ => {
            debug!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                parent_span_id = ?ctx.parent_span_id,
                operation = %ctx.operation,
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                "Operation completed: {:?}", op
            );
        }
    }
    OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);

    if let Operation::TrialRead { .. } = op {
        TRIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
    }
}

/// Record a metric
pub fn record_metric(metric: MetricType) {
    match metric {
        MetricType::Counter { name, value } => {
            if name == "mfu.files_read" {
                MFU_FILE_COUNTER.fetch_add(value, Ordering::Relaxed);
            }
            debug!("metric.counter {} = {}", name, value);
        }
        MetricType::Timer { name, duration } => {
            debug!("metric.timer {} = {:?}", name, duration);
        }
    }
}

/// Run a closure inside a trace context, logging its outcome and duration
pub fn with_trace_id<F, T>(operation: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let ctx = OperationContext::new(operation);
    info!(
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        "Starting operation: {}", operation
    );

    let result = f();
    let elapsed = ctx.elapsed();

    match &result {
        Ok(_) => {
            info!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                elapsed_ms = elapsed.as_millis(),
                "Operation completed successfully: {}", operation
            );
            record_metric(MetricType::Timer {
                name: "operation.duration",
                duration: elapsed,
            });
        }
        Err(e) => {
            error!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                elapsed_ms = elapsed.as_millis(),
                error = %e,
                "Operation failed: {}", operation
            );
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    result
}

/// Get current metrics snapshot
pub fn get_metrics() -> serde_json::Value {
    serde_json::json!({
        "operations": {
            "total": OPERATION_COUNTER.load(Ordering::Relaxed),
            "errors": ERROR_COUNTER.load(Ordering::Relaxed),
        },
        "trials": {
            "read": TRIAL_COUNTER.load(Ordering::Relaxed),
            "missing": MISSING_TRIAL_COUNTER.load(Ordering::Relaxed),
            "mfu_files": MFU_FILE_COUNTER.load(Ordering::Relaxed),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}
