// simstats CLI - scheduling delay and MFU statistics for simulator output trees
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

// Macro for conditional printing based on quiet flag
macro_rules! qprintln {
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            println!($($arg)*);
        }
    };
}

use simstats::report::{format_correlation, format_dimension, format_experiments};
use simstats::{
    aggregate_all_dimensions, aggregate_by_dimension, build_table, collect_experiment_stats,
    correlation_matrix, get_metrics, init_logging_with_level, with_trace_id, AnalysisConfig,
    Dimension, DimensionTable, OutputFormat, Report,
};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "simstats - scheduling delay and MFU statistics for simulator output",
    long_about = None,
    after_help = "EXAMPLES:
  # Per-experiment averages from ./simulator_output
  simstats experiments

  # Grouped averages for every dimension, other dimensions held at replica=1, batch=1, qps=0.5
  simstats dimensions

  # Group every run by batch size without the default filter
  simstats --no-filter dimensions --dimension batch

  # Write line plots and the correlation heat-map under ./experiment_results
  simstats plot"
)]
struct Cli {
    /// Enable verbose logging (DEBUG level). Default is WARN level.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors and suppress progress messages
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding replicas_* experiment folders (overrides config)
    #[arg(short, long, global = true)]
    experiment_dir: Option<PathBuf>,

    /// Group every run instead of holding the other dimensions at their defaults
    #[arg(long, global = true)]
    no_filter: bool,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        value_parser = ["text", "json"]
    )]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show average scheduling delay and MFU for every experiment run
    Experiments,

    /// Show averages grouped by replica count, batch size or QPS
    Dimensions {
        /// Only this dimension (default: all three)
        #[arg(short, long, value_parser = ["replica", "batch", "qps"])]
        dimension: Option<String>,
    },

    /// Show the correlation matrix of replica, batch, qps, mfu and delay
    Correlation,

    /// Write per-dimension line plots and the correlation heat-map
    #[cfg(feature = "plots")]
    Plot {
        /// Output directory for images (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ignore error if already initialized
    let _ = init_logging_with_level(cli.verbose, cli.quiet);

    with_trace_id("simstats-cli", || run(cli))
}

fn run(cli: Cli) -> Result<()> {
    let quiet = cli.quiet;
    let format: OutputFormat = cli.format.parse()?;

    let mut config = AnalysisConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.experiment_dir {
        config.experiment_dir = dir;
    }
    if cli.no_filter {
        config.filter.enabled = false;
    }
    debug!("Effective configuration: {:?}", config);

    let policy = config.filter_policy();
    let stats = collect_experiment_stats(&config.experiment_dir, &config.layout)
        .with_context(|| format!("Failed to aggregate {:?}", config.experiment_dir))?;
    let mut report = Report::new(&config.experiment_dir, &policy);

    match cli.command {
        Commands::Experiments => {
            if format == OutputFormat::Text {
                if stats.is_empty() {
                    qprintln!(
                        quiet,
                        "No experiment folders found in {:?}",
                        config.experiment_dir
                    );
                }
                print!("{}", format_experiments(&stats));
            }
            report.experiments = Some(stats);
        }

        Commands::Dimensions { dimension } => {
            let tables: BTreeMap<Dimension, DimensionTable> = match dimension {
                Some(name) => {
                    let dimension: Dimension = name.parse()?;
                    let table = aggregate_by_dimension(&stats, dimension, &policy)?;
                    [(dimension, table)].into_iter().collect()
                }
                None => aggregate_all_dimensions(&stats, &policy)?,
            };
            if format == OutputFormat::Text {
                for (dimension, table) in &tables {
                    print!("{}", format_dimension(*dimension, table));
                }
            }
            report.dimensions = Some(tables);
        }

        Commands::Correlation => {
            let matrix = correlation_matrix(&build_table(&stats)?);
            if format == OutputFormat::Text {
                print!("{}", format_correlation(&matrix));
            }
            report.correlation = Some(matrix);
        }

        #[cfg(feature = "plots")]
        Commands::Plot { output_dir } => {
            let output_dir = output_dir.unwrap_or_else(|| config.output_dir.clone());
            let tables = aggregate_all_dimensions(&stats, &policy)?;
            let matrix = correlation_matrix(&build_table(&stats)?);

            let mut written = Vec::new();
            for (dimension, table) in &tables {
                written.extend(simstats::render_dimension(*dimension, table, &output_dir)?);
            }
            written.push(simstats::render_correlation(&matrix, &output_dir)?);

            if format == OutputFormat::Text {
                for path in &written {
                    qprintln!(quiet, "Wrote {}", path.display());
                }
            }
            report.plots = written.iter().map(|p| p.display().to_string()).collect();
            report.dimensions = Some(tables);
            report.correlation = Some(matrix);
        }
    }

    if format == OutputFormat::Json {
        println!("{}", report.to_json()?);
    }

    debug!("Metrics: {}", get_metrics());
    Ok(())
}
