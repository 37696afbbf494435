//! CLI entry point for the MAP-21 performance metrics tool.
//!
//! Provides one subcommand per measure: PHED, LOTTR, TTTR, plus an hourly
//! travel-time profile. Each writes a per-segment CSV table and reports the
//! network-level result as a JSON summary.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use map21_metrics::config::RunConfig;
use map21_metrics::output::{print_json, print_pretty, write_json, write_records, write_reliability};
use map21_metrics::pipeline::{
    HourlyInputs, LottrInputs, PhedInputs, ReliabilityRun, SegmentSources, TttrInputs, run_hourly,
    run_lottr, run_phed, run_tttr,
};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "map21_metrics")]
#[command(about = "Compute MAP-21 system performance measures from NPMRDS extracts", long_about = None)]
struct Cli {
    /// JSON file with formula constants, time windows and data policies
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Output locations shared by every subcommand.
#[derive(Args)]
struct OutputArgs {
    /// CSV file for the per-segment table
    #[arg(short, long)]
    output: PathBuf,

    /// Optional JSON file for the run summary
    #[arg(short, long)]
    summary: Option<PathBuf>,
}

/// Segment attribute tables.
#[derive(Args)]
struct SegmentArgs {
    /// Segment metadata CSV (TMC identification)
    #[arg(short, long)]
    metadata: PathBuf,

    /// Analysis network CSV (`Tmc`, `interstate`)
    #[arg(short, long)]
    network: Option<PathBuf>,
}

impl SegmentArgs {
    fn sources(self, speed_limits: Option<PathBuf>) -> SegmentSources {
        SegmentSources {
            metadata: self.metadata,
            network: self.network,
            speed_limits,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Peak Hour Excessive Delay per capita
    Phed {
        /// Travel-time extracts (CSV or CSV.gz), read in order
        #[arg(required = true, value_name = "TRAVEL_TIMES")]
        travel_times: Vec<PathBuf>,

        #[command(flatten)]
        segments: SegmentArgs,

        /// Posted speed limit CSV (`TMC_HERE`, `SPEED_LIMIT`)
        #[arg(long)]
        speed_limits: Option<PathBuf>,

        /// Peaking factor CSV (`startTime` plus factor column)
        #[arg(short, long)]
        peaking_factors: Option<PathBuf>,

        /// Urbanized area population, overrides the config
        #[arg(long)]
        population: Option<f64>,

        #[command(flatten)]
        out: OutputArgs,
    },
    /// Level of Travel Time Reliability
    Lottr {
        #[arg(required = true, value_name = "TRAVEL_TIMES")]
        travel_times: Vec<PathBuf>,

        #[command(flatten)]
        segments: SegmentArgs,

        /// Weight by NHS miles, overrides the config
        #[arg(long)]
        nhs_weighting: Option<bool>,

        #[command(flatten)]
        out: OutputArgs,
    },
    /// Truck Travel Time Reliability
    Tttr {
        /// Truck travel-time extracts
        #[arg(required = true, value_name = "TRUCK_TRAVEL_TIMES")]
        truck_travel_times: Vec<PathBuf>,

        /// All-vehicle extracts used where truck data is missing
        #[arg(short, long)]
        all_vehicle: Vec<PathBuf>,

        #[command(flatten)]
        segments: SegmentArgs,

        #[arg(long)]
        nhs_weighting: Option<bool>,

        #[command(flatten)]
        out: OutputArgs,
    },
    /// Hour-of-day travel-time profile per segment
    Hourly {
        #[arg(required = true, value_name = "TRAVEL_TIMES")]
        travel_times: Vec<PathBuf>,

        /// Segment metadata CSV supplying lengths
        #[arg(short, long)]
        metadata: Option<PathBuf>,

        #[command(flatten)]
        out: OutputArgs,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/map21_metrics.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("map21_metrics.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!(error = format!("{e:#}"), "Run failed");
        return Err(e);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let mut config = RunConfig::load_or_default(cli.config.as_deref())
        .with_context(|| "loading run configuration")?;

    match cli.command {
        Commands::Phed {
            travel_times,
            segments,
            speed_limits,
            peaking_factors,
            population,
            out,
        } => {
            if population.is_some() {
                config.phed.population = population;
            }
            print_pretty(&config.phed);
            let inputs = PhedInputs {
                travel_times,
                segments: segments.sources(speed_limits),
                peaking_factors,
            };
            let run = run_phed(&inputs, &config).context("computing PHED")?;
            write_records(&out.output, &run.segments)?;
            report(&run.summary, &out)?;
        }
        Commands::Lottr {
            travel_times,
            segments,
            nhs_weighting,
            out,
        } => {
            if nhs_weighting.is_some() {
                config.lottr.nhs_weighting = nhs_weighting;
            }
            let inputs = LottrInputs {
                travel_times,
                segments: segments.sources(None),
            };
            let run = run_lottr(&inputs, &config).context("computing LOTTR")?;
            write_reliability_run(&run, &out)?;
        }
        Commands::Tttr {
            truck_travel_times,
            all_vehicle,
            segments,
            nhs_weighting,
            out,
        } => {
            if nhs_weighting.is_some() {
                config.tttr.nhs_weighting = nhs_weighting;
            }
            let inputs = TttrInputs {
                truck_travel_times,
                all_vehicle_travel_times: all_vehicle,
                segments: segments.sources(None),
            };
            let run = run_tttr(&inputs, &config).context("computing TTTR")?;
            write_reliability_run(&run, &out)?;
        }
        Commands::Hourly {
            travel_times,
            metadata,
            out,
        } => {
            let inputs = HourlyInputs {
                travel_times,
                metadata,
            };
            let run = run_hourly(&inputs, &config).context("computing hourly profile")?;
            write_records(&out.output, &run.rows)?;
            report(&run.summary, &out)?;
        }
    }
    Ok(())
}

fn write_reliability_run(run: &ReliabilityRun, out: &OutputArgs) -> Result<()> {
    write_reliability(&out.output, &run.windows, &run.segments)?;
    report(&run.summary, out)
}

fn report(summary: &impl Serialize, out: &OutputArgs) -> Result<()> {
    info!(path = %out.output.display(), "Segment table written");
    print_json(summary)?;
    if let Some(path) = &out.summary {
        write_json(path, summary)?;
    }
    Ok(())
}
