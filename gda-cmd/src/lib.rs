//! Command implementations for the GDA CLI.
//!
//! Provides subcommands for batch deposition extraction over glacier
//! outlines, lag correlation of ad-hoc series, and fire proximity.

use clap::Subcommand;
use std::path::PathBuf;

pub mod correlate;
pub mod fires;
pub mod output;
pub mod pipeline;
pub mod sources;

pub use pipeline::RunArgs;

#[derive(Subcommand)]
pub enum Command {
    /// Extract per-glacier deposition series over an analysis window
    Run(RunArgs),

    /// Lag sweep between a driver column and a response column of a CSV
    Correlate {
        /// Input CSV with headers
        #[arg(short, long)]
        input: PathBuf,

        /// Driver column (shifted earlier)
        #[arg(short = 'x', long)]
        x_column: String,

        /// Response column
        #[arg(short = 'y', long)]
        y_column: String,

        /// pearson, spearman or kendall
        #[arg(short, long, default_value = "pearson")]
        method: String,

        /// Largest lag in rows
        #[arg(long, default_value_t = 10)]
        max_lag: usize,

        /// Optional output path for the sweep table
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fit a least-squares line at each lag instead of correlating
        #[arg(long)]
        regression: bool,
    },

    /// Summarise fire detections within a buffer of each glacier
    Fires {
        /// Glacier inventory CSV
        #[arg(short, long)]
        inventory: PathBuf,

        /// Fire detections CSV (lat,lon,date,frp)
        #[arg(short, long)]
        fires: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Search radius around each outline in km
        #[arg(long, default_value_t = gda_data::fire::DEFAULT_BUFFER_KM)]
        buffer_km: f64,

        /// Minimum glacier area in km²
        #[arg(long, default_value_t = 1.0)]
        min_area: f64,
    },
}

pub async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run(args) => pipeline::run_pipeline(&args).await,
        Command::Correlate {
            input,
            x_column,
            y_column,
            method,
            max_lag,
            output,
            regression,
        } => {
            if regression {
                correlate::run_regression(&input, &x_column, &y_column, max_lag, output.as_deref())?;
            } else {
                correlate::run_correlate(&input, &x_column, &y_column, &method, max_lag, output.as_deref())?;
            }
            Ok(())
        }
        Command::Fires {
            inventory,
            fires,
            output,
            buffer_km,
            min_area,
        } => fires::run_fires(&inventory, &fires, &output, buffer_km, min_area),
    }
}
