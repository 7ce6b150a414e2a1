//! The `run` subcommand: batch extraction over an analysis window.

use crate::output::{
    lag_sweep_path, write_deposition_csv, write_extremes_csv, write_lag_sweep_csv, write_summary_csv, FileStems,
};
use crate::sources::{load_albedo, load_inventory, CsvSliceSource};
use anyhow::Context;
use clap::Args;
use gda_core::GlacierFilter;
use gda_data::{AlbedoSource, BatchConfig, BatchOrchestrator, BatchOutcome};
use gda_utils::dates::parse_datetime;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Directory of hourly slices named YYYYMMDDHH_000.csv[.gz]
    #[arg(short, long)]
    pub slices: PathBuf,

    /// Glacier inventory CSV (id,name,area_km2,zmed,zmin,cen_lon,cen_lat,wkt)
    #[arg(short, long)]
    pub inventory: PathBuf,

    /// Output directory for series, summary and lag-sweep tables
    #[arg(short, long)]
    pub output: PathBuf,

    /// First slice, "YYYY-MM-DD HH:MM" or "YYYY-MM-DD"
    #[arg(long)]
    pub start: Option<String>,

    /// Last slice (inclusive)
    #[arg(long)]
    pub end: Option<String>,

    /// Daily albedo CSV (glacier_id,date,albedo); enables lag correlation
    #[arg(short, long)]
    pub albedo: Option<PathBuf>,

    /// JSON batch configuration; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Minimum glacier area in km²
    #[arg(long, default_value_t = 1.0)]
    pub min_area: f64,

    /// Maximum median glacier elevation in metres
    #[arg(long)]
    pub max_elevation: Option<f64>,

    /// Keep glaciers centred west of this longitude
    #[arg(long)]
    pub max_center_lon: Option<f64>,

    /// Correlation method: pearson, spearman or kendall
    #[arg(long)]
    pub method: Option<String>,

    /// Largest lag in days
    #[arg(long)]
    pub max_lag: Option<usize>,

    /// Number of top-ranked glaciers to log
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

/// Merge the optional JSON file with command-line overrides.
pub fn resolve_config(args: &RunArgs) -> anyhow::Result<BatchConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            BatchConfig::from_json(&json)?
        }
        None => BatchConfig::default(),
    };
    if let Some(start) = &args.start {
        config.start = parse_datetime(start).with_context(|| format!("Invalid --start {start:?}"))?;
    }
    if let Some(end) = &args.end {
        config.end = parse_datetime(end).with_context(|| format!("Invalid --end {end:?}"))?;
    }
    if let Some(method) = &args.method {
        config.method = method.parse()?;
    }
    if let Some(max_lag) = args.max_lag {
        config.max_lag = max_lag;
    }
    config.validate()?;
    Ok(config)
}

pub async fn run_pipeline(args: &RunArgs) -> anyhow::Result<()> {
    let config = resolve_config(args)?;

    let filter = GlacierFilter {
        min_area_km2: args.min_area,
        max_elevation: args.max_elevation,
        max_center_lon: args.max_center_lon,
    };
    let registry = load_inventory(&args.inventory)?.filter(&filter);
    if registry.is_empty() {
        anyhow::bail!("No glaciers left after filtering {}", args.inventory.display());
    }
    let albedo = args.albedo.as_deref().map(load_albedo).transpose()?;
    if let Some(table) = &albedo {
        let known = table.glacier_ids().filter(|id| registry.get(id).is_some()).count();
        info!("Albedo records cover {} of {} glaciers", known, registry.len());
        if known == 0 {
            warn!("No albedo glacier matches the inventory, lag correlation will be empty");
        }
    }

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {}", args.output.display()))?;

    let mut orchestrator = BatchOrchestrator::new(config, registry)?;
    let token = orchestrator.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight slices");
            token.cancel();
        }
    });

    let source = Arc::new(CsvSliceSource::new(&args.slices));
    let outcome = orchestrator
        .run(source, albedo.as_ref().map(|a| a as &dyn AlbedoSource))
        .await;
    interrupt.abort();
    let outcome = outcome?;

    if !outcome.missing.is_empty() {
        warn!("{} slices missing or unreadable", outcome.missing.len());
    }
    if outcome.conflicts > 0 {
        warn!("{} grid cells claimed by overlapping glaciers", outcome.conflicts);
    }

    write_outputs(&args.output, &orchestrator, &outcome)?;

    let config = orchestrator.config();
    let ranked = outcome.ranked(config.ranking_variable);
    info!("Top {} glaciers by total {}:", args.top.min(ranked.len()), config.ranking_variable);
    for (rank, record) in ranked.iter().take(args.top).enumerate() {
        info!(
            "  {}. {} ({}) total={:.4e} area={:.1} km²",
            rank + 1,
            record.name,
            record.glacier_id,
            record.variable(config.ranking_variable).total,
            record.area_km2
        );
    }
    Ok(())
}

fn write_outputs(dir: &Path, orchestrator: &BatchOrchestrator, outcome: &BatchOutcome) -> anyhow::Result<()> {
    let config = orchestrator.config();
    let stems = FileStems::new(orchestrator.registry());
    for (glacier_id, processed) in &outcome.series {
        write_deposition_csv(dir, &stems.stem(glacier_id), processed, &config.variables, &config.windows)?;
    }
    info!("Wrote {} glacier series to {}", outcome.series.len(), dir.display());

    let ranked = outcome.ranked(config.ranking_variable);
    write_summary_csv(dir, &ranked, &config.variables, &config.windows)?;
    write_extremes_csv(dir, &outcome.extremes, &config.extreme_percentiles)?;

    for (glacier_id, sweep) in &outcome.correlations {
        write_lag_sweep_csv(&lag_sweep_path(dir, &stems.stem(glacier_id)), sweep)?;
        if let Some(best) = sweep
            .iter()
            .filter_map(|r| r.coefficient.map(|c| (r.lag, c, r.p_value)))
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        {
            info!(
                "{}: strongest {} correlation r={:.3} at lag {} d (p={:.4})",
                glacier_id,
                config.method,
                best.1,
                best.0,
                best.2.unwrap_or(f64::NAN)
            );
        }
    }
    Ok(())
}
