//! CSV writers for series, summary, extremes, lag and fire tables.
//!
//! Missing values are written as empty cells.

use anyhow::Context;
use csv::Writer;
use gda_core::{GlacierRegistry, Variable};
use gda_data::series::RollingWindow;
use gda_data::{CorrelationResult, ExtremeStats, FireProximity, ProcessedSeries, RegressionResult, SummaryRecord};
use gda_utils::dates::{format_date, format_datetime};
use log::{info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "glacier_deposition_summary.csv";
pub const EXTREMES_FILE: &str = "deposition_extremes.csv";
pub const FIRE_PROXIMITY_FILE: &str = "fire_proximity.csv";

fn cell(value: Option<f64>) -> String {
    value.map_or(String::new(), |v| v.to_string())
}

/// File name component safe for any glacier identifier.
fn file_stem(glacier_id: &str) -> String {
    glacier_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

/// Per-glacier file stems, unique within one registry.
///
/// Identifiers whose safe stem is already taken, in registry order, get
/// their registry position appended.
#[derive(Debug, Clone, Default)]
pub struct FileStems(HashMap<String, String>);

impl FileStems {
    pub fn new(registry: &GlacierRegistry) -> Self {
        let mut taken = HashSet::new();
        let mut stems = HashMap::with_capacity(registry.len());
        for (position, glacier) in registry.iter().enumerate() {
            let mut stem = file_stem(&glacier.id);
            while taken.contains(&stem) {
                stem = format!("{stem}_{position}");
            }
            if stem != file_stem(&glacier.id) {
                warn!("File name for {} collides with another glacier, using {}", glacier.id, stem);
            }
            taken.insert(stem.clone());
            stems.insert(glacier.id.clone(), stem);
        }
        FileStems(stems)
    }

    pub fn stem(&self, glacier_id: &str) -> String {
        self.0.get(glacier_id).cloned().unwrap_or_else(|| file_stem(glacier_id))
    }
}

/// Write `<dir>/<stem>_deposition.csv`.
pub fn write_deposition_csv(
    dir: &Path,
    stem: &str,
    processed: &ProcessedSeries,
    variables: &[Variable],
    windows: &[RollingWindow],
) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("{stem}_deposition.csv"));
    let mut wtr = Writer::from_path(&path).with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec!["timestamp".to_string()];
    for variable in variables {
        let p = variable.column_prefix();
        header.push(format!("{p}_mean"));
        header.push(format!("{p}_sum"));
        for window in windows {
            header.push(format!("{p}_rolling_{}_sum", window.label));
            header.push(format!("{p}_rolling_{}_mean", window.label));
        }
        header.push(format!("{p}_cumulative"));
    }
    wtr.write_record(&header)?;

    let series = &processed.series;
    let derived = &processed.derived;
    let columns: Vec<_> = variables
        .iter()
        .map(|&v| {
            let sums = series.sums(v);
            let means = series.means(v);
            let rolling: Vec<_> = windows
                .iter()
                .map(|w| (derived.rolling_sum(v, w), derived.rolling_mean(v, w)))
                .collect();
            (means, sums, rolling, derived.cumulative(v))
        })
        .collect();

    for (i, row) in series.rows().iter().enumerate() {
        let mut record = vec![format_datetime(&row.timestamp)];
        for (means, sums, rolling, cumulative) in &columns {
            record.push(cell(means[i]));
            record.push(cell(sums[i]));
            for (sum, mean) in rolling {
                record.push(cell(sum.map(|s| s[i])));
                record.push(cell(mean.and_then(|m| m[i])));
            }
            record.push(cell(cumulative.map(|c| c[i])));
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(path)
}

/// Write the ranked summary table to `<dir>/glacier_deposition_summary.csv`.
pub fn write_summary_csv(
    dir: &Path,
    ranked: &[&SummaryRecord],
    variables: &[Variable],
    windows: &[RollingWindow],
) -> anyhow::Result<PathBuf> {
    let path = dir.join(SUMMARY_FILE);
    let mut wtr = Writer::from_path(&path).with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header: Vec<String> =
        ["rank", "glacier_id", "name", "area_km2", "zmed", "zmin", "n_hours_data", "missing_pct"]
            .iter()
            .map(|s| s.to_string())
            .collect();
    for variable in variables {
        let p = variable.column_prefix();
        header.push(format!("{p}_total"));
        header.push(format!("{p}_max_hourly"));
        for window in windows {
            header.push(format!("{p}_max_{}", window.label));
        }
        header.push(format!("{p}_hours"));
    }
    wtr.write_record(&header)?;

    for (rank, record) in ranked.iter().enumerate() {
        let mut row = vec![
            (rank + 1).to_string(),
            record.glacier_id.clone(),
            record.name.clone(),
            record.area_km2.to_string(),
            record.zmed.to_string(),
            record.zmin.to_string(),
            record.n_hours_data.to_string(),
            cell(record.missing_pct),
        ];
        for &variable in variables {
            let summary = record.variable(variable);
            row.push(summary.total.to_string());
            row.push(cell(summary.max_hourly));
            for window in windows {
                row.push(cell(summary.window_peak(window)));
            }
            row.push(summary.hours_with_data.to_string());
        }
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    info!("Summary of {} glaciers written to {}", ranked.len(), path.display());
    Ok(path)
}

/// Write a lag sweep to `path`.
pub fn write_lag_sweep_csv(path: &Path, sweep: &[CorrelationResult]) -> anyhow::Result<()> {
    let mut wtr = Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    wtr.write_record(["lag", "coefficient", "p_value", "n", "ci_low", "ci_high"])?;
    for result in sweep {
        let (lo, hi) = result.confidence_interval.unzip();
        wtr.write_record([
            result.lag.to_string(),
            cell(result.coefficient),
            cell(result.p_value),
            result.n.to_string(),
            cell(lo),
            cell(hi),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn lag_sweep_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}_lag_sweep.csv"))
}

/// Write a per-lag regression table to `path`.
pub fn write_lag_regression_csv(path: &Path, fits: &[RegressionResult]) -> anyhow::Result<()> {
    let mut wtr = Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    wtr.write_record(["lag", "slope", "intercept", "r_squared", "p_value", "n"])?;
    for fit in fits {
        wtr.write_record([
            fit.lag.to_string(),
            cell(fit.slope),
            cell(fit.intercept),
            cell(fit.r_squared),
            cell(fit.p_value),
            fit.n.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write per-glacier extreme statistics to `<dir>/deposition_extremes.csv`.
pub fn write_extremes_csv(
    dir: &Path,
    extremes: &BTreeMap<String, ExtremeStats>,
    percentiles: &[f64],
) -> anyhow::Result<PathBuf> {
    let path = dir.join(EXTREMES_FILE);
    let mut wtr = Writer::from_path(&path).with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header: Vec<String> = ["glacier_id", "n", "mean", "std", "min", "max"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for p in percentiles {
        for field in ["threshold", "count", "frequency", "mean_duration", "max_duration"] {
            header.push(format!("p{p}_{field}"));
        }
    }
    wtr.write_record(&header)?;

    for (glacier_id, stats) in extremes {
        let mut row = vec![
            glacier_id.clone(),
            stats.n.to_string(),
            stats.mean.to_string(),
            stats.std.to_string(),
            stats.min.to_string(),
            stats.max.to_string(),
        ];
        for &p in percentiles {
            match stats.exceedance(p) {
                Some(e) => row.extend([
                    e.threshold.to_string(),
                    e.count.to_string(),
                    e.frequency.to_string(),
                    e.mean_duration.to_string(),
                    e.max_duration.to_string(),
                ]),
                None => row.extend(std::iter::repeat(String::new()).take(5)),
            }
        }
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    info!("Extreme statistics for {} glaciers written to {}", extremes.len(), path.display());
    Ok(path)
}

/// Write fire proximity rows to `path`; dates are `;`-separated.
pub fn write_fire_proximity_csv(path: &Path, rows: &[FireProximity]) -> anyhow::Result<()> {
    let mut wtr = Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    wtr.write_record([
        "glacier_id",
        "name",
        "n_fires",
        "min_distance_km",
        "mean_distance_km",
        "total_frp",
        "fire_dates",
    ])?;
    for row in rows {
        let dates: Vec<String> = row.fire_dates.iter().map(format_date).collect();
        wtr.write_record([
            row.glacier_id.clone(),
            row.glacier_name.clone(),
            row.n_fires.to_string(),
            row.min_distance_km.to_string(),
            row.mean_distance_km.to_string(),
            cell(row.total_frp),
            dates.join(";"),
        ])?;
    }
    wtr.flush()?;
    info!("Fire proximity for {} glaciers written to {}", rows.len(), path.display());
    Ok(())
}
