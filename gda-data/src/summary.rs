//! Cross-glacier summary table.
//!
//! Records are stored unordered by rank; `ranked` and `sorted_by` order
//! them on demand.

use crate::series::{ProcessedSeries, RollingWindow};
use gda_core::{GlacierRegistry, Variable};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Deposition totals of one variable for one glacier.
///
/// Maxima are `None` (or absent from `window_peaks`) without valid sums.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariableSummary {
    /// Sum of all valid hourly sums; 0 when none
    pub total: f64,
    /// Largest valid hourly sum
    pub max_hourly: Option<f64>,
    /// Largest rolling sum per window label
    pub window_peaks: BTreeMap<String, f64>,
    /// Largest value of the configured peak window
    pub peak_rolling: Option<f64>,
    pub hours_with_data: usize,
}

impl VariableSummary {
    pub fn window_peak(&self, window: &RollingWindow) -> Option<f64> {
        self.window_peaks.get(&window.label).copied()
    }
}

/// One summary row per glacier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub glacier_id: String,
    pub name: String,
    pub area_km2: f64,
    pub zmed: f64,
    pub zmin: f64,
    /// Hours with at least one non-missing variable
    pub n_hours_data: usize,
    /// Share of the expected slices without data, in percent
    pub missing_pct: Option<f64>,
    pub variables: BTreeMap<Variable, VariableSummary>,
}

impl SummaryRecord {
    pub fn variable(&self, variable: Variable) -> VariableSummary {
        self.variables.get(&variable).cloned().unwrap_or_default()
    }

    /// Value of `stat`, `None` when undefined for this glacier.
    pub fn stat(&self, stat: SummaryStat, variable: Variable) -> Option<f64> {
        let summary = self.variables.get(&variable);
        match stat {
            SummaryStat::Total => Some(summary.map_or(0.0, |s| s.total)),
            SummaryStat::PeakRolling => summary.and_then(|s| s.peak_rolling),
            SummaryStat::MaxHourly => summary.and_then(|s| s.max_hourly),
            SummaryStat::HoursWithData => Some(summary.map_or(0, |s| s.hours_with_data) as f64),
            SummaryStat::MissingPct => self.missing_pct,
            SummaryStat::AreaKm2 => Some(self.area_km2),
            SummaryStat::MeanElevation => Some(self.zmed),
        }
    }
}

/// Statistic a summary table can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStat {
    Total,
    PeakRolling,
    MaxHourly,
    HoursWithData,
    MissingPct,
    AreaKm2,
    MeanElevation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    records: Vec<SummaryRecord>,
}

impl SummaryTable {
    /// One record per registry glacier, whether or not it has a series.
    ///
    /// `expected_hours` is the number of slices the analysis window asked
    /// for and is the base of the missing-data percentage.
    pub fn build(
        registry: &GlacierRegistry,
        series: &BTreeMap<String, ProcessedSeries>,
        variables: &[Variable],
        windows: &[RollingWindow],
        peak_window: &RollingWindow,
        expected_hours: usize,
    ) -> Self {
        let records = registry
            .iter()
            .map(|glacier| {
                let processed = series.get(&glacier.id);
                let variables = variables
                    .iter()
                    .map(|&variable| {
                        let summary = processed
                            .map(|p| summarize(p, variable, windows, peak_window))
                            .unwrap_or_default();
                        (variable, summary)
                    })
                    .collect();
                let n_hours_data = processed.map_or(0, |p| p.series.rows_with_data());
                let missing_pct = (expected_hours > 0).then(|| {
                    let covered = n_hours_data.min(expected_hours) as f64;
                    100.0 * (1.0 - covered / expected_hours as f64)
                });
                SummaryRecord {
                    glacier_id: glacier.id.clone(),
                    name: glacier.name.clone(),
                    area_km2: glacier.area_km2,
                    zmed: glacier.zmed,
                    zmin: glacier.zmin,
                    n_hours_data,
                    missing_pct,
                    variables,
                }
            })
            .collect();
        SummaryTable { records }
    }

    pub fn records(&self) -> &[SummaryRecord] {
        &self.records
    }

    pub fn get(&self, glacier_id: &str) -> Option<&SummaryRecord> {
        self.records.iter().find(|r| r.glacier_id == glacier_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records by total deposition of `variable`, descending, ties by id.
    pub fn ranked(&self, variable: Variable) -> Vec<&SummaryRecord> {
        self.sorted_by(SummaryStat::Total, variable, true)
    }

    /// Records sorted by `stat`; undefined values always sort last, ties by id.
    pub fn sorted_by(&self, stat: SummaryStat, variable: Variable, descending: bool) -> Vec<&SummaryRecord> {
        let mut sorted: Vec<&SummaryRecord> = self.records.iter().collect();
        sorted.sort_by(|a, b| {
            let by_value = match (a.stat(stat, variable), b.stat(stat, variable)) {
                (Some(x), Some(y)) if descending => y.total_cmp(&x),
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_value.then_with(|| a.glacier_id.cmp(&b.glacier_id))
        });
        sorted
    }
}

fn summarize(
    processed: &ProcessedSeries,
    variable: Variable,
    windows: &[RollingWindow],
    peak_window: &RollingWindow,
) -> VariableSummary {
    let sums = processed.series.sums(variable);
    let valid: Vec<f64> = sums.iter().flatten().copied().collect();
    if valid.is_empty() {
        return VariableSummary::default();
    }
    let column_max = |window: &RollingWindow| {
        processed
            .derived
            .rolling_sum(variable, window)
            .and_then(|column| column.iter().copied().max_by(f64::total_cmp))
    };
    let window_peaks = windows
        .iter()
        .filter_map(|w| column_max(w).map(|peak| (w.label.clone(), peak)))
        .collect();
    VariableSummary {
        total: valid.iter().sum(),
        max_hourly: valid.iter().copied().max_by(f64::total_cmp),
        window_peaks,
        peak_rolling: column_max(peak_window),
        hours_with_data: valid.len(),
    }
}
