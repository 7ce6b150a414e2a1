//! Per-glacier deposition time series and their derived columns.
//!
//! Rows are kept in timestamp order as they are appended, whatever order the
//! batches arrive in. Rolling and cumulative columns are produced by a
//! separate pure pass (`recompute`) over the full series once ingestion is
//! done, so they never depend on arrival order.

use crate::extract::{DepositionStats, ObservationBatch};
use chrono::{Duration, NaiveDateTime};
use gda_core::Variable;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A trailing real-time window, e.g. the 24 hours ending at each row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RollingWindow {
    pub label: String,
    pub hours: i64,
}

impl RollingWindow {
    pub fn hours(hours: i64) -> Self {
        RollingWindow {
            label: format!("{hours}h"),
            hours,
        }
    }

    pub fn days(days: i64) -> Self {
        RollingWindow {
            label: format!("{days}d"),
            hours: days * 24,
        }
    }

    /// `None` when the length is beyond what chrono can represent.
    pub fn duration(&self) -> Option<Duration> {
        Duration::try_hours(self.hours)
    }
}

/// Observations of every tracked variable at one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub timestamp: NaiveDateTime,
    pub values: BTreeMap<Variable, DepositionStats>,
}

/// Chronological deposition observations for one glacier.
#[derive(Debug, Clone, PartialEq)]
pub struct GlacierTimeSeries {
    glacier_id: String,
    rows: Vec<SeriesRow>,
}

impl GlacierTimeSeries {
    pub fn new(glacier_id: impl Into<String>) -> Self {
        GlacierTimeSeries {
            glacier_id: glacier_id.into(),
            rows: Vec::new(),
        }
    }

    /// Insert a row at its chronological position.
    ///
    /// Returns false, leaving the series unchanged, when a row with the same
    /// timestamp is already present.
    pub fn append(&mut self, row: SeriesRow) -> bool {
        match self.rows.binary_search_by_key(&row.timestamp, |r| r.timestamp) {
            Ok(_) => false,
            Err(at) => {
                self.rows.insert(at, row);
                true
            }
        }
    }

    pub fn glacier_id(&self) -> &str {
        &self.glacier_id
    }

    pub fn rows(&self) -> &[SeriesRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.rows.iter().map(|r| r.timestamp).collect()
    }

    /// Per-row sum of a variable; `None` where missing.
    pub fn sums(&self, variable: Variable) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|r| r.values.get(&variable).and_then(|s| s.sum))
            .collect()
    }

    /// Per-row mean of a variable; `None` where missing.
    pub fn means(&self, variable: Variable) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|r| r.values.get(&variable).and_then(|s| s.mean))
            .collect()
    }

    /// Variables seen in any row.
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.rows.iter().flat_map(|r| r.values.keys().copied()).collect()
    }

    /// Rows holding at least one non-missing value.
    pub fn rows_with_data(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.values.values().any(|s| !s.is_missing()))
            .count()
    }
}

/// Derived columns of one variable, aligned with the series rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariableColumns {
    /// `rolling_sum[w][i]`: sum of the window `w` ending at row `i`; 0 when empty
    pub rolling_sum: Vec<Vec<f64>>,
    /// `rolling_mean[w][i]`: mean of per-row means in the window; `None` when empty
    pub rolling_mean: Vec<Vec<Option<f64>>>,
    /// Running total of sums from the first row
    pub cumulative: Vec<f64>,
}

/// Rolling and cumulative columns for a whole series.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedColumns {
    pub windows: Vec<RollingWindow>,
    pub columns: BTreeMap<Variable, VariableColumns>,
}

impl DerivedColumns {
    fn window_position(&self, window: &RollingWindow) -> Option<usize> {
        self.windows.iter().position(|w| w.hours == window.hours)
    }

    pub fn rolling_sum(&self, variable: Variable, window: &RollingWindow) -> Option<&[f64]> {
        let w = self.window_position(window)?;
        self.columns.get(&variable).map(|c| c.rolling_sum[w].as_slice())
    }

    pub fn rolling_mean(&self, variable: Variable, window: &RollingWindow) -> Option<&[Option<f64>]> {
        let w = self.window_position(window)?;
        self.columns.get(&variable).map(|c| c.rolling_mean[w].as_slice())
    }

    pub fn cumulative(&self, variable: Variable) -> Option<&[f64]> {
        self.columns.get(&variable).map(|c| c.cumulative.as_slice())
    }
}

/// Trailing-window sums and means over `(t - window, t]` at each row.
///
/// A window reaching past the earliest representable time, or one too long
/// to represent at all, never drops a row.
fn rolling(
    timestamps: &[NaiveDateTime],
    sums: &[Option<f64>],
    means: &[Option<f64>],
    window: Option<Duration>,
) -> (Vec<f64>, Vec<Option<f64>>) {
    let n = timestamps.len();
    let mut out_sum = Vec::with_capacity(n);
    let mut out_mean = Vec::with_capacity(n);
    let (mut lo, mut sum, mut sum_n, mut mean_total, mut mean_n) = (0usize, 0.0, 0usize, 0.0, 0usize);

    for hi in 0..n {
        if let Some(s) = sums[hi] {
            sum += s;
            sum_n += 1;
        }
        if let Some(m) = means[hi] {
            mean_total += m;
            mean_n += 1;
        }
        let start = window.and_then(|w| timestamps[hi].checked_sub_signed(w));
        while lo <= hi && start.is_some_and(|start| timestamps[lo] <= start) {
            if let Some(s) = sums[lo] {
                sum -= s;
                sum_n -= 1;
            }
            if let Some(m) = means[lo] {
                mean_total -= m;
                mean_n -= 1;
            }
            lo += 1;
        }
        // reset accumulated rounding once a window drains
        if sum_n == 0 {
            sum = 0.0;
        }
        if mean_n == 0 {
            mean_total = 0.0;
        }
        out_sum.push(sum);
        out_mean.push((mean_n > 0).then(|| mean_total / mean_n as f64));
    }
    (out_sum, out_mean)
}

/// Compute rolling and cumulative columns over the full series.
///
/// Windows are real-time intervals, so gaps in sampling shrink the number of
/// rows a window covers instead of stretching it.
pub fn recompute(series: &GlacierTimeSeries, windows: &[RollingWindow]) -> DerivedColumns {
    let timestamps = series.timestamps();
    debug_assert!(timestamps.windows(2).all(|w| w[0] < w[1]));

    let columns = series
        .variables()
        .into_iter()
        .map(|variable| {
            let sums = series.sums(variable);
            let means = series.means(variable);
            let mut columns = VariableColumns::default();
            for window in windows {
                let (s, m) = rolling(&timestamps, &sums, &means, window.duration());
                columns.rolling_sum.push(s);
                columns.rolling_mean.push(m);
            }
            let mut running = 0.0;
            columns.cumulative = sums
                .iter()
                .map(|s| {
                    running += s.unwrap_or(0.0);
                    running
                })
                .collect();
            (variable, columns)
        })
        .collect();

    DerivedColumns {
        windows: windows.to_vec(),
        columns,
    }
}

/// A series together with the derived columns computed from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSeries {
    pub series: GlacierTimeSeries,
    pub derived: DerivedColumns,
}

/// Single ingestion point for observation batches.
///
/// Taking `&mut self` makes this the only writer of every glacier series;
/// workers hand over whole batches and never touch a series themselves.
#[derive(Debug, Default)]
pub struct Accumulator {
    series: BTreeMap<String, GlacierTimeSeries>,
    batches: usize,
    duplicates: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Accumulator::default()
    }

    /// Append one batch to the series of every glacier it mentions.
    pub fn ingest(&mut self, batch: ObservationBatch) {
        let timestamp = batch.timestamp;
        for (glacier_id, values) in batch.observations {
            let series = self
                .series
                .entry(glacier_id.clone())
                .or_insert_with(|| GlacierTimeSeries::new(glacier_id.clone()));
            if !series.append(SeriesRow { timestamp, values }) {
                self.duplicates += 1;
                warn!("Duplicate observation for {} at {}, dropped", glacier_id, timestamp);
            }
        }
        self.batches += 1;
        debug!("Ingested batch {} ({})", self.batches, timestamp);
    }

    pub fn series(&self, glacier_id: &str) -> Option<&GlacierTimeSeries> {
        self.series.get(glacier_id)
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Close ingestion and derive every series' columns.
    pub fn finalize(self, windows: &[RollingWindow]) -> BTreeMap<String, ProcessedSeries> {
        self.series
            .into_iter()
            .map(|(id, series)| {
                let derived = recompute(&series, windows);
                (id, ProcessedSeries { series, derived })
            })
            .collect()
    }
}
