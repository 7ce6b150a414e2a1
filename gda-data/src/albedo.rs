//! Daily albedo series and their alignment with deposition.

use crate::correlation::{lag_sweep, CorrelationMethod, CorrelationResult};
use crate::series::{ProcessedSeries, RollingWindow};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use gda_core::{GdaError, Result, Variable};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Per-glacier daily albedo, `None` for days without a usable retrieval.
pub type DailyAlbedo = BTreeMap<NaiveDate, Option<f64>>;

/// Supplies daily albedo per glacier.
pub trait AlbedoSource: Send + Sync {
    /// `None` when the source knows nothing about the glacier.
    fn daily_albedo(&self, glacier_id: &str) -> Option<DailyAlbedo>;
}

/// In-memory albedo observations keyed by glacier.
#[derive(Debug, Clone, Default)]
pub struct AlbedoTable {
    series: HashMap<String, DailyAlbedo>,
}

impl AlbedoTable {
    pub fn new() -> Self {
        AlbedoTable::default()
    }

    pub fn insert(&mut self, glacier_id: &str, date: NaiveDate, albedo: Option<f64>) {
        self.series
            .entry(glacier_id.to_string())
            .or_default()
            .insert(date, albedo.filter(|v| v.is_finite()));
    }

    pub fn glacier_ids(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl AlbedoSource for AlbedoTable {
    fn daily_albedo(&self, glacier_id: &str) -> Option<DailyAlbedo> {
        self.series.get(glacier_id).cloned()
    }
}

/// Deposition column correlated against albedo change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DriverColumn {
    #[serde(rename = "rolling_24h")]
    Rolling24h,
    #[default]
    #[serde(rename = "rolling_7d")]
    Rolling7d,
    #[serde(rename = "cumulative")]
    Cumulative,
}

impl DriverColumn {
    /// Rolling window backing this column, if any.
    pub fn window(&self) -> Option<RollingWindow> {
        match self {
            DriverColumn::Rolling24h => Some(RollingWindow::hours(24)),
            DriverColumn::Rolling7d => Some(RollingWindow::days(7)),
            DriverColumn::Cumulative => None,
        }
    }

    /// Hourly driver values of `variable`, aligned with the series rows.
    pub fn values(&self, processed: &ProcessedSeries, variable: Variable) -> Option<Vec<Option<f64>>> {
        let derived = &processed.derived;
        let column = match self.window() {
            Some(window) => derived.rolling_sum(variable, &window)?,
            None => derived.cumulative(variable)?,
        };
        // sums absent at a row leave the driver undefined there
        let observed = processed.series.sums(variable);
        Some(
            column
                .iter()
                .zip(observed)
                .map(|(v, obs)| obs.map(|_| *v))
                .collect(),
        )
    }
}

impl fmt::Display for DriverColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverColumn::Rolling24h => "rolling_24h",
            DriverColumn::Rolling7d => "rolling_7d",
            DriverColumn::Cumulative => "cumulative",
        };
        f.write_str(name)
    }
}

impl FromStr for DriverColumn {
    type Err = GdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "rolling_24h" => Ok(DriverColumn::Rolling24h),
            "rolling_7d" => Ok(DriverColumn::Rolling7d),
            "cumulative" => Ok(DriverColumn::Cumulative),
            other => Err(GdaError::Configuration(format!("unknown driver column {other:?}"))),
        }
    }
}

/// Calendar-day means of an hourly series; `None` for days without a value.
pub fn daily_means(timestamps: &[NaiveDateTime], values: &[Option<f64>]) -> BTreeMap<NaiveDate, Option<f64>> {
    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for (ts, value) in timestamps.iter().zip(values) {
        let entry = days.entry(ts.date()).or_insert((0.0, 0));
        if let Some(v) = value.filter(|v| v.is_finite()) {
            entry.0 += v;
            entry.1 += 1;
        }
    }
    days.into_iter()
        .map(|(day, (total, n))| (day, (n > 0).then(|| total / n as f64)))
        .collect()
}

/// Daily deposition and albedo on a shared contiguous calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPair {
    pub dates: Vec<NaiveDate>,
    pub deposition: Vec<Option<f64>>,
    pub albedo: Vec<Option<f64>>,
    /// albedo(d) - albedo(d - 1)
    pub albedo_change: Vec<Option<f64>>,
}

impl AlignedPair {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Align two daily series over the days both of them span.
///
/// Returns `None` when the spans do not overlap.
pub fn align_daily(deposition: &BTreeMap<NaiveDate, Option<f64>>, albedo: &DailyAlbedo) -> Option<AlignedPair> {
    let first = (*deposition.keys().next()?).max(*albedo.keys().next()?);
    let last = (*deposition.keys().next_back()?).min(*albedo.keys().next_back()?);
    if first > last {
        return None;
    }

    let lookup = |map: &BTreeMap<NaiveDate, Option<f64>>, day: NaiveDate| map.get(&day).copied().flatten();
    let mut pair = AlignedPair {
        dates: Vec::new(),
        deposition: Vec::new(),
        albedo: Vec::new(),
        albedo_change: Vec::new(),
    };
    let mut day = first;
    while day <= last {
        let today = lookup(albedo, day);
        let yesterday = lookup(albedo, day - Duration::days(1));
        pair.dates.push(day);
        pair.deposition.push(lookup(deposition, day));
        pair.albedo.push(today);
        pair.albedo_change.push(today.zip(yesterday).map(|(a, b)| a - b));
        day += Duration::days(1);
    }
    Some(pair)
}

/// Lag sweep of daily driver deposition against albedo change for one glacier.
///
/// `Ok(None)` when the glacier has no driver column or the two series never
/// overlap in time.
pub fn albedo_lag_sweep(
    processed: &ProcessedSeries,
    albedo: &DailyAlbedo,
    driver: DriverColumn,
    variable: Variable,
    max_lag_days: usize,
    method: CorrelationMethod,
) -> Result<Option<Vec<CorrelationResult>>> {
    let glacier_id = processed.series.glacier_id();
    let Some(values) = driver.values(processed, variable) else {
        debug!("{glacier_id}: no {driver} column for {variable}");
        return Ok(None);
    };
    let daily = daily_means(&processed.series.timestamps(), &values);
    let Some(pair) = align_daily(&daily, albedo) else {
        debug!("{glacier_id}: albedo and deposition do not overlap");
        return Ok(None);
    };
    lag_sweep(&pair.deposition, &pair.albedo_change, max_lag_days, method).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::DepositionStats;
    use crate::series::{recompute, GlacierTimeSeries, SeriesRow};
    use approx::assert_relative_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 7, d).unwrap()
    }

    fn processed(hourly: &[(NaiveDateTime, Option<f64>)]) -> ProcessedSeries {
        let mut series = GlacierTimeSeries::new("RGI-A");
        for (ts, sum) in hourly {
            let stats = DepositionStats {
                mean: *sum,
                sum: *sum,
                cells: usize::from(sum.is_some()),
            };
            series.append(SeriesRow {
                timestamp: *ts,
                values: BTreeMap::from([(Variable::BcDep, stats)]),
            });
        }
        let derived = recompute(&series, &[RollingWindow::hours(24), RollingWindow::days(7)]);
        ProcessedSeries { series, derived }
    }

    #[test]
    fn test_table_masks_non_finite_albedo() {
        let mut table = AlbedoTable::new();
        table.insert("RGI-B", day(1), Some(0.6));
        table.insert("RGI-A", day(1), Some(f64::NAN));
        table.insert("RGI-A", day(2), Some(0.5));
        let mut ids: Vec<&str> = table.glacier_ids().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["RGI-A", "RGI-B"]);
        assert_eq!(table.len(), 2);
        let a = table.daily_albedo("RGI-A").unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[&day(1)], None);
        assert!(table.daily_albedo("RGI-C").is_none());
    }

    #[test]
    fn test_daily_means_skip_missing_hours() {
        let ts = [
            day(1).and_hms_opt(0, 0, 0).unwrap(),
            day(1).and_hms_opt(12, 0, 0).unwrap(),
            day(1).and_hms_opt(13, 0, 0).unwrap(),
            day(2).and_hms_opt(0, 0, 0).unwrap(),
        ];
        let means = daily_means(&ts, &[Some(1.0), None, Some(3.0), None]);
        assert_eq!(means.len(), 2);
        assert_relative_eq!(means[&day(1)].unwrap(), 2.0);
        assert_eq!(means[&day(2)], None);
    }

    #[test]
    fn test_align_daily_uses_overlap_and_previous_day() {
        let deposition: BTreeMap<_, _> = (3..=8).map(|d| (day(d), Some(d as f64))).collect();
        let mut albedo = DailyAlbedo::new();
        albedo.insert(day(1), Some(0.80));
        albedo.insert(day(2), Some(0.78));
        albedo.insert(day(3), Some(0.75));
        albedo.insert(day(5), Some(0.70));
        albedo.insert(day(6), None);
        albedo.insert(day(7), Some(0.60));

        let pair = align_daily(&deposition, &albedo).unwrap();
        assert_eq!(pair.dates, vec![day(3), day(4), day(5), day(6), day(7)]);
        assert_eq!(pair.deposition[0], Some(3.0));
        assert_eq!(pair.albedo[1], None);
        assert_relative_eq!(pair.albedo_change[0].unwrap(), -0.03, epsilon = 1e-12);
        assert_eq!(pair.albedo_change[1], None);
        assert_eq!(pair.albedo_change[2], None);
        assert_eq!(pair.albedo_change[3], None);
        assert_eq!(pair.albedo_change[4], None);
    }

    #[test]
    fn test_align_daily_without_overlap() {
        let deposition = BTreeMap::from([(day(1), Some(1.0))]);
        let albedo = DailyAlbedo::from([(day(5), Some(0.5))]);
        assert!(align_daily(&deposition, &albedo).is_none());
        assert!(align_daily(&BTreeMap::new(), &albedo).is_none());
    }

    #[test]
    fn test_driver_column_masks_missing_rows() {
        let t0 = day(1).and_hms_opt(0, 0, 0).unwrap();
        let series = processed(&[(t0, Some(1.0)), (t0 + Duration::hours(1), None), (t0 + Duration::hours(2), Some(2.0))]);
        let rolling = DriverColumn::Rolling24h.values(&series, Variable::BcDep).unwrap();
        assert_eq!(rolling, vec![Some(1.0), None, Some(3.0)]);
        let cumulative = DriverColumn::Cumulative.values(&series, Variable::BcDep).unwrap();
        assert_eq!(cumulative, vec![Some(1.0), None, Some(3.0)]);
        assert!(DriverColumn::Rolling7d.values(&series, Variable::Pm10Dep).is_none());
    }

    #[test]
    fn test_albedo_lag_sweep_finds_darkening() {
        // one hourly value per day at noon, increasing deposition darkens the next day
        let deposition = [1.0, 4.0, 2.0, 6.0, 3.0, 8.0, 2.0, 5.0, 7.0, 1.0, 6.0, 3.0];
        let hourly: Vec<_> = deposition
            .iter()
            .enumerate()
            .map(|(i, v)| (day(i as u32 + 1).and_hms_opt(12, 0, 0).unwrap(), Some(*v)))
            .collect();
        let series = processed(&hourly);

        let mut albedo = DailyAlbedo::new();
        let mut level = 0.8;
        albedo.insert(day(1), Some(level));
        for (i, v) in deposition.iter().enumerate().take(deposition.len() - 1) {
            level -= 0.001 * v;
            albedo.insert(day(i as u32 + 2), Some(level));
        }

        let sweep = albedo_lag_sweep(&series, &albedo, DriverColumn::Rolling24h, Variable::BcDep, 3, CorrelationMethod::Pearson)
            .unwrap()
            .unwrap();
        assert_eq!(sweep.len(), 4);
        assert_relative_eq!(sweep[1].coefficient.unwrap(), -1.0, epsilon = 1e-9);
        assert!(sweep[1].p_value.unwrap() < 0.01);
    }

    #[test]
    fn test_driver_column_names() {
        assert_eq!("rolling_7d".parse::<DriverColumn>().unwrap(), DriverColumn::Rolling7d);
        assert_eq!(DriverColumn::Cumulative.to_string(), "cumulative");
        assert!(matches!("weekly".parse::<DriverColumn>(), Err(GdaError::Configuration(_))));
        let json = serde_json::to_string(&DriverColumn::Rolling24h).unwrap();
        assert_eq!(json, "\"rolling_24h\"");
    }
}
