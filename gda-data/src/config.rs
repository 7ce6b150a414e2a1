//! Batch run configuration.

use crate::albedo::DriverColumn;
use crate::correlation::CorrelationMethod;
use crate::extremes::DEFAULT_PERCENTILES;
use crate::mask::CellMatch;
use crate::series::RollingWindow;
use chrono::{NaiveDate, NaiveDateTime};
use gda_core::{GdaError, Result, Variable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted rolling window, one leap year.
pub const MAX_WINDOW_HOURS: i64 = 366 * 24;

/// Largest accepted lag in days, one leap year.
pub const MAX_LAG_DAYS: usize = 366;

/// Settings for one batch run over an analysis window.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// First slice of the analysis window
    pub start: NaiveDateTime,
    /// Last slice of the analysis window (inclusive)
    pub end: NaiveDateTime,
    pub step_hours: u32,
    pub variables: Vec<Variable>,
    pub windows: Vec<RollingWindow>,
    /// Window whose maximum is reported as the summary peak
    pub peak_window: RollingWindow,
    pub cell_match: CellMatch,
    /// Slices loaded concurrently per in-flight set
    pub workers: usize,
    pub load_timeout_secs: u64,
    pub method: CorrelationMethod,
    /// Largest lag in days
    pub max_lag: usize,
    pub driver: DriverColumn,
    pub correlation_variable: Variable,
    pub ranking_variable: Variable,
    /// Percentiles (0-100) for the extreme-event statistics
    pub extreme_percentiles: Vec<f64>,
}

fn fire_season(month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, month, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .unwrap_or_default()
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            start: fire_season(6, 1, 0),
            end: fire_season(9, 30, 23),
            step_hours: 1,
            variables: Variable::ALL.to_vec(),
            windows: vec![RollingWindow::hours(24), RollingWindow::days(7)],
            peak_window: RollingWindow::days(7),
            cell_match: CellMatch::Center,
            workers: 4,
            load_timeout_secs: 30,
            method: CorrelationMethod::Pearson,
            max_lag: 10,
            driver: DriverColumn::Rolling7d,
            correlation_variable: Variable::BcDep,
            ranking_variable: Variable::BcDep,
            extreme_percentiles: DEFAULT_PERCENTILES.to_vec(),
        }
    }
}

impl BatchConfig {
    /// Parse a JSON configuration, validating it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: BatchConfig = serde_json::from_str(json)
            .map_err(|e| GdaError::Configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(GdaError::Configuration(msg));
        if self.end < self.start {
            return fail(format!("analysis end {} is before start {}", self.end, self.start));
        }
        if self.step_hours == 0 {
            return fail("step_hours must be at least 1".into());
        }
        if self.workers == 0 {
            return fail("workers must be at least 1".into());
        }
        if self.load_timeout_secs == 0 {
            return fail("load_timeout_secs must be at least 1".into());
        }
        if self.variables.is_empty() {
            return fail("no variables selected".into());
        }
        if self.windows.is_empty() {
            return fail("no rolling windows configured".into());
        }
        if let Some(w) = self.windows.iter().find(|w| w.hours <= 0) {
            return fail(format!("rolling window {} has no length", w.label));
        }
        if let Some(w) = self.windows.iter().find(|w| w.hours > MAX_WINDOW_HOURS) {
            return fail(format!(
                "rolling window {} is {} hours, longer than the {} hour maximum",
                w.label, w.hours, MAX_WINDOW_HOURS
            ));
        }
        if self.max_lag > MAX_LAG_DAYS {
            return fail(format!(
                "max_lag {} days exceeds the {} day maximum",
                self.max_lag, MAX_LAG_DAYS
            ));
        }
        if !self.windows.iter().any(|w| w.hours == self.peak_window.hours) {
            return fail(format!("peak window {} is not among the rolling windows", self.peak_window.label));
        }
        if let Some(window) = self.driver.window() {
            if !self.windows.iter().any(|w| w.hours == window.hours) {
                return fail(format!("driver column {} needs a {} rolling window", self.driver, window.label));
            }
        }
        if !self.variables.contains(&self.correlation_variable) {
            return fail(format!("correlation variable {} is not extracted", self.correlation_variable));
        }
        if !self.variables.contains(&self.ranking_variable) {
            return fail(format!("ranking variable {} is not extracted", self.ranking_variable));
        }
        if let Some(p) = self.extreme_percentiles.iter().find(|p| !(0.0..=100.0).contains(*p)) {
            return fail(format!("extreme percentile {p} is outside 0..=100"));
        }
        Ok(())
    }
}
