//! The `correlate` subcommand: lag sweep or lag regression between two
//! columns of a CSV.

use crate::output::{write_lag_regression_csv, write_lag_sweep_csv};
use crate::sources::{parse_series_columns, read_text};
use anyhow::Context;
use gda_data::{lag_regression, lag_sweep, CorrelationMethod, CorrelationResult, RegressionResult};
use log::info;
use std::path::Path;

/// Correlate `x_column` (driver) against `y_column` (response) at lags 0..=max_lag.
pub fn run_correlate(
    input: &Path,
    x_column: &str,
    y_column: &str,
    method: &str,
    max_lag: usize,
    output: Option<&Path>,
) -> anyhow::Result<Vec<CorrelationResult>> {
    let method: CorrelationMethod = method.parse()?;
    let text = read_text(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let (x, y) = parse_series_columns(&text, x_column, y_column)?;
    info!(
        "Correlating {} against {} ({} rows, {}, lags 0..={})",
        x_column,
        y_column,
        x.len(),
        method,
        max_lag
    );

    let sweep = lag_sweep(&x, &y, max_lag, method)?;
    for result in &sweep {
        match (result.coefficient, result.p_value) {
            (Some(r), Some(p)) => info!("  lag {:>3}: r={:+.3} p={:.4} n={}", result.lag, r, p, result.n),
            _ => info!("  lag {:>3}: undefined (n={})", result.lag, result.n),
        }
    }

    if let Some(path) = output {
        write_lag_sweep_csv(path, &sweep)?;
        info!("Lag sweep written to {}", path.display());
    }
    Ok(sweep)
}

/// Least-squares fit of `y_column` on `x_column` at lags 0..=max_lag.
pub fn run_regression(
    input: &Path,
    x_column: &str,
    y_column: &str,
    max_lag: usize,
    output: Option<&Path>,
) -> anyhow::Result<Vec<RegressionResult>> {
    let text = read_text(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let (x, y) = parse_series_columns(&text, x_column, y_column)?;
    info!("Regressing {} on {} ({} rows, lags 0..={})", y_column, x_column, x.len(), max_lag);

    let fits = lag_regression(&x, &y, max_lag)?;
    for fit in &fits {
        match (fit.slope, fit.intercept, fit.r_squared) {
            (Some(slope), Some(intercept), Some(r2)) => info!(
                "  lag {:>3}: y = {:+.4e} x {:+.4e} r²={:.3} p={:.4} n={}",
                fit.lag,
                slope,
                intercept,
                r2,
                fit.p_value.unwrap_or(f64::NAN),
                fit.n
            ),
            _ => info!("  lag {:>3}: undefined (n={})", fit.lag, fit.n),
        }
    }

    if let Some(path) = output {
        write_lag_regression_csv(path, &fits)?;
        info!("Lag regression written to {}", path.display());
    }
    Ok(fits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_correlate_file() {
        let dir = std::env::temp_dir().join(format!("gda-correlate-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("pair.csv");
        let mut text = String::from("day,dep,dalb\n");
        let dep = [2.0, 5.0, 1.0, 7.0, 3.0, 6.0, 4.0, 8.0];
        for (i, d) in dep.iter().enumerate() {
            text.push_str(&format!("{i},{d},{}\n", -0.002 * d));
        }
        std::fs::write(&input, text).unwrap();
        let output = dir.join("sweep.csv");

        let sweep = run_correlate(&input, "dep", "dalb", "pearson", 2, Some(&output)).unwrap();
        assert_eq!(sweep.len(), 3);
        assert_relative_eq!(sweep[0].coefficient.unwrap(), -1.0, epsilon = 1e-9);
        assert_eq!(std::fs::read_to_string(&output).unwrap().lines().count(), 4);

        assert!(run_correlate(&input, "dep", "dalb", "granger", 2, None).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_regression_file() {
        let dir = std::env::temp_dir().join(format!("gda-regression-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("pair.csv");
        let mut text = String::from("day,dep,dalb\n");
        for (i, d) in [2.0, 5.0, 1.0, 7.0, 3.0, 6.0].iter().enumerate() {
            text.push_str(&format!("{i},{d},{}\n", 0.5 - 0.01 * d));
        }
        std::fs::write(&input, text).unwrap();
        let output = dir.join("regression.csv");

        let fits = run_regression(&input, "dep", "dalb", 1, Some(&output)).unwrap();
        assert_eq!(fits.len(), 2);
        assert_relative_eq!(fits[0].slope.unwrap(), -0.01, epsilon = 1e-9);
        assert_relative_eq!(fits[0].intercept.unwrap(), 0.5, epsilon = 1e-9);
        assert_eq!(fits[1].n, 5);
        let written = std::fs::read_to_string(&output).unwrap();
        assert!(written.starts_with("lag,slope,intercept,r_squared,p_value,n\n0,"));
        assert_eq!(written.lines().count(), 3);
        std::fs::remove_dir_all(&dir).ok();
    }
}
