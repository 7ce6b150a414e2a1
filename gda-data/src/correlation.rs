//! Correlation between a deposition driver and an albedo response, with
//! lag sweeps.
//!
//! Positions where either series is missing (or non-finite) are dropped
//! before any computation. Fewer than `MIN_PAIRED_POINTS` valid pairs, or a
//! constant series, gives an undefined result: coefficient and p-value are
//! `None`, never zero.

use gda_core::{GdaError, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use std::fmt;
use std::str::FromStr;

/// Minimum number of valid pairs for a defined coefficient.
pub const MIN_PAIRED_POINTS: usize = 3;

/// Two-sided 95% normal quantile used for the Fisher interval.
const Z_CRIT_95: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    /// Linear (Pearson) correlation
    #[default]
    Pearson,
    /// Rank (Spearman) correlation
    Spearman,
    /// Concordance (Kendall tau-b) correlation
    Kendall,
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CorrelationMethod::Pearson => "pearson",
            CorrelationMethod::Spearman => "spearman",
            CorrelationMethod::Kendall => "kendall",
        };
        f.write_str(name)
    }
}

impl FromStr for CorrelationMethod {
    type Err = GdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            "kendall" => Ok(CorrelationMethod::Kendall),
            other => Err(GdaError::Configuration(format!(
                "unsupported correlation method {other:?}"
            ))),
        }
    }
}

/// Outcome of one correlation at one lag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub lag: usize,
    /// `None` when undefined (too few pairs or a constant series)
    pub coefficient: Option<f64>,
    pub p_value: Option<f64>,
    /// Valid pairs used
    pub n: usize,
    /// 95% Fisher-z interval, Pearson with n > 3 only
    pub confidence_interval: Option<(f64, f64)>,
}

impl CorrelationResult {
    fn undefined(n: usize) -> Self {
        CorrelationResult {
            lag: 0,
            coefficient: None,
            p_value: None,
            n,
            confidence_interval: None,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.coefficient.is_some()
    }

    /// The condition behind an undefined result, if it was a short sample.
    pub fn insufficient_sample(&self) -> Option<GdaError> {
        (self.n < MIN_PAIRED_POINTS).then_some(GdaError::InsufficientSample {
            needed: MIN_PAIRED_POINTS,
            found: self.n,
        })
    }
}

fn paired(x: &[Option<f64>], y: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some((*a, *b)),
            _ => None,
        })
        .unzip()
}

fn pearson_r(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Two-sided p-value of r under the Student-t approximation with n - 2 df.
fn t_test_p_value(r: f64, n: usize) -> Result<f64> {
    if r.abs() >= 1.0 {
        return Ok(0.0);
    }
    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r * r)).sqrt();
    let t_dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| GdaError::Configuration(format!("failed to create t-distribution: {e}")))?;
    Ok((2.0 * (1.0 - t_dist.cdf(t.abs()))).clamp(0.0, 1.0))
}

/// Average ranks (1-based), ties sharing the mean of their positions.
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            out[k] = rank;
        }
        i = j + 1;
    }
    out
}

/// Tie-group sums used by the tau-b variance: (Σ t(t-1)/2, Σ t(t-1)(t-2), Σ t(t-1)(2t+5)).
fn tie_terms(values: &[f64]) -> (f64, f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut terms = (0.0, 0.0, 0.0);
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1] == sorted[i] {
            j += 1;
        }
        let t = (j - i + 1) as f64;
        if t > 1.0 {
            terms.0 += t * (t - 1.0) / 2.0;
            terms.1 += t * (t - 1.0) * (t - 2.0);
            terms.2 += t * (t - 1.0) * (2.0 * t + 5.0);
        }
        i = j + 1;
    }
    terms
}

/// Kendall tau-b and its asymptotic two-sided p-value.
fn kendall(x: &[f64], y: &[f64]) -> Result<Option<(f64, f64)>> {
    let n = x.len();
    let mut con_minus_dis = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            let s = (x[i] - x[j]).signum() * (y[i] - y[j]).signum();
            if x[i] != x[j] && y[i] != y[j] {
                con_minus_dis += s;
            }
        }
    }
    let pairs = (n * (n - 1) / 2) as f64;
    let (x_tie, x0, x1) = tie_terms(x);
    let (y_tie, y0, y1) = tie_terms(y);
    let denom = ((pairs - x_tie) * (pairs - y_tie)).sqrt();
    if denom == 0.0 {
        return Ok(None);
    }
    let tau = (con_minus_dis / denom).clamp(-1.0, 1.0);

    let nf = n as f64;
    let m = nf * (nf - 1.0);
    let var = (m * (2.0 * nf + 5.0) - x1 - y1) / 18.0
        + (2.0 * x_tie * y_tie) / m
        + x0 * y0 / (9.0 * m * (nf - 2.0));
    let z = con_minus_dis / var.sqrt();
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| GdaError::Configuration(format!("failed to create normal distribution: {e}")))?;
    let p = (2.0 * (1.0 - normal.cdf(z.abs()))).clamp(0.0, 1.0);
    Ok(Some((tau, p)))
}

/// Correlate two index-aligned series.
///
/// Fails only when the series lengths differ.
pub fn correlate(x: &[Option<f64>], y: &[Option<f64>], method: CorrelationMethod) -> Result<CorrelationResult> {
    if x.len() != y.len() {
        return Err(GdaError::Configuration(format!(
            "series lengths differ: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    let (xs, ys) = paired(x, y);
    let n = xs.len();
    if n < MIN_PAIRED_POINTS {
        return Ok(CorrelationResult::undefined(n));
    }

    let (coefficient, p_value) = match method {
        CorrelationMethod::Pearson => match pearson_r(&xs, &ys) {
            Some(r) => (r, t_test_p_value(r, n)?),
            None => return Ok(CorrelationResult::undefined(n)),
        },
        CorrelationMethod::Spearman => match pearson_r(&ranks(&xs), &ranks(&ys)) {
            Some(rho) => (rho, t_test_p_value(rho, n)?),
            None => return Ok(CorrelationResult::undefined(n)),
        },
        CorrelationMethod::Kendall => match kendall(&xs, &ys)? {
            Some(found) => found,
            None => return Ok(CorrelationResult::undefined(n)),
        },
    };

    let confidence_interval = (method == CorrelationMethod::Pearson && n > 3).then(|| {
        let z = coefficient.atanh();
        let se = 1.0 / ((n - 3) as f64).sqrt();
        ((z - Z_CRIT_95 * se).tanh(), (z + Z_CRIT_95 * se).tanh())
    });

    Ok(CorrelationResult {
        lag: 0,
        coefficient: Some(coefficient),
        p_value: Some(p_value),
        n,
        confidence_interval,
    })
}

/// Correlate `x` shifted earlier than `y` by 0..=max_lag steps.
///
/// At lag k, x[i] is paired with y[i + k]: the driver precedes the response.
/// Both series are trimmed to the overlap before correlating, so lag 0 is the
/// plain correlation of the inputs. The sweep stops at the series length,
/// past which every lag has an empty overlap.
pub fn lag_sweep(
    x: &[Option<f64>],
    y: &[Option<f64>],
    max_lag: usize,
    method: CorrelationMethod,
) -> Result<Vec<CorrelationResult>> {
    if x.len() != y.len() {
        return Err(GdaError::Configuration(format!(
            "series lengths differ: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    (0..=max_lag.min(x.len()))
        .map(|lag| {
            let (driver, response) = shifted(x, y, lag);
            let mut result = correlate(driver, response, method)?;
            result.lag = lag;
            Ok(result)
        })
        .collect()
}

/// `x` trimmed at the end and `y` at the start by `lag`, so x[i] meets y[i + lag].
fn shifted<'a>(x: &'a [Option<f64>], y: &'a [Option<f64>], lag: usize) -> (&'a [Option<f64>], &'a [Option<f64>]) {
    let overlap = x.len() - lag;
    (&x[..overlap], &y[y.len() - overlap..])
}

/// Ordinary least-squares fit of the response on the driver at one lag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionResult {
    pub lag: usize,
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
    pub r_squared: Option<f64>,
    /// Two-sided p-value of the slope
    pub p_value: Option<f64>,
    /// Valid pairs used
    pub n: usize,
}

/// Fit `y = intercept + slope * x` over the valid pairs.
///
/// Too few pairs or a constant driver leave everything undefined; a constant
/// response fits a flat line with no r² or p-value.
pub fn regress(x: &[Option<f64>], y: &[Option<f64>]) -> Result<RegressionResult> {
    let (xs, ys) = paired(x, y);
    let n = xs.len();
    let undefined = RegressionResult {
        lag: 0,
        slope: None,
        intercept: None,
        r_squared: None,
        p_value: None,
        n,
    };
    if n < MIN_PAIRED_POINTS {
        return Ok(undefined);
    }
    let nf = n as f64;
    let mx = xs.iter().sum::<f64>() / nf;
    let my = ys.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in xs.iter().zip(&ys) {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 {
        return Ok(undefined);
    }
    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    let (r_squared, p_value) = match pearson_r(&xs, &ys) {
        Some(r) => (Some(r * r), Some(t_test_p_value(r, n)?)),
        None => (None, None),
    };
    Ok(RegressionResult {
        lag: 0,
        slope: Some(slope),
        intercept: Some(intercept),
        r_squared,
        p_value,
        n,
    })
}

/// Regress `y` on `x` shifted earlier by 0..=max_lag steps, pairing like
/// [`lag_sweep`].
pub fn lag_regression(x: &[Option<f64>], y: &[Option<f64>], max_lag: usize) -> Result<Vec<RegressionResult>> {
    if x.len() != y.len() {
        return Err(GdaError::Configuration(format!(
            "series lengths differ: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    (0..=max_lag.min(x.len()))
        .map(|lag| {
            let (driver, response) = shifted(x, y, lag);
            let mut result = regress(driver, response)?;
            result.lag = lag;
            Ok(result)
        })
        .collect()
}
