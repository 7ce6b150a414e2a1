//! Extreme-event statistics of a deposition series.

use serde::{Deserialize, Serialize};

/// Percentiles reported when none are configured.
pub const DEFAULT_PERCENTILES: [f64; 3] = [90.0, 95.0, 99.0];

/// Values above one percentile threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Exceedance {
    pub percentile: f64,
    pub threshold: f64,
    /// Values strictly above the threshold
    pub count: usize,
    /// `count` over all positions, missing ones included
    pub frequency: f64,
    /// Mean length of runs of consecutive exceedances; 0 without any
    pub mean_duration: f64,
    pub max_duration: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtremeStats {
    /// Valid values used
    pub n: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub exceedances: Vec<Exceedance>,
}

impl ExtremeStats {
    pub fn exceedance(&self, percentile: f64) -> Option<&Exceedance> {
        self.exceedances.iter().find(|e| e.percentile == percentile)
    }
}

/// Percentile `p` (0..=100) of ascending `sorted`, interpolating linearly
/// between closest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Lengths of the runs of consecutive positions above `threshold`.
fn runs_above(values: &[Option<f64>], threshold: f64) -> Vec<usize> {
    let mut runs = Vec::new();
    let mut current = 0;
    for value in values {
        match value {
            Some(v) if v.is_finite() && *v > threshold => current += 1,
            _ => {
                if current > 0 {
                    runs.push(current);
                }
                current = 0;
            }
        }
    }
    if current > 0 {
        runs.push(current);
    }
    runs
}

/// Summary and exceedance statistics of the valid values of `values`.
///
/// `None` when no value is valid.
pub fn extreme_statistics(values: &[Option<f64>], percentiles: &[f64]) -> Option<ExtremeStats> {
    let mut sorted: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let std = (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64).sqrt();

    let exceedances = percentiles
        .iter()
        .filter_map(|&p| {
            let threshold = percentile(&sorted, p)?;
            let runs = runs_above(values, threshold);
            let count: usize = runs.iter().sum();
            Some(Exceedance {
                percentile: p,
                threshold,
                count,
                frequency: count as f64 / values.len() as f64,
                mean_duration: if runs.is_empty() { 0.0 } else { count as f64 / runs.len() as f64 },
                max_duration: runs.iter().copied().max().unwrap_or(0),
            })
        })
        .collect();

    Some(ExtremeStats {
        n,
        mean,
        std,
        min: sorted[0],
        max: sorted[n - 1],
        exceedances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_percentile_interpolates_between_ranks() {
        let sorted: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_relative_eq!(percentile(&sorted, 90.0).unwrap(), 9.1, epsilon = 1e-12);
        assert_relative_eq!(percentile(&sorted, 50.0).unwrap(), 5.5);
        assert_relative_eq!(percentile(&sorted, 100.0).unwrap(), 10.0);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_summary_and_exceedance_runs() {
        let values = vec![
            Some(1.0),
            Some(9.0),
            Some(10.0),
            Some(2.0),
            None,
            Some(9.5),
            Some(3.0),
            Some(4.0),
            Some(5.0),
            Some(6.0),
            Some(7.0),
        ];
        let stats = extreme_statistics(&values, &[50.0]).unwrap();
        assert_eq!(stats.n, 10);
        assert_relative_eq!(stats.mean, 5.65, epsilon = 1e-12);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 10.0);

        // median of the valid values is 5.5
        let p50 = stats.exceedance(50.0).unwrap();
        assert_relative_eq!(p50.threshold, 5.5);
        assert_eq!(p50.count, 5);
        assert_relative_eq!(p50.frequency, 5.0 / 11.0);
        // runs: [9, 10], [9.5], [6, 7]
        assert_relative_eq!(p50.mean_duration, 5.0 / 3.0, epsilon = 1e-12);
        assert_eq!(p50.max_duration, 2);
    }

    #[test]
    fn test_population_standard_deviation() {
        let values: Vec<Option<f64>> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter().map(Some).collect();
        let stats = extreme_statistics(&values, &[]).unwrap();
        assert_relative_eq!(stats.std, 2.0, epsilon = 1e-12);
        assert!(stats.exceedances.is_empty());
    }

    #[test]
    fn test_no_exceedance_above_maximum() {
        let stats = extreme_statistics(&[Some(1.0), Some(1.0), Some(1.0)], &DEFAULT_PERCENTILES).unwrap();
        assert_eq!(stats.exceedances.len(), 3);
        for e in &stats.exceedances {
            assert_eq!(e.count, 0);
            assert_eq!(e.mean_duration, 0.0);
            assert_eq!(e.max_duration, 0);
        }
    }

    #[test]
    fn test_all_missing_has_no_statistics() {
        assert_eq!(extreme_statistics(&[None, Some(f64::NAN)], &DEFAULT_PERCENTILES), None);
    }
}
