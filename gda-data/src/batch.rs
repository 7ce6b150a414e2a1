//! Batch orchestration over an analysis window.
//!
//! Slices are loaded and aggregated on tokio's blocking pool in sets of
//! `workers`, each bounded by a timeout. Workers share the mask cache but
//! hand back whole batches: the join loop below is the only place
//! observations enter the accumulator, so no series is ever shared between
//! tasks. Derived columns are computed once every slice has been ingested.

use crate::albedo::{albedo_lag_sweep, AlbedoSource};
use crate::config::BatchConfig;
use crate::correlation::CorrelationResult;
use crate::extract::{extract, ObservationBatch};
use crate::extremes::{extreme_statistics, ExtremeStats};
use crate::mask::MaskCache;
use crate::series::{Accumulator, ProcessedSeries};
use crate::summary::{SummaryRecord, SummaryTable};
use chrono::NaiveDateTime;
use gda_core::{FieldSlice, GdaError, GlacierRegistry, Result, Variable};
use gda_utils::dates::HourRange;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Provides the gridded fields for a timestamp.
///
/// `load` runs on a blocking thread and may do file I/O. A slice that does
/// not exist is reported as `GdaError::MissingSource`.
pub trait SliceSource: Send + Sync {
    fn load(&self, timestamp: NaiveDateTime) -> Result<FieldSlice>;
}

/// Shared flag asking a running batch to stop after its in-flight slices.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Init,
    /// Ingesting the slice for this timestamp
    Streaming(NaiveDateTime),
    Finalizing,
    Done,
}

/// Everything a finished (or cancelled) run produced.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub series: BTreeMap<String, ProcessedSeries>,
    pub summary: SummaryTable,
    /// Extreme statistics of the ranking variable's hourly sums, per series
    pub extremes: BTreeMap<String, ExtremeStats>,
    /// Lag sweeps keyed by glacier, only for glaciers with albedo overlap
    pub correlations: BTreeMap<String, Vec<CorrelationResult>>,
    /// Slices ingested, in time order
    pub processed: Vec<NaiveDateTime>,
    /// Slices absent, timed out or unreadable, in time order
    pub missing: Vec<NaiveDateTime>,
    /// Glaciers with no grid cell under the last mask
    pub uncovered: Vec<String>,
    /// Cells claimed by more than one glacier under the last mask
    pub conflicts: usize,
    pub duplicates: usize,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn ranked(&self, variable: Variable) -> Vec<&SummaryRecord> {
        self.summary.ranked(variable)
    }
}

/// Drives extraction over the analysis window and owns the mask cache.
pub struct BatchOrchestrator {
    config: BatchConfig,
    registry: Arc<GlacierRegistry>,
    cache: Arc<Mutex<MaskCache>>,
    state: BatchState,
    cancel: CancelToken,
}

/// Mask lookup never leaves the cache half-updated, so a poisoned lock is
/// still safe to reuse.
fn lock(cache: &Mutex<MaskCache>) -> MutexGuard<'_, MaskCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Load one slice and aggregate it over the current mask. Runs on a
/// blocking thread.
fn load_and_extract(
    source: &dyn SliceSource,
    cache: &Mutex<MaskCache>,
    registry: &GlacierRegistry,
    variables: &[Variable],
    timestamp: NaiveDateTime,
) -> Result<ObservationBatch> {
    let slice = source.load(timestamp)?;
    let mask = lock(cache).get_or_build(slice.grid(), registry);
    extract(&slice, &mask, variables)
}

impl BatchOrchestrator {
    /// Fails fast on an invalid configuration.
    pub fn new(config: BatchConfig, registry: GlacierRegistry) -> Result<Self> {
        config.validate()?;
        Ok(BatchOrchestrator {
            cache: Arc::new(Mutex::new(MaskCache::new(config.cell_match))),
            config,
            registry: Arc::new(registry),
            state: BatchState::Init,
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &GlacierRegistry {
        &self.registry
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Token that stops the run after the current set of slices.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Masks built so far; one per distinct grid geometry.
    pub fn mask_builds(&self) -> usize {
        lock(&self.cache).builds()
    }

    fn transition(&mut self, next: BatchState) {
        match (self.state, next) {
            (BatchState::Streaming(_), BatchState::Streaming(ts)) => debug!("Streaming slice {}", ts),
            (from, to) => info!("Batch state {:?} -> {:?}", from, to),
        }
        self.state = next;
    }

    /// Process every slice of the window, then derive columns, the summary,
    /// the extreme statistics and, when `albedo` is given, the lag sweeps.
    ///
    /// Slice-level failures are recorded in the outcome; only errors that
    /// would leave the outcome inconsistent are returned.
    pub async fn run(
        &mut self,
        source: Arc<dyn SliceSource>,
        albedo: Option<&dyn AlbedoSource>,
    ) -> Result<BatchOutcome> {
        self.state = BatchState::Init;
        let timestamps: Vec<NaiveDateTime> =
            HourRange::with_step(self.config.start, self.config.end, self.config.step_hours).collect();
        info!(
            "Processing {} slices from {} to {} for {} glaciers",
            timestamps.len(),
            self.config.start,
            self.config.end,
            self.registry.len()
        );

        let limit = self.config.load_timeout();
        let limit_secs = self.config.load_timeout_secs;
        let variables: Arc<[Variable]> = self.config.variables.clone().into();
        let mut accumulator = Accumulator::new();
        let mut processed = Vec::new();
        let mut missing = Vec::new();
        let mut cancelled = false;

        for chunk in timestamps.chunks(self.config.workers) {
            if self.cancel.is_cancelled() {
                warn!("Cancellation requested, stopping before {}", chunk[0]);
                cancelled = true;
                break;
            }

            let mut tasks = JoinSet::new();
            for &timestamp in chunk {
                let source = Arc::clone(&source);
                let cache = Arc::clone(&self.cache);
                let registry = Arc::clone(&self.registry);
                let variables = Arc::clone(&variables);
                tasks.spawn(async move {
                    let work = tokio::task::spawn_blocking(move || {
                        load_and_extract(source.as_ref(), &cache, &registry, &variables, timestamp)
                    });
                    let result = match timeout(limit, work).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(e)) => {
                            warn!("Slice worker for {} failed: {}", timestamp, e);
                            Err(GdaError::MissingSource(timestamp))
                        }
                        Err(_) => Err(GdaError::LoadTimeout {
                            timestamp,
                            seconds: limit_secs,
                        }),
                    };
                    (timestamp, result)
                });
            }

            let mut pending: BTreeSet<NaiveDateTime> = chunk.iter().copied().collect();
            while let Some(joined) = tasks.join_next().await {
                let (timestamp, result) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        warn!("Slice task failed: {}", e);
                        continue;
                    }
                };
                pending.remove(&timestamp);
                match result {
                    Ok(batch) => {
                        self.transition(BatchState::Streaming(timestamp));
                        accumulator.ingest(batch);
                        processed.push(timestamp);
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!("Skipping {}: {}", timestamp, e);
                        missing.push(timestamp);
                    }
                    Err(e) => {
                        warn!("Unusable slice {}, recorded as missing: {}", timestamp, e);
                        missing.push(timestamp);
                    }
                }
            }
            missing.extend(pending);
        }

        self.transition(BatchState::Finalizing);
        processed.sort();
        missing.sort();
        let duplicates = accumulator.duplicates();
        let series = accumulator.finalize(&self.config.windows);
        let summary = SummaryTable::build(
            &self.registry,
            &series,
            &self.config.variables,
            &self.config.windows,
            &self.config.peak_window,
            timestamps.len(),
        );
        let extremes: BTreeMap<String, ExtremeStats> = series
            .iter()
            .filter_map(|(glacier_id, p)| {
                let sums = p.series.sums(self.config.ranking_variable);
                extreme_statistics(&sums, &self.config.extreme_percentiles).map(|stats| (glacier_id.clone(), stats))
            })
            .collect();

        let mut correlations = BTreeMap::new();
        if let Some(albedo) = albedo {
            for (glacier_id, processed_series) in &series {
                let Some(daily) = albedo.daily_albedo(glacier_id) else {
                    continue;
                };
                if let Some(sweep) = albedo_lag_sweep(
                    processed_series,
                    &daily,
                    self.config.driver,
                    self.config.correlation_variable,
                    self.config.max_lag,
                    self.config.method,
                )? {
                    correlations.insert(glacier_id.clone(), sweep);
                }
            }
            info!("Computed {} lag sweeps against albedo", correlations.len());
        }

        let (uncovered, conflicts) = match lock(&self.cache).current() {
            Some(mask) => (mask.uncovered().map(String::from).collect(), mask.conflicts().len()),
            None => (Vec::new(), 0),
        };
        info!(
            "Ingested {} slices, {} missing, {} glacier series",
            processed.len(),
            missing.len(),
            series.len()
        );
        self.transition(BatchState::Done);

        Ok(BatchOutcome {
            series,
            summary,
            extremes,
            correlations,
            processed,
            missing,
            uncovered,
            conflicts,
            duplicates,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::albedo::{AlbedoTable, DriverColumn};
    use crate::series::RollingWindow;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};
    use gda_core::geometry::rectangle;
    use gda_core::{Glacier, GridDescriptor, Outline};
    use geo::Polygon;
    use std::collections::HashMap;

    fn glacier(id: &str, polygon: Polygon<f64>) -> Glacier {
        let (cen_lon, cen_lat) = polygon.vertex_centroid();
        Glacier {
            id: id.to_string(),
            name: id.to_string(),
            area_km2: 3.0,
            zmed: 2700.0,
            zmin: 2200.0,
            cen_lon,
            cen_lat,
            polygon,
        }
    }

    fn registry() -> GlacierRegistry {
        GlacierRegistry::from_glaciers(vec![
            glacier("G1", rectangle(-119.7, 50.3, -119.4, 50.6)),
            glacier("G2", rectangle(-119.25, 50.75, -119.05, 50.95)),
            glacier("FAR", rectangle(10.0, 10.0, 11.0, 11.0)),
        ])
        .unwrap()
    }

    fn grid() -> GridDescriptor {
        GridDescriptor::linspace((-120.0, -119.0), 10, (50.0, 51.0), 10).unwrap()
    }

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 7, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    /// BC field of 1 everywhere and `block` on the central 3x3 block.
    fn slice(timestamp: NaiveDateTime, block: f64) -> FieldSlice {
        let grid = grid();
        let mut values = vec![1.0; grid.len()];
        for row in 3..=5 {
            for col in 3..=5 {
                values[grid.index(row, col)] = block;
            }
        }
        FieldSlice::new(timestamp, grid).with_field(Variable::BcDep, values).unwrap()
    }

    #[derive(Default)]
    struct MemorySource {
        slices: HashMap<NaiveDateTime, FieldSlice>,
        slow: Option<(NaiveDateTime, std::time::Duration)>,
        cancel_after: Option<(NaiveDateTime, CancelToken)>,
    }

    impl SliceSource for MemorySource {
        fn load(&self, timestamp: NaiveDateTime) -> Result<FieldSlice> {
            if let Some((ts, delay)) = self.slow {
                if ts == timestamp {
                    std::thread::sleep(delay);
                }
            }
            if let Some((ts, token)) = &self.cancel_after {
                if *ts == timestamp {
                    token.cancel();
                }
            }
            self.slices
                .get(&timestamp)
                .cloned()
                .ok_or(GdaError::MissingSource(timestamp))
        }
    }

    fn config(hours: i64) -> BatchConfig {
        BatchConfig {
            start: t0(),
            end: t0() + Duration::hours(hours - 1),
            variables: vec![Variable::BcDep],
            load_timeout_secs: 1,
            ..BatchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_missing_slice_is_recorded_not_zero() {
        let mut source = MemorySource::default();
        for h in [0, 1, 3] {
            let ts = t0() + Duration::hours(h);
            source.slices.insert(ts, slice(ts, 2.0));
        }
        let mut orchestrator = BatchOrchestrator::new(config(4), registry()).unwrap();
        let outcome = orchestrator.run(Arc::new(source), None).await.unwrap();

        assert_eq!(orchestrator.state(), BatchState::Done);
        assert_eq!(outcome.missing, vec![t0() + Duration::hours(2)]);
        assert_eq!(outcome.processed.len(), 3);
        assert!(!outcome.cancelled);

        let g1 = &outcome.series["G1"];
        assert_eq!(g1.series.len(), 3);
        assert!(g1.series.timestamps().windows(2).all(|w| w[0] < w[1]));
        let rolling = g1.derived.rolling_sum(Variable::BcDep, &RollingWindow::hours(24)).unwrap();
        assert_relative_eq!(rolling[2], 54.0);
        assert_eq!(orchestrator.mask_builds(), 1);
        assert_eq!(outcome.uncovered, vec!["FAR".to_string()]);
    }

    #[tokio::test]
    async fn test_summary_ranking() {
        let mut source = MemorySource::default();
        for h in 0..6 {
            let ts = t0() + Duration::hours(h);
            source.slices.insert(ts, slice(ts, 2.0));
        }
        let mut orchestrator = BatchOrchestrator::new(config(6), registry()).unwrap();
        let outcome = orchestrator.run(Arc::new(source), None).await.unwrap();

        let ranked: Vec<&str> = outcome.ranked(Variable::BcDep).iter().map(|r| r.glacier_id.as_str()).collect();
        assert_eq!(ranked, vec!["G1", "G2", "FAR"]);
        let g1 = outcome.summary.get("G1").unwrap().variable(Variable::BcDep);
        assert_relative_eq!(g1.total, 108.0);
        assert_relative_eq!(g1.peak_rolling.unwrap(), 108.0);
        let far = outcome.summary.get("FAR").unwrap();
        assert_eq!(far.n_hours_data, 0);
        assert_eq!(far.variable(Variable::BcDep).peak_rolling, None);
        assert_eq!(far.missing_pct, Some(100.0));

        let g1_extremes = &outcome.extremes["G1"];
        assert_eq!(g1_extremes.n, 6);
        assert_relative_eq!(g1_extremes.max, 18.0);
        assert_eq!(g1_extremes.exceedances.len(), 3);
        assert!(!outcome.extremes.contains_key("FAR"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_workers_share_one_mask() {
        let mut source = MemorySource::default();
        for h in 0..8 {
            let ts = t0() + Duration::hours(h);
            source.slices.insert(ts, slice(ts, 2.0));
        }
        let config = BatchConfig {
            workers: 4,
            ..config(8)
        };
        let mut orchestrator = BatchOrchestrator::new(config, registry()).unwrap();
        let outcome = orchestrator.run(Arc::new(source), None).await.unwrap();

        assert_eq!(outcome.processed.len(), 8);
        assert_eq!(orchestrator.mask_builds(), 1);
        assert_eq!(outcome.series["G1"].series.len(), 8);
        assert_eq!(orchestrator.registry().len(), 3);
        assert_eq!(orchestrator.config().workers, 4);
    }

    #[tokio::test]
    async fn test_slow_load_times_out_as_missing() {
        let mut source = MemorySource::default();
        for h in 0..3 {
            let ts = t0() + Duration::hours(h);
            source.slices.insert(ts, slice(ts, 2.0));
        }
        let slow = t0() + Duration::hours(1);
        source.slow = Some((slow, std::time::Duration::from_millis(2500)));
        let mut orchestrator = BatchOrchestrator::new(config(3), registry()).unwrap();
        let outcome = orchestrator.run(Arc::new(source), None).await.unwrap();

        assert_eq!(outcome.missing, vec![slow]);
        assert_eq!(outcome.processed, vec![t0(), t0() + Duration::hours(2)]);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_ingested_series() {
        let mut orchestrator = BatchOrchestrator::new(
            BatchConfig {
                workers: 1,
                ..config(5)
            },
            registry(),
        )
        .unwrap();
        let mut source = MemorySource::default();
        for h in 0..5 {
            let ts = t0() + Duration::hours(h);
            source.slices.insert(ts, slice(ts, 2.0));
        }
        source.cancel_after = Some((t0() + Duration::hours(1), orchestrator.cancel_token()));
        let outcome = orchestrator.run(Arc::new(source), None).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.processed, vec![t0(), t0() + Duration::hours(1)]);
        assert!(outcome.missing.is_empty());
        assert_eq!(outcome.series["G1"].series.len(), 2);
        assert_eq!(orchestrator.state(), BatchState::Done);
    }

    #[tokio::test]
    async fn test_lag_sweeps_with_albedo() {
        let daily = [1.0, 4.0, 2.0, 6.0, 3.0, 8.0, 2.0, 5.0, 7.0, 1.0, 6.0, 3.0];
        let noon = t0() + Duration::hours(12);
        let mut source = MemorySource::default();
        for (d, v) in daily.iter().enumerate() {
            let ts = noon + Duration::days(d as i64);
            source.slices.insert(ts, slice(ts, *v));
        }

        // G1 darkens the day after each deposition
        let mut albedo = AlbedoTable::new();
        let mut level = 0.8;
        albedo.insert("G1", noon.date(), Some(level));
        for (d, v) in daily.iter().enumerate().take(daily.len() - 1) {
            level -= 0.001 * v;
            albedo.insert("G1", noon.date() + Duration::days(d as i64 + 1), Some(level));
        }

        let config = BatchConfig {
            start: noon,
            end: noon + Duration::days(daily.len() as i64 - 1),
            step_hours: 24,
            driver: DriverColumn::Rolling24h,
            max_lag: 3,
            ..config(1)
        };
        let mut orchestrator = BatchOrchestrator::new(config, registry()).unwrap();
        let outcome = orchestrator.run(Arc::new(source), Some(&albedo as &dyn AlbedoSource)).await.unwrap();

        assert_eq!(outcome.processed.len(), daily.len());
        assert_eq!(outcome.correlations.len(), 1);
        let sweep = &outcome.correlations["G1"];
        assert_eq!(sweep.iter().map(|r| r.lag).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_relative_eq!(sweep[1].coefficient.unwrap(), -1.0, epsilon = 1e-9);
        assert!(sweep[1].p_value.unwrap() < 0.01);
    }

    #[test]
    fn test_invalid_configuration_fails_fast() {
        let config = BatchConfig {
            workers: 0,
            ..BatchConfig::default()
        };
        assert!(matches!(
            BatchOrchestrator::new(config, registry()),
            Err(GdaError::Configuration(_))
        ));
    }
}
