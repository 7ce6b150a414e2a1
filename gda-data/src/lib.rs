//! Data processing for glacier deposition analysis.
//!
//! This crate maps gridded deposition fields onto glacier outlines,
//! accumulates per-glacier time series, summarises their peaks and extremes,
//! and correlates deposition with albedo change. The batch orchestrator ties
//! the steps together over an analysis window.

pub mod albedo;
pub mod batch;
pub mod config;
pub mod correlation;
pub mod extract;
pub mod extremes;
pub mod fire;
pub mod mask;
pub mod series;
pub mod summary;

pub use albedo::{AlbedoSource, AlbedoTable, DriverColumn};
pub use batch::{BatchOrchestrator, BatchOutcome, BatchState, CancelToken, SliceSource};
pub use config::BatchConfig;
pub use correlation::{correlate, lag_regression, lag_sweep, regress, CorrelationMethod, CorrelationResult, RegressionResult};
pub use extract::{extract, DepositionStats, ObservationBatch};
pub use extremes::{extreme_statistics, Exceedance, ExtremeStats};
pub use fire::{fire_proximity, FirePoint, FireProximity};
pub use mask::{CellMatch, MaskCache, MaskIndex};
pub use series::{recompute, Accumulator, DerivedColumns, GlacierTimeSeries, ProcessedSeries, RollingWindow};
pub use summary::{SummaryRecord, SummaryStat, SummaryTable, VariableSummary};
