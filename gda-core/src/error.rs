/// Error types for glacier deposition analysis
use chrono::NaiveDateTime;
use thiserror::Error;

/// Main error type for GDA operations.
///
/// `MissingSource`, `LoadTimeout`, `EmptyCoverage`, `InsufficientSample` and
/// `GeometryConflict` are recoverable: batch-level code records them and keeps
/// going. The remaining variants are fatal to the call that raised them.
#[derive(Error, Debug)]
pub enum GdaError {
    /// Gridded slice absent for a timestamp
    #[error("No gridded slice available for {0}")]
    MissingSource(NaiveDateTime),

    /// Gridded slice load did not finish in time
    #[error("Loading slice for {timestamp} timed out after {seconds}s")]
    LoadTimeout { timestamp: NaiveDateTime, seconds: u64 },

    /// Glacier has no assigned grid cells
    #[error("Glacier {0} has no assigned grid cells")]
    EmptyCoverage(String),

    /// Too few paired points for a correlation
    #[error("Insufficient sample for correlation (needed: {needed}, found: {found})")]
    InsufficientSample { needed: usize, found: usize },

    /// Two glaciers claim the same grid cell
    #[error("Glaciers {kept} and {dropped} both claim cell ({row}, {col})")]
    GeometryConflict {
        row: usize,
        col: usize,
        kept: String,
        dropped: String,
    },

    /// Invalid configuration or call arguments
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Variable name outside the supported set
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    /// Grid coordinates empty, duplicated or not monotonic
    #[error("Malformed grid: {0}")]
    MalformedGrid(String),

    /// Field array does not match the grid shape
    #[error("Field {variable} has {found} values, grid needs {expected}")]
    ShapeMismatch {
        variable: String,
        expected: usize,
        found: usize,
    },

    /// Polygon could not be parsed or is degenerate
    #[error("Invalid geometry: {0}")]
    Geometry(String),

    /// Failed to parse CSV data
    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    /// File system failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GdaError {
    /// True for the per-slice / per-glacier conditions a batch absorbs.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GdaError::MissingSource(_)
                | GdaError::LoadTimeout { .. }
                | GdaError::EmptyCoverage(_)
                | GdaError::InsufficientSample { .. }
                | GdaError::GeometryConflict { .. }
        )
    }
}

/// Type alias for Results using GdaError
pub type Result<T> = std::result::Result<T, GdaError>;
