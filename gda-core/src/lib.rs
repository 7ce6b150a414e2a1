//! Core types for glacier deposition analysis.
//!
//! Holds the polygon registry, the regular lat/lon grid description, the
//! polygon geometry used for rasterization and the gridded time slice that
//! the analysis crates consume.

pub mod error;
pub mod field;
pub mod geometry;
pub mod glacier;
pub mod grid;
pub mod variable;

pub use error::{GdaError, Result};
pub use field::FieldSlice;
pub use geometry::{parse_wkt_polygon, Outline};
pub use glacier::{Glacier, GlacierFilter, GlacierRegistry};
pub use grid::GridDescriptor;
pub use variable::Variable;
