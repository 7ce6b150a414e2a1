use crate::error::{GdaError, Result};
use crate::geometry::rect;
use geo::Rect;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A regular lat/lon grid given by its cell-centre coordinates.
///
/// Fields laid on the grid are row-major: row = latitude index, column =
/// longitude index. Coordinates may run ascending or descending but must be
/// strictly monotonic and finite.
///
/// Equality and hashing compare the coordinate arrays by value, so two grids
/// read from different files are the same grid when their coordinates match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridDescriptor {
    lons: Vec<f64>,
    lats: Vec<f64>,
}

fn check_axis(name: &str, coords: &[f64]) -> Result<()> {
    if coords.is_empty() {
        return Err(GdaError::MalformedGrid(format!("{name} axis has no cells")));
    }
    if let Some(bad) = coords.iter().find(|c| !c.is_finite()) {
        return Err(GdaError::MalformedGrid(format!("{name} axis contains {bad}")));
    }
    if coords.len() > 1 {
        let ascending = coords[1] > coords[0];
        let monotonic = coords.windows(2).all(|w| {
            if ascending {
                w[1] > w[0]
            } else {
                w[1] < w[0]
            }
        });
        if !monotonic {
            return Err(GdaError::MalformedGrid(format!(
                "{name} axis is not strictly monotonic"
            )));
        }
    }
    Ok(())
}

/// Footprint edges of each cell along one axis, as (low, high) pairs.
/// Interior edges sit halfway between neighbouring centres; the outer edges
/// are extended by half of the adjacent spacing. A single-cell axis has a
/// zero-width footprint.
fn axis_footprints(coords: &[f64]) -> Vec<(f64, f64)> {
    let n = coords.len();
    (0..n)
        .map(|i| {
            let before = if i > 0 {
                (coords[i - 1] + coords[i]) / 2.0
            } else if n > 1 {
                coords[0] - (coords[1] - coords[0]) / 2.0
            } else {
                coords[0]
            };
            let after = if i + 1 < n {
                (coords[i] + coords[i + 1]) / 2.0
            } else if n > 1 {
                coords[n - 1] + (coords[n - 1] - coords[n - 2]) / 2.0
            } else {
                coords[0]
            };
            (before.min(after), before.max(after))
        })
        .collect()
}

impl GridDescriptor {
    /// Build a grid from centre longitudes and latitudes.
    pub fn new(lons: Vec<f64>, lats: Vec<f64>) -> Result<Self> {
        check_axis("longitude", &lons)?;
        check_axis("latitude", &lats)?;
        Ok(GridDescriptor { lons, lats })
    }

    /// Evenly spaced grid with `n_lon` x `n_lat` centres spanning the given
    /// inclusive ranges.
    pub fn linspace(
        lon_range: (f64, f64),
        n_lon: usize,
        lat_range: (f64, f64),
        n_lat: usize,
    ) -> Result<Self> {
        fn spaced(range: (f64, f64), n: usize) -> Vec<f64> {
            match n {
                0 => Vec::new(),
                1 => vec![range.0],
                _ => {
                    let step = (range.1 - range.0) / (n - 1) as f64;
                    (0..n).map(|i| range.0 + step * i as f64).collect()
                }
            }
        }
        GridDescriptor::new(spaced(lon_range, n_lon), spaced(lat_range, n_lat))
    }

    pub fn lons(&self) -> &[f64] {
        &self.lons
    }

    pub fn lats(&self) -> &[f64] {
        &self.lats
    }

    /// Number of latitude rows.
    pub fn n_rows(&self) -> usize {
        self.lats.len()
    }

    /// Number of longitude columns.
    pub fn n_cols(&self) -> usize {
        self.lons.len()
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.lats.len() * self.lons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat row-major index of a cell.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.lons.len() + col
    }

    /// (row, col) of a flat index.
    pub fn row_col(&self, index: usize) -> (usize, usize) {
        (index / self.lons.len(), index % self.lons.len())
    }

    /// Cell centre as (lon, lat).
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (self.lons[col], self.lats[row])
    }

    pub fn lon_footprints(&self) -> Vec<(f64, f64)> {
        axis_footprints(&self.lons)
    }

    pub fn lat_footprints(&self) -> Vec<(f64, f64)> {
        axis_footprints(&self.lats)
    }

    /// Extent covered by all cell footprints.
    pub fn extent(&self) -> Rect<f64> {
        let lon = self.lon_footprints();
        let lat = self.lat_footprints();
        let fold = |v: &[(f64, f64)]| {
            v.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |acc, &(lo, hi)| {
                (acc.0.min(lo), acc.1.max(hi))
            })
        };
        let (min_lon, max_lon) = fold(&lon);
        let (min_lat, max_lat) = fold(&lat);
        rect(min_lon, min_lat, max_lon, max_lat)
    }

    /// Stable fingerprint of the coordinate arrays, suitable for logs and cache keys.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl PartialEq for GridDescriptor {
    fn eq(&self, other: &Self) -> bool {
        let same = |a: &[f64], b: &[f64]| {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
        };
        same(&self.lons, &other.lons) && same(&self.lats, &other.lats)
    }
}

impl Eq for GridDescriptor {}

impl Hash for GridDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.lons.len().hash(state);
        for lon in &self.lons {
            lon.to_bits().hash(state);
        }
        self.lats.len().hash(state);
        for lat in &self.lats {
            lat.to_bits().hash(state);
        }
    }
}
