//! Grid-cell to glacier assignment.
//!
//! A `MaskIndex` labels every cell of a grid with at most one glacier. It is
//! built once per grid geometry and shared read-only by extraction.

use gda_core::geometry::rect;
use gda_core::{GdaError, GlacierRegistry, GridDescriptor};
use geo::{BoundingRect, Contains, Intersects, Point};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a cell is matched against a glacier outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellMatch {
    /// Cell centre lies inside the outline
    #[default]
    Center,
    /// Cell footprint touches the outline
    Footprint,
}

/// A cell claimed by more than one glacier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellConflict {
    pub row: usize,
    pub col: usize,
    /// Identifier that keeps the cell (lexicographically smallest)
    pub kept: String,
    pub dropped: String,
}

impl From<&CellConflict> for GdaError {
    fn from(c: &CellConflict) -> Self {
        GdaError::GeometryConflict {
            row: c.row,
            col: c.col,
            kept: c.kept.clone(),
            dropped: c.dropped.clone(),
        }
    }
}

/// Cell labels for one grid geometry.
///
/// Overlapping outlines are resolved in favour of the lexicographically
/// smallest glacier identifier; every such cell is kept in `conflicts`.
#[derive(Debug, Clone)]
pub struct MaskIndex {
    grid: GridDescriptor,
    mode: CellMatch,
    glacier_ids: Vec<String>,
    labels: Vec<Option<u32>>,
    cells: Vec<Vec<usize>>,
    conflicts: Vec<CellConflict>,
}

/// Indices whose centre lies in [lo, hi].
fn centers_within(coords: &[f64], lo: f64, hi: f64) -> Vec<usize> {
    coords
        .iter()
        .enumerate()
        .filter(|(_, &c)| c >= lo && c <= hi)
        .map(|(i, _)| i)
        .collect()
}

/// Indices whose footprint overlaps [lo, hi].
fn footprints_within(footprints: &[(f64, f64)], lo: f64, hi: f64) -> Vec<usize> {
    footprints
        .iter()
        .enumerate()
        .filter(|(_, &(a, b))| a <= hi && b >= lo)
        .map(|(i, _)| i)
        .collect()
}

impl MaskIndex {
    /// Label the cells of `grid` with the glaciers of `registry`.
    pub fn build(grid: &GridDescriptor, registry: &GlacierRegistry, mode: CellMatch) -> Self {
        let lon_fp = grid.lon_footprints();
        let lat_fp = grid.lat_footprints();
        let extent = grid.extent();

        // candidate hits per glacier, independent of each other
        let hits: Vec<Vec<usize>> = registry
            .glaciers()
            .par_iter()
            .map(|glacier| {
                let Some(bbox) = glacier.polygon.bounding_rect() else {
                    return Vec::new();
                };
                if !bbox.intersects(&extent) {
                    return Vec::new();
                }
                let (lo, hi) = (bbox.min(), bbox.max());
                let (cols, rows) = match mode {
                    CellMatch::Center => (
                        centers_within(grid.lons(), lo.x, hi.x),
                        centers_within(grid.lats(), lo.y, hi.y),
                    ),
                    CellMatch::Footprint => (
                        footprints_within(&lon_fp, lo.x, hi.x),
                        footprints_within(&lat_fp, lo.y, hi.y),
                    ),
                };
                let mut found = Vec::new();
                for &row in &rows {
                    for &col in &cols {
                        let inside = match mode {
                            CellMatch::Center => {
                                let (lon, lat) = grid.cell_center(row, col);
                                glacier.polygon.contains(&Point::new(lon, lat))
                            }
                            CellMatch::Footprint => {
                                let cell = rect(lon_fp[col].0, lat_fp[row].0, lon_fp[col].1, lat_fp[row].1);
                                glacier.polygon.intersects(&cell)
                            }
                        };
                        if inside {
                            found.push(grid.index(row, col));
                        }
                    }
                }
                found
            })
            .collect();

        let glacier_ids: Vec<String> = registry.iter().map(|g| g.id.clone()).collect();
        let mut labels: Vec<Option<u32>> = vec![None; grid.len()];
        let mut conflicts = Vec::new();
        for (position, found) in hits.iter().enumerate() {
            for &cell in found {
                match labels[cell] {
                    None => labels[cell] = Some(position as u32),
                    Some(existing) => {
                        let existing = existing as usize;
                        let (kept, dropped) = if glacier_ids[position] < glacier_ids[existing] {
                            labels[cell] = Some(position as u32);
                            (position, existing)
                        } else {
                            (existing, position)
                        };
                        let (row, col) = grid.row_col(cell);
                        conflicts.push(CellConflict {
                            row,
                            col,
                            kept: glacier_ids[kept].clone(),
                            dropped: glacier_ids[dropped].clone(),
                        });
                    }
                }
            }
        }

        let mut cells: Vec<Vec<usize>> = vec![Vec::new(); glacier_ids.len()];
        for (cell, label) in labels.iter().enumerate() {
            if let Some(position) = label {
                cells[*position as usize].push(cell);
            }
        }

        for conflict in &conflicts {
            debug!("{}", GdaError::from(conflict));
        }
        if !conflicts.is_empty() {
            warn!(
                "{} grid cells claimed by overlapping glacier outlines; kept smallest identifier",
                conflicts.len()
            );
        }
        for (id, _) in glacier_ids.iter().zip(&cells).filter(|(_, c)| c.is_empty()) {
            debug!("{}", GdaError::EmptyCoverage(id.clone()));
        }
        let covered = cells.iter().filter(|c| !c.is_empty()).count();
        info!(
            "Built mask for {}x{} grid ({:016x}): {}/{} glaciers covered",
            grid.n_rows(),
            grid.n_cols(),
            grid.fingerprint(),
            covered,
            glacier_ids.len()
        );

        MaskIndex {
            grid: grid.clone(),
            mode,
            glacier_ids,
            labels,
            cells,
            conflicts,
        }
    }

    pub fn grid(&self) -> &GridDescriptor {
        &self.grid
    }

    pub fn mode(&self) -> CellMatch {
        self.mode
    }

    /// Glacier identifiers in registry order.
    pub fn glacier_ids(&self) -> &[String] {
        &self.glacier_ids
    }

    /// Identifier assigned to a cell, if any.
    pub fn label(&self, row: usize, col: usize) -> Option<&str> {
        self.labels[self.grid.index(row, col)].map(|p| self.glacier_ids[p as usize].as_str())
    }

    /// Flat cell indices of the glacier at a registry position.
    pub fn cells_of(&self, position: usize) -> &[usize] {
        &self.cells[position]
    }

    /// Number of cells assigned to a glacier identifier.
    pub fn cell_count(&self, id: &str) -> usize {
        self.glacier_ids
            .iter()
            .position(|g| g == id)
            .map_or(0, |p| self.cells[p].len())
    }

    /// Glaciers with no assigned cells on this grid.
    pub fn uncovered(&self) -> impl Iterator<Item = &str> {
        self.glacier_ids
            .iter()
            .zip(&self.cells)
            .filter(|(_, c)| c.is_empty())
            .map(|(id, _)| id.as_str())
    }

    pub fn conflicts(&self) -> &[CellConflict] {
        &self.conflicts
    }

    pub fn assigned_cells(&self) -> usize {
        self.labels.iter().filter(|l| l.is_some()).count()
    }
}

/// Holds the mask for the most recently seen grid geometry.
///
/// Owned by the orchestrator; a new grid (compared by coordinate values)
/// replaces the cached mask.
#[derive(Debug)]
pub struct MaskCache {
    mode: CellMatch,
    current: Option<Arc<MaskIndex>>,
    builds: usize,
}

impl MaskCache {
    pub fn new(mode: CellMatch) -> Self {
        MaskCache {
            mode,
            current: None,
            builds: 0,
        }
    }

    /// Mask for `grid`, building it if the grid differs from the cached one.
    pub fn get_or_build(&mut self, grid: &GridDescriptor, registry: &GlacierRegistry) -> Arc<MaskIndex> {
        if let Some(mask) = &self.current {
            if mask.grid() == grid {
                return Arc::clone(mask);
            }
            info!("Grid geometry changed, rebuilding mask");
        }
        let mask = Arc::new(MaskIndex::build(grid, registry, self.mode));
        self.builds += 1;
        self.current = Some(Arc::clone(&mask));
        mask
    }

    /// Number of masks built so far.
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn current(&self) -> Option<&Arc<MaskIndex>> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gda_core::geometry::rectangle;
    use gda_core::{Glacier, Outline};
    use geo::Polygon;

    fn glacier(id: &str, polygon: Polygon<f64>) -> Glacier {
        let (cen_lon, cen_lat) = polygon.vertex_centroid();
        Glacier {
            id: id.to_string(),
            name: id.to_string(),
            area_km2: 1.0,
            zmed: 2500.0,
            zmin: 2000.0,
            cen_lon,
            cen_lat,
            polygon,
        }
    }

    fn scenario_grid() -> GridDescriptor {
        GridDescriptor::linspace((-120.0, -119.0), 10, (50.0, 51.0), 10).unwrap()
    }

    #[test]
    fn test_central_block_assignment() {
        let grid = scenario_grid();
        let registry = GlacierRegistry::from_glaciers(vec![glacier(
            "G1",
            rectangle(-119.7, 50.3, -119.4, 50.6),
        )])
        .unwrap();
        let mask = MaskIndex::build(&grid, &registry, CellMatch::Center);
        assert_eq!(mask.cell_count("G1"), 9);
        for row in 0..10 {
            for col in 0..10 {
                let expected = (3..=5).contains(&row) && (3..=5).contains(&col);
                assert_eq!(mask.label(row, col).is_some(), expected, "cell ({row}, {col})");
            }
        }
    }

    #[test]
    fn test_footprint_mode_claims_touching_cells() {
        let grid = scenario_grid();
        let registry = GlacierRegistry::from_glaciers(vec![glacier(
            "G1",
            rectangle(-119.75, 50.25, -119.35, 50.65),
        )])
        .unwrap();
        let center = MaskIndex::build(&grid, &registry, CellMatch::Center);
        let footprint = MaskIndex::build(&grid, &registry, CellMatch::Footprint);
        assert_eq!(center.cell_count("G1"), 9);
        assert_eq!(footprint.cell_count("G1"), 25);
        assert_eq!(footprint.mode(), CellMatch::Footprint);
    }

    #[test]
    fn test_overlap_goes_to_smallest_identifier() {
        let grid = scenario_grid();
        // registered first, but larger identifier
        let b = glacier("RGI-B", rectangle(-119.7, 50.3, -119.4, 50.6));
        let a = glacier("RGI-A", rectangle(-119.5, 50.3, -119.2, 50.6));
        let registry = GlacierRegistry::from_glaciers(vec![b, a]).unwrap();
        let mask = MaskIndex::build(&grid, &registry, CellMatch::Center);

        // column 5 (lon -119.444) lies in both outlines
        for row in 3..=5 {
            assert_eq!(mask.label(row, 5), Some("RGI-A"));
            assert_eq!(mask.label(row, 3), Some("RGI-B"));
        }
        assert_eq!(mask.conflicts().len(), 3);
        assert!(mask.conflicts().iter().all(|c| c.kept == "RGI-A" && c.dropped == "RGI-B"));
    }

    #[test]
    fn test_every_cell_has_at_most_one_label() {
        let grid = scenario_grid();
        let glaciers = (0..6)
            .map(|i| {
                let offset = i as f64 * 0.1;
                glacier(
                    &format!("G{i}"),
                    rectangle(-119.9 + offset, 50.1, -119.5 + offset, 50.9),
                )
            })
            .collect();
        let registry = GlacierRegistry::from_glaciers(glaciers).unwrap();
        let mask = MaskIndex::build(&grid, &registry, CellMatch::Footprint);
        let listed: usize = (0..registry.len()).map(|p| mask.cells_of(p).len()).sum();
        assert_eq!(listed, mask.assigned_cells());
        let mut seen = vec![false; grid.len()];
        for p in 0..registry.len() {
            for &cell in mask.cells_of(p) {
                assert!(!seen[cell], "cell {cell} listed twice");
                seen[cell] = true;
            }
        }
    }

    #[test]
    fn test_glacier_outside_grid_has_no_cells() {
        let grid = scenario_grid();
        let registry = GlacierRegistry::from_glaciers(vec![glacier(
            "FAR",
            rectangle(10.0, 10.0, 11.0, 11.0),
        )])
        .unwrap();
        let mask = MaskIndex::build(&grid, &registry, CellMatch::Footprint);
        assert_eq!(mask.cell_count("FAR"), 0);
        assert_eq!(mask.uncovered().collect::<Vec<_>>(), vec!["FAR"]);
    }

    #[test]
    fn test_empty_registry_yields_unassigned_mask() {
        let grid = scenario_grid();
        let mask = MaskIndex::build(&grid, &GlacierRegistry::default(), CellMatch::Center);
        assert_eq!(mask.assigned_cells(), 0);
    }

    #[test]
    fn test_cache_rebuilds_only_on_geometry_change() {
        let registry = GlacierRegistry::default();
        let mut cache = MaskCache::new(CellMatch::Center);
        let first = cache.get_or_build(&scenario_grid(), &registry);
        let again = cache.get_or_build(&scenario_grid(), &registry);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.builds(), 1);

        let finer = GridDescriptor::linspace((-120.0, -119.0), 20, (50.0, 51.0), 20).unwrap();
        cache.get_or_build(&finer, &registry);
        assert_eq!(cache.builds(), 2);
        assert_eq!(cache.current().map(|m| m.grid().len()), Some(400));
    }
}
