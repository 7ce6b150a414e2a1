//! Glacier outline helpers on top of `geo`, in geographic (lon, lat) degrees.
//!
//! Outlines are small relative to the grid spacing of the atmospheric model,
//! so containment and intersection are evaluated in the lon/lat plane.
//! Distances for fire proximity are great-circle.

use crate::error::{GdaError, Result};
use geo::{
    coord, Closest, ClosestPoint, Contains, CoordsIter, HaversineDistance, LineString, Point,
    Polygon, Rect,
};
use wkt::TryFromWkt;

/// Mean Earth radius (km), IUGG.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Axis-aligned rectangle in lon/lat degrees.
pub fn rect(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Rect<f64> {
    Rect::new(coord! { x: min_lon, y: min_lat }, coord! { x: max_lon, y: max_lat })
}

/// Rectangular outline, mostly for fixtures.
pub fn rectangle(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Polygon<f64> {
    rect(min_lon, min_lat, max_lon, max_lat).to_polygon()
}

fn check_ring(ring: &LineString<f64>, which: &str) -> Result<()> {
    if ring.coords().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(GdaError::Geometry(format!("{which} ring has non-finite vertex")));
    }
    // closed rings repeat the first vertex
    if ring.0.len() < 4 {
        return Err(GdaError::Geometry(format!(
            "{which} ring needs at least 3 vertices, got {}",
            ring.0.len().saturating_sub(1)
        )));
    }
    Ok(())
}

/// Parse a WKT `POLYGON ((x y, ...), (x y, ...))` with lon/lat ordinates.
pub fn parse_wkt_polygon(text: &str) -> Result<Polygon<f64>> {
    let polygon = Polygon::<f64>::try_from_wkt_str(text.trim())
        .map_err(|e| GdaError::Geometry(format!("{e}: {:.40}", text.trim())))?;
    check_ring(polygon.exterior(), "exterior")?;
    for hole in polygon.interiors() {
        check_ring(hole, "interior")?;
    }
    Ok(polygon)
}

/// Great-circle distance in km between two (lon, lat) points.
pub fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    Point::new(lon1, lat1).haversine_distance(&Point::new(lon2, lat2)) / 1000.0
}

/// Glacier-specific queries on an outline.
pub trait Outline {
    /// Mean of the exterior vertices as (lon, lat), closing vertex excluded.
    fn vertex_centroid(&self) -> (f64, f64);

    /// Great-circle distance (km) from a point to the outline; zero inside.
    fn distance_km(&self, lon: f64, lat: f64) -> f64;
}

impl Outline for Polygon<f64> {
    fn vertex_centroid(&self) -> (f64, f64) {
        let ring = &self.exterior().0;
        let open = if ring.len() > 1 && ring.first() == ring.last() {
            &ring[..ring.len() - 1]
        } else {
            &ring[..]
        };
        let n = open.len().max(1) as f64;
        let (sx, sy) = open.iter().fold((0.0, 0.0), |acc, c| (acc.0 + c.x, acc.1 + c.y));
        (sx / n, sy / n)
    }

    fn distance_km(&self, lon: f64, lat: f64) -> f64 {
        let point = Point::new(lon, lat);
        if self.contains(&point) {
            return 0.0;
        }
        match self.closest_point(&point) {
            Closest::Intersection(_) => 0.0,
            Closest::SinglePoint(nearest) => haversine_km(lon, lat, nearest.x(), nearest.y()),
            // equidistant from several edges: any vertex bound is close enough
            Closest::Indeterminate => self
                .coords_iter()
                .map(|c| haversine_km(lon, lat, c.x, c.y))
                .fold(f64::INFINITY, f64::min),
        }
    }
}
