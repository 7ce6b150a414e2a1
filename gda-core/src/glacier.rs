use crate::error::{GdaError, Result};
use crate::geometry::{parse_wkt_polygon, Outline};
use geo::Polygon;
use csv::ReaderBuilder;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A glacier outline with its static inventory attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Glacier {
    /// Inventory identifier (e.g. "RGI60-02.03411")
    pub id: String,
    /// Human-readable name, "Unknown" when the inventory has none
    pub name: String,
    /// Area in km²
    pub area_km2: f64,
    /// Median (mean) surface elevation in metres
    pub zmed: f64,
    /// Terminus (minimum) elevation in metres
    pub zmin: f64,
    /// Centre longitude in decimal degrees
    pub cen_lon: f64,
    /// Centre latitude in decimal degrees
    pub cen_lat: f64,
    pub polygon: Polygon<f64>,
}

/// Selection criteria applied to an inventory before analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlacierFilter {
    /// Keep glaciers with at least this area (km²)
    pub min_area_km2: f64,
    /// Drop glaciers whose median elevation exceeds this (m)
    pub max_elevation: Option<f64>,
    /// Drop glaciers centred east of this longitude
    pub max_center_lon: Option<f64>,
}

impl Default for GlacierFilter {
    fn default() -> Self {
        GlacierFilter {
            min_area_km2: 1.0,
            max_elevation: None,
            max_center_lon: None,
        }
    }
}

impl GlacierFilter {
    pub fn accepts(&self, glacier: &Glacier) -> bool {
        glacier.area_km2 >= self.min_area_km2
            && self.max_elevation.map_or(true, |max| glacier.zmed <= max)
            && self.max_center_lon.map_or(true, |max| glacier.cen_lon < max)
    }
}

/// Immutable, ordered set of glaciers keyed by identifier.
///
/// Registry order is load order. Downstream components hold glacier
/// identifiers or registry positions, never copies of the outlines.
#[derive(Debug, Clone, Default)]
pub struct GlacierRegistry {
    glaciers: Vec<Glacier>,
    positions: HashMap<String, usize>,
}

fn parse_number(field: Option<&str>, column: &str, row: usize) -> Result<f64> {
    let raw = field.unwrap_or("").trim();
    raw.parse::<f64>().map_err(|_| {
        GdaError::Configuration(format!(
            "inventory row {row}: column {column} is not a number: {raw:?}"
        ))
    })
}

fn parse_optional_number(field: Option<&str>) -> Option<f64> {
    field.and_then(|s| s.trim().parse::<f64>().ok())
}

impl GlacierRegistry {
    /// Build a registry, rejecting duplicate identifiers.
    pub fn from_glaciers(glaciers: Vec<Glacier>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(glaciers.len());
        for (i, glacier) in glaciers.iter().enumerate() {
            if positions.insert(glacier.id.clone(), i).is_some() {
                return Err(GdaError::Configuration(format!(
                    "duplicate glacier identifier {}",
                    glacier.id
                )));
            }
        }
        Ok(GlacierRegistry {
            glaciers,
            positions,
        })
    }

    /// Parse a glacier inventory CSV string.
    ///
    /// Expected format (with headers): `id,name,area_km2,zmed,zmin,cen_lon,cen_lat,wkt`
    ///
    /// Empty `cen_lon`/`cen_lat` fall back to the mean of the outline's
    /// exterior vertices; an empty name becomes "Unknown".
    ///
    /// # Example CSV
    /// ```text
    /// id,name,area_km2,zmed,zmin,cen_lon,cen_lat,wkt
    /// RGI60-02.03411,Athabasca,6.1,2700,1950,-117.25,52.18,"POLYGON ((-117.3 52.15, -117.2 52.15, -117.2 52.2, -117.3 52.2, -117.3 52.15))"
    /// ```
    pub fn parse_inventory_csv(csv_data: &str) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(csv_data.as_bytes());

        let mut glaciers = Vec::new();
        for (i, result) in rdr.records().enumerate() {
            let r = result?;
            let row = i + 2;
            let id = r.get(0).unwrap_or("").trim().to_string();
            if id.is_empty() {
                return Err(GdaError::Configuration(format!(
                    "inventory row {row}: empty identifier"
                )));
            }
            let name = match r.get(1).map(str::trim) {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => "Unknown".to_string(),
            };
            let area_km2 = parse_number(r.get(2), "area_km2", row)?;
            let zmed = parse_number(r.get(3), "zmed", row)?;
            let zmin = parse_optional_number(r.get(4)).unwrap_or(zmed);
            let polygon = parse_wkt_polygon(r.get(7).unwrap_or(""))?;
            let (fallback_lon, fallback_lat) = polygon.vertex_centroid();
            let cen_lon = parse_optional_number(r.get(5)).unwrap_or(fallback_lon);
            let cen_lat = parse_optional_number(r.get(6)).unwrap_or(fallback_lat);

            glaciers.push(Glacier {
                id,
                name,
                area_km2,
                zmed,
                zmin,
                cen_lon,
                cen_lat,
                polygon,
            });
        }
        info!("Loaded {} glaciers from inventory", glaciers.len());
        GlacierRegistry::from_glaciers(glaciers)
    }

    /// New registry with only the glaciers the filter accepts, order kept.
    pub fn filter(&self, criteria: &GlacierFilter) -> Self {
        let before = self.glaciers.len();
        let kept: Vec<Glacier> = self
            .glaciers
            .iter()
            .filter(|g| criteria.accepts(g))
            .cloned()
            .collect();
        info!("Glaciers filtered: {} -> {}", before, kept.len());
        let positions = kept
            .iter()
            .enumerate()
            .map(|(i, g)| (g.id.clone(), i))
            .collect();
        GlacierRegistry {
            glaciers: kept,
            positions,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Glacier> {
        self.positions.get(id).map(|&i| &self.glaciers[i])
    }

    pub fn glaciers(&self) -> &[Glacier] {
        &self.glaciers
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Glacier> {
        self.glaciers.iter()
    }

    pub fn len(&self) -> usize {
        self.glaciers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glaciers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"id,name,area_km2,zmed,zmin,cen_lon,cen_lat,wkt
RGI60-02.03411,Athabasca,6.1,2700,1950,-117.25,52.18,"POLYGON ((-117.3 52.15, -117.2 52.15, -117.2 52.2, -117.3 52.2, -117.3 52.15))"
RGI60-02.00001,,0.4,3100,,,,"POLYGON ((-118 51, -117.9 51, -117.9 51.1, -118 51.1, -118 51))"
RGI60-02.00002,Saskatchewan,30.2,4200,1800,-114.9,52.13,"POLYGON ((-115 52.1, -114.8 52.1, -114.8 52.2, -115 52.2, -115 52.1))"
"#;

    #[test]
    fn test_parse_inventory() {
        let registry = GlacierRegistry::parse_inventory_csv(INVENTORY).unwrap();
        assert_eq!(registry.len(), 3);
        let athabasca = registry.get("RGI60-02.03411").unwrap();
        assert_eq!(athabasca.name, "Athabasca");
        assert_eq!(athabasca.zmin, 1950.0);

        let unnamed = registry.get("RGI60-02.00001").unwrap();
        assert_eq!(unnamed.name, "Unknown");
        assert_eq!(unnamed.zmin, 3100.0);
        assert!((unnamed.cen_lon - -117.95).abs() < 1e-9);
        assert!((unnamed.cen_lat - 51.05).abs() < 1e-9);
        assert_eq!(registry.glaciers()[2].id, "RGI60-02.00002");
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let registry = GlacierRegistry::parse_inventory_csv(INVENTORY).unwrap();
        let mut glaciers = registry.glaciers().to_vec();
        glaciers.push(glaciers[0].clone());
        assert!(GlacierRegistry::from_glaciers(glaciers).is_err());
    }

    #[test]
    fn test_filter_by_area_elevation_and_region() {
        let registry = GlacierRegistry::parse_inventory_csv(INVENTORY).unwrap();

        let by_area = registry.filter(&GlacierFilter::default());
        assert_eq!(by_area.len(), 2);
        assert!(by_area.get("RGI60-02.00001").is_none());
        assert_eq!(by_area.glaciers()[1].id, "RGI60-02.00002");
        assert_eq!(by_area.get("RGI60-02.00002").map(|g| g.zmed), Some(4200.0));

        let criteria = GlacierFilter {
            min_area_km2: 0.0,
            max_elevation: Some(4000.0),
            max_center_lon: Some(-115.0),
        };
        let filtered = registry.filter(&criteria);
        let ids: Vec<&str> = filtered.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["RGI60-02.03411", "RGI60-02.00001"]);
    }
}
