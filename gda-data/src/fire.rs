//! Active-fire detections near glaciers.

use chrono::NaiveDate;
use gda_core::geometry::EARTH_RADIUS_KM;
use gda_core::{GlacierRegistry, Outline};
use geo::BoundingRect;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Default search radius around each glacier outline (km).
pub const DEFAULT_BUFFER_KM: f64 = 200.0;

/// One satellite fire detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FirePoint {
    pub lon: f64,
    pub lat: f64,
    pub date: Option<NaiveDate>,
    /// Fire radiative power (MW)
    pub frp: Option<f64>,
}

/// Fires within the buffer of one glacier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireProximity {
    pub glacier_id: String,
    pub glacier_name: String,
    pub n_fires: usize,
    pub min_distance_km: f64,
    pub mean_distance_km: f64,
    /// `None` when no nearby fire reports FRP
    pub total_frp: Option<f64>,
    pub fire_dates: Vec<NaiveDate>,
}

/// Summarise fires within `buffer_km` of each glacier, in registry order.
///
/// Glaciers without nearby fires are omitted.
pub fn fire_proximity(registry: &GlacierRegistry, fires: &[FirePoint], buffer_km: f64) -> Vec<FireProximity> {
    // degrees of latitude spanned by the buffer, for a cheap prefilter
    let lat_margin = (buffer_km / EARTH_RADIUS_KM).to_degrees();

    let results: Vec<FireProximity> = registry
        .glaciers()
        .par_iter()
        .filter_map(|glacier| {
            let bbox = glacier.polygon.bounding_rect()?;
            let (lo, hi) = (bbox.min(), bbox.max());
            let max_abs_lat = lo.y.abs().max(hi.y.abs()) + lat_margin;
            let lon_margin = if max_abs_lat >= 90.0 {
                180.0
            } else {
                lat_margin / max_abs_lat.to_radians().cos()
            };

            let nearby: Vec<(f64, &FirePoint)> = fires
                .iter()
                .filter(|f| {
                    f.lat >= lo.y - lat_margin
                        && f.lat <= hi.y + lat_margin
                        && f.lon >= lo.x - lon_margin
                        && f.lon <= hi.x + lon_margin
                })
                .map(|f| (glacier.polygon.distance_km(f.lon, f.lat), f))
                .filter(|(d, _)| *d <= buffer_km)
                .collect();
            if nearby.is_empty() {
                return None;
            }

            let n_fires = nearby.len();
            let min_distance_km = nearby.iter().map(|(d, _)| *d).fold(f64::INFINITY, f64::min);
            let mean_distance_km = nearby.iter().map(|(d, _)| *d).sum::<f64>() / n_fires as f64;
            let frps: Vec<f64> = nearby.iter().filter_map(|(_, f)| f.frp).collect();
            let total_frp = (!frps.is_empty()).then(|| frps.iter().sum());
            let mut fire_dates: Vec<NaiveDate> = nearby.iter().filter_map(|(_, f)| f.date).collect();
            fire_dates.sort();
            fire_dates.dedup();

            Some(FireProximity {
                glacier_id: glacier.id.clone(),
                glacier_name: glacier.name.clone(),
                n_fires,
                min_distance_km,
                mean_distance_km,
                total_frp,
                fire_dates,
            })
        })
        .collect();

    info!(
        "{} of {} glaciers have fires within {} km",
        results.len(),
        registry.len(),
        buffer_km
    );
    results
}
