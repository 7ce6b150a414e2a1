//! The `fires` subcommand: fire detections near each glacier.

use crate::output::{write_fire_proximity_csv, FIRE_PROXIMITY_FILE};
use crate::sources::{load_fires, load_inventory};
use gda_core::GlacierFilter;
use gda_data::fire_proximity;
use log::info;
use std::path::Path;

pub fn run_fires(inventory: &Path, fires: &Path, output: &Path, buffer_km: f64, min_area: f64) -> anyhow::Result<()> {
    let filter = GlacierFilter {
        min_area_km2: min_area,
        ..GlacierFilter::default()
    };
    let registry = load_inventory(inventory)?.filter(&filter);
    let points = load_fires(fires)?;

    let nearby = fire_proximity(&registry, &points, buffer_km);
    std::fs::create_dir_all(output)?;
    write_fire_proximity_csv(&output.join(FIRE_PROXIMITY_FILE), &nearby)?;

    if let Some(closest) = nearby.iter().min_by(|a, b| a.min_distance_km.total_cmp(&b.min_distance_km)) {
        info!(
            "Closest fire activity: {} ({}) with {} fires, nearest {:.1} km",
            closest.glacier_name, closest.glacier_id, closest.n_fires, closest.min_distance_km
        );
    }
    Ok(())
}
