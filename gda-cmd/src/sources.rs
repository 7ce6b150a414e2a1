//! File readers feeding the analysis: gridded slices, inventory, albedo
//! and fire detections.

use anyhow::Context;
use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use gda_core::{FieldSlice, GdaError, GlacierRegistry, GridDescriptor, Variable};
use gda_data::{AlbedoTable, FirePoint, SliceSource};
use gda_utils::dates::{format_slice_stamp, parse_date};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Read a text file, gunzipping it when the name ends in `.gz`.
pub fn read_text(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut text = String::new();
    if path.extension().is_some_and(|ext| ext == "gz") {
        GzDecoder::new(file).read_to_string(&mut text)?;
    } else {
        let mut file = file;
        file.read_to_string(&mut text)?;
    }
    Ok(text)
}

/// Directory of hourly model output, one `YYYYMMDDHH_000.csv[.gz]` per slice.
#[derive(Debug, Clone)]
pub struct CsvSliceSource {
    dir: PathBuf,
}

impl CsvSliceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvSliceSource { dir: dir.into() }
    }

    /// Existing file for `timestamp`, plain CSV preferred over gzip.
    pub fn slice_path(&self, timestamp: NaiveDateTime) -> Option<PathBuf> {
        let stem = format!("{}_000.csv", format_slice_stamp(&timestamp));
        [stem.clone(), format!("{stem}.gz")]
            .into_iter()
            .map(|name| self.dir.join(name))
            .find(|path| path.is_file())
    }
}

impl SliceSource for CsvSliceSource {
    fn load(&self, timestamp: NaiveDateTime) -> gda_core::Result<FieldSlice> {
        let path = self.slice_path(timestamp).ok_or(GdaError::MissingSource(timestamp))?;
        debug!("Reading {}", path.display());
        let text = read_text(&path)?;
        parse_slice_csv(timestamp, &text)
    }
}

/// Parse a long-format slice with header `lat,lon,<variable>...`.
///
/// The grid is the sorted set of distinct coordinates; cells without a row
/// and empty values are NaN. Columns naming an unknown variable are dropped.
pub fn parse_slice_csv(timestamp: NaiveDateTime, csv_data: &str) -> gda_core::Result<FieldSlice> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let headers = rdr.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
    let (lat_col, lon_col) = match (column("lat"), column("lon")) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => {
            return Err(GdaError::MalformedGrid(format!(
                "slice {timestamp} has no lat/lon columns"
            )))
        }
    };

    let mut variables = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        if i == lat_col || i == lon_col {
            continue;
        }
        match header.parse::<Variable>() {
            Ok(v) => variables.push((i, v)),
            Err(_) => warn!("Slice {}: ignoring unknown column {:?}", timestamp, header),
        }
    }

    let mut rows: Vec<(f64, f64, Vec<f64>)> = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        let coord = |col: usize, name: &str| {
            record
                .get(col)
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .ok_or_else(|| GdaError::MalformedGrid(format!("slice {timestamp} row {}: bad {name}", i + 2)))
        };
        let lat = coord(lat_col, "lat")?;
        let lon = coord(lon_col, "lon")?;
        let values = variables
            .iter()
            .map(|&(col, _)| {
                record
                    .get(col)
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .unwrap_or(f64::NAN)
            })
            .collect();
        rows.push((lat, lon, values));
    }

    let distinct = |pick: fn(&(f64, f64, Vec<f64>)) -> f64| {
        let mut axis: Vec<f64> = rows.iter().map(pick).collect();
        axis.sort_by(f64::total_cmp);
        axis.dedup();
        axis
    };
    let lats = distinct(|r| r.0);
    let lons = distinct(|r| r.1);
    let grid = GridDescriptor::new(lons.clone(), lats.clone())?;

    let mut fields = vec![vec![f64::NAN; grid.len()]; variables.len()];
    for (lat, lon, values) in &rows {
        // both coordinates come from the axes built above
        let (Ok(row), Ok(col)) = (
            lats.binary_search_by(|v| v.total_cmp(lat)),
            lons.binary_search_by(|v| v.total_cmp(lon)),
        ) else {
            continue;
        };
        let cell = grid.index(row, col);
        for (field, value) in fields.iter_mut().zip(values) {
            field[cell] = *value;
        }
    }

    let mut slice = FieldSlice::new(timestamp, grid);
    for ((_, variable), values) in variables.into_iter().zip(fields) {
        slice.insert(variable, values)?;
    }
    Ok(slice)
}

/// Load and parse a glacier inventory CSV.
pub fn load_inventory(path: &Path) -> anyhow::Result<GlacierRegistry> {
    let text = read_text(path).with_context(|| format!("Failed to read inventory {}", path.display()))?;
    GlacierRegistry::parse_inventory_csv(&text)
        .with_context(|| format!("Failed to parse inventory {}", path.display()))
}

/// Parse albedo observations with header `glacier_id,date,albedo`.
///
/// An empty albedo marks a day without a usable retrieval.
pub fn parse_albedo_csv(csv_data: &str) -> anyhow::Result<AlbedoTable> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let mut table = AlbedoTable::new();
    let mut rows = 0;
    for result in rdr.records() {
        let record = result?;
        let glacier_id = record.get(0).unwrap_or("").trim();
        let date = parse_date(record.get(1).unwrap_or(""))?;
        let albedo = record.get(2).and_then(|s| s.trim().parse::<f64>().ok());
        if glacier_id.is_empty() {
            continue;
        }
        table.insert(glacier_id, date, albedo);
        rows += 1;
    }
    info!("Loaded {} albedo observations for {} glaciers", rows, table.len());
    Ok(table)
}

pub fn load_albedo(path: &Path) -> anyhow::Result<AlbedoTable> {
    let text = read_text(path).with_context(|| format!("Failed to read albedo {}", path.display()))?;
    parse_albedo_csv(&text).with_context(|| format!("Failed to parse albedo {}", path.display()))
}

/// Parse fire detections with header `lat,lon,date,frp`; date and FRP may be empty.
pub fn parse_fire_csv(csv_data: &str) -> anyhow::Result<Vec<FirePoint>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let headers = rdr.headers()?.clone();
    let columns: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_ascii_lowercase(), i))
        .collect();
    let lat_col = *columns.get("lat").context("fire CSV has no lat column")?;
    let lon_col = *columns.get("lon").context("fire CSV has no lon column")?;

    let mut fires = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let number = |col: Option<&usize>| {
            col.and_then(|&c| record.get(c))
                .and_then(|s| s.trim().parse::<f64>().ok())
        };
        let (Some(lat), Some(lon)) = (number(Some(&lat_col)), number(Some(&lon_col))) else {
            continue;
        };
        let date = columns
            .get("date")
            .and_then(|&c| record.get(c))
            .and_then(|s| parse_date(s).ok());
        fires.push(FirePoint {
            lon,
            lat,
            date,
            frp: number(columns.get("frp")),
        });
    }
    info!("Loaded {} fire detections", fires.len());
    Ok(fires)
}

pub fn load_fires(path: &Path) -> anyhow::Result<Vec<FirePoint>> {
    let text = read_text(path).with_context(|| format!("Failed to read fires {}", path.display()))?;
    parse_fire_csv(&text).with_context(|| format!("Failed to parse fires {}", path.display()))
}

/// Two index-aligned columns of a CSV, empty or unparsable cells as `None`.
pub fn parse_series_columns(
    csv_data: &str,
    x_column: &str,
    y_column: &str,
) -> anyhow::Result<(Vec<Option<f64>>, Vec<Option<f64>>)> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let headers = rdr.headers()?.clone();
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .with_context(|| format!("column {name:?} not found"))
    };
    let (xi, yi) = (find(x_column)?, find(y_column)?);

    let mut x = Vec::new();
    let mut y = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let cell = |i: usize| record.get(i).and_then(|s| s.trim().parse::<f64>().ok());
        x.push(cell(xi));
        y.push(cell(yi));
    }
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use gda_data::AlbedoSource;
    use std::io::Write;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 7, 15).unwrap().and_hms_opt(6, 0, 0).unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gda-cmd-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const SLICE: &str = "\
lat,lon,BC_dep,PM2.5_dep,SO4_dep
50.5,-119.5,4.0,,9
50.0,-120.0,1.0,10.0,9
50.0,-119.5,2.0,20.0,9
";

    #[test]
    fn test_parse_slice_builds_sorted_grid() {
        let slice = parse_slice_csv(stamp(), SLICE).unwrap();
        let grid = slice.grid();
        assert_eq!(grid.lats(), &[50.0, 50.5]);
        assert_eq!(grid.lons(), &[-120.0, -119.5]);

        let bc = slice.field(Variable::BcDep).unwrap();
        assert_eq!(bc[grid.index(0, 0)], 1.0);
        assert_eq!(bc[grid.index(0, 1)], 2.0);
        assert_eq!(bc[grid.index(1, 1)], 4.0);
        // no row for (50.5, -120.0)
        assert!(bc[grid.index(1, 0)].is_nan());

        let pm25 = slice.field(Variable::Pm25Dep).unwrap();
        assert!(pm25[grid.index(1, 1)].is_nan());
        assert_eq!(slice.variables().count(), 2);
    }

    #[test]
    fn test_parse_slice_without_coordinates_is_malformed() {
        let err = parse_slice_csv(stamp(), "x,y,BC_dep\n1,2,3\n").unwrap_err();
        assert!(matches!(err, GdaError::MalformedGrid(_)));
    }

    #[test]
    fn test_slice_source_reads_plain_and_gzip() {
        let dir = temp_dir("slices");
        std::fs::write(dir.join("2023071506_000.csv"), SLICE).unwrap();
        let later = stamp() + chrono::Duration::hours(1);
        let mut encoder = GzEncoder::new(File::create(dir.join("2023071507_000.csv.gz")).unwrap(), Compression::default());
        encoder.write_all(SLICE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let source = CsvSliceSource::new(&dir);
        let plain = source.load(stamp()).unwrap();
        let gz = source.load(later).unwrap();
        assert_eq!(plain.grid(), gz.grid());
        assert_eq!(gz.timestamp, later);

        let absent = stamp() + chrono::Duration::hours(2);
        assert!(matches!(source.load(absent), Err(GdaError::MissingSource(ts)) if ts == absent));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_parse_albedo_csv() {
        let table = parse_albedo_csv(
            "glacier_id,date,albedo\nRGI-A,2023-07-01,0.62\nRGI-A,2023-07-02,\nRGI-B,2023-07-01,0.55\n",
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        let a = table.daily_albedo("RGI-A").unwrap();
        assert_eq!(a.len(), 2);
        assert_relative_eq!(a[&NaiveDate::from_ymd_opt(2023, 7, 1).unwrap()].unwrap(), 0.62);
        assert_eq!(a[&NaiveDate::from_ymd_opt(2023, 7, 2).unwrap()], None);
    }

    #[test]
    fn test_parse_fire_csv_optional_columns() {
        let fires = parse_fire_csv("lat,lon,date,frp\n52.1,-117.3,2023-08-02,12.5\n52.0,-117.1,,\nbad,row,,\n").unwrap();
        assert_eq!(fires.len(), 2);
        assert_eq!(fires[0].date, NaiveDate::from_ymd_opt(2023, 8, 2));
        assert_eq!(fires[0].frp, Some(12.5));
        assert_eq!(fires[1].date, None);
        assert_eq!(fires[1].frp, None);

        let bare = parse_fire_csv("lon,lat\n-117.3,52.1\n").unwrap();
        assert_eq!(bare[0].lat, 52.1);
    }

    #[test]
    fn test_parse_series_columns() {
        let (x, y) = parse_series_columns("day,dep,dalb\n1,0.5,-0.01\n2,,0.02\n", "dep", "dalb").unwrap();
        assert_eq!(x, vec![Some(0.5), None]);
        assert_eq!(y, vec![Some(-0.01), Some(0.02)]);
        assert!(parse_series_columns("a,b\n1,2\n", "a", "c").is_err());
    }
}
