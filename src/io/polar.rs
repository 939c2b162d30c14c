//! Export of a georeferenced polar sweep (azimuth x range)

use crate::types::{PolarGeolocation, RadarError, RadarResult, RadarSite, RawScan};
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{DriverManager, Metadata};
use ndarray::Array2;
use std::path::Path;

/// Raster container for polar datasets, chosen from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolarFormat {
    GeoTiff,
    NetCdf,
}

impl PolarFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("nc") => PolarFormat::NetCdf,
            _ => PolarFormat::GeoTiff,
        }
    }

    fn driver_name(self) -> &'static str {
        match self {
            PolarFormat::GeoTiff => "GTiff",
            PolarFormat::NetCdf => "netCDF",
        }
    }

    /// Metadata key for a dataset-wide attribute
    fn global_key(self, name: &str) -> String {
        match self {
            PolarFormat::GeoTiff => name.to_string(),
            PolarFormat::NetCdf => format!("NC_GLOBAL#{}", name),
        }
    }
}

/// Band layout of a polar dataset, in band order
pub const POLAR_BANDS: [(&str, &str, &str); 4] = [
    ("DBZH", "equivalent reflectivity factor", "dBZ"),
    ("lon", "longitude", "degrees_east"),
    ("lat", "latitude", "degrees_north"),
    ("alt", "beam centre altitude", "m"),
];

/// Writes a scan together with the per-bin position of every bin
#[derive(Debug, Clone, Default)]
pub struct PolarDatasetWriter {
    title: Option<String>,
}

impl PolarDatasetWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Write `scan` and its `geolocation` as a four-band float64 raster.
    ///
    /// Rows are rays and columns range bins. `.nc` paths go through the
    /// netCDF driver with CF-1.8 global attributes; anything else is GTiff.
    pub fn write<P: AsRef<Path>>(
        &self,
        scan: &RawScan,
        geolocation: &PolarGeolocation,
        site: &RadarSite,
        output_path: P,
    ) -> RadarResult<()> {
        let output_path = output_path.as_ref();
        scan.validate()?;
        let (n_az, n_rng) = scan.data.dim();
        if geolocation.longitude.dim() != (n_az, n_rng) {
            return Err(RadarError::MalformedScan(format!(
                "Geolocation is {:?} but scan is {}x{}",
                geolocation.longitude.dim(),
                n_az,
                n_rng
            )));
        }

        let format = PolarFormat::from_path(output_path);
        log::info!(
            "Saving polar dataset ({}): {}",
            format.driver_name(),
            output_path.display()
        );

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let driver = DriverManager::get_driver_by_name(format.driver_name())?;
        let options: Vec<RasterCreationOption> = match format {
            PolarFormat::GeoTiff => vec![RasterCreationOption {
                key: "COMPRESS",
                value: "LZW",
            }],
            PolarFormat::NetCdf => vec![RasterCreationOption {
                key: "FORMAT",
                value: "NC4",
            }],
        };
        let mut dataset = driver.create_with_band_type_with_options::<f64, _>(
            output_path,
            n_rng as isize,
            n_az as isize,
            POLAR_BANDS.len() as isize,
            &options,
        )?;

        let title = self
            .title
            .clone()
            .unwrap_or_else(|| format!("{} radar polar sweep", site.id));
        let join = |values: &[f64]| {
            values
                .iter()
                .map(|v| format!("{}", v))
                .collect::<Vec<_>>()
                .join(",")
        };
        let attributes = [
            ("Conventions", "CF-1.8".to_string()),
            ("title", title),
            ("source", "Rainbow .azi sweep".to_string()),
            ("history", format!("Created by radgrid {}", env!("CARGO_PKG_VERSION"))),
            ("radar_id", site.id.clone()),
            ("radar_lat", site.latitude.to_string()),
            ("radar_lon", site.longitude.to_string()),
            ("radar_alt_m", site.altitude.to_string()),
            ("elevation_deg", scan.elevation_deg.to_string()),
            ("time", scan.timestamp.to_rfc3339()),
            ("source_unit", scan.unit.to_string()),
            ("azimuths_deg", join(&scan.azimuths)),
            ("ranges_m", join(&scan.ranges)),
        ];
        for (name, value) in &attributes {
            dataset.set_metadata_item(&format.global_key(name), value, "")?;
        }

        let reflectivity = scan.data.mapv(|v| {
            if scan.is_missing(v) {
                scan.nodata as f64
            } else {
                v as f64
            }
        });
        let layers: [&Array2<f64>; 4] = [
            &reflectivity,
            &geolocation.longitude,
            &geolocation.latitude,
            &geolocation.altitude,
        ];

        for (i, (layer, (name, long_name, units))) in layers.iter().zip(POLAR_BANDS).enumerate() {
            let mut band = dataset.rasterband(i as isize + 1)?;
            let buffer = Buffer::new((n_rng, n_az), layer.iter().copied().collect());
            band.write((0, 0), (n_rng, n_az), &buffer)?;
            band.set_metadata_item("NAME", name, "")?;
            band.set_metadata_item("long_name", long_name, "")?;
            band.set_metadata_item("units", units, "")?;
            if i == 0 {
                band.set_no_data_value(Some(scan.nodata as f64))?;
            }
        }

        log::info!("Polar dataset saved: {} rays x {} bins", n_az, n_rng);
        Ok(())
    }
}
