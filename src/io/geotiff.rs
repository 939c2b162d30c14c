use crate::core::projector::spatial_ref_for;
use crate::types::{GeoTransform, GriddedProduct, GridImage, ProductMetadata, RadarError, RadarResult};
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::Array2;
use std::path::Path;

/// Dataset metadata item holding the product provenance as JSON
pub const PROVENANCE_KEY: &str = "RADGRID_PROVENANCE";

/// Writes gridded products as single-band float32 GeoTIFFs
#[derive(Debug, Clone)]
pub struct GeoTiffWriter {
    compression: Option<String>,
}

impl Default for GeoTiffWriter {
    fn default() -> Self {
        Self {
            compression: Some("LZW".to_string()),
        }
    }
}

impl GeoTiffWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// GTiff `COMPRESS` creation option; `None` writes uncompressed
    pub fn with_compression(mut self, compression: Option<&str>) -> Self {
        self.compression = compression.map(str::to_string);
        self
    }

    pub fn write<P: AsRef<Path>>(&self, product: &GriddedProduct, output_path: P) -> RadarResult<()> {
        let output_path = output_path.as_ref();
        log::info!("Saving gridded product as GeoTIFF: {}", output_path.display());

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = product.data.dim();

        let options: Vec<RasterCreationOption> = self
            .compression
            .as_deref()
            .map(|value| RasterCreationOption {
                key: "COMPRESS",
                value,
            })
            .into_iter()
            .collect();

        let mut dataset = driver.create_with_band_type_with_options::<f32, _>(
            output_path,
            width as isize,
            height as isize,
            1,
            &options,
        )?;

        dataset.set_geo_transform(&product.grid.geo_transform().to_array())?;
        dataset.set_spatial_ref(&spatial_ref_for(&product.grid.crs)?)?;

        let provenance = serde_json::to_string(&product.metadata)
            .map_err(|e| RadarError::Processing(format!("Failed to encode provenance: {}", e)))?;
        dataset.set_metadata_item(PROVENANCE_KEY, &provenance, "")?;
        dataset.set_metadata_item("RADAR_ID", &product.metadata.radar_id, "")?;
        dataset.set_metadata_item("SCAN_TIME", &product.metadata.scan_time.to_rfc3339(), "")?;
        dataset.set_metadata_item("UNITS", "dBZ", "")?;

        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<f32> = product.data.iter().copied().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(Some(product.nodata as f64))?;

        log::info!(
            "GeoTIFF saved: {}x{} cells, {:.1}% coverage",
            width,
            height,
            product.coverage_percent()
        );
        Ok(())
    }
}

/// Raster contents of a product GeoTIFF
#[derive(Debug, Clone)]
pub struct GeoTiffContents {
    pub data: GridImage,
    pub geo_transform: GeoTransform,
    pub nodata: Option<f64>,
    pub metadata: Option<ProductMetadata>,
}

/// Read back a GeoTIFF written by `GeoTiffWriter`
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> RadarResult<GeoTiffContents> {
    let dataset = Dataset::open(path.as_ref())?;
    let gt = dataset.geo_transform()?;
    let (width, height) = dataset.raster_size();

    let rasterband = dataset.rasterband(1)?;
    let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| RadarError::Processing(format!("Failed to reshape raster data: {}", e)))?;

    let metadata = dataset
        .metadata_item(PROVENANCE_KEY, "")
        .and_then(|json| serde_json::from_str(&json).ok());

    Ok(GeoTiffContents {
        data,
        geo_transform: GeoTransform {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        },
        nodata: rasterband.no_data_value(),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CrsId, GridSpec, ProductStatus, ReflectivityUnit};
    use chrono::Utc;
    use tempfile::TempDir;

    fn product() -> GriddedProduct {
        let grid = GridSpec::new(CrsId::Epsg(32717), 700_000.0, 9_700_000.0, 500.0, 3, 4).unwrap();
        let mut data = Array2::from_elem((3, 4), -9999.0f32);
        data[[0, 1]] = 30.0;
        data[[2, 3]] = 12.5;

        GriddedProduct {
            data,
            grid: grid.clone(),
            nodata: -9999.0,
            metadata: ProductMetadata {
                radar_id: "CAXX".to_string(),
                scan_time: Utc::now(),
                processed_at: Utc::now(),
                elevation_deg: 0.5,
                crs: grid.crs.to_string(),
                source_unit: ReflectivityUnit::Dbz,
                calibration_slope: 1.0,
                calibration_offset: 0.0,
                method: "idw".to_string(),
                search_radius: Some(750.0),
                power: 2.0,
                sample_count: 2,
                valid_cells: 2,
                beam_width_at_max_range: 17.5,
                status: ProductStatus::Complete,
            },
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("grid.tif");

        GeoTiffWriter::new().write(&product(), &path).unwrap();
        let contents = read_geotiff(&path).unwrap();

        assert_eq!(contents.data.dim(), (3, 4));
        assert_eq!(contents.data[[0, 1]], 30.0);
        assert_eq!(contents.data[[2, 3]], 12.5);
        assert_eq!(contents.nodata, Some(-9999.0));
        assert_eq!(contents.geo_transform.top_left_x, 700_000.0);
        assert_eq!(contents.geo_transform.pixel_height, -500.0);

        let metadata = contents.metadata.unwrap();
        assert_eq!(metadata.radar_id, "CAXX");
        assert_eq!(metadata.status, ProductStatus::Complete);
        assert_eq!(metadata.valid_cells, 2);
    }

    #[test]
    fn test_uncompressed_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.tif");
        GeoTiffWriter::new()
            .with_compression(None)
            .write(&product(), &path)
            .unwrap();
        assert!(path.exists());
    }
}
