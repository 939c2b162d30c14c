//! End-to-end gridding of one polar scan.
//!
//! `GriddingPipeline` owns the immutable run configuration (site, grid,
//! options) and the objects built from it. Each `process` call is
//! independent: calibrate, georeference, clip, interpolate, clamp and attach
//! provenance.

use crate::core::beam::BeamGeometryModel;
use crate::core::calibrate::{DbzCalibration, ValueWindow};
use crate::core::cancel::CancellationToken;
use crate::core::georeference::ScanGeoreferencer;
use crate::core::interpolate::{clip_to_grid, GridInterpolator, InterpolationParams};
use crate::types::{
    Bounds, GeoSample, GriddedProduct, GridImage, GridSpec, PolarGeolocation, ProductMetadata,
    ProductStatus, RadarError, RadarResult, RadarSite, RawScan, Reflectivity, ReflectivityUnit, DEFAULT_NODATA,
};
use chrono::Utc;
use ndarray::Array2;

/// Processing options besides the site and the output grid
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub interpolation: InterpolationParams,
    pub calibration: DbzCalibration,
    /// Reflectivity window applied to the gridded values, if any
    pub value_window: Option<ValueWindow>,
    /// Sentinel written to cells without a value
    pub nodata: Reflectivity,
    /// Slant range beyond which bins are discarded, meters
    pub max_range: Option<f64>,
    /// Margin around the sample envelope for automatically sized grids
    pub grid_buffer: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            interpolation: InterpolationParams::default(),
            calibration: DbzCalibration::default(),
            value_window: None,
            nodata: DEFAULT_NODATA,
            max_range: None,
            grid_buffer: 0.0,
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> RadarResult<()> {
        self.interpolation.validate()?;
        self.calibration.validate()?;
        if let Some(window) = &self.value_window {
            window.validate()?;
            if window.min <= self.nodata && self.nodata <= window.max {
                return Err(RadarError::Configuration(format!(
                    "No-data value {} lies inside the reflectivity window [{}, {}]",
                    self.nodata, window.min, window.max
                )));
            }
        }
        if !self.nodata.is_finite() {
            return Err(RadarError::Configuration(
                "No-data value must be finite".to_string(),
            ));
        }
        if !(self.grid_buffer >= 0.0 && self.grid_buffer.is_finite()) {
            return Err(RadarError::Configuration(format!(
                "Grid buffer must be non-negative, got {}",
                self.grid_buffer
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct GriddingPipeline {
    site: RadarSite,
    grid: GridSpec,
    options: PipelineOptions,
    georeferencer: ScanGeoreferencer,
    interpolator: GridInterpolator,
}

impl GriddingPipeline {
    /// Validate the configuration and build the projector.
    ///
    /// Every configuration problem surfaces here as `RadarError::Configuration`.
    pub fn new(site: RadarSite, grid: GridSpec, options: PipelineOptions) -> RadarResult<Self> {
        site.validate()?;
        grid.validate()?;
        options.validate()?;

        let georeferencer =
            ScanGeoreferencer::new(site.clone(), &grid.crs)?.with_max_range(options.max_range)?;
        let interpolator = GridInterpolator::new(options.interpolation.clone())?;

        log::info!(
            "Gridding pipeline for {}: {}x{} cells of {} m in {}",
            site.id,
            grid.rows,
            grid.cols,
            grid.cell_size,
            grid.crs
        );

        Ok(Self {
            site,
            grid,
            options,
            georeferencer,
            interpolator,
        })
    }

    pub fn site(&self) -> &RadarSite {
        &self.site
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// WKT of the output CRS
    pub fn crs_wkt(&self) -> &str {
        self.georeferencer.projector().transform().wkt()
    }

    /// Projected (easting, northing) of the radar
    pub fn project_site(&self) -> RadarResult<(f64, f64)> {
        self.georeferencer.projector().project_site()
    }

    pub fn georeferencer(&self) -> &ScanGeoreferencer {
        &self.georeferencer
    }

    /// Grid one scan onto the configured grid
    pub fn process(&self, scan: &RawScan) -> RadarResult<GriddedProduct> {
        self.process_with_cancel(scan, &CancellationToken::new())
    }

    pub fn process_with_cancel(
        &self,
        scan: &RawScan,
        cancel: &CancellationToken,
    ) -> RadarResult<GriddedProduct> {
        self.run(scan, GridExtent::Configured, cancel)
    }

    /// Calibrated scan plus the position of every bin, for polar export
    pub fn geolocate(&self, scan: &RawScan) -> RadarResult<(RawScan, PolarGeolocation)> {
        scan.validate()?;
        let scan = self.options.calibration.apply(scan);
        let geolocation = self.georeferencer.geolocate(&scan)?;
        Ok((scan, geolocation))
    }

    /// Grid one scan onto a grid sized to cover its samples plus the buffer.
    ///
    /// The configured grid only contributes its CRS and cell size.
    pub fn process_auto_extent(&self, scan: &RawScan) -> RadarResult<GriddedProduct> {
        self.run(scan, GridExtent::Auto, &CancellationToken::new())
    }

    fn run(
        &self,
        scan: &RawScan,
        extent: GridExtent,
        cancel: &CancellationToken,
    ) -> RadarResult<GriddedProduct> {
        scan.validate()?;
        cancel.check()?;

        let source_unit = scan.unit;
        let scan = self.options.calibration.apply(scan);
        let valid_bins = scan.valid_bin_count();

        let samples = if valid_bins == 0 {
            log::warn!("Scan at {} has no valid bins", scan.timestamp);
            Vec::new()
        } else {
            self.georeferencer.georeference_with_cancel(&scan, cancel)?
        };

        let grid = match extent {
            GridExtent::Configured => self.grid.clone(),
            GridExtent::Auto => self.auto_grid(&samples, &scan)?,
        };

        let total = samples.len();
        let samples = match self.options.interpolation.search_radius {
            Some(radius) => clip_to_grid(samples, &grid, radius),
            None => samples,
        };
        if samples.len() < total {
            log::debug!(
                "{} of {} samples lie out of reach of the grid",
                total - samples.len(),
                total
            );
        }

        let mut data = if samples.is_empty() {
            Array2::from_elem(grid.shape(), self.options.nodata)
        } else {
            self.interpolator
                .interpolate_with_cancel(&grid, &samples, self.options.nodata, cancel)?
        };

        if let Some(window) = &self.options.value_window {
            let clamped = window.clamp_in_place(&mut data, self.options.nodata);
            if clamped > 0 {
                log::debug!(
                    "Clamped {} cells to [{}, {}] dBZ",
                    clamped,
                    window.min,
                    window.max
                );
            }
        }

        let valid_cells = count_valid(&data, self.options.nodata);
        let status = if valid_bins == 0 {
            ProductStatus::EmptyScan
        } else if valid_cells == 0 {
            log::warn!("No valid bin within reach of the output grid");
            ProductStatus::NoCoverage
        } else {
            ProductStatus::Complete
        };

        let metadata = self.provenance(&scan, source_unit, &grid, samples.len(), valid_cells, status);
        log::info!(
            "Gridded scan {}: {} samples -> {} of {} cells ({:?})",
            scan.timestamp,
            samples.len(),
            valid_cells,
            data.len(),
            status
        );

        Ok(GriddedProduct {
            data,
            grid,
            nodata: self.options.nodata,
            metadata,
        })
    }

    /// Grid covering the samples, or the scan's reach around the site when
    /// there are none.
    fn auto_grid(&self, samples: &[GeoSample], scan: &RawScan) -> RadarResult<GridSpec> {
        let bounds = match Bounds::of_samples(samples) {
            Some(bounds) => bounds,
            None => {
                let (x, y) = self.project_site()?;
                let reach = self
                    .georeferencer
                    .beam()
                    .propagate(scan.max_range(), scan.elevation_deg)
                    .ground_distance;
                Bounds {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                }
                .expanded(reach)
            }
        };

        let grid = GridSpec::covering(
            self.grid.crs.clone(),
            &bounds,
            self.grid.cell_size,
            self.options.grid_buffer,
        )?;
        log::debug!(
            "Automatic grid: {}x{} cells from ({:.1}, {:.1})",
            grid.rows,
            grid.cols,
            grid.origin_x,
            grid.origin_y
        );
        Ok(grid)
    }

    fn provenance(
        &self,
        scan: &RawScan,
        source_unit: ReflectivityUnit,
        grid: &GridSpec,
        sample_count: usize,
        valid_cells: usize,
        status: ProductStatus,
    ) -> ProductMetadata {
        let calibration = &self.options.calibration;
        let (slope, offset) = if calibration.applies_to(source_unit) {
            (calibration.slope, calibration.offset)
        } else {
            (1.0, 0.0)
        };

        ProductMetadata {
            radar_id: scan.radar_id.clone().unwrap_or_else(|| self.site.id.clone()),
            scan_time: scan.timestamp,
            processed_at: Utc::now(),
            elevation_deg: scan.elevation_deg,
            crs: grid.crs.to_string(),
            source_unit,
            calibration_slope: slope,
            calibration_offset: offset,
            method: self.options.interpolation.method.to_string(),
            search_radius: self.options.interpolation.search_radius,
            power: self.options.interpolation.power,
            sample_count,
            valid_cells,
            beam_width_at_max_range: BeamGeometryModel::beam_width_at(
                scan.max_range(),
                self.site.beam_half_width,
            ),
            status,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GridExtent {
    Configured,
    Auto,
}

fn count_valid(data: &GridImage, nodata: Reflectivity) -> usize {
    data.iter().filter(|&&v| v != nodata).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interpolate::InterpolationMethod;
    use crate::types::{CrsId, ReflectivityUnit};
    use chrono::Utc;

    fn site() -> RadarSite {
        RadarSite::new("CAXX", -2.8, -79.2, 4450.0, 0.5).unwrap()
    }

    fn utm_grid() -> GridSpec {
        GridSpec::new(CrsId::Epsg(32717), 0.0, 1.0, 500.0, 10, 10).unwrap()
    }

    fn ring_scan(value: f32, unit: ReflectivityUnit) -> RawScan {
        RawScan::with_uniform_azimuths(
            vec![1000.0, 2000.0],
            Array2::from_elem((8, 2), value),
            0.5,
            Utc::now(),
            DEFAULT_NODATA,
            unit,
        )
        .unwrap()
    }

    fn centred_pipeline(options: PipelineOptions) -> GriddingPipeline {
        let (x0, y0) = GriddingPipeline::new(site(), utm_grid(), PipelineOptions::default())
            .unwrap()
            .project_site()
            .unwrap();
        let grid = GridSpec::centered_on(CrsId::Epsg(32717), x0, y0, 500.0, 10, 10).unwrap();
        GriddingPipeline::new(site(), grid, options).unwrap()
    }

    #[test]
    fn test_construction_fails_fast_on_bad_configuration() {
        let bad_radius = PipelineOptions {
            interpolation: InterpolationParams {
                search_radius: Some(-1.0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            GriddingPipeline::new(site(), utm_grid(), bad_radius),
            Err(RadarError::Configuration(_))
        ));

        let nodata_in_window = PipelineOptions {
            value_window: Some(ValueWindow::new(-10000.0, 80.0).unwrap()),
            ..Default::default()
        };
        assert!(GriddingPipeline::new(site(), utm_grid(), nodata_in_window).is_err());

        let mut bad_crs = utm_grid();
        bad_crs.crs = CrsId::Epsg(999_999);
        assert!(matches!(
            GriddingPipeline::new(site(), bad_crs, PipelineOptions::default()),
            Err(RadarError::Configuration(_))
        ));
    }

    #[test]
    fn test_all_missing_scan_gives_empty_product() {
        let pipeline = centred_pipeline(PipelineOptions::default());
        let product = pipeline.process(&ring_scan(DEFAULT_NODATA, ReflectivityUnit::Dbz)).unwrap();

        assert_eq!(product.metadata.status, ProductStatus::EmptyScan);
        assert!(product.is_empty());
        assert_eq!(product.metadata.sample_count, 0);
        assert_eq!(product.data.dim(), (10, 10));
    }

    #[test]
    fn test_grid_far_from_radar_has_no_coverage() {
        let pipeline = GriddingPipeline::new(site(), utm_grid(), PipelineOptions::default()).unwrap();
        let product = pipeline.process(&ring_scan(25.0, ReflectivityUnit::Dbz)).unwrap();
        assert_eq!(product.metadata.status, ProductStatus::NoCoverage);
        assert!(product.is_empty());
    }

    #[test]
    fn test_calibration_and_window_reach_the_product() {
        let options = PipelineOptions {
            calibration: DbzCalibration::new(2.0, 10.0).unwrap(),
            value_window: Some(ValueWindow::new(-10.0, 60.0).unwrap()),
            interpolation: InterpolationParams {
                method: InterpolationMethod::Nearest,
                search_radius: Some(600.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let pipeline = centred_pipeline(options);

        // 30 dBuZ -> 70 dBZ, clamped to 60
        let product = pipeline.process(&ring_scan(30.0, ReflectivityUnit::Dbuz)).unwrap();
        assert_eq!(product.metadata.status, ProductStatus::Complete);
        assert_eq!(product.metadata.source_unit, ReflectivityUnit::Dbuz);
        assert_eq!(product.metadata.calibration_slope, 2.0);
        assert!(product.data.iter().all(|&v| v == DEFAULT_NODATA || v == 60.0));
        assert!(product.metadata.valid_cells > 0);
    }

    #[test]
    fn test_auto_extent_covers_every_sample() {
        let options = PipelineOptions {
            grid_buffer: 1000.0,
            ..Default::default()
        };
        let pipeline = GriddingPipeline::new(site(), utm_grid(), options).unwrap();
        let product = pipeline.process_auto_extent(&ring_scan(20.0, ReflectivityUnit::Dbz)).unwrap();

        assert_eq!(product.metadata.status, ProductStatus::Complete);
        assert_eq!(product.metadata.sample_count, 16);
        // 2 km ring plus 1 km buffer on each side at 500 m cells
        assert!(product.grid.rows >= 12 && product.grid.rows <= 13);
        let (x0, y0) = pipeline.project_site().unwrap();
        assert!(product.grid.bounds().contains(x0, y0));
    }

    #[test]
    fn test_unbounded_nearest_fills_the_whole_extent() {
        let options = PipelineOptions {
            grid_buffer: 1000.0,
            interpolation: InterpolationParams {
                method: InterpolationMethod::Nearest,
                search_radius: None,
                ..Default::default()
            },
            ..Default::default()
        };
        let pipeline = GriddingPipeline::new(site(), utm_grid(), options).unwrap();

        let product = pipeline.process_auto_extent(&ring_scan(20.0, ReflectivityUnit::Dbz)).unwrap();
        assert_eq!(product.metadata.search_radius, None);
        assert_eq!(product.metadata.valid_cells, product.data.len());
        assert!(product.data.iter().all(|&v| v == 20.0));

        // Nothing is clipped, so even a grid far from the radar is filled
        let far = pipeline.process(&ring_scan(20.0, ReflectivityUnit::Dbz)).unwrap();
        assert_eq!(far.metadata.status, ProductStatus::Complete);
        assert_eq!(far.metadata.sample_count, 16);
    }

    #[test]
    fn test_geolocate_returns_calibrated_bins() {
        let options = PipelineOptions {
            calibration: DbzCalibration::new(1.0, 5.0).unwrap(),
            ..Default::default()
        };
        let pipeline = centred_pipeline(options);
        let (scan, geolocation) = pipeline.geolocate(&ring_scan(30.0, ReflectivityUnit::Dbuz)).unwrap();

        assert_eq!(scan.unit, ReflectivityUnit::Dbz);
        assert!(scan.data.iter().all(|&v| v == 35.0));
        assert_eq!(geolocation.latitude.dim(), (8, 2));
        // First ray points north
        assert!(geolocation.latitude[[0, 1]] > geolocation.latitude[[0, 0]]);
        assert!(geolocation.latitude[[0, 0]] > site().latitude);
    }

    #[test]
    fn test_cancelled_before_start() {
        let pipeline = centred_pipeline(PipelineOptions::default());
        let token = CancellationToken::new();
        token.cancel();
        let result = pipeline.process_with_cancel(&ring_scan(20.0, ReflectivityUnit::Dbz), &token);
        assert!(matches!(result, Err(RadarError::Cancelled)));
    }
}
