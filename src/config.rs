//! YAML run configuration.
//!
//! ```yaml
//! radar:
//!   id: CAXX
//!   lat: -2.8
//!   lon: -79.2
//!   alt_m: 4450.0
//! projection:
//!   epsg: 32717
//! grid:
//!   dx: 500.0
//!   dy: 500.0
//!   buffer_m: 5000.0
//! interpolation:
//!   method: idw
//!   search_radius_m: 1000.0
//! io:
//!   nodata: -9999.0
//! ```

use crate::core::calibrate::{DbzCalibration, ValueWindow};
use crate::core::interpolate::{InterpolationMethod, InterpolationParams, DEFAULT_MIN_DISTANCE};
use crate::core::pipeline::{GriddingPipeline, PipelineOptions};
use crate::core::projector::CrsTransform;
use crate::types::{CrsId, GridSpec, RadarError, RadarResult, RadarSite, DEFAULT_NODATA};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub radar: RadarConfig,
    pub projection: ProjectionConfig,
    pub grid: GridConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub interpolation: InterpolationConfig,
    #[serde(default)]
    pub io: IoConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarConfig {
    #[serde(default = "default_radar_id")]
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    /// Half of the half-power beam width, degrees
    #[serde(default = "default_beam_half_width")]
    pub beam_half_width: f64,
    #[serde(default)]
    pub max_range_m: Option<f64>,
}

fn default_radar_id() -> String {
    "RADAR".to_string()
}

fn default_beam_half_width() -> f64 {
    0.5
}

/// Target CRS: an EPSG code or a PROJ/WKT definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default)]
    pub epsg: Option<u32>,
    #[serde(default)]
    pub definition: Option<String>,
}

impl ProjectionConfig {
    pub fn crs(&self) -> RadarResult<CrsId> {
        match (self.epsg, &self.definition) {
            (Some(code), None) => Ok(CrsId::Epsg(code)),
            (None, Some(def)) => def.parse(),
            (Some(_), Some(_)) => Err(RadarError::Configuration(
                "projection: give either epsg or definition, not both".to_string(),
            )),
            (None, None) => Err(RadarError::Configuration(
                "projection: epsg or definition is required".to_string(),
            )),
        }
    }
}

/// Output grid. Without `rows`/`cols` the grid is sized per scan from the
/// sample envelope plus `buffer_m`; without an origin it is centred on the
/// radar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub dx: f64,
    #[serde(default)]
    pub dy: Option<f64>,
    #[serde(default)]
    pub buffer_m: f64,
    #[serde(default)]
    pub rows: Option<usize>,
    #[serde(default)]
    pub cols: Option<usize>,
    #[serde(default)]
    pub origin_x: Option<f64>,
    #[serde(default)]
    pub origin_y: Option<f64>,
}

impl GridConfig {
    /// Square cell size; `dy` must match `dx` when given
    pub fn cell_size(&self) -> RadarResult<f64> {
        match self.dy {
            Some(dy) if (dy - self.dx).abs() > 1e-9 => Err(RadarError::Configuration(format!(
                "Only square cells are supported, got dx = {} and dy = {}",
                self.dx, dy
            ))),
            _ => Ok(self.dx),
        }
    }

    pub fn is_auto_extent(&self) -> bool {
        self.rows.is_none() || self.cols.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Slope of `dBZ = a * dBuZ + b`
    #[serde(default = "default_slope")]
    pub a: f32,
    #[serde(default)]
    pub b: f32,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub dbz_min: Option<f32>,
    #[serde(default)]
    pub dbz_max: Option<f32>,
}

fn default_slope() -> f32 {
    1.0
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            force: false,
            dbz_min: None,
            dbz_max: None,
        }
    }
}

impl CalibrationConfig {
    pub fn to_calibration(&self) -> RadarResult<DbzCalibration> {
        let calibration = DbzCalibration::new(self.a, self.b)?;
        Ok(if self.force { calibration.forced() } else { calibration })
    }

    pub fn to_window(&self) -> RadarResult<Option<ValueWindow>> {
        match (self.dbz_min, self.dbz_max) {
            (None, None) => Ok(None),
            (min, max) => {
                let default = ValueWindow::default();
                ValueWindow::new(min.unwrap_or(default.min), max.unwrap_or(default.max)).map(Some)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationConfig {
    #[serde(default = "default_method")]
    pub method: InterpolationMethod,
    /// `null` lets nearest-neighbour fill every cell regardless of distance
    #[serde(default = "default_search_radius")]
    pub search_radius_m: Option<f64>,
    #[serde(default = "default_power")]
    pub power: f64,
}

fn default_method() -> InterpolationMethod {
    InterpolationMethod::Idw
}

fn default_search_radius() -> Option<f64> {
    InterpolationParams::default().search_radius
}

fn default_power() -> f64 {
    2.0
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            search_radius_m: default_search_radius(),
            power: default_power(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoConfig {
    #[serde(default = "default_nodata")]
    pub nodata: f32,
}

fn default_nodata() -> f32 {
    DEFAULT_NODATA
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            nodata: DEFAULT_NODATA,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> RadarResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RadarError::Configuration(format!("Invalid configuration: {}", e)))
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> RadarResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> RadarResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| RadarError::Configuration(format!("Cannot serialise configuration: {}", e)))
    }

    pub fn to_site(&self) -> RadarResult<RadarSite> {
        RadarSite::new(
            self.radar.id.clone(),
            self.radar.lat,
            self.radar.lon,
            self.radar.alt_m,
            self.radar.beam_half_width,
        )
    }

    pub fn to_options(&self) -> RadarResult<PipelineOptions> {
        let options = PipelineOptions {
            interpolation: InterpolationParams {
                method: self.interpolation.method,
                search_radius: self.interpolation.search_radius_m,
                power: self.interpolation.power,
                min_distance: DEFAULT_MIN_DISTANCE,
            },
            calibration: self.calibration.to_calibration()?,
            value_window: self.calibration.to_window()?,
            nodata: self.io.nodata,
            max_range: self.radar.max_range_m,
            grid_buffer: self.grid.buffer_m,
        };
        options.validate()?;
        Ok(options)
    }

    /// Output grid for a radar at `site`.
    ///
    /// Automatically sized grids get a single placeholder cell on the radar;
    /// only their CRS and cell size are used.
    pub fn to_grid(&self, site: &RadarSite) -> RadarResult<GridSpec> {
        let crs = self.projection.crs()?;
        let cell_size = self.grid.cell_size()?;

        match (self.grid.rows, self.grid.cols, self.grid.origin_x, self.grid.origin_y) {
            (Some(rows), Some(cols), Some(x), Some(y)) => GridSpec::new(crs, x, y, cell_size, rows, cols),
            (Some(rows), Some(cols), None, None) => {
                let (x, y) = CrsTransform::new(&crs)?.project(site.longitude, site.latitude)?;
                GridSpec::centered_on(crs, x, y, cell_size, rows, cols)
            }
            (Some(_), Some(_), _, _) => Err(RadarError::Configuration(
                "grid: origin_x and origin_y must be given together".to_string(),
            )),
            _ => {
                let (x, y) = CrsTransform::new(&crs)?.project(site.longitude, site.latitude)?;
                GridSpec::centered_on(crs, x, y, cell_size, 1, 1)
            }
        }
    }

    /// Pipeline for the configured radar
    pub fn build_pipeline(&self) -> RadarResult<GriddingPipeline> {
        self.build_pipeline_for(self.to_site()?)
    }

    /// Pipeline for `site`, e.g. a position read from the scan file
    pub fn build_pipeline_for(&self, site: RadarSite) -> RadarResult<GriddingPipeline> {
        let grid = self.to_grid(&site)?;
        GriddingPipeline::new(site, grid, self.to_options()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &str = r#"
radar:
  id: CAXX
  lat: -2.8
  lon: -79.2
  alt_m: 4450.0
projection:
  epsg: 32717
grid:
  dx: 500.0
  dy: 500.0
  buffer_m: 2000.0
io:
  nodata: -9999.0
"#;

    #[test]
    fn test_minimal_params_with_defaults() {
        let config = PipelineConfig::from_yaml_str(PARAMS).unwrap();
        assert_eq!(config.radar.beam_half_width, 0.5);
        assert_eq!(config.projection.crs().unwrap(), CrsId::Epsg(32717));
        assert!(config.grid.is_auto_extent());
        assert_eq!(config.interpolation.method, InterpolationMethod::Idw);
        assert_eq!(config.calibration.a, 1.0);

        let options = config.to_options().unwrap();
        assert_eq!(options.grid_buffer, 2000.0);
        assert!(options.value_window.is_none());
    }

    #[test]
    fn test_full_params() {
        let yaml = r#"
radar: { id: CAXX, lat: -2.8, lon: -79.2, alt_m: 4450.0, beam_half_width: 0.75, max_range_m: 100000.0 }
projection: { definition: "EPSG:32717" }
grid: { dx: 250.0, rows: 20, cols: 30, origin_x: 690000.0, origin_y: 9700000.0 }
calibration: { a: 1.2, b: -3.0, dbz_min: -10.0, dbz_max: 70.0 }
interpolation: { method: nearest, search_radius_m: 400.0 }
io: { nodata: -32768.0 }
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        let options = config.to_options().unwrap();
        assert_eq!(options.interpolation.method, InterpolationMethod::Nearest);
        assert_eq!(options.max_range, Some(100_000.0));
        assert_eq!(options.value_window, Some(ValueWindow::new(-10.0, 70.0).unwrap()));
        assert_eq!(options.calibration.slope, 1.2);
        assert!(!config.grid.is_auto_extent());

        let grid = config.to_grid(&config.to_site().unwrap()).unwrap();
        assert_eq!(grid.crs, CrsId::Epsg(32717));
        assert_eq!((grid.rows, grid.cols), (20, 30));
        assert_eq!(grid.origin_x, 690_000.0);
    }

    #[test]
    fn test_configuration_errors() {
        let non_square = PARAMS.replace("dy: 500.0", "dy: 250.0");
        let config = PipelineConfig::from_yaml_str(&non_square).unwrap();
        assert!(config.grid.cell_size().is_err());

        let no_crs = PARAMS.replace("epsg: 32717", "epsg: null");
        let config = PipelineConfig::from_yaml_str(&no_crs).unwrap();
        assert!(matches!(config.projection.crs(), Err(RadarError::Configuration(_))));

        let bad_radius = format!("{}interpolation:\n  search_radius_m: 0.0\n", PARAMS);
        let config = PipelineConfig::from_yaml_str(&bad_radius).unwrap();
        assert!(matches!(config.to_options(), Err(RadarError::Configuration(_))));

        assert!(PipelineConfig::from_yaml_str("radar: [1, 2").is_err());
    }

    #[test]
    fn test_unbounded_nearest_radius() {
        let yaml = format!("{}interpolation:\n  method: nearest\n  search_radius_m: null\n", PARAMS);
        let options = PipelineConfig::from_yaml_str(&yaml).unwrap().to_options().unwrap();
        assert_eq!(options.interpolation.method, InterpolationMethod::Nearest);
        assert_eq!(options.interpolation.search_radius, None);

        let idw = format!("{}interpolation:\n  method: idw\n  search_radius_m: null\n", PARAMS);
        let config = PipelineConfig::from_yaml_str(&idw).unwrap();
        assert!(matches!(config.to_options(), Err(RadarError::Configuration(_))));

        let omitted = format!("{}interpolation:\n  method: nearest\n", PARAMS);
        let options = PipelineConfig::from_yaml_str(&omitted).unwrap().to_options().unwrap();
        assert_eq!(options.interpolation.search_radius, Some(1000.0));
    }

    #[test]
    fn test_yaml_round_trip_through_file() {
        let config = PipelineConfig::from_yaml_str(PARAMS).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("params.yaml");
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();
        assert_eq!(PipelineConfig::from_yaml_file(&path).unwrap(), config);
    }

    #[test]
    fn test_centred_grid_from_config() {
        let yaml = PARAMS.replace("buffer_m: 2000.0", "rows: 10\n  cols: 10");
        let config = PipelineConfig::from_yaml_str(&yaml).unwrap();
        let pipeline = config.build_pipeline().unwrap();
        let (x0, y0) = pipeline.project_site().unwrap();
        let centre = pipeline.grid().bounds();
        assert!(((centre.min_x + centre.max_x) / 2.0 - x0).abs() < 1e-6);
        assert!(((centre.min_y + centre.max_y) / 2.0 - y0).abs() < 1e-6);
    }
}
