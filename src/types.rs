use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reflectivity sample value (dBZ or dBuZ)
pub type Reflectivity = f32;

/// 2D polar reflectivity matrix (azimuth x range)
pub type PolarImage = Array2<Reflectivity>;

/// 2D gridded reflectivity raster (row x column, row 0 = north)
pub type GridImage = Array2<Reflectivity>;

/// Default no-data sentinel for gridded products
pub const DEFAULT_NODATA: f32 = -9999.0;

/// Units of the reflectivity matrix in a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReflectivityUnit {
    /// Calibrated reflectivity factor
    #[serde(rename = "dBZ")]
    Dbz,
    /// Uncalibrated reflectivity, needs the linear dBZ correction
    #[serde(rename = "dBuZ")]
    Dbuz,
}

impl fmt::Display for ReflectivityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReflectivityUnit::Dbz => write!(f, "dBZ"),
            ReflectivityUnit::Dbuz => write!(f, "dBuZ"),
        }
    }
}

impl std::str::FromStr for ReflectivityUnit {
    type Err = RadarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dbz" => Ok(ReflectivityUnit::Dbz),
            "dbuz" => Ok(ReflectivityUnit::Dbuz),
            other => Err(RadarError::InvalidFormat(format!(
                "Unknown reflectivity unit: {}",
                other
            ))),
        }
    }
}

/// One raw polar sweep as delivered by a file reader
#[derive(Debug, Clone)]
pub struct RawScan {
    /// Azimuth of each ray, degrees from true north
    pub azimuths: Vec<f64>,
    /// Distance of each range bin from the radar, meters
    pub ranges: Vec<f64>,
    /// Reflectivity matrix (azimuth x range)
    pub data: PolarImage,
    /// Antenna elevation angle in degrees
    pub elevation_deg: f64,
    /// Scan timestamp
    pub timestamp: DateTime<Utc>,
    /// Sentinel marking missing / below-threshold bins
    pub nodata: Reflectivity,
    pub unit: ReflectivityUnit,
    /// Radar identifier as declared by the source file, if any
    pub radar_id: Option<String>,
}

impl RawScan {
    /// Create a new scan, checking the shape invariants
    pub fn new(
        azimuths: Vec<f64>,
        ranges: Vec<f64>,
        data: PolarImage,
        elevation_deg: f64,
        timestamp: DateTime<Utc>,
        nodata: Reflectivity,
        unit: ReflectivityUnit,
    ) -> RadarResult<Self> {
        let scan = Self {
            azimuths,
            ranges,
            data,
            elevation_deg,
            timestamp,
            nodata,
            unit,
            radar_id: None,
        };
        scan.validate()?;
        Ok(scan)
    }

    /// Create a scan whose rays evenly cover [0, 360)
    ///
    /// Used when the source lists no per-ray angles.
    pub fn with_uniform_azimuths(
        ranges: Vec<f64>,
        data: PolarImage,
        elevation_deg: f64,
        timestamp: DateTime<Utc>,
        nodata: Reflectivity,
        unit: ReflectivityUnit,
    ) -> RadarResult<Self> {
        let n_az = data.nrows();
        let azimuths = uniform_azimuths(n_az);
        Self::new(azimuths, ranges, data, elevation_deg, timestamp, nodata, unit)
    }

    pub fn with_radar_id(mut self, radar_id: impl Into<String>) -> Self {
        self.radar_id = Some(radar_id.into());
        self
    }

    /// Check the scan invariants
    pub fn validate(&self) -> RadarResult<()> {
        let (rows, cols) = self.data.dim();

        if rows != self.azimuths.len() {
            return Err(RadarError::MalformedScan(format!(
                "Reflectivity matrix has {} rows but scan declares {} azimuths",
                rows,
                self.azimuths.len()
            )));
        }
        if cols != self.ranges.len() {
            return Err(RadarError::MalformedScan(format!(
                "Reflectivity matrix has {} columns but scan declares {} range bins",
                cols,
                self.ranges.len()
            )));
        }
        if let Some(i) = self.ranges.iter().position(|r| !r.is_finite() || *r < 0.0) {
            return Err(RadarError::MalformedScan(format!(
                "Range bin {} has invalid distance {}",
                i, self.ranges[i]
            )));
        }
        if let Some(i) = self.ranges.windows(2).position(|w| w[1] <= w[0]) {
            return Err(RadarError::MalformedScan(format!(
                "Range bins are not strictly increasing at index {} ({} -> {})",
                i + 1,
                self.ranges[i],
                self.ranges[i + 1]
            )));
        }
        if let Some(i) = self.azimuths.iter().position(|a| !a.is_finite()) {
            return Err(RadarError::MalformedScan(format!(
                "Azimuth {} is not a finite angle",
                i
            )));
        }
        if !self.elevation_deg.is_finite() {
            return Err(RadarError::MalformedScan(
                "Elevation angle is not finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a bin value counts as missing
    #[inline]
    pub fn is_missing(&self, value: Reflectivity) -> bool {
        !value.is_finite() || value == self.nodata
    }

    /// Number of bins carrying a measurement
    pub fn valid_bin_count(&self) -> usize {
        self.data.iter().filter(|&&v| !self.is_missing(v)).count()
    }

    pub fn max_range(&self) -> f64 {
        self.ranges.last().copied().unwrap_or(0.0)
    }
}

/// Evenly spaced azimuths covering [0, 360)
pub fn uniform_azimuths(count: usize) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    let step = 360.0 / count as f64;
    (0..count).map(|i| i as f64 * step).collect()
}

/// Radar site geometry, created once from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarSite {
    pub id: String,
    /// Geodetic latitude, degrees
    pub latitude: f64,
    /// Geodetic longitude, degrees
    pub longitude: f64,
    /// Antenna altitude above sea level, meters
    pub altitude: f64,
    /// Half of the half-power beam width, degrees
    pub beam_half_width: f64,
}

impl RadarSite {
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        beam_half_width: f64,
    ) -> RadarResult<Self> {
        let site = Self {
            id: id.into(),
            latitude,
            longitude,
            altitude,
            beam_half_width,
        };
        site.validate()?;
        Ok(site)
    }

    pub fn validate(&self) -> RadarResult<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(RadarError::Configuration(format!(
                "Radar latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(RadarError::Configuration(format!(
                "Radar longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        if !self.altitude.is_finite() {
            return Err(RadarError::Configuration(
                "Radar altitude is not finite".to_string(),
            ));
        }
        if !(self.beam_half_width > 0.0 && self.beam_half_width < 90.0) {
            return Err(RadarError::Configuration(format!(
                "Beam half-width must be in (0, 90) degrees, got {}",
                self.beam_half_width
            )));
        }
        Ok(())
    }
}

/// A single georeferenced polar bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoSample {
    pub easting: f64,
    pub northing: f64,
    /// Beam height above the antenna, meters
    pub height: f64,
    pub value: Reflectivity,
}

/// Coordinate reference system identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsId {
    /// EPSG registry code
    Epsg(u32),
    /// PROJ string or WKT definition
    Definition(String),
}

impl fmt::Display for CrsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrsId::Epsg(code) => write!(f, "EPSG:{}", code),
            CrsId::Definition(def) => write!(f, "{}", def),
        }
    }
}

impl std::str::FromStr for CrsId {
    type Err = RadarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RadarError::Configuration("Empty CRS identifier".to_string()));
        }
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        match code.parse::<u32>() {
            Ok(epsg) => Ok(CrsId::Epsg(epsg)),
            Err(_) if code.len() != trimmed.len() => Err(RadarError::Configuration(format!(
                "Invalid EPSG code: {}",
                trimmed
            ))),
            Err(_) => Ok(CrsId::Definition(trimmed.to_string())),
        }
    }
}

/// Projected bounding box in grid CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Bounds grown by `margin` on every side
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Envelope of a set of samples, `None` when empty
    pub fn of_samples(samples: &[GeoSample]) -> Option<Self> {
        let first = samples.first()?;
        let init = Self {
            min_x: first.easting,
            min_y: first.northing,
            max_x: first.easting,
            max_y: first.northing,
        };
        Some(samples.iter().fold(init, |b, s| Self {
            min_x: b.min_x.min(s.easting),
            min_y: b.min_y.min(s.northing),
            max_x: b.max_x.max(s.easting),
            max_y: b.max_y.max(s.northing),
        }))
    }
}

/// Output grid definition
///
/// The origin is the outer corner of the upper-left (north-west) cell, so
/// rows run southwards and columns eastwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub crs: CrsId,
    pub origin_x: f64,
    pub origin_y: f64,
    /// Square cell size in CRS units (meters)
    pub cell_size: f64,
    pub rows: usize,
    pub cols: usize,
}

impl GridSpec {
    pub fn new(
        crs: CrsId,
        origin_x: f64,
        origin_y: f64,
        cell_size: f64,
        rows: usize,
        cols: usize,
    ) -> RadarResult<Self> {
        let grid = Self {
            crs,
            origin_x,
            origin_y,
            cell_size,
            rows,
            cols,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Grid of `rows` x `cols` cells whose centre is the projected point (x, y)
    pub fn centered_on(
        crs: CrsId,
        x: f64,
        y: f64,
        cell_size: f64,
        rows: usize,
        cols: usize,
    ) -> RadarResult<Self> {
        let origin_x = x - cols as f64 * cell_size / 2.0;
        let origin_y = y + rows as f64 * cell_size / 2.0;
        Self::new(crs, origin_x, origin_y, cell_size, rows, cols)
    }

    /// Grid covering `bounds` plus `buffer` on every side
    pub fn covering(crs: CrsId, bounds: &Bounds, cell_size: f64, buffer: f64) -> RadarResult<Self> {
        if !(cell_size > 0.0 && cell_size.is_finite()) {
            return Err(RadarError::Configuration(format!(
                "Cell size must be positive, got {}",
                cell_size
            )));
        }
        if !(buffer >= 0.0 && buffer.is_finite()) {
            return Err(RadarError::Configuration(format!(
                "Grid buffer must be non-negative, got {}",
                buffer
            )));
        }
        let b = bounds.expanded(buffer);
        let cols = (((b.max_x - b.min_x) / cell_size).ceil() as usize).max(1);
        let rows = (((b.max_y - b.min_y) / cell_size).ceil() as usize).max(1);
        Self::new(crs, b.min_x, b.max_y, cell_size, rows, cols)
    }

    pub fn validate(&self) -> RadarResult<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(RadarError::Configuration(format!(
                "Grid must have at least one row and column, got {}x{}",
                self.rows, self.cols
            )));
        }
        if !(self.cell_size > 0.0 && self.cell_size.is_finite()) {
            return Err(RadarError::Configuration(format!(
                "Cell size must be positive, got {}",
                self.cell_size
            )));
        }
        if !(self.origin_x.is_finite() && self.origin_y.is_finite()) {
            return Err(RadarError::Configuration(
                "Grid origin is not finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Projected coordinate of the centre of cell (row, col)
    #[inline]
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.cell_size,
            self.origin_y - (row as f64 + 0.5) * self.cell_size,
        )
    }

    /// Outer bounds of the grid
    pub fn bounds(&self) -> Bounds {
        Bounds {
            min_x: self.origin_x,
            min_y: self.origin_y - self.rows as f64 * self.cell_size,
            max_x: self.origin_x + self.cols as f64 * self.cell_size,
            max_y: self.origin_y,
        }
    }

    /// GDAL-style geotransform for this grid
    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform {
            top_left_x: self.origin_x,
            pixel_width: self.cell_size,
            rotation_x: 0.0,
            top_left_y: self.origin_y,
            rotation_y: 0.0,
            pixel_height: -self.cell_size, // Negative for north-up images
        }
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Per-bin geographic location of a polar scan (azimuth x range)
#[derive(Debug, Clone)]
pub struct PolarGeolocation {
    pub longitude: Array2<f64>,
    pub latitude: Array2<f64>,
    /// Beam centre altitude above sea level, meters
    pub altitude: Array2<f64>,
}

/// Outcome class of a processed scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductStatus {
    /// At least one grid cell carries a value
    Complete,
    /// The scan had no valid bins; the grid is entirely no-data
    EmptyScan,
    /// Valid bins existed but none fell within reach of the grid
    NoCoverage,
}

/// Provenance attached to every gridded product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMetadata {
    pub radar_id: String,
    pub scan_time: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub elevation_deg: f64,
    pub crs: String,
    pub source_unit: ReflectivityUnit,
    pub calibration_slope: f32,
    pub calibration_offset: f32,
    pub method: String,
    /// `None` for an unbounded nearest-neighbour search
    pub search_radius: Option<f64>,
    pub power: f64,
    /// Georeferenced samples that entered the interpolation
    pub sample_count: usize,
    /// Grid cells holding a value
    pub valid_cells: usize,
    /// Half-power beam diameter at the farthest range bin, meters
    pub beam_width_at_max_range: f64,
    pub status: ProductStatus,
}

/// Terminal artifact of the gridding pipeline
#[derive(Debug, Clone)]
pub struct GriddedProduct {
    pub data: GridImage,
    pub grid: GridSpec,
    pub nodata: Reflectivity,
    pub metadata: ProductMetadata,
}

impl GriddedProduct {
    /// True when every cell is the no-data sentinel
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|&v| v == self.nodata)
    }

    /// Fraction of grid cells with a value, in percent
    pub fn coverage_percent(&self) -> f64 {
        let total = self.data.len();
        if total == 0 {
            return 0.0;
        }
        self.metadata.valid_cells as f64 / total as f64 * 100.0
    }

    /// Value at projected coordinate (x, y), `None` outside the grid or no-data
    pub fn value_at(&self, x: f64, y: f64) -> Option<Reflectivity> {
        let col = ((x - self.grid.origin_x) / self.grid.cell_size).floor();
        let row = ((self.grid.origin_y - y) / self.grid.cell_size).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        if row >= self.grid.rows || col >= self.grid.cols {
            return None;
        }
        let v = self.data[[row, col]];
        if v == self.nodata {
            None
        } else {
            Some(v)
        }
    }
}

/// Error types for radar gridding
#[derive(Debug, thiserror::Error)]
pub enum RadarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed scan: {0}")]
    MalformedScan(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),
}

/// Result type for radar operations
pub type RadarResult<T> = Result<T, RadarError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scan_of(rows: usize, cols: usize, az: usize, rng: usize) -> RadarResult<RawScan> {
        RawScan::new(
            uniform_azimuths(az),
            (1..=rng).map(|i| i as f64 * 250.0).collect(),
            Array2::from_elem((rows, cols), 10.0),
            0.5,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            DEFAULT_NODATA,
            ReflectivityUnit::Dbz,
        )
    }

    #[test]
    fn test_scan_shape_validation() {
        assert!(scan_of(4, 3, 4, 3).is_ok());
        assert!(matches!(scan_of(5, 3, 4, 3), Err(RadarError::MalformedScan(_))));
        assert!(matches!(scan_of(4, 2, 4, 3), Err(RadarError::MalformedScan(_))));
    }

    #[test]
    fn test_non_monotonic_ranges_rejected() {
        let result = RawScan::new(
            vec![0.0, 180.0],
            vec![1000.0, 3000.0, 2000.0],
            Array2::zeros((2, 3)),
            0.5,
            Utc::now(),
            DEFAULT_NODATA,
            ReflectivityUnit::Dbz,
        );
        assert!(matches!(result, Err(RadarError::MalformedScan(_))));
    }

    #[test]
    fn test_missing_values() {
        let mut scan = scan_of(2, 2, 2, 2).unwrap();
        scan.data[[0, 0]] = DEFAULT_NODATA;
        scan.data[[1, 1]] = f32::NAN;
        assert_eq!(scan.valid_bin_count(), 2);
    }

    #[test]
    fn test_crs_parsing() {
        assert_eq!("EPSG:32717".parse::<CrsId>().unwrap(), CrsId::Epsg(32717));
        assert_eq!("4326".parse::<CrsId>().unwrap(), CrsId::Epsg(4326));
        assert!(matches!(
            "+proj=utm +zone=17 +south".parse::<CrsId>().unwrap(),
            CrsId::Definition(_)
        ));
        assert!("EPSG:abc".parse::<CrsId>().is_err());
        assert!("".parse::<CrsId>().is_err());
    }

    #[test]
    fn test_grid_geometry() {
        let grid = GridSpec::centered_on(CrsId::Epsg(32717), 1000.0, 2000.0, 500.0, 10, 10).unwrap();
        assert_eq!(grid.origin_x, -1500.0);
        assert_eq!(grid.origin_y, 4500.0);
        assert_eq!(grid.cell_center(0, 0), (-1250.0, 4250.0));
        assert_eq!(grid.cell_center(9, 9), (3250.0, -250.0));

        let b = grid.bounds();
        assert_eq!((b.min_x, b.max_x, b.min_y, b.max_y), (-1500.0, 3500.0, -500.0, 4500.0));
    }

    #[test]
    fn test_grid_rejects_bad_parameters() {
        assert!(GridSpec::new(CrsId::Epsg(4326), 0.0, 0.0, 0.0, 10, 10).is_err());
        assert!(GridSpec::new(CrsId::Epsg(4326), 0.0, 0.0, -5.0, 10, 10).is_err());
        assert!(GridSpec::new(CrsId::Epsg(4326), 0.0, 0.0, 100.0, 0, 10).is_err());
    }

    #[test]
    fn test_grid_covering_bounds() {
        let bounds = Bounds { min_x: 0.0, min_y: 0.0, max_x: 950.0, max_y: 420.0 };
        let grid = GridSpec::covering(CrsId::Epsg(32717), &bounds, 100.0, 50.0).unwrap();
        assert_eq!(grid.cols, 11);
        assert_eq!(grid.rows, 6);
        assert_eq!(grid.origin_x, -50.0);
        assert_eq!(grid.origin_y, 470.0);
    }

    #[test]
    fn test_site_validation() {
        assert!(RadarSite::new("CAXX", -2.8, -79.2, 4450.0, 0.5).is_ok());
        assert!(RadarSite::new("BAD", 95.0, 0.0, 0.0, 0.5).is_err());
        assert!(RadarSite::new("BAD", 0.0, 0.0, 0.0, 0.0).is_err());
    }
}
