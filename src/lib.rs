//! radgrid: polar weather-radar scan georeferencing and gridding
//!
//! Turns a raw azimuth/range reflectivity sweep plus the radar site geometry
//! into a regular georeferenced reflectivity grid for hydrological use. The
//! beam is propagated over a 4/3 effective earth, every bin is carried along
//! the WGS84 geodesic from the site and projected into the target CRS, and
//! the scattered samples are resolved onto the grid by inverse-distance
//! weighting.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    Bounds, CrsId, GeoSample, GridSpec, GriddedProduct, PolarGeolocation, ProductMetadata,
    ProductStatus, RadarError, RadarResult, RadarSite, RawScan, ReflectivityUnit, DEFAULT_NODATA,
};

pub use config::PipelineConfig;
pub use core::{
    BeamGeometryModel, CancellationToken, DbzCalibration, GeodeticProjector, GridInterpolator,
    GriddingPipeline, InterpolationMethod, InterpolationParams, PipelineOptions, ScanGeoreferencer,
    ValueWindow,
};
pub use io::{GeoTiffWriter, PolarDatasetWriter, RainbowReader};
