//! I/O modules for reading radar scans and writing gridded products

pub mod geotiff;
pub mod polar;
pub mod rainbow;

pub use geotiff::{read_geotiff, GeoTiffWriter};
pub use polar::{PolarDatasetWriter, PolarFormat};
pub use rainbow::{detect_format, RainbowReader, RainbowScan, ScanFormat, SensorInfo};
