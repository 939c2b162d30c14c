//! Python bindings (`python` feature)

use crate::config::PipelineConfig;
use crate::core::pipeline::GriddingPipeline;
use crate::io::geotiff::GeoTiffWriter;
use crate::io::polar::PolarDatasetWriter;
use crate::io::rainbow::{RainbowReader, RainbowScan};
use crate::types::{GriddedProduct, RadarError, RawScan, ReflectivityUnit};
use chrono::Utc;
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn to_py_err(e: RadarError) -> PyErr {
    match e {
        RadarError::Io(err) => PyIOError::new_err(err.to_string()),
        RadarError::Configuration(msg) | RadarError::MalformedScan(msg) => PyValueError::new_err(msg),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

fn scan_to_dict(py: Python, decoded: &RainbowScan) -> PyResult<PyObject> {
    let scan = &decoded.scan;
    let result = PyDict::new(py);
    result.set_item("data", scan.data.to_pyarray(py))?;
    result.set_item("azimuths", scan.azimuths.to_pyarray(py))?;
    result.set_item("ranges", scan.ranges.to_pyarray(py))?;
    result.set_item("elevation_deg", scan.elevation_deg)?;
    result.set_item("timestamp", scan.timestamp.to_rfc3339())?;
    result.set_item("nodata", scan.nodata)?;
    result.set_item("units", scan.unit.to_string())?;
    result.set_item("radar_id", scan.radar_id.clone())?;
    result.set_item("slice_count", decoded.slice_count)?;
    if let Some(sensor) = &decoded.sensor {
        result.set_item("radar_lat", sensor.latitude)?;
        result.set_item("radar_lon", sensor.longitude)?;
        result.set_item("radar_alt_m", sensor.altitude)?;
    }
    Ok(result.into())
}

fn product_to_dict(py: Python, product: &GriddedProduct) -> PyResult<PyObject> {
    let metadata = serde_json::to_string(&product.metadata)
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;

    let result = PyDict::new(py);
    result.set_item("data", product.data.to_pyarray(py))?;
    result.set_item("geotransform", product.grid.geo_transform().to_array().to_vec())?;
    result.set_item("crs", product.grid.crs.to_string())?;
    result.set_item("nodata", product.nodata)?;
    result.set_item("status", format!("{:?}", product.metadata.status))?;
    result.set_item("metadata", metadata)?;
    Ok(result.into())
}

/// Read one sweep of a Rainbow `.azi` file
#[pyfunction]
#[pyo3(signature = (path, slice = 0))]
fn read_azi(py: Python, path: String, slice: usize) -> PyResult<PyObject> {
    let decoded = RainbowReader::new(&path)
        .and_then(|reader| reader.read_slice(slice))
        .map_err(to_py_err)?;
    scan_to_dict(py, &decoded)
}

/// Gridding pipeline configured from a YAML parameter file
#[pyclass(name = "GriddingPipeline", unsendable)]
struct PyGriddingPipeline {
    config: PipelineConfig,
    inner: GriddingPipeline,
}

#[pymethods]
impl PyGriddingPipeline {
    #[new]
    fn new(config_path: String) -> PyResult<Self> {
        let config = PipelineConfig::from_yaml_file(&config_path).map_err(to_py_err)?;
        let inner = config.build_pipeline().map_err(to_py_err)?;
        Ok(Self { config, inner })
    }

    /// Grid a Rainbow file; the radar position in the file wins over the config
    #[pyo3(signature = (path, auto_extent = None))]
    fn process_file(&self, py: Python, path: String, auto_extent: Option<bool>) -> PyResult<PyObject> {
        let decoded = RainbowReader::new(&path)
            .and_then(|reader| reader.read())
            .map_err(to_py_err)?;
        let auto = auto_extent.unwrap_or_else(|| self.config.grid.is_auto_extent());
        let product = self.grid_file_scan(&decoded, auto).map_err(to_py_err)?;
        product_to_dict(py, &product)
    }

    /// Grid a polar reflectivity array (azimuth x range) on the configured grid
    #[pyo3(signature = (data, azimuths, ranges, elevation_deg, units = "dBZ", nodata = -9999.0))]
    fn process_array(
        &self,
        py: Python,
        data: PyReadonlyArray2<f32>,
        azimuths: Vec<f64>,
        ranges: Vec<f64>,
        elevation_deg: f64,
        units: &str,
        nodata: f32,
    ) -> PyResult<PyObject> {
        let unit: ReflectivityUnit = units.parse().map_err(to_py_err)?;
        let scan = RawScan::new(
            azimuths,
            ranges,
            data.as_array().to_owned(),
            elevation_deg,
            Utc::now(),
            nodata,
            unit,
        )
        .map_err(to_py_err)?;

        let product = if self.config.grid.is_auto_extent() {
            self.inner.process_auto_extent(&scan)
        } else {
            self.inner.process(&scan)
        }
        .map_err(to_py_err)?;
        product_to_dict(py, &product)
    }

    /// Grid a Rainbow file and save the product as GeoTIFF
    fn write_geotiff(&self, path: String, output: String) -> PyResult<String> {
        let decoded = RainbowReader::new(&path)
            .and_then(|reader| reader.read())
            .map_err(to_py_err)?;
        let product = self
            .grid_file_scan(&decoded, self.config.grid.is_auto_extent())
            .map_err(to_py_err)?;

        GeoTiffWriter::new().write(&product, &output).map_err(to_py_err)?;
        Ok(output)
    }

    /// Calibrated sweep of a Rainbow file with longitude, latitude and
    /// altitude arrays for every bin
    #[pyo3(signature = (path, slice = 0))]
    fn geolocate(&self, py: Python, path: String, slice: usize) -> PyResult<PyObject> {
        let decoded = RainbowReader::new(&path)
            .and_then(|reader| reader.read_slice(slice))
            .map_err(to_py_err)?;
        let (scan, geolocation) = self
            .pipeline_for(&decoded)
            .and_then(|pipeline| pipeline.geolocate(&decoded.scan))
            .map_err(to_py_err)?;

        let result = PyDict::new(py);
        result.set_item("data", scan.data.to_pyarray(py))?;
        result.set_item("azimuths", scan.azimuths.to_pyarray(py))?;
        result.set_item("ranges", scan.ranges.to_pyarray(py))?;
        result.set_item("lon", geolocation.longitude.to_pyarray(py))?;
        result.set_item("lat", geolocation.latitude.to_pyarray(py))?;
        result.set_item("alt", geolocation.altitude.to_pyarray(py))?;
        result.set_item("nodata", scan.nodata)?;
        result.set_item("timestamp", scan.timestamp.to_rfc3339())?;
        Ok(result.into())
    }

    /// Export a Rainbow sweep in polar coordinates (`.nc` or GeoTIFF)
    fn write_polar(&self, path: String, output: String) -> PyResult<String> {
        let decoded = RainbowReader::new(&path)
            .and_then(|reader| reader.read())
            .map_err(to_py_err)?;
        let pipeline = self.pipeline_for(&decoded).map_err(to_py_err)?;
        let (scan, geolocation) = pipeline.geolocate(&decoded.scan).map_err(to_py_err)?;
        PolarDatasetWriter::new()
            .write(&scan, &geolocation, pipeline.site(), &output)
            .map_err(to_py_err)?;
        Ok(output)
    }

    fn project_site(&self) -> PyResult<(f64, f64)> {
        self.inner.project_site().map_err(to_py_err)
    }

    fn __repr__(&self) -> String {
        let grid = self.inner.grid();
        format!(
            "GriddingPipeline(radar='{}', crs='{}', cell_size={})",
            self.inner.site().id,
            grid.crs,
            grid.cell_size
        )
    }
}

impl PyGriddingPipeline {
    /// Pipeline for the radar position found in the file, if any
    fn pipeline_for(&self, decoded: &RainbowScan) -> Result<GriddingPipeline, RadarError> {
        let site = match &decoded.sensor {
            Some(sensor) => sensor.to_site(&self.config.radar.id, self.config.radar.beam_half_width)?,
            None => self.config.to_site()?,
        };
        self.config.build_pipeline_for(site)
    }

    fn grid_file_scan(&self, decoded: &RainbowScan, auto_extent: bool) -> Result<GriddedProduct, RadarError> {
        let pipeline = self.pipeline_for(decoded)?;
        if auto_extent {
            pipeline.process_auto_extent(&decoded.scan)
        } else {
            pipeline.process(&decoded.scan)
        }
    }
}

#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(read_azi, m)?)?;
    m.add_class::<PyGriddingPipeline>()?;
    Ok(())
}
