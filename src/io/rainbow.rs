//! Reader for Rainbow5 single-sweep (`.azi`) files.
//!
//! A Rainbow file is an XML header describing the volume, terminated by an
//! `<!-- END XML -->` marker, followed by binary `<BLOB>` sections holding the
//! ray angles and the quantised moment data.

use crate::types::{
    uniform_azimuths, RadarError, RadarResult, RadarSite, RawScan, ReflectivityUnit, DEFAULT_NODATA,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use flate2::read::ZlibDecoder;
use ndarray::Array2;
use quick_xml::de::from_str;
use regex::bytes::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

const END_XML_MARKER: &[u8] = b"<!-- END XML -->";
const BLOB_START: &[u8] = b"<BLOB";

/// File formats the gridder can ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFormat {
    Rainbow,
    Unknown,
}

/// Detect the scan format from the file extension
pub fn detect_format<P: AsRef<Path>>(path: P) -> ScanFormat {
    match path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("azi") => ScanFormat::Rainbow,
        _ => ScanFormat::Unknown,
    }
}

// XML header structures (only the parts the gridder needs)

#[derive(Debug, Deserialize)]
struct VolumeXml {
    #[serde(rename = "@datetime", default)]
    datetime: Option<String>,
    #[serde(default)]
    sensorinfo: Option<SensorInfoXml>,
    scan: ScanXml,
}

#[derive(Debug, Deserialize)]
struct ScanXml {
    #[serde(rename = "@date", default)]
    date: Option<String>,
    #[serde(rename = "@time", default)]
    time: Option<String>,
    #[serde(default)]
    sensorinfo: Option<SensorInfoXml>,
    #[serde(rename = "slice", default)]
    slices: Vec<SliceXml>,
}

#[derive(Debug, Clone, Deserialize)]
struct SensorInfoXml {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    alt: Option<f64>,
    #[serde(default)]
    beamwidth: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SliceXml {
    #[serde(default)]
    posangle: Option<f64>,
    /// Bin length, km
    #[serde(default)]
    rangestep: Option<f64>,
    /// Distance of the first bin, km
    #[serde(default)]
    start_range: Option<f64>,
    #[serde(default)]
    slicedata: Option<SliceDataXml>,
}

#[derive(Debug, Deserialize)]
struct SliceDataXml {
    #[serde(rename = "@date", default)]
    date: Option<String>,
    #[serde(rename = "@time", default)]
    time: Option<String>,
    #[serde(default)]
    rayinfo: Vec<RayInfoXml>,
    #[serde(default)]
    rawdata: Option<RawDataXml>,
}

#[derive(Debug, Deserialize)]
struct RayInfoXml {
    #[serde(rename = "@refid")]
    refid: String,
    #[serde(rename = "@blobid")]
    blobid: u32,
    #[serde(rename = "@rays")]
    rays: usize,
    #[serde(rename = "@depth")]
    depth: u32,
}

#[derive(Debug, Deserialize)]
struct RawDataXml {
    #[serde(rename = "@blobid")]
    blobid: u32,
    #[serde(rename = "@rays")]
    rays: usize,
    #[serde(rename = "@bins")]
    bins: usize,
    #[serde(rename = "@min")]
    min: f64,
    #[serde(rename = "@max")]
    max: f64,
    #[serde(rename = "@depth")]
    depth: u32,
    #[serde(rename = "@type")]
    data_type: String,
}

/// Radar position as declared in the file header
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    pub id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Full half-power beam width, degrees
    pub beam_width: Option<f64>,
}

impl SensorInfo {
    /// Radar site built from the header, with fallbacks for what it lacks
    pub fn to_site(&self, fallback_id: &str, fallback_half_width: f64) -> RadarResult<RadarSite> {
        RadarSite::new(
            self.id.clone().unwrap_or_else(|| fallback_id.to_string()),
            self.latitude,
            self.longitude,
            self.altitude,
            self.beam_width.map(|w| w / 2.0).unwrap_or(fallback_half_width),
        )
    }
}

/// One decoded sweep plus what the header says about the radar
#[derive(Debug, Clone)]
pub struct RainbowScan {
    pub scan: RawScan,
    pub sensor: Option<SensorInfo>,
    /// Number of slices in the file
    pub slice_count: usize,
}

/// Rainbow5 `.azi` reader
#[derive(Debug, Clone)]
pub struct RainbowReader {
    path: PathBuf,
}

impl RainbowReader {
    pub fn new<P: AsRef<Path>>(path: P) -> RadarResult<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(RadarError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path.display()),
            )));
        }
        if detect_format(&path) != ScanFormat::Rainbow {
            return Err(RadarError::InvalidFormat(format!(
                "Unsupported scan format: {}",
                path.display()
            )));
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the first sweep of the file
    pub fn read(&self) -> RadarResult<RainbowScan> {
        self.read_slice(0)
    }

    pub fn read_slice(&self, index: usize) -> RadarResult<RainbowScan> {
        log::info!("Reading Rainbow file {}", self.path.display());
        let bytes = std::fs::read(&self.path)?;
        parse_rainbow(&bytes, index)
    }
}

/// Decode sweep `index` from the bytes of a Rainbow file
pub fn parse_rainbow(bytes: &[u8], index: usize) -> RadarResult<RainbowScan> {
    let (header, body) = split_header(bytes)?;
    let volume: VolumeXml = from_str(header)
        .map_err(|e| RadarError::XmlParsing(format!("Failed to parse Rainbow header: {}", e)))?;

    let slice_count = volume.scan.slices.len();
    let slice = volume.scan.slices.get(index).ok_or_else(|| {
        RadarError::InvalidFormat(format!(
            "Slice {} requested but file has {} slices",
            index, slice_count
        ))
    })?;
    // Later slices only list what differs from the first one
    let first = &volume.scan.slices[0];

    let elevation = slice.posangle.or(first.posangle).ok_or_else(|| {
        RadarError::InvalidFormat("Slice has no elevation (posangle)".to_string())
    })?;
    let range_step_km = slice.rangestep.or(first.rangestep).ok_or_else(|| {
        RadarError::InvalidFormat("Slice has no range step (rangestep)".to_string())
    })?;
    let start_range_km = slice.start_range.or(first.start_range).unwrap_or(0.0);

    let slicedata = slice
        .slicedata
        .as_ref()
        .ok_or_else(|| RadarError::InvalidFormat("Slice has no slicedata".to_string()))?;
    let rawdata = slicedata
        .rawdata
        .as_ref()
        .ok_or_else(|| RadarError::InvalidFormat("Slice has no rawdata".to_string()))?;
    let unit: ReflectivityUnit = rawdata.data_type.parse().map_err(|_| {
        RadarError::InvalidFormat(format!(
            "Moment '{}' is not a reflectivity field",
            rawdata.data_type
        ))
    })?;

    let blobs = extract_blobs(body)?;
    let blob = |id: u32| {
        blobs
            .get(&id)
            .ok_or_else(|| RadarError::InvalidFormat(format!("Missing BLOB {}", id)))
    };

    // Reflectivity
    let levels = quantisation_levels(rawdata.depth)?;
    let raw = unpack_samples(blob(rawdata.blobid)?, rawdata.depth, rawdata.rays * rawdata.bins)?;
    let scale = (rawdata.max - rawdata.min) / levels;
    let values: Vec<f32> = raw
        .iter()
        .map(|&r| {
            if r == 0 {
                DEFAULT_NODATA
            } else {
                (rawdata.min + r as f64 * scale) as f32
            }
        })
        .collect();
    let data = Array2::from_shape_vec((rawdata.rays, rawdata.bins), values)
        .map_err(|e| RadarError::InvalidFormat(format!("Shape error: {}", e)))?;

    // Ray angles
    let azimuths = match slicedata.rayinfo.iter().find(|r| r.refid == "startangle") {
        Some(info) => {
            let levels = quantisation_levels(info.depth)?;
            unpack_samples(blob(info.blobid)?, info.depth, info.rays)?
                .into_iter()
                .map(|r| r as f64 * 360.0 / levels)
                .collect()
        }
        None => {
            log::warn!("No ray angles in file, assuming uniform azimuths");
            uniform_azimuths(rawdata.rays)
        }
    };

    let ranges: Vec<f64> = (0..rawdata.bins)
        .map(|i| (start_range_km + i as f64 * range_step_km) * 1000.0)
        .collect();

    let timestamp = parse_timestamp(slicedata.date.as_deref(), slicedata.time.as_deref())
        .or_else(|| parse_timestamp(volume.scan.date.as_deref(), volume.scan.time.as_deref()))
        .or_else(|| volume.datetime.as_deref().and_then(parse_datetime))
        .ok_or_else(|| RadarError::InvalidFormat("Scan has no timestamp".to_string()))?;

    let sensor = volume
        .sensorinfo
        .or(volume.scan.sensorinfo)
        .and_then(|s| match (s.lat, s.lon) {
            (Some(latitude), Some(longitude)) => Some(SensorInfo {
                id: s.id,
                latitude,
                longitude,
                altitude: s.alt.unwrap_or(0.0),
                beam_width: s.beamwidth,
            }),
            _ => None,
        });

    let mut scan = RawScan::new(
        azimuths,
        ranges,
        data,
        elevation,
        timestamp,
        DEFAULT_NODATA,
        unit,
    )?;
    if let Some(id) = sensor.as_ref().and_then(|s| s.id.clone()) {
        scan = scan.with_radar_id(id);
    }

    log::debug!(
        "Decoded slice {}/{}: {} rays x {} bins, {:.2}° elevation, {} valid bins",
        index + 1,
        slice_count,
        rawdata.rays,
        rawdata.bins,
        elevation,
        scan.valid_bin_count()
    );

    Ok(RainbowScan {
        scan,
        sensor,
        slice_count,
    })
}

/// Split the file into the XML header text and the binary remainder
fn split_header(bytes: &[u8]) -> RadarResult<(&str, &[u8])> {
    let header_end = find(bytes, END_XML_MARKER)
        .or_else(|| find(bytes, BLOB_START))
        .ok_or_else(|| RadarError::InvalidFormat("No Rainbow XML header found".to_string()))?;

    let header = std::str::from_utf8(&bytes[..header_end])
        .map_err(|e| RadarError::XmlParsing(format!("Header is not UTF-8: {}", e)))?;
    Ok((header, &bytes[header_end..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decompressed payload of every BLOB, by id
fn extract_blobs(body: &[u8]) -> RadarResult<HashMap<u32, Vec<u8>>> {
    let pattern = Regex::new(r#"<BLOB blobid="(\d+)" size="(\d+)" compression="(\w+)">\n?"#)
        .map_err(|e| RadarError::Processing(format!("Invalid BLOB pattern: {}", e)))?;

    let mut blobs = HashMap::new();
    for caps in pattern.captures_iter(body) {
        let (Some(whole), Some(id), Some(size), Some(compression)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let id: u32 = ascii_number(id.as_bytes())?;
        let size: usize = ascii_number(size.as_bytes())?;

        let start = whole.end();
        let payload = body.get(start..start + size).ok_or_else(|| {
            RadarError::InvalidFormat(format!("BLOB {} truncated ({} bytes declared)", id, size))
        })?;

        let decoded = match compression.as_bytes() {
            b"qt" => inflate_qt(payload)?,
            b"none" => payload.to_vec(),
            other => {
                return Err(RadarError::InvalidFormat(format!(
                    "Unsupported BLOB compression: {}",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        blobs.insert(id, decoded);
    }

    log::debug!("Found {} BLOB sections", blobs.len());
    Ok(blobs)
}

fn ascii_number<T: std::str::FromStr>(digits: &[u8]) -> RadarResult<T> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RadarError::InvalidFormat("Bad number in BLOB tag".to_string()))
}

/// Qt `qCompress` layout: 4-byte big-endian length, then a zlib stream
fn inflate_qt(payload: &[u8]) -> RadarResult<Vec<u8>> {
    if payload.len() < 4 {
        return Err(RadarError::InvalidFormat("Compressed BLOB too short".to_string()));
    }
    let expected = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;

    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(&payload[4..])
        .read_to_end(&mut out)
        .map_err(|e| RadarError::InvalidFormat(format!("Failed to inflate BLOB: {}", e)))?;

    if out.len() != expected {
        log::warn!("BLOB inflated to {} bytes, header says {}", out.len(), expected);
    }
    Ok(out)
}

fn quantisation_levels(depth: u32) -> RadarResult<f64> {
    match depth {
        8 | 16 | 32 => Ok(2f64.powi(depth as i32)),
        other => Err(RadarError::InvalidFormat(format!(
            "Unsupported data depth: {} bits",
            other
        ))),
    }
}

/// Unpack `count` big-endian unsigned samples of `depth` bits
fn unpack_samples(bytes: &[u8], depth: u32, count: usize) -> RadarResult<Vec<u32>> {
    let width = (depth / 8) as usize;
    if bytes.len() < count * width {
        return Err(RadarError::InvalidFormat(format!(
            "BLOB holds {} bytes, {} samples of {} bits need {}",
            bytes.len(),
            count,
            depth,
            count * width
        )));
    }

    let samples = bytes[..count * width]
        .chunks_exact(width)
        .map(|c| match c {
            [a] => *a as u32,
            [a, b] => u16::from_be_bytes([*a, *b]) as u32,
            [a, b, c, d] => u32::from_be_bytes([*a, *b, *c, *d]),
            _ => 0,
        })
        .collect();
    Ok(samples)
}

fn parse_timestamp(date: Option<&str>, time: Option<&str>) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date?.trim(), "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time?.trim(), "%H:%M:%S%.f").ok()?;
    Some(NaiveDateTime::new(date, time).and_utc())
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}
