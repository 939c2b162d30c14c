//! Grid a Rainbow `.azi` reflectivity sweep onto a georeferenced GeoTIFF.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};

use radgrid::io::rainbow::{detect_format, RainbowReader, ScanFormat};
use radgrid::{GeoTiffWriter, PipelineConfig, PolarDatasetWriter, ProductStatus};

#[derive(Parser, Debug)]
#[command(name = "azi2grid")]
#[command(about = "Georeference a Rainbow .azi radar sweep and grid it to GeoTIFF")]
struct Args {
    /// Rainbow .azi file
    #[arg(short, long)]
    file: PathBuf,

    /// YAML parameter file
    #[arg(short, long, env = "RADGRID_CONFIG", default_value = "config/params.yaml")]
    config: PathBuf,

    /// Output GeoTIFF (default: <file stem>_grid.tif next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also export the sweep in polar coordinates with per-bin lon/lat/alt
    /// (`.nc` for netCDF, GeoTIFF otherwise)
    #[arg(long)]
    polar_output: Option<PathBuf>,

    /// Size the grid from the scan extent instead of the configured grid
    #[arg(long)]
    auto_extent: bool,

    /// Sweep to grid, for files holding several slices
    #[arg(long, default_value = "0")]
    slice: usize,

    /// Ignore the radar position stored in the file
    #[arg(long)]
    config_site: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if detect_format(&args.file) != ScanFormat::Rainbow {
        bail!("Unsupported scan format: {}", args.file.display());
    }

    let config = PipelineConfig::from_yaml_file(&args.config)
        .with_context(|| format!("Failed to load configuration {}", args.config.display()))?;

    let decoded = RainbowReader::new(&args.file)
        .and_then(|reader| reader.read_slice(args.slice))
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    info!(
        "Read slice {} of {}: {} rays x {} bins at {:.2}°",
        args.slice + 1,
        decoded.slice_count,
        decoded.scan.azimuths.len(),
        decoded.scan.ranges.len(),
        decoded.scan.elevation_deg
    );

    // The file's radar position wins over the configuration, as long as it is usable
    let site = match (&decoded.sensor, args.config_site) {
        (Some(sensor), false) => sensor
            .to_site(&config.radar.id, config.radar.beam_half_width)
            .or_else(|e| {
                warn!("Ignoring radar position from file: {}", e);
                config.to_site()
            })?,
        _ => config.to_site()?,
    };

    let pipeline = config
        .build_pipeline_for(site)
        .context("Invalid gridding configuration")?;

    if let Some(polar_path) = &args.polar_output {
        let (scan, geolocation) = pipeline
            .geolocate(&decoded.scan)
            .context("Failed to geolocate polar bins")?;
        PolarDatasetWriter::new()
            .write(&scan, &geolocation, pipeline.site(), polar_path)
            .with_context(|| format!("Failed to write {}", polar_path.display()))?;
        info!("Wrote polar dataset {}", polar_path.display());
    }

    let product = if args.auto_extent || config.grid.is_auto_extent() {
        pipeline.process_auto_extent(&decoded.scan)
    } else {
        pipeline.process(&decoded.scan)
    }
    .context("Gridding failed")?;

    match product.metadata.status {
        ProductStatus::Complete => info!("Grid coverage: {:.1}%", product.coverage_percent()),
        ProductStatus::EmptyScan => warn!("Scan holds no valid bins, writing an empty grid"),
        ProductStatus::NoCoverage => warn!("No echo reaches the output grid, writing an empty grid"),
    }

    let output = args.output.unwrap_or_else(|| {
        let stem = args
            .file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "radar".to_string());
        args.file.with_file_name(format!("{}_grid.tif", stem))
    });

    GeoTiffWriter::new()
        .write(&product, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Wrote {}", output.display());

    Ok(())
}
