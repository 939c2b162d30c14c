use crate::core::beam::{BeamGeometryModel, BeamPoint};
use crate::core::cancel::CancellationToken;
use crate::core::geodesic::Geodesic;
use crate::core::projector::GeodeticProjector;
use crate::types::{
    CrsId, GeoSample, PolarGeolocation, RadarError, RadarResult, RadarSite, RawScan, Reflectivity,
};
use ndarray::{Array2, ArrayView1};

/// Rays handled between two cancellation checks
const AZIMUTH_BATCH: usize = 256;

/// One valid bin located on the ellipsoid, before map projection
#[derive(Debug, Clone, Copy)]
struct LocatedBin {
    lon: f64,
    lat: f64,
    height: f64,
    value: Reflectivity,
}

/// Turns every valid (azimuth, range) bin of a scan into a projected sample
#[derive(Debug)]
pub struct ScanGeoreferencer {
    site: RadarSite,
    beam: BeamGeometryModel,
    projector: GeodeticProjector,
    /// Bins beyond this slant range are dropped (range folding / second trip)
    max_range: Option<f64>,
}

impl ScanGeoreferencer {
    pub fn new(site: RadarSite, crs: &CrsId) -> RadarResult<Self> {
        let projector = GeodeticProjector::new(&site, crs)?;
        Ok(Self {
            beam: BeamGeometryModel::for_latitude(site.latitude),
            site,
            projector,
            max_range: None,
        })
    }

    pub fn with_beam_model(mut self, beam: BeamGeometryModel) -> Self {
        self.beam = beam;
        self
    }

    pub fn with_max_range(mut self, max_range: Option<f64>) -> RadarResult<Self> {
        if let Some(r) = max_range {
            if !(r > 0.0 && r.is_finite()) {
                return Err(RadarError::Configuration(format!(
                    "Maximum range must be positive, got {}",
                    r
                )));
            }
        }
        self.max_range = max_range;
        Ok(self)
    }

    pub fn site(&self) -> &RadarSite {
        &self.site
    }

    pub fn beam(&self) -> &BeamGeometryModel {
        &self.beam
    }

    pub fn projector(&self) -> &GeodeticProjector {
        &self.projector
    }

    /// Georeference all valid bins of a scan
    pub fn georeference(&self, scan: &RawScan) -> RadarResult<Vec<GeoSample>> {
        self.georeference_with_cancel(scan, &CancellationToken::new())
    }

    /// Georeference all valid bins, polling `cancel` between azimuth batches
    pub fn georeference_with_cancel(
        &self,
        scan: &RawScan,
        cancel: &CancellationToken,
    ) -> RadarResult<Vec<GeoSample>> {
        scan.validate()?;

        let (n_az, n_rng) = scan.data.dim();
        let beam_points = self.beam.propagate_ranges(&scan.ranges, scan.elevation_deg);
        let usable = self.usable_bins(&scan.ranges);
        if usable < n_rng {
            log::debug!(
                "Dropping {} range bins beyond {:.0} m",
                n_rng - usable,
                self.max_range.unwrap_or(f64::INFINITY)
            );
        }

        log::debug!(
            "Georeferencing {} azimuths x {} bins at {:.2}° elevation",
            n_az,
            usable,
            scan.elevation_deg
        );

        let geodesic = self.projector.geodesic();
        let mut samples = Vec::with_capacity(scan.valid_bin_count());

        for batch_start in (0..n_az).step_by(AZIMUTH_BATCH) {
            cancel.check()?;
            let batch_end = (batch_start + AZIMUTH_BATCH).min(n_az);

            let located = locate_rays(scan, batch_start..batch_end, &beam_points[..usable], geodesic);
            if located.is_empty() {
                continue;
            }

            let mut xs: Vec<f64> = located.iter().map(|b| b.lon).collect();
            let mut ys: Vec<f64> = located.iter().map(|b| b.lat).collect();
            self.projector.project_lonlat_batch(&mut xs, &mut ys)?;

            samples.extend(located.iter().zip(xs.iter().zip(ys.iter())).map(|(bin, (&x, &y))| {
                GeoSample {
                    easting: x,
                    northing: y,
                    height: bin.height,
                    value: bin.value,
                }
            }));
        }

        log::info!(
            "Georeferenced {} samples from {} bins",
            samples.len(),
            n_az * n_rng
        );
        Ok(samples)
    }

    /// Longitude, latitude and altitude of every bin, valid or not
    pub fn geolocate(&self, scan: &RawScan) -> RadarResult<PolarGeolocation> {
        scan.validate()?;

        let (n_az, n_rng) = scan.data.dim();
        let beam_points = self.beam.propagate_ranges(&scan.ranges, scan.elevation_deg);
        let geodesic = self.projector.geodesic();
        let site_altitude = self.site.altitude;

        let locate = |i: usize| -> Vec<(f64, f64, f64)> {
            let azimuth = scan.azimuths[i];
            beam_points
                .iter()
                .map(|p| {
                    let (lon, lat) = geodesic.forward(azimuth, p.ground_distance);
                    (lon, lat, site_altitude + p.height)
                })
                .collect()
        };

        #[cfg(feature = "parallel")]
        let rays: Vec<Vec<(f64, f64, f64)>> = {
            use rayon::prelude::*;
            (0..n_az).into_par_iter().map(locate).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let rays: Vec<Vec<(f64, f64, f64)>> = (0..n_az).map(locate).collect();

        let mut longitude = Array2::zeros((n_az, n_rng));
        let mut latitude = Array2::zeros((n_az, n_rng));
        let mut altitude = Array2::zeros((n_az, n_rng));
        for (i, ray) in rays.into_iter().enumerate() {
            for (j, (lon, lat, alt)) in ray.into_iter().enumerate() {
                longitude[[i, j]] = lon;
                latitude[[i, j]] = lat;
                altitude[[i, j]] = alt;
            }
        }

        Ok(PolarGeolocation {
            longitude,
            latitude,
            altitude,
        })
    }

    /// Number of leading range bins within the maximum range
    fn usable_bins(&self, ranges: &[f64]) -> usize {
        match self.max_range {
            Some(limit) => ranges.partition_point(|&r| r <= limit),
            None => ranges.len(),
        }
    }
}

/// Locate the valid bins of a block of rays; independent per ray
fn locate_rays(
    scan: &RawScan,
    rays: std::ops::Range<usize>,
    beam_points: &[BeamPoint],
    geodesic: Geodesic,
) -> Vec<LocatedBin> {
    let per_ray = |i: usize| locate_ray(scan, scan.azimuths[i], scan.data.row(i), beam_points, geodesic);

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        let located: Vec<Vec<LocatedBin>> = rays.into_par_iter().map(per_ray).collect();
        located.into_iter().flatten().collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        rays.flat_map(per_ray).collect()
    }
}

fn locate_ray(
    scan: &RawScan,
    azimuth: f64,
    row: ArrayView1<'_, Reflectivity>,
    beam_points: &[BeamPoint],
    geodesic: Geodesic,
) -> Vec<LocatedBin> {
    row.iter()
        .zip(beam_points)
        .filter(|&(&value, _)| !scan.is_missing(value))
        .map(|(&value, p)| {
            let (lon, lat) = geodesic.forward(azimuth, p.ground_distance);
            LocatedBin {
                lon,
                lat,
                height: p.height,
                value,
            }
        })
        .collect()
}
