use crate::core::cancel::CancellationToken;
use crate::core::spatial_index::BucketIndex;
use crate::types::{GeoSample, GridImage, GridSpec, RadarError, RadarResult, Reflectivity};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Range;

/// Output rows resolved between two cancellation checks
const ROW_BATCH: usize = 64;

/// Distance floor for inverse-distance weights, meters
pub const DEFAULT_MIN_DISTANCE: f64 = 1e-6;

/// How scattered samples are resolved onto a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Inverse-distance weighting of every sample within the search radius
    Idw,
    /// Closest sample, within the search radius when one is set
    Nearest,
}

impl std::fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpolationMethod::Idw => write!(f, "idw"),
            InterpolationMethod::Nearest => write!(f, "nearest"),
        }
    }
}

/// Interpolation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationParams {
    pub method: InterpolationMethod,
    /// Search radius around each cell centre, meters.
    ///
    /// `None` is only valid for `Nearest` and fills every cell with its
    /// closest sample however far away it is.
    pub search_radius: Option<f64>,
    /// IDW power exponent
    pub power: f64,
    /// Distance floor for IDW weights, meters
    pub min_distance: f64,
}

impl Default for InterpolationParams {
    fn default() -> Self {
        Self {
            method: InterpolationMethod::Idw,
            search_radius: Some(1000.0),
            power: 2.0,
            min_distance: DEFAULT_MIN_DISTANCE,
        }
    }
}

impl InterpolationParams {
    pub fn validate(&self) -> RadarResult<()> {
        match self.search_radius {
            Some(radius) if !(radius > 0.0 && radius.is_finite()) => {
                return Err(RadarError::Configuration(format!(
                    "Search radius must be positive, got {}",
                    radius
                )));
            }
            None if self.method == InterpolationMethod::Idw => {
                return Err(RadarError::Configuration(
                    "IDW needs a search radius; only nearest can run unbounded".to_string(),
                ));
            }
            _ => {}
        }
        if !(self.power > 0.0 && self.power.is_finite()) {
            return Err(RadarError::Configuration(format!(
                "IDW power must be positive, got {}",
                self.power
            )));
        }
        if !(self.min_distance > 0.0 && self.min_distance.is_finite()) {
            return Err(RadarError::Configuration(format!(
                "Minimum IDW distance must be positive, got {}",
                self.min_distance
            )));
        }
        Ok(())
    }
}

/// Resolves scattered samples onto a regular grid
#[derive(Debug, Clone)]
pub struct GridInterpolator {
    params: InterpolationParams,
}

impl GridInterpolator {
    pub fn new(params: InterpolationParams) -> RadarResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &InterpolationParams {
        &self.params
    }

    /// Interpolate `samples` onto `grid`; cells with no sample in reach get `nodata`
    pub fn interpolate(&self, grid: &GridSpec, samples: &[GeoSample], nodata: Reflectivity) -> GridImage {
        let mut image = Array2::from_elem(grid.shape(), nodata);
        if let Some(index) = self.index_samples(grid, samples) {
            for rows in row_batches(grid.rows) {
                self.fill_rows(&mut image, &index, grid, rows, nodata);
            }
        }
        image
    }

    /// As `interpolate`, polling `cancel` between row batches
    pub fn interpolate_with_cancel(
        &self,
        grid: &GridSpec,
        samples: &[GeoSample],
        nodata: Reflectivity,
        cancel: &CancellationToken,
    ) -> RadarResult<GridImage> {
        let mut image = Array2::from_elem(grid.shape(), nodata);
        if let Some(index) = self.index_samples(grid, samples) {
            for rows in row_batches(grid.rows) {
                cancel.check()?;
                self.fill_rows(&mut image, &index, grid, rows, nodata);
            }
        }
        Ok(image)
    }

    /// Index over `samples`, `None` when there is nothing to interpolate
    fn index_samples(&self, grid: &GridSpec, samples: &[GeoSample]) -> Option<BucketIndex> {
        if samples.is_empty() {
            log::debug!("No samples to interpolate, grid left empty");
            return None;
        }

        log::debug!(
            "Interpolating {} samples onto {}x{} grid ({}, R = {}, p = {})",
            samples.len(),
            grid.rows,
            grid.cols,
            self.params.method,
            self.params
                .search_radius
                .map_or_else(|| "unbounded".to_string(), |r| format!("{:.1} m", r)),
            self.params.power
        );

        // Unbounded nearest: one bucket per cell
        let bucket_size = self.params.search_radius.unwrap_or(grid.cell_size);
        let index = BucketIndex::build(samples, bucket_size);
        if index.is_empty() {
            None
        } else {
            Some(index)
        }
    }

    fn fill_rows(
        &self,
        image: &mut GridImage,
        index: &BucketIndex,
        grid: &GridSpec,
        rows: Range<usize>,
        nodata: Reflectivity,
    ) {
        let first = rows.start;
        let values = self.resolve_rows(index, grid, rows, nodata);
        for (offset, row_values) in values.into_iter().enumerate() {
            image
                .row_mut(first + offset)
                .iter_mut()
                .zip(row_values)
                .for_each(|(cell, v)| *cell = v);
        }
    }

    fn resolve_rows(
        &self,
        index: &BucketIndex,
        grid: &GridSpec,
        rows: Range<usize>,
        nodata: Reflectivity,
    ) -> Vec<Vec<Reflectivity>> {
        let resolve_row = |row: usize| -> Vec<Reflectivity> {
            let mut neighbours = Vec::new();
            (0..grid.cols)
                .map(|col| {
                    let (x, y) = grid.cell_center(row, col);
                    self.resolve_cell(index, x, y, &mut neighbours).unwrap_or(nodata)
                })
                .collect()
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            rows.into_par_iter().map(resolve_row).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            rows.map(resolve_row).collect()
        }
    }

    /// Value for one cell centre, `None` when no sample is within reach.
    ///
    /// `neighbours` is scratch space reused across cells.
    fn resolve_cell(
        &self,
        index: &BucketIndex,
        x: f64,
        y: f64,
        neighbours: &mut Vec<(f64, Reflectivity)>,
    ) -> Option<Reflectivity> {
        if self.params.method == InterpolationMethod::Nearest {
            return index
                .nearest(x, y, self.params.search_radius)
                .map(|(_, p)| p.value);
        }

        let radius = self.params.search_radius?;
        neighbours.clear();
        index.for_each_within(x, y, radius, |p, d2| neighbours.push((d2, p.value)));

        match neighbours.len() {
            0 => None,
            1 => Some(neighbours[0].1),
            _ => {
                // Fixed summation order makes the result independent of input order
                neighbours.sort_unstable_by(neighbour_order);
                Some(self.weighted_mean(neighbours))
            }
        }
    }

    fn weighted_mean(&self, neighbours: &[(f64, Reflectivity)]) -> Reflectivity {
        let eps = self.params.min_distance;
        let power = self.params.power;

        let (weighted, total) = neighbours.iter().fold((0.0f64, 0.0f64), |(num, den), &(d2, v)| {
            let w = if power == 2.0 {
                1.0 / d2.max(eps * eps)
            } else {
                d2.sqrt().max(eps).powf(-power)
            };
            (num + w * v as f64, den + w)
        });

        (weighted / total) as Reflectivity
    }
}

fn row_batches(rows: usize) -> impl Iterator<Item = Range<usize>> {
    (0..rows)
        .step_by(ROW_BATCH)
        .map(move |start| start..(start + ROW_BATCH).min(rows))
}

fn neighbour_order(a: &(f64, Reflectivity), b: &(f64, Reflectivity)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.total_cmp(&b.1))
}

/// Samples that can influence a grid: inside its bounds widened by `margin`
pub fn clip_to_grid(samples: Vec<GeoSample>, grid: &GridSpec, margin: f64) -> Vec<GeoSample> {
    let reach = grid.bounds().expanded(margin);
    samples
        .into_iter()
        .filter(|s| reach.contains(s.easting, s.northing))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CrsId;
    use approx::assert_relative_eq;

    const NODATA: f32 = -9999.0;

    fn sample(x: f64, y: f64, v: f32) -> GeoSample {
        GeoSample {
            easting: x,
            northing: y,
            height: 0.0,
            value: v,
        }
    }

    fn grid_10x10() -> GridSpec {
        GridSpec::new(CrsId::Epsg(32717), 0.0, 1000.0, 100.0, 10, 10).unwrap()
    }

    fn idw(radius: f64) -> GridInterpolator {
        GridInterpolator::new(InterpolationParams {
            search_radius: Some(radius),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_parameters() {
        for params in [
            InterpolationParams { search_radius: Some(0.0), ..Default::default() },
            InterpolationParams { search_radius: Some(f64::NAN), ..Default::default() },
            InterpolationParams { search_radius: None, ..Default::default() },
            InterpolationParams { power: -1.0, ..Default::default() },
            InterpolationParams { min_distance: 0.0, ..Default::default() },
        ] {
            assert!(matches!(GridInterpolator::new(params), Err(RadarError::Configuration(_))));
        }
    }

    #[test]
    fn test_single_sample_reproduces_value() {
        let grid = grid_10x10();
        let image = idw(60.0).interpolate(&grid, &[sample(430.0, 470.0, 42.5)], NODATA);

        // Only cell (5, 4) has its centre (450, 450) within 60 m
        assert_eq!(image[[5, 4]], 42.5);
        let valid = image.iter().filter(|&&v| v != NODATA).count();
        assert_eq!(valid, 1);
    }

    #[test]
    fn test_empty_input_yields_nodata_grid() {
        let grid = grid_10x10();
        let image = idw(500.0).interpolate(&grid, &[], NODATA);
        assert!(image.iter().all(|&v| v == NODATA));
    }

    #[test]
    fn test_idw_weights_favour_closer_sample() {
        let grid = GridSpec::new(CrsId::Epsg(32717), 0.0, 100.0, 100.0, 1, 1).unwrap();
        // Centre (50, 50); distances 10 and 30
        let samples = [sample(60.0, 50.0, 10.0), sample(20.0, 50.0, 20.0)];
        let image = idw(100.0).interpolate(&grid, &samples, NODATA);

        let (w1, w2) = (1.0 / 100.0, 1.0 / 900.0);
        let expected = (10.0 * w1 + 20.0 * w2) / (w1 + w2);
        assert_relative_eq!(image[[0, 0]] as f64, expected, epsilon = 1e-5);
    }

    #[test]
    fn test_sample_on_cell_centre_dominates() {
        let grid = GridSpec::new(CrsId::Epsg(32717), 0.0, 100.0, 100.0, 1, 1).unwrap();
        let samples = [sample(50.0, 50.0, 35.0), sample(90.0, 50.0, 5.0)];
        let image = idw(100.0).interpolate(&grid, &samples, NODATA);
        assert_relative_eq!(image[[0, 0]], 35.0, epsilon = 1e-4);
    }

    #[test]
    fn test_result_is_independent_of_sample_order() {
        let grid = grid_10x10();
        let mut samples: Vec<GeoSample> = (0..200)
            .map(|i| {
                let t = i as f64;
                sample(
                    500.0 + 420.0 * (t * 0.731).sin(),
                    500.0 + 420.0 * (t * 1.213).cos(),
                    (i % 17) as f32 * 3.1 - 5.0,
                )
            })
            .collect();

        let interpolator = idw(180.0);
        let forward = interpolator.interpolate(&grid, &samples, NODATA);
        samples.reverse();
        let reversed = interpolator.interpolate(&grid, &samples, NODATA);
        samples.rotate_left(77);
        let rotated = interpolator.interpolate(&grid, &samples, NODATA);

        assert!(forward.iter().zip(reversed.iter()).all(|(a, b)| a.to_bits() == b.to_bits()));
        assert!(forward.iter().zip(rotated.iter()).all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn test_nearest_breaks_ties_by_value() {
        let grid = GridSpec::new(CrsId::Epsg(32717), 0.0, 100.0, 100.0, 1, 1).unwrap();
        let interpolator = GridInterpolator::new(InterpolationParams {
            method: InterpolationMethod::Nearest,
            search_radius: Some(100.0),
            ..Default::default()
        })
        .unwrap();

        // Two samples equidistant from the centre (50, 50)
        let a = [sample(40.0, 50.0, 25.0), sample(60.0, 50.0, 15.0), sample(95.0, 50.0, 1.0)];
        let b = [a[2], a[1], a[0]];
        assert_eq!(interpolator.interpolate(&grid, &a, NODATA)[[0, 0]], 15.0);
        assert_eq!(interpolator.interpolate(&grid, &b, NODATA)[[0, 0]], 15.0);
    }

    fn unbounded_nearest() -> GridInterpolator {
        GridInterpolator::new(InterpolationParams {
            method: InterpolationMethod::Nearest,
            search_radius: None,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_unbounded_nearest_fills_every_cell() {
        let grid = grid_10x10();
        let samples: Vec<GeoSample> = (0..37)
            .map(|i| {
                let t = i as f64;
                // Spread well beyond the grid on every side
                sample(500.0 + 2400.0 * (t * 0.61).sin(), 500.0 + 2400.0 * (t * 1.37).cos(), i as f32)
            })
            .collect();
        let image = unbounded_nearest().interpolate(&grid, &samples, NODATA);

        for row in 0..grid.rows {
            for col in 0..grid.cols {
                let (x, y) = grid.cell_center(row, col);
                let expected = samples
                    .iter()
                    .map(|s| ((s.easting - x).powi(2) + (s.northing - y).powi(2), s.value))
                    .min_by(neighbour_order)
                    .unwrap()
                    .1;
                assert_eq!(image[[row, col]], expected, "cell ({}, {})", row, col);
            }
        }
    }

    #[test]
    fn test_unbounded_nearest_reaches_a_distant_sample() {
        let image = unbounded_nearest().interpolate(&grid_10x10(), &[sample(50_000.0, -80_000.0, 17.0)], NODATA);
        assert!(image.iter().all(|&v| v == 17.0));
    }

    #[test]
    fn test_non_finite_samples_are_ignored() {
        let grid = grid_10x10();
        let samples = [
            sample(450.0, 450.0, 20.0),
            sample(f64::INFINITY, 450.0, 99.0),
            sample(450.0, f64::NAN, 98.0),
        ];
        let image = idw(60.0).interpolate(&grid, &samples, NODATA);
        assert_eq!(image[[5, 4]], 20.0);
        assert_eq!(image.iter().filter(|&&v| v != NODATA).count(), 1);

        let only_bad = [sample(f64::NEG_INFINITY, 0.0, 1.0)];
        let image = unbounded_nearest().interpolate(&grid, &only_bad, NODATA);
        assert!(image.iter().all(|&v| v == NODATA));
    }

    #[test]
    fn test_cancelled_interpolation() {
        let token = CancellationToken::new();
        token.cancel();
        let result = idw(100.0).interpolate_with_cancel(&grid_10x10(), &[sample(1.0, 1.0, 1.0)], NODATA, &token);
        assert!(matches!(result, Err(RadarError::Cancelled)));
    }

    #[test]
    fn test_clip_to_grid_keeps_samples_within_margin() {
        let grid = grid_10x10();
        let samples = vec![
            sample(500.0, 500.0, 1.0),
            sample(-50.0, 500.0, 2.0),
            sample(-150.0, 500.0, 3.0),
            sample(500.0, 1090.0, 4.0),
        ];
        let kept = clip_to_grid(samples, &grid, 100.0);
        let values: Vec<f32> = kept.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 4.0]);
    }
}
