use approx::assert_relative_eq;
use radgrid::core::geodesic::Geodesic;
use radgrid::{
    BeamGeometryModel, CrsId, GeoSample, GridInterpolator, GridSpec, InterpolationMethod,
    InterpolationParams,
};

const NODATA: f32 = -9999.0;

fn grid() -> GridSpec {
    GridSpec::new(CrsId::Epsg(32717), 0.0, 2000.0, 100.0, 20, 20).unwrap()
}

/// Deterministic scatter of samples over the grid
fn scatter(n: usize) -> Vec<GeoSample> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % 10_000) as f64 / 10_000.0
    };
    (0..n)
        .map(|_| GeoSample {
            easting: next() * 2000.0,
            northing: next() * 2000.0,
            height: 0.0,
            value: (next() * 60.0 - 10.0) as f32,
        })
        .collect()
}

#[test]
fn test_sample_order_does_not_change_the_grid() {
    let samples = scatter(400);
    let mut reversed = samples.clone();
    reversed.reverse();
    let mut interleaved: Vec<GeoSample> = samples.iter().step_by(2).copied().collect();
    interleaved.extend(samples.iter().skip(1).step_by(2).copied());

    for method in [InterpolationMethod::Idw, InterpolationMethod::Nearest] {
        let interpolator = GridInterpolator::new(InterpolationParams {
            method,
            search_radius: Some(250.0),
            ..Default::default()
        })
        .unwrap();

        let reference = interpolator.interpolate(&grid(), &samples, NODATA);
        assert_eq!(reference, interpolator.interpolate(&grid(), &reversed, NODATA));
        assert_eq!(reference, interpolator.interpolate(&grid(), &interleaved, NODATA));
    }
}

#[test]
fn test_idw_stays_within_neighbour_range() {
    let samples = scatter(300);
    let interpolator = GridInterpolator::new(InterpolationParams {
        search_radius: Some(300.0),
        ..Default::default()
    })
    .unwrap();
    let image = interpolator.interpolate(&grid(), &samples, NODATA);

    let (lo, hi) = samples
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), s| (lo.min(s.value), hi.max(s.value)));
    for &v in image.iter().filter(|&&v| v != NODATA) {
        assert!(v >= lo - 1e-4 && v <= hi + 1e-4, "{} outside [{}, {}]", v, lo, hi);
    }
}

#[test]
fn test_lone_sample_is_reproduced() {
    let sample = GeoSample {
        easting: 1030.0,
        northing: 970.0,
        height: 120.0,
        value: 41.5,
    };
    let interpolator = GridInterpolator::new(InterpolationParams {
        search_radius: Some(150.0),
        power: 3.0,
        ..Default::default()
    })
    .unwrap();
    let image = interpolator.interpolate(&grid(), &[sample], NODATA);

    let filled: Vec<f32> = image.iter().copied().filter(|&v| v != NODATA).collect();
    assert!(!filled.is_empty());
    assert!(filled.iter().all(|&v| v == 41.5));
}

#[test]
fn test_beam_at_the_antenna() {
    let beam = BeamGeometryModel::for_latitude(-2.8);
    let p = beam.propagate(0.0, 0.5);
    assert_relative_eq!(p.ground_distance, 0.0, epsilon = 1e-9);
    assert_relative_eq!(p.height, 0.0, epsilon = 1e-9);
}

#[test]
fn test_beam_rises_with_range() {
    let beam = BeamGeometryModel::default();
    let points = beam.propagate_ranges(&[10_000.0, 50_000.0, 100_000.0], 0.5);
    assert!(points.windows(2).all(|w| w[1].height > w[0].height));
    assert!(points.iter().all(|p| p.ground_distance < 100_000.0 + 1.0));

    // Horizontal beam still climbs away from a curved earth
    let flat = beam.propagate(100_000.0, 0.0);
    assert_relative_eq!(
        flat.height,
        100_000.0f64.powi(2) / (2.0 * beam.effective_radius()),
        max_relative = 1e-3
    );
}

#[test]
fn test_geodesic_round_trip_from_site() {
    let site = Geodesic::new(-2.8, -79.2);
    let (lon, lat) = site.forward(135.0, 25_000.0);
    let back = site.inverse(lon, lat).expect("inverse converges");
    assert_relative_eq!(back.distance, 25_000.0, epsilon = 1e-3);
    assert_relative_eq!(back.bearing, 135.0, epsilon = 1e-6);
}
