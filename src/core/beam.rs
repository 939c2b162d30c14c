//! Radar beam propagation over a curved earth.
//!
//! Uses the effective-earth-radius approximation: refraction in a standard
//! atmosphere is folded into an inflated earth radius so the beam can be
//! treated as a straight line.

/// WGS84 semi-major axis (meters)
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 semi-minor axis (meters)
pub const WGS84_B: f64 = 6_356_752.314_245_179;
/// Mean earth radius (meters)
pub const MEAN_EARTH_RADIUS: f64 = 6_371_000.0;
/// Standard-atmosphere refraction factor
pub const STANDARD_REFRACTION: f64 = 4.0 / 3.0;

/// Ground distance and height of one beam sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamPoint {
    /// Great-circle distance along the earth surface, meters
    pub ground_distance: f64,
    /// Height of the beam centre above the antenna, meters
    pub height: f64,
}

/// Effective-earth-radius beam model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamGeometryModel {
    effective_radius: f64,
}

impl Default for BeamGeometryModel {
    fn default() -> Self {
        Self::new(MEAN_EARTH_RADIUS)
    }
}

impl BeamGeometryModel {
    /// Model with the standard 4/3 refraction factor applied to `earth_radius`
    pub fn new(earth_radius: f64) -> Self {
        Self::with_refraction(earth_radius, STANDARD_REFRACTION)
    }

    pub fn with_refraction(earth_radius: f64, refraction_factor: f64) -> Self {
        Self {
            effective_radius: earth_radius * refraction_factor,
        }
    }

    /// Model using the WGS84 local earth radius at the site latitude
    pub fn for_latitude(latitude_deg: f64) -> Self {
        Self::new(earth_radius_at(latitude_deg))
    }

    pub fn effective_radius(&self) -> f64 {
        self.effective_radius
    }

    /// Ground distance and height above the antenna for a slant range
    /// `range` (meters) at elevation `elevation_deg`.
    ///
    /// Angles are not validated; negative and near-vertical elevations are
    /// evaluated as-is.
    #[inline]
    pub fn propagate(&self, range: f64, elevation_deg: f64) -> BeamPoint {
        let ke = self.effective_radius;
        let (sin_el, cos_el) = elevation_deg.to_radians().sin_cos();

        let height = (range * range + ke * ke + 2.0 * range * ke * sin_el).sqrt() - ke;
        let ground_distance = ke * (range * cos_el / (ke + height)).asin();

        BeamPoint {
            ground_distance,
            height,
        }
    }

    /// Propagate every range bin of a sweep at a fixed elevation
    pub fn propagate_ranges(&self, ranges: &[f64], elevation_deg: f64) -> Vec<BeamPoint> {
        ranges
            .iter()
            .map(|&r| self.propagate(r, elevation_deg))
            .collect()
    }

    /// Half-power beam diameter at slant range `range` for a beam half-width
    pub fn beam_width_at(range: f64, beam_half_width_deg: f64) -> f64 {
        2.0 * range * beam_half_width_deg.to_radians().tan()
    }
}

/// Geocentric radius of the WGS84 ellipsoid at a geodetic latitude
pub fn earth_radius_at(latitude_deg: f64) -> f64 {
    let (sin_lat, cos_lat) = latitude_deg.to_radians().sin_cos();
    let a2 = WGS84_A * WGS84_A;
    let b2 = WGS84_B * WGS84_B;

    let num = (a2 * cos_lat).powi(2) + (b2 * sin_lat).powi(2);
    let den = (WGS84_A * cos_lat).powi(2) + (WGS84_B * sin_lat).powi(2);
    (num / den).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_range_is_origin() {
        let model = BeamGeometryModel::for_latitude(-2.8);
        for elevation in [-2.0, 0.0, 0.5, 10.0, 45.0, 89.9] {
            let p = model.propagate(0.0, elevation);
            assert_relative_eq!(p.ground_distance, 0.0, epsilon = 1e-9);
            assert_relative_eq!(p.height, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_horizontal_beam_rises_with_curvature() {
        let model = BeamGeometryModel::new(MEAN_EARTH_RADIUS);
        let p = model.propagate(100_000.0, 0.0);

        // h ≈ r² / (2 k_e) for a flat launch
        let expected = 100_000.0f64.powi(2) / (2.0 * model.effective_radius());
        assert_relative_eq!(p.height, expected, max_relative = 1e-3);
        assert!(p.ground_distance < 100_000.0);
        assert_relative_eq!(p.ground_distance, 100_000.0, max_relative = 1e-3);
    }

    #[test]
    fn test_vertical_beam_has_no_ground_distance() {
        let model = BeamGeometryModel::default();
        let p = model.propagate(5_000.0, 90.0);
        assert_relative_eq!(p.height, 5_000.0, epsilon = 1e-6);
        assert_relative_eq!(p.ground_distance, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_low_elevation_matches_flat_earth_at_short_range() {
        let model = BeamGeometryModel::for_latitude(-2.8);
        let p = model.propagate(1_000.0, 0.5);
        assert_relative_eq!(p.ground_distance, 1_000.0 * 0.5f64.to_radians().cos(), epsilon = 0.01);
        assert_relative_eq!(p.height, 1_000.0 * 0.5f64.to_radians().sin(), epsilon = 0.1);
    }

    #[test]
    fn test_earth_radius_bounds() {
        assert_relative_eq!(earth_radius_at(0.0), WGS84_A, epsilon = 1e-6);
        assert_relative_eq!(earth_radius_at(90.0), WGS84_B, epsilon = 1e-6);
        let mid = earth_radius_at(45.0);
        assert!(mid > WGS84_B && mid < WGS84_A);
    }

    #[test]
    fn test_beam_width() {
        let width = BeamGeometryModel::beam_width_at(100_000.0, 0.5);
        assert_relative_eq!(width, 1745.3, epsilon = 0.5);
    }
}
