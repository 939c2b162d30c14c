//! Geodesics on the WGS84 ellipsoid (Vincenty's formulae).

use super::beam::{WGS84_A, WGS84_B};

/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

const CONVERGENCE: f64 = 1e-12;
const MAX_ITERATIONS: usize = 200;

/// Solution of the inverse geodesic problem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodesicSolution {
    /// Forward azimuth at the origin, degrees in [0, 360)
    pub bearing: f64,
    /// Ellipsoidal distance, meters
    pub distance: f64,
}

/// Geodesic calculator anchored at a fixed origin (the radar site)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geodesic {
    lat0: f64,
    lon0: f64,
    sin_u1: f64,
    cos_u1: f64,
    tan_u1: f64,
}

impl Geodesic {
    pub fn new(latitude_deg: f64, longitude_deg: f64) -> Self {
        let tan_u1 = (1.0 - WGS84_F) * latitude_deg.to_radians().tan();
        let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
        let sin_u1 = tan_u1 * cos_u1;
        Self {
            lat0: latitude_deg,
            lon0: longitude_deg,
            sin_u1,
            cos_u1,
            tan_u1,
        }
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.lon0, self.lat0)
    }

    /// Destination (longitude, latitude) in degrees after travelling
    /// `distance` meters along initial `bearing_deg` from the origin.
    pub fn forward(&self, bearing_deg: f64, distance: f64) -> (f64, f64) {
        if distance == 0.0 {
            return (self.lon0, self.lat0);
        }

        let (sin_a1, cos_a1) = bearing_deg.to_radians().sin_cos();
        let sigma1 = self.tan_u1.atan2(cos_a1);
        let sin_alpha = self.cos_u1 * sin_a1;
        let cos2_alpha = 1.0 - sin_alpha * sin_alpha;
        let (a_coef, b_coef) = series_coefficients(cos2_alpha);

        let sigma0 = distance / (WGS84_B * a_coef);
        let mut sigma = sigma0;
        for _ in 0..MAX_ITERATIONS {
            let cos_2sm = (2.0 * sigma1 + sigma).cos();
            let delta = delta_sigma(b_coef, sigma.sin(), sigma.cos(), cos_2sm);
            let next = sigma0 + delta;
            let converged = (next - sigma).abs() < CONVERGENCE;
            sigma = next;
            if converged {
                break;
            }
        }

        let (sin_s, cos_s) = sigma.sin_cos();
        let cos_2sm = (2.0 * sigma1 + sigma).cos();
        let x = self.sin_u1 * sin_s - self.cos_u1 * cos_s * cos_a1;

        let lat2 = (self.sin_u1 * cos_s + self.cos_u1 * sin_s * cos_a1)
            .atan2((1.0 - WGS84_F) * (sin_alpha * sin_alpha + x * x).sqrt());
        let lambda = (sin_s * sin_a1).atan2(self.cos_u1 * cos_s - self.sin_u1 * sin_s * cos_a1);
        let c = WGS84_F / 16.0 * cos2_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos2_alpha));
        let l = lambda
            - (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma + c * sin_s * (cos_2sm + c * cos_s * (-1.0 + 2.0 * cos_2sm * cos_2sm)));

        (normalize_longitude(self.lon0 + l.to_degrees()), lat2.to_degrees())
    }

    /// Bearing and distance from the origin to (longitude, latitude).
    ///
    /// Returns `None` for nearly antipodal points where the iteration does
    /// not converge.
    pub fn inverse(&self, longitude_deg: f64, latitude_deg: f64) -> Option<GeodesicSolution> {
        let tan_u2 = (1.0 - WGS84_F) * latitude_deg.to_radians().tan();
        let cos_u2 = 1.0 / (1.0 + tan_u2 * tan_u2).sqrt();
        let sin_u2 = tan_u2 * cos_u2;
        let (sin_u1, cos_u1) = (self.sin_u1, self.cos_u1);

        let l = (longitude_deg - self.lon0).to_radians();
        let mut lambda = l;

        let mut converged = false;
        let (mut sin_s, mut cos_s, mut sigma) = (0.0, 1.0, 0.0);
        let (mut cos2_alpha, mut cos_2sm) = (1.0, 0.0);
        let (mut sin_l, mut cos_l) = (0.0, 1.0);

        for _ in 0..MAX_ITERATIONS {
            (sin_l, cos_l) = lambda.sin_cos();
            let t1 = cos_u2 * sin_l;
            let t2 = cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_l;
            sin_s = (t1 * t1 + t2 * t2).sqrt();
            if sin_s == 0.0 {
                return Some(GeodesicSolution {
                    bearing: 0.0,
                    distance: 0.0,
                });
            }
            cos_s = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_l;
            sigma = sin_s.atan2(cos_s);
            let sin_alpha = cos_u1 * cos_u2 * sin_l / sin_s;
            cos2_alpha = 1.0 - sin_alpha * sin_alpha;
            cos_2sm = if cos2_alpha != 0.0 {
                cos_s - 2.0 * sin_u1 * sin_u2 / cos2_alpha
            } else {
                0.0 // Equatorial line
            };
            let c = WGS84_F / 16.0 * cos2_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos2_alpha));
            let previous = lambda;
            lambda = l
                + (1.0 - c)
                    * WGS84_F
                    * sin_alpha
                    * (sigma + c * sin_s * (cos_2sm + c * cos_s * (-1.0 + 2.0 * cos_2sm * cos_2sm)));
            if (lambda - previous).abs() < CONVERGENCE {
                converged = true;
                break;
            }
        }

        if !converged {
            return None;
        }

        let (a_coef, b_coef) = series_coefficients(cos2_alpha);
        let delta = delta_sigma(b_coef, sin_s, cos_s, cos_2sm);
        let distance = WGS84_B * a_coef * (sigma - delta);
        let alpha1 = (cos_u2 * sin_l).atan2(cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_l);

        Some(GeodesicSolution {
            bearing: normalize_bearing(alpha1.to_degrees()),
            distance,
        })
    }
}

/// Vincenty's A and B series coefficients for a given cos²α
fn series_coefficients(cos2_alpha: f64) -> (f64, f64) {
    let u2 = cos2_alpha * (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
    let a = 1.0 + u2 / 16384.0 * (4096.0 + u2 * (-768.0 + u2 * (320.0 - 175.0 * u2)));
    let b = u2 / 1024.0 * (256.0 + u2 * (-128.0 + u2 * (74.0 - 47.0 * u2)));
    (a, b)
}

fn delta_sigma(b: f64, sin_s: f64, cos_s: f64, cos_2sm: f64) -> f64 {
    let c2 = cos_2sm * cos_2sm;
    b * sin_s
        * (cos_2sm
            + b / 4.0
                * (cos_s * (-1.0 + 2.0 * c2)
                    - b / 6.0 * cos_2sm * (-3.0 + 4.0 * sin_s * sin_s) * (-3.0 + 4.0 * c2)))
}

/// Wrap a bearing into [0, 360)
pub fn normalize_bearing(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wrap a longitude into [-180, 180)
pub fn normalize_longitude(deg: f64) -> f64 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}

/// Smallest absolute difference between two bearings, degrees
pub fn bearing_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}
