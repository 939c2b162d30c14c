use crate::types::{GridImage, PolarImage, RadarError, RadarResult, RawScan, Reflectivity, ReflectivityUnit};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Linear reflectivity calibration `dBZ = slope * dBuZ + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DbzCalibration {
    pub slope: f32,
    pub offset: f32,
    /// Apply the transform even to scans already declared as dBZ
    #[serde(default)]
    pub force: bool,
}

impl Default for DbzCalibration {
    fn default() -> Self {
        Self {
            slope: 1.0,
            offset: 0.0,
            force: false,
        }
    }
}

impl DbzCalibration {
    pub fn new(slope: f32, offset: f32) -> RadarResult<Self> {
        let calibration = Self {
            slope,
            offset,
            force: false,
        };
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn validate(&self) -> RadarResult<()> {
        if !self.slope.is_finite() || !self.offset.is_finite() {
            return Err(RadarError::Configuration(format!(
                "Calibration coefficients must be finite, got slope {} offset {}",
                self.slope, self.offset
            )));
        }
        if self.slope == 0.0 {
            return Err(RadarError::Configuration(
                "Calibration slope must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_identity(&self) -> bool {
        self.slope == 1.0 && self.offset == 0.0
    }

    /// Whether a scan in `unit` goes through the transform
    pub fn applies_to(&self, unit: ReflectivityUnit) -> bool {
        self.force || unit == ReflectivityUnit::Dbuz
    }

    /// Calibrated copy of a scan, always declared as dBZ.
    ///
    /// Missing bins keep the scan's sentinel.
    pub fn apply(&self, scan: &RawScan) -> RawScan {
        if !self.applies_to(scan.unit) {
            log::debug!("Scan already in dBZ, calibration skipped");
            return scan.clone();
        }

        log::info!(
            "Calibrating {} scan: dBZ = {} * {} + {}",
            scan.unit,
            self.slope,
            scan.unit,
            self.offset
        );

        RawScan {
            data: self.calibrate_image(&scan.data, scan.nodata),
            unit: ReflectivityUnit::Dbz,
            ..scan.clone()
        }
    }

    /// Apply the transform to every valid value of a polar image
    pub fn calibrate_image(&self, image: &PolarImage, nodata: Reflectivity) -> PolarImage {
        let (slope, offset) = (self.slope, self.offset);
        let convert = move |&v: &Reflectivity| {
            if !v.is_finite() || v == nodata {
                v
            } else {
                slope * v + offset
            }
        };

        #[cfg(feature = "parallel")]
        {
            Zip::from(image).par_map_collect(convert)
        }
        #[cfg(not(feature = "parallel"))]
        {
            Zip::from(image).map_collect(convert)
        }
    }
}

/// Accepted reflectivity range of a product; values outside are clamped
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueWindow {
    pub min: Reflectivity,
    pub max: Reflectivity,
}

impl Default for ValueWindow {
    fn default() -> Self {
        Self {
            min: -32.0,
            max: 95.5,
        }
    }
}

impl ValueWindow {
    pub fn new(min: Reflectivity, max: Reflectivity) -> RadarResult<Self> {
        let window = Self { min, max };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> RadarResult<()> {
        if !(self.min.is_finite() && self.max.is_finite() && self.min < self.max) {
            return Err(RadarError::Configuration(format!(
                "Reflectivity window [{}, {}] is empty or not finite",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Clamp every value except `nodata` into the window, in place.
    ///
    /// Returns the number of cells that were clamped.
    pub fn clamp_in_place(&self, image: &mut GridImage, nodata: Reflectivity) -> usize {
        let mut clamped = 0;
        image.iter_mut().filter(|v| v.is_finite() && **v != nodata).for_each(|v| {
            let c = v.clamp(self.min, self.max);
            if c != *v {
                clamped += 1;
                *v = c;
            }
        });
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_NODATA;
    use chrono::Utc;
    use ndarray::array;

    fn dbuz_scan() -> RawScan {
        RawScan::new(
            vec![0.0, 180.0],
            vec![500.0, 1000.0],
            array![[10.0, DEFAULT_NODATA], [f32::NAN, -4.0]],
            0.5,
            Utc::now(),
            DEFAULT_NODATA,
            ReflectivityUnit::Dbuz,
        )
        .unwrap()
    }

    #[test]
    fn test_linear_transform_preserves_sentinel() {
        let cal = DbzCalibration::new(1.5, -2.0).unwrap();
        let out = cal.apply(&dbuz_scan());

        assert_eq!(out.unit, ReflectivityUnit::Dbz);
        assert_eq!(out.data[[0, 0]], 13.0);
        assert_eq!(out.data[[0, 1]], DEFAULT_NODATA);
        assert!(out.data[[1, 0]].is_nan());
        assert_eq!(out.data[[1, 1]], -8.0);
    }

    #[test]
    fn test_dbz_input_passes_through_unless_forced() {
        let mut scan = dbuz_scan();
        scan.unit = ReflectivityUnit::Dbz;
        let cal = DbzCalibration::new(2.0, 1.0).unwrap();

        assert_eq!(cal.apply(&scan).data[[0, 0]], 10.0);
        assert_eq!(cal.forced().apply(&scan).data[[0, 0]], 21.0);
    }

    #[test]
    fn test_invalid_coefficients() {
        assert!(DbzCalibration::new(0.0, 1.0).is_err());
        assert!(DbzCalibration::new(f32::NAN, 1.0).is_err());
        assert!(DbzCalibration::new(1.0, f32::INFINITY).is_err());
    }

    #[test]
    fn test_value_window_clamps_but_skips_nodata() {
        let window = ValueWindow::new(-10.0, 60.0).unwrap();
        let mut image = array![[-20.0, 30.0], [75.0, DEFAULT_NODATA]];
        let clamped = window.clamp_in_place(&mut image, DEFAULT_NODATA);

        assert_eq!(clamped, 2);
        assert_eq!(image, array![[-10.0, 30.0], [60.0, DEFAULT_NODATA]]);
        assert!(ValueWindow::new(5.0, 5.0).is_err());
    }
}
