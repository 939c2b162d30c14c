use crate::core::geodesic::Geodesic;
use crate::types::{CrsId, RadarError, RadarResult, RadarSite};
use gdal::spatial_ref::{CoordTransform, SpatialRef};

/// Geographic CRS of the geodesic computations
pub const WGS84_EPSG: u32 = 4326;

/// Forward map projection from WGS84 longitude/latitude to a target CRS
///
/// Wraps a GDAL/OSR coordinate transformation. GDAL transformations are not
/// thread-safe, so a `CrsTransform` is used from one thread and fed in
/// batches.
pub struct CrsTransform {
    crs: CrsId,
    wkt: String,
    transform: CoordTransform,
}

impl std::fmt::Debug for CrsTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrsTransform")
            .field("crs", &self.crs)
            .finish_non_exhaustive()
    }
}

impl CrsTransform {
    /// Build a WGS84 -> `crs` transformation.
    ///
    /// Fails with a configuration error when GDAL does not understand the
    /// identifier.
    pub fn new(crs: &CrsId) -> RadarResult<Self> {
        let source = spatial_ref_for(&CrsId::Epsg(WGS84_EPSG))?;
        let target = spatial_ref_for(crs)?;

        let transform = CoordTransform::new(&source, &target).map_err(|e| {
            RadarError::Configuration(format!("Cannot build transformation to {}: {}", crs, e))
        })?;
        let wkt = target.to_wkt().map_err(|e| {
            RadarError::Configuration(format!("Cannot export {} as WKT: {}", crs, e))
        })?;

        log::debug!("Projection ready: EPSG:{} -> {}", WGS84_EPSG, crs);

        Ok(Self {
            crs: crs.clone(),
            wkt,
            transform,
        })
    }

    pub fn crs(&self) -> &CrsId {
        &self.crs
    }

    /// WKT of the target CRS, for writers that tag their output
    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    /// Project longitudes/latitudes in place into eastings/northings
    pub fn project_in_place(&self, xs: &mut [f64], ys: &mut [f64]) -> RadarResult<()> {
        if xs.len() != ys.len() {
            return Err(RadarError::Processing(format!(
                "Coordinate arrays differ in length: {} vs {}",
                xs.len(),
                ys.len()
            )));
        }
        if xs.is_empty() {
            return Ok(());
        }
        let mut zs = vec![0.0; xs.len()];
        self.transform
            .transform_coords(xs, ys, &mut zs)
            .map_err(|e| RadarError::Processing(format!("Projection to {} failed: {}", self.crs, e)))
    }

    pub fn project(&self, lon: f64, lat: f64) -> RadarResult<(f64, f64)> {
        let mut xs = [lon];
        let mut ys = [lat];
        self.project_in_place(&mut xs, &mut ys)?;
        Ok((xs[0], ys[0]))
    }
}

/// Resolve a CRS identifier to an OSR spatial reference with (x=lon, y=lat)
/// axis order.
pub fn spatial_ref_for(crs: &CrsId) -> RadarResult<SpatialRef> {
    let mut srs = match crs {
        CrsId::Epsg(code) => SpatialRef::from_epsg(*code),
        CrsId::Definition(def) => SpatialRef::from_definition(def),
    }
    .map_err(|e| RadarError::Configuration(format!("Unsupported CRS {}: {}", crs, e)))?;

    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

/// Converts (bearing, ground distance) from the radar site into projected
/// coordinates in the configured CRS.
#[derive(Debug)]
pub struct GeodeticProjector {
    geodesic: Geodesic,
    transform: CrsTransform,
}

impl GeodeticProjector {
    pub fn new(site: &RadarSite, crs: &CrsId) -> RadarResult<Self> {
        site.validate()?;
        Ok(Self {
            geodesic: Geodesic::new(site.latitude, site.longitude),
            transform: CrsTransform::new(crs)?,
        })
    }

    /// Site-anchored geodesic; `Copy + Sync`, safe to share with workers
    pub fn geodesic(&self) -> Geodesic {
        self.geodesic
    }

    pub fn transform(&self) -> &CrsTransform {
        &self.transform
    }

    pub fn crs(&self) -> &CrsId {
        self.transform.crs()
    }

    /// Destination longitude/latitude for a bearing and ground distance
    pub fn destination(&self, bearing_deg: f64, distance: f64) -> (f64, f64) {
        self.geodesic.forward(bearing_deg, distance)
    }

    /// Projected (easting, northing) for a bearing and ground distance
    pub fn project(&self, bearing_deg: f64, distance: f64) -> RadarResult<(f64, f64)> {
        let (lon, lat) = self.destination(bearing_deg, distance);
        self.transform.project(lon, lat)
    }

    /// Projected position of the radar itself
    pub fn project_site(&self) -> RadarResult<(f64, f64)> {
        let (lon, lat) = self.geodesic.origin();
        self.transform.project(lon, lat)
    }

    /// Project many longitude/latitude pairs in one transformation call
    pub fn project_lonlat_batch(&self, lons: &mut [f64], lats: &mut [f64]) -> RadarResult<()> {
        self.transform.project_in_place(lons, lats)
    }
}
