//! Core georeferencing and gridding modules

pub mod beam;
pub mod calibrate;
pub mod cancel;
pub mod geodesic;
pub mod georeference;
pub mod interpolate;
pub mod pipeline;
pub mod projector;
pub mod spatial_index;

// Re-export main types
pub use beam::{BeamGeometryModel, BeamPoint};
pub use calibrate::{DbzCalibration, ValueWindow};
pub use cancel::CancellationToken;
pub use geodesic::{Geodesic, GeodesicSolution};
pub use georeference::ScanGeoreferencer;
pub use interpolate::{GridInterpolator, InterpolationMethod, InterpolationParams};
pub use pipeline::{GriddingPipeline, PipelineOptions};
pub use projector::{CrsTransform, GeodeticProjector};
pub use spatial_index::BucketIndex;
