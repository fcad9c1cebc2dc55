//! tpcfast-core: Fast transformation of raw TPC coordinates to space points.
//!
//! This crate provides the detector geometry table, the drift calibration,
//! the distortion correction seam, and the relocatable flat region that
//! holds a finished transform.
//!

pub mod builder;
pub mod calibration;
#[cfg(feature = "serde")]
pub mod config;
pub mod distortion;
pub mod error;
pub mod flat;
pub mod geometry;
pub mod soa;
pub mod transform;

pub use builder::{ConstructionState, TransformBuilder};
pub use calibration::{Calibration, SPEED_OF_LIGHT_CM_PER_NS};
#[cfg(feature = "serde")]
pub use config::{load_calibration, GeometryConfig};
pub use distortion::{
    Distortion, DistortionModel, GridDistortion, GridDistortionBuilder, NoDistortion,
};
pub use error::{ConstructionError, Error, LayoutError, Result};
pub use flat::{FlatBuffer, RegionHeader, RegionLayout};
pub use geometry::{RowInfo, Side, SliceInfo, NUMBER_OF_SLICES, SLICES_PER_SIDE};
pub use soa::{BatchStatistics, PadHitBatch, SpacePointBatch};
pub use transform::{SpacePoint, TpcFastTransform};
