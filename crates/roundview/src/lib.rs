//! roundview — geometry core for N-camera surround-view stitching.
//!
//! The crate turns a set of calibrated fisheye cameras into the tables
//! a rendering backend needs to assemble a cylindrical panorama, a
//! ground-plane top view and a cubemap. The planning stages are:
//!
//! 1. **Calibration** – per-camera intrinsics/extrinsics from the
//!    configured directory (or an aggregated JSON file), translated and
//!    centralised into the bowl frame.
//! 2. **Slices** – each camera's rectangle on the cylindrical output,
//!    aligned to the backend's pixel alignment.
//! 3. **Centres** – the panorama/slice columns under each camera's
//!    principal ray.
//! 4. **Overlaps** – the windows where adjacent slices blend or
//!    feature-match.
//! 5. **Copy areas** – the remaining 1:1 regions, pre-split at the
//!    panorama wrap column.
//!
//! Geometry primitives (angles, rectangles, the bowl and cubemap
//! models) live in [`roundview_core`] and are re-exported here. The
//! [`driver`] module defines the narrow contract a rasterising backend
//! implements; this crate never touches pixels itself.

pub mod calibration;
pub mod driver;
pub mod fm;
pub mod stitcher;

#[cfg(test)]
pub(crate) mod test_utils;

pub use calibration::{
    CalibError, CalibrationInfo, CameraExtrinsic, CameraIntrinsic, FisheyeInfo,
};
pub use driver::{
    DriverCode, FmRegion, FrameDecision, GeoMapSource, GeoMapTable, StitchBackend, StitchDriver,
};
pub use fm::{FmGate, FmMode, FmRegionRatio, FmStatus};
pub use stitcher::{
    CameraInfo, CenterMark, CopyArea, DewarpMode, ImageOverlapInfo, PlanError, RoundViewSlice,
    ScaleMode, Stitcher, MAX_CAMERAS,
};

pub use roundview_core::{
    BowlDataConfig, BowlError, BowlMesh, BowlModel, CubeMapModel, ImageCropInfo, PointMap, Rect,
};
