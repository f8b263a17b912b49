//! roundview-core — geometry primitives for surround-view stitching.
//!
//! The stitching planner in the `roundview` crate lays N fisheye camera
//! slices around a cylindrical panorama; this crate provides the pieces
//! that are pure geometry:
//!
//! 1. **Angle** – normalisation to [0°, 360°) and the integer alignment
//!    helpers the slice planner uses to keep widths buffer-aligned.
//! 2. **Rect** – axis-aligned pixel rectangles and crop margins.
//! 3. **Bowl** – the ellipsoidal bowl model: world↔panorama maps, the
//!    ground-plane top-view lookup table and the render meshes.
//! 4. **Cubemap** – the 3×2 unfolded cube ↔ equirectangular lookup table.
//!
//! Everything computes in single precision; lookup tables hold raw
//! `[f32; 2]` texture coordinates and quantisation is left to the
//! consuming backend.

pub mod angle;
pub mod bowl;
pub mod cubemap;
pub mod rect;

pub use angle::{align_around, align_down, align_up, format_angle, nearly_equal, ANGLE_EPS};
pub use bowl::{BowlDataConfig, BowlError, BowlMesh, BowlModel};
pub use cubemap::CubeMapModel;
pub use rect::{ImageCropInfo, Rect};

/// Row-major `width × height` table of texture coordinates.
pub type PointMap = Vec<[f32; 2]>;
