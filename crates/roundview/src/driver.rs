//! Contract between the geometry core and a rasterising backend.
//!
//! The core never touches pixels. A backend (CPU SIMD, GLES, Vulkan…)
//! is injected by the driver and reached through two capabilities:
//! building a geometry mapper from a lookup table, and stitching one
//! frame's buffers under the planner's per-frame decision. Errors cross
//! the boundary as flat [`DriverCode`] values, the way the embedding
//! driver reports them upward.

use roundview_core::{BowlError, BowlModel, CubeMapModel, PointMap, Rect};

use crate::calibration::CalibError;
use crate::stitcher::{PlanError, Stitcher};

/// Status codes surfaced to the embedding driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCode {
    NoError,
    /// End-of-stream marker used by the driver itself; the core never
    /// produces it.
    Bypass,
    ErrorParam,
    ErrorOrder,
    ErrorMem,
    ErrorUnknown,
}

impl From<&PlanError> for DriverCode {
    fn from(err: &PlanError) -> Self {
        match err {
            PlanError::Order { .. } => Self::ErrorOrder,
            PlanError::NoOverlap { .. } | PlanError::Internal { .. } => Self::ErrorUnknown,
            _ => Self::ErrorParam,
        }
    }
}

impl From<&CalibError> for DriverCode {
    fn from(_: &CalibError) -> Self {
        Self::ErrorParam
    }
}

impl From<&BowlError> for DriverCode {
    fn from(_: &BowlError) -> Self {
        Self::ErrorParam
    }
}

/// Which projection a geometry mapper serves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeoMapSource {
    /// Ground-plane top view sampled from the bowl model.
    TopView {
        res_width: u32,
        res_height: u32,
        length_mm: f32,
        width_mm: f32,
    },
    /// Unfolded cubemap sampled from the panorama.
    CubeMap { res_width: u32, res_height: u32 },
}

/// A lookup table handed to the backend; ownership transfers with it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMapTable {
    /// Table width in output pixels.
    pub width: u32,
    /// Table height in output pixels.
    pub height: u32,
    /// Row-major texture coordinates into the source image.
    pub points: PointMap,
}

/// Feature-match region of one adjacency, in slice coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FmRegion {
    /// Adjacency index (left camera of the pair).
    pub adjacency: u32,
    /// Region inside the left slice.
    pub left: Rect,
    /// Region inside the right slice.
    pub right: Rect,
}

/// The planner's verdict for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDecision {
    /// Run feature matching on this frame.
    pub need_fm: bool,
    /// Emit the stitched result of this frame.
    pub complete_stitch: bool,
    /// Match regions, one per adjacency; empty when matching is off.
    pub fm_regions: Vec<FmRegion>,
}

/// Capabilities a rasterising backend provides to the driver.
pub trait StitchBackend {
    /// Frame buffer handle; opaque to the core.
    type Buffer;

    /// Take ownership of a geometry-mapper lookup table.
    fn create_geo_mapper(
        &mut self,
        source: &GeoMapSource,
        table: GeoMapTable,
    ) -> Result<(), DriverCode>;

    /// Stitch one frame under the planner's decision. The backend must
    /// honour `frame.need_fm` and `frame.complete_stitch`.
    fn stitch_buffers(
        &mut self,
        inputs: &[Self::Buffer],
        output: &mut Self::Buffer,
        frame: &FrameDecision,
    ) -> Result<(), DriverCode>;
}

/// Owns the planner and the injected backend; runs the per-frame
/// contract.
#[derive(Debug)]
pub struct StitchDriver<B: StitchBackend> {
    stitcher: Stitcher,
    backend: B,
}

impl<B: StitchBackend> StitchDriver<B> {
    pub fn new(stitcher: Stitcher, backend: B) -> Self {
        Self { stitcher, backend }
    }

    pub fn stitcher(&self) -> &Stitcher {
        &self.stitcher
    }

    pub fn stitcher_mut(&mut self) -> &mut Stitcher {
        &mut self.stitcher
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_parts(self) -> (Stitcher, B) {
        (self.stitcher, self.backend)
    }

    /// Build the top-view mapper from a bowl model and hand its table
    /// to the backend. Zero `length_mm`/`width_mm` select the maximal
    /// covered area.
    pub fn build_topview_mapper(
        &mut self,
        model: &BowlModel,
        res_width: u32,
        res_height: u32,
        length_mm: f32,
        width_mm: f32,
    ) -> DriverCode {
        let points = match model.topview_rect_map(res_width, res_height, length_mm, width_mm) {
            Ok(points) => points,
            Err(err) => {
                tracing::warn!("top view mapper rejected: {err}");
                return DriverCode::from(&err);
            }
        };
        let source = GeoMapSource::TopView {
            res_width,
            res_height,
            length_mm,
            width_mm,
        };
        let table = GeoMapTable {
            width: res_width,
            height: res_height,
            points,
        };
        match self.backend.create_geo_mapper(&source, table) {
            Ok(()) => DriverCode::NoError,
            Err(code) => code,
        }
    }

    /// Build the cubemap mapper and hand its table to the backend.
    pub fn build_cubemap_mapper(
        &mut self,
        model: &CubeMapModel,
        res_width: u32,
        res_height: u32,
    ) -> DriverCode {
        let source = GeoMapSource::CubeMap {
            res_width,
            res_height,
        };
        let table = GeoMapTable {
            width: res_width,
            height: res_height,
            points: model.cubemap_rect_map(res_width, res_height),
        };
        match self.backend.create_geo_mapper(&source, table) {
            Ok(()) => DriverCode::NoError,
            Err(code) => code,
        }
    }

    /// Stitch one frame: advance the feature-match gate exactly once,
    /// assemble the frame decision and forward to the backend.
    pub fn stitch_buffers(&mut self, inputs: &[B::Buffer], output: &mut B::Buffer) -> DriverCode {
        if inputs.len() != self.stitcher.camera_num() as usize {
            return DriverCode::ErrorParam;
        }
        if let Err(err) = self.stitcher.copy_areas() {
            return DriverCode::from(&err);
        }

        self.stitcher.tick_frame();
        let need_fm = self.stitcher.need_fm();

        let mut fm_regions = Vec::new();
        if need_fm {
            for adjacency in 0..self.stitcher.camera_num() {
                match self.stitcher.fm_region(adjacency) {
                    Ok((left, right)) => fm_regions.push(FmRegion {
                        adjacency,
                        left,
                        right,
                    }),
                    Err(err) => return DriverCode::from(&err),
                }
            }
        }

        let frame = FrameDecision {
            need_fm,
            complete_stitch: self.stitcher.complete_stitch(),
            fm_regions,
        };
        match self.backend.stitch_buffers(inputs, output, &frame) {
            Ok(()) => DriverCode::NoError,
            Err(code) => code,
        }
    }
}
