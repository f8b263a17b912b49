//! Panorama slice planning.
//!
//! A [`Stitcher`] owns the configuration of an N-camera rig and derives
//! the geometry tables a backend consumes: per-camera slices on the
//! cylindrical output, the centre columns under each principal ray, the
//! overlap windows between adjacent slices and the 1:1 copy areas in
//! between.
//!
//! Planning is a linear sequence of idempotent steps,
//!
//! ```text
//! init_camera_info → estimate_round_slices → estimate_coarse_crops
//!                  → mark_centers → estimate_overlap → update_copy_areas
//! ```
//!
//! each gated on its predecessor. Re-running a completed step is a
//! no-op; geometry-changing setters rewind the sequence, and a failed
//! step leaves the previous plan untouched (results commit only on
//! success).

mod plan;
mod overlap;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use roundview_core::{BowlDataConfig, ImageCropInfo, Rect};

use crate::calibration::{CalibError, CalibrationInfo};
use crate::fm::{FmGate, FmMode, FmRegionRatio, FmStatus};

/// Upper bound on the number of cameras in one rig.
pub const MAX_CAMERAS: u32 = 8;

/// Default rig-frame X shift applied to loaded extrinsics before
/// centralisation (millimetres). Empirical; override with
/// [`Stitcher::set_position_offset_x_mm`].
pub const DEFAULT_POSITION_OFFSET_X_MM: f32 = 2000.0;

/// How fisheye inputs are dewarped onto the panorama.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DewarpMode {
    /// Spherical dewarp driven by per-camera view angles.
    Sphere,
    /// Bowl dewarp driven by loaded calibration.
    #[default]
    Bowl,
}

/// Scaling strategy used by the backend's geometry mapper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleMode {
    /// One constant scale factor.
    #[default]
    SingleConst,
    /// Separate constant factors for the two image halves.
    DualConst,
    /// Curved dual-factor scaling.
    DualCurve,
}

/// Per-camera stitching parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Intrinsic and extrinsic calibration.
    pub calibration: CalibrationInfo,
    /// Horizontal field of view used on the panorama (degrees).
    pub angle_range: f32,
    /// Azimuth of the camera slice's first column (degrees).
    pub round_angle_start: f32,
}

/// A camera's rectangle on the cylindrical output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundViewSlice {
    /// Slice width (pixels), a multiple of the X alignment.
    pub width: u32,
    /// Slice height (pixels).
    pub height: u32,
    /// Azimuth of the first slice column (degrees).
    pub hori_angle_start: f32,
    /// Azimuth covered by the slice (degrees); follows the aligned
    /// width, not the requested view angle.
    pub hori_angle_range: f32,
}

/// Columns under a camera's principal ray.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CenterMark {
    /// Column within the camera's slice.
    pub slice_center_x: u32,
    /// Column within the panorama.
    pub out_center_x: u32,
}

/// Overlap window of one adjacent camera pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOverlapInfo {
    /// Overlap rectangle in the left slice's coordinates.
    pub left: Rect,
    /// Overlap rectangle in the right slice's coordinates.
    pub right: Rect,
    /// Overlap rectangle in panorama coordinates.
    pub out_area: Rect,
}

/// A slice region copied 1:1 into the panorama, outside every overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyArea {
    /// Source camera index.
    pub in_idx: u32,
    /// Source rectangle in slice coordinates.
    pub in_area: Rect,
    /// Destination rectangle in panorama coordinates; same width as
    /// `in_area`, never crossing the wrap column.
    pub out_area: Rect,
}

/// Progress of the planning sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum PlanStage {
    Unconfigured,
    CamerasInited,
    Sliced,
    Cropped,
    Centred,
    Overlapped,
    CopyAreasReady,
}

/// Errors from configuration and planning.
#[derive(Debug)]
pub enum PlanError {
    /// Camera count must be set before dependent configuration.
    CameraNumUnset,
    /// Camera count exceeds [`MAX_CAMERAS`].
    TooManyCameras { num: u32 },
    /// Per-camera index out of range.
    IndexOutOfRange { index: u32, camera_num: u32 },
    /// Output size must be set before planning.
    OutputUnset,
    /// Feature-match region ratios out of range.
    BadRegionRatio(FmRegionRatio),
    /// Bowl mode needs intrinsic/extrinsic file names per camera.
    MissingCalibName { index: u32 },
    /// Calibration loading failed.
    Calib(CalibError),
    /// A planning step ran before its prerequisite.
    Order {
        step: &'static str,
        needs: &'static str,
    },
    /// A camera's centre falls outside its slice.
    CenterOutsideSlice {
        camera: u32,
        center_angle: f32,
        start: f32,
        range: f32,
    },
    /// Adjacent slices share no columns.
    NoOverlap {
        left: u32,
        right: u32,
        merge_width: u32,
        valid_width: u32,
    },
    /// A derived table violated its own invariant.
    Internal { what: &'static str },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CameraNumUnset => write!(f, "camera count is not set"),
            Self::TooManyCameras { num } => {
                write!(f, "camera count {num} exceeds the supported {MAX_CAMERAS}")
            }
            Self::IndexOutOfRange { index, camera_num } => {
                write!(f, "camera index {index} out of range (camera count {camera_num})")
            }
            Self::OutputUnset => write!(f, "output size is not set"),
            Self::BadRegionRatio(ratio) => write!(
                f,
                "invalid feature-match region ratio ({}, {}, {}, {})",
                ratio.pos_x, ratio.width, ratio.pos_y, ratio.height
            ),
            Self::MissingCalibName { index } => {
                write!(f, "camera {index} has no calibration file names")
            }
            Self::Calib(err) => write!(f, "calibration failed: {err}"),
            Self::Order { step, needs } => {
                write!(f, "{step} called before {needs}")
            }
            Self::CenterOutsideSlice {
                camera,
                center_angle,
                start,
                range,
            } => write!(
                f,
                "camera {camera}: centre angle {center_angle:.2}° outside its slice \
                 (start {start:.2}°, range {range:.2}°)"
            ),
            Self::NoOverlap {
                left,
                right,
                merge_width,
                valid_width,
            } => write!(
                f,
                "no overlap between slice {left} and slice {right}: \
                 valid widths {valid_width}px do not span the {merge_width}px between centres"
            ),
            Self::Internal { what } => write!(f, "internal geometry inconsistency: {what}"),
        }
    }
}

impl std::error::Error for PlanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Calib(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CalibError> for PlanError {
    fn from(err: CalibError) -> Self {
        Self::Calib(err)
    }
}

/// Surround-view stitching planner.
#[derive(Debug, Clone)]
pub struct Stitcher {
    alignment_x: u32,
    alignment_y: u32,
    output_width: u32,
    output_height: u32,
    out_start_angle: f32,
    camera_num: u32,
    dewarp_mode: DewarpMode,
    scale_mode: ScaleMode,
    blend_pyr_levels: u32,
    bowl_config: BowlDataConfig,
    viewpoints_range: Vec<f32>,
    intrinsic_names: Vec<String>,
    extrinsic_names: Vec<String>,
    calib_dir: Option<PathBuf>,
    position_offset_x_mm: f32,
    edge_snap_margin: Option<u32>,
    fm_gate: FmGate,
    fm_region_ratio: FmRegionRatio,

    camera_info: Vec<CameraInfo>,
    crop_info: Vec<ImageCropInfo>,
    crop_overridden: bool,
    round_view_slices: Vec<RoundViewSlice>,
    center_marks: Vec<CenterMark>,
    overlap_info: Vec<ImageOverlapInfo>,
    copy_areas: Vec<CopyArea>,
    stage: PlanStage,
}

impl Stitcher {
    /// Create a planner with the backend's pixel alignment requirements.
    pub fn new(alignment_x: u32, alignment_y: u32) -> Self {
        assert!(alignment_x >= 1 && alignment_y >= 1);
        Self {
            alignment_x,
            alignment_y,
            output_width: 0,
            output_height: 0,
            out_start_angle: 0.0,
            camera_num: 0,
            dewarp_mode: DewarpMode::default(),
            scale_mode: ScaleMode::default(),
            blend_pyr_levels: 2,
            bowl_config: BowlDataConfig::default(),
            viewpoints_range: Vec::new(),
            intrinsic_names: Vec::new(),
            extrinsic_names: Vec::new(),
            calib_dir: None,
            position_offset_x_mm: DEFAULT_POSITION_OFFSET_X_MM,
            edge_snap_margin: None,
            fm_gate: FmGate::default(),
            fm_region_ratio: FmRegionRatio::default(),
            camera_info: Vec::new(),
            crop_info: Vec::new(),
            crop_overridden: false,
            round_view_slices: Vec::new(),
            center_marks: Vec::new(),
            overlap_info: Vec::new(),
            copy_areas: Vec::new(),
            stage: PlanStage::Unconfigured,
        }
    }

    // ── Configuration ──────────────────────────────────────────────────

    /// Set the number of cameras. Must precede all per-camera setters.
    pub fn set_camera_num(&mut self, num: u32) -> Result<(), PlanError> {
        if num == 0 {
            return Err(PlanError::CameraNumUnset);
        }
        if num > MAX_CAMERAS {
            return Err(PlanError::TooManyCameras { num });
        }
        self.camera_num = num;
        self.viewpoints_range.resize(num as usize, 0.0);
        self.intrinsic_names.resize(num as usize, String::new());
        self.extrinsic_names.resize(num as usize, String::new());
        self.camera_info.resize(num as usize, CameraInfo::default());
        self.crop_info.resize(num as usize, ImageCropInfo::default());
        self.invalidate();
        Ok(())
    }

    /// Set the panorama size in pixels.
    pub fn set_output_size(&mut self, width: u32, height: u32) -> Result<(), PlanError> {
        if width == 0 || height == 0 {
            return Err(PlanError::OutputUnset);
        }
        self.output_width = width;
        self.output_height = height;
        self.invalidate();
        Ok(())
    }

    /// Azimuth mapped to panorama column 0 (degrees).
    pub fn set_out_start_angle(&mut self, angle: f32) {
        self.out_start_angle = angle;
        self.invalidate();
    }

    pub fn set_dewarp_mode(&mut self, mode: DewarpMode) {
        self.dewarp_mode = mode;
        self.invalidate();
    }

    pub fn set_scale_mode(&mut self, mode: ScaleMode) {
        self.scale_mode = mode;
    }

    pub fn set_blend_pyr_levels(&mut self, levels: u32) {
        self.blend_pyr_levels = levels;
    }

    pub fn set_bowl_config(&mut self, config: BowlDataConfig) {
        self.bowl_config = config;
    }

    /// Per-camera horizontal view angles (degrees).
    pub fn set_viewpoints_range(&mut self, range: &[f32]) -> Result<(), PlanError> {
        self.check_camera_slice_len(range.len())?;
        self.viewpoints_range.copy_from_slice(range);
        self.invalidate();
        Ok(())
    }

    /// Per-camera intrinsic file names, resolved against the
    /// calibration directory.
    pub fn set_intrinsic_names<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), PlanError> {
        self.check_camera_slice_len(names.len())?;
        for (dst, src) in self.intrinsic_names.iter_mut().zip(names) {
            *dst = src.as_ref().to_string();
        }
        self.invalidate();
        Ok(())
    }

    /// Per-camera extrinsic file names.
    pub fn set_extrinsic_names<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), PlanError> {
        self.check_camera_slice_len(names.len())?;
        for (dst, src) in self.extrinsic_names.iter_mut().zip(names) {
            *dst = src.as_ref().to_string();
        }
        self.invalidate();
        Ok(())
    }

    /// Override the calibration directory instead of consulting
    /// `FISHEYE_CONFIG_PATH`.
    pub fn set_calib_dir<P: Into<PathBuf>>(&mut self, dir: P) {
        self.calib_dir = Some(dir.into());
        self.invalidate();
    }

    /// Rig-frame X shift applied to loaded extrinsics (millimetres).
    pub fn set_position_offset_x_mm(&mut self, offset: f32) {
        self.position_offset_x_mm = offset;
        self.invalidate();
    }

    /// Distance from the panorama edges inside which slice starts and
    /// centre marks snap to column 0. Defaults to twice the X
    /// alignment.
    pub fn set_edge_snap_margin(&mut self, margin: u32) {
        self.edge_snap_margin = Some(margin);
        self.invalidate();
    }

    /// Inject one camera's parameters directly, bypassing the
    /// calibration loader. Marks the camera-initialisation stage done;
    /// the caller is responsible for writing every slot.
    pub fn set_camera_info(&mut self, index: u32, info: CameraInfo) -> Result<(), PlanError> {
        self.check_camera_index(index)?;
        self.camera_info[index as usize] = info;
        // Direct injection replaces init_camera_info; downstream
        // stages are stale either way.
        self.stage = PlanStage::CamerasInited;
        self.round_view_slices.clear();
        self.center_marks.clear();
        self.overlap_info.clear();
        self.copy_areas.clear();
        Ok(())
    }

    /// Set one camera's crop margins. Rewinds planning to the slicing
    /// stage when later steps already ran.
    pub fn set_crop_info(&mut self, index: u32, info: ImageCropInfo) -> Result<(), PlanError> {
        self.check_camera_index(index)?;
        self.crop_info[index as usize] = info;
        self.crop_overridden = true;
        if self.stage > PlanStage::Sliced {
            self.stage = PlanStage::Sliced;
            self.center_marks.clear();
            self.overlap_info.clear();
            self.copy_areas.clear();
        }
        Ok(())
    }

    // ── Feature-match gate ─────────────────────────────────────────────

    pub fn set_fm_mode(&mut self, mode: FmMode) {
        self.fm_gate.set_mode(mode);
    }

    pub fn set_fm_status(&mut self, status: FmStatus) {
        self.fm_gate.set_status(status);
    }

    pub fn set_fm_frames(&mut self, frames: u32) {
        self.fm_gate.set_frames(frames);
    }

    pub fn set_fm_region_ratio(&mut self, ratio: FmRegionRatio) -> Result<(), PlanError> {
        if !ratio.is_valid() {
            return Err(PlanError::BadRegionRatio(ratio));
        }
        self.fm_region_ratio = ratio;
        Ok(())
    }

    /// Advance the feature-match gate by one frame. Call exactly once
    /// per stitched frame.
    pub fn tick_frame(&mut self) {
        self.fm_gate.tick();
    }

    /// Should the backend run feature matching on the current frame?
    pub fn need_fm(&self) -> bool {
        self.fm_gate.need_fm()
    }

    /// May the backend emit the current stitched frame?
    pub fn complete_stitch(&self) -> bool {
        self.fm_gate.complete_stitch()
    }

    /// Feature-match regions of interest for one adjacency: the
    /// configured fraction of the overlap window, in left-slice and
    /// right-slice coordinates.
    pub fn fm_region(&self, index: u32) -> Result<(Rect, Rect), PlanError> {
        let overlap = self.overlap_info(index)?;
        let r = &self.fm_region_ratio;
        Ok((
            overlap.left.sub_rect_by_ratio(r.pos_x, r.width, r.pos_y, r.height),
            overlap.right.sub_rect_by_ratio(r.pos_x, r.width, r.pos_y, r.height),
        ))
    }

    // ── Planning ───────────────────────────────────────────────────────

    /// Drop every derived table and restart planning from scratch.
    /// Configuration values survive.
    pub fn invalidate(&mut self) {
        self.stage = PlanStage::Unconfigured;
        self.round_view_slices.clear();
        self.center_marks.clear();
        self.overlap_info.clear();
        self.copy_areas.clear();
    }

    /// Run every planning step in order.
    pub fn plan(&mut self) -> Result<(), PlanError> {
        self.init_camera_info()?;
        self.estimate_round_slices()?;
        self.estimate_coarse_crops()?;
        self.mark_centers()?;
        self.estimate_overlap()?;
        self.update_copy_areas()
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn camera_num(&self) -> u32 {
        self.camera_num
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.output_width, self.output_height)
    }

    pub fn alignment(&self) -> (u32, u32) {
        (self.alignment_x, self.alignment_y)
    }

    pub fn out_start_angle(&self) -> f32 {
        self.out_start_angle
    }

    pub fn dewarp_mode(&self) -> DewarpMode {
        self.dewarp_mode
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.scale_mode
    }

    pub fn blend_pyr_levels(&self) -> u32 {
        self.blend_pyr_levels
    }

    pub fn bowl_config(&self) -> &BowlDataConfig {
        &self.bowl_config
    }

    /// Per-camera parameters; available once cameras are initialised.
    pub fn camera_info(&self, index: u32) -> Result<&CameraInfo, PlanError> {
        self.check_camera_index(index)?;
        self.require_stage(PlanStage::CamerasInited, "camera_info", "init_camera_info")?;
        Ok(&self.camera_info[index as usize])
    }

    /// One camera's crop margins (zero until set or estimated).
    pub fn crop_info(&self, index: u32) -> Result<ImageCropInfo, PlanError> {
        self.check_camera_index(index)?;
        Ok(self.crop_info[index as usize])
    }

    /// One camera's slice on the panorama.
    pub fn round_view_slice(&self, index: u32) -> Result<&RoundViewSlice, PlanError> {
        self.check_camera_index(index)?;
        self.require_stage(PlanStage::Sliced, "round_view_slice", "estimate_round_slices")?;
        Ok(&self.round_view_slices[index as usize])
    }

    /// One camera's centre mark.
    pub fn center_mark(&self, index: u32) -> Result<&CenterMark, PlanError> {
        self.check_camera_index(index)?;
        self.require_stage(PlanStage::Centred, "center_mark", "mark_centers")?;
        Ok(&self.center_marks[index as usize])
    }

    /// Overlap window of adjacency `index` (between cameras `index`
    /// and `index + 1` modulo the camera count).
    pub fn overlap_info(&self, index: u32) -> Result<&ImageOverlapInfo, PlanError> {
        self.check_camera_index(index)?;
        self.require_stage(PlanStage::Overlapped, "overlap_info", "estimate_overlap")?;
        Ok(&self.overlap_info[index as usize])
    }

    /// Every copy area of the finished plan.
    pub fn copy_areas(&self) -> Result<&[CopyArea], PlanError> {
        self.require_stage(PlanStage::CopyAreasReady, "copy_areas", "update_copy_areas")?;
        Ok(&self.copy_areas)
    }

    // ── Internal helpers ───────────────────────────────────────────────

    pub(crate) fn stage(&self) -> PlanStage {
        self.stage
    }

    pub(crate) fn set_stage(&mut self, stage: PlanStage) {
        self.stage = stage;
    }

    /// Snap distance from the panorama edges.
    pub(crate) fn snap_margin(&self) -> u32 {
        self.edge_snap_margin.unwrap_or(2 * self.alignment_x)
    }

    fn check_camera_index(&self, index: u32) -> Result<(), PlanError> {
        if self.camera_num == 0 {
            return Err(PlanError::CameraNumUnset);
        }
        if index >= self.camera_num {
            return Err(PlanError::IndexOutOfRange {
                index,
                camera_num: self.camera_num,
            });
        }
        Ok(())
    }

    fn check_camera_slice_len(&self, len: usize) -> Result<(), PlanError> {
        if self.camera_num == 0 {
            return Err(PlanError::CameraNumUnset);
        }
        if len != self.camera_num as usize {
            return Err(PlanError::IndexOutOfRange {
                index: len as u32,
                camera_num: self.camera_num,
            });
        }
        Ok(())
    }

    pub(crate) fn require_stage(
        &self,
        at_least: PlanStage,
        step: &'static str,
        needs: &'static str,
    ) -> Result<(), PlanError> {
        if self.stage < at_least {
            return Err(PlanError::Order { step, needs });
        }
        Ok(())
    }

    pub(crate) fn require_output(&self) -> Result<(), PlanError> {
        if self.output_width == 0 || self.output_height == 0 {
            return Err(PlanError::OutputUnset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CONFIG_ENV_VAR;
    use crate::test_utils::{sphere_stitcher, write_calibration_dir};
    use approx::assert_relative_eq;

    #[test]
    fn camera_count_is_bounded() {
        let mut stitcher = Stitcher::new(16, 16);
        assert!(matches!(
            stitcher.set_camera_num(0),
            Err(PlanError::CameraNumUnset)
        ));
        assert!(matches!(
            stitcher.set_camera_num(9),
            Err(PlanError::TooManyCameras { num: 9 })
        ));
        stitcher.set_camera_num(MAX_CAMERAS).unwrap();
        assert_eq!(stitcher.camera_num(), MAX_CAMERAS);
    }

    #[test]
    fn per_camera_setters_need_the_count_first() {
        let mut stitcher = Stitcher::new(16, 16);
        assert!(matches!(
            stitcher.set_viewpoints_range(&[120.0; 4]),
            Err(PlanError::CameraNumUnset)
        ));
        stitcher.set_camera_num(4).unwrap();
        assert!(matches!(
            stitcher.set_viewpoints_range(&[120.0; 3]),
            Err(PlanError::IndexOutOfRange { .. })
        ));
        stitcher.set_viewpoints_range(&[120.0; 4]).unwrap();
        assert!(matches!(
            stitcher.set_intrinsic_names(&["a", "b"]),
            Err(PlanError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn getters_are_gated_on_planning_progress() {
        let mut stitcher = sphere_stitcher(2, 640, 320, &[190.0, 190.0], 8);
        assert!(matches!(
            stitcher.round_view_slice(0),
            Err(PlanError::Order { .. })
        ));
        assert!(matches!(stitcher.copy_areas(), Err(PlanError::Order { .. })));
        assert!(matches!(
            stitcher.round_view_slice(7),
            Err(PlanError::IndexOutOfRange { .. })
        ));

        stitcher.plan().unwrap();
        assert!(stitcher.round_view_slice(0).is_ok());
        assert!(stitcher.overlap_info(1).is_ok());
        assert!(stitcher.copy_areas().is_ok());
    }

    #[test]
    fn reconfiguration_invalidates_the_plan() {
        let mut stitcher = sphere_stitcher(2, 640, 320, &[190.0, 190.0], 8);
        stitcher.plan().unwrap();
        assert!(stitcher.copy_areas().is_ok());

        stitcher.set_output_size(1280, 640).unwrap();
        assert!(matches!(stitcher.copy_areas(), Err(PlanError::Order { .. })));

        stitcher.plan().unwrap();
        assert_eq!(stitcher.round_view_slice(0).unwrap().height, 640);
    }

    #[test]
    fn full_plan_is_idempotent() {
        let mut stitcher = sphere_stitcher(4, 1920, 640, &[110.0, 140.0, 110.0, 140.0], 16);
        stitcher.plan().unwrap();
        let areas: Vec<_> = stitcher.copy_areas().unwrap().to_vec();
        stitcher.plan().unwrap();
        assert_eq!(stitcher.copy_areas().unwrap(), areas.as_slice());
    }

    #[test]
    fn crop_update_rewinds_to_the_slice_stage() {
        let mut stitcher = sphere_stitcher(2, 640, 320, &[190.0, 190.0], 8);
        stitcher.plan().unwrap();

        let crop = roundview_core::ImageCropInfo {
            left: 0,
            right: 0,
            top: 8,
            bottom: 8,
        };
        stitcher.set_crop_info(0, crop).unwrap();
        assert!(stitcher.round_view_slice(0).is_ok());
        assert!(matches!(stitcher.overlap_info(0), Err(PlanError::Order { .. })));

        stitcher.plan().unwrap();
        let overlap = stitcher.overlap_info(0).unwrap();
        assert_eq!(overlap.left.pos_y, 8);
        assert_eq!(overlap.left.height, 320 - 16);
    }

    #[test]
    fn bowl_mode_loads_and_centralises_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let (intr_names, extr_names) = write_calibration_dir(dir.path(), 4);

        let mut stitcher = Stitcher::new(16, 16);
        stitcher.set_camera_num(4).unwrap();
        stitcher.set_output_size(1920, 640).unwrap();
        stitcher
            .set_viewpoints_range(&[110.0, 140.0, 110.0, 140.0])
            .unwrap();
        stitcher.set_intrinsic_names(&intr_names).unwrap();
        stitcher.set_extrinsic_names(&extr_names).unwrap();
        stitcher.set_calib_dir(dir.path());

        stitcher.init_camera_info().unwrap();

        // The rig is written symmetric around the origin, so the
        // configured X offset cancels in centralisation.
        let front = stitcher.camera_info(0).unwrap();
        assert_relative_eq!(front.calibration.extrinsic.trans_x, 1900.0, epsilon = 1e-2);
        assert_relative_eq!(front.calibration.extrinsic.trans_y, 0.0, epsilon = 1e-2);
        assert_relative_eq!(front.calibration.intrinsic.fx, 1148.0);
        assert_relative_eq!(front.angle_range, 110.0);
        assert_relative_eq!(front.round_angle_start, -55.0);

        let mean_x: f32 = (0..4)
            .map(|i| stitcher.camera_info(i).unwrap().calibration.extrinsic.trans_x)
            .sum::<f32>()
            / 4.0;
        assert_relative_eq!(mean_x, 0.0, epsilon = 1e-2);

        // Planning proceeds on top of the loaded calibration.
        stitcher.plan().unwrap();
        assert_eq!(stitcher.round_view_slice(0).unwrap().width, 592);
    }

    #[test]
    fn bowl_mode_without_names_or_path_fails_closed() {
        let mut stitcher = Stitcher::new(16, 16);
        stitcher.set_camera_num(4).unwrap();
        stitcher.set_output_size(1920, 640).unwrap();
        stitcher
            .set_viewpoints_range(&[110.0, 140.0, 110.0, 140.0])
            .unwrap();

        assert!(matches!(
            stitcher.init_camera_info(),
            Err(PlanError::MissingCalibName { index: 0 })
        ));

        stitcher
            .set_intrinsic_names(&["intrinsic_camera_0.txt"; 4])
            .unwrap();
        stitcher
            .set_extrinsic_names(&["extrinsic_camera_0.txt"; 4])
            .unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);
        match stitcher.init_camera_info() {
            Err(PlanError::Calib(crate::calibration::CalibError::EnvUnset)) => {}
            other => panic!("expected unset environment error, got {other:?}"),
        }
        // Nothing downstream is marked done.
        assert!(matches!(
            stitcher.round_view_slice(0),
            Err(PlanError::Order { .. })
        ));
    }

    #[test]
    fn direct_camera_info_replaces_the_loader() {
        let mut stitcher = sphere_stitcher(2, 640, 320, &[190.0, 190.0], 8);
        stitcher.plan().unwrap();

        let mut info = *stitcher.camera_info(0).unwrap();
        info.angle_range = 200.0;
        info.round_angle_start = -100.0;
        stitcher.set_camera_info(0, info).unwrap();

        // Downstream tables are stale until re-planned.
        assert!(matches!(stitcher.copy_areas(), Err(PlanError::Order { .. })));
        stitcher.plan().unwrap();
        assert_eq!(stitcher.round_view_slice(0).unwrap().width, 360);
    }

    #[test]
    fn fm_region_needs_overlaps_and_a_valid_ratio() {
        let mut stitcher = sphere_stitcher(2, 640, 320, &[190.0, 190.0], 8);
        assert!(matches!(stitcher.fm_region(0), Err(PlanError::Order { .. })));

        let bad = crate::fm::FmRegionRatio {
            pos_x: 0.8,
            width: 0.4,
            pos_y: 0.0,
            height: 1.0,
        };
        assert!(matches!(
            stitcher.set_fm_region_ratio(bad),
            Err(PlanError::BadRegionRatio(_))
        ));

        stitcher.plan().unwrap();
        let (left, right) = stitcher.fm_region(0).unwrap();
        let overlap = stitcher.overlap_info(0).unwrap();
        assert_eq!(left, overlap.left);
        assert_eq!(right, overlap.right);
    }
}
