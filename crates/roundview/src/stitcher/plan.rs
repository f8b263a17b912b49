//! Camera initialisation, slice layout, coarse crops and centre marks.

use roundview_core::{align_around, align_up, format_angle, nearly_equal, ANGLE_EPS};

use crate::calibration::{centralize_extrinsics, config_dir_from_env, load_calibrations};

use super::{CenterMark, DewarpMode, PlanError, PlanStage, RoundViewSlice, Stitcher};

impl Stitcher {
    /// Initialise per-camera angle ranges and, in bowl mode, load and
    /// centralise the calibration.
    ///
    /// Cameras are assumed evenly spaced: camera `i` looks at azimuth
    /// `i·360°/N` and its slice starts half its view angle earlier.
    pub fn init_camera_info(&mut self) -> Result<(), PlanError> {
        if self.stage() >= PlanStage::CamerasInited {
            return Ok(());
        }
        if self.camera_num == 0 {
            return Err(PlanError::CameraNumUnset);
        }

        if self.dewarp_mode == DewarpMode::Bowl {
            for index in 0..self.camera_num as usize {
                if self.intrinsic_names[index].is_empty() || self.extrinsic_names[index].is_empty()
                {
                    return Err(PlanError::MissingCalibName {
                        index: index as u32,
                    });
                }
            }
            let dir = match &self.calib_dir {
                Some(dir) => dir.clone(),
                None => config_dir_from_env()?,
            };
            tracing::info!("stitcher calibration config path: {}", dir.display());

            let mut calibs =
                load_calibrations(&dir, &self.intrinsic_names, &self.extrinsic_names)?;
            for calib in calibs.iter_mut() {
                calib.extrinsic.trans_x += self.position_offset_x_mm;
            }
            centralize_extrinsics(&mut calibs);

            for (info, calib) in self.camera_info.iter_mut().zip(calibs) {
                info.calibration = calib;
            }
        }

        let camera_num = self.camera_num;
        for (i, info) in self.camera_info.iter_mut().enumerate() {
            info.angle_range = self.viewpoints_range[i];
            info.round_angle_start = i as f32 * 360.0 / camera_num as f32 - info.angle_range / 2.0;
        }

        self.set_stage(PlanStage::CamerasInited);
        Ok(())
    }

    /// Lay each camera's slice onto the cylindrical output.
    ///
    /// Slice widths follow the requested view angles, rounded up to the
    /// X alignment; the aligned width is then authoritative and the
    /// angular range is recomputed from it. Slice starts landing within
    /// the snap margin of either panorama edge are forced to column 0
    /// so the seam does not degenerate at the wrap.
    pub fn estimate_round_slices(&mut self) -> Result<(), PlanError> {
        if self.stage() >= PlanStage::Sliced {
            return Ok(());
        }
        self.require_stage(
            PlanStage::CamerasInited,
            "estimate_round_slices",
            "init_camera_info",
        )?;
        self.require_output()?;

        let out_width = self.output_width as f32;
        let margin = self.snap_margin();
        let mut slices = Vec::with_capacity(self.camera_num as usize);

        for (i, info) in self.camera_info.iter().enumerate() {
            let width = align_up(
                (info.angle_range / 360.0 * out_width) as u32,
                self.alignment_x,
            );
            if width > self.output_width {
                return Err(PlanError::Internal {
                    what: "slice wider than the panorama",
                });
            }
            let hori_angle_range = width as f32 * 360.0 / out_width;
            if (hori_angle_range - info.angle_range).abs() > 0.1 * info.angle_range {
                tracing::warn!(
                    camera = i,
                    requested = info.angle_range,
                    aligned = hori_angle_range,
                    "aligned slice angle drifted far from the requested range"
                );
            }

            let mut aligned_start = align_around(
                (format_angle(info.round_angle_start) / 360.0 * out_width) as u32,
                self.alignment_x,
            );
            if self.output_width <= margin + aligned_start || aligned_start <= margin {
                aligned_start = 0;
            }
            let mut hori_angle_start = format_angle(aligned_start as f32 / out_width * 360.0);
            if nearly_equal(hori_angle_start, 0.0, ANGLE_EPS) {
                hori_angle_start = 0.0;
            }

            tracing::debug!(
                camera = i,
                width,
                start = hori_angle_start,
                range = hori_angle_range,
                "round view slice"
            );
            slices.push(RoundViewSlice {
                width,
                height: self.output_height,
                hori_angle_start,
                hori_angle_range,
            });
        }

        // The aligned values are authoritative for every later step.
        for (info, slice) in self.camera_info.iter_mut().zip(&slices) {
            info.round_angle_start = slice.hori_angle_start;
            info.angle_range = slice.hori_angle_range;
        }
        self.round_view_slices = slices;
        self.set_stage(PlanStage::Sliced);
        Ok(())
    }

    /// Default the crop margins to zero unless they were set externally.
    pub fn estimate_coarse_crops(&mut self) -> Result<(), PlanError> {
        if self.stage() >= PlanStage::Cropped {
            return Ok(());
        }
        self.require_stage(
            PlanStage::Sliced,
            "estimate_coarse_crops",
            "estimate_round_slices",
        )?;

        if !self.crop_overridden {
            for crop in self.crop_info.iter_mut() {
                *crop = Default::default();
            }
        }
        self.set_stage(PlanStage::Cropped);
        Ok(())
    }

    /// Locate each camera's principal ray on the panorama and inside
    /// its own slice.
    pub fn mark_centers(&mut self) -> Result<(), PlanError> {
        if self.stage() >= PlanStage::Centred {
            return Ok(());
        }
        self.require_stage(PlanStage::Cropped, "mark_centers", "estimate_coarse_crops")?;

        let out_width = self.output_width as f32;
        let margin = self.snap_margin();
        let mut marks = Vec::with_capacity(self.camera_num as usize);

        for i in 0..self.camera_num {
            let slice = &self.round_view_slices[i as usize];
            let crop = &self.crop_info[i as usize];

            let camera_angle = i as f32 * 360.0 / self.camera_num as f32;
            let mut out_pos =
                (format_angle(camera_angle - self.out_start_angle) / 360.0 * out_width) as u32;
            if self.output_width <= margin + out_pos || out_pos <= margin {
                out_pos = 0;
            }

            // Re-quantise the snapped output column into the slice's
            // angular window.
            let center_angle = format_angle(
                align_around(out_pos, self.alignment_x) as f32 / out_width * 360.0
                    - self.out_start_angle,
            );
            let center_in_slice = format_angle(center_angle - slice.hori_angle_start);
            if center_in_slice >= slice.hori_angle_range {
                return Err(PlanError::CenterOutsideSlice {
                    camera: i,
                    center_angle,
                    start: slice.hori_angle_start,
                    range: slice.hori_angle_range,
                });
            }

            let slice_pos = align_around(
                (center_in_slice / slice.hori_angle_range * slice.width as f32) as u32,
                self.alignment_x,
            );
            if slice_pos as i64 <= crop.left as i64
                || (slice_pos as i64) >= slice.width as i64 - crop.right as i64
            {
                return Err(PlanError::Internal {
                    what: "centre mark fell into the crop margins",
                });
            }

            tracing::debug!(
                camera = i,
                slice_center = slice_pos,
                out_center = out_pos,
                "centre mark"
            );
            marks.push(CenterMark {
                slice_center_x: slice_pos,
                out_center_x: out_pos,
            });
        }

        self.center_marks = marks;
        self.set_stage(PlanStage::Centred);
        Ok(())
    }
}
