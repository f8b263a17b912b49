//! Overlap windows and copy-area segmentation.
//!
//! For every adjacent camera pair the solver measures how far the two
//! slices reach past the midpoint between their centre columns; the
//! excess is the overlap window where the backend blends or
//! feature-matches. Everything outside the overlaps is copied 1:1, as
//! one `CopyArea` per side of each adjacency, split wherever the
//! destination crosses the panorama wrap column and re-merged where
//! neighbouring areas line up in both source and destination.

use roundview_core::Rect;

use super::{CopyArea, ImageOverlapInfo, PlanError, PlanStage, Stitcher};

/// Join two copy areas when they come from the same input and are
/// contiguous in both input and output columns.
fn merge_neighbor_area(current: &CopyArea, next: &CopyArea) -> Option<CopyArea> {
    if current.in_idx == next.in_idx
        && current.in_area.right() == next.in_area.pos_x
        && current.out_area.right() == next.out_area.pos_x
    {
        let mut merged = *current;
        merged.in_area.width += next.in_area.width;
        merged.out_area.width += next.out_area.width;
        return Some(merged);
    }
    None
}

/// Split a copy area whose destination crosses the wrap column into a
/// tail segment and a head segment starting at column 0.
fn split_area_by_out(area: CopyArea, round_width: u32) -> (CopyArea, Option<CopyArea>) {
    debug_assert!(area.out_area.pos_x >= 0 && area.out_area.pos_x < round_width as i32);
    debug_assert!(area.out_area.width > 0 && area.out_area.width < round_width as i32);
    debug_assert_eq!(area.out_area.width, area.in_area.width);

    if area.out_area.right() <= round_width as i32 {
        return (area, None);
    }

    let tail_width = round_width as i32 - area.out_area.pos_x;
    let mut tail = area;
    tail.in_area.width = tail_width;
    tail.out_area.width = tail_width;

    let mut head = area;
    head.in_area.pos_x = area.in_area.pos_x + tail_width;
    head.in_area.width = area.in_area.width - tail_width;
    head.out_area.pos_x = 0;
    head.out_area.width = head.in_area.width;

    (tail, Some(head))
}

impl Stitcher {
    /// Estimate the overlap window of every adjacent camera pair.
    pub fn estimate_overlap(&mut self) -> Result<(), PlanError> {
        if self.stage() >= PlanStage::Overlapped {
            return Ok(());
        }
        self.require_stage(PlanStage::Centred, "estimate_overlap", "mark_centers")?;

        let mut overlaps = Vec::with_capacity(self.camera_num as usize);
        for idx in 0..self.camera_num {
            let next = (idx + 1) % self.camera_num;
            let left = &self.round_view_slices[idx as usize];
            let right = &self.round_view_slices[next as usize];
            let left_center = &self.center_marks[idx as usize];
            let right_center = &self.center_marks[next as usize];
            let left_crop = &self.crop_info[idx as usize];
            let right_crop = &self.crop_info[next as usize];

            // The pair around the wrap measures against the far edge.
            let out_right_center_x = if right_center.out_center_x == 0 {
                self.output_width
            } else {
                right_center.out_center_x
            };

            let valid_left = Rect {
                pos_x: left_center.slice_center_x as i32,
                pos_y: left_crop.top as i32,
                width: left.width as i32
                    - left_crop.right as i32
                    - left_center.slice_center_x as i32,
                height: left.height as i32 - left_crop.top as i32 - left_crop.bottom as i32,
            };
            let valid_right_width = right_center.slice_center_x as i32 - right_crop.left as i32;
            let valid_right = Rect {
                pos_x: right_center.slice_center_x as i32 - valid_right_width,
                pos_y: right_crop.top as i32,
                width: valid_right_width,
                height: right.height as i32 - right_crop.top as i32 - right_crop.bottom as i32,
            };

            let merge_width = out_right_center_x as i32 - left_center.out_center_x as i32;
            if merge_width <= 0 {
                return Err(PlanError::Internal {
                    what: "centre marks out of order",
                });
            }
            if valid_left.width + valid_right.width <= merge_width {
                return Err(PlanError::NoOverlap {
                    left: idx,
                    right: next,
                    merge_width: merge_width as u32,
                    valid_width: (valid_left.width + valid_right.width).max(0) as u32,
                });
            }
            let overlap_width = valid_left.width + valid_right.width - merge_width;

            let left_overlap = Rect {
                pos_x: valid_left.right() - overlap_width,
                pos_y: valid_left.pos_y,
                width: overlap_width,
                height: valid_left.height,
            };
            let right_overlap = Rect {
                pos_x: valid_right.pos_x,
                pos_y: valid_right.pos_y,
                width: overlap_width,
                height: valid_right.height,
            };
            let out_overlap = Rect {
                pos_x: left_center.out_center_x as i32 + valid_left.width - overlap_width,
                pos_y: valid_left.pos_y,
                width: overlap_width,
                height: valid_left.height,
            };

            tracing::debug!(
                pair = format_args!("{idx}->{next}"),
                overlap_width,
                out_pos = out_overlap.pos_x,
                "overlap window"
            );
            overlaps.push(ImageOverlapInfo {
                left: left_overlap,
                right: right_overlap,
                out_area: out_overlap,
            });
        }

        self.overlap_info = overlaps;
        self.set_stage(PlanStage::Overlapped);
        Ok(())
    }

    /// Segment everything outside the overlaps into 1:1 copy areas.
    ///
    /// Areas whose destination crosses the wrap column are pre-split;
    /// contiguous neighbours from the same camera are re-merged, with
    /// the last and first treated as neighbours to close the ring. A
    /// wrap-crossing join is never re-created: the ring closure only
    /// fires when the merged destination stays inside the panorama.
    pub fn update_copy_areas(&mut self) -> Result<(), PlanError> {
        if self.stage() >= PlanStage::CopyAreasReady {
            return Ok(());
        }
        self.require_stage(PlanStage::Overlapped, "update_copy_areas", "estimate_overlap")?;
        if self.camera_num < 2 {
            return Err(PlanError::Order {
                step: "update_copy_areas",
                needs: "at least two cameras",
            });
        }

        let mut segments: Vec<CopyArea> = Vec::with_capacity(2 * self.camera_num as usize + 2);
        for idx in 0..self.camera_num {
            let next = (idx + 1) % self.camera_num;
            let left_mark = &self.center_marks[idx as usize];
            let right_mark = &self.center_marks[next as usize];
            let overlap = &self.overlap_info[idx as usize];
            let left_crop = &self.crop_info[idx as usize];
            let right_crop = &self.crop_info[next as usize];

            // Left side: from the left camera's centre to the overlap.
            let left_height = self.round_view_slices[idx as usize].height as i32
                - left_crop.top as i32
                - left_crop.bottom as i32;
            let left = CopyArea {
                in_idx: idx,
                in_area: Rect {
                    pos_x: left_mark.slice_center_x as i32,
                    pos_y: left_crop.top as i32,
                    width: overlap.left.pos_x - left_mark.slice_center_x as i32,
                    height: left_height,
                },
                out_area: Rect {
                    pos_x: left_mark.out_center_x as i32,
                    pos_y: 0,
                    width: overlap.left.pos_x - left_mark.slice_center_x as i32,
                    height: left_height,
                },
            };
            if left.in_area.width <= 0 || left.in_area.height <= 0 {
                return Err(PlanError::Internal {
                    what: "left copy area collapsed",
                });
            }
            let (tail, head) = split_area_by_out(left, self.output_width);
            segments.push(tail);
            segments.extend(head);

            // Right side: from the overlap to the right camera's centre.
            let right_in_start = overlap.right.right();
            let right_width = right_mark.slice_center_x as i32 - right_in_start;
            let right_height = self.round_view_slices[next as usize].height as i32
                - right_crop.top as i32
                - right_crop.bottom as i32;
            let out_right_center_x = if right_mark.out_center_x == 0 {
                self.output_width
            } else {
                right_mark.out_center_x
            };
            let right = CopyArea {
                in_idx: next,
                in_area: Rect {
                    pos_x: right_in_start,
                    pos_y: right_crop.top as i32,
                    width: right_width,
                    height: right_height,
                },
                out_area: Rect {
                    pos_x: out_right_center_x as i32 - right_width,
                    pos_y: 0,
                    width: right_width,
                    height: right_height,
                },
            };
            if right.in_area.width <= 0 || right.in_area.height <= 0 {
                return Err(PlanError::Internal {
                    what: "right copy area collapsed",
                });
            }
            let (tail, head) = split_area_by_out(right, self.output_width);
            segments.push(tail);
            segments.extend(head);
        }

        // Ring merge: the last and first segment may continue each
        // other, then a single pass joins the interior neighbours.
        let mut areas = Vec::with_capacity(segments.len());
        let mut start = 0usize;
        let mut end = segments.len() - 1;
        if segments.len() > 2 {
            if let Some(merged) = merge_neighbor_area(&segments[end], &segments[start]) {
                areas.push(merged);
                start += 1;
                end -= 1;
            }
        }
        let mut i = start;
        while i <= end {
            if i == end {
                areas.push(segments[i]);
                break;
            }
            if let Some(merged) = merge_neighbor_area(&segments[i], &segments[i + 1]) {
                areas.push(merged);
                i += 2;
            } else {
                areas.push(segments[i]);
                i += 1;
            }
        }

        for area in &areas {
            if area.in_area.width != area.out_area.width
                || area.out_area.pos_x < 0
                || area.out_area.right() > self.output_width as i32
            {
                return Err(PlanError::Internal {
                    what: "copy area crosses the wrap column",
                });
            }
        }

        tracing::info!(
            cameras = self.camera_num,
            copy_areas = areas.len(),
            "copy area plan ready"
        );
        self.copy_areas = areas;
        self.set_stage(PlanStage::CopyAreasReady);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{coverage_of, sphere_stitcher};

    fn area(in_idx: u32, in_x: i32, out_x: i32, width: i32) -> CopyArea {
        CopyArea {
            in_idx,
            in_area: Rect::new(in_x, 0, width, 100),
            out_area: Rect::new(out_x, 0, width, 100),
        }
    }

    #[test]
    fn split_keeps_widths_paired() {
        let wrapped = area(0, 10, 600, 100);
        let (tail, head) = split_area_by_out(wrapped, 640);
        let head = head.expect("crossing area splits");
        assert_eq!(tail.out_area, Rect::new(600, 0, 40, 100));
        assert_eq!(tail.in_area, Rect::new(10, 0, 40, 100));
        assert_eq!(head.out_area, Rect::new(0, 0, 60, 100));
        assert_eq!(head.in_area, Rect::new(50, 0, 60, 100));

        let inside = area(0, 10, 500, 140);
        let (kept, none) = split_area_by_out(inside, 640);
        assert_eq!(kept, inside);
        assert!(none.is_none());
    }

    #[test]
    fn merge_requires_contiguity_on_both_sides() {
        let a = area(1, 0, 100, 50);
        let b = area(1, 50, 150, 30);
        let merged = merge_neighbor_area(&a, &b).expect("contiguous areas merge");
        assert_eq!(merged.in_area.width, 80);
        assert_eq!(merged.out_area, Rect::new(100, 0, 80, 100));

        // Different camera.
        assert!(merge_neighbor_area(&area(0, 0, 100, 50), &b).is_none());
        // Gap on the input side.
        assert!(merge_neighbor_area(&a, &area(1, 60, 150, 30)).is_none());
        // Gap on the output side.
        assert!(merge_neighbor_area(&a, &area(1, 50, 160, 30)).is_none());
    }

    #[test]
    fn four_camera_overlaps_and_copy_areas() {
        let mut stitcher = sphere_stitcher(4, 1920, 640, &[110.0, 140.0, 110.0, 140.0], 16);
        stitcher.plan().unwrap();

        for i in 0..4 {
            let overlap = stitcher.overlap_info(i).unwrap();
            assert_eq!(overlap.left.width, 192);
            assert_eq!(overlap.right.width, 192);
            assert_eq!(overlap.out_area.width, 192);
        }
        // The overlap windows sit between the adjacent centre columns.
        assert_eq!(stitcher.overlap_info(0).unwrap().out_area.pos_x, 112);
        assert_eq!(stitcher.overlap_info(1).unwrap().out_area.pos_x, 672);
        assert_eq!(stitcher.overlap_info(2).unwrap().out_area.pos_x, 1072);
        assert_eq!(stitcher.overlap_info(3).unwrap().out_area.pos_x, 1632);

        // Interior left/right pairs merge; the ring stays split at the
        // wrap column.
        let areas = stitcher.copy_areas().unwrap();
        assert_eq!(areas.len(), 5);

        let coverage = coverage_of(&stitcher);
        assert!(coverage.iter().all(|&c| c == 1), "coverage {coverage:?}");
    }

    #[test]
    fn two_camera_ring_wraps_and_covers() {
        let mut stitcher = sphere_stitcher(2, 640, 320, &[190.0, 190.0], 8);
        stitcher.plan().unwrap();

        // valid_left (176) + valid_right (168) - merge (320) = 24.
        for i in 0..2 {
            let overlap = stitcher.overlap_info(i).unwrap();
            assert_eq!(overlap.left.width, 24);
            assert_eq!(overlap.right.width, 24);
            assert_eq!(overlap.out_area.width, 24);
        }

        // Camera 1's two sides merge into one interior run; camera 0's
        // region wraps and stays pre-split into a tail and a head.
        let areas = stitcher.copy_areas().unwrap();
        assert_eq!(areas.len(), 3);
        assert!(areas.iter().all(|a| a.out_area.pos_x >= 0
            && a.out_area.right() <= 640
            && a.in_area.width == a.out_area.width));
        let camera0: Vec<_> = areas.iter().filter(|a| a.in_idx == 0).collect();
        assert_eq!(camera0.len(), 2);
        assert!(camera0.iter().any(|a| a.out_area.pos_x == 0));
        assert!(camera0.iter().any(|a| a.out_area.right() == 640));

        let coverage = coverage_of(&stitcher);
        assert!(coverage.iter().all(|&c| c == 1), "coverage {coverage:?}");
    }

    #[test]
    fn too_small_output_has_no_overlap() {
        // 90° views on a 4-camera ring leave gaps between slices.
        let mut stitcher = sphere_stitcher(4, 1920, 640, &[90.0, 90.0, 90.0, 90.0], 16);
        stitcher.init_camera_info().unwrap();
        stitcher.estimate_round_slices().unwrap();
        stitcher.estimate_coarse_crops().unwrap();
        stitcher.mark_centers().unwrap();
        assert!(matches!(
            stitcher.estimate_overlap(),
            Err(PlanError::NoOverlap { .. })
        ));
        // The failed step leaves the planner queryable at the previous
        // stage.
        assert!(stitcher.center_mark(0).is_ok());
        assert!(stitcher.overlap_info(0).is_err());
    }

    #[test]
    fn copy_areas_before_overlap_is_an_order_error() {
        let mut stitcher = sphere_stitcher(2, 640, 320, &[190.0, 190.0], 8);
        stitcher.init_camera_info().unwrap();
        stitcher.estimate_round_slices().unwrap();
        assert!(matches!(
            stitcher.update_copy_areas(),
            Err(PlanError::Order { .. })
        ));
    }
}
