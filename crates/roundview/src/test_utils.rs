//! Shared test fixtures: canned planner configurations and on-disk
//! calibration directories.

use std::fs;
use std::path::Path;

use crate::stitcher::{DewarpMode, Stitcher};

/// Planner in sphere mode with evenly spaced cameras.
pub(crate) fn sphere_stitcher(
    camera_num: u32,
    output_width: u32,
    output_height: u32,
    viewpoints: &[f32],
    alignment: u32,
) -> Stitcher {
    let mut stitcher = Stitcher::new(alignment, alignment);
    stitcher.set_camera_num(camera_num).unwrap();
    stitcher.set_output_size(output_width, output_height).unwrap();
    stitcher.set_dewarp_mode(DewarpMode::Sphere);
    stitcher.set_viewpoints_range(viewpoints).unwrap();
    stitcher
}

/// How often each panorama column is written by the finished plan:
/// once per covering copy area plus once per covering overlap window.
/// A correct plan covers every column exactly once.
pub(crate) fn coverage_of(stitcher: &Stitcher) -> Vec<u32> {
    let (width, _) = stitcher.output_size();
    let mut coverage = vec![0u32; width as usize];

    for area in stitcher.copy_areas().unwrap() {
        for col in area.out_area.pos_x..area.out_area.right() {
            coverage[col as usize] += 1;
        }
    }
    for adjacency in 0..stitcher.camera_num() {
        let overlap = stitcher.overlap_info(adjacency).unwrap();
        for col in overlap.out_area.pos_x..overlap.out_area.right() {
            coverage[col as usize] += 1;
        }
    }
    coverage
}

/// Write a plausible calibration directory for `camera_num` cameras and
/// return the (intrinsic, extrinsic) file name lists.
///
/// Cameras sit on a rough vehicle outline: front, right, rear, left,
/// then repeating, at 800 mm height with 190° lenses.
pub(crate) fn write_calibration_dir(
    dir: &Path,
    camera_num: usize,
) -> (Vec<String>, Vec<String>) {
    let mut intrinsic_names = Vec::with_capacity(camera_num);
    let mut extrinsic_names = Vec::with_capacity(camera_num);

    for i in 0..camera_num {
        let (x, y, yaw) = match i % 4 {
            0 => (1900.0, 0.0, 0.0),
            1 => (0.0, -900.0, -90.0),
            2 => (-1900.0, 0.0, 180.0),
            _ => (0.0, 900.0, 90.0),
        };

        let intr_name = format!("intrinsic_camera_{i}.txt");
        fs::write(
            dir.join(&intr_name),
            format!(
                "# synthetic intrinsics\n\
                 fx {fx}\nfy {fy}\ncx 960.0\ncy 720.0\n\
                 w 1920\nh 1440\nfov 190.0\nskew 0.0\nflip false\n",
                fx = 1148.0 + i as f32,
                fy = 1147.5 + i as f32,
            ),
        )
        .unwrap();
        intrinsic_names.push(intr_name);

        let extr_name = format!("extrinsic_camera_{i}.txt");
        fs::write(
            dir.join(&extr_name),
            format!(
                "# synthetic extrinsics\n\
                 yaw {yaw}\npitch 0.0\nroll 90.0\n\
                 trans_x {x}\ntrans_y {y}\ntrans_z 800.0\n"
            ),
        )
        .unwrap();
        extrinsic_names.push(extr_name);
    }

    (intrinsic_names, extrinsic_names)
}
