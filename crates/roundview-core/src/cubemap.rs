//! Cubemap ↔ equirectangular lookup table.
//!
//! The output is a 3×2 unfolded cube:
//!
//! ```text
//! +-------+-------+-------+
//! | Right | Left  |  Up   |
//! +-------+-------+-------+
//! | Down  | Front | Back  |
//! +-------+-------+-------+
//! ```
//!
//! For every cubemap pixel the model computes the direction through
//! that pixel's face position, then maps the direction to the source
//! equirectangular (ERP) image. The face tiles may have non-integer
//! sides when the output is not 3:2; tile edges are then placed on
//! pixel boundaries with `ceil`, matching how backends tile textures.

use nalgebra::Vector3;

use crate::PointMap;

/// Faces of the unfolded cube, in tile order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CubeSide {
    Right,
    Left,
    Up,
    Down,
    Front,
    Back,
}

impl CubeSide {
    fn from_tile(tile_u: u32, tile_v: u32) -> Self {
        match (tile_v, tile_u) {
            (0, 0) => Self::Right,
            (0, 1) => Self::Left,
            (0, _) => Self::Up,
            (_, 0) => Self::Down,
            (_, 1) => Self::Front,
            _ => Self::Back,
        }
    }
}

/// Direction through a cubemap pixel.
fn cubemap_world_pos(u: u32, v: u32, cubemap_width: u32, cubemap_height: u32) -> Vector3<f32> {
    let side_width = cubemap_width as f32 / 3.0;
    let side_height = cubemap_height as f32 / 2.0;

    let tile_u = (u as f32 / side_width).floor() as u32;
    let tile_v = (v as f32 / side_height).floor() as u32;
    let side = CubeSide::from_tile(tile_u, tile_v);

    let side_left = (side_width * tile_u as f32).ceil();
    let side_right = (side_width * (tile_u + 1) as f32).ceil();
    let side_top = (side_height * tile_v as f32).ceil();
    let side_bottom = (side_height * (tile_v + 1) as f32).ceil();

    // Pixel centre position on the face, in [-1, 1].
    let side_u = 2.0 * (u as f32 - side_left + 0.5) / (side_right - side_left) - 1.0;
    let side_v = 2.0 * (v as f32 - side_top + 0.5) / (side_bottom - side_top) - 1.0;

    match side {
        CubeSide::Right => Vector3::new(1.0, -side_u, side_v),
        CubeSide::Left => Vector3::new(-1.0, side_u, side_v),
        CubeSide::Up => Vector3::new(side_u, side_v, -1.0),
        CubeSide::Down => Vector3::new(side_u, -side_v, 1.0),
        CubeSide::Front => Vector3::new(side_u, 1.0, side_v),
        CubeSide::Back => Vector3::new(-side_u, -1.0, side_v),
    }
}

/// Equirectangular projection model over a fixed source image.
#[derive(Debug, Clone, Copy)]
pub struct CubeMapModel {
    erp_width: u32,
    erp_height: u32,
}

impl CubeMapModel {
    /// Bind the model to the source equirectangular image size.
    pub fn new(erp_width: u32, erp_height: u32) -> Self {
        Self {
            erp_width,
            erp_height,
        }
    }

    /// ERP coordinate of a unit direction.
    fn world_to_erp(&self, dir: Vector3<f32>) -> [f32; 2] {
        let phi = dir.x.atan2(dir.y);
        let theta = dir.z.asin();
        [
            (phi / std::f32::consts::PI + 1.0) * self.erp_width as f32 / 2.0,
            (theta / std::f32::consts::PI * 2.0 + 1.0) * self.erp_height as f32 / 2.0,
        ]
    }

    /// Build the cubemap lookup table: for each output pixel the ERP
    /// texture coordinate to sample. Coordinates always fall inside
    /// the source image.
    pub fn cubemap_rect_map(&self, res_width: u32, res_height: u32) -> PointMap {
        let mut points = PointMap::with_capacity((res_width * res_height) as usize);
        for row in 0..res_height {
            for col in 0..res_width {
                let dir = cubemap_world_pos(col, row, res_width, res_height).normalize();
                let tex = self.world_to_erp(dir);
                points.push([
                    tex[0].clamp(0.0, self.erp_width as f32 - 1.0),
                    tex[1].clamp(0.0, self.erp_height as f32 - 1.0),
                ]);
            }
        }
        points
    }
}
