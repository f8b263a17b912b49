//! Ellipsoidal bowl model for ground-aligned surround views.
//!
//! The bowl is an ellipsoid with semi-axes `a, b, c` (millimetres),
//! centred at `(0, 0, center_z)` in the rig frame. The ground plane is
//! `z = 0`; the *wall* is the ellipsoid band `z ∈ [0, wall_height]` and
//! the *ground band* is the annulus between the z = 0 ellipse
//! (semi-major `a·√(1 − (center_z/c)²)`) and the same ellipse shrunk
//! inward by `ground_length` millimetres.
//!
//! A stitched panorama of size `image_width × image_height` drapes over
//! that surface: columns map linearly to azimuth over
//! `[angle_start, angle_end)`, rows `[0, wall_image_height)` run down
//! the wall and the remaining rows sweep the ground band inward. The
//! model exposes the closed-form maps between the two, the top-view
//! lookup table built from them, and triangle-strip meshes for bowl and
//! top-view rendering.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::angle::{format_angle, nearly_equal, ANGLE_EPS};
use crate::PointMap;

/// Slack on the top-view support bound, absorbing the float error of
/// feeding the maximal rectangle straight back into the bound.
const AREA_SLACK: f32 = 1e-3;

/// World points closer to the ground plane than this are ground points.
const GROUND_Z_EPS: f32 = 1e-3;

/// Ellipsoid bowl parameters. Lengths in millimetres, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BowlDataConfig {
    /// Semi-axis along X.
    pub a: f32,
    /// Semi-axis along Y.
    pub b: f32,
    /// Semi-axis along Z.
    pub c: f32,
    /// Azimuth mapped to the first panorama column.
    pub angle_start: f32,
    /// Azimuth mapped one past the last panorama column.
    pub angle_end: f32,
    /// Height of the ellipsoid centre above the ground plane.
    pub center_z: f32,
    /// Height of the wall band above the ground plane.
    pub wall_height: f32,
    /// Radial extent of the ground band, measured inward from the wall.
    pub ground_length: f32,
}

impl Default for BowlDataConfig {
    fn default() -> Self {
        Self {
            a: 6060.0,
            b: 4388.0,
            c: 3003.4,
            angle_start: -90.0,
            angle_end: 270.0,
            center_z: 1500.0,
            wall_height: 3000.0,
            ground_length: 2801.0,
        }
    }
}

impl BowlDataConfig {
    /// Azimuth range covered by the panorama columns.
    pub fn angle_span(&self) -> f32 {
        self.angle_end - self.angle_start
    }

    /// Radial scale of the z = 0 cross-section ellipse,
    /// `√(1 − (center_z/c)²)`.
    pub fn ground_ellipse_scale(&self) -> f32 {
        (1.0 - (self.center_z / self.c).powi(2)).max(0.0).sqrt()
    }

    /// Derive a bowl from the mounted camera positions (rig frame,
    /// millimetres).
    ///
    /// The ellipsoid centre sits at the mean camera height with
    /// `c = 2·center_z`, so the ellipsoid meets the ground; the
    /// semi-axes are sized so the maximal top view covers the camera
    /// footprint plus `x_view_scope`/`y_view_scope` of surroundings on
    /// each side. Cameras are indexed front, right, rear, left; rigs
    /// with fewer cameras reuse the front camera for the missing ones.
    pub fn from_camera_positions(
        positions: &[Vector3<f32>],
        x_view_scope: f32,
        y_view_scope: f32,
    ) -> Result<Self, BowlError> {
        if positions.is_empty() {
            return Err(BowlError::EmptyRig);
        }

        let center_z = positions.iter().map(|p| p.z).sum::<f32>() / positions.len() as f32;
        if nearly_equal(center_z, 0.0, ANGLE_EPS) {
            return Err(BowlError::FlatRig { center_z });
        }

        let c = 2.0 * center_z;
        let r = (1.0 - (center_z / c).powi(2)).max(0.0).sqrt();

        let front = positions[0];
        let right = positions.get(1).copied().unwrap_or(front);
        let rear = positions.get(2).copied().unwrap_or(front);
        let left = positions.get(3).copied().unwrap_or(front);

        let half_length = (front.x - rear.x) * 0.5;
        let half_width = (left.y - right.y) * 0.5;

        // Maximal top view is L = √2·a·r, so invert for the semi-axes.
        let denom = std::f32::consts::SQRT_2 * r;
        let a = (half_length + x_view_scope) * 2.0 / denom;
        let b = (half_width + y_view_scope) * 2.0 / denom;

        Ok(Self {
            a,
            b,
            c,
            angle_start: 0.0,
            angle_end: 360.0,
            center_z,
            wall_height: 2.0 * center_z,
            ground_length: r * b - half_width,
        })
    }
}

/// Errors from bowl construction and top-view queries.
#[derive(Debug, Clone, PartialEq)]
pub enum BowlError {
    /// `|center_z|` must stay strictly below the vertical semi-axis.
    CenterBeyondAxis { center_z: f32, c: f32 },
    /// Requested top-view rectangle has no support on the ellipsoid.
    AreaTooLarge {
        length_mm: f32,
        width_mm: f32,
        max_length_mm: f32,
        max_width_mm: f32,
    },
    /// No camera positions supplied.
    EmptyRig,
    /// Cameras mounted at zero mean height cannot define a bowl.
    FlatRig { center_z: f32 },
}

impl std::fmt::Display for BowlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CenterBeyondAxis { center_z, c } => write!(
                f,
                "bowl center_z ({center_z:.1}mm) reaches beyond the vertical semi-axis ({c:.1}mm)"
            ),
            Self::AreaTooLarge {
                length_mm,
                width_mm,
                max_length_mm,
                max_width_mm,
            } => write!(
                f,
                "top view {length_mm:.1}x{width_mm:.1}mm exceeds the supported \
                 {max_length_mm:.1}x{max_width_mm:.1}mm"
            ),
            Self::EmptyRig => write!(f, "no camera positions supplied"),
            Self::FlatRig { center_z } => write!(
                f,
                "mean camera height {center_z:.1}mm cannot define a bowl"
            ),
        }
    }
}

impl std::error::Error for BowlError {}

/// Triangle-strip mesh draping the panorama over the bowl surface.
///
/// Vertex positions are the surface points divided by the semi-axes,
/// so the rendered bowl fits a unit-scale scene regardless of the
/// physical rig size; texture coordinates are normalised to [0, 1];
/// indices run sequentially strip by strip.
#[derive(Debug, Clone, Default)]
pub struct BowlMesh {
    /// Vertex positions, divided by the ellipsoid semi-axes.
    pub vertices: Vec<[f32; 3]>,
    /// Panorama texture coordinates per vertex.
    pub texture_points: PointMap,
    /// Strip indices.
    pub indices: Vec<u32>,
}

/// Bowl projection model bound to a panorama of fixed size.
#[derive(Debug, Clone)]
pub struct BowlModel {
    config: BowlDataConfig,
    image_width: u32,
    image_height: u32,
    max_topview_length_mm: f32,
    max_topview_width_mm: f32,
}

impl BowlModel {
    /// Bind a bowl configuration to the stitched panorama size.
    pub fn new(
        config: BowlDataConfig,
        image_width: u32,
        image_height: u32,
    ) -> Result<Self, BowlError> {
        if config.center_z.abs() >= config.c {
            return Err(BowlError::CenterBeyondAxis {
                center_z: config.center_z,
                c: config.c,
            });
        }

        // Largest axis-aligned ground rectangle with all four corners on
        // the ellipsoid: x/a = y/b, hence the shared √(…/2) factor.
        let mid = ((1.0 - (config.center_z / config.c).powi(2)) / 2.0).sqrt();
        Ok(Self {
            config,
            image_width,
            image_height,
            max_topview_length_mm: 2.0 * mid * config.a,
            max_topview_width_mm: 2.0 * mid * config.b,
        })
    }

    /// The bound configuration.
    pub fn config(&self) -> &BowlDataConfig {
        &self.config
    }

    /// Largest top-view rectangle (length, width in millimetres) whose
    /// corners still project onto the ellipsoid.
    pub fn max_topview_area_mm(&self) -> (f32, f32) {
        (self.max_topview_length_mm, self.max_topview_width_mm)
    }

    /// Rows of the panorama covering the wall band.
    fn wall_image_height(&self) -> f32 {
        let cfg = &self.config;
        cfg.wall_height / (cfg.wall_height + cfg.ground_length) * self.image_height as f32
    }

    /// Map a panorama pixel onto the bowl surface (rig frame, mm).
    pub fn image_to_world(&self, img_pos: [f32; 2]) -> Vector3<f32> {
        let cfg = &self.config;
        let theta = (cfg.angle_start + img_pos[0] / self.image_width as f32 * cfg.angle_span())
            .to_radians();
        let wall_rows = self.wall_image_height();

        if img_pos[1] < wall_rows {
            // Wall band: row 0 is the wall top, z falls linearly to 0.
            let z = cfg.wall_height * (1.0 - img_pos[1] / wall_rows);
            let r = (1.0 - ((z - cfg.center_z) / cfg.c).powi(2)).max(0.0).sqrt();
            Vector3::new(
                cfg.a * r * theta.cos(),
                cfg.b * r * theta.sin(),
                z,
            )
        } else {
            // Ground band: semi-major shrinks linearly toward the rig.
            let ground_rows = self.image_height as f32 - wall_rows;
            let max_semimajor = cfg.a * cfg.ground_ellipse_scale();
            let semimajor =
                max_semimajor - (img_pos[1] - wall_rows) / ground_rows * cfg.ground_length;
            Vector3::new(
                semimajor * theta.cos(),
                semimajor * cfg.b / cfg.a * theta.sin(),
                0.0,
            )
        }
    }

    /// Map a point on (or near) the bowl surface back to panorama
    /// texture coordinates.
    ///
    /// Ground points radially outside the ground band clamp to its
    /// nearest ring; azimuths outside the configured span clamp into
    /// the column range. The result always lies inside the panorama.
    pub fn world_to_image(&self, world_pos: Vector3<f32>) -> [f32; 2] {
        let cfg = &self.config;
        let wall_rows = self.wall_image_height();
        let axis_ratio = cfg.a / cfg.b;

        let theta_deg = (world_pos.y * axis_ratio).atan2(world_pos.x).to_degrees();
        let mut norm_deg = format_angle(theta_deg - cfg.angle_start);
        // Float error at the wrap seam can turn an azimuth of 0° into
        // ~360°, which is the same column.
        if nearly_equal(norm_deg, 360.0, 1e-3) {
            norm_deg = 0.0;
        }
        let col = norm_deg / cfg.angle_span() * self.image_width as f32;

        let row = if world_pos.z > GROUND_Z_EPS {
            // Wall band.
            (cfg.wall_height - world_pos.z) / cfg.wall_height * wall_rows
        } else {
            let ground_rows = self.image_height as f32 - wall_rows;
            let max_semimajor = cfg.a * cfg.ground_ellipse_scale();
            let min_semimajor = (max_semimajor - cfg.ground_length).max(0.0);
            let semimajor = (world_pos.x * world_pos.x
                + world_pos.y * axis_ratio * world_pos.y * axis_ratio)
                .sqrt()
                .clamp(min_semimajor, max_semimajor);
            wall_rows + (max_semimajor - semimajor) / cfg.ground_length * ground_rows
        };

        [
            col.clamp(0.0, self.image_width as f32 - 1.0),
            row.clamp(0.0, self.image_height as f32 - 1.0),
        ]
    }

    /// Build the top-view lookup table: for each output pixel the
    /// panorama texture coordinate of the ground point underneath it.
    ///
    /// `length_mm`/`width_mm` of zero select the maximal supported
    /// rectangle. Fails when the requested rectangle has corners off
    /// the ellipsoid.
    pub fn topview_rect_map(
        &self,
        res_width: u32,
        res_height: u32,
        length_mm: f32,
        width_mm: f32,
    ) -> Result<PointMap, BowlError> {
        let cfg = &self.config;
        let (length_mm, width_mm) =
            if nearly_equal(length_mm, 0.0, ANGLE_EPS) || nearly_equal(width_mm, 0.0, ANGLE_EPS) {
                self.max_topview_area_mm()
            } else {
                (length_mm, width_mm)
            };

        let support = length_mm * length_mm / (cfg.a * cfg.a) / 4.0
            + width_mm * width_mm / (cfg.b * cfg.b) / 4.0
            + (cfg.center_z / cfg.c).powi(2);
        if support > 1.0 + AREA_SLACK {
            return Err(BowlError::AreaTooLarge {
                length_mm,
                width_mm,
                max_length_mm: self.max_topview_length_mm,
                max_width_mm: self.max_topview_width_mm,
            });
        }

        let center_col = res_width as f32 / 2.0;
        let center_row = res_height as f32 / 2.0;
        let mm_per_pixel_x = length_mm / res_width as f32;
        let mm_per_pixel_y = width_mm / res_height as f32;

        let mut points = PointMap::with_capacity((res_width * res_height) as usize);
        for row in 0..res_height {
            for col in 0..res_width {
                let world_pos = Vector3::new(
                    (col as f32 - center_col) * mm_per_pixel_x,
                    (center_row - row as f32) * mm_per_pixel_y,
                    0.0,
                );
                points.push(self.world_to_image(world_pos));
            }
        }
        Ok(points)
    }

    /// Mesh draping the whole panorama over the bowl, for bowl-view
    /// rendering.
    pub fn bowlview_vertex_model(&self, res_width: u32, res_height: u32) -> BowlMesh {
        self.vertex_model(res_width, res_height, self.image_height as f32)
    }

    /// Mesh draping only the ground band of the panorama, for top-view
    /// rendering with the wall left vertical.
    pub fn topview_vertex_model(&self, res_width: u32, res_height: u32) -> BowlMesh {
        let cfg = &self.config;
        let ground_rows = cfg.ground_length / (cfg.wall_height + cfg.ground_length)
            * self.image_height as f32;
        self.vertex_model(res_width, res_height, ground_rows)
    }

    /// Triangle-strip mesh over the bottom `vertex_height` rows of the
    /// panorama: `res_height` strips of `2·(res_width + 1)` vertices.
    fn vertex_model(&self, res_width: u32, res_height: u32, vertex_height: f32) -> BowlMesh {
        let cfg = &self.config;
        let vertex_count = (2 * (res_width + 1) * res_height) as usize;
        let mut mesh = BowlMesh {
            vertices: Vec::with_capacity(vertex_count),
            texture_points: Vec::with_capacity(vertex_count),
            indices: Vec::with_capacity(vertex_count),
        };

        let step_x = self.image_width as f32 / res_width as f32;
        let step_y = vertex_height / res_height as f32;
        let offset_y = self.image_height as f32 - vertex_height;

        let mut indicator = 0u32;
        for row in 0..res_height {
            let tex_y0 = row as f32 * step_y + offset_y;
            let tex_y1 = (row + 1) as f32 * step_y + offset_y;

            for col in 0..=res_width {
                let tex_x = col as f32 * step_x;
                for tex_y in [tex_y0, tex_y1] {
                    let world = self.image_to_world([tex_x, tex_y]);
                    mesh.vertices
                        .push([world.x / cfg.a, world.y / cfg.b, world.z / cfg.c]);
                    mesh.texture_points.push([
                        tex_x / self.image_width as f32,
                        tex_y / self.image_height as f32,
                    ]);
                    mesh.indices.push(indicator);
                    indicator += 1;
                }
            }
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn panorama_model() -> BowlModel {
        BowlModel::new(BowlDataConfig::default(), 1920, 640).expect("valid default config")
    }

    #[test]
    fn rejects_center_beyond_axis() {
        let cfg = BowlDataConfig {
            center_z: 3003.4,
            ..BowlDataConfig::default()
        };
        assert!(matches!(
            BowlModel::new(cfg, 1920, 640),
            Err(BowlError::CenterBeyondAxis { .. })
        ));
    }

    #[test]
    fn max_topview_area_of_a_sphere() {
        let cfg = BowlDataConfig {
            a: 1000.0,
            b: 1000.0,
            c: 1000.0,
            center_z: 0.0,
            ..BowlDataConfig::default()
        };
        let model = BowlModel::new(cfg, 1920, 640).unwrap();
        let (length, width) = model.max_topview_area_mm();
        assert_relative_eq!(length, 1000.0 * std::f32::consts::SQRT_2, max_relative = 1e-5);
        assert_relative_eq!(width, 1000.0 * std::f32::consts::SQRT_2, max_relative = 1e-5);
    }

    #[test]
    fn surface_roundtrip_within_a_pixel() {
        let model = panorama_model();
        let wall_rows = model.wall_image_height();

        let rows = [
            1.0,
            wall_rows * 0.5,
            wall_rows - 2.0,
            wall_rows + 1.0,
            (wall_rows + 639.0) * 0.5,
            639.0,
        ];
        for &row in &rows {
            for col in (0..1920).step_by(160) {
                let pixel = [col as f32, row];
                let back = model.world_to_image(model.image_to_world(pixel));
                assert_abs_diff_eq!(back[0], pixel[0], epsilon = 0.5);
                assert_abs_diff_eq!(back[1], pixel[1], epsilon = 0.5);
            }
        }
    }

    #[test]
    fn wall_and_ground_meet_at_the_same_ring() {
        let model = panorama_model();
        let wall_rows = model.wall_image_height();

        // One row either side of the seam lands on nearly the same
        // radius: the wall foot and the ground band's outer ring.
        let foot = model.image_to_world([300.0, wall_rows - 0.01]);
        let rim = model.image_to_world([300.0, wall_rows + 0.01]);
        assert_abs_diff_eq!(foot.x, rim.x, epsilon = 2.0);
        assert_abs_diff_eq!(foot.y, rim.y, epsilon = 2.0);
        assert!(foot.z >= 0.0 && foot.z < 2.0);
    }

    #[test]
    fn topview_map_stays_inside_the_panorama() {
        let cfg = BowlDataConfig {
            a: 1000.0,
            b: 1000.0,
            c: 1000.0,
            center_z: 0.0,
            ..BowlDataConfig::default()
        };
        let model = BowlModel::new(cfg, 1920, 640).unwrap();
        let (length, width) = model.max_topview_area_mm();
        let map = model.topview_rect_map(512, 512, length, width).unwrap();

        assert_eq!(map.len(), 512 * 512);
        for point in &map {
            assert!(point[0] >= 0.0 && point[0] < 1920.0, "x {}", point[0]);
            assert!(point[1] >= 0.0 && point[1] < 640.0, "y {}", point[1]);
        }
    }

    #[test]
    fn topview_map_defaults_to_max_area() {
        let model = panorama_model();
        let defaulted = model.topview_rect_map(64, 64, 0.0, 0.0).unwrap();
        let (length, width) = model.max_topview_area_mm();
        let explicit = model.topview_rect_map(64, 64, length, width).unwrap();
        assert_eq!(defaulted, explicit);
    }

    #[test]
    fn oversized_topview_is_rejected() {
        let model = panorama_model();
        let (length, width) = model.max_topview_area_mm();
        let res = model.topview_rect_map(64, 64, length * 1.05, width);
        assert!(matches!(res, Err(BowlError::AreaTooLarge { .. })));
    }

    #[test]
    fn vertex_model_counts_and_ranges() {
        let model = panorama_model();
        let mesh = model.bowlview_vertex_model(16, 8);

        assert_eq!(mesh.vertices.len(), 2 * 17 * 8);
        assert_eq!(mesh.texture_points.len(), mesh.vertices.len());
        assert_eq!(mesh.indices.len(), mesh.vertices.len());
        assert_eq!(mesh.indices[0], 0);
        assert_eq!(*mesh.indices.last().unwrap() as usize, mesh.vertices.len() - 1);

        for tex in &mesh.texture_points {
            assert!(tex[0] >= 0.0 && tex[0] <= 1.0);
            assert!(tex[1] >= 0.0 && tex[1] <= 1.0);
        }
        // The horizontal footprint stays inside the scaled ellipse and
        // the height inside the wall band.
        let cfg = model.config();
        let max_z = cfg.wall_height / cfg.c;
        for v in &mesh.vertices {
            assert!(v[0].abs() <= 1.01 && v[1].abs() <= 1.01, "footprint {v:?}");
            assert!(v[2] >= -1e-3 && v[2] <= max_z + 1e-3, "height {v:?}");
        }
    }

    #[test]
    fn topview_mesh_spans_only_the_ground_band() {
        let model = panorama_model();
        let mesh = model.topview_vertex_model(8, 4);
        let cfg = model.config();
        let ground_start = cfg.wall_height / (cfg.wall_height + cfg.ground_length);

        for tex in &mesh.texture_points {
            assert!(
                tex[1] >= ground_start - 1e-3,
                "texture row {} above the ground band start {}",
                tex[1],
                ground_start
            );
        }
        // Ground-band vertices lie in the ground plane.
        for v in &mesh.vertices {
            assert_abs_diff_eq!(v[2], 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn bowl_from_camera_positions_matches_the_rig() {
        let positions = [
            Vector3::new(1200.0, 0.0, 225.0),
            Vector3::new(0.0, -800.0, 225.0),
            Vector3::new(-1200.0, 0.0, 225.0),
            Vector3::new(0.0, 800.0, 225.0),
        ];
        let bowl = BowlDataConfig::from_camera_positions(&positions, 300.0, 208.0).unwrap();

        let r = 0.75f32.sqrt();
        assert_relative_eq!(bowl.center_z, 225.0);
        assert_relative_eq!(bowl.c, 450.0);
        assert_relative_eq!(bowl.wall_height, 450.0);
        assert_relative_eq!(
            bowl.a,
            3000.0 / (std::f32::consts::SQRT_2 * r),
            max_relative = 1e-5
        );
        assert_relative_eq!(
            bowl.b,
            2016.0 / (std::f32::consts::SQRT_2 * r),
            max_relative = 1e-5
        );
        assert_relative_eq!(bowl.ground_length, r * bowl.b - 800.0, max_relative = 1e-5);

        // The derived bowl must be a valid model and its maximal top
        // view must cover the requested scope.
        let model = BowlModel::new(bowl, 1920, 640).unwrap();
        let (length, width) = model.max_topview_area_mm();
        assert!(length >= 2.0 * (1200.0 + 300.0) - 1.0);
        assert!(width >= 2.0 * (800.0 + 208.0) - 1.0);
    }

    #[test]
    fn empty_and_flat_rigs_are_rejected() {
        assert!(matches!(
            BowlDataConfig::from_camera_positions(&[], 0.0, 0.0),
            Err(BowlError::EmptyRig)
        ));
        let flat = [Vector3::new(1.0, 0.0, 0.0)];
        assert!(matches!(
            BowlDataConfig::from_camera_positions(&flat, 0.0, 0.0),
            Err(BowlError::FlatRig { .. })
        ));
    }
}
