//! Math types and culling helpers.
//!
//! Rendering math is `glam` f32 throughout. Projections follow the Vulkan
//! clip-space convention: right-handed view space, depth in `[0, 1]`.

pub use glam::{Mat3, Mat4, Quat, UVec2, Vec2, Vec3, Vec4};

/// A plane `normal · p + distance = 0`, normal pointing inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    /// Build a normalized plane from raw `(a, b, c, d)` coefficients.
    pub fn from_vec4(v: Vec4) -> Self {
        let normal = v.truncate();
        let length = normal.length();
        if length > f32::EPSILON {
            Self {
                normal: normal / length,
                distance: v.w / length,
            }
        } else {
            Self {
                normal: Vec3::Y,
                distance: 0.0,
            }
        }
    }

    /// Signed distance, positive on the inner side.
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Six clip planes: left, right, bottom, top, near, far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract the planes of a view-projection matrix (Gribb-Hartmann).
    ///
    /// The near plane is `row2` alone because clip depth starts at 0.
    pub fn from_view_proj(view_proj: Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        Self {
            planes: [
                Plane::from_vec4(r3 + r0),
                Plane::from_vec4(r3 - r0),
                Plane::from_vec4(r3 + r1),
                Plane::from_vec4(r3 - r1),
                Plane::from_vec4(r2),
                Plane::from_vec4(r3 - r2),
            ],
        }
    }

    /// True unless the sphere lies entirely outside one plane.
    ///
    /// Spheres straddling a plane count as visible.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -radius)
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.intersects_sphere(point, 0.0)
    }
}

/// Largest axis scale of an affine transform.
///
/// Bounding spheres are scaled by this so non-uniform scale never culls a
/// visible instance.
pub fn max_axis_scale(matrix: &Mat4) -> f32 {
    let (scale, _, _) = matrix.to_scale_rotation_translation();
    scale.abs().max_element()
}

/// World-space bounding sphere of an instance: the transformed origin and
/// the model radius scaled by [`max_axis_scale`].
pub fn instance_sphere(matrix: &Mat4, radius: f32) -> (Vec3, f32) {
    (matrix.w_axis.truncate(), radius * max_axis_scale(matrix))
}

/// A rectangle in normalized `[0, 1]` coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scale into pixel space for a target extent.
    pub fn to_pixels(&self, extent: UVec2) -> (Vec2, Vec2) {
        let size = extent.as_vec2();
        (
            Vec2::new(self.x * size.x, self.y * size.y),
            Vec2::new(self.width * size.x, self.height * size.y),
        )
    }

    pub fn as_vec4(&self) -> Vec4 {
        Vec4::new(self.x, self.y, self.width, self.height)
    }
}

impl Default for Rect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Perspective projection with Vulkan depth range.
pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh(fov_y, aspect.max(f32::EPSILON), near, far)
}

/// World-space corners of the clip volume of `view_proj`.
pub fn frustum_corners(view_proj: Mat4) -> [Vec3; 8] {
    let inverse = view_proj.inverse();
    let mut corners = [Vec3::ZERO; 8];
    let mut i = 0;
    for z in [0.0, 1.0] {
        for y in [-1.0, 1.0] {
            for x in [-1.0, 1.0] {
                corners[i] = inverse.project_point3(Vec3::new(x, y, z));
                i += 1;
            }
        }
    }
    corners
}

/// View matrices for the six faces of a cube map at `position`,
/// ordered +X, -X, +Y, -Y, +Z, -Z.
pub fn cube_face_views(position: Vec3) -> [Mat4; 6] {
    const FACES: [(Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::NEG_Y),
        (Vec3::NEG_X, Vec3::NEG_Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::NEG_Z),
        (Vec3::Z, Vec3::NEG_Y),
        (Vec3::NEG_Z, Vec3::NEG_Y),
    ];
    FACES.map(|(dir, up)| Mat4::look_to_rh(position, dir, up))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn test_frustum() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let proj = perspective(90f32.to_radians(), 1.0, 0.1, 100.0);
        Frustum::from_view_proj(proj * view)
    }

    #[rstest]
    #[case::in_front(Vec3::new(0.0, 0.0, -10.0), 1.0, true)]
    #[case::behind_camera(Vec3::new(0.0, 0.0, 10.0), 1.0, false)]
    #[case::past_far(Vec3::new(0.0, 0.0, -200.0), 5.0, false)]
    #[case::far_left(Vec3::new(-50.0, 0.0, -10.0), 1.0, false)]
    #[case::straddles_left(Vec3::new(-10.5, 0.0, -10.0), 1.0, true)]
    #[case::straddles_near(Vec3::new(0.0, 0.0, 0.5), 1.0, true)]
    fn test_sphere_culling(#[case] center: Vec3, #[case] radius: f32, #[case] visible: bool) {
        assert_eq!(test_frustum().intersects_sphere(center, radius), visible);
    }

    #[test]
    fn test_near_plane_at_zero_depth() {
        let frustum = test_frustum();
        // Just inside the near plane at z = -0.1.
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -0.11)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -0.09)));
    }

    #[test]
    fn test_max_axis_scale_nonuniform() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, 4.0, 2.0),
            Quat::from_rotation_y(0.7),
            Vec3::new(3.0, 0.0, 0.0),
        );
        assert!((max_axis_scale(&m) - 4.0).abs() < 1e-4);

        let (center, radius) = instance_sphere(&m, 0.5);
        assert_eq!(center, Vec3::new(3.0, 0.0, 0.0));
        assert!((radius - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_rect_to_pixels() {
        let rect = Rect::new(0.5, 0.0, 0.5, 1.0);
        let (offset, size) = rect.to_pixels(UVec2::new(800, 600));
        assert_eq!(offset, Vec2::new(400.0, 0.0));
        assert_eq!(size, Vec2::new(400.0, 600.0));
    }

    #[test]
    fn test_frustum_corners_span_depth() {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let proj = perspective(60f32.to_radians(), 1.0, 1.0, 10.0);
        let corners = frustum_corners(proj * view);
        assert!((corners[0].z + 1.0).abs() < 1e-3);
        assert!((corners[7].z + 10.0).abs() < 1e-2);
    }
}
