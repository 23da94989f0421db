//! Light buffers and their GPU uniform layouts.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::config::MAX_SHADOW_SPLITS;
use crate::scene::TransformId;
use crate::types::RenderLayers;

use super::RenderTextureHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
    pub render_layers: RenderLayers,
    pub active: bool,
}

impl Default for AmbientLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 0.1,
            render_layers: RenderLayers::ALL,
            active: true,
        }
    }
}

impl AmbientLight {
    pub fn uniform(&self) -> AmbientLightUniform {
        AmbientLightUniform {
            color: self.color.extend(self.intensity),
        }
    }
}

/// Sun-like light shining along its transform's forward (-Z) axis.
///
/// Each shadow map is one cascade split of the camera frustum.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    pub transform: TransformId,
    pub color: Vec3,
    pub intensity: f32,
    pub render_layers: RenderLayers,
    pub shadow_maps: Vec<RenderTextureHandle>,
    /// Camera distance covered by the cascades.
    pub shadow_distance: f32,
    pub active: bool,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            transform: TransformId::NULL,
            color: Vec3::ONE,
            intensity: 1.0,
            render_layers: RenderLayers::ALL,
            shadow_maps: Vec::new(),
            shadow_distance: 100.0,
            active: true,
        }
    }
}

/// Omnidirectional light. A shadow map must reference a cube depth texture.
#[derive(Debug, Clone, PartialEq)]
pub struct PointLight {
    pub transform: TransformId,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    pub render_layers: RenderLayers,
    pub shadow_maps: Vec<RenderTextureHandle>,
    pub active: bool,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            transform: TransformId::NULL,
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 10.0,
            render_layers: RenderLayers::ALL,
            shadow_maps: Vec::new(),
            active: true,
        }
    }
}

/// Cone light along its transform's forward axis. Angles are half-angles in
/// radians.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotLight {
    pub transform: TransformId,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
    pub inner_angle: f32,
    pub outer_angle: f32,
    pub render_layers: RenderLayers,
    pub shadow_maps: Vec<RenderTextureHandle>,
    pub active: bool,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            transform: TransformId::NULL,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
            inner_angle: 0.3,
            outer_angle: 0.5,
            render_layers: RenderLayers::ALL,
            shadow_maps: Vec::new(),
            active: true,
        }
    }
}

/// Near plane of point and spot shadow projections.
pub const SHADOW_NEAR: f32 = 0.05;

/// Weight of the logarithmic split scheme against the uniform one.
const CASCADE_LAMBDA: f32 = 0.5;

/// One directional shadow split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cascade {
    pub view: Mat4,
    pub projection: Mat4,
    /// Camera distance where the split ends.
    pub far: f32,
}

impl Cascade {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// The camera slice a set of cascades covers.
#[derive(Debug, Clone, Copy)]
pub struct CascadeCamera {
    pub world: Mat4,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl DirectionalLight {
    /// Split the camera frustum into one orthographic cascade per shadow
    /// map. Each cascade is a bounding sphere of its slice, so the shadow
    /// projection does not change size as the camera rotates.
    pub fn cascades(&self, light_world: &Mat4, camera: &CascadeCamera) -> Vec<Cascade> {
        let count = self.shadow_maps.len().min(MAX_SHADOW_SPLITS as usize);
        if count == 0 {
            return Vec::new();
        }
        let near = camera.near.max(f32::EPSILON);
        let far = camera.far.min(self.shadow_distance).max(near * 2.0);
        let direction = forward_axis(light_world);
        let up = if direction.abs().dot(Vec3::Y) > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let camera_view = camera.world.inverse();

        let mut split_near = near;
        (1..=count)
            .map(|i| {
                let t = i as f32 / count as f32;
                let logarithmic = near * (far / near).powf(t);
                let uniform = near + (far - near) * t;
                let split_far = CASCADE_LAMBDA * logarithmic + (1.0 - CASCADE_LAMBDA) * uniform;

                let slice = umbra_core::math::perspective(
                    camera.fov_y,
                    camera.aspect,
                    split_near,
                    split_far,
                ) * camera_view;
                let corners = umbra_core::math::frustum_corners(slice);
                let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
                let radius = corners
                    .iter()
                    .map(|corner| corner.distance(center))
                    .fold(f32::EPSILON, f32::max);
                split_near = split_far;

                Cascade {
                    view: Mat4::look_to_rh(center - direction * radius * 2.0, direction, up),
                    projection: Mat4::orthographic_rh(
                        -radius,
                        radius,
                        -radius,
                        radius,
                        0.0,
                        radius * 4.0,
                    ),
                    far: split_far,
                }
            })
            .collect()
    }

    pub fn uniform(&self, light_world: &Mat4, cascades: &[Cascade]) -> DirectionalLightUniform {
        let mut uniform = DirectionalLightUniform::zeroed();
        uniform.direction = forward_axis(light_world).extend(0.0);
        uniform.color = self.color.extend(self.intensity);
        for (i, cascade) in cascades.iter().take(MAX_SHADOW_SPLITS as usize).enumerate() {
            uniform.shadow_view_projs[i] = cascade.view_projection();
            uniform.split_distances[i] = cascade.far;
        }
        uniform.shadow_count = cascades.len().min(MAX_SHADOW_SPLITS as usize) as u32;
        uniform
    }
}

impl PointLight {
    pub fn uniform(&self, light_world: &Mat4, has_shadow: bool) -> PointLightUniform {
        PointLightUniform {
            position: light_world.w_axis.truncate().extend(self.radius),
            color: self.color.extend(self.intensity),
            shadow: Vec4::new(
                if has_shadow { 1.0 } else { 0.0 },
                SHADOW_NEAR,
                self.radius.max(SHADOW_NEAR * 2.0),
                0.0,
            ),
        }
    }

    /// Projection shared by the six cube faces.
    pub fn shadow_projection(&self) -> Mat4 {
        umbra_core::math::perspective(
            std::f32::consts::FRAC_PI_2,
            1.0,
            SHADOW_NEAR,
            self.radius.max(SHADOW_NEAR * 2.0),
        )
    }
}

impl SpotLight {
    /// Light-space view and projection for the spot shadow map.
    pub fn shadow_view(&self, world: &Mat4) -> (Mat4, Mat4) {
        let position = world.w_axis.truncate();
        let forward = forward_axis(world);
        let up = if forward.abs().dot(Vec3::Y) > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_to_rh(position, forward, up);
        let projection = umbra_core::math::perspective(
            self.outer_angle * 2.0,
            1.0,
            SHADOW_NEAR,
            self.range.max(SHADOW_NEAR * 2.0),
        );
        (view, projection)
    }

    pub fn shadow_view_proj(&self, world: &Mat4) -> Mat4 {
        let (view, projection) = self.shadow_view(world);
        projection * view
    }

    pub fn uniform(&self, world: &Mat4, has_shadow: bool) -> SpotLightUniform {
        SpotLightUniform {
            position: world.w_axis.truncate().extend(self.range),
            direction: forward_axis(world).extend(self.outer_angle.cos()),
            color: self.color.extend(self.intensity),
            params: Vec4::new(
                self.inner_angle.cos(),
                if has_shadow { 1.0 } else { 0.0 },
                0.0,
                0.0,
            ),
            shadow_view_proj: self.shadow_view_proj(world),
        }
    }
}

/// Normalized -Z axis of a transform.
pub fn forward_axis(world: &Mat4) -> Vec3 {
    (-world.z_axis.truncate()).normalize_or(Vec3::NEG_Z)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct AmbientLightUniform {
    /// RGB color, intensity in w.
    pub color: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DirectionalLightUniform {
    pub direction: Vec4,
    pub color: Vec4,
    pub shadow_view_projs: [Mat4; MAX_SHADOW_SPLITS as usize],
    /// Far distance of each cascade.
    pub split_distances: [f32; MAX_SHADOW_SPLITS as usize],
    pub shadow_count: u32,
    pub _padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PointLightUniform {
    /// World position, radius in w.
    pub position: Vec4,
    pub color: Vec4,
    /// x: has shadow, y: shadow near, z: shadow far.
    pub shadow: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SpotLightUniform {
    /// World position, range in w.
    pub position: Vec4,
    /// Forward direction, cosine of the outer angle in w.
    pub direction: Vec4,
    pub color: Vec4,
    /// x: cosine of the inner angle, y: has shadow.
    pub params: Vec4,
    pub shadow_view_proj: Mat4,
}

static_assertions::const_assert_eq!(std::mem::size_of::<AmbientLightUniform>() % 16, 0);
static_assertions::const_assert_eq!(std::mem::size_of::<DirectionalLightUniform>() % 16, 0);
static_assertions::const_assert_eq!(std::mem::size_of::<PointLightUniform>() % 16, 0);
static_assertions::const_assert_eq!(std::mem::size_of::<SpotLightUniform>() % 16, 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_axis_is_negative_z() {
        assert!(forward_axis(&Mat4::IDENTITY).abs_diff_eq(Vec3::NEG_Z, 1e-6));
    }

    #[test]
    fn test_spot_shadow_sees_along_forward() {
        let light = SpotLight::default();
        let world = Mat4::IDENTITY;
        let view_proj = light.shadow_view_proj(&world);
        let frustum = umbra_core::math::Frustum::from_view_proj(view_proj);
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -5.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 5.0)));
    }

    #[test]
    fn test_cascades_cover_increasing_distances() {
        let light = DirectionalLight {
            shadow_maps: vec![RenderTextureHandle::from_raw(0); 3],
            shadow_distance: 50.0,
            ..Default::default()
        };
        let camera = CascadeCamera {
            world: Mat4::IDENTITY,
            fov_y: 1.0,
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
        };
        let sun = Mat4::from_rotation_x(-1.0);
        let cascades = light.cascades(&sun, &camera);

        assert_eq!(cascades.len(), 3);
        assert!(cascades.windows(2).all(|pair| pair[0].far < pair[1].far));
        assert!((cascades[2].far - 50.0).abs() < 1e-3);

        // A point in the middle of the first slice lands inside its cascade.
        let point = Vec3::new(0.0, 0.0, -cascades[0].far * 0.5);
        let frustum = umbra_core::math::Frustum::from_view_proj(cascades[0].view_projection());
        assert!(frustum.contains_point(point));

        let uniform = light.uniform(&sun, &cascades);
        assert_eq!(uniform.shadow_count, 3);
        assert_eq!(uniform.split_distances[1], cascades[1].far);
    }

    #[test]
    fn test_no_shadow_maps_no_cascades() {
        let camera = CascadeCamera {
            world: Mat4::IDENTITY,
            fov_y: 1.0,
            aspect: 1.0,
            near: 0.1,
            far: 100.0,
        };
        let light = DirectionalLight::default();
        assert!(light.cascades(&Mat4::IDENTITY, &camera).is_empty());
        assert_eq!(light.uniform(&Mat4::IDENTITY, &[]).shadow_count, 0);
    }

    #[test]
    fn test_ambient_uniform_packs_intensity() {
        let light = AmbientLight {
            intensity: 0.5,
            ..Default::default()
        };
        assert_eq!(light.uniform().color.w, 0.5);
    }
}
