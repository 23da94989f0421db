//! Camera buffers and the camera/time uniforms.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec4};
use umbra_core::math::{self, Rect};

use crate::scene::TransformId;
use crate::types::RenderLayers;

use super::{ProgramHandle, RenderTextureHandle};

/// A camera and the render targets its passes write.
///
/// The G-buffer receives opaque geometry, the light target accumulates
/// lighting and forward geometry, and post-processing writes the output
/// (the presentation target when null).
#[derive(Debug, Clone, PartialEq)]
pub struct CameraBuffer {
    pub transform: TransformId,
    /// Normalized viewport rectangle inside the target.
    pub rect: Rect,
    pub near: f32,
    pub far: f32,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub render_layers: RenderLayers,
    pub gbuffer: RenderTextureHandle,
    pub light_target: RenderTextureHandle,
    pub output: RenderTextureHandle,
    /// Ping-pong target for chains of more than one post program.
    pub post_scratch: RenderTextureHandle,
    pub clear_color: [f32; 4],
    pub post_programs: Vec<ProgramHandle>,
    pub active: bool,
}

impl Default for CameraBuffer {
    fn default() -> Self {
        Self {
            transform: TransformId::NULL,
            rect: Rect::FULL,
            near: 0.1,
            far: 1000.0,
            fov_y: 60f32.to_radians(),
            render_layers: RenderLayers::ALL,
            gbuffer: RenderTextureHandle::NULL,
            light_target: RenderTextureHandle::NULL,
            output: RenderTextureHandle::NULL,
            post_scratch: RenderTextureHandle::NULL,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            post_programs: Vec::new(),
            active: true,
        }
    }
}

impl CameraBuffer {
    /// Whether the camera takes part in the frame.
    pub fn is_renderable(&self) -> bool {
        self.active && !self.transform.is_null()
    }

    pub fn projection(&self, extent: UVec2) -> Mat4 {
        let (_, size) = self.rect.to_pixels(extent);
        math::perspective(self.fov_y, size.x / size.y.max(1.0), self.near, self.far)
    }

    /// Uniform contents for a camera at `world` rendering into `extent`.
    pub fn uniform(&self, world: &Mat4, extent: UVec2, time: f32) -> CameraUniform {
        let view = world.inverse();
        let projection = self.projection(extent);
        let view_projection = projection * view;
        let (offset, size) = self.rect.to_pixels(extent);
        CameraUniform {
            view,
            projection,
            view_projection,
            inverse_view_projection: view_projection.inverse(),
            position: world.w_axis,
            viewport: Vec4::new(offset.x, offset.y, size.x, size.y),
            near_far_time: Vec4::new(self.near, self.far, time, 0.0),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub inverse_view_projection: Mat4,
    pub position: Vec4,
    /// Pixel offset and size.
    pub viewport: Vec4,
    pub near_far_time: Vec4,
}

impl CameraUniform {
    /// Camera at an explicit view, such as a light rendering a shadow map.
    pub fn from_view(view: Mat4, projection: Mat4, extent: UVec2, time: f32) -> Self {
        let view_projection = projection * view;
        let size = extent.as_vec2();
        Self {
            view,
            projection,
            view_projection,
            inverse_view_projection: view_projection.inverse(),
            position: view.inverse().w_axis,
            viewport: Vec4::new(0.0, 0.0, size.x, size.y),
            near_far_time: Vec4::new(0.0, 1.0, time, 0.0),
        }
    }

    /// Camera for full-screen work: identity matrices over the whole target.
    pub fn screen(extent: UVec2, time: f32) -> Self {
        let size = extent.as_vec2();
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            inverse_view_projection: Mat4::IDENTITY,
            position: Vec4::W,
            viewport: Vec4::new(0.0, 0.0, size.x, size.y),
            near_far_time: Vec4::new(0.0, 1.0, time, 0.0),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TimeUniform {
    pub time: f32,
    pub delta: f32,
    pub frame: u32,
    pub _padding: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<CameraUniform>(), 304);
static_assertions::const_assert_eq!(std::mem::size_of::<TimeUniform>(), 16);

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn test_camera_needs_transform_and_active() {
        let mut camera = CameraBuffer::default();
        assert!(!camera.is_renderable());
        camera.transform = TransformId(3);
        assert!(camera.is_renderable());
        camera.active = false;
        assert!(!camera.is_renderable());
    }

    #[test]
    fn test_uniform_viewport_from_rect() {
        let camera = CameraBuffer {
            transform: TransformId(0),
            rect: Rect::new(0.5, 0.0, 0.5, 1.0),
            ..Default::default()
        };
        let world = Mat4::from_translation(Vec3::new(0.0, 2.0, 5.0));
        let uniform = camera.uniform(&world, UVec2::new(800, 600), 1.5);
        assert_eq!(uniform.viewport, Vec4::new(400.0, 0.0, 400.0, 600.0));
        assert_eq!(uniform.position, Vec4::new(0.0, 2.0, 5.0, 1.0));
        assert_eq!(uniform.near_far_time.z, 1.5);
        assert!(
            uniform
                .view
                .transform_point3(Vec3::new(0.0, 2.0, 5.0))
                .abs_diff_eq(Vec3::ZERO, 1e-5)
        );
    }
}
