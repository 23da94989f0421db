//! Common utilities for renderer integration tests.
//!
//! Every test builds its renderer on a [`DummyBackend`] so recorded commands
//! and object lifetimes can be inspected without a GPU.

#![allow(dead_code)]

use std::sync::Arc;

use glam::{Mat4, Vec3};

use umbra_graphics::resources::{
    CameraBuffer, CameraHandle, MeshRenderBuffer, MeshRendererHandle, ModelHandle, ProgramHandle,
    RenderTextureHandle, ShaderBufferInput, ShaderHandle, ShaderInputUsage,
};
use umbra_graphics::types::{TextureFormat, VertexLayout};
use umbra_graphics::{
    DummyBackend, HookRegistry, RenderProgramDesc, RenderTextureDepth, Renderer, RendererConfig,
    SceneInterfaces, TransformId, TransformStore,
};

/// Smallest module the dummy backend accepts.
pub const SPIRV: &[u32] = &[0x0723_0203];

pub const CAMERA_TRANSFORM: TransformId = TransformId(0);

/// Size of every render target created by the helpers.
pub const TARGET_SIZE: u32 = 64;

/// Unit quad in the XY plane: 4 `float3` positions and 6 indices.
pub const QUAD_POSITIONS: [[f32; 3]; 4] = [
    [-1.0, -1.0, 0.0],
    [1.0, -1.0, 0.0],
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
];
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A renderer with direct access to its backend and transforms.
pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub transforms: Arc<TransformStore>,
    pub renderer: Renderer,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(test_config(), HookRegistry::new())
    }

    pub fn with_config(config: RendererConfig, hooks: HookRegistry) -> Self {
        Self::with_scene(config, hooks, |scene| scene)
    }

    /// Build with extra collaborators layered on the default scene.
    pub fn with_scene(
        config: RendererConfig,
        hooks: HookRegistry,
        scene: impl FnOnce(SceneInterfaces) -> SceneInterfaces,
    ) -> Self {
        init_logging();
        let backend = Arc::new(DummyBackend::new());
        let transforms = Arc::new(TransformStore::new());
        let renderer = Renderer::new(
            backend.clone(),
            config,
            scene(SceneInterfaces::new(transforms.clone())),
            hooks,
        )
        .expect("Failed to create renderer");
        Self {
            backend,
            transforms,
            renderer,
        }
    }

    pub fn vertex_shader(&self, inputs: Vec<ShaderBufferInput>) -> ShaderHandle {
        self.renderer
            .generate_vertex_shader(SPIRV, inputs)
            .expect("Failed to create vertex shader")
    }

    pub fn pixel_shader(&self, inputs: Vec<ShaderBufferInput>) -> ShaderHandle {
        self.renderer
            .generate_pixel_shader(SPIRV, inputs)
            .expect("Failed to create pixel shader")
    }

    /// Opaque mesh program reading the camera and a model matrix.
    pub fn mesh_program(&self) -> ProgramHandle {
        let vs = self.vertex_shader(vec![
            ShaderBufferInput::new(ShaderInputUsage::Camera, 0),
            ShaderBufferInput::push_constant(ShaderInputUsage::Transform),
        ]);
        let ps = self.pixel_shader(Vec::new());
        let mut desc = RenderProgramDesc::new(vs, ps);
        desc.vertex_layout = VertexLayout::Position;
        self.renderer
            .generate_render_program(desc)
            .expect("Failed to create mesh program")
    }

    /// Full-screen program without vertex input.
    pub fn screen_program(&self, pixel_inputs: Vec<ShaderBufferInput>) -> ProgramHandle {
        let vs = self.vertex_shader(Vec::new());
        let ps = self.pixel_shader(pixel_inputs);
        self.renderer
            .generate_render_program(RenderProgramDesc::new(vs, ps))
            .expect("Failed to create screen program")
    }

    pub fn quad_model(&self) -> ModelHandle {
        self.renderer
            .generate_model(
                bytemuck::cast_slice(&QUAD_POSITIONS),
                &QUAD_INDICES,
                12,
                None,
            )
            .expect("Failed to create model")
    }

    pub fn color_target(&self, depth: bool) -> RenderTextureHandle {
        let depth = if depth {
            RenderTextureDepth::Owned(TextureFormat::Depth32Float)
        } else {
            RenderTextureDepth::None
        };
        self.renderer
            .generate_render_texture(TARGET_SIZE, TARGET_SIZE, &[TextureFormat::Rgba8Unorm], depth)
            .expect("Failed to create render texture")
    }

    /// Depth-only render texture, usable as a shadow map.
    pub fn shadow_target(&self, depth: RenderTextureDepth) -> RenderTextureHandle {
        self.renderer
            .generate_render_texture(TARGET_SIZE, TARGET_SIZE, &[], depth)
            .expect("Failed to create shadow map")
    }

    /// Camera at `(0, 0, 5)` looking down -Z, with its own G-buffer and
    /// light target.
    pub fn camera(&self) -> CameraHandle {
        self.transforms.set(
            CAMERA_TRANSFORM,
            Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)),
        );
        let camera = CameraBuffer {
            transform: CAMERA_TRANSFORM,
            gbuffer: self.color_target(true),
            light_target: self.color_target(false),
            ..Default::default()
        };
        self.renderer.generate_camera_buffer(camera)
    }

    /// Attached mesh renderer placed at `position`.
    pub fn mesh(
        &self,
        program: ProgramHandle,
        model: ModelHandle,
        transform: TransformId,
        position: Vec3,
    ) -> MeshRendererHandle {
        self.transforms
            .set(transform, Mat4::from_translation(position));
        let handle = self
            .renderer
            .generate_mesh_render_buffer(MeshRenderBuffer::new(program, model, transform))
            .expect("Failed to create mesh renderer");
        self.renderer
            .generate_render_stack(handle)
            .expect("Failed to attach mesh renderer");
        handle
    }
}

/// Small, deterministic configuration for tests.
pub fn test_config() -> RendererConfig {
    RendererConfig::default()
        .with_flight_frames(3)
        .with_worker_threads(2)
}
