//! Renderer integration tests.
//!
//! These tests drive a full [`Renderer`](umbra_graphics::Renderer) on the
//! dummy backend and inspect the command buffers it records.
//!
//! # Test Categories
//!
//! - **Frame Tests**: pass count, ordering and draw contents of a frame
//! - **Shadow Tests**: cascades, cube faces and spot maps
//! - **Lifetime Tests**: handle validity, deferred deletion and shutdown
//! - **Cache Tests**: pipeline eviction when programs or targets go away
//!
//! ```bash
//! cargo test -p umbra-graphics --test renderer_tests
//! ```

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use glam::{Mat4, Vec3, Vec4};
use rstest::rstest;
use umbra_core::math::Rect;

use common::{QUAD_INDICES, TestContext, test_config};
use umbra_graphics::backend::RecordedCommand;
use umbra_graphics::resources::{
    AmbientLight, CanvasRenderer, DirectionalLight, MeshRenderBuffer, Particle, ParticleEmitter,
    PointLight, ShaderBufferInput, ShaderInputUsage, SkinnedMeshRenderBuffer, SpotLight,
    TextureData,
};
use umbra_graphics::scene::{
    Bone, CanvasId, Skeleton, SkeletonId, SkeletonProvider, UiElement, UiTree, VideoFrame,
    VideoFrameSource,
};
use umbra_graphics::types::{BlendMode, ProgramFlags, TextureFormat, VertexLayout};
use umbra_graphics::{
    CommandLabel, FrameCommandBuffer, GraphicsError, HookBinding, HookRegistry, LightPrograms,
    PassKind, PipelineVariant, RenderProgramDesc, RenderTextureDepth, TransformId, pipeline_key,
};

/// `(depth attachment, layer)` of every rendering the buffer begins.
fn renderings(entry: &FrameCommandBuffer) -> Vec<(Option<u64>, Option<u32>)> {
    entry
        .buffer
        .recorded()
        .into_iter()
        .filter_map(|command| match command {
            RecordedCommand::BeginRendering {
                depth_attachment,
                layer,
                ..
            } => Some((depth_attachment, layer)),
            _ => None,
        })
        .collect()
}

fn indexed_quad(instance_count: u32) -> RecordedCommand {
    RecordedCommand::DrawIndexed {
        index_count: QUAD_INDICES.len() as u32,
        instance_count,
    }
}

// ============================================================================
// Frame Tests
// ============================================================================

/// One camera, one opaque mesh and one directional light without shadow
/// maps record exactly the seven camera passes, and only the draw pass
/// draws the mesh.
#[test]
fn test_single_camera_frame() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.mesh(program, model, TransformId(1), Vec3::ZERO);
    ctx.renderer
        .generate_directional_light(DirectionalLight {
            transform: TransformId(2),
            ..Default::default()
        });
    ctx.transforms.set(TransformId(2), glam::Mat4::IDENTITY);

    let output = ctx.renderer.update(0.016, 1.0, 0).unwrap();
    assert_eq!(output.len(), 7);

    let labels: Vec<CommandLabel> = output.entries.iter().map(|entry| entry.label).collect();
    let expected: Vec<CommandLabel> = PassKind::ALL
        .into_iter()
        .map(|pass| CommandLabel::Pass { camera, pass })
        .collect();
    assert_eq!(labels, expected);

    let draw = output.pass(camera, PassKind::Draw).unwrap();
    assert_eq!(
        draw.buffer.recorded_draws(),
        vec![RecordedCommand::DrawIndexed {
            index_count: QUAD_INDICES.len() as u32,
            instance_count: 1,
        }]
    );
    assert_eq!(draw.stats.draws, 1);
    assert_eq!(draw.stats.culled, 0);

    for pass in [
        PassKind::DirectionalShadow,
        PassKind::PointShadow,
        PassKind::SpotShadow,
        PassKind::Light,
        PassKind::Forward,
    ] {
        let entry = output.pass(camera, pass).unwrap();
        assert!(
            entry.buffer.recorded_draws().is_empty(),
            "{} pass should not draw",
            pass
        );
    }
    assert_eq!(output.native_handles().len(), 7);
}

#[test]
fn test_no_cameras_records_nothing() {
    let ctx = TestContext::new();
    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    assert!(output.is_empty());
}

#[rstest]
#[case::one(1)]
#[case::three(3)]
fn test_pass_count_scales_with_cameras(#[case] cameras: usize) {
    let ctx = TestContext::new();
    for _ in 0..cameras {
        ctx.camera();
    }
    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    assert_eq!(output.len(), cameras * PassKind::ALL.len());
}

#[test]
fn test_inactive_camera_is_skipped() {
    let ctx = TestContext::new();
    let camera = ctx.camera();
    let mut buffer = ctx.renderer.get_camera_buffer(camera).unwrap();
    buffer.active = false;
    ctx.renderer.set_camera_buffer(camera, buffer).unwrap();

    assert!(ctx.renderer.update(0.016, 0.0, 0).unwrap().is_empty());
}

/// A mesh behind the camera is culled and recorded as such.
#[test]
fn test_mesh_outside_frustum_is_culled() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.mesh(program, model, TransformId(1), Vec3::new(0.0, 0.0, 50.0));

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let draw = output.pass(camera, PassKind::Draw).unwrap();
    assert!(draw.buffer.recorded_draws().is_empty());
    assert_eq!(draw.stats.culled, 1);
}

/// Instances sharing a program and model draw once when the program reads
/// per-instance matrices.
#[test]
fn test_instanced_program_draws_once() {
    let ctx = TestContext::new();
    let vs = ctx.vertex_shader(vec![
        ShaderBufferInput::new(ShaderInputUsage::Camera, 0),
        ShaderBufferInput::new(ShaderInputUsage::InstanceTransforms, 1),
    ]);
    let ps = ctx.pixel_shader(Vec::new());
    let mut desc = RenderProgramDesc::new(vs, ps);
    desc.vertex_layout = umbra_graphics::types::VertexLayout::Position;
    let program = ctx.renderer.generate_render_program(desc).unwrap();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    for i in 0..3 {
        ctx.mesh(
            program,
            model,
            TransformId(10 + i),
            Vec3::new(i as f32 - 1.0, 0.0, 0.0),
        );
    }

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let draw = output.pass(camera, PassKind::Draw).unwrap();
    assert_eq!(
        draw.buffer.recorded_draws(),
        vec![RecordedCommand::DrawIndexed {
            index_count: QUAD_INDICES.len() as u32,
            instance_count: 3,
        }]
    );
}

/// Each visible light gets one full-screen quad with its kind's program.
#[test]
fn test_light_pass_draws_each_light() {
    let ctx = TestContext::new();
    let camera = ctx.camera();
    let ambient = ctx.screen_program(vec![
        ShaderBufferInput::new(ShaderInputUsage::GBuffer(0), 0),
        ShaderBufferInput::new(ShaderInputUsage::AmbientLight, 1),
    ]);
    let directional = ctx.screen_program(vec![
        ShaderBufferInput::new(ShaderInputUsage::GBuffer(0), 0),
        ShaderBufferInput::new(ShaderInputUsage::DirectionalLight, 1),
    ]);
    ctx.renderer.set_light_programs(LightPrograms {
        ambient,
        directional,
        ..Default::default()
    });
    ctx.renderer.generate_ambient_light(AmbientLight::default());
    ctx.transforms.set(TransformId(2), glam::Mat4::IDENTITY);
    for _ in 0..2 {
        ctx.renderer
            .generate_directional_light(DirectionalLight {
                transform: TransformId(2),
                ..Default::default()
            });
    }

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let light = output.pass(camera, PassKind::Light).unwrap();
    assert_eq!(light.buffer.recorded_draws().len(), 3);
    assert!(light.buffer.recorded_draws().iter().all(|draw| {
        *draw
            == RecordedCommand::Draw {
                vertex_count: 4,
                instance_count: 1,
            }
    }));
}

/// Without post programs the light target is blitted to the output.
#[test]
fn test_post_without_programs_blits() {
    let ctx = TestContext::new();
    let camera = ctx.camera();
    let mut buffer = ctx.renderer.get_camera_buffer(camera).unwrap();
    buffer.output = ctx.color_target(false);
    ctx.renderer.set_camera_buffer(camera, buffer).unwrap();

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let post = output.pass(camera, PassKind::Post).unwrap();
    let blits = post
        .buffer
        .recorded()
        .into_iter()
        .filter(|command| matches!(command, RecordedCommand::Blit { .. }))
        .count();
    assert_eq!(blits, 1);
}

#[test]
fn test_hooks_run_around_bound_pass() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut hooks = HookRegistry::new();
    let counter = calls.clone();
    hooks.register("count", move |cmd, ctx| {
        assert_eq!(ctx.pass, PassKind::Draw);
        assert!(cmd.camera().is_some());
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let config = test_config().with_hook(HookBinding {
        pass: "draw".into(),
        pre: Some("count".into()),
        post: Some("count".into()),
    });
    let ctx = TestContext::with_config(config, hooks);
    ctx.camera();

    ctx.renderer.update(0.016, 0.0, 0).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unregistered_hook_is_rejected() {
    common::init_logging();
    let config = test_config().with_hook(HookBinding {
        pass: "draw".into(),
        pre: Some("missing".into()),
        post: None,
    });
    let result = umbra_graphics::Renderer::new(
        Arc::new(umbra_graphics::DummyBackend::new()),
        config,
        Default::default(),
        HookRegistry::new(),
    );
    assert!(matches!(result, Err(GraphicsError::Config(_))));
}

struct SolidFrames {
    size: u32,
}

impl VideoFrameSource for SolidFrames {
    fn next_frame(&mut self) -> Option<VideoFrame> {
        Some(VideoFrame {
            width: self.size,
            height: self.size,
            rgba: vec![0x80; (self.size * self.size * 4) as usize],
        })
    }
}

struct OneQuad;

impl UiTree for OneQuad {
    fn canvas_elements(&self, _canvas: CanvasId) -> Vec<UiElement> {
        vec![UiElement {
            rect: Rect::FULL,
            color: Vec4::ONE,
            texture: Default::default(),
        }]
    }
}

/// Video decode comes first, then the camera passes, then the canvases.
#[test]
fn test_frame_order_decode_cameras_ui() {
    let ctx = TestContext::with_scene(test_config(), HookRegistry::new(), |scene| {
        scene.with_ui(Arc::new(OneQuad))
    });
    let texture = ctx
        .renderer
        .generate_texture(&TextureData::new(
            2,
            2,
            TextureFormat::Rgba8Unorm,
            vec![0; 16],
        ))
        .unwrap();
    ctx.renderer
        .generate_video_texture(texture, Box::new(SolidFrames { size: 2 }))
        .unwrap();
    let camera = ctx.camera();
    let ui_program = ctx.screen_program(vec![
        ShaderBufferInput::new(ShaderInputUsage::Texture(0), 0),
        ShaderBufferInput::push_constant(ShaderInputUsage::Ui),
    ]);
    let canvas = ctx.renderer.generate_canvas_renderer(CanvasRenderer {
        target: ctx.color_target(false),
        ..CanvasRenderer::new(ui_program, CanvasId(0))
    });

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    assert_eq!(output.len(), 1 + PassKind::ALL.len() + 1);
    assert_eq!(output.entries[0].label, CommandLabel::VideoDecode);
    assert!(
        output.entries[0]
            .buffer
            .recorded()
            .iter()
            .any(|command| matches!(command, RecordedCommand::CopyBufferToImage { .. }))
    );
    assert_eq!(
        output.entries[1].label,
        CommandLabel::Pass {
            camera,
            pass: PassKind::DirectionalShadow
        }
    );
    let last = output.entries.last().unwrap();
    assert_eq!(last.label, CommandLabel::Canvas(canvas));
    assert_eq!(last.buffer.recorded_draws().len(), 1);
}

/// Blended programs skip the G-buffer and draw in the forward pass.
#[test]
fn test_blended_stack_draws_in_forward_pass() {
    let ctx = TestContext::new();
    let vs = ctx.vertex_shader(vec![
        ShaderBufferInput::new(ShaderInputUsage::Camera, 0),
        ShaderBufferInput::push_constant(ShaderInputUsage::Transform),
    ]);
    let ps = ctx.pixel_shader(Vec::new());
    let mut desc = RenderProgramDesc::new(vs, ps);
    desc.vertex_layout = VertexLayout::Position;
    desc.blend_mode = BlendMode::AlphaBlend;
    let program = ctx.renderer.generate_render_program(desc).unwrap();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.mesh(program, model, TransformId(1), Vec3::ZERO);

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let draw = output.pass(camera, PassKind::Draw).unwrap();
    assert!(draw.buffer.recorded_draws().is_empty());
    let forward = output.pass(camera, PassKind::Forward).unwrap();
    assert_eq!(forward.buffer.recorded_draws(), vec![indexed_quad(1)]);
}

/// An emitter draws one instanced quad per particle into the light target.
#[test]
fn test_particles_draw_in_forward_pass() {
    let ctx = TestContext::new();
    let vs = ctx.vertex_shader(vec![
        ShaderBufferInput::new(ShaderInputUsage::Camera, 0),
        ShaderBufferInput::new(ShaderInputUsage::Particles, 1),
        ShaderBufferInput::push_constant(ShaderInputUsage::Transform),
    ]);
    let ps = ctx.pixel_shader(Vec::new());
    let program = ctx
        .renderer
        .generate_render_program(RenderProgramDesc::new(vs, ps))
        .unwrap();
    let camera = ctx.camera();
    ctx.transforms.set(TransformId(3), Mat4::IDENTITY);
    let particle = Particle {
        position: Vec3::ZERO,
        size: 0.5,
        color: Vec4::ONE,
    };
    ctx.renderer.generate_particle_emitter(ParticleEmitter {
        particles: vec![particle; 5],
        ..ParticleEmitter::new(program, TransformId(3))
    });
    // Emitters without particles draw nothing.
    ctx.renderer
        .generate_particle_emitter(ParticleEmitter::new(program, TransformId(3)));

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let forward = output.pass(camera, PassKind::Forward).unwrap();
    assert_eq!(
        forward.buffer.recorded_draws(),
        vec![RecordedCommand::Draw {
            vertex_count: 4,
            instance_count: 5,
        }]
    );
}

struct CountingSkeletons {
    calls: AtomicUsize,
}

impl SkeletonProvider for CountingSkeletons {
    fn skeleton(&self, skeleton: SkeletonId) -> Option<Arc<Skeleton>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bone = Bone {
            local: Mat4::IDENTITY,
            parent: None,
            inverse_bind: Mat4::IDENTITY,
        };
        (skeleton == SkeletonId(0)).then(|| Arc::new(Skeleton { bones: vec![bone; 2] }))
    }
}

/// Skinned instances fetch their skeleton and draw one by one; an instance
/// whose skeleton is unavailable is skipped.
#[test]
fn test_skinned_stack_draws_with_skeleton() {
    let skeletons = Arc::new(CountingSkeletons {
        calls: AtomicUsize::new(0),
    });
    let provider = skeletons.clone();
    let ctx = TestContext::with_scene(test_config(), HookRegistry::new(), move |scene| {
        scene.with_skeletons(provider)
    });
    let vs = ctx.vertex_shader(vec![
        ShaderBufferInput::new(ShaderInputUsage::Camera, 0),
        ShaderBufferInput::new(ShaderInputUsage::BoneMatrices, 1),
        ShaderBufferInput::push_constant(ShaderInputUsage::Transform),
    ]);
    let ps = ctx.pixel_shader(Vec::new());
    let mut desc = RenderProgramDesc::new(vs, ps);
    desc.vertex_layout = VertexLayout::Position;
    let program = ctx.renderer.generate_render_program(desc).unwrap();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.transforms.set(TransformId(1), Mat4::IDENTITY);

    for skeleton in [SkeletonId(0), SkeletonId(9)] {
        let skinned = ctx
            .renderer
            .generate_skinned_mesh_render_buffer(SkinnedMeshRenderBuffer::new(
                program,
                model,
                TransformId(1),
                skeleton,
            ))
            .unwrap();
        ctx.renderer.generate_skinned_render_stack(skinned).unwrap();
    }
    assert_eq!(ctx.renderer.stacks().instance_count(program), 2);

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let draw = output.pass(camera, PassKind::Draw).unwrap();
    assert_eq!(draw.buffer.recorded_draws(), vec![indexed_quad(1)]);
    assert_eq!(skeletons.calls.load(Ordering::SeqCst), 2);
}

struct ThreeQuads;

impl UiTree for ThreeQuads {
    fn canvas_elements(&self, canvas: CanvasId) -> Vec<UiElement> {
        if canvas != CanvasId(1) {
            return Vec::new();
        }
        let quad = UiElement {
            rect: Rect::FULL,
            color: Vec4::ONE,
            texture: Default::default(),
        };
        vec![quad; 3]
    }
}

/// Each element of a canvas is one quad; an empty canvas draws nothing.
#[test]
fn test_canvas_draws_each_element() {
    let ctx = TestContext::with_scene(test_config(), HookRegistry::new(), |scene| {
        scene.with_ui(Arc::new(ThreeQuads))
    });
    let program = ctx.screen_program(vec![
        ShaderBufferInput::new(ShaderInputUsage::Texture(0), 0),
        ShaderBufferInput::push_constant(ShaderInputUsage::Ui),
    ]);
    let full = ctx.renderer.generate_canvas_renderer(CanvasRenderer {
        target: ctx.color_target(false),
        ..CanvasRenderer::new(program, CanvasId(1))
    });
    let empty = ctx.renderer.generate_canvas_renderer(CanvasRenderer {
        target: ctx.color_target(false),
        ..CanvasRenderer::new(program, CanvasId(2))
    });

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let entry = |canvas| {
        output
            .entries
            .iter()
            .find(|entry| entry.label == CommandLabel::Canvas(canvas))
            .unwrap()
    };
    let draws = entry(full).buffer.recorded_draws();
    assert_eq!(draws.len(), 3);
    assert!(draws.iter().all(|draw| {
        *draw
            == RecordedCommand::Draw {
                vertex_count: 4,
                instance_count: 1,
            }
    }));
    assert!(entry(empty).buffer.recorded().is_empty());
}

// ============================================================================
// Shadow Tests
// ============================================================================

/// Directional lights render one cascade into each of their shadow maps.
#[test]
fn test_directional_cascades_render_each_map() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.mesh(program, model, TransformId(1), Vec3::ZERO);
    let maps = vec![
        ctx.shadow_target(RenderTextureDepth::Owned(TextureFormat::Depth32Float)),
        ctx.shadow_target(RenderTextureDepth::Owned(TextureFormat::Depth32Float)),
    ];
    ctx.transforms
        .set(TransformId(2), Mat4::from_rotation_x(-1.0));
    let light = ctx
        .renderer
        .generate_directional_light(DirectionalLight {
            transform: TransformId(2),
            shadow_maps: maps,
            ..Default::default()
        });

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let shadow = output.pass(camera, PassKind::DirectionalShadow).unwrap();
    let renderings = renderings(shadow);
    assert_eq!(renderings.len(), 2);
    assert!(renderings.iter().all(|(depth, layer)| depth.is_some() && layer.is_none()));
    assert_ne!(renderings[0].0, renderings[1].0);
    // The mesh sits inside the nearest cascade.
    assert!(shadow.buffer.recorded_draws().contains(&indexed_quad(1)));
    let near_map = ctx
        .renderer
        .get_directional_light(light)
        .unwrap()
        .shadow_maps[0];
    assert!(
        ctx.renderer
            .pipelines()
            .contains(PipelineVariant::Shadow, pipeline_key(near_map, program))
    );
}

/// Point lights render all six faces of their cube map.
#[test]
fn test_point_shadow_renders_six_faces() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.mesh(program, model, TransformId(1), Vec3::ZERO);
    let cube = ctx
        .renderer
        .generate_depth_cube_render_texture(common::TARGET_SIZE, TextureFormat::Depth32Float)
        .unwrap();
    let map = ctx.shadow_target(RenderTextureDepth::Cube(cube));
    ctx.transforms
        .set(TransformId(2), Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0)));
    ctx.renderer.generate_point_light(PointLight {
        transform: TransformId(2),
        shadow_maps: vec![map],
        ..Default::default()
    });

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let shadow = output.pass(camera, PassKind::PointShadow).unwrap();
    let layers: Vec<Option<u32>> = renderings(shadow)
        .into_iter()
        .map(|(_, layer)| layer)
        .collect();
    assert_eq!(layers, (0..6).map(Some).collect::<Vec<_>>());
    assert!(shadow.buffer.recorded_draws().contains(&indexed_quad(1)));
    assert!(
        ctx.renderer
            .pipelines()
            .contains(PipelineVariant::CubeShadow, pipeline_key(map, program))
    );
}

/// A point light whose shadow map is not a cube renders unshadowed.
#[test]
fn test_point_shadow_skips_flat_map() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.mesh(program, model, TransformId(1), Vec3::ZERO);
    let map = ctx.shadow_target(RenderTextureDepth::Owned(TextureFormat::Depth32Float));
    ctx.transforms.set(TransformId(2), Mat4::IDENTITY);
    ctx.renderer.generate_point_light(PointLight {
        transform: TransformId(2),
        shadow_maps: vec![map],
        ..Default::default()
    });

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let shadow = output.pass(camera, PassKind::PointShadow).unwrap();
    assert!(renderings(shadow).is_empty());
    assert!(shadow.buffer.recorded_draws().is_empty());
}

/// Spot lights render a single perspective map.
#[test]
fn test_spot_shadow_renders_single_map() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.mesh(program, model, TransformId(1), Vec3::ZERO);
    let map = ctx.shadow_target(RenderTextureDepth::Owned(TextureFormat::Depth32Float));
    ctx.transforms
        .set(TransformId(2), Mat4::from_translation(Vec3::new(0.0, 0.0, 3.0)));
    ctx.renderer.generate_spot_light(SpotLight {
        transform: TransformId(2),
        shadow_maps: vec![map],
        ..Default::default()
    });

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let shadow = output.pass(camera, PassKind::SpotShadow).unwrap();
    assert_eq!(renderings(shadow).len(), 1);
    assert_eq!(shadow.buffer.recorded_draws(), vec![indexed_quad(1)]);
}

/// Programs flagged as non-casters are left out of shadow maps.
#[test]
fn test_non_caster_skipped_in_shadow_pass() {
    let ctx = TestContext::new();
    let vs = ctx.vertex_shader(vec![
        ShaderBufferInput::new(ShaderInputUsage::Camera, 0),
        ShaderBufferInput::push_constant(ShaderInputUsage::Transform),
    ]);
    let ps = ctx.pixel_shader(Vec::new());
    let mut desc = RenderProgramDesc::new(vs, ps);
    desc.vertex_layout = VertexLayout::Position;
    desc.flags = ProgramFlags::NO_SHADOW_CAST;
    let program = ctx.renderer.generate_render_program(desc).unwrap();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.mesh(program, model, TransformId(1), Vec3::ZERO);
    let map = ctx.shadow_target(RenderTextureDepth::Owned(TextureFormat::Depth32Float));
    ctx.transforms
        .set(TransformId(2), Mat4::from_translation(Vec3::new(0.0, 0.0, 3.0)));
    ctx.renderer.generate_spot_light(SpotLight {
        transform: TransformId(2),
        shadow_maps: vec![map],
        ..Default::default()
    });

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let shadow = output.pass(camera, PassKind::SpotShadow).unwrap();
    assert_eq!(renderings(shadow).len(), 1);
    assert!(shadow.buffer.recorded_draws().is_empty());
    let draw = output.pass(camera, PassKind::Draw).unwrap();
    assert_eq!(draw.buffer.recorded_draws(), vec![indexed_quad(1)]);
}

// ============================================================================
// Lifetime Tests
// ============================================================================

#[test]
fn test_generate_destroy_exists() {
    let ctx = TestContext::new();
    let model = ctx.quad_model();
    let light = ctx.renderer.generate_ambient_light(AmbientLight::default());
    assert!(ctx.renderer.exists(model));
    assert!(ctx.renderer.exists(light));

    ctx.renderer.destroy_model(model).unwrap();
    ctx.renderer.destroy_ambient_light(light).unwrap();
    assert!(!ctx.renderer.exists(model));
    assert!(!ctx.renderer.exists(light));
}

#[test]
fn test_stale_handle_is_rejected() {
    let ctx = TestContext::new();
    let model = ctx.quad_model();
    ctx.renderer.destroy_model(model).unwrap();

    assert!(matches!(
        ctx.renderer.destroy_model(model),
        Err(GraphicsError::InvalidHandle { .. })
    ));
    // Model slots are never handed out twice.
    let fresh = ctx.quad_model();
    assert_ne!(fresh, model);
    assert!(!ctx.renderer.exists(model));
    assert!(ctx.renderer.exists(fresh));
}

#[test]
fn test_null_handles_are_rejected() {
    let ctx = TestContext::new();
    assert!(ctx.renderer.destroy_model(Default::default()).is_err());
    assert!(ctx.renderer.generate_render_stack(Default::default()).is_err());
    assert!(ctx.renderer.get_model(Default::default()).is_none());
}

#[test]
fn test_program_rejects_swapped_stages() {
    let ctx = TestContext::new();
    let vs = ctx.vertex_shader(Vec::new());
    let ps = ctx.pixel_shader(Vec::new());
    let result = ctx
        .renderer
        .generate_render_program(RenderProgramDesc::new(ps, vs));
    assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
}

#[test]
fn test_program_from_record() {
    let ctx = TestContext::new();
    let vs = ctx.vertex_shader(vec![ShaderBufferInput::new(
        ShaderInputUsage::UserUniform,
        0,
    )]);
    let ps = ctx.pixel_shader(Vec::new());
    let mut desc = RenderProgramDesc::new(vs, ps);
    desc.uniform = vec![7; 16];
    let mut bytes = Vec::new();
    desc.write_to(&mut bytes);

    let program = ctx
        .renderer
        .generate_render_program_from_record(&bytes)
        .unwrap();
    assert_eq!(ctx.renderer.get_render_program(program), Some(desc));

    assert!(
        ctx.renderer
            .set_render_program_uniform(program, &[1; 16])
            .is_ok()
    );
    assert!(matches!(
        ctx.renderer.set_render_program_uniform(program, &[1; 8]),
        Err(GraphicsError::InvalidParameter(_))
    ));
}

/// Programs flagged to own their shaders destroy them with the program.
#[test]
fn test_program_destroys_owned_shaders() {
    let ctx = TestContext::new();
    let vs = ctx.vertex_shader(Vec::new());
    let ps = ctx.pixel_shader(Vec::new());
    let mut desc = RenderProgramDesc::new(vs, ps);
    desc.flags = ProgramFlags::DESTROY_OWNED_SHADERS;
    let program = ctx.renderer.generate_render_program(desc).unwrap();

    ctx.renderer.destroy_render_program(program).unwrap();
    assert!(!ctx.renderer.exists(vs));
    assert!(!ctx.renderer.exists(ps));
    assert!(ctx.renderer.shutdown().is_ok());
}

/// Attaching renderers while their program is destroyed on another thread
/// never leaves a stack behind for the dead program.
#[test]
fn test_attach_during_program_destroy_leaves_no_stack() {
    let ctx = TestContext::new();
    let model = ctx.quad_model();
    for iteration in 0..64 {
        let program = ctx.mesh_program();
        let mesh = ctx
            .renderer
            .generate_mesh_render_buffer(MeshRenderBuffer::new(program, model, TransformId(1)))
            .unwrap();
        let skinned = ctx
            .renderer
            .generate_skinned_mesh_render_buffer(SkinnedMeshRenderBuffer::new(
                program,
                model,
                TransformId(1),
                SkeletonId(0),
            ))
            .unwrap();

        let barrier = Barrier::new(2);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                barrier.wait();
                ctx.renderer.destroy_render_program(program).unwrap();
            });
            barrier.wait();
            // Either attach may lose the race and report the dead program.
            let _ = ctx.renderer.generate_render_stack(mesh);
            let _ = ctx.renderer.generate_skinned_render_stack(skinned);
        });

        assert!(
            !ctx.renderer.stacks().contains(program),
            "stack survived in iteration {iteration}"
        );
        assert!(!ctx.renderer.get_mesh_render_buffer(mesh).unwrap().attached);
        assert!(
            !ctx.renderer
                .get_skinned_mesh_render_buffer(skinned)
                .unwrap()
                .attached
        );
        ctx.renderer.destroy_mesh_render_buffer(mesh).unwrap();
        ctx.renderer
            .destroy_skinned_mesh_render_buffer(skinned)
            .unwrap();
    }
}

/// Destroyed GPU resources stay alive until their flight frame comes round
/// again.
#[test]
fn test_deletion_waits_for_flight_frame() {
    let ctx = TestContext::new();
    ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let model = ctx.quad_model();
    ctx.renderer.destroy_model(model).unwrap();
    assert_eq!(ctx.renderer.pending_deletions(), 1);

    assert_eq!(ctx.renderer.update(0.016, 0.0, 1).unwrap().released, 0);
    assert_eq!(ctx.renderer.update(0.016, 0.0, 2).unwrap().released, 0);
    assert_eq!(ctx.renderer.pending_deletions(), 1);
    assert_eq!(ctx.renderer.update(0.016, 0.0, 3).unwrap().released, 1);
    assert_eq!(ctx.renderer.pending_deletions(), 0);
}

#[test]
fn test_shutdown_reports_leaks() {
    let ctx = TestContext::new();
    let model = ctx.quad_model();
    let light = ctx.renderer.generate_ambient_light(AmbientLight::default());

    match ctx.renderer.shutdown() {
        Err(GraphicsError::ResourceLeak(message)) => {
            assert!(message.contains("models"), "{message}");
            assert!(message.contains("ambient lights"), "{message}");
        }
        other => panic!("expected a leak report, got {other:?}"),
    }

    ctx.renderer.destroy_model(model).unwrap();
    ctx.renderer.destroy_ambient_light(light).unwrap();
    assert!(ctx.renderer.shutdown().is_ok());
}

/// Every backend object is released once all resources are destroyed and
/// the renderer is dropped.
#[test]
fn test_backend_objects_released() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    let mesh = ctx.mesh(program, model, TransformId(1), Vec3::ZERO);
    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    drop(output);

    let buffer = ctx.renderer.get_camera_buffer(camera).unwrap();
    ctx.renderer.destroy_mesh_render_buffer(mesh).unwrap();
    ctx.renderer.destroy_camera_buffer(camera).unwrap();
    ctx.renderer.destroy_render_texture(buffer.gbuffer).unwrap();
    ctx.renderer
        .destroy_render_texture(buffer.light_target)
        .unwrap();
    let desc = ctx.renderer.get_render_program(program).unwrap();
    ctx.renderer.destroy_render_program(program).unwrap();
    ctx.renderer.destroy_model(model).unwrap();

    let TestContext {
        backend,
        transforms: _,
        renderer,
    } = ctx;
    // The program's shaders were created separately and are still live.
    match renderer.shutdown() {
        Err(GraphicsError::ResourceLeak(message)) => assert!(message.contains("2 shaders")),
        other => panic!("expected a leak report, got {other:?}"),
    }
    renderer.destroy_shader(desc.vertex_shader).unwrap();
    renderer.destroy_shader(desc.pixel_shader).unwrap();
    assert!(renderer.shutdown().is_ok());

    drop(renderer);
    assert_eq!(backend.stats().live_objects, 0);
}

// ============================================================================
// Cache Tests
// ============================================================================

#[test]
fn test_pipelines_are_shared_per_target_and_program() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.mesh(program, model, TransformId(1), Vec3::ZERO);
    ctx.mesh(program, model, TransformId(2), Vec3::new(1.0, 0.0, 0.0));

    ctx.renderer.update(0.016, 0.0, 0).unwrap();
    ctx.renderer.update(0.016, 0.0, 1).unwrap();

    let gbuffer = ctx.renderer.get_camera_buffer(camera).unwrap().gbuffer;
    let key = pipeline_key(gbuffer, program);
    assert!(ctx.renderer.pipelines().contains(PipelineVariant::Normal, key));
    assert_eq!(ctx.renderer.pipelines().len(PipelineVariant::Normal), 1);
    assert_eq!(ctx.backend.stats().pipelines_created, 1);
}

#[test]
fn test_destroy_program_evicts_pipelines_and_detaches() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    let mesh = ctx.mesh(program, model, TransformId(1), Vec3::ZERO);
    ctx.renderer.update(0.016, 0.0, 0).unwrap();

    let gbuffer = ctx.renderer.get_camera_buffer(camera).unwrap().gbuffer;
    let key = pipeline_key(gbuffer, program);
    assert!(ctx.renderer.pipelines().contains(PipelineVariant::Normal, key));
    assert!(ctx.renderer.stacks().contains(program));

    ctx.renderer.destroy_render_program(program).unwrap();
    assert!(!ctx.renderer.pipelines().contains(PipelineVariant::Normal, key));
    assert!(!ctx.renderer.stacks().contains(program));
    assert!(!ctx.renderer.get_mesh_render_buffer(mesh).unwrap().attached);

    let output = ctx.renderer.update(0.016, 0.0, 1).unwrap();
    let draw = output.pass(camera, PassKind::Draw).unwrap();
    assert!(draw.buffer.recorded_draws().is_empty());
}

#[test]
fn test_destroy_target_evicts_pipelines() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    ctx.mesh(program, model, TransformId(1), Vec3::ZERO);
    ctx.renderer.update(0.016, 0.0, 0).unwrap();

    let gbuffer = ctx.renderer.get_camera_buffer(camera).unwrap().gbuffer;
    let key = pipeline_key(gbuffer, program);
    assert!(ctx.renderer.pipelines().contains(PipelineVariant::Normal, key));

    ctx.renderer.destroy_render_texture(gbuffer).unwrap();
    assert!(!ctx.renderer.pipelines().contains(PipelineVariant::Normal, key));
}

/// Render texture slots are reused, so a new target can take the handle
/// of a destroyed one without inheriting its pipelines.
#[test]
fn test_reused_target_slot_starts_without_pipelines() {
    let ctx = TestContext::new();
    let first = ctx.color_target(true);
    ctx.renderer.destroy_render_texture(first).unwrap();
    let second = ctx.color_target(true);
    assert_eq!(first, second);
    assert!(ctx.renderer.exists(second));
    assert_eq!(ctx.renderer.pipelines().len(PipelineVariant::Normal), 0);
}

#[test]
fn test_detached_mesh_does_not_draw() {
    let ctx = TestContext::new();
    let program = ctx.mesh_program();
    let model = ctx.quad_model();
    let camera = ctx.camera();
    let mesh = ctx.mesh(program, model, TransformId(1), Vec3::ZERO);

    ctx.renderer.destroy_render_stack(mesh).unwrap();
    // Detaching twice is a no-op.
    ctx.renderer.destroy_render_stack(mesh).unwrap();
    assert_eq!(ctx.renderer.stacks().instance_count(program), 0);

    let output = ctx.renderer.update(0.016, 0.0, 0).unwrap();
    let draw = output.pass(camera, PassKind::Draw).unwrap();
    assert!(draw.buffer.recorded_draws().is_empty());

    ctx.renderer.generate_render_stack(mesh).unwrap();
    assert_eq!(ctx.renderer.stacks().instance_count(program), 1);
}
