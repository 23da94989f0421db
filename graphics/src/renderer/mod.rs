//! The renderer context.
//!
//! A [`Renderer`] owns every resource table, the pipeline caches, the
//! render stacks and the per-flight-frame pools. Embedders hold it behind a
//! shared reference and call the `generate_*`/`destroy_*` API from any
//! thread, then [`update`](Renderer::update) once per frame.
//!
//! Ownership only flows downward: the renderer owns tables and caches,
//! tables own GPU objects, and everything else (stacks, cameras, renderers,
//! recorded commands) refers to resources by handle.

mod api;
mod frame;

use std::sync::Arc;

use glam::{Mat4, UVec2};
use parking_lot::{Mutex, RwLock};
use umbra_core::{Handle, LockedTable};

use crate::backend::{self, GpuBackend, GpuBuffer, GpuImage, GpuSampler};
use crate::command::CommandSlot;
use crate::config::RendererConfig;
use crate::deletion::DeletionQueue;
use crate::descriptors::{PushDescriptorPool, TransientBuffers};
use crate::error::GraphicsError;
use crate::passes::{HookRegistry, LightPrograms, PassHooks};
use crate::pipeline::PipelineCache;
use crate::program::RenderProgram;
use crate::resources::{
    AmbientLight, CameraBuffer, CanvasRenderer, CascadeCamera, DepthAttachment,
    DepthCubeRenderTexture, DepthRenderTexture, DirectionalLight, MeshRenderBuffer, Model,
    ParticleEmitter, PointLight, RenderTexture, RenderTextureHandle, Shader,
    SkinnedMeshRenderBuffer, SpotLight, Texture, TextureSampler, TimeUniform, VideoTexture,
};
use crate::scene::{PresentTarget, SceneInterfaces, TransformId};
use crate::stack::RenderStacks;
use crate::types::{BufferDescriptor, BufferUsage, ImageDescriptor, SamplerDescriptor, TextureFormat};

pub use api::RenderTextureDepth;
pub use frame::{CommandLabel, FrameCommandBuffer, FrameOutput};

/// Objects bound wherever a resource is missing.
pub(crate) struct DefaultResources {
    pub(crate) sampler: Arc<GpuSampler>,
    pub(crate) shadow_sampler: Arc<GpuSampler>,
    /// 1x1 opaque white.
    pub(crate) white: Arc<GpuImage>,
    /// 1x1 depth cleared to the far plane.
    pub(crate) depth: Arc<GpuImage>,
    pub(crate) depth_cube: Arc<GpuImage>,
}

impl DefaultResources {
    fn new(backend: &dyn GpuBackend) -> Result<Self, GraphicsError> {
        let sampler = backend.create_sampler(&SamplerDescriptor::linear().with_label("default"))?;
        let shadow_sampler =
            backend.create_sampler(&SamplerDescriptor::shadow().with_label("default shadow"))?;

        let white = backend.create_image(
            &ImageDescriptor::new_2d(1, 1, TextureFormat::Rgba8Unorm).with_label("default white"),
        )?;
        backend.upload_image(&white, &[255; 4])?;

        let depth = backend.create_image(
            &ImageDescriptor::depth_target(1, 1, TextureFormat::Depth32Float, 1)
                .with_label("default depth"),
        )?;
        let depth_cube = backend.create_image(
            &ImageDescriptor::depth_target(1, 1, TextureFormat::Depth32Float, 6)
                .with_cube()
                .with_label("default depth cube"),
        )?;

        Ok(Self {
            sampler: Arc::new(sampler),
            shadow_sampler: Arc::new(shadow_sampler),
            white: Arc::new(white),
            depth: Arc::new(depth),
            depth_cube: Arc::new(depth_cube),
        })
    }
}

/// Lets [`Renderer::exists`] find the table of any resource kind.
pub trait TableResource: Sized {
    #[doc(hidden)]
    fn table(renderer: &Renderer) -> &LockedTable<Self>;
}

macro_rules! table_resources {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl TableResource for $ty {
                fn table(renderer: &Renderer) -> &LockedTable<Self> {
                    &renderer.$field
                }
            }
        )*

        impl Renderer {
            /// Name and live count of every resource table.
            pub fn live_resources(&self) -> Vec<(&'static str, usize)> {
                vec![$((self.$field.name(), self.$field.live_count())),*]
            }
        }
    };
}

table_resources! {
    Shader => shaders,
    RenderProgram => programs,
    Model => models,
    Texture => textures,
    TextureSampler => samplers,
    RenderTexture => render_textures,
    DepthRenderTexture => depth_textures,
    DepthCubeRenderTexture => depth_cubes,
    AmbientLight => ambient_lights,
    DirectionalLight => directional_lights,
    PointLight => point_lights,
    SpotLight => spot_lights,
    CameraBuffer => cameras,
    MeshRenderBuffer => mesh_renderers,
    SkinnedMeshRenderBuffer => skinned_mesh_renderers,
    ParticleEmitter => particle_emitters,
    CanvasRenderer => canvases,
    VideoTexture => videos,
}

/// The explicit renderer context. See the module docs.
pub struct Renderer {
    pub(crate) shaders: LockedTable<Shader>,
    pub(crate) programs: LockedTable<RenderProgram>,
    pub(crate) models: LockedTable<Model>,
    pub(crate) textures: LockedTable<Texture>,
    pub(crate) samplers: LockedTable<TextureSampler>,
    pub(crate) render_textures: LockedTable<RenderTexture>,
    pub(crate) depth_textures: LockedTable<DepthRenderTexture>,
    pub(crate) depth_cubes: LockedTable<DepthCubeRenderTexture>,
    pub(crate) ambient_lights: LockedTable<AmbientLight>,
    pub(crate) directional_lights: LockedTable<DirectionalLight>,
    pub(crate) point_lights: LockedTable<PointLight>,
    pub(crate) spot_lights: LockedTable<SpotLight>,
    pub(crate) cameras: LockedTable<CameraBuffer>,
    pub(crate) mesh_renderers: LockedTable<MeshRenderBuffer>,
    pub(crate) skinned_mesh_renderers: LockedTable<SkinnedMeshRenderBuffer>,
    pub(crate) particle_emitters: LockedTable<ParticleEmitter>,
    pub(crate) canvases: LockedTable<CanvasRenderer>,
    pub(crate) videos: LockedTable<VideoTexture>,

    pub(crate) stacks: RenderStacks,
    pub(crate) pipelines: PipelineCache,
    pub(crate) descriptors: PushDescriptorPool,
    pub(crate) transient: TransientBuffers,
    pub(crate) light_programs: RwLock<LightPrograms>,
    pub(crate) hooks: PassHooks,
    pub(crate) defaults: DefaultResources,
    time_ubos: Vec<Arc<GpuBuffer>>,
    /// Command slots per flight frame, grown on demand.
    pub(crate) frames: Vec<Mutex<Vec<CommandSlot>>>,
    pub(crate) pool: rayon::ThreadPool,
    pub(crate) config: RendererConfig,
    pub(crate) scene: SceneInterfaces,
    present: RwLock<PresentTarget>,
    pub(crate) deletion: DeletionQueue,
    // Dropped last: everything above may hold objects of this backend.
    backend: Arc<dyn GpuBackend>,
}

impl Renderer {
    /// Build a renderer on `backend`.
    ///
    /// Fails if the configuration is invalid, a hook binding names an
    /// unknown pass or hook, or the default resources cannot be created.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        config: RendererConfig,
        scene: SceneInterfaces,
        hooks: HookRegistry,
    ) -> Result<Self, GraphicsError> {
        config.validate()?;
        let hooks = PassHooks::resolve(&config.hooks, &hooks)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("umbra-worker-{i}"))
            .build()
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!("failed to build worker pool: {e}"))
            })?;

        let defaults = DefaultResources::new(backend.as_ref())?;
        let time_ubos = (0..config.flight_frames)
            .map(|_| {
                let descriptor = BufferDescriptor::new(
                    std::mem::size_of::<TimeUniform>() as u64,
                    BufferUsage::UNIFORM,
                )
                .with_label("time");
                backend.create_buffer(&descriptor).map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Renderer created on {} backend: {} flight frames, {} workers, {} hooks",
            backend.name(),
            config.flight_frames,
            pool.current_num_threads(),
            hooks.count()
        );

        Ok(Self {
            shaders: LockedTable::new("shaders"),
            programs: LockedTable::new("render programs"),
            models: LockedTable::new("models"),
            textures: LockedTable::new("textures"),
            samplers: LockedTable::new("texture samplers"),
            render_textures: LockedTable::new("render textures"),
            depth_textures: LockedTable::new("depth render textures"),
            depth_cubes: LockedTable::new("depth cube render textures"),
            ambient_lights: LockedTable::new("ambient lights"),
            directional_lights: LockedTable::new("directional lights"),
            point_lights: LockedTable::new("point lights"),
            spot_lights: LockedTable::new("spot lights"),
            cameras: LockedTable::new("camera buffers"),
            mesh_renderers: LockedTable::new("mesh render buffers"),
            skinned_mesh_renderers: LockedTable::new("skinned mesh render buffers"),
            particle_emitters: LockedTable::new("particle emitters"),
            canvases: LockedTable::new("canvas renderers"),
            videos: LockedTable::new("video textures"),
            stacks: RenderStacks::new(),
            pipelines: PipelineCache::new(),
            descriptors: PushDescriptorPool::new(
                config.flight_frames,
                config.descriptor_sub_pool_capacity,
            ),
            transient: TransientBuffers::new(config.flight_frames, config.storage_block_size),
            light_programs: RwLock::new(LightPrograms::default()),
            hooks,
            defaults,
            time_ubos,
            frames: (0..config.flight_frames)
                .map(|_| Mutex::new(Vec::new()))
                .collect(),
            pool,
            deletion: DeletionQueue::new(config.flight_frames),
            config,
            scene,
            present: RwLock::new(PresentTarget::default()),
            backend,
        })
    }

    /// Build a renderer on the best available backend.
    pub fn create(
        config: RendererConfig,
        scene: SceneInterfaces,
        hooks: HookRegistry,
    ) -> Result<Self, GraphicsError> {
        let backend = backend::create_backend(config.validation)?;
        Self::new(backend, config, scene, hooks)
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn descriptors(&self) -> &PushDescriptorPool {
        &self.descriptors
    }

    pub fn stacks(&self) -> &RenderStacks {
        &self.stacks
    }

    /// Resources waiting for their flight frame to come around.
    pub fn pending_deletions(&self) -> usize {
        self.deletion.pending()
    }

    /// Whether `handle` refers to a live resource of its kind.
    pub fn exists<T: TableResource>(&self, handle: Handle<T>) -> bool {
        T::table(self).exists(handle)
    }

    /// World matrix of a scene transform.
    pub(crate) fn world(&self, transform: TransformId) -> Option<Mat4> {
        if transform.is_null() {
            return None;
        }
        self.scene.transforms.global_matrix(transform)
    }

    pub(crate) fn present_target(&self) -> PresentTarget {
        self.present.read().clone()
    }

    pub(crate) fn time_ubo(&self, frame: u32) -> &Arc<GpuBuffer> {
        &self.time_ubos[frame as usize % self.time_ubos.len()]
    }

    /// The depth image a render texture renders into, wherever it lives.
    pub(crate) fn depth_image(&self, target: RenderTextureHandle) -> Option<Arc<GpuImage>> {
        let depth = self
            .render_textures
            .with(target, |texture| texture.depth.clone())?;
        match depth {
            DepthAttachment::None => None,
            DepthAttachment::Owned(image) => Some(image),
            DepthAttachment::Depth(depth) => self.depth_textures.with(depth, |d| d.image.clone()),
            DepthAttachment::Cube(cube) => self.depth_cubes.with(cube, |c| c.image.clone()),
        }
    }

    /// Extent a camera's passes render at: its light target, falling back
    /// to the presentation target.
    pub(crate) fn camera_extent(&self, camera: &CameraBuffer) -> UVec2 {
        self.render_textures
            .with(camera.light_target, |texture| {
                UVec2::new(texture.width, texture.height)
            })
            .unwrap_or_else(|| {
                let present = self.present.read();
                UVec2::new(present.width, present.height)
            })
    }

    /// The camera slice directional cascades split.
    pub(crate) fn cascade_camera(&self, camera: &CameraBuffer, world: Mat4) -> CascadeCamera {
        let (_, size) = camera.rect.to_pixels(self.camera_extent(camera));
        CascadeCamera {
            world,
            fov_y: camera.fov_y,
            aspect: size.x / size.y.max(1.0),
            near: camera.near,
            far: camera.far,
        }
    }

    /// Wait for the GPU, drop every cached and deferred object, and report
    /// resources the embedder never destroyed.
    ///
    /// Returns [`GraphicsError::ResourceLeak`] naming each table that still
    /// holds live handles.
    pub fn shutdown(&self) -> Result<(), GraphicsError> {
        self.backend.wait_idle();
        let pipelines = self.pipelines.clear(&self.deletion);
        let deferred = self.deletion.flush_all();
        log::info!(
            "Renderer shutdown: dropped {} pipelines, {} deferred resources",
            pipelines,
            deferred
        );

        let leaks: Vec<String> = self
            .live_resources()
            .into_iter()
            .filter(|(_, live)| *live > 0)
            .map(|(name, live)| format!("{live} {name}"))
            .collect();
        if leaks.is_empty() {
            Ok(())
        } else {
            let message = leaks.join(", ");
            log::error!("Resources leaked at shutdown: {}", message);
            Err(GraphicsError::ResourceLeak(message))
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.backend.wait_idle();
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("pipelines", &self.pipelines)
            .field("stacks", &self.stacks.len())
            .finish_non_exhaustive()
    }
}
