//! Lazily built graphics pipelines.
//!
//! A pipeline depends on the program it runs and on the attachment formats
//! of the target it renders into, so each cache is keyed by both handles:
//! the target in the low 32 bits, the program in the high 32 bits. The
//! normal, shadow and cube-shadow caches are disjoint because the same pair
//! compiles to different pipelines in each.
//!
//! Lookups take the shared side of a [`SpinRwLock`]. Misses take the
//! exclusive side and check again before building, so concurrent recorders
//! asking for the same pipeline build it once.

use std::collections::HashMap;
use std::sync::Arc;

use umbra_core::SpinRwLock;

use crate::backend::{GpuBackend, GpuPipeline, PipelineDescriptor};
use crate::deletion::{DeferredResource, DeletionQueue};
use crate::error::GraphicsError;
use crate::program::RenderProgram;
use crate::resources::{ProgramHandle, RenderTexture, RenderTextureHandle};
use crate::scene::PresentTarget;
use crate::types::{ProgramFlags, TextureFormat};

/// Pack a (target, program) pair into a cache key.
pub fn pipeline_key(target: RenderTextureHandle, program: ProgramHandle) -> u64 {
    u64::from(target.raw()) | (u64::from(program.raw()) << 32)
}

pub fn key_program(key: u64) -> ProgramHandle {
    ProgramHandle::from_raw((key >> 32) as u32)
}

pub fn key_target(key: u64) -> RenderTextureHandle {
    RenderTextureHandle::from_raw(key as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineVariant {
    /// Color passes.
    Normal,
    /// Depth-only 2D shadow maps, with depth bias.
    Shadow,
    /// Depth-only cube faces. Winding is mirrored, so culling flips.
    CubeShadow,
}

impl PipelineVariant {
    pub const ALL: [Self; 3] = [Self::Normal, Self::Shadow, Self::CubeShadow];

    fn index(self) -> usize {
        match self {
            Self::Normal => 0,
            Self::Shadow => 1,
            Self::CubeShadow => 2,
        }
    }

    pub fn is_shadow(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// Attachment formats a pipeline must be compatible with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
}

impl TargetInfo {
    pub fn from_render_texture(target: &RenderTexture) -> Self {
        Self {
            color_formats: target.color_formats(),
            depth_format: target.depth_format,
        }
    }

    pub fn from_present(present: &PresentTarget) -> Self {
        Self {
            color_formats: vec![present.format],
            depth_format: None,
        }
    }

    pub fn attachment_count(&self) -> usize {
        self.color_formats.len() + usize::from(self.depth_format.is_some())
    }
}

/// Compile `program` for `target` in the given variant.
pub fn build_pipeline(
    backend: &dyn GpuBackend,
    program: &RenderProgram,
    variant: PipelineVariant,
    target: &TargetInfo,
) -> Result<GpuPipeline, GraphicsError> {
    let desc = &program.desc;
    let depth_test =
        target.depth_format.is_some() && !desc.flags.contains(ProgramFlags::NO_DEPTH_TEST);

    let descriptor = match variant {
        PipelineVariant::Normal => PipelineDescriptor {
            label: "material",
            vertex: &program.vertex,
            pixel: program.pixel.as_deref(),
            layout: program.shader_data.normal.pipeline_layout(),
            vertex_layout: desc.vertex_layout,
            vertex_stride: desc.stride(),
            topology: desc.primitive,
            cull_mode: desc.cull_mode,
            blend: desc.blend_mode,
            color_formats: &target.color_formats,
            depth_format: target.depth_format,
            depth_test,
            depth_write: depth_test
                && desc.blend_mode.is_opaque()
                && !desc.flags.contains(ProgramFlags::NO_DEPTH_WRITE),
            depth_bias: false,
        },
        PipelineVariant::Shadow | PipelineVariant::CubeShadow => {
            if target.depth_format.is_none() {
                return Err(GraphicsError::InvalidParameter(
                    "shadow pipelines need a depth attachment".to_string(),
                ));
            }
            let cull_mode = if variant == PipelineVariant::CubeShadow {
                desc.cull_mode.flipped()
            } else {
                desc.cull_mode
            };
            PipelineDescriptor {
                label: "shadow",
                vertex: program.shadow_vertex.as_deref().unwrap_or(&program.vertex),
                pixel: None,
                layout: program.shader_data.shadow_layout().pipeline_layout(),
                vertex_layout: desc.vertex_layout,
                vertex_stride: desc.stride(),
                topology: desc.primitive,
                cull_mode,
                blend: desc.blend_mode,
                color_formats: &[],
                depth_format: target.depth_format,
                depth_test: true,
                depth_write: true,
                depth_bias: true,
            }
        }
    };

    backend.create_graphics_pipeline(&descriptor)
}

type PipelineMap = HashMap<u64, Arc<GpuPipeline>>;

/// The three pipeline caches.
#[derive(Default)]
pub struct PipelineCache {
    caches: [SpinRwLock<PipelineMap>; 3],
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache(&self, variant: PipelineVariant) -> &SpinRwLock<PipelineMap> {
        &self.caches[variant.index()]
    }

    pub fn get(&self, variant: PipelineVariant, key: u64) -> Option<Arc<GpuPipeline>> {
        self.cache(variant).read().get(&key).cloned()
    }

    pub fn contains(&self, variant: PipelineVariant, key: u64) -> bool {
        self.cache(variant).read().contains_key(&key)
    }

    /// Cached pipeline for `key`, built with `build` on a miss.
    pub fn get_or_create(
        &self,
        variant: PipelineVariant,
        key: u64,
        build: impl FnOnce() -> Result<GpuPipeline, GraphicsError>,
    ) -> Result<Arc<GpuPipeline>, GraphicsError> {
        if let Some(pipeline) = self.get(variant, key) {
            return Ok(pipeline);
        }

        let mut cache = self.cache(variant).write();
        if let Some(pipeline) = cache.get(&key) {
            return Ok(pipeline.clone());
        }
        log::debug!(
            "Building {:?} pipeline for program {:?}, target {:?}",
            variant,
            key_program(key),
            key_target(key)
        );
        let pipeline = Arc::new(build()?);
        cache.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Remove every entry matching `pred`, queueing the pipelines for
    /// deletion.
    fn evict(&self, deletion: &DeletionQueue, pred: impl Fn(u64) -> bool) -> usize {
        let mut evicted = 0;
        for cache in &self.caches {
            let mut cache = cache.write();
            let keys: Vec<u64> = cache.keys().copied().filter(|key| pred(*key)).collect();
            for key in keys {
                if let Some(pipeline) = cache.remove(&key) {
                    deletion.queue(DeferredResource::Pipeline(pipeline));
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Drop every pipeline built for `program`, in all three caches.
    pub fn evict_program(&self, program: ProgramHandle, deletion: &DeletionQueue) -> usize {
        self.evict(deletion, |key| key_program(key) == program)
    }

    /// Drop every pipeline built for `target`, whose handle is being reused.
    pub fn evict_target(&self, target: RenderTextureHandle, deletion: &DeletionQueue) -> usize {
        self.evict(deletion, |key| key_target(key) == target)
    }

    pub fn clear(&self, deletion: &DeletionQueue) -> usize {
        self.evict(deletion, |_| true)
    }

    pub fn len(&self, variant: PipelineVariant) -> usize {
        self.cache(variant).read().len()
    }

    pub fn is_empty(&self) -> bool {
        PipelineVariant::ALL
            .iter()
            .all(|variant| self.len(*variant) == 0)
    }
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache")
            .field("normal", &self.len(PipelineVariant::Normal))
            .field("shadow", &self.len(PipelineVariant::Shadow))
            .field("cube_shadow", &self.len(PipelineVariant::CubeShadow))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::DummyBackend;
    use crate::program::RenderProgramDesc;
    use crate::resources::Shader;
    use crate::types::{CullMode, ShaderStage};

    struct Fixture {
        backend: DummyBackend,
        program: RenderProgram,
        target: TargetInfo,
    }

    fn fixture() -> Fixture {
        let backend = DummyBackend::new();
        let vertex = Shader {
            stage: ShaderStage::Vertex,
            module: Arc::new(backend.create_shader_module(ShaderStage::Vertex, &[1]).unwrap()),
            inputs: Vec::new(),
        };
        let program =
            RenderProgram::build(&backend, RenderProgramDesc::default(), &vertex, None, None, 1, 4)
                .unwrap();
        Fixture {
            backend,
            program,
            target: TargetInfo {
                color_formats: vec![TextureFormat::Rgba16Float],
                depth_format: Some(TextureFormat::Depth32Float),
            },
        }
    }

    fn build(
        fixture: &Fixture,
        variant: PipelineVariant,
    ) -> impl FnOnce() -> Result<GpuPipeline, GraphicsError> + '_ {
        move || build_pipeline(&fixture.backend, &fixture.program, variant, &fixture.target)
    }

    fn key(target: u32, program: u32) -> u64 {
        pipeline_key(
            RenderTextureHandle::from_raw(target),
            ProgramHandle::from_raw(program),
        )
    }

    #[test]
    fn test_key_layout() {
        let k = key(7, 3);
        assert_eq!(k, 7 | (3 << 32));
        assert_eq!(key_target(k).raw(), 7);
        assert_eq!(key_program(k).raw(), 3);
        assert_eq!(key_target(key(u32::MAX, 1)), RenderTextureHandle::NULL);
    }

    #[test]
    fn test_same_key_same_pipeline() {
        let f = fixture();
        let cache = PipelineCache::new();
        let normal = PipelineVariant::Normal;
        let a = cache.get_or_create(normal, key(1, 2), build(&f, normal)).unwrap();
        let b = cache
            .get_or_create(normal, key(1, 2), || panic!("cached pipeline rebuilt"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other_target = cache.get_or_create(normal, key(4, 2), build(&f, normal)).unwrap();
        let other_program = cache.get_or_create(normal, key(1, 5), build(&f, normal)).unwrap();
        assert!(!Arc::ptr_eq(&a, &other_target));
        assert!(!Arc::ptr_eq(&a, &other_program));
        assert_eq!(f.backend.stats().pipelines_created, 3);
    }

    #[test]
    fn test_variants_are_disjoint() {
        let f = fixture();
        let cache = PipelineCache::new();
        let shadow = PipelineVariant::Shadow;
        cache.get_or_create(shadow, key(1, 2), build(&f, shadow)).unwrap();
        assert!(!cache.contains(PipelineVariant::Normal, key(1, 2)));
        assert!(!cache.contains(PipelineVariant::CubeShadow, key(1, 2)));
    }

    #[test]
    fn test_shadow_needs_depth() {
        let mut f = fixture();
        f.target.depth_format = None;
        let err = build_pipeline(&f.backend, &f.program, PipelineVariant::Shadow, &f.target);
        assert!(matches!(err, Err(GraphicsError::InvalidParameter(_))));
        assert!(build_pipeline(&f.backend, &f.program, PipelineVariant::Normal, &f.target).is_ok());
    }

    #[test]
    fn test_evict_program_clears_all_caches() {
        let f = fixture();
        let cache = PipelineCache::new();
        let deletion = DeletionQueue::new(2);
        for variant in PipelineVariant::ALL {
            for target in 0..3 {
                for program in [2, 9] {
                    cache
                        .get_or_create(variant, key(target, program), build(&f, variant))
                        .unwrap();
                }
            }
        }

        assert_eq!(cache.evict_program(ProgramHandle::from_raw(2), &deletion), 9);
        for variant in PipelineVariant::ALL {
            for target in 0..3 {
                assert!(cache.get(variant, key(target, 2)).is_none());
                assert!(cache.get(variant, key(target, 9)).is_some());
            }
        }
        assert_eq!(deletion.pending(), 9);
    }

    #[test]
    fn test_evict_target() {
        let f = fixture();
        let cache = PipelineCache::new();
        let deletion = DeletionQueue::new(1);
        let normal = PipelineVariant::Normal;
        cache.get_or_create(normal, key(3, 1), build(&f, normal)).unwrap();
        cache.get_or_create(normal, key(4, 1), build(&f, normal)).unwrap();
        assert_eq!(cache.evict_target(RenderTextureHandle::from_raw(3), &deletion), 1);
        assert!(cache.contains(normal, key(4, 1)));
        assert!(!cache.contains(normal, key(3, 1)));
    }

    #[test]
    fn test_concurrent_misses_build_once() {
        let f = fixture();
        let cache = PipelineCache::new();
        let builds = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    cache
                        .get_or_create(PipelineVariant::Normal, key(0, 0), || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            build(&f, PipelineVariant::Normal)()
                        })
                        .unwrap();
                });
            }
        });
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cube_shadow_flips_culling() {
        assert_eq!(CullMode::Back.flipped(), CullMode::Front);
        let f = fixture();
        assert!(build_pipeline(&f.backend, &f.program, PipelineVariant::CubeShadow, &f.target).is_ok());
    }
}
