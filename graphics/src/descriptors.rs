//! Per-frame descriptor sets and transient buffers.
//!
//! Every descriptor set a pass binds is allocated fresh from the
//! [`PushDescriptorPool`] of the frame being recorded and forgotten
//! afterwards; the whole frame's allocations are released at once when the
//! frame index is reused. [`TransientBuffers`] does the same for the
//! uniform and storage buffers that carry per-draw data.
//!
//! Neither ever blocks on capacity. Both grow instead.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{
    GpuBackend, GpuBuffer, GpuDescriptorPool, GpuDescriptorSet, GpuDescriptorSetLayout,
};
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferUsage, DescriptorKind};

struct SubPool {
    kind: DescriptorKind,
    pool: GpuDescriptorPool,
    capacity: u32,
    allocated: u32,
}

impl SubPool {
    fn fits(&self, kind: DescriptorKind, count: u32) -> bool {
        self.kind == kind && self.allocated + count <= self.capacity
    }
}

/// Descriptor sub-pools of one kind each, per flight frame.
pub struct PushDescriptorPool {
    frames: Vec<Mutex<Vec<SubPool>>>,
    sub_pool_capacity: u32,
}

impl PushDescriptorPool {
    pub fn new(flight_frames: u32, sub_pool_capacity: u32) -> Self {
        Self {
            frames: (0..flight_frames.max(1))
                .map(|_| Mutex::new(Vec::new()))
                .collect(),
            sub_pool_capacity: sub_pool_capacity.max(1),
        }
    }

    fn frame(&self, frame: u32) -> &Mutex<Vec<SubPool>> {
        &self.frames[frame as usize % self.frames.len()]
    }

    /// Allocate a set holding `count` descriptors of `kind`.
    ///
    /// Scans the frame's sub-pools for one with room and appends a new
    /// sub-pool when none has. A single request larger than the sub-pool
    /// capacity gets a sub-pool sized to fit it.
    pub fn allocate(
        &self,
        backend: &dyn GpuBackend,
        frame: u32,
        kind: DescriptorKind,
        layout: &GpuDescriptorSetLayout,
        count: u32,
    ) -> Result<GpuDescriptorSet, GraphicsError> {
        let count = count.max(1);
        let mut sub_pools = self.frame(frame).lock();

        let index = match sub_pools.iter().position(|sub| sub.fits(kind, count)) {
            Some(index) => index,
            None => {
                let capacity = self.sub_pool_capacity.max(count);
                log::debug!(
                    "Growing descriptor pool of frame {}: new {:?} sub-pool x{}",
                    frame,
                    kind,
                    capacity
                );
                let pool = backend.create_descriptor_pool(kind, capacity)?;
                sub_pools.push(SubPool {
                    kind,
                    pool,
                    capacity,
                    allocated: 0,
                });
                sub_pools.len() - 1
            }
        };

        let sub = &mut sub_pools[index];
        let set = backend.allocate_descriptor_set(&sub.pool, layout)?;
        sub.allocated += count;
        Ok(set)
    }

    /// Release every set allocated for `frame`. Must not run while the frame
    /// is being recorded.
    pub fn reset(&self, backend: &dyn GpuBackend, frame: u32) -> Result<(), GraphicsError> {
        for sub in self.frame(frame).lock().iter_mut() {
            if sub.allocated > 0 {
                backend.reset_descriptor_pool(&sub.pool)?;
                sub.allocated = 0;
            }
        }
        Ok(())
    }

    pub fn sub_pool_count(&self, frame: u32) -> usize {
        self.frame(frame).lock().len()
    }

    /// Descriptors currently allocated for `frame`.
    pub fn allocated(&self, frame: u32) -> u32 {
        self.frame(frame).lock().iter().map(|sub| sub.allocated).sum()
    }
}

impl std::fmt::Debug for PushDescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushDescriptorPool")
            .field("flight_frames", &self.frames.len())
            .field("sub_pool_capacity", &self.sub_pool_capacity)
            .finish_non_exhaustive()
    }
}

/// Kinds of single-use uniform buffers handed out per draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    /// Camera data beyond the command's own camera buffer (shadow views,
    /// re-binds at a different extent).
    Camera,
    AmbientLight,
    DirectionalLight,
    PointLight,
    SpotLight,
    /// Per-face and per-split shadow views.
    Shadow,
}

impl UniformKind {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        match self {
            Self::Camera => 0,
            Self::AmbientLight => 1,
            Self::DirectionalLight => 2,
            Self::PointLight => 3,
            Self::SpotLight => 4,
            Self::Shadow => 5,
        }
    }
}

/// Round-robin buffers reused every time their frame index comes back.
#[derive(Default)]
struct BufferCache {
    buffers: Vec<Arc<GpuBuffer>>,
    cursor: usize,
}

impl BufferCache {
    fn acquire(
        &mut self,
        backend: &dyn GpuBackend,
        usage: BufferUsage,
        min_size: u64,
        data: &[u8],
    ) -> Result<Arc<GpuBuffer>, GraphicsError> {
        let size = min_size.max(data.len() as u64).max(16);
        if self.cursor == self.buffers.len() {
            let buffer = backend.create_buffer(&BufferDescriptor::new(size, usage))?;
            self.buffers.push(Arc::new(buffer));
        } else if self.buffers[self.cursor].size() < data.len() as u64 {
            // The old buffer belongs to a finished use of this frame slot.
            let buffer = backend.create_buffer(&BufferDescriptor::new(size, usage))?;
            self.buffers[self.cursor] = Arc::new(buffer);
        }
        let buffer = self.buffers[self.cursor].clone();
        self.cursor += 1;
        backend.write_buffer(&buffer, 0, data)?;
        Ok(buffer)
    }
}

#[derive(Default)]
struct FrameBuffers {
    uniforms: [BufferCache; UniformKind::COUNT],
    storage: BufferCache,
}

/// Uniform and storage buffers written once and bound by a single draw.
pub struct TransientBuffers {
    frames: Vec<Mutex<FrameBuffers>>,
    storage_block_size: u64,
}

impl TransientBuffers {
    pub fn new(flight_frames: u32, storage_block_size: u64) -> Self {
        Self {
            frames: (0..flight_frames.max(1))
                .map(|_| Mutex::new(FrameBuffers::default()))
                .collect(),
            storage_block_size,
        }
    }

    fn frame(&self, frame: u32) -> &Mutex<FrameBuffers> {
        &self.frames[frame as usize % self.frames.len()]
    }

    /// A uniform buffer of `kind` holding `data`.
    pub fn uniform(
        &self,
        backend: &dyn GpuBackend,
        frame: u32,
        kind: UniformKind,
        data: &[u8],
    ) -> Result<Arc<GpuBuffer>, GraphicsError> {
        self.frame(frame).lock().uniforms[kind.index()].acquire(
            backend,
            BufferUsage::UNIFORM,
            0,
            data,
        )
    }

    /// A storage buffer holding `data`, at least one storage block large.
    pub fn storage(
        &self,
        backend: &dyn GpuBackend,
        frame: u32,
        data: &[u8],
    ) -> Result<Arc<GpuBuffer>, GraphicsError> {
        self.frame(frame).lock().storage.acquire(
            backend,
            BufferUsage::STORAGE,
            self.storage_block_size,
            data,
        )
    }

    /// Rewind every cache of `frame` to its first buffer.
    pub fn reset(&self, frame: u32) {
        let mut buffers = self.frame(frame).lock();
        for cache in buffers.uniforms.iter_mut() {
            cache.cursor = 0;
        }
        buffers.storage.cursor = 0;
    }

    /// Buffers held by `frame` for `kind`.
    pub fn uniform_len(&self, frame: u32, kind: UniformKind) -> usize {
        self.frame(frame).lock().uniforms[kind.index()].buffers.len()
    }

    pub fn storage_len(&self, frame: u32) -> usize {
        self.frame(frame).lock().storage.buffers.len()
    }
}

impl std::fmt::Debug for TransientBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientBuffers")
            .field("flight_frames", &self.frames.len())
            .field("storage_block_size", &self.storage_block_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::backend::{DescriptorBinding, DummyBackend};
    use crate::types::ShaderStageFlags;

    fn texture_layout(backend: &DummyBackend) -> GpuDescriptorSetLayout {
        backend
            .create_descriptor_set_layout(&DescriptorBinding {
                kind: DescriptorKind::Texture,
                count: 1,
                stages: ShaderStageFlags::PIXEL,
            })
            .unwrap()
    }

    #[rstest]
    #[case::exactly_capacity(8, 0)]
    #[case::one_over(9, 1)]
    #[case::double(16, 1)]
    #[case::double_plus_one(17, 2)]
    fn test_growth_after_reset(#[case] allocations: u32, #[case] new_sub_pools: usize) {
        let backend = DummyBackend::new();
        let layout = texture_layout(&backend);
        let pool = PushDescriptorPool::new(2, 8);

        // Warm up one sub-pool, then reset like a new frame would.
        for _ in 0..8 {
            pool.allocate(&backend, 0, DescriptorKind::Texture, &layout, 1)
                .unwrap();
        }
        pool.reset(&backend, 0).unwrap();
        assert_eq!(pool.allocated(0), 0);

        for _ in 0..allocations {
            pool.allocate(&backend, 0, DescriptorKind::Texture, &layout, 1)
                .unwrap();
        }
        assert_eq!(pool.sub_pool_count(0), 1 + new_sub_pools);
    }

    #[test]
    fn test_kinds_use_separate_sub_pools() {
        let backend = DummyBackend::new();
        let layout = texture_layout(&backend);
        let pool = PushDescriptorPool::new(1, 8);
        pool.allocate(&backend, 0, DescriptorKind::Texture, &layout, 1)
            .unwrap();
        pool.allocate(&backend, 0, DescriptorKind::Uniform, &layout, 1)
            .unwrap();
        assert_eq!(pool.sub_pool_count(0), 2);
    }

    #[test]
    fn test_oversized_request_gets_its_own_sub_pool() {
        let backend = DummyBackend::new();
        let layout = texture_layout(&backend);
        let pool = PushDescriptorPool::new(1, 4);
        pool.allocate(&backend, 0, DescriptorKind::Texture, &layout, 6)
            .unwrap();
        assert_eq!(pool.sub_pool_count(0), 1);
        assert_eq!(pool.allocated(0), 6);
    }

    #[test]
    fn test_frames_are_independent() {
        let backend = DummyBackend::new();
        let layout = texture_layout(&backend);
        let pool = PushDescriptorPool::new(2, 4);
        pool.allocate(&backend, 1, DescriptorKind::Texture, &layout, 1)
            .unwrap();
        assert_eq!(pool.sub_pool_count(0), 0);
        assert_eq!(pool.sub_pool_count(1), 1);
    }

    #[test]
    fn test_uniform_cache_grows_only_past_cursor() {
        let backend = DummyBackend::new();
        let buffers = TransientBuffers::new(2, 1024);
        let data = [1u8; 64];

        for _ in 0..3 {
            buffers
                .uniform(&backend, 0, UniformKind::PointLight, &data)
                .unwrap();
        }
        assert_eq!(buffers.uniform_len(0, UniformKind::PointLight), 3);

        buffers.reset(0);
        let first = buffers
            .uniform(&backend, 0, UniformKind::PointLight, &data)
            .unwrap();
        assert_eq!(buffers.uniform_len(0, UniformKind::PointLight), 3);
        assert_eq!(first.dummy_contents()[..64], data);
        assert_eq!(buffers.uniform_len(0, UniformKind::SpotLight), 0);
    }

    #[test]
    fn test_storage_replaces_small_buffers() {
        let backend = DummyBackend::new();
        let buffers = TransientBuffers::new(1, 64);
        let small = buffers.storage(&backend, 0, &[0u8; 32]).unwrap();
        assert_eq!(small.size(), 64);

        buffers.reset(0);
        let large = buffers.storage(&backend, 0, &[7u8; 256]).unwrap();
        assert_eq!(large.size(), 256);
        assert_eq!(buffers.storage_len(0), 1);
    }
}
