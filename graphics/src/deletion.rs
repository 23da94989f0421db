//! Deferred destruction of GPU-backed resources.
//!
//! A resource destroyed through the renderer API may still be referenced by
//! command buffers of frames the GPU has not finished. Instead of dropping
//! it immediately it is queued under the flight frame that was current when
//! it was destroyed, and dropped when that frame index comes around again
//! (the embedder guarantees the slot is GPU-idle before calling
//! [`Renderer::update`](crate::Renderer::update) for it).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::backend::{GpuBuffer, GpuPipeline};
use crate::program::RenderProgram;
use crate::resources::{
    DepthCubeRenderTexture, DepthRenderTexture, Model, RenderTexture, Shader, Texture,
    TextureSampler, VideoTexture,
};

/// A resource waiting for the GPU to finish with it.
#[derive(Debug)]
pub enum DeferredResource {
    Program(RenderProgram),
    Shader(Shader),
    Model(Model),
    Texture(Texture),
    Sampler(TextureSampler),
    RenderTexture(RenderTexture),
    DepthTexture(DepthRenderTexture),
    DepthCube(DepthCubeRenderTexture),
    Video(VideoTexture),
    Pipeline(Arc<GpuPipeline>),
    Buffer(Arc<GpuBuffer>),
}

impl DeferredResource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Program(_) => "program",
            Self::Shader(_) => "shader",
            Self::Model(_) => "model",
            Self::Texture(_) => "texture",
            Self::Sampler(_) => "sampler",
            Self::RenderTexture(_) => "render texture",
            Self::DepthTexture(_) => "depth texture",
            Self::DepthCube(_) => "depth cube texture",
            Self::Video(_) => "video texture",
            Self::Pipeline(_) => "pipeline",
            Self::Buffer(_) => "buffer",
        }
    }
}

/// Per-flight-frame lists of resources to drop.
#[derive(Debug)]
pub struct DeletionQueue {
    frames: Vec<Mutex<Vec<DeferredResource>>>,
    current: AtomicUsize,
}

impl DeletionQueue {
    pub fn new(flight_frames: u32) -> Self {
        Self {
            frames: (0..flight_frames.max(1))
                .map(|_| Mutex::new(Vec::new()))
                .collect(),
            current: AtomicUsize::new(0),
        }
    }

    /// Queue a resource under the current frame.
    pub fn queue(&self, resource: DeferredResource) {
        let frame = self.current.load(Ordering::Acquire);
        log::trace!("Queued {} for deletion in frame {}", resource.kind(), frame);
        self.frames[frame].lock().push(resource);
    }

    /// Make `frame` current and drop everything queued the last time it was.
    ///
    /// Returns how many resources were dropped.
    pub fn begin_frame(&self, frame: u32) -> usize {
        let index = frame as usize % self.frames.len();
        self.current.store(index, Ordering::Release);
        let drained = std::mem::take(&mut *self.frames[index].lock());
        let count = drained.len();
        if count > 0 {
            log::debug!("Dropping {} deferred resources of frame {}", count, index);
        }
        count
    }

    /// Drop everything. Only valid once the device is idle.
    pub fn flush_all(&self) -> usize {
        self.frames
            .iter()
            .map(|frame| std::mem::take(&mut *frame.lock()).len())
            .sum()
    }

    pub fn pending(&self) -> usize {
        self.frames.iter().map(|frame| frame.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::types::{BufferDescriptor, BufferUsage};

    fn buffer(backend: &DummyBackend) -> DeferredResource {
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM))
            .unwrap();
        DeferredResource::Buffer(Arc::new(buffer))
    }

    #[test]
    fn test_resources_wait_for_their_frame() {
        let backend = DummyBackend::new();
        let queue = DeletionQueue::new(3);

        queue.begin_frame(1);
        queue.queue(buffer(&backend));
        assert_eq!(backend.stats().live_objects, 1);

        assert_eq!(queue.begin_frame(2), 0);
        assert_eq!(queue.begin_frame(0), 0);
        assert_eq!(backend.stats().live_objects, 1);

        assert_eq!(queue.begin_frame(1), 1);
        assert_eq!(backend.stats().live_objects, 0);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_flush_all() {
        let backend = DummyBackend::new();
        let queue = DeletionQueue::new(2);
        queue.queue(buffer(&backend));
        queue.begin_frame(1);
        queue.queue(buffer(&backend));

        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.flush_all(), 2);
        assert_eq!(backend.stats().live_objects, 0);
    }
}
