//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. Every object it hands
//! out carries a unique id and is counted while alive, buffers keep their
//! contents in memory, and command buffers record a [`RecordedCommand`] log.
//! Together that lets tests check what the renderer recorded and that it
//! released everything it created.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::DepthBias;
use crate::error::GraphicsError;
use crate::gpu_failure;
use crate::types::{
    BufferDescriptor, DescriptorKind, ImageDescriptor, LoadMode, SamplerDescriptor, ScissorRect,
    ShaderStage, ShaderStageFlags, Viewport,
};

use super::{
    DescriptorBinding, DescriptorWrite, GpuBackend, GpuBuffer, GpuCommandBuffer, GpuCommandPool,
    GpuDescriptorPool, GpuDescriptorSet, GpuDescriptorSetLayout, GpuImage, GpuPipeline,
    GpuPipelineLayout, GpuSampler, GpuShaderModule, ImageInfo, PipelineDescriptor,
    PushConstantRange, RenderingInfo,
};

/// Identity of an object created by the dummy backend.
///
/// Dropping it decrements the backend's live-object count.
pub struct DummyObject {
    id: u64,
    live: Arc<AtomicUsize>,
}

impl DummyObject {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for DummyObject {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for DummyObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DummyObject({})", self.id)
    }
}

/// A command captured by a dummy command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRendering {
        color_attachments: Vec<u64>,
        depth_attachment: Option<u64>,
        layer: Option<u32>,
        load: LoadMode,
        width: u32,
        height: u32,
    },
    EndRendering,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetDepthBias(DepthBias),
    BindPipeline(u64),
    BindDescriptorSet {
        slot: u32,
        set: u64,
    },
    PushConstants {
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffer(u64),
    BindIndexBuffer(u64),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Blit {
        src: u64,
        dst: u64,
    },
    CopyBufferToImage {
        buffer: u64,
        image: u64,
    },
}

impl RecordedCommand {
    pub fn is_draw(&self) -> bool {
        matches!(self, Self::Draw { .. } | Self::DrawIndexed { .. })
    }
}

/// Counters exposed for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Objects created and not yet dropped.
    pub live_objects: usize,
    pub pipelines_created: usize,
    pub descriptor_pools_created: usize,
    pub descriptor_sets_allocated: usize,
}

/// Dummy GPU backend.
#[derive(Debug, Default)]
pub struct DummyBackend {
    next_id: AtomicU64,
    live: Arc<AtomicUsize>,
    pipelines_created: AtomicUsize,
    descriptor_pools_created: AtomicUsize,
    descriptor_sets_allocated: AtomicUsize,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    pub fn stats(&self) -> DummyStats {
        DummyStats {
            live_objects: self.live.load(Ordering::Acquire),
            pipelines_created: self.pipelines_created.load(Ordering::Acquire),
            descriptor_pools_created: self.descriptor_pools_created.load(Ordering::Acquire),
            descriptor_sets_allocated: self.descriptor_sets_allocated.load(Ordering::Acquire),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn object(&self) -> DummyObject {
        self.live.fetch_add(1, Ordering::AcqRel);
        DummyObject {
            id: self.next_id(),
            live: self.live.clone(),
        }
    }

    fn record(&self, cmd: &GpuCommandBuffer, command: RecordedCommand) {
        match cmd {
            GpuCommandBuffer::Dummy { log, .. } => {
                log::trace!("DummyBackend: {:?}", command);
                log.lock().push(command);
            }
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { .. } => {
                log::error!("DummyBackend: asked to record into a Vulkan command buffer");
            }
        }
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        Ok(GpuBuffer::Dummy {
            object: self.object(),
            data: Mutex::new(vec![0; descriptor.size as usize]),
        })
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        match buffer {
            GpuBuffer::Dummy { data: contents, .. } => {
                let mut contents = contents.lock();
                let start = offset as usize;
                let end = start + data.len();
                if end > contents.len() {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "write of {} bytes at {} overflows buffer of {} bytes",
                        data.len(),
                        offset,
                        contents.len()
                    )));
                }
                contents[start..end].copy_from_slice(data);
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            GpuBuffer::Vulkan { .. } => Err(GraphicsError::InvalidParameter(
                "DummyBackend cannot write a Vulkan buffer".to_string(),
            )),
        }
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, GraphicsError> {
        log::trace!(
            "DummyBackend: creating image {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.layers
        );
        if descriptor.cube && descriptor.layers != 6 {
            return Err(GraphicsError::InvalidParameter(
                "cube images need exactly 6 layers".to_string(),
            ));
        }
        Ok(GpuImage::Dummy {
            object: self.object(),
            info: ImageInfo::from(descriptor),
        })
    }

    fn upload_image(&self, image: &GpuImage, data: &[u8]) -> Result<(), GraphicsError> {
        let info = image.info();
        let expected = info.width as u64
            * info.height as u64
            * info.layers as u64
            * info.format.block_size() as u64;
        if (data.len() as u64) < expected {
            return Err(GraphicsError::InvalidParameter(format!(
                "image upload needs {} bytes, got {}",
                expected,
                data.len()
            )));
        }
        log::trace!("DummyBackend: upload_image len={}", data.len());
        Ok(())
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError> {
        log::trace!("DummyBackend: creating sampler {:?}", descriptor.label);
        Ok(GpuSampler::Dummy(self.object()))
    }

    fn create_shader_module(
        &self,
        stage: ShaderStage,
        spirv: &[u32],
    ) -> Result<GpuShaderModule, GraphicsError> {
        if spirv.is_empty() {
            return Err(gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "empty {:?} shader module",
                stage
            ))));
        }
        Ok(GpuShaderModule::Dummy(self.object()))
    }

    fn create_descriptor_set_layout(
        &self,
        binding: &DescriptorBinding,
    ) -> Result<GpuDescriptorSetLayout, GraphicsError> {
        Ok(GpuDescriptorSetLayout::Dummy {
            object: self.object(),
            binding: *binding,
        })
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[&GpuDescriptorSetLayout],
        push_constants: &[PushConstantRange],
    ) -> Result<GpuPipelineLayout, GraphicsError> {
        log::trace!(
            "DummyBackend: pipeline layout with {} sets, {} push ranges",
            set_layouts.len(),
            push_constants.len()
        );
        Ok(GpuPipelineLayout::Dummy(self.object()))
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &PipelineDescriptor<'_>,
    ) -> Result<GpuPipeline, GraphicsError> {
        log::trace!(
            "DummyBackend: creating pipeline {} ({} color, depth {:?})",
            descriptor.label,
            descriptor.color_formats.len(),
            descriptor.depth_format
        );
        self.pipelines_created.fetch_add(1, Ordering::AcqRel);
        Ok(GpuPipeline::Dummy(self.object()))
    }

    fn create_descriptor_pool(
        &self,
        kind: DescriptorKind,
        capacity: u32,
    ) -> Result<GpuDescriptorPool, GraphicsError> {
        log::trace!("DummyBackend: descriptor pool {:?} x{}", kind, capacity);
        self.descriptor_pools_created.fetch_add(1, Ordering::AcqRel);
        Ok(GpuDescriptorPool::Dummy(self.object()))
    }

    fn reset_descriptor_pool(&self, _pool: &GpuDescriptorPool) -> Result<(), GraphicsError> {
        Ok(())
    }

    fn allocate_descriptor_set(
        &self,
        _pool: &GpuDescriptorPool,
        _layout: &GpuDescriptorSetLayout,
    ) -> Result<GpuDescriptorSet, GraphicsError> {
        self.descriptor_sets_allocated
            .fetch_add(1, Ordering::AcqRel);
        Ok(GpuDescriptorSet::Dummy(self.next_id()))
    }

    fn write_descriptor_set(&self, set: &GpuDescriptorSet, write: &DescriptorWrite<'_>) {
        log::trace!("DummyBackend: write {:?} into set {}", write.kind(), set.id());
    }

    fn create_command_pool(&self) -> Result<GpuCommandPool, GraphicsError> {
        Ok(GpuCommandPool::Dummy(self.object()))
    }

    fn reset_command_pool(&self, _pool: &GpuCommandPool) -> Result<(), GraphicsError> {
        Ok(())
    }

    fn allocate_command_buffer(
        &self,
        _pool: &GpuCommandPool,
    ) -> Result<GpuCommandBuffer, GraphicsError> {
        Ok(GpuCommandBuffer::Dummy {
            object: self.object(),
            log: Mutex::new(Vec::new()),
        })
    }

    fn begin_command_buffer(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        // Beginning implicitly resets, as with a resettable Vulkan pool.
        if let GpuCommandBuffer::Dummy { log, .. } = cmd {
            log.lock().clear();
        }
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        Ok(())
    }

    fn cmd_begin_rendering(&self, cmd: &GpuCommandBuffer, info: &RenderingInfo<'_>) {
        self.record(
            cmd,
            RecordedCommand::BeginRendering {
                color_attachments: info.colors.iter().map(|image| image.id()).collect(),
                depth_attachment: info.depth.map(GpuImage::id),
                layer: info.layer,
                load: info.load,
                width: info.width,
                height: info.height,
            },
        );
    }

    fn cmd_end_rendering(&self, cmd: &GpuCommandBuffer) {
        self.record(cmd, RecordedCommand::EndRendering);
    }

    fn cmd_set_viewport(&self, cmd: &GpuCommandBuffer, viewport: Viewport) {
        self.record(cmd, RecordedCommand::SetViewport(viewport));
    }

    fn cmd_set_scissor(&self, cmd: &GpuCommandBuffer, scissor: ScissorRect) {
        self.record(cmd, RecordedCommand::SetScissor(scissor));
    }

    fn cmd_set_depth_bias(&self, cmd: &GpuCommandBuffer, bias: DepthBias) {
        self.record(cmd, RecordedCommand::SetDepthBias(bias));
    }

    fn cmd_bind_pipeline(&self, cmd: &GpuCommandBuffer, pipeline: &GpuPipeline) {
        self.record(cmd, RecordedCommand::BindPipeline(pipeline.id()));
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: &GpuCommandBuffer,
        _layout: &GpuPipelineLayout,
        slot: u32,
        set: &GpuDescriptorSet,
    ) {
        self.record(
            cmd,
            RecordedCommand::BindDescriptorSet {
                slot,
                set: set.id(),
            },
        );
    }

    fn cmd_push_constants(
        &self,
        cmd: &GpuCommandBuffer,
        _layout: &GpuPipelineLayout,
        _stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(
            cmd,
            RecordedCommand::PushConstants {
                offset,
                data: data.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffer(&self, cmd: &GpuCommandBuffer, buffer: &GpuBuffer) {
        self.record(cmd, RecordedCommand::BindVertexBuffer(buffer.id()));
    }

    fn cmd_bind_index_buffer(&self, cmd: &GpuCommandBuffer, buffer: &GpuBuffer) {
        self.record(cmd, RecordedCommand::BindIndexBuffer(buffer.id()));
    }

    fn cmd_draw(&self, cmd: &GpuCommandBuffer, vertex_count: u32, instance_count: u32) {
        self.record(
            cmd,
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn cmd_draw_indexed(&self, cmd: &GpuCommandBuffer, index_count: u32, instance_count: u32) {
        self.record(
            cmd,
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    fn cmd_blit(&self, cmd: &GpuCommandBuffer, src: &GpuImage, dst: &GpuImage) {
        self.record(
            cmd,
            RecordedCommand::Blit {
                src: src.id(),
                dst: dst.id(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(&self, cmd: &GpuCommandBuffer, src: &GpuBuffer, dst: &GpuImage) {
        self.record(
            cmd,
            RecordedCommand::CopyBufferToImage {
                buffer: src.id(),
                image: dst.id(),
            },
        );
    }

    fn wait_idle(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, TextureFormat};

    #[test]
    fn test_objects_are_counted_while_alive() {
        let backend = DummyBackend::new();
        let a = backend
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM))
            .unwrap();
        let b = backend
            .create_image(&ImageDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        assert_eq!(backend.stats().live_objects, 2);
        assert_ne!(a.id(), b.id());
        drop(a);
        drop(b);
        assert_eq!(backend.stats().live_objects, 0);
    }

    #[test]
    fn test_buffer_contents_round_trip() {
        let backend = DummyBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(8, BufferUsage::UNIFORM))
            .unwrap();
        backend.write_buffer(&buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.dummy_contents(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(backend.write_buffer(&buffer, 6, &[0; 4]).is_err());
    }

    #[test]
    fn test_begin_clears_log() {
        let backend = DummyBackend::new();
        let pool = backend.create_command_pool().unwrap();
        let cmd = backend.allocate_command_buffer(&pool).unwrap();
        backend.begin_command_buffer(&cmd).unwrap();
        backend.cmd_draw(&cmd, 4, 1);
        assert_eq!(cmd.recorded_draws().len(), 1);
        backend.begin_command_buffer(&cmd).unwrap();
        assert!(cmd.recorded().is_empty());
    }

    #[test]
    fn test_empty_shader_module_fails_creation() {
        let backend = DummyBackend::new();
        let err = backend
            .create_shader_module(ShaderStage::Pixel, &[])
            .unwrap_err();
        assert_eq!(
            err,
            GraphicsError::ResourceCreationFailed("empty Pixel shader module".to_string())
        );
        assert_eq!(backend.stats().live_objects, 0);
    }
}
