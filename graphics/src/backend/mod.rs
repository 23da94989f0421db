//! GPU backend abstraction layer.
//!
//! Every GPU object the renderer touches is one of the `Gpu*` enums below,
//! tagged with the backend that created it. Objects release their GPU
//! memory when dropped, so destroying one safely means keeping it alive
//! until the GPU is done with it (see [`crate::deletion`]).
//!
//! # Available Backends
//!
//! - `dummy` (always compiled): no GPU work; records commands into an
//!   inspectable log. Used by the test suite.
//! - `vulkan-backend`: native Vulkan through ash, with gpu-allocator memory
//!   and dynamic rendering.

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

use crate::config::DepthBias;
use crate::error::GraphicsError;
use crate::types::{
    BlendMode, BufferDescriptor, CullMode, DescriptorKind, ImageDescriptor, LoadMode,
    PrimitiveTopology, SamplerDescriptor, ScissorRect, ShaderStage, ShaderStageFlags,
    TextureFormat, VertexLayout, Viewport,
};

pub use dummy::{DummyBackend, DummyObject, DummyStats, RecordedCommand};

/// Shape of an image, shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
}

impl From<&ImageDescriptor> for ImageInfo {
    fn from(desc: &ImageDescriptor) -> Self {
        Self {
            width: desc.width,
            height: desc.height,
            layers: desc.layers,
            mip_levels: desc.mip_levels,
            format: desc.format,
        }
    }
}

/// A GPU buffer.
pub enum GpuBuffer {
    /// Dummy buffers keep their contents in memory so tests can inspect them.
    Dummy {
        object: DummyObject,
        data: Mutex<Vec<u8>>,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        buffer: vk::Buffer,
        allocation: Mutex<Option<Allocation>>,
        size: u64,
    },
}

impl GpuBuffer {
    pub fn size(&self) -> u64 {
        match self {
            Self::Dummy { data, .. } => data.lock().len() as u64,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { size, .. } => *size,
        }
    }

    /// Stable identity, used in command logs.
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { object, .. } => object.id(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, .. } => vk::Handle::as_raw(*buffer),
        }
    }

    /// Copy of the contents of a dummy buffer. Empty for real GPU buffers.
    pub fn dummy_contents(&self) -> Vec<u8> {
        match self {
            Self::Dummy { data, .. } => data.lock().clone(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { .. } => Vec::new(),
        }
    }
}

impl fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy { object, .. } => write!(f, "GpuBuffer::Dummy({})", object.id()),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

/// A GPU image with a full view plus one view per array layer.
pub enum GpuImage {
    Dummy {
        object: DummyObject,
        info: ImageInfo,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
        image: vk::Image,
        view: vk::ImageView,
        /// Single-layer views, empty for single-layer images.
        layer_views: Vec<vk::ImageView>,
        allocation: Mutex<Option<Allocation>>,
        /// False for images owned by the presentation layer.
        owned: bool,
        info: ImageInfo,
    },
}

impl GpuImage {
    pub fn info(&self) -> ImageInfo {
        match self {
            Self::Dummy { info, .. } => *info,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { info, .. } => *info,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { object, .. } => object.id(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { image, .. } => vk::Handle::as_raw(*image),
        }
    }
}

impl fmt::Debug for GpuImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy { object, info } => f
                .debug_struct("GpuImage::Dummy")
                .field("id", &object.id())
                .field("info", info)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                image, view, info, ..
            } => f
                .debug_struct("GpuImage::Vulkan")
                .field("image", image)
                .field("view", view)
                .field("info", info)
                .finish_non_exhaustive(),
        }
    }
}

/// Declares a GPU object enum whose Vulkan variant wraps a single handle
/// destroyed with `$destroy` on drop.
macro_rules! simple_gpu_object {
    ($(#[$meta:meta])* $name:ident, $field:ident: $vk_ty:ty, $destroy:ident) => {
        $(#[$meta])*
        pub enum $name {
            Dummy(DummyObject),
            #[cfg(feature = "vulkan-backend")]
            Vulkan {
                device: ash::Device,
                $field: $vk_ty,
            },
        }

        impl $name {
            pub fn id(&self) -> u64 {
                match self {
                    Self::Dummy(object) => object.id(),
                    #[cfg(feature = "vulkan-backend")]
                    Self::Vulkan { $field, .. } => vk::Handle::as_raw(*$field),
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    Self::Dummy(object) => {
                        write!(f, concat!(stringify!($name), "::Dummy({})"), object.id())
                    }
                    #[cfg(feature = "vulkan-backend")]
                    Self::Vulkan { $field, .. } => f
                        .debug_struct(concat!(stringify!($name), "::Vulkan"))
                        .field(stringify!($field), $field)
                        .finish_non_exhaustive(),
                }
            }
        }

        #[cfg(feature = "vulkan-backend")]
        impl Drop for $name {
            fn drop(&mut self) {
                if let Self::Vulkan { device, $field } = self {
                    // SAFETY: Objects are only dropped once the deletion queue
                    // has proven the GPU no longer uses them.
                    unsafe { device.$destroy(*$field, None) };
                }
            }
        }
    };
}

simple_gpu_object!(
    /// A texture sampler.
    GpuSampler, sampler: vk::Sampler, destroy_sampler
);
simple_gpu_object!(
    /// A compiled SPIR-V module.
    GpuShaderModule, module: vk::ShaderModule, destroy_shader_module
);
simple_gpu_object!(
    /// Pipeline layout: descriptor set layouts plus push-constant ranges.
    GpuPipelineLayout, layout: vk::PipelineLayout, destroy_pipeline_layout
);
simple_gpu_object!(
    /// A compiled graphics pipeline.
    GpuPipeline, pipeline: vk::Pipeline, destroy_pipeline
);
simple_gpu_object!(
    /// A descriptor pool holding a single descriptor kind.
    GpuDescriptorPool, pool: vk::DescriptorPool, destroy_descriptor_pool
);
simple_gpu_object!(
    /// A command pool. Freeing it frees its command buffers.
    GpuCommandPool, pool: vk::CommandPool, destroy_command_pool
);

/// A descriptor set layout with a single binding at index 0.
pub enum GpuDescriptorSetLayout {
    Dummy {
        object: DummyObject,
        binding: DescriptorBinding,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        layout: vk::DescriptorSetLayout,
        binding: DescriptorBinding,
    },
}

impl GpuDescriptorSetLayout {
    pub fn binding(&self) -> DescriptorBinding {
        match self {
            Self::Dummy { binding, .. } => *binding,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { binding, .. } => *binding,
        }
    }
}

impl fmt::Debug for GpuDescriptorSetLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuDescriptorSetLayout")
            .field("binding", &self.binding())
            .finish_non_exhaustive()
    }
}

/// A descriptor set. Sets are owned by their pool and freed when it resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuDescriptorSet {
    Dummy(u64),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vk::DescriptorSet),
}

impl GpuDescriptorSet {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy(id) => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan(set) => vk::Handle::as_raw(*set),
        }
    }
}

/// A primary command buffer.
pub enum GpuCommandBuffer {
    Dummy {
        object: DummyObject,
        log: Mutex<Vec<RecordedCommand>>,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan { buffer: vk::CommandBuffer },
}

impl GpuCommandBuffer {
    /// Raw handle for the submission layer.
    pub fn native_handle(&self) -> u64 {
        match self {
            Self::Dummy { object, .. } => object.id(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer } => vk::Handle::as_raw(*buffer),
        }
    }

    /// Commands recorded by the dummy backend since the last begin.
    pub fn recorded(&self) -> Vec<RecordedCommand> {
        match self {
            Self::Dummy { log, .. } => log.lock().clone(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { .. } => Vec::new(),
        }
    }

    /// Recorded draw calls (indexed and non-indexed).
    pub fn recorded_draws(&self) -> Vec<RecordedCommand> {
        self.recorded()
            .into_iter()
            .filter(RecordedCommand::is_draw)
            .collect()
    }
}

impl fmt::Debug for GpuCommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuCommandBuffer({:#x})", self.native_handle())
    }
}

// ============================================================================
// Vulkan Resource Cleanup (Drop implementations)
// ============================================================================

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            device,
            allocator,
            buffer,
            allocation,
            ..
        } = self
        {
            if let Some(allocation) = allocation.get_mut().take()
                && let Err(e) = allocator.lock().free(allocation)
            {
                log::error!("Failed to free buffer allocation: {}", e);
            }
            // SAFETY: Dropped only after the GPU finished using the buffer.
            unsafe { device.destroy_buffer(*buffer, None) };
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuImage {
    fn drop(&mut self) {
        if let GpuImage::Vulkan {
            device,
            allocator,
            image,
            view,
            layer_views,
            allocation,
            owned,
            ..
        } = self
        {
            // SAFETY: Dropped only after the GPU finished using the image.
            unsafe {
                for layer_view in layer_views.drain(..) {
                    device.destroy_image_view(layer_view, None);
                }
                device.destroy_image_view(*view, None);
            }
            if !*owned {
                return;
            }
            if let Some(allocation) = allocation.get_mut().take()
                && let Err(e) = allocator.lock().free(allocation)
            {
                log::error!("Failed to free image allocation: {}", e);
            }
            // SAFETY: As above.
            unsafe { device.destroy_image(*image, None) };
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuDescriptorSetLayout {
    fn drop(&mut self) {
        if let GpuDescriptorSetLayout::Vulkan { device, layout, .. } = self {
            // SAFETY: Dropped only after every pipeline layout using it is gone.
            unsafe { device.destroy_descriptor_set_layout(*layout, None) };
        }
    }
}

// ============================================================================
// Descriptors passed through the backend trait
// ============================================================================

/// The single binding of a push descriptor-set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub kind: DescriptorKind,
    /// Array length; greater than 1 for shadow texture arrays.
    pub count: u32,
    pub stages: ShaderStageFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    pub stages: ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// Contents written into a descriptor set.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorWrite<'a> {
    Texture {
        images: &'a [&'a GpuImage],
        sampler: &'a GpuSampler,
    },
    Uniform {
        buffer: &'a GpuBuffer,
        offset: u64,
        range: u64,
    },
    Storage {
        buffer: &'a GpuBuffer,
        offset: u64,
        range: u64,
    },
}

impl DescriptorWrite<'_> {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::Texture { .. } => DescriptorKind::Texture,
            Self::Uniform { .. } => DescriptorKind::Uniform,
            Self::Storage { .. } => DescriptorKind::Storage,
        }
    }
}

/// Everything needed to compile a graphics pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineDescriptor<'a> {
    pub label: &'a str,
    pub vertex: &'a GpuShaderModule,
    /// `None` for depth-only pipelines.
    pub pixel: Option<&'a GpuShaderModule>,
    pub layout: &'a GpuPipelineLayout,
    pub vertex_layout: VertexLayout,
    pub vertex_stride: u32,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub blend: BlendMode,
    pub color_formats: &'a [TextureFormat],
    pub depth_format: Option<TextureFormat>,
    pub depth_test: bool,
    pub depth_write: bool,
    /// Enable dynamic depth bias (shadow pipelines).
    pub depth_bias: bool,
}

/// Attachments and load behavior of a dynamic render pass.
#[derive(Debug, Clone, Copy)]
pub struct RenderingInfo<'a> {
    pub colors: &'a [&'a GpuImage],
    pub depth: Option<&'a GpuImage>,
    /// Render into one array layer of layered attachments.
    pub layer: Option<u32>,
    pub width: u32,
    pub height: u32,
    pub load: LoadMode,
    pub clear_color: [f32; 4],
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// Recording methods (`cmd_*`) may be called concurrently on distinct
/// command buffers.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create a host-visible buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError>;

    /// Write data to a buffer.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    /// Create an image with a full view and one view per layer.
    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, GraphicsError>;

    /// Upload the base mip level of every layer. Blocks until complete.
    fn upload_image(&self, image: &GpuImage, data: &[u8]) -> Result<(), GraphicsError>;

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError>;

    fn create_shader_module(
        &self,
        stage: ShaderStage,
        spirv: &[u32],
    ) -> Result<GpuShaderModule, GraphicsError>;

    fn create_descriptor_set_layout(
        &self,
        binding: &DescriptorBinding,
    ) -> Result<GpuDescriptorSetLayout, GraphicsError>;

    fn create_pipeline_layout(
        &self,
        set_layouts: &[&GpuDescriptorSetLayout],
        push_constants: &[PushConstantRange],
    ) -> Result<GpuPipelineLayout, GraphicsError>;

    fn create_graphics_pipeline(
        &self,
        descriptor: &PipelineDescriptor<'_>,
    ) -> Result<GpuPipeline, GraphicsError>;

    /// Create a pool holding `capacity` descriptors (and sets) of one kind.
    fn create_descriptor_pool(
        &self,
        kind: DescriptorKind,
        capacity: u32,
    ) -> Result<GpuDescriptorPool, GraphicsError>;

    /// Free every set allocated from the pool.
    fn reset_descriptor_pool(&self, pool: &GpuDescriptorPool) -> Result<(), GraphicsError>;

    fn allocate_descriptor_set(
        &self,
        pool: &GpuDescriptorPool,
        layout: &GpuDescriptorSetLayout,
    ) -> Result<GpuDescriptorSet, GraphicsError>;

    fn write_descriptor_set(&self, set: &GpuDescriptorSet, write: &DescriptorWrite<'_>);

    fn create_command_pool(&self) -> Result<GpuCommandPool, GraphicsError>;

    /// Reset every command buffer allocated from the pool.
    fn reset_command_pool(&self, pool: &GpuCommandPool) -> Result<(), GraphicsError>;

    fn allocate_command_buffer(
        &self,
        pool: &GpuCommandPool,
    ) -> Result<GpuCommandBuffer, GraphicsError>;

    fn begin_command_buffer(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError>;

    fn end_command_buffer(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError>;

    fn cmd_begin_rendering(&self, cmd: &GpuCommandBuffer, info: &RenderingInfo<'_>);

    /// End the render pass and make its writes visible to later reads.
    fn cmd_end_rendering(&self, cmd: &GpuCommandBuffer);

    fn cmd_set_viewport(&self, cmd: &GpuCommandBuffer, viewport: Viewport);

    fn cmd_set_scissor(&self, cmd: &GpuCommandBuffer, scissor: ScissorRect);

    fn cmd_set_depth_bias(&self, cmd: &GpuCommandBuffer, bias: DepthBias);

    fn cmd_bind_pipeline(&self, cmd: &GpuCommandBuffer, pipeline: &GpuPipeline);

    fn cmd_bind_descriptor_set(
        &self,
        cmd: &GpuCommandBuffer,
        layout: &GpuPipelineLayout,
        slot: u32,
        set: &GpuDescriptorSet,
    );

    fn cmd_push_constants(
        &self,
        cmd: &GpuCommandBuffer,
        layout: &GpuPipelineLayout,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    fn cmd_bind_vertex_buffer(&self, cmd: &GpuCommandBuffer, buffer: &GpuBuffer);

    /// Bind a `u32` index buffer.
    fn cmd_bind_index_buffer(&self, cmd: &GpuCommandBuffer, buffer: &GpuBuffer);

    fn cmd_draw(&self, cmd: &GpuCommandBuffer, vertex_count: u32, instance_count: u32);

    fn cmd_draw_indexed(&self, cmd: &GpuCommandBuffer, index_count: u32, instance_count: u32);

    /// Blit the base level of `src` onto `dst`, scaling with linear filtering.
    fn cmd_blit(&self, cmd: &GpuCommandBuffer, src: &GpuImage, dst: &GpuImage);

    fn cmd_copy_buffer_to_image(&self, cmd: &GpuCommandBuffer, src: &GpuBuffer, dst: &GpuImage);

    /// Block until the device is idle.
    fn wait_idle(&self);
}

/// Selects and creates the appropriate backend based on available features.
pub fn create_backend(validation: bool) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    #[cfg(feature = "vulkan-backend")]
    {
        match vulkan::VulkanBackend::new(validation) {
            Ok(backend) => {
                log::info!("Using Vulkan backend (ash)");
                return Ok(Arc::new(backend));
            }
            Err(e) => {
                log::warn!("Failed to create Vulkan backend: {}", e);
            }
        }
    }
    #[cfg(not(feature = "vulkan-backend"))]
    let _ = validation;

    log::info!("Using dummy backend");
    Ok(Arc::new(dummy::DummyBackend::new()))
}
