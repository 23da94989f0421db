//! Native Vulkan backend implementation using ash.
//!
//! Images live in `GENERAL` layout for their whole lifetime, which keeps
//! recording free of per-image layout tracking. Every render pass ends with
//! a global memory barrier so later passes in the same command buffer can
//! sample what it wrote. Command buffers are recorded here and handed to the
//! embedding application for submission.

mod conversion;
mod device;
mod instance;
mod pipeline;

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use parking_lot::Mutex;

use crate::config::DepthBias;
use crate::error::GraphicsError;
use crate::gpu_failure;
use crate::types::{
    BufferDescriptor, BufferUsage, DescriptorKind, ImageDescriptor, SamplerDescriptor,
    ScissorRect, ShaderStage, ShaderStageFlags, TextureFormat, Viewport,
};

use super::{
    DescriptorBinding, DescriptorWrite, GpuBackend, GpuBuffer, GpuCommandBuffer, GpuCommandPool,
    GpuDescriptorPool, GpuDescriptorSet, GpuDescriptorSetLayout, GpuImage, GpuPipeline,
    GpuPipelineLayout, GpuSampler, GpuShaderModule, ImageInfo, PipelineDescriptor,
    PushConstantRange, RenderingInfo,
};

use self::conversion::{
    aspect_mask, convert_address_mode, convert_buffer_usage, convert_compare_function,
    convert_descriptor_kind, convert_filter_mode, convert_mipmap_filter_mode,
    convert_shader_stages, convert_texture_format, convert_texture_usage,
};

/// Pool, command buffer and fence for blocking one-shot submissions.
struct UploadContext {
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

/// Vulkan-based GPU backend using ash.
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    /// Dropped before the device is destroyed.
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    /// Also serializes access to the graphics queue.
    upload: Mutex<UploadContext>,
    validation_enabled: bool,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("validation_enabled", &self.validation_enabled)
            .field("graphics_queue_family", &self.graphics_queue_family)
            .finish_non_exhaustive()
    }
}

impl VulkanBackend {
    /// Create a headless Vulkan backend.
    pub fn new(validation_enabled: bool) -> Result<Self, GraphicsError> {
        // SAFETY: Loading the Vulkan library has no preconditions beyond the
        // library itself being well-behaved.
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            gpu_failure!(GraphicsError::InitializationFailed(format!(
                "Failed to load Vulkan: {}",
                e
            )))
        })?;

        let instance::InstanceBundle {
            instance,
            debug_utils,
        } = instance::create_instance(&entry, validation_enabled)?;

        let physical_device = device::select_physical_device(&instance)?;
        let graphics_queue_family = device::find_graphics_queue_family(&instance, physical_device)?;
        let device =
            device::create_logical_device(&instance, physical_device, graphics_queue_family)?;
        // SAFETY: Queue 0 of this family was requested at device creation.
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            gpu_failure!(GraphicsError::InitializationFailed(format!(
                "Failed to create memory allocator: {}",
                e
            )))
        })?;

        let upload = create_upload_context(&device, graphics_queue_family)?;

        log::info!(
            "Vulkan backend initialized (validation: {})",
            validation_enabled
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug_utils,
            physical_device,
            device,
            graphics_queue,
            graphics_queue_family,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
            upload: Mutex::new(upload),
            validation_enabled,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Wrap an image owned by the presentation layer (e.g. a swapchain
    /// image). The image must already be in `GENERAL` layout when rendered
    /// to; only the views created here are destroyed on drop.
    pub fn wrap_external_image(
        &self,
        image: vk::Image,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<GpuImage, GraphicsError> {
        let info = ImageInfo {
            width,
            height,
            layers: 1,
            mip_levels: 1,
            format,
        };
        let view = self.create_view(image, &info, vk::ImageViewType::TYPE_2D, 0, 1)?;
        Ok(GpuImage::Vulkan {
            device: self.device.clone(),
            allocator: Arc::clone(&self.allocator),
            image,
            view,
            layer_views: Vec::new(),
            allocation: Mutex::new(None),
            owned: false,
            info,
        })
    }

    fn create_view(
        &self,
        image: vk::Image,
        info: &ImageInfo,
        view_type: vk::ImageViewType,
        base_layer: u32,
        layer_count: u32,
    ) -> Result<vk::ImageView, GraphicsError> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(convert_texture_format(info.format))
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(info.format),
                base_mip_level: 0,
                level_count: info.mip_levels,
                base_array_layer: base_layer,
                layer_count,
            });

        // SAFETY: image is a live image created from self.device.
        unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "Failed to create image view: {:?}",
                e
            )))
        })
    }

    /// Record with `record`, submit, and block until the GPU finishes.
    fn submit_once(
        &self,
        record: impl FnOnce(vk::CommandBuffer),
    ) -> Result<(), GraphicsError> {
        let upload = self.upload.lock();
        let fail = |what: &str, e: vk::Result| {
            gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "Failed to {}: {:?}",
                what, e
            )))
        };

        // SAFETY: The upload context is exclusively locked, and the fence
        // wait below guarantees the previous submission has finished.
        unsafe {
            self.device
                .reset_command_pool(upload.pool, vk::CommandPoolResetFlags::empty())
                .map_err(|e| fail("reset upload pool", e))?;
            let begin = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(upload.cmd, &begin)
                .map_err(|e| fail("begin upload commands", e))?;
            record(upload.cmd);
            self.device
                .end_command_buffer(upload.cmd)
                .map_err(|e| fail("end upload commands", e))?;

            let command_buffers = [upload.cmd];
            let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
            self.device
                .queue_submit(self.graphics_queue, &[submit], upload.fence)
                .map_err(|e| match e {
                    vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
                    e => fail("submit upload", e),
                })?;
            self.device
                .wait_for_fences(&[upload.fence], true, u64::MAX)
                .map_err(|e| fail("wait for upload", e))?;
            self.device
                .reset_fences(&[upload.fence])
                .map_err(|e| fail("reset upload fence", e))?;
        }
        Ok(())
    }

    fn transition_to_general(&self, image: vk::Image, info: &ImageInfo) -> Result<(), GraphicsError> {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::GENERAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(full_range(info))
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);

        self.submit_once(|cmd| {
            // SAFETY: cmd is in the recording state inside submit_once.
            unsafe {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );
            }
        })
    }

    fn copy_buffer_to_image(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, image: &GpuImage) {
        let Some(raw) = raw_image(image) else {
            return;
        };
        let info = image.info();
        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect_mask(info.format),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: info.layers,
            })
            .image_extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: 1,
            });
        // SAFETY: cmd is recording; both resources are alive.
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                raw,
                vk::ImageLayout::GENERAL,
                &[region],
            );
        }
    }
}

impl VulkanBackend {
    /// Fill levels 1.. of every layer by successive linear blits from the
    /// level above. The image stays in `GENERAL` layout throughout.
    fn generate_mips(&self, cmd: vk::CommandBuffer, image: vk::Image, info: &ImageInfo) {
        let aspect = aspect_mask(info.format);
        let level_barrier = |level: u32| {
            vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::GENERAL)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: level,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: info.layers,
                })
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::SHADER_READ)
        };
        let extent = |level: u32| vk::Offset3D {
            x: (info.width >> level).max(1) as i32,
            y: (info.height >> level).max(1) as i32,
            z: 1,
        };
        let layers = |level: u32| vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: level,
            base_array_layer: 0,
            layer_count: info.layers,
        };

        for level in 1..info.mip_levels {
            let region = vk::ImageBlit::default()
                .src_subresource(layers(level - 1))
                .src_offsets([vk::Offset3D::default(), extent(level - 1)])
                .dst_subresource(layers(level))
                .dst_offsets([vk::Offset3D::default(), extent(level)]);
            // SAFETY: cmd is recording inside submit_once; level - 1 was
            // written by the copy or the previous blit.
            unsafe {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[level_barrier(level - 1)],
                );
                self.device.cmd_blit_image(
                    cmd,
                    image,
                    vk::ImageLayout::GENERAL,
                    image,
                    vk::ImageLayout::GENERAL,
                    &[region],
                    vk::Filter::LINEAR,
                );
            }
        }
        if info.mip_levels > 1 {
            // SAFETY: As above.
            unsafe {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[level_barrier(info.mip_levels - 1)],
                );
            }
        }
    }
}

fn create_upload_context(
    device: &ash::Device,
    queue_family: u32,
) -> Result<UploadContext, GraphicsError> {
    let fail = |what: &str, e: vk::Result| {
        gpu_failure!(GraphicsError::InitializationFailed(format!(
            "Failed to create {}: {:?}",
            what, e
        )))
    };
    // SAFETY: Plain object creation on a live device.
    unsafe {
        let pool = device
            .create_command_pool(
                &vk::CommandPoolCreateInfo::default().queue_family_index(queue_family),
                None,
            )
            .map_err(|e| fail("upload command pool", e))?;
        let cmd = device
            .allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
            .map_err(|e| fail("upload command buffer", e))?[0];
        let fence = device
            .create_fence(&vk::FenceCreateInfo::default(), None)
            .map_err(|e| fail("upload fence", e))?;
        Ok(UploadContext { pool, cmd, fence })
    }
}

fn full_range(info: &ImageInfo) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect_mask(info.format),
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

fn raw_cmd(cmd: &GpuCommandBuffer) -> Option<vk::CommandBuffer> {
    match cmd {
        GpuCommandBuffer::Vulkan { buffer } => Some(*buffer),
        GpuCommandBuffer::Dummy { .. } => {
            log::error!("VulkanBackend: asked to record into a dummy command buffer");
            None
        }
    }
}

fn raw_buffer(buffer: &GpuBuffer) -> Option<vk::Buffer> {
    match buffer {
        GpuBuffer::Vulkan { buffer, .. } => Some(*buffer),
        GpuBuffer::Dummy { .. } => None,
    }
}

fn raw_image(image: &GpuImage) -> Option<vk::Image> {
    match image {
        GpuImage::Vulkan { image, .. } => Some(*image),
        GpuImage::Dummy { .. } => None,
    }
}

/// Full view, or the single-layer view for `layer` when the image has one.
fn raw_view(image: &GpuImage, layer: Option<u32>) -> Option<vk::ImageView> {
    match image {
        GpuImage::Vulkan {
            view, layer_views, ..
        } => Some(
            layer
                .and_then(|layer| layer_views.get(layer as usize).copied())
                .unwrap_or(*view),
        ),
        GpuImage::Dummy { .. } => None,
    }
}

fn raw_set_layout(layout: &GpuDescriptorSetLayout) -> Option<vk::DescriptorSetLayout> {
    match layout {
        GpuDescriptorSetLayout::Vulkan { layout, .. } => Some(*layout),
        GpuDescriptorSetLayout::Dummy { .. } => None,
    }
}

fn raw_descriptor_pool(pool: &GpuDescriptorPool) -> Option<vk::DescriptorPool> {
    match pool {
        GpuDescriptorPool::Vulkan { pool, .. } => Some(*pool),
        GpuDescriptorPool::Dummy(_) => None,
    }
}

fn raw_command_pool(pool: &GpuCommandPool) -> Option<vk::CommandPool> {
    match pool {
        GpuCommandPool::Vulkan { pool, .. } => Some(*pool),
        GpuCommandPool::Dummy(_) => None,
    }
}

fn foreign(kind: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("Expected Vulkan {}", kind))
}

fn attachment(
    image: &GpuImage,
    layer: Option<u32>,
    load: bool,
    clear: vk::ClearValue,
) -> Option<vk::RenderingAttachmentInfo<'static>> {
    Some(
        vk::RenderingAttachmentInfo::default()
            .image_view(raw_view(image, layer)?)
            .image_layout(vk::ImageLayout::GENERAL)
            .load_op(if load {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            })
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(clear),
    )
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        // SAFETY: Objects are destroyed children-first after the device idles.
        unsafe {
            let _ = self.device.device_wait_idle();

            let upload = self.upload.get_mut();
            self.device.destroy_fence(upload.fence, None);
            self.device.destroy_command_pool(upload.pool, None);

            if Arc::strong_count(&self.allocator) > 1 {
                log::error!(
                    "VulkanBackend dropped while {} GPU objects are still alive",
                    Arc::strong_count(&self.allocator) - 1
                );
            }
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        let usage = convert_buffer_usage(descriptor.usage | BufferUsage::COPY_SRC);

        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: buffer_info is fully initialized.
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "Failed to create buffer: {:?}",
                e
            )))
        })?;

        // SAFETY: buffer was just created from this device.
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        // Every buffer is written from the CPU each frame or once at load,
        // so all of them are host visible.
        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: descriptor.label.as_deref().unwrap_or("buffer"),
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                // SAFETY: The buffer has no memory bound and is unused.
                unsafe { self.device.destroy_buffer(buffer, None) };
                gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                    "Failed to allocate buffer memory: {}",
                    e
                )))
            })?;

        // SAFETY: The allocation satisfies the buffer's requirements.
        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "Failed to bind buffer memory: {:?}",
                e
            )))
        })?;

        Ok(GpuBuffer::Vulkan {
            device: self.device.clone(),
            allocator: Arc::clone(&self.allocator),
            buffer,
            allocation: Mutex::new(Some(allocation)),
            size: descriptor.size,
        })
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let GpuBuffer::Vulkan {
            allocation, size, ..
        } = buffer
        else {
            return Err(foreign("buffer"));
        };

        let end = offset + data.len() as u64;
        if end > *size {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                size
            )));
        }

        let mut allocation = allocation.lock();
        let mapped = allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| GraphicsError::Internal("buffer memory is not mapped".to_string()))?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, GraphicsError> {
        let info = ImageInfo::from(descriptor);
        if descriptor.cube && descriptor.layers != 6 {
            return Err(GraphicsError::InvalidParameter(
                "cube images need exactly 6 layers".to_string(),
            ));
        }

        let mut usage = convert_texture_usage(descriptor.usage)
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        if descriptor.format.is_depth_stencil() {
            usage &= !vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        let flags = if descriptor.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_texture_format(descriptor.format))
            .extent(vk::Extent3D {
                width: descriptor.width.max(1),
                height: descriptor.height.max(1),
                depth: 1,
            })
            .mip_levels(descriptor.mip_levels.max(1))
            .array_layers(descriptor.layers.max(1))
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: image_info is fully initialized.
        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(|e| {
            gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "Failed to create image: {:?}",
                e
            )))
        })?;
        // SAFETY: image was just created from this device.
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: descriptor.label.as_deref().unwrap_or("image"),
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                // SAFETY: The image has no memory bound and is unused.
                unsafe { self.device.destroy_image(image, None) };
                gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                    "Failed to allocate image memory: {}",
                    e
                )))
            })?;

        // Wrap first so early returns below release everything.
        let mut gpu_image = GpuImage::Vulkan {
            device: self.device.clone(),
            allocator: Arc::clone(&self.allocator),
            image,
            view: vk::ImageView::null(),
            layer_views: Vec::new(),
            allocation: Mutex::new(None),
            owned: true,
            info,
        };

        // SAFETY: The allocation satisfies the image's requirements.
        let bound =
            unsafe { self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) };
        if let GpuImage::Vulkan {
            allocation: slot, ..
        } = &gpu_image
        {
            *slot.lock() = Some(allocation);
        }
        bound.map_err(|e| {
            gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "Failed to bind image memory: {:?}",
                e
            )))
        })?;

        let view_type = if descriptor.cube {
            vk::ImageViewType::CUBE
        } else if descriptor.layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let full_view = self.create_view(image, &info, view_type, 0, info.layers)?;
        if let GpuImage::Vulkan { view, .. } = &mut gpu_image {
            *view = full_view;
        }
        if info.layers > 1 {
            for layer in 0..info.layers {
                let layer_view =
                    self.create_view(image, &info, vk::ImageViewType::TYPE_2D, layer, 1)?;
                if let GpuImage::Vulkan { layer_views, .. } = &mut gpu_image {
                    layer_views.push(layer_view);
                }
            }
        }

        self.transition_to_general(image, &info)?;
        Ok(gpu_image)
    }

    fn upload_image(&self, image: &GpuImage, data: &[u8]) -> Result<(), GraphicsError> {
        let staging = self.create_buffer(
            &BufferDescriptor::new(data.len() as u64, BufferUsage::COPY_SRC)
                .with_label("image staging"),
        )?;
        self.write_buffer(&staging, 0, data)?;
        let staging_raw = raw_buffer(&staging).ok_or_else(|| foreign("buffer"))?;
        let image_raw = raw_image(image).ok_or_else(|| foreign("image"))?;

        self.submit_once(|cmd| {
            self.copy_buffer_to_image(cmd, staging_raw, image);
            self.generate_mips(cmd, image_raw, &image.info());
        })
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError> {
        let address_mode = convert_address_mode(descriptor.address_mode);
        let mut sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(descriptor.mag_filter))
            .min_filter(convert_filter_mode(descriptor.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(descriptor.mipmap_filter))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .min_lod(0.0)
            .max_lod(descriptor.lod_max_clamp)
            .anisotropy_enable(descriptor.anisotropy_clamp > 1)
            .max_anisotropy(descriptor.anisotropy_clamp as f32)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

        if let Some(compare) = descriptor.compare {
            sampler_info = sampler_info
                .compare_enable(true)
                .compare_op(convert_compare_function(compare));
        }

        // SAFETY: sampler_info is fully initialized.
        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }.map_err(|e| {
            gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "Failed to create sampler: {:?}",
                e
            )))
        })?;

        Ok(GpuSampler::Vulkan {
            device: self.device.clone(),
            sampler,
        })
    }

    fn create_shader_module(
        &self,
        stage: ShaderStage,
        spirv: &[u32],
    ) -> Result<GpuShaderModule, GraphicsError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        // SAFETY: The driver validates the SPIR-V words.
        let module = unsafe { self.device.create_shader_module(&create_info, None) }.map_err(|e| {
            gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "Failed to create {:?} shader module: {:?}",
                stage, e
            )))
        })?;
        Ok(GpuShaderModule::Vulkan {
            device: self.device.clone(),
            module,
        })
    }

    fn create_descriptor_set_layout(
        &self,
        binding: &DescriptorBinding,
    ) -> Result<GpuDescriptorSetLayout, GraphicsError> {
        // Placeholder layouts filling gaps between slots have no binding.
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = if binding.count == 0 {
            Vec::new()
        } else {
            vec![
                vk::DescriptorSetLayoutBinding::default()
                    .binding(0)
                    .descriptor_type(convert_descriptor_kind(binding.kind))
                    .descriptor_count(binding.count)
                    .stage_flags(convert_shader_stages(binding.stages)),
            ]
        };
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        // SAFETY: create_info is fully initialized.
        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| {
                gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                    "Failed to create descriptor set layout: {:?}",
                    e
                )))
            })?;

        Ok(GpuDescriptorSetLayout::Vulkan {
            device: self.device.clone(),
            layout,
            binding: *binding,
        })
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[&GpuDescriptorSetLayout],
        push_constants: &[PushConstantRange],
    ) -> Result<GpuPipelineLayout, GraphicsError> {
        let raw_layouts = set_layouts
            .iter()
            .map(|layout| raw_set_layout(layout).ok_or_else(|| foreign("descriptor set layout")))
            .collect::<Result<Vec<_>, _>>()?;
        let ranges: Vec<vk::PushConstantRange> = push_constants
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: convert_shader_stages(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect();

        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&raw_layouts)
            .push_constant_ranges(&ranges);

        // SAFETY: create_info is fully initialized.
        let layout = unsafe { self.device.create_pipeline_layout(&create_info, None) }.map_err(
            |e| {
                gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                    "Failed to create pipeline layout: {:?}",
                    e
                )))
            },
        )?;

        Ok(GpuPipelineLayout::Vulkan {
            device: self.device.clone(),
            layout,
        })
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &PipelineDescriptor<'_>,
    ) -> Result<GpuPipeline, GraphicsError> {
        let pipeline = pipeline::build_graphics_pipeline(&self.device, descriptor)?;
        Ok(GpuPipeline::Vulkan {
            device: self.device.clone(),
            pipeline,
        })
    }

    fn create_descriptor_pool(
        &self,
        kind: DescriptorKind,
        capacity: u32,
    ) -> Result<GpuDescriptorPool, GraphicsError> {
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: convert_descriptor_kind(kind),
            descriptor_count: capacity,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(capacity)
            .pool_sizes(&pool_sizes);

        // SAFETY: pool_info is fully initialized.
        let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }.map_err(
            |e| {
                gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                    "Failed to create descriptor pool: {:?}",
                    e
                )))
            },
        )?;

        Ok(GpuDescriptorPool::Vulkan {
            device: self.device.clone(),
            pool,
        })
    }

    fn reset_descriptor_pool(&self, pool: &GpuDescriptorPool) -> Result<(), GraphicsError> {
        let pool = raw_descriptor_pool(pool).ok_or_else(|| foreign("descriptor pool"))?;
        // SAFETY: Called once the frame that used the pool's sets retired.
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(|e| GraphicsError::Internal(format!("Failed to reset descriptor pool: {:?}", e)))
    }

    fn allocate_descriptor_set(
        &self,
        pool: &GpuDescriptorPool,
        layout: &GpuDescriptorSetLayout,
    ) -> Result<GpuDescriptorSet, GraphicsError> {
        let pool = raw_descriptor_pool(pool).ok_or_else(|| foreign("descriptor pool"))?;
        let layouts = [raw_set_layout(layout).ok_or_else(|| foreign("descriptor set layout"))?];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        // SAFETY: Pool and layout are alive; the caller tracks pool capacity.
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map_err(|e| {
            match e {
                vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                    GraphicsError::OutOfMemory
                }
                e => gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                    "Failed to allocate descriptor set: {:?}",
                    e
                ))),
            }
        })?;

        sets.into_iter()
            .next()
            .map(GpuDescriptorSet::Vulkan)
            .ok_or_else(|| GraphicsError::Internal("Driver returned no descriptor set".to_string()))
    }

    fn write_descriptor_set(&self, set: &GpuDescriptorSet, write: &DescriptorWrite<'_>) {
        let GpuDescriptorSet::Vulkan(set) = *set else {
            log::error!("VulkanBackend: cannot write a dummy descriptor set");
            return;
        };

        let base = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(convert_descriptor_kind(write.kind()));

        match write {
            DescriptorWrite::Texture { images, sampler } => {
                let GpuSampler::Vulkan { sampler, .. } = sampler else {
                    log::error!("VulkanBackend: cannot bind a dummy sampler");
                    return;
                };
                let image_infos: Vec<vk::DescriptorImageInfo> = images
                    .iter()
                    .filter_map(|image| raw_view(image, None))
                    .map(|view| {
                        vk::DescriptorImageInfo::default()
                            .sampler(*sampler)
                            .image_view(view)
                            .image_layout(vk::ImageLayout::GENERAL)
                    })
                    .collect();
                let write = base.image_info(&image_infos);
                // SAFETY: Referenced views and sampler are alive.
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorWrite::Uniform {
                buffer,
                offset,
                range,
            }
            | DescriptorWrite::Storage {
                buffer,
                offset,
                range,
            } => {
                let Some(buffer) = raw_buffer(buffer) else {
                    log::error!("VulkanBackend: cannot bind a dummy buffer");
                    return;
                };
                let buffer_infos = [vk::DescriptorBufferInfo {
                    buffer,
                    offset: *offset,
                    range: *range,
                }];
                let write = base.buffer_info(&buffer_infos);
                // SAFETY: The referenced buffer is alive.
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
        }
    }

    fn create_command_pool(&self) -> Result<GpuCommandPool, GraphicsError> {
        let pool_info =
            vk::CommandPoolCreateInfo::default().queue_family_index(self.graphics_queue_family);
        // SAFETY: pool_info is fully initialized.
        let pool = unsafe { self.device.create_command_pool(&pool_info, None) }.map_err(|e| {
            gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "Failed to create command pool: {:?}",
                e
            )))
        })?;
        Ok(GpuCommandPool::Vulkan {
            device: self.device.clone(),
            pool,
        })
    }

    fn reset_command_pool(&self, pool: &GpuCommandPool) -> Result<(), GraphicsError> {
        let pool = raw_command_pool(pool).ok_or_else(|| foreign("command pool"))?;
        // SAFETY: Called once the frame that used the pool's buffers retired.
        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(|e| GraphicsError::Internal(format!("Failed to reset command pool: {:?}", e)))
    }

    fn allocate_command_buffer(
        &self,
        pool: &GpuCommandPool,
    ) -> Result<GpuCommandBuffer, GraphicsError> {
        let pool = raw_command_pool(pool).ok_or_else(|| foreign("command pool"))?;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // SAFETY: The pool is alive and externally synchronized by its owner.
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(|e| {
            gpu_failure!(GraphicsError::ResourceCreationFailed(format!(
                "Failed to allocate command buffer: {:?}",
                e
            )))
        })?;
        buffers
            .into_iter()
            .next()
            .map(|buffer| GpuCommandBuffer::Vulkan { buffer })
            .ok_or_else(|| GraphicsError::Internal("Driver returned no command buffer".to_string()))
    }

    fn begin_command_buffer(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        let cmd = raw_cmd(cmd).ok_or_else(|| foreign("command buffer"))?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: The owning pool was reset for this frame.
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }.map_err(|e| {
            GraphicsError::Internal(format!("Failed to begin command buffer: {:?}", e))
        })
    }

    fn end_command_buffer(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        let cmd = raw_cmd(cmd).ok_or_else(|| foreign("command buffer"))?;
        // SAFETY: cmd is in the recording state.
        unsafe { self.device.end_command_buffer(cmd) }
            .map_err(|e| GraphicsError::Internal(format!("Failed to end command buffer: {:?}", e)))
    }

    fn cmd_begin_rendering(&self, cmd: &GpuCommandBuffer, info: &RenderingInfo<'_>) {
        let Some(cmd) = raw_cmd(cmd) else {
            return;
        };

        let color_clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: info.clear_color,
            },
        };
        let depth_clear = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        };

        let colors: Vec<vk::RenderingAttachmentInfo<'_>> = info
            .colors
            .iter()
            .filter_map(|image| {
                attachment(image, info.layer, info.load.clears_color(), color_clear)
            })
            .collect();
        let depth = info
            .depth
            .and_then(|image| attachment(image, info.layer, info.load.clears_depth(), depth_clear));
        let has_stencil = info.depth.is_some_and(|image| image.info().format.has_stencil());

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: info.width,
                    height: info.height,
                },
            })
            .layer_count(1)
            .color_attachments(&colors);
        if let Some(depth) = depth.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
            if has_stencil {
                rendering_info = rendering_info.stencil_attachment(depth);
            }
        }

        // SAFETY: cmd is recording and all attachment views are alive.
        unsafe { self.device.cmd_begin_rendering(cmd, &rendering_info) };
    }

    fn cmd_end_rendering(&self, cmd: &GpuCommandBuffer) {
        let Some(cmd) = raw_cmd(cmd) else {
            return;
        };
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
        // SAFETY: cmd is recording inside a render pass.
        unsafe {
            self.device.cmd_end_rendering(cmd);
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    fn cmd_set_viewport(&self, cmd: &GpuCommandBuffer, viewport: Viewport) {
        let Some(cmd) = raw_cmd(cmd) else {
            return;
        };
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        // SAFETY: cmd is recording.
        unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, cmd: &GpuCommandBuffer, scissor: ScissorRect) {
        let Some(cmd) = raw_cmd(cmd) else {
            return;
        };
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        // SAFETY: cmd is recording.
        unsafe { self.device.cmd_set_scissor(cmd, 0, &[rect]) };
    }

    fn cmd_set_depth_bias(&self, cmd: &GpuCommandBuffer, bias: DepthBias) {
        let Some(cmd) = raw_cmd(cmd) else {
            return;
        };
        // SAFETY: cmd is recording with a depth-bias-enabled pipeline bound.
        unsafe {
            self.device
                .cmd_set_depth_bias(cmd, bias.constant, 0.0, bias.slope)
        };
    }

    fn cmd_bind_pipeline(&self, cmd: &GpuCommandBuffer, pipeline: &GpuPipeline) {
        let (Some(cmd), GpuPipeline::Vulkan { pipeline, .. }) = (raw_cmd(cmd), pipeline) else {
            return;
        };
        // SAFETY: cmd is recording; the pipeline outlives the frame.
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, *pipeline)
        };
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: &GpuCommandBuffer,
        layout: &GpuPipelineLayout,
        slot: u32,
        set: &GpuDescriptorSet,
    ) {
        let (Some(cmd), Some(layout), GpuDescriptorSet::Vulkan(set)) =
            (raw_cmd(cmd), pipeline::raw_layout(layout), *set)
        else {
            return;
        };
        // SAFETY: cmd is recording; the set stays valid until its pool resets.
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                slot,
                &[set],
                &[],
            );
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: &GpuCommandBuffer,
        layout: &GpuPipelineLayout,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        let (Some(cmd), Some(layout)) = (raw_cmd(cmd), pipeline::raw_layout(layout)) else {
            return;
        };
        // SAFETY: cmd is recording; the range was declared in the layout.
        unsafe {
            self.device.cmd_push_constants(
                cmd,
                layout,
                convert_shader_stages(stages),
                offset,
                data,
            );
        }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: &GpuCommandBuffer, buffer: &GpuBuffer) {
        let (Some(cmd), Some(buffer)) = (raw_cmd(cmd), raw_buffer(buffer)) else {
            return;
        };
        // SAFETY: cmd is recording.
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]) };
    }

    fn cmd_bind_index_buffer(&self, cmd: &GpuCommandBuffer, buffer: &GpuBuffer) {
        let (Some(cmd), Some(buffer)) = (raw_cmd(cmd), raw_buffer(buffer)) else {
            return;
        };
        // SAFETY: cmd is recording.
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT32)
        };
    }

    fn cmd_draw(&self, cmd: &GpuCommandBuffer, vertex_count: u32, instance_count: u32) {
        let Some(cmd) = raw_cmd(cmd) else {
            return;
        };
        // SAFETY: cmd is recording inside a render pass.
        unsafe { self.device.cmd_draw(cmd, vertex_count, instance_count, 0, 0) };
    }

    fn cmd_draw_indexed(&self, cmd: &GpuCommandBuffer, index_count: u32, instance_count: u32) {
        let Some(cmd) = raw_cmd(cmd) else {
            return;
        };
        // SAFETY: cmd is recording inside a render pass.
        unsafe {
            self.device
                .cmd_draw_indexed(cmd, index_count, instance_count, 0, 0, 0)
        };
    }

    fn cmd_blit(&self, cmd: &GpuCommandBuffer, src: &GpuImage, dst: &GpuImage) {
        let (Some(cmd), Some(src_raw), Some(dst_raw)) = (raw_cmd(cmd), raw_image(src), raw_image(dst))
        else {
            return;
        };
        let (src_info, dst_info) = (src.info(), dst.info());
        let layers = src_info.layers.min(dst_info.layers);
        let subresource = |info: &ImageInfo| vk::ImageSubresourceLayers {
            aspect_mask: aspect_mask(info.format),
            mip_level: 0,
            base_array_layer: 0,
            layer_count: layers,
        };
        let corner = |info: &ImageInfo| vk::Offset3D {
            x: info.width as i32,
            y: info.height as i32,
            z: 1,
        };
        let region = vk::ImageBlit::default()
            .src_subresource(subresource(&src_info))
            .src_offsets([vk::Offset3D::default(), corner(&src_info)])
            .dst_subresource(subresource(&dst_info))
            .dst_offsets([vk::Offset3D::default(), corner(&dst_info)]);
        let filter = if src_info.format.is_depth_stencil() {
            vk::Filter::NEAREST
        } else {
            vk::Filter::LINEAR
        };
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);

        // SAFETY: cmd is recording outside a render pass; both images are in
        // GENERAL layout.
        unsafe {
            self.device.cmd_blit_image(
                cmd,
                src_raw,
                vk::ImageLayout::GENERAL,
                dst_raw,
                vk::ImageLayout::GENERAL,
                &[region],
                filter,
            );
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    fn cmd_copy_buffer_to_image(&self, cmd: &GpuCommandBuffer, src: &GpuBuffer, dst: &GpuImage) {
        let (Some(cmd), Some(buffer)) = (raw_cmd(cmd), raw_buffer(src)) else {
            return;
        };
        self.copy_buffer_to_image(cmd, buffer, dst);
    }

    fn wait_idle(&self) {
        // SAFETY: The device is alive.
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("Failed to wait for device idle: {:?}", e);
        }
    }
}
