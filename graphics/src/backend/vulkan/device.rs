//! Vulkan physical and logical device selection.

use ash::vk;

use crate::error::GraphicsError;
use crate::gpu_failure;

/// Select the best physical device for rendering.
///
/// Requires Vulkan 1.3 and anisotropic filtering; prefers discrete GPUs.
pub fn select_physical_device(
    instance: &ash::Instance,
) -> Result<vk::PhysicalDevice, GraphicsError> {
    // SAFETY: The instance is alive for the call.
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        gpu_failure!(GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        )))
    })?;

    let mut best: Option<(u32, vk::PhysicalDevice)> = None;
    for device in devices {
        // SAFETY: `device` was just enumerated from this instance.
        let (properties, features) = unsafe {
            (
                instance.get_physical_device_properties(device),
                instance.get_physical_device_features(device),
            )
        };

        if properties.api_version < vk::make_api_version(0, 1, 3, 0)
            || features.sampler_anisotropy == vk::FALSE
        {
            continue;
        }

        let mut score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 0,
        };
        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            properties.device_name_as_c_str().unwrap_or(c"unknown"),
            properties.device_type,
            score
        );

        if best.is_none_or(|(best_score, _)| score > best_score) {
            best = Some((score, device));
        }
    }

    best.map(|(_, device)| device)
        .ok_or_else(|| {
            gpu_failure!(GraphicsError::InitializationFailed(
                "No suitable GPU found".to_string()
            ))
        })
}

/// Find a queue family that supports graphics operations.
pub fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32, GraphicsError> {
    // SAFETY: physical_device belongs to instance.
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
        .ok_or_else(|| {
            gpu_failure!(GraphicsError::InitializationFailed(
                "No graphics queue family found".to_string()
            ))
        })
}

/// Create a logical device with dynamic rendering enabled.
///
/// The swapchain extension is enabled when present so the embedding
/// application can share the device for presentation.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
) -> Result<ash::Device, GraphicsError> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&queue_priorities)];

    // SAFETY: physical_device belongs to instance.
    let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .unwrap_or_default();
    let has_swapchain = available.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::swapchain::NAME)
    });

    let mut device_extensions = Vec::new();
    if has_swapchain {
        device_extensions.push(ash::khr::swapchain::NAME.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
    let mut vulkan_13_features =
        vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_13_features);

    // SAFETY: create_info and its chain outlive the call.
    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        gpu_failure!(GraphicsError::InitializationFailed(format!(
            "Failed to create logical device: {:?}",
            e
        )))
    })
}
