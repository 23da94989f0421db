//! Vulkan instance creation and the validation debug messenger.

use std::ffi::{CStr, c_void};

use ash::vk;

use crate::error::GraphicsError;
use crate::gpu_failure;

/// Dynamic rendering is core in Vulkan 1.3.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the optional validation messenger.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

/// Create a headless Vulkan instance with optional validation layers.
///
/// Presentation is owned by the embedding application, so no surface
/// extensions are requested here.
pub fn create_instance(
    entry: &ash::Entry,
    validation_enabled: bool,
) -> Result<InstanceBundle, GraphicsError> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);

    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"Umbra")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Umbra Renderer")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions = Vec::new();
    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    // SAFETY: create_info and everything it points to outlive the call.
    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        gpu_failure!(GraphicsError::InitializationFailed(format!(
            "Failed to create Vulkan instance: {:?}",
            e
        )))
    })?;

    let debug_utils = if validation_available {
        let loader = ash::ext::debug_utils::Instance::new(entry, &instance);
        match create_debug_messenger(&loader) {
            Ok(messenger) => Some((loader, messenger)),
            Err(e) => {
                // SAFETY: Nothing else was created from the instance yet.
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    } else {
        None
    };

    Ok(InstanceBundle {
        instance,
        debug_utils,
    })
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    // SAFETY: Plain enumeration call on a loaded entry.
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };

    available_layers.iter().any(|layer| {
        layer
            .layer_name_as_c_str()
            .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
    })
}

fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, GraphicsError> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    // SAFETY: The callback is a plain function with 'static lifetime.
    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(|e| {
        gpu_failure!(GraphicsError::InitializationFailed(format!(
            "Failed to create debug messenger: {:?}",
            e
        )))
    })
}

/// Forwards validation messages to `log`.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        String::from("(no message)")
    } else {
        // SAFETY: The driver passes valid callback data for the call's duration.
        let data = unsafe { *callback_data };
        if data.p_message.is_null() {
            String::from("(null message)")
        } else {
            // SAFETY: p_message is a null-terminated string owned by the driver.
            unsafe { CStr::from_ptr(data.p_message) }
                .to_string_lossy()
                .into_owned()
        }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "General",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan {}] {}", kind, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan {}] {}", kind, message)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("[Vulkan {}] {}", kind, message),
        _ => log::trace!("[Vulkan {}] {}", kind, message),
    }

    vk::FALSE
}
