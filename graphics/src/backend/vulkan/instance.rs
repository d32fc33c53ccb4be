//! Vulkan instance creation.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::error::GraphicsError;

use super::debug;

/// Timeline semaphores are core since 1.2.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the optional validation messenger.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
}

/// Create a headless Vulkan instance.
///
/// No surface extensions are requested; presentation is done by the caller's
/// [`Presenter`](crate::stage::Presenter) on the graphics queue.
pub fn create_instance(
    entry: &ash::Entry,
    validation_enabled: bool,
) -> Result<InstanceBundle, GraphicsError> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);
    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = CString::new("mcubes").map_err(|e| {
        GraphicsError::InitializationFailed(format!("Invalid application name: {e}"))
    })?;
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&app_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions = Vec::new();
    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();
    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let (debug_messenger, debug_utils) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&debug_utils) {
            Ok(messenger) => (Some(messenger), Some(debug_utils)),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    } else {
        (None, None)
    };

    Ok(InstanceBundle {
        instance,
        debug_messenger,
        debug_utils,
    })
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    available_layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}
