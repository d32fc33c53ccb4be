//! Validation layer messenger.

use std::borrow::Cow;
use std::ffi::CStr;

use ash::vk;

use crate::error::GraphicsError;

/// Route validation layer output to `log`.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, GraphicsError> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(validation_callback));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
    })
}

unsafe extern "system" fn validation_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes either null or a valid callback struct whose
    // message is a null-terminated string.
    let message = match unsafe { callback_data.as_ref() } {
        Some(data) if !data.p_message.is_null() => {
            unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy()
        }
        _ => Cow::Borrowed("(no message)"),
    };

    let kind = if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "validation"
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan {}] {}", kind, message);
    } else {
        log::warn!("[vulkan {}] {}", kind, message);
    }

    vk::FALSE
}
