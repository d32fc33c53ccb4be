//! Physical device selection and logical device creation.

use std::ffi::CStr;

use ash::vk;

use crate::error::GraphicsError;

/// Queue families chosen on a physical device.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilies {
    pub graphics: u32,
    /// A family with compute but no graphics support, if the device has one.
    pub dedicated_compute: Option<u32>,
}

/// Select the best physical device.
///
/// Devices without timeline semaphores are skipped. Discrete GPUs are
/// preferred, and a dedicated compute family adds to the score.
pub fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, QueueFamilies), GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };

        if !supports_timeline_semaphores(instance, device) {
            log::info!("Skipping GPU {:?}: no timeline semaphores", device_name);
            continue;
        }
        let Some(families) = find_queue_families(instance, device) else {
            log::info!("Skipping GPU {:?}: no graphics queue", device_name);
            continue;
        };

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }
        if families.dedicated_compute.is_some() {
            score += 500;
        }

        log::info!(
            "Found GPU: {:?} (type: {:?}, dedicated compute: {}, score: {})",
            device_name,
            properties.device_type,
            families.dedicated_compute.is_some(),
            score
        );

        if score > best_score {
            best_score = score;
            best = Some((device, families));
        }
    }

    best.ok_or_else(|| GraphicsError::InitializationFailed("No suitable GPU found".to_string()))
}

fn supports_timeline_semaphores(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_12_features);
    unsafe { instance.get_physical_device_features2(device, &mut features) };
    vulkan_12_features.timeline_semaphore == vk::TRUE
}

fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<QueueFamilies> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let graphics = queue_families.iter().position(|family| {
        family
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    })?;
    let dedicated_compute = queue_families.iter().position(|family| {
        family.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    });

    Some(QueueFamilies {
        graphics: graphics as u32,
        dedicated_compute: dedicated_compute.map(|index| index as u32),
    })
}

/// Create a logical device with one queue per chosen family.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<ash::Device, GraphicsError> {
    let queue_priorities = [1.0f32];
    let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::default()
        .queue_family_index(families.graphics)
        .queue_priorities(&queue_priorities)];
    if let Some(compute) = families.dedicated_compute {
        queue_create_infos.push(
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(compute)
                .queue_priorities(&queue_priorities),
        );
    }

    let mut vulkan_12_features =
        vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .push_next(&mut vulkan_12_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
