//! Timeline semaphores and fences.

use std::time::Duration;

use ash::vk;

use crate::error::GraphicsError;

use super::map_vk_error;

pub fn create_timeline_semaphore(
    device: &ash::Device,
    initial_value: u64,
) -> Result<vk::Semaphore, GraphicsError> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial_value);
    let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

    unsafe { device.create_semaphore(&create_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to create timeline: {:?}", e))
    })
}

pub fn timeline_value(
    device: &ash::Device,
    semaphore: vk::Semaphore,
) -> Result<u64, GraphicsError> {
    unsafe { device.get_semaphore_counter_value(semaphore) }
        .map_err(|e| map_vk_error("read timeline", e))
}

/// Wait until every semaphore reaches its value.
pub fn wait_timelines(
    device: &ash::Device,
    semaphores: &[vk::Semaphore],
    values: &[u64],
    timeout: Duration,
) -> Result<(), GraphicsError> {
    let wait_info = vk::SemaphoreWaitInfo::default()
        .semaphores(semaphores)
        .values(values);

    match unsafe { device.wait_semaphores(&wait_info, timeout_ns(timeout)) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(GraphicsError::WaitTimeout(format!(
            "timeline values {:?} not reached within {:?}",
            values, timeout
        ))),
        Err(e) => Err(map_vk_error("wait timelines", e)),
    }
}

pub fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence, GraphicsError> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let fence_info = vk::FenceCreateInfo::default().flags(flags);

    unsafe { device.create_fence(&fence_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to create fence: {:?}", e))
    })
}

pub fn wait_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout: Duration,
) -> Result<(), GraphicsError> {
    match unsafe { device.wait_for_fences(&[fence], true, timeout_ns(timeout)) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(GraphicsError::WaitTimeout(format!(
            "fence not signaled within {:?}",
            timeout
        ))),
        Err(e) => Err(map_vk_error("wait fence", e)),
    }
}

pub fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<(), GraphicsError> {
    unsafe { device.reset_fences(&[fence]) }.map_err(|e| map_vk_error("reset fence", e))
}

pub fn is_fence_signaled(device: &ash::Device, fence: vk::Fence) -> Result<bool, GraphicsError> {
    match unsafe { device.get_fence_status(fence) } {
        Ok(signaled) => Ok(signaled),
        Err(e) => Err(map_vk_error("query fence", e)),
    }
}

fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}
