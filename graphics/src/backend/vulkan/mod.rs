//! Native Vulkan backend using ash.
//!
//! Headless: one graphics queue and, when the device exposes a compute-only
//! family, one dedicated compute queue. Progress counters map onto timeline
//! semaphores (core in Vulkan 1.2).

mod allocator;
mod command;
mod debug;
mod device;
mod instance;
mod sync;

use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::profiling::profile_scope;
use crate::types::{BufferDescriptor, QueueKind};

use super::{
    check_fill_range, BackendParameters, GpuBackend, GpuBuffer, GpuCommandBuffer,
    GpuCommandPool, GpuFence, GpuTimeline, Submission, TimelinePoint,
};

/// Map a Vulkan result code to the matching [`GraphicsError`].
pub(crate) fn map_vk_error(operation: &str, result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        other => GraphicsError::Internal(format!("{operation} failed: {other:?}")),
    }
}

struct QueueSlot {
    queue: Mutex<vk::Queue>,
    family: u32,
}

/// Vulkan-based GPU backend.
pub struct VulkanBackend {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    #[allow(dead_code)]
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics: QueueSlot,
    compute: Option<QueueSlot>,
    /// Dropped by hand before the device is destroyed.
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    validation_enabled: bool,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("validation_enabled", &self.validation_enabled)
            .field("graphics_family", &self.graphics.family)
            .field("compute_family", &self.compute.as_ref().map(|c| c.family))
            .finish()
    }
}

impl VulkanBackend {
    /// Initialize Vulkan: instance, physical device, logical device with a
    /// graphics queue and (if present) a dedicated compute queue, allocator.
    pub fn new(params: &BackendParameters) -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let instance::InstanceBundle {
            instance,
            debug_messenger,
            debug_utils,
        } = instance::create_instance(&entry, params.validation)?;

        let destroy_instance = || unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&debug_utils, debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            instance.destroy_instance(None);
        };

        let (physical_device, families) = match device::select_physical_device(&instance) {
            Ok(selected) => selected,
            Err(e) => {
                destroy_instance();
                return Err(e);
            }
        };
        let device = match device::create_logical_device(&instance, physical_device, families) {
            Ok(device) => device,
            Err(e) => {
                destroy_instance();
                return Err(e);
            }
        };
        let allocator =
            match allocator::create_allocator(&instance, physical_device, device.clone()) {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { device.destroy_device(None) };
                    destroy_instance();
                    return Err(e);
                }
            };

        let graphics = QueueSlot {
            queue: Mutex::new(unsafe { device.get_device_queue(families.graphics, 0) }),
            family: families.graphics,
        };
        let compute = families.dedicated_compute.map(|family| QueueSlot {
            queue: Mutex::new(unsafe { device.get_device_queue(family, 0) }),
            family,
        });

        log::info!(
            "Vulkan backend initialized (validation: {}, dedicated compute queue: {})",
            params.validation,
            compute.is_some()
        );

        Ok(Self {
            entry,
            instance,
            debug_messenger,
            debug_utils,
            physical_device,
            device,
            graphics,
            compute,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
            validation_enabled: params.validation,
        })
    }

    /// The logical device, for stages recording their own commands.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    fn queue_slot(&self, queue: QueueKind) -> &QueueSlot {
        match (queue, &self.compute) {
            (QueueKind::Compute, Some(compute)) => compute,
            _ => &self.graphics,
        }
    }

    fn queue_families(&self) -> Vec<u32> {
        let mut families = vec![self.graphics.family];
        if let Some(compute) = &self.compute {
            families.push(compute.family);
        }
        families
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            if Arc::strong_count(&self.allocator) > 1 {
                log::warn!("Vulkan backend dropped while buffers are still alive");
            }
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn vulkan_timeline(timeline: &GpuTimeline) -> Result<vk::Semaphore, GraphicsError> {
    match timeline {
        GpuTimeline::Vulkan { semaphore, .. } => Ok(*semaphore),
        GpuTimeline::Dummy(_) => Err(foreign("timeline")),
    }
}

fn vulkan_fence(fence: &GpuFence) -> Result<vk::Fence, GraphicsError> {
    match fence {
        GpuFence::Vulkan { fence, .. } => Ok(*fence),
        GpuFence::Dummy(_) => Err(foreign("fence")),
    }
}

fn vulkan_pool(pool: &GpuCommandPool) -> Result<vk::CommandPool, GraphicsError> {
    match pool {
        GpuCommandPool::Vulkan { pool, .. } => Ok(*pool),
        GpuCommandPool::Dummy(_) => Err(foreign("command pool")),
    }
}

fn vulkan_command_buffer(buffer: &GpuCommandBuffer) -> Result<vk::CommandBuffer, GraphicsError> {
    match buffer {
        GpuCommandBuffer::Vulkan { buffer, .. } => Ok(*buffer),
        GpuCommandBuffer::Dummy(_) => Err(foreign("command buffer")),
    }
}

fn foreign(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} belongs to another backend"))
}

/// Stages at which a submission's timeline waits take effect.
///
/// A compute wait must block every stage a fill writes from, or the fill can
/// overwrite a slot the graphics queue is still reading.
fn wait_stage(queue: QueueKind) -> vk::PipelineStageFlags {
    match queue {
        QueueKind::Compute => command::fill_stages(),
        QueueKind::Graphics => {
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::DRAW_INDIRECT
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn has_dedicated_compute_queue(&self) -> bool {
        self.compute.is_some()
    }

    fn create_timeline(&self, initial_value: u64) -> Result<GpuTimeline, GraphicsError> {
        let semaphore = sync::create_timeline_semaphore(&self.device, initial_value)?;
        Ok(GpuTimeline::Vulkan {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn timeline_value(&self, timeline: &GpuTimeline) -> Result<u64, GraphicsError> {
        sync::timeline_value(&self.device, vulkan_timeline(timeline)?)
    }

    fn wait_timelines(
        &self,
        waits: &[TimelinePoint<'_>],
        timeout: Duration,
    ) -> Result<(), GraphicsError> {
        if waits.is_empty() {
            return Ok(());
        }
        let semaphores = waits
            .iter()
            .map(|w| vulkan_timeline(w.timeline))
            .collect::<Result<Vec<_>, _>>()?;
        let values: Vec<u64> = waits.iter().map(|w| w.value).collect();
        sync::wait_timelines(&self.device, &semaphores, &values, timeout)
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError> {
        let fence = sync::create_fence(&self.device, signaled)?;
        Ok(GpuFence::Vulkan {
            device: self.device.clone(),
            fence,
        })
    }

    fn wait_fence(&self, fence: &GpuFence, timeout: Duration) -> Result<(), GraphicsError> {
        sync::wait_fence(&self.device, vulkan_fence(fence)?, timeout)
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        sync::reset_fence(&self.device, vulkan_fence(fence)?)
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, GraphicsError> {
        sync::is_fence_signaled(&self.device, vulkan_fence(fence)?)
    }

    fn create_command_pool(&self, queue: QueueKind) -> Result<GpuCommandPool, GraphicsError> {
        let family = self.queue_slot(queue).family;
        let pool = command::create_command_pool(&self.device, family)?;
        Ok(GpuCommandPool::Vulkan {
            device: self.device.clone(),
            pool,
            queue,
        })
    }

    fn reset_command_pool(&self, pool: &GpuCommandPool) -> Result<(), GraphicsError> {
        command::reset_command_pool(&self.device, vulkan_pool(pool)?)
    }

    fn allocate_command_buffer(
        &self,
        pool: &GpuCommandPool,
    ) -> Result<GpuCommandBuffer, GraphicsError> {
        let buffer = command::allocate_primary(&self.device, vulkan_pool(pool)?)?;
        Ok(GpuCommandBuffer::Vulkan {
            device: self.device.clone(),
            buffer,
        })
    }

    fn begin_command_buffer(&self, buffer: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        command::begin_one_time(&self.device, vulkan_command_buffer(buffer)?)
    }

    fn end_command_buffer(&self, buffer: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        command::end(&self.device, vulkan_command_buffer(buffer)?)
    }

    fn cmd_compute_to_graphics_barrier(&self, buffer: &GpuCommandBuffer) {
        if let Some((device, buffer)) = buffer.as_vulkan() {
            command::compute_to_graphics_barrier(device, buffer);
        }
    }

    fn cmd_full_barrier(&self, buffer: &GpuCommandBuffer) {
        if let Some((device, buffer)) = buffer.as_vulkan() {
            command::full_barrier(device, buffer);
        }
    }

    fn cmd_fill_buffer(
        &self,
        command_buffer: &GpuCommandBuffer,
        buffer: &GpuBuffer,
        offset: u64,
        size: u64,
        data: u32,
    ) -> Result<(), GraphicsError> {
        let (device, commands) = command_buffer
            .as_vulkan()
            .ok_or_else(|| foreign("command buffer"))?;
        let target = buffer.as_vulkan().ok_or_else(|| foreign("buffer"))?;
        check_fill_range(buffer, offset, size)?;
        command::fill_buffer(device, commands, target, offset, size, data);
        Ok(())
    }

    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> Result<(), GraphicsError> {
        profile_scope!("queue_submit");

        let command_buffers = submission
            .command_buffers
            .iter()
            .map(|b| vulkan_command_buffer(b))
            .collect::<Result<Vec<_>, _>>()?;
        let wait_semaphores = submission
            .waits
            .iter()
            .map(|w| vulkan_timeline(w.timeline))
            .collect::<Result<Vec<_>, _>>()?;
        let wait_values: Vec<u64> = submission.waits.iter().map(|w| w.value).collect();
        let wait_stages = vec![wait_stage(queue); wait_semaphores.len()];
        let signal_semaphores = submission
            .signals
            .iter()
            .map(|s| vulkan_timeline(s.timeline))
            .collect::<Result<Vec<_>, _>>()?;
        let signal_values: Vec<u64> = submission.signals.iter().map(|s| s.value).collect();
        let fence = match submission.fence {
            Some(fence) => vulkan_fence(fence)?,
            None => vk::Fence::null(),
        };

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        let queue_handle = self.queue_slot(queue).queue.lock();
        unsafe { self.device.queue_submit(*queue_handle, &[submit_info], fence) }.map_err(|e| {
            match e {
                vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
                other => GraphicsError::SubmissionFailed(format!("{} queue: {:?}", queue, other)),
            }
        })
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        allocator::create_storage_buffer(
            &self.device,
            &self.allocator,
            &self.queue_families(),
            descriptor,
        )
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        // vkDeviceWaitIdle requires external synchronization of every queue.
        let _graphics = self.graphics.queue.lock();
        let _compute = self.compute.as_ref().map(|c| c.queue.lock());
        unsafe { self.device.device_wait_idle() }.map_err(|e| map_vk_error("wait idle", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_wait_covers_buffer_fills() {
        let stages = wait_stage(QueueKind::Compute);
        assert!(stages.contains(vk::PipelineStageFlags::TRANSFER));
        assert!(stages.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert!(stages.contains(command::fill_stages()));
    }

    #[test]
    fn test_graphics_wait_covers_draw_reads() {
        let stages = wait_stage(QueueKind::Graphics);
        assert!(stages.contains(vk::PipelineStageFlags::VERTEX_SHADER));
        assert!(stages.contains(vk::PipelineStageFlags::DRAW_INDIRECT));
    }

    #[test]
    fn test_barrier_source_covers_buffer_fills() {
        assert!(command::fill_writes().contains(vk::AccessFlags::TRANSFER_WRITE));
        assert!(command::fill_writes().contains(vk::AccessFlags::SHADER_WRITE));
    }
}
