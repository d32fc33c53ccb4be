//! Device memory through gpu-allocator.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::backend::GpuBuffer;
use crate::error::GraphicsError;
use crate::types::BufferDescriptor;

pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, GraphicsError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
    })
}

/// Create a device-local storage buffer.
///
/// When compute runs on its own family the buffer is shared concurrently, so
/// slots need no ownership transfers between queues.
pub fn create_storage_buffer(
    device: &ash::Device,
    allocator: &Arc<Mutex<Allocator>>,
    queue_families: &[u32],
    descriptor: &BufferDescriptor,
) -> Result<GpuBuffer, GraphicsError> {
    let usage = vk::BufferUsageFlags::STORAGE_BUFFER
        | vk::BufferUsageFlags::VERTEX_BUFFER
        | vk::BufferUsageFlags::INDIRECT_BUFFER
        | vk::BufferUsageFlags::TRANSFER_DST;

    let mut buffer_info = vk::BufferCreateInfo::default()
        .size(descriptor.size)
        .usage(usage);
    buffer_info = if queue_families.len() > 1 {
        buffer_info
            .sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(queue_families)
    } else {
        buffer_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
    };

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to create buffer: {:?}", e))
    })?;
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let allocation = allocator.lock().allocate(&AllocationCreateDesc {
        name: descriptor.label.as_deref().unwrap_or("storage buffer"),
        requirements,
        location: MemoryLocation::GpuOnly,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    });
    let allocation = match allocation {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "Failed to allocate buffer memory: {}",
                e
            )));
        }
    };

    if let Err(e) =
        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
    {
        if let Err(free_error) = allocator.lock().free(allocation) {
            log::warn!("Failed to free buffer memory: {}", free_error);
        }
        unsafe { device.destroy_buffer(buffer, None) };
        return Err(GraphicsError::ResourceCreationFailed(format!(
            "Failed to bind buffer memory: {:?}",
            e
        )));
    }

    Ok(GpuBuffer::Vulkan {
        device: device.clone(),
        buffer,
        allocation: Mutex::new(Some(allocation)),
        allocator: allocator.clone(),
        size: descriptor.size,
    })
}
