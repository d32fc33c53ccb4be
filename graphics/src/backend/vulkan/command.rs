//! Command pools, command buffers and the two barriers the scheduler records.

use ash::vk;

use crate::error::GraphicsError;

use super::map_vk_error;

/// Create a transient pool; its buffers are only ever reset with the pool.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(
            vk::CommandPoolCreateFlags::TRANSIENT
                | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        );

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to create command pool: {:?}", e))
    })
}

pub fn reset_command_pool(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<(), GraphicsError> {
    unsafe { device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty()) }
        .map_err(|e| map_vk_error("reset command pool", e))
}

pub fn allocate_primary(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, GraphicsError> {
    let allocate_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let buffers = unsafe { device.allocate_command_buffers(&allocate_info) }
        .map_err(|e| map_vk_error("allocate command buffer", e))?;
    buffers.into_iter().next().ok_or_else(|| {
        GraphicsError::ResourceCreationFailed("Driver returned no command buffer".to_string())
    })
}

pub fn begin_one_time(
    device: &ash::Device,
    buffer: vk::CommandBuffer,
) -> Result<(), GraphicsError> {
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(buffer, &begin_info) }
        .map_err(|e| map_vk_error("begin command buffer", e))
}

pub fn end(device: &ash::Device, buffer: vk::CommandBuffer) -> Result<(), GraphicsError> {
    unsafe { device.end_command_buffer(buffer) }.map_err(|e| map_vk_error("end command buffer", e))
}

/// Stages a fill may write slot storage from: dispatches and buffer fills.
pub fn fill_stages() -> vk::PipelineStageFlags {
    vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER
}

/// Accesses a fill may write slot storage with.
pub fn fill_writes() -> vk::AccessFlags {
    vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::TRANSFER_WRITE
}

/// Fill writes become visible to vertex shaders and indirect draws.
pub fn compute_to_graphics_barrier(device: &ash::Device, buffer: vk::CommandBuffer) {
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(fill_writes())
        .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::INDIRECT_COMMAND_READ);
    unsafe {
        device.cmd_pipeline_barrier(
            buffer,
            fill_stages(),
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::DRAW_INDIRECT,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
    }
}

/// Orders transfer and compute against vertex/indirect work in both
/// directions on one queue.
pub fn full_barrier(device: &ash::Device, buffer: vk::CommandBuffer) {
    let stages = vk::PipelineStageFlags::TRANSFER
        | vk::PipelineStageFlags::COMPUTE_SHADER
        | vk::PipelineStageFlags::VERTEX_SHADER
        | vk::PipelineStageFlags::DRAW_INDIRECT;
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(
            vk::AccessFlags::TRANSFER_WRITE
                | vk::AccessFlags::SHADER_READ
                | vk::AccessFlags::SHADER_WRITE,
        )
        .dst_access_mask(
            vk::AccessFlags::TRANSFER_WRITE
                | vk::AccessFlags::SHADER_READ
                | vk::AccessFlags::SHADER_WRITE
                | vk::AccessFlags::INDIRECT_COMMAND_READ,
        );
    unsafe {
        device.cmd_pipeline_barrier(
            buffer,
            stages,
            stages,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
    }
}

pub fn fill_buffer(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    offset: u64,
    size: u64,
    data: u32,
) {
    unsafe { device.cmd_fill_buffer(command_buffer, buffer, offset, size, data) };
}
