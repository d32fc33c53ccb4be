//! GPU backend abstraction layer.
//!
//! The scheduling core never talks to a graphics API directly. Everything it
//! needs (progress timelines, fences, command pools, queue submission) goes
//! through the [`GpuBackend`] trait, and every GPU object it holds is one of the
//! handle enums below.
//!
//! # Available Backends
//!
//! - `dummy` (always built): a simulated two-queue GPU that executes recorded
//!   closures on worker threads. Used by tests and headless runs.
//! - `vulkan-backend`: native Vulkan using ash, with timeline semaphores and an
//!   optional dedicated compute queue.
//!
//! # Architecture
//!
//! Each backend implements [`GpuBackend`], which provides:
//! - Progress timelines (timeline semaphores) and CPU-side waits on them
//! - Fences for CPU-GPU synchronization
//! - Command pool and command buffer lifecycle
//! - Barriers between the fill and draw halves of a batch
//! - Queue submission with timeline waits and signals

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;

use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::{Allocation, Allocator};
#[cfg(feature = "vulkan-backend")]
use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, QueueKind};

pub use dummy::{DummyBackend, DummyBuffer, DummyCommandBuffer, DummyConfig, SubmissionRecord};

/// Handle to a monotonically increasing GPU progress counter.
pub enum GpuTimeline {
    /// Simulated timeline
    Dummy(Arc<dummy::DummyTimeline>),
    /// Vulkan timeline semaphore
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        semaphore: vk::Semaphore,
    },
}

impl GpuTimeline {
    /// Identifier of a simulated timeline, as it appears in the submission log.
    pub fn dummy_id(&self) -> Option<u64> {
        match self {
            Self::Dummy(timeline) => Some(timeline.id()),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { .. } => None,
        }
    }
}

impl std::fmt::Debug for GpuTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(timeline) => f
                .debug_struct("GpuTimeline::Dummy")
                .field("id", &timeline.id())
                .field("value", &timeline.value())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { semaphore, .. } => f
                .debug_struct("GpuTimeline::Vulkan")
                .field("semaphore", semaphore)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU fence for CPU-GPU synchronization.
pub enum GpuFence {
    /// Simulated fence
    Dummy(Arc<dummy::DummyFence>),
    /// Vulkan fence
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        fence: vk::Fence,
    },
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(fence) => f
                .debug_struct("GpuFence::Dummy")
                .field("signaled", &fence.is_signaled())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { fence, .. } => f
                .debug_struct("GpuFence::Vulkan")
                .field("fence", fence)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a command pool bound to one queue family.
pub enum GpuCommandPool {
    /// Simulated pool
    Dummy(Arc<dummy::DummyCommandPool>),
    /// Vulkan command pool
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::CommandPool,
        queue: QueueKind,
    },
}

impl GpuCommandPool {
    /// Queue the pool's command buffers are submitted to.
    pub fn queue(&self) -> QueueKind {
        match self {
            Self::Dummy(pool) => pool.queue(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { queue, .. } => *queue,
        }
    }
}

impl std::fmt::Debug for GpuCommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(pool) => f
                .debug_struct("GpuCommandPool::Dummy")
                .field("id", &pool.id())
                .field("queue", &pool.queue())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { pool, queue, .. } => f
                .debug_struct("GpuCommandPool::Vulkan")
                .field("pool", pool)
                .field("queue", queue)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a primary command buffer allocated from a [`GpuCommandPool`].
///
/// Command buffers are owned by their pool; dropping the handle does not free
/// anything.
pub enum GpuCommandBuffer {
    /// Simulated command buffer
    Dummy(Arc<DummyCommandBuffer>),
    /// Vulkan command buffer
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::CommandBuffer,
    },
}

impl GpuCommandBuffer {
    /// The simulated command buffer, for stages recording closures.
    pub fn as_dummy(&self) -> Option<&DummyCommandBuffer> {
        match self {
            Self::Dummy(buffer) => Some(buffer.as_ref()),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { .. } => None,
        }
    }

    /// The device and raw command buffer, for stages recording Vulkan commands.
    #[cfg(feature = "vulkan-backend")]
    pub fn as_vulkan(&self) -> Option<(&ash::Device, vk::CommandBuffer)> {
        match self {
            Self::Vulkan { device, buffer } => Some((device, *buffer)),
            Self::Dummy(_) => None,
        }
    }
}

impl std::fmt::Debug for GpuCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(buffer) => f
                .debug_struct("GpuCommandBuffer::Dummy")
                .field("id", &buffer.id())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, .. } => f
                .debug_struct("GpuCommandBuffer::Vulkan")
                .field("buffer", buffer)
                .finish_non_exhaustive(),
        }
    }
}

/// Reject fills `vkCmdFillBuffer` would reject.
pub(crate) fn check_fill_range(
    buffer: &GpuBuffer,
    offset: u64,
    size: u64,
) -> Result<(), GraphicsError> {
    if offset % 4 != 0 || size % 4 != 0 {
        return Err(GraphicsError::InvalidParameter(format!(
            "fill range {offset}+{size} is not 4-byte aligned"
        )));
    }
    match offset.checked_add(size) {
        Some(end) if end <= buffer.size() => Ok(()),
        _ => Err(GraphicsError::InvalidParameter(format!(
            "fill range {offset}+{size} exceeds buffer size {}",
            buffer.size()
        ))),
    }
}

/// Handle to a GPU storage buffer.
#[allow(clippy::large_enum_variant)]
pub enum GpuBuffer {
    /// Host memory standing in for device memory
    Dummy(Arc<DummyBuffer>),
    /// Vulkan buffer
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::Buffer,
        allocation: Mutex<Option<Allocation>>,
        allocator: Arc<Mutex<Allocator>>,
        size: u64,
    },
}

impl GpuBuffer {
    /// Size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Dummy(buffer) => buffer.size(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { size, .. } => *size,
        }
    }

    /// The simulated buffer, for stages reading and writing host memory.
    pub fn as_dummy(&self) -> Option<&Arc<DummyBuffer>> {
        match self {
            Self::Dummy(buffer) => Some(buffer),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { .. } => None,
        }
    }

    /// The raw Vulkan buffer.
    #[cfg(feature = "vulkan-backend")]
    pub fn as_vulkan(&self) -> Option<vk::Buffer> {
        match self {
            Self::Vulkan { buffer, .. } => Some(*buffer),
            Self::Dummy(_) => None,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(buffer) => f
                .debug_struct("GpuBuffer::Dummy")
                .field("label", &buffer.label())
                .field("size", &buffer.size())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

// ============================================================================
// Vulkan Resource Cleanup (Drop implementations)
// ============================================================================

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTimeline {
    fn drop(&mut self) {
        if let GpuTimeline::Vulkan { device, semaphore } = self {
            unsafe {
                device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let GpuFence::Vulkan { device, fence } = self {
            unsafe {
                device.destroy_fence(*fence, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuCommandPool {
    fn drop(&mut self) {
        if let GpuCommandPool::Vulkan { device, pool, .. } = self {
            // Frees every command buffer allocated from the pool.
            unsafe {
                device.destroy_command_pool(*pool, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            device,
            buffer,
            allocation,
            allocator,
            ..
        } = self
        {
            if let Some(allocation) = allocation.lock().take() {
                if let Err(e) = allocator.lock().free(allocation) {
                    log::warn!("Failed to free buffer memory: {}", e);
                }
            }
            unsafe {
                device.destroy_buffer(*buffer, None);
            }
        }
    }
}

// ============================================================================
// Submission description
// ============================================================================

/// A timeline together with a value: "wait until at least" or "signal to".
#[derive(Debug, Clone, Copy)]
pub struct TimelinePoint<'a> {
    pub timeline: &'a GpuTimeline,
    pub value: u64,
}

impl<'a> TimelinePoint<'a> {
    pub fn new(timeline: &'a GpuTimeline, value: u64) -> Self {
        Self { timeline, value }
    }
}

/// One queue submission.
///
/// Waits are evaluated queue-side before the command buffers start; signals
/// and the optional fence fire once they have all completed.
#[derive(Debug, Default)]
pub struct Submission<'a> {
    pub command_buffers: Vec<&'a GpuCommandBuffer>,
    pub waits: Vec<TimelinePoint<'a>>,
    pub signals: Vec<TimelinePoint<'a>>,
    pub fence: Option<&'a GpuFence>,
}

impl<'a> Submission<'a> {
    /// Create an empty submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command buffer.
    pub fn command_buffer(mut self, buffer: &'a GpuCommandBuffer) -> Self {
        self.command_buffers.push(buffer);
        self
    }

    /// Wait until `timeline` reaches at least `value` before executing.
    pub fn wait(mut self, timeline: &'a GpuTimeline, value: u64) -> Self {
        self.waits.push(TimelinePoint::new(timeline, value));
        self
    }

    /// Set `timeline` to `value` once the submission completes.
    pub fn signal(mut self, timeline: &'a GpuTimeline, value: u64) -> Self {
        self.signals.push(TimelinePoint::new(timeline, value));
        self
    }

    /// Signal `fence` once the submission completes.
    pub fn fence(mut self, fence: &'a GpuFence) -> Self {
        self.fence = Some(fence);
        self
    }
}

/// GPU backend trait for abstracting different GPU APIs.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Whether compute submissions run on a queue separate from graphics.
    fn has_dedicated_compute_queue(&self) -> bool;

    /// Create a timeline starting at `initial_value`.
    fn create_timeline(&self, initial_value: u64) -> Result<GpuTimeline, GraphicsError>;

    /// Read the value a timeline has reached.
    fn timeline_value(&self, timeline: &GpuTimeline) -> Result<u64, GraphicsError>;

    /// Block until every timeline has reached its value.
    ///
    /// Expiry of `timeout` is reported as [`GraphicsError::WaitTimeout`].
    fn wait_timelines(
        &self,
        waits: &[TimelinePoint<'_>],
        timeout: Duration,
    ) -> Result<(), GraphicsError>;

    /// Create a fence for CPU-GPU synchronization.
    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError>;

    /// Block until a fence is signaled.
    fn wait_fence(&self, fence: &GpuFence, timeout: Duration) -> Result<(), GraphicsError>;

    /// Return a fence to the unsignaled state.
    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError>;

    /// Check if a fence is signaled (non-blocking).
    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, GraphicsError>;

    /// Create a command pool whose buffers are submitted to `queue`.
    fn create_command_pool(&self, queue: QueueKind) -> Result<GpuCommandPool, GraphicsError>;

    /// Reset every command buffer of a pool, keeping their allocations.
    fn reset_command_pool(&self, pool: &GpuCommandPool) -> Result<(), GraphicsError>;

    /// Allocate a primary command buffer.
    fn allocate_command_buffer(
        &self,
        pool: &GpuCommandPool,
    ) -> Result<GpuCommandBuffer, GraphicsError>;

    /// Begin one-time-submit recording.
    fn begin_command_buffer(&self, buffer: &GpuCommandBuffer) -> Result<(), GraphicsError>;

    /// Finish recording.
    fn end_command_buffer(&self, buffer: &GpuCommandBuffer) -> Result<(), GraphicsError>;

    /// Make fill writes (compute shader or transfer) visible to vertex and indirect reads.
    ///
    /// Recorded into the graphics half of a dual-queue batch, on top of the
    /// execution dependency the timelines provide.
    fn cmd_compute_to_graphics_barrier(&self, buffer: &GpuCommandBuffer);

    /// Order compute and vertex/indirect work in both directions.
    ///
    /// Separates fill from draw when both run on one queue.
    fn cmd_full_barrier(&self, buffer: &GpuCommandBuffer);

    /// Fill `size` bytes of `buffer` starting at `offset` with repeated `data`.
    ///
    /// `offset` and `size` must be multiples of 4.
    fn cmd_fill_buffer(
        &self,
        command_buffer: &GpuCommandBuffer,
        buffer: &GpuBuffer,
        offset: u64,
        size: u64,
        data: u32,
    ) -> Result<(), GraphicsError>;

    /// Submit work to a queue.
    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> Result<(), GraphicsError>;

    /// Create a storage buffer shared by both queues.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError>;

    /// Block until every queue has drained.
    fn wait_idle(&self) -> Result<(), GraphicsError>;
}

/// Requested backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Vulkan when available, otherwise the simulated backend.
    #[default]
    Auto,
    /// Native Vulkan; fails if unavailable.
    Vulkan,
    /// Simulated backend.
    Dummy,
}

/// Parameters for backend creation.
#[derive(Debug, Clone, Default)]
pub struct BackendParameters {
    /// Enable API validation layers.
    pub validation: bool,
    /// Settings for the simulated backend.
    pub dummy: DummyConfig,
}

impl BackendParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_dummy_config(mut self, dummy: DummyConfig) -> Self {
        self.dummy = dummy;
        self
    }
}

/// Create the requested backend.
pub fn create_backend(
    backend: BackendType,
    params: &BackendParameters,
) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    match backend {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(DummyBackend::with_config(params.dummy.clone())?))
        }
        #[cfg(feature = "vulkan-backend")]
        BackendType::Vulkan => {
            let backend = vulkan::VulkanBackend::new(params)?;
            log::info!("Using Vulkan backend (ash)");
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "vulkan-backend"))]
        BackendType::Vulkan => Err(GraphicsError::FeatureNotSupported(
            "built without the vulkan-backend feature".to_string(),
        )),
        BackendType::Auto => {
            #[cfg(feature = "vulkan-backend")]
            {
                match vulkan::VulkanBackend::new(params) {
                    Ok(backend) => {
                        log::info!("Using Vulkan backend (ash)");
                        return Ok(Arc::new(backend));
                    }
                    Err(e) => {
                        log::warn!("Failed to create Vulkan backend: {}", e);
                    }
                }
            }

            log::info!("Using dummy backend");
            Ok(Arc::new(DummyBackend::with_config(params.dummy.clone())?))
        }
    }
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_dummy_backend() {
        let backend = create_backend(BackendType::Dummy, &BackendParameters::new()).unwrap();
        assert_eq!(backend.name(), "Dummy Backend");
        assert!(backend.has_dedicated_compute_queue());
    }

    #[test]
    fn test_submission_builder() {
        let backend = DummyBackend::new().unwrap();
        let timeline = backend.create_timeline(0).unwrap();
        let fence = backend.create_fence(false).unwrap();
        let submission = Submission::new()
            .wait(&timeline, 1)
            .signal(&timeline, 2)
            .fence(&fence);
        assert!(submission.command_buffers.is_empty());
        assert_eq!(submission.waits[0].value, 1);
        assert_eq!(submission.signals[0].value, 2);
        assert!(submission.fence.is_some());
    }
}
