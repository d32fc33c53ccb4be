//! Dummy GPU backend for testing and headless runs.
//!
//! Unlike a no-op backend, this one models the parts of a GPU the scheduler
//! relies on: each queue is a worker thread executing submissions in FIFO
//! order, timeline waits block a queue (not the submitting thread), and
//! command buffers hold closures that run when the queue reaches them.
//!
//! Misuse that a real driver would turn into undefined behaviour (resetting a
//! pool with pending work, re-recording a pending command buffer, signalling a
//! timeline backwards) is recorded in [`DummyBackend::violations`] so tests can
//! assert the protocol never does it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::GraphicsError;
use crate::profiling::set_thread_name;
use crate::types::{BufferDescriptor, QueueKind};

use super::{
    check_fill_range, GpuBackend, GpuBuffer, GpuCommandBuffer, GpuCommandPool, GpuFence,
    GpuTimeline, Submission, TimelinePoint,
};

/// Upper bound for [`GpuBackend::wait_idle`] on the simulated device.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for the simulated device.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Run compute submissions on their own queue.
    pub dedicated_compute_queue: bool,
    /// Time each submission spends "executing" before its commands run.
    pub queue_latency: Duration,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            dedicated_compute_queue: true,
            queue_latency: Duration::ZERO,
        }
    }
}

impl DummyConfig {
    pub fn with_dedicated_compute_queue(mut self, dedicated: bool) -> Self {
        self.dedicated_compute_queue = dedicated;
        self
    }

    pub fn with_queue_latency(mut self, latency: Duration) -> Self {
        self.queue_latency = latency;
        self
    }
}

// ============================================================================
// Simulated objects
// ============================================================================

/// Simulated timeline semaphore.
#[derive(Debug)]
pub struct DummyTimeline {
    id: u64,
    value: Mutex<u64>,
    changed: Condvar,
}

impl DummyTimeline {
    fn new(id: u64, initial_value: u64) -> Self {
        Self {
            id,
            value: Mutex::new(initial_value),
            changed: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Value reached so far.
    pub fn value(&self) -> u64 {
        *self.value.lock()
    }

    /// Returns whether `value` was reached before `deadline`.
    fn wait_until(&self, value: u64, deadline: Option<Instant>) -> bool {
        let mut current = self.value.lock();
        while *current < value {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut current, deadline).timed_out() {
                        return *current >= value;
                    }
                }
                None => self.changed.wait(&mut current),
            }
        }
        true
    }

    fn signal(&self, value: u64) -> Result<(), String> {
        let mut current = self.value.lock();
        if value <= *current {
            return Err(format!(
                "timeline {} signalled with {} but already at {}",
                self.id, value, *current
            ));
        }
        *current = value;
        self.changed.notify_all();
        Ok(())
    }
}

/// Simulated fence.
#[derive(Debug)]
pub struct DummyFence {
    signaled: Mutex<bool>,
    changed: Condvar,
}

impl DummyFence {
    fn new(signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(signaled),
            changed: Condvar::new(),
        }
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    fn wait_until(&self, deadline: Instant) -> bool {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.changed.wait_until(&mut signaled, deadline).timed_out() {
                return *signaled;
            }
        }
        true
    }

    fn signal(&self) {
        *self.signaled.lock() = true;
        self.changed.notify_all();
    }

    fn reset(&self) {
        *self.signaled.lock() = false;
    }
}

/// Simulated command pool.
#[derive(Debug)]
pub struct DummyCommandPool {
    id: u64,
    queue: QueueKind,
    /// Submissions referencing this pool's buffers that have not completed.
    pending: AtomicUsize,
    allocated: AtomicUsize,
    resets: AtomicU64,
}

impl DummyCommandPool {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Number of command buffers allocated from this pool.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Number of times the pool was reset.
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Acquire)
    }
}

/// A recorded operation, executed on the queue's worker thread.
pub type DummyCommand = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingPhase {
    Initial,
    Recording,
    Executable,
}

struct RecordingState {
    phase: RecordingPhase,
    commands: Vec<DummyCommand>,
    labels: Vec<String>,
}

/// Simulated command buffer recording closures.
pub struct DummyCommandBuffer {
    id: u64,
    pool: Arc<DummyCommandPool>,
    pending: AtomicUsize,
    state: Mutex<RecordingState>,
}

impl std::fmt::Debug for DummyCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyCommandBuffer")
            .field("id", &self.id)
            .field("pool", &self.pool.id)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl DummyCommandBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record `op` to run when the queue executes this command buffer.
    pub fn record(
        &self,
        label: impl Into<String>,
        op: impl FnOnce() + Send + 'static,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.phase != RecordingPhase::Recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "command buffer {} is not recording",
                self.id
            )));
        }
        state.labels.push(label.into());
        state.commands.push(Box::new(op));
        Ok(())
    }

    /// Labels recorded since the last begin, in order.
    pub fn labels(&self) -> Vec<String> {
        self.state.lock().labels.clone()
    }

    /// Whether a submission containing this buffer is still executing.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    fn mark(&self, label: &str) {
        let mut state = self.state.lock();
        if state.phase == RecordingPhase::Recording {
            state.labels.push(label.to_string());
        }
    }
}

/// Host memory standing in for a device buffer.
#[derive(Debug)]
pub struct DummyBuffer {
    label: Option<String>,
    data: Mutex<Vec<u8>>,
}

impl DummyBuffer {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    /// Copy `data` into the buffer at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let mut contents = self.data.lock();
        let range = checked_range(offset, data.len(), contents.len())?;
        contents[range].copy_from_slice(data);
        Ok(())
    }

    /// Read `len` bytes starting at `offset`.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, GraphicsError> {
        let contents = self.data.lock();
        let range = checked_range(offset, len, contents.len())?;
        Ok(contents[range].to_vec())
    }
}

fn checked_range(
    offset: u64,
    len: usize,
    size: usize,
) -> Result<std::ops::Range<usize>, GraphicsError> {
    let start = usize::try_from(offset)
        .map_err(|_| GraphicsError::InvalidParameter(format!("offset {offset} out of range")))?;
    match start.checked_add(len) {
        Some(end) if end <= size => Ok(start..end),
        _ => Err(GraphicsError::InvalidParameter(format!(
            "range {start}+{len} exceeds buffer size {size}"
        ))),
    }
}

// ============================================================================
// Queues
// ============================================================================

/// What a submission did, as seen by the simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    /// Position in submission order.
    pub sequence: u64,
    /// Queue the submission was addressed to.
    pub queue: QueueKind,
    /// `(timeline id, value)` pairs waited on.
    pub waits: Vec<(u64, u64)>,
    /// `(timeline id, value)` pairs signalled.
    pub signals: Vec<(u64, u64)>,
    pub command_buffers: usize,
    pub signals_fence: bool,
    /// Number of completed `wait_idle` calls before this submission.
    pub idle_epoch: u64,
}

struct QueuedWork {
    sequence: u64,
    waits: Vec<(Arc<DummyTimeline>, u64)>,
    commands: Vec<DummyCommand>,
    signals: Vec<(Arc<DummyTimeline>, u64)>,
    fence: Option<Arc<DummyFence>>,
    buffers: Vec<Arc<DummyCommandBuffer>>,
}

/// State shared between the backend and its queue workers.
struct DeviceState {
    in_flight: Mutex<usize>,
    drained: Condvar,
    violations: Mutex<Vec<String>>,
    log: Mutex<Vec<SubmissionRecord>>,
    idle_waits: AtomicU64,
}

impl DeviceState {
    fn violation(&self, message: String) {
        log::error!("DummyBackend: {}", message);
        self.violations.lock().push(message);
    }

    fn execute(&self, work: QueuedWork, latency: Duration) {
        for (timeline, value) in &work.waits {
            timeline.wait_until(*value, None);
        }
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        log::trace!("DummyBackend: executing submission {}", work.sequence);
        for command in work.commands {
            command();
        }
        // Buffers are released before anything observable is signalled, so a
        // waiter woken by the signal may immediately reuse them.
        for buffer in &work.buffers {
            buffer.pending.fetch_sub(1, Ordering::AcqRel);
            buffer.pool.pending.fetch_sub(1, Ordering::AcqRel);
        }
        for (timeline, value) in &work.signals {
            if let Err(message) = timeline.signal(*value) {
                self.violation(message);
            }
        }
        if let Some(fence) = &work.fence {
            fence.signal();
        }
        let mut in_flight = self.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.drained.notify_all();
        }
    }
}

struct QueueWorker {
    sender: Mutex<Option<mpsc::Sender<QueuedWork>>>,
}

impl QueueWorker {
    fn spawn(
        kind: QueueKind,
        state: Arc<DeviceState>,
        latency: Duration,
    ) -> Result<Self, GraphicsError> {
        let (sender, receiver) = mpsc::channel::<QueuedWork>();
        thread::Builder::new()
            .name(format!("dummy-{}-queue", kind.label()))
            .spawn(move || {
                match kind {
                    QueueKind::Graphics => {
                        set_thread_name!("dummy graphics queue");
                    }
                    QueueKind::Compute => {
                        set_thread_name!("dummy compute queue");
                    }
                }
                for work in receiver {
                    state.execute(work, latency);
                }
            })
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!("Failed to spawn queue worker: {e}"))
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
        })
    }

    fn push(&self, work: QueuedWork) -> Result<(), GraphicsError> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender.send(work).map_err(|_| GraphicsError::DeviceLost),
            None => Err(GraphicsError::DeviceLost),
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Simulated GPU backend.
pub struct DummyBackend {
    config: DummyConfig,
    state: Arc<DeviceState>,
    graphics: QueueWorker,
    compute: Option<QueueWorker>,
    next_id: AtomicU64,
    next_sequence: AtomicU64,
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DummyBackend {
    /// Create a simulated device with a dedicated compute queue and no latency.
    pub fn new() -> Result<Self, GraphicsError> {
        Self::with_config(DummyConfig::default())
    }

    /// Create a simulated device.
    pub fn with_config(config: DummyConfig) -> Result<Self, GraphicsError> {
        let state = Arc::new(DeviceState {
            in_flight: Mutex::new(0),
            drained: Condvar::new(),
            violations: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            idle_waits: AtomicU64::new(0),
        });
        let graphics =
            QueueWorker::spawn(QueueKind::Graphics, state.clone(), config.queue_latency)?;
        let compute = if config.dedicated_compute_queue {
            Some(QueueWorker::spawn(
                QueueKind::Compute,
                state.clone(),
                config.queue_latency,
            )?)
        } else {
            None
        };
        log::trace!("DummyBackend: created ({:?})", config);
        Ok(Self {
            config,
            state,
            graphics,
            compute,
            next_id: AtomicU64::new(1),
            next_sequence: AtomicU64::new(0),
        })
    }

    /// Protocol violations observed so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.violations.lock().clone()
    }

    /// Every submission made so far, in order.
    pub fn submission_log(&self) -> Vec<SubmissionRecord> {
        self.state.log.lock().clone()
    }

    /// Number of completed `wait_idle` calls.
    pub fn wait_idle_count(&self) -> u64 {
        self.state.idle_waits.load(Ordering::Acquire)
    }

    /// Submissions not yet completed.
    pub fn in_flight(&self) -> usize {
        *self.state.in_flight.lock()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn queue(&self, queue: QueueKind) -> &QueueWorker {
        match (queue, &self.compute) {
            (QueueKind::Compute, Some(compute)) => compute,
            _ => &self.graphics,
        }
    }

    fn misuse(&self, error: GraphicsError) -> GraphicsError {
        self.state.violation(error.to_string());
        error
    }
}

impl Drop for DummyBackend {
    fn drop(&mut self) {
        // Closing the channels lets workers exit once their queues drain.
        self.graphics.sender.lock().take();
        if let Some(compute) = &self.compute {
            compute.sender.lock().take();
        }
    }
}

fn dummy_timeline(timeline: &GpuTimeline) -> Result<&Arc<DummyTimeline>, GraphicsError> {
    match timeline {
        GpuTimeline::Dummy(timeline) => Ok(timeline),
        #[cfg(feature = "vulkan-backend")]
        _ => Err(foreign("timeline")),
    }
}

fn dummy_fence(fence: &GpuFence) -> Result<&Arc<DummyFence>, GraphicsError> {
    match fence {
        GpuFence::Dummy(fence) => Ok(fence),
        #[cfg(feature = "vulkan-backend")]
        _ => Err(foreign("fence")),
    }
}

fn dummy_pool(pool: &GpuCommandPool) -> Result<&Arc<DummyCommandPool>, GraphicsError> {
    match pool {
        GpuCommandPool::Dummy(pool) => Ok(pool),
        #[cfg(feature = "vulkan-backend")]
        _ => Err(foreign("command pool")),
    }
}

fn dummy_command_buffer(
    buffer: &GpuCommandBuffer,
) -> Result<&Arc<DummyCommandBuffer>, GraphicsError> {
    match buffer {
        GpuCommandBuffer::Dummy(buffer) => Ok(buffer),
        #[cfg(feature = "vulkan-backend")]
        _ => Err(foreign("command buffer")),
    }
}

#[cfg(feature = "vulkan-backend")]
fn foreign(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} belongs to another backend"))
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn has_dedicated_compute_queue(&self) -> bool {
        self.compute.is_some()
    }

    fn create_timeline(&self, initial_value: u64) -> Result<GpuTimeline, GraphicsError> {
        let timeline = DummyTimeline::new(self.next_id(), initial_value);
        log::trace!("DummyBackend: creating timeline {}", timeline.id);
        Ok(GpuTimeline::Dummy(Arc::new(timeline)))
    }

    fn timeline_value(&self, timeline: &GpuTimeline) -> Result<u64, GraphicsError> {
        Ok(dummy_timeline(timeline)?.value())
    }

    fn wait_timelines(
        &self,
        waits: &[TimelinePoint<'_>],
        timeout: Duration,
    ) -> Result<(), GraphicsError> {
        let deadline = Instant::now() + timeout;
        for wait in waits {
            let timeline = dummy_timeline(wait.timeline)?;
            if !timeline.wait_until(wait.value, Some(deadline)) {
                return Err(GraphicsError::WaitTimeout(format!(
                    "timeline {} stuck at {} waiting for {} ({:?})",
                    timeline.id,
                    timeline.value(),
                    wait.value,
                    timeout
                )));
            }
        }
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError> {
        Ok(GpuFence::Dummy(Arc::new(DummyFence::new(signaled))))
    }

    fn wait_fence(&self, fence: &GpuFence, timeout: Duration) -> Result<(), GraphicsError> {
        if dummy_fence(fence)?.wait_until(Instant::now() + timeout) {
            Ok(())
        } else {
            Err(GraphicsError::WaitTimeout(format!(
                "fence not signaled within {timeout:?}"
            )))
        }
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        dummy_fence(fence)?.reset();
        Ok(())
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, GraphicsError> {
        Ok(dummy_fence(fence)?.is_signaled())
    }

    fn create_command_pool(&self, queue: QueueKind) -> Result<GpuCommandPool, GraphicsError> {
        let pool = DummyCommandPool {
            id: self.next_id(),
            queue,
            pending: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
            resets: AtomicU64::new(0),
        };
        log::trace!("DummyBackend: creating {} command pool {}", queue, pool.id);
        Ok(GpuCommandPool::Dummy(Arc::new(pool)))
    }

    fn reset_command_pool(&self, pool: &GpuCommandPool) -> Result<(), GraphicsError> {
        let pool = dummy_pool(pool)?;
        let pending = pool.pending.load(Ordering::Acquire);
        if pending > 0 {
            return Err(self.misuse(GraphicsError::ResourceInUse(format!(
                "command pool {} reset with {} pending submissions",
                pool.id, pending
            ))));
        }
        pool.resets.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn allocate_command_buffer(
        &self,
        pool: &GpuCommandPool,
    ) -> Result<GpuCommandBuffer, GraphicsError> {
        let pool = dummy_pool(pool)?;
        pool.allocated.fetch_add(1, Ordering::AcqRel);
        Ok(GpuCommandBuffer::Dummy(Arc::new(DummyCommandBuffer {
            id: self.next_id(),
            pool: pool.clone(),
            pending: AtomicUsize::new(0),
            state: Mutex::new(RecordingState {
                phase: RecordingPhase::Initial,
                commands: Vec::new(),
                labels: Vec::new(),
            }),
        })))
    }

    fn begin_command_buffer(&self, buffer: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        let buffer = dummy_command_buffer(buffer)?;
        if buffer.is_pending() {
            return Err(self.misuse(GraphicsError::ResourceInUse(format!(
                "command buffer {} re-recorded while pending",
                buffer.id
            ))));
        }
        let mut state = buffer.state.lock();
        state.phase = RecordingPhase::Recording;
        state.commands.clear();
        state.labels.clear();
        Ok(())
    }

    fn end_command_buffer(&self, buffer: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        let buffer = dummy_command_buffer(buffer)?;
        let mut state = buffer.state.lock();
        if state.phase != RecordingPhase::Recording {
            drop(state);
            return Err(self.misuse(GraphicsError::InvalidParameter(format!(
                "command buffer {} ended without begin",
                buffer.id
            ))));
        }
        state.phase = RecordingPhase::Executable;
        Ok(())
    }

    fn cmd_compute_to_graphics_barrier(&self, buffer: &GpuCommandBuffer) {
        if let Some(buffer) = buffer.as_dummy() {
            buffer.mark("barrier(compute->graphics)");
        }
    }

    fn cmd_full_barrier(&self, buffer: &GpuCommandBuffer) {
        if let Some(buffer) = buffer.as_dummy() {
            buffer.mark("barrier(full)");
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
        let commands = dummy_command_buffer(command_buffer)?;
        let target = buffer.as_dummy().cloned().ok_or_else(|| {
            GraphicsError::InvalidParameter("buffer belongs to another backend".into())
        })?;
        check_fill_range(buffer, offset, size)?;
        let len = usize::try_from(size).map_err(|_| GraphicsError::OutOfMemory)?;
        let bytes: Vec<u8> = data.to_le_bytes().into_iter().cycle().take(len).collect();
        let state = self.state.clone();
        commands.record(format!("fill_buffer({offset}+{size})"), move || {
            if let Err(e) = target.write(offset, &bytes) {
                state.violation(e.to_string());
            }
        })
    }

    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> Result<(), GraphicsError> {
        let mut buffers = Vec::with_capacity(submission.command_buffers.len());
        for buffer in &submission.command_buffers {
            let buffer = dummy_command_buffer(buffer)?;
            if buffer.state.lock().phase != RecordingPhase::Executable {
                return Err(self.misuse(GraphicsError::InvalidParameter(format!(
                    "command buffer {} submitted without being ended",
                    buffer.id
                ))));
            }
            buffers.push(buffer.clone());
        }

        let fence = match submission.fence {
            Some(fence) => {
                let fence = dummy_fence(fence)?;
                if fence.is_signaled() {
                    return Err(self.misuse(GraphicsError::InvalidParameter(
                        "fence submitted while still signaled".to_string(),
                    )));
                }
                Some(fence.clone())
            }
            None => None,
        };

        let resolve = |points: &[TimelinePoint<'_>]| {
            points
                .iter()
                .map(|p| dummy_timeline(p.timeline).map(|t| (t.clone(), p.value)))
                .collect::<Result<Vec<_>, _>>()
        };
        let waits = resolve(&submission.waits)?;
        let signals = resolve(&submission.signals)?;

        // One-time submit: the recorded commands move into the queue.
        let mut commands = Vec::new();
        for buffer in &buffers {
            let mut state = buffer.state.lock();
            commands.append(&mut state.commands);
            state.phase = RecordingPhase::Initial;
            buffer.pending.fetch_add(1, Ordering::AcqRel);
            buffer.pool.pending.fetch_add(1, Ordering::AcqRel);
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.state.log.lock().push(SubmissionRecord {
            sequence,
            queue,
            waits: waits.iter().map(|(t, v)| (t.id, *v)).collect(),
            signals: signals.iter().map(|(t, v)| (t.id, *v)).collect(),
            command_buffers: buffers.len(),
            signals_fence: fence.is_some(),
            idle_epoch: self.state.idle_waits.load(Ordering::Acquire),
        });
        log::trace!(
            "DummyBackend: submit #{} to {} (waits: {:?}, signals: {:?})",
            sequence,
            queue,
            submission.waits.iter().map(|w| w.value).collect::<Vec<_>>(),
            submission.signals.iter().map(|s| s.value).collect::<Vec<_>>()
        );

        *self.state.in_flight.lock() += 1;
        self.queue(queue).push(QueuedWork {
            sequence,
            waits,
            commands,
            signals,
            fence,
            buffers,
        })
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let size = usize::try_from(descriptor.size).map_err(|_| GraphicsError::OutOfMemory)?;
        Ok(GpuBuffer::Dummy(Arc::new(DummyBuffer {
            label: descriptor.label.clone(),
            data: Mutex::new(vec![0u8; size]),
        })))
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        let deadline = Instant::now() + IDLE_TIMEOUT;
        let mut in_flight = self.state.in_flight.lock();
        while *in_flight > 0 {
            if self
                .state
                .drained
                .wait_until(&mut in_flight, deadline)
                .timed_out()
                && *in_flight > 0
            {
                return Err(GraphicsError::WaitTimeout(format!(
                    "{} submissions still in flight after {:?}",
                    *in_flight, IDLE_TIMEOUT
                )));
            }
        }
        drop(in_flight);
        self.state.idle_waits.fetch_add(1, Ordering::AcqRel);
        log::trace!("DummyBackend: device idle");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(backend: &DummyBackend, queue: QueueKind) -> (GpuCommandPool, GpuCommandBuffer) {
        let pool = backend.create_command_pool(queue).unwrap();
        let buffer = backend.allocate_command_buffer(&pool).unwrap();
        backend.begin_command_buffer(&buffer).unwrap();
        (pool, buffer)
    }

    #[test]
    fn test_timeline_signal_and_wait() {
        let backend = DummyBackend::new().unwrap();
        let timeline = backend.create_timeline(0).unwrap();
        let (_pool, buffer) = recording(&backend, QueueKind::Compute);
        backend.end_command_buffer(&buffer).unwrap();

        backend
            .submit(
                QueueKind::Compute,
                &Submission::new().command_buffer(&buffer).signal(&timeline, 1),
            )
            .unwrap();
        backend
            .wait_timelines(&[TimelinePoint::new(&timeline, 1)], Duration::from_secs(5))
            .unwrap();
        assert_eq!(backend.timeline_value(&timeline).unwrap(), 1);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_wait_timeout() {
        let backend = DummyBackend::new().unwrap();
        let timeline = backend.create_timeline(0).unwrap();
        let result = backend.wait_timelines(
            &[TimelinePoint::new(&timeline, 1)],
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(GraphicsError::WaitTimeout(_))));
    }

    #[test]
    fn test_queue_waits_for_other_queue() {
        let backend = DummyBackend::new().unwrap();
        let timeline = backend.create_timeline(0).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Graphics waits on a value compute has not produced yet.
        let (_gp, graphics) = recording(&backend, QueueKind::Graphics);
        let log = order.clone();
        graphics
            .as_dummy()
            .unwrap()
            .record("draw", move || log.lock().push("draw"))
            .unwrap();
        backend.end_command_buffer(&graphics).unwrap();
        backend
            .submit(
                QueueKind::Graphics,
                &Submission::new().command_buffer(&graphics).wait(&timeline, 1),
            )
            .unwrap();

        thread::sleep(Duration::from_millis(20));
        let (_cp, compute) = recording(&backend, QueueKind::Compute);
        let log = order.clone();
        compute
            .as_dummy()
            .unwrap()
            .record("fill", move || log.lock().push("fill"))
            .unwrap();
        backend.end_command_buffer(&compute).unwrap();
        backend
            .submit(
                QueueKind::Compute,
                &Submission::new().command_buffer(&compute).signal(&timeline, 1),
            )
            .unwrap();

        backend.wait_idle().unwrap();
        assert_eq!(*order.lock(), vec!["fill", "draw"]);
    }

    #[test]
    fn test_reset_pending_pool_is_violation() {
        let config = DummyConfig::default().with_queue_latency(Duration::from_millis(50));
        let backend = DummyBackend::with_config(config).unwrap();
        let (pool, buffer) = recording(&backend, QueueKind::Graphics);
        backend.end_command_buffer(&buffer).unwrap();
        backend
            .submit(QueueKind::Graphics, &Submission::new().command_buffer(&buffer))
            .unwrap();

        let result = backend.reset_command_pool(&pool);
        assert!(matches!(result, Err(GraphicsError::ResourceInUse(_))));
        assert_eq!(backend.violations().len(), 1);

        backend.wait_idle().unwrap();
        backend.reset_command_pool(&pool).unwrap();
    }

    #[test]
    fn test_backwards_signal_is_violation() {
        let backend = DummyBackend::new().unwrap();
        let timeline = backend.create_timeline(5).unwrap();
        let (_pool, buffer) = recording(&backend, QueueKind::Graphics);
        backend.end_command_buffer(&buffer).unwrap();
        backend
            .submit(
                QueueKind::Graphics,
                &Submission::new().command_buffer(&buffer).signal(&timeline, 5),
            )
            .unwrap();
        backend.wait_idle().unwrap();
        assert_eq!(backend.violations().len(), 1);
    }

    #[test]
    fn test_unended_submit_rejected() {
        let backend = DummyBackend::new().unwrap();
        let (_pool, buffer) = recording(&backend, QueueKind::Graphics);
        let submission = Submission::new().command_buffer(&buffer);
        let result = backend.submit(QueueKind::Graphics, &submission);
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_fence_round_trip() {
        let backend = DummyBackend::new().unwrap();
        let fence = backend.create_fence(true).unwrap();
        backend.wait_fence(&fence, Duration::from_millis(1)).unwrap();
        backend.reset_fence(&fence).unwrap();
        assert!(!backend.is_fence_signaled(&fence).unwrap());

        let (_pool, buffer) = recording(&backend, QueueKind::Graphics);
        backend.end_command_buffer(&buffer).unwrap();
        backend
            .submit(
                QueueKind::Graphics,
                &Submission::new().command_buffer(&buffer).fence(&fence),
            )
            .unwrap();
        backend.wait_fence(&fence, Duration::from_secs(5)).unwrap();
        assert!(backend.submission_log()[0].signals_fence);
    }

    #[test]
    fn test_shared_queue_without_dedicated_compute() {
        let backend =
            DummyBackend::with_config(DummyConfig::default().with_dedicated_compute_queue(false))
                .unwrap();
        assert!(!backend.has_dedicated_compute_queue());
    }

    #[test]
    fn test_fill_buffer_runs_on_queue() {
        let backend = DummyBackend::new().unwrap();
        let buffer = backend.create_buffer(&BufferDescriptor::new(16)).unwrap();
        let (_pool, commands) = recording(&backend, QueueKind::Compute);
        backend
            .cmd_fill_buffer(&commands, &buffer, 4, 8, 0xAABB_CCDD)
            .unwrap();
        assert!(backend.cmd_fill_buffer(&commands, &buffer, 2, 4, 0).is_err());
        assert!(backend.cmd_fill_buffer(&commands, &buffer, 12, 8, 0).is_err());

        let host = buffer.as_dummy().unwrap();
        assert_eq!(host.read(4, 4).unwrap(), vec![0; 4]);
        backend.end_command_buffer(&commands).unwrap();
        backend
            .submit(QueueKind::Compute, &Submission::new().command_buffer(&commands))
            .unwrap();
        backend.wait_idle().unwrap();
        assert_eq!(host.read(0, 4).unwrap(), vec![0; 4]);
        assert_eq!(host.read(4, 8).unwrap(), [0xDD, 0xCC, 0xBB, 0xAA].repeat(2));
    }

    #[test]
    fn test_buffer_bounds() {
        let backend = DummyBackend::new().unwrap();
        let buffer = backend.create_buffer(&BufferDescriptor::new(8)).unwrap();
        let host = buffer.as_dummy().unwrap();
        host.write(0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(host.read(0, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(host.write(6, &[0; 4]).is_err());
    }
}
