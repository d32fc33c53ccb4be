//! Common utilities for scheduler integration tests.
//!
//! The stages here run on the dummy backend and turn slot reuse races into
//! countable failures: every fill writes a fresh tag into its slot's buffer,
//! every draw checks that the slot still holds the tag its batch's fill wrote.
//! A slot overwritten before its draw ran shows up in
//! [`StageProbe::corruptions`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use glam::Vec3;
use parking_lot::Mutex;

use mcubes_graphics::backend::{DummyBuffer, DummyCommandBuffer};
use mcubes_graphics::scheduler::BatchAnnotations;
use mcubes_graphics::{
    BufferDescriptor, ComputeStage, DebugColor, DebugViewMode, DummyBackend, DummyConfig,
    FramePipeline, FrameRequest, FrameStats, GpuBackend, GpuBuffer, GraphicsError, GraphicsStage,
    JobDescriptor, Presenter, QueueKind, SchedulerConfig, SlotRef, StageContext,
    SubmissionStrategy,
};

/// Size of the tag each fill writes.
const TAG_SIZE: usize = std::mem::size_of::<u64>();

// ============================================================================
// Slots
// ============================================================================

/// Per-slot resources: one host-visible buffer holding the last fill's tag.
#[derive(Debug)]
pub struct TaggedSlot {
    buffer: GpuBuffer,
}

impl TaggedSlot {
    fn host(&self) -> Result<Arc<DummyBuffer>, GraphicsError> {
        self.buffer
            .as_dummy()
            .cloned()
            .ok_or_else(|| GraphicsError::InvalidParameter("slot is not host memory".into()))
    }
}

/// Create `count` tagged slots on `backend`.
pub fn create_slots(backend: &dyn GpuBackend, count: usize) -> Vec<TaggedSlot> {
    (0..count)
        .map(|i| TaggedSlot {
            buffer: backend
                .create_buffer(
                    &BufferDescriptor::new(TAG_SIZE as u64).with_label(format!("slot_{i}")),
                )
                .unwrap(),
        })
        .collect()
}

// ============================================================================
// Probe
// ============================================================================

/// A stage call as seen on the CPU while recording.
#[derive(Debug, Clone, PartialEq)]
pub struct StageCall {
    pub frame_number: u64,
    pub batch_index: usize,
    pub queue: QueueKind,
    pub slots: Vec<usize>,
    /// Debug colors handed to the draw, `None` for fills or with the view off.
    pub colors: Option<Vec<DebugColor>>,
}

/// Everything the tagged stages observed.
#[derive(Debug, Default)]
pub struct StageProbe {
    next_tag: AtomicU64,
    /// Tag the latest recorded fill wrote into each slot.
    expected: Mutex<HashMap<usize, u64>>,
    pub fills: Mutex<Vec<StageCall>>,
    pub draws: Mutex<Vec<StageCall>>,
    pub prepared_frames: AtomicUsize,
    pub finished_frames: AtomicUsize,
    pub presents_recorded: AtomicUsize,
    pub presents_executed: AtomicUsize,
    pub draws_executed: AtomicUsize,
    pub corruptions: AtomicUsize,
    pub equations: Mutex<Vec<String>>,
}

impl StageProbe {
    pub fn corruptions(&self) -> usize {
        self.corruptions.load(Ordering::Acquire)
    }

    pub fn fill_slots(&self) -> Vec<Vec<usize>> {
        self.fills.lock().iter().map(|c| c.slots.clone()).collect()
    }

    fn corrupted(&self) {
        self.corruptions.fetch_add(1, Ordering::AcqRel);
    }
}

fn recorder<'a>(cx: &StageContext<'a>) -> Result<&'a DummyCommandBuffer, GraphicsError> {
    cx.command_buffer.as_dummy().ok_or_else(|| {
        GraphicsError::InvalidParameter("tagged stages need the dummy backend".into())
    })
}

// ============================================================================
// Stages
// ============================================================================

/// Fill stage writing a fresh tag into every slot of the batch.
pub struct TaggedCompute {
    probe: Arc<StageProbe>,
    delay: Duration,
}

impl ComputeStage<TaggedSlot> for TaggedCompute {
    fn fill(
        &mut self,
        cx: &StageContext<'_>,
        _jobs: &[JobDescriptor],
        slots: &[SlotRef<'_, TaggedSlot>],
    ) -> Result<(), GraphicsError> {
        self.probe.fills.lock().push(StageCall {
            frame_number: cx.frame_number,
            batch_index: cx.batch_index,
            queue: cx.queue,
            slots: slots.iter().map(|s| s.index).collect(),
            colors: None,
        });

        let commands = recorder(cx)?;
        if !self.delay.is_zero() {
            let delay = self.delay;
            commands.record("fill delay", move || thread::sleep(delay))?;
        }
        for slot in slots {
            let tag = self.probe.next_tag.fetch_add(1, Ordering::AcqRel) + 1;
            self.probe.expected.lock().insert(slot.index, tag);
            let buffer = slot.resources.host()?;
            let probe = self.probe.clone();
            commands.record(format!("fill slot {}", slot.index), move || {
                if buffer.write(0, &tag.to_le_bytes()).is_err() {
                    probe.corrupted();
                }
            })?;
        }
        Ok(())
    }

    fn replace_equation(&mut self, equation: &str) -> Result<(), GraphicsError> {
        if equation.trim().is_empty() {
            return Err(GraphicsError::InvalidParameter("empty equation".into()));
        }
        self.probe.equations.lock().push(equation.to_string());
        Ok(())
    }
}

/// Draw stage checking that every slot still holds its fill's tag.
pub struct TaggedGraphics {
    probe: Arc<StageProbe>,
    delay: Duration,
}

impl GraphicsStage<TaggedSlot> for TaggedGraphics {
    fn prepare_frame(&mut self, _cx: &StageContext<'_>) -> Result<(), GraphicsError> {
        self.probe.prepared_frames.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn draw(
        &mut self,
        cx: &StageContext<'_>,
        _jobs: &[JobDescriptor],
        slots: &[SlotRef<'_, TaggedSlot>],
        annotations: Option<&BatchAnnotations<'_>>,
    ) -> Result<(), GraphicsError> {
        self.probe.draws.lock().push(StageCall {
            frame_number: cx.frame_number,
            batch_index: cx.batch_index,
            queue: cx.queue,
            slots: slots.iter().map(|s| s.index).collect(),
            colors: annotations.map(|a| a.colors.clone()),
        });

        let commands = recorder(cx)?;
        for slot in slots {
            let expected = self
                .probe
                .expected
                .lock()
                .get(&slot.index)
                .copied()
                .ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!("slot {} drawn unfilled", slot.index))
                })?;
            let buffer = slot.resources.host()?;
            let probe = self.probe.clone();
            let delay = self.delay;
            commands.record(format!("draw slot {}", slot.index), move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                match buffer.read(0, TAG_SIZE) {
                    Ok(bytes) if bytes == expected.to_le_bytes() => {}
                    _ => probe.corrupted(),
                }
                probe.draws_executed.fetch_add(1, Ordering::AcqRel);
            })?;
        }
        Ok(())
    }

    fn finish_frame(&mut self, _cx: &StageContext<'_>) -> Result<(), GraphicsError> {
        self.probe.finished_frames.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Presenter counting recorded and executed presentations.
pub struct CountingPresenter {
    probe: Arc<StageProbe>,
}

impl Presenter for CountingPresenter {
    fn present(&mut self, cx: &StageContext<'_>) -> Result<(), GraphicsError> {
        self.probe.presents_recorded.fetch_add(1, Ordering::AcqRel);
        let probe = self.probe.clone();
        recorder(cx)?.record("present", move || {
            probe.presents_executed.fetch_add(1, Ordering::AcqRel);
        })
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Knobs for [`TestContext::with_options`].
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub strategy: SubmissionStrategy,
    pub device: DummyConfig,
    pub slot_count: usize,
    pub max_batch_size: usize,
    pub fill_delay: Duration,
    pub draw_delay: Duration,
}

impl TestOptions {
    pub fn new(strategy: SubmissionStrategy) -> Self {
        Self {
            strategy,
            device: DummyConfig::default(),
            slot_count: 12,
            max_batch_size: 6,
            fill_delay: Duration::ZERO,
            draw_delay: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.device = self.device.with_queue_latency(latency);
        self
    }

    pub fn with_fill_delay(mut self, delay: Duration) -> Self {
        self.fill_delay = delay;
        self
    }

    pub fn with_draw_delay(mut self, delay: Duration) -> Self {
        self.draw_delay = delay;
        self
    }

    pub fn without_compute_queue(mut self) -> Self {
        self.device = self.device.with_dedicated_compute_queue(false);
        self
    }
}

/// A pipeline over tagged stages on a simulated device.
pub struct TestContext {
    pub pipeline: FramePipeline<TaggedSlot>,
    pub backend: Arc<DummyBackend>,
    pub probe: Arc<StageProbe>,
}

impl TestContext {
    pub fn new(strategy: SubmissionStrategy) -> Self {
        Self::with_options(TestOptions::new(strategy))
    }

    pub fn with_options(options: TestOptions) -> Self {
        Self::try_with_options(options).unwrap()
    }

    pub fn try_with_options(options: TestOptions) -> Result<Self, GraphicsError> {
        let _ = env_logger::builder().is_test(true).try_init();

        let backend = Arc::new(DummyBackend::with_config(options.device)?);
        let probe = Arc::new(StageProbe::default());
        let config = SchedulerConfig::new()
            .with_slot_count(options.slot_count)
            .with_max_batch_size(options.max_batch_size)
            .with_strategy(options.strategy)
            .with_wait_timeout(Duration::from_secs(20));
        let slots = create_slots(backend.as_ref(), options.slot_count);

        let pipeline = FramePipeline::new(
            backend.clone(),
            &config,
            slots,
            Box::new(TaggedCompute {
                probe: probe.clone(),
                delay: options.fill_delay,
            }),
            Box::new(TaggedGraphics {
                probe: probe.clone(),
                delay: options.draw_delay,
            }),
            Box::new(CountingPresenter {
                probe: probe.clone(),
            }),
        )?;

        Ok(Self {
            pipeline,
            backend,
            probe,
        })
    }

    /// Render one frame with the debug view off.
    pub fn render(&mut self, jobs: &[JobDescriptor], batch_size: usize) -> FrameStats {
        self.render_with_view(jobs, batch_size, DebugViewMode::Off)
    }

    pub fn render_with_view(
        &mut self,
        jobs: &[JobDescriptor],
        batch_size: usize,
        debug_view: DebugViewMode,
    ) -> FrameStats {
        self.pipeline
            .render_frame(&FrameRequest {
                jobs,
                batch_size,
                debug_view,
            })
            .unwrap()
    }

    /// Wait for the device and check that nothing went wrong on it.
    pub fn finish(&self) {
        self.pipeline.wait_idle().unwrap();
        assert!(
            self.backend.violations().is_empty(),
            "protocol violations: {:?}",
            self.backend.violations()
        );
        assert_eq!(self.probe.corruptions(), 0, "slots overwritten before drawn");
    }
}

/// `count` unit jobs along the x axis.
pub fn jobs(count: usize) -> Vec<JobDescriptor> {
    (0..count)
        .map(|i| JobDescriptor::new(Vec3::new(i as f32, 0.0, 0.0), Vec3::ONE, 0.0))
        .collect()
}
