//! Progress counters shared by the compute and graphics queues.
//!
//! Each counter is a GPU timeline that only moves forward. Every dual-queue
//! batch is assigned one fresh value `V`; compute signals `compute_done = V`
//! after filling, graphics signals `graphics_done = V` after drawing. A slot
//! tagged with `V` may be overwritten once `graphics_done >= V`.

use std::time::Duration;

use crate::backend::{GpuBackend, GpuTimeline, TimelinePoint};
use crate::error::GraphicsError;

/// Which of the two progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Signalled by the compute queue when a batch's fill completes.
    ComputeDone,
    /// Signalled by the graphics queue when a batch's draw completes.
    GraphicsDone,
}

impl CounterKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::ComputeDone => "compute_done",
            Self::GraphicsDone => "graphics_done",
        }
    }
}

impl std::fmt::Display for CounterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The two timelines plus the value the next batch will signal.
#[derive(Debug)]
pub struct ProgressCounters {
    compute_done: GpuTimeline,
    graphics_done: GpuTimeline,
    /// Value the next batch signals. Starts at 1 so that 0 means "never used".
    upcoming: u64,
}

impl ProgressCounters {
    /// Create both timelines at 0.
    pub fn new(backend: &dyn GpuBackend) -> Result<Self, GraphicsError> {
        Ok(Self {
            compute_done: backend.create_timeline(0)?,
            graphics_done: backend.create_timeline(0)?,
            upcoming: 1,
        })
    }

    /// Issue the next signal value.
    pub fn advance(&mut self) -> u64 {
        let value = self.upcoming;
        self.upcoming += 1;
        value
    }

    /// The value [`advance`](Self::advance) will return next.
    pub fn upcoming(&self) -> u64 {
        self.upcoming
    }

    /// The most recently issued value, 0 before the first batch.
    pub fn last_issued(&self) -> u64 {
        self.upcoming - 1
    }

    /// Value a counter has reached on the GPU.
    pub fn completed(
        &self,
        backend: &dyn GpuBackend,
        kind: CounterKind,
    ) -> Result<u64, GraphicsError> {
        backend.timeline_value(self.timeline(kind))
    }

    /// Block until every listed counter has reached its value.
    ///
    /// Values of 0 are always satisfied and skipped.
    pub fn wait_until_at_least(
        &self,
        backend: &dyn GpuBackend,
        targets: &[(CounterKind, u64)],
        timeout: Duration,
    ) -> Result<(), GraphicsError> {
        let points: Vec<TimelinePoint<'_>> = targets
            .iter()
            .filter(|(_, value)| *value > 0)
            .map(|&(kind, value)| TimelinePoint::new(self.timeline(kind), value))
            .collect();
        if points.is_empty() {
            return Ok(());
        }
        log::trace!("Waiting on CPU for {:?}", targets);
        backend.wait_timelines(&points, timeout).map_err(|e| match e {
            GraphicsError::WaitTimeout(detail) => {
                GraphicsError::WaitTimeout(format!("progress counters {:?}: {}", targets, detail))
            }
            other => other,
        })
    }

    pub(crate) fn timeline(&self, kind: CounterKind) -> &GpuTimeline {
        match kind {
            CounterKind::ComputeDone => &self.compute_done,
            CounterKind::GraphicsDone => &self.graphics_done,
        }
    }
}
