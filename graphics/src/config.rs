//! Scheduler configuration.

use std::time::Duration;

use crate::backend::GpuBackend;
use crate::error::GraphicsError;
use crate::scheduler::SubmissionStrategy;
use crate::types::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_SLOT_COUNT};

/// Default bound on every CPU-side wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the frame pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of resource slots in the ring.
    pub slot_count: usize,
    /// Largest batch size a frame may request.
    pub max_batch_size: usize,
    /// Strategy used from the first frame.
    pub strategy: SubmissionStrategy,
    /// Bound on every CPU wait for the GPU; expiry is fatal.
    pub wait_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            strategy: SubmissionStrategy::DualQueue,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_strategy(mut self, strategy: SubmissionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Check the sizes against each other and the strategy against `backend`.
    pub fn validate(&self, backend: &dyn GpuBackend) -> Result<(), GraphicsError> {
        if self.max_batch_size == 0 {
            return Err(GraphicsError::InvalidConfiguration(
                "max batch size must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size.saturating_mul(2) > self.slot_count {
            return Err(GraphicsError::InvalidConfiguration(format!(
                "max batch size {} exceeds half of the {} slots",
                self.max_batch_size, self.slot_count
            )));
        }
        if self.wait_timeout.is_zero() {
            return Err(GraphicsError::InvalidConfiguration(
                "wait timeout must be positive".to_string(),
            ));
        }
        validate_strategy(self.strategy, backend)
    }

    /// Largest batch size a frame may use: `min(max_batch_size, slot_count / 2)`.
    pub fn batch_size_limit(&self) -> usize {
        self.max_batch_size.min(self.slot_count / 2)
    }
}

/// Check that `backend` can run `strategy`.
pub fn validate_strategy(
    strategy: SubmissionStrategy,
    backend: &dyn GpuBackend,
) -> Result<(), GraphicsError> {
    if strategy == SubmissionStrategy::DualQueue && !backend.has_dedicated_compute_queue() {
        return Err(GraphicsError::InvalidConfiguration(format!(
            "{} requires a dedicated compute queue, which {} does not have",
            strategy,
            backend.name()
        )));
    }
    Ok(())
}
