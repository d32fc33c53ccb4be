//! Queue identifiers and sizing constants.

/// Number of slots in the ring shared by the compute and graphics queues.
pub const DEFAULT_SLOT_COUNT: usize = 12;

/// Largest batch a frame may request by default.
///
/// Must stay at or below half of [`DEFAULT_SLOT_COUNT`].
pub const DEFAULT_MAX_BATCH_SIZE: usize = 6;

/// Edge length, in texels, of the 3D scalar field a single job samples.
pub const CHUNK_EDGE_LENGTH_TEXELS: u32 = 128;

/// Marching cubes cells along one edge of a job's region.
pub const CHUNK_EDGE_LENGTH_CELLS: u32 = CHUNK_EDGE_LENGTH_TEXELS - 1;

const _: () = assert!(DEFAULT_MAX_BATCH_SIZE * 2 <= DEFAULT_SLOT_COUNT);

/// Hardware queue a submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Graphics/compute/transfer queue; also the presentation queue.
    Graphics,
    /// Dedicated asynchronous compute queue.
    Compute,
}

impl QueueKind {
    /// Short name for logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
