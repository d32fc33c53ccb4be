//! Common types shared by the scheduler, the stages and the backends.
//!
//! This module contains the job descriptor handed to the stages, debug view
//! annotations, queue identifiers and buffer descriptors.

mod buffer;
mod common;
mod debug;
mod job;

pub use buffer::BufferDescriptor;
pub use common::{
    CHUNK_EDGE_LENGTH_CELLS, CHUNK_EDGE_LENGTH_TEXELS, DEFAULT_MAX_BATCH_SIZE, DEFAULT_SLOT_COUNT,
    QueueKind,
};
pub use debug::{DebugColor, DebugViewMode};
pub use job::JobDescriptor;
