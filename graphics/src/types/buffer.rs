//! Buffer descriptors.

/// Descriptor for creating a storage buffer.
///
/// Buffers created through the backend are usable as storage, indirect and
/// transfer targets, and are shared between the compute and graphics queue
/// families without ownership transfers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64) -> Self {
        Self { label: None, size }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
