//! Job descriptors produced by the job source.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// One unit of isosurface work: a region of space sampled at time `t`.
///
/// Produced fresh every frame by the job source and consumed by exactly one
/// slot. The layout matches the push constant block read by the fill and draw
/// programs, so the struct is uploaded as-is with [`bytemuck::bytes_of`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct JobDescriptor {
    /// Low corner of the region, in world space.
    pub offset: Vec3,
    /// Animation parameter of the scalar field.
    pub t: f32,
    /// Extent of the region along each axis.
    pub size: Vec3,
}

impl JobDescriptor {
    /// Create a job covering `offset .. offset + size` at time `t`.
    pub fn new(offset: Vec3, size: Vec3, t: f32) -> Self {
        Self { offset, t, size }
    }

    /// High corner of the region.
    pub fn high(&self) -> Vec3 {
        self.offset + self.size
    }
}
