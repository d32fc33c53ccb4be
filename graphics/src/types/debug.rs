//! Debug visualisation modes for drawn chunks.

use bytemuck::{Pod, Zeroable};

/// How the graphics stage annotates the chunks it draws.
///
/// Purely visual; the scheduler forwards the resulting annotations but never
/// lets them influence synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DebugViewMode {
    /// Plain shading.
    #[default]
    Off,
    /// Draw each job's bounding box.
    Bounds,
    /// Bounding boxes, and tint every chunk by the batch that produced it.
    ColorByBatch,
    /// Bounding boxes, and tint every chunk by the slot it was written to.
    ColorBySlot,
}

impl DebugViewMode {
    /// All modes in cycling order.
    pub const ALL: [Self; 4] = [
        Self::Off,
        Self::Bounds,
        Self::ColorByBatch,
        Self::ColorBySlot,
    ];

    /// Human readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Bounds => "draw bounds",
            Self::ColorByBatch => "color by batch",
            Self::ColorBySlot => "color by slot",
        }
    }

    /// Whether bounding boxes are drawn in this mode.
    pub fn draws_bounds(self) -> bool {
        self != Self::Off
    }

    /// Next mode, wrapping around.
    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    /// Previous mode, wrapping around.
    pub fn previous(self) -> Self {
        let index = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(index + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl std::fmt::Display for DebugViewMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-chunk tint pushed to the draw program.
///
/// Layout matches the debug view push constant block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct DebugColor {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    /// Non-zero when the tint replaces the normal shading.
    pub enabled: u32,
}

impl DebugColor {
    /// An enabled tint.
    pub fn new(red: f32, green: f32, blue: f32) -> Self {
        Self {
            red,
            green,
            blue,
            enabled: 1,
        }
    }
}
