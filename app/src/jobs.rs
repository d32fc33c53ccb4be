//! Grid job source: splits the bounding box into chunk-sized jobs.

use glam::{IVec3, Vec3};

use mcubes_graphics::{JobDescriptor, CHUNK_EDGE_LENGTH_CELLS};

/// Largest accepted target cell count per axis.
pub const MAX_TARGET_CELLS: i32 = 1024;

/// Default target cell count per axis (four chunks).
pub const DEFAULT_TARGET_CELLS: i32 = 508;

const STEP: i32 = CHUNK_EDGE_LENGTH_CELLS as i32;

/// Produces the frame's jobs from a bounding box and target cell counts.
///
/// Target counts are kept as set; they are clamped to `0..=1024` only when
/// jobs are generated, and the first such clamp logs a warning.
#[derive(Debug, Clone)]
pub struct GridJobSource {
    low: Vec3,
    high: Vec3,
    target_cells: IVec3,
    warned_clamp: bool,
}

impl Default for GridJobSource {
    fn default() -> Self {
        Self {
            low: Vec3::splat(-2.0),
            high: Vec3::splat(2.0),
            target_cells: IVec3::splat(DEFAULT_TARGET_CELLS),
            warned_clamp: false,
        }
    }
}

impl GridJobSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bounds(mut self, low: Vec3, high: Vec3) -> Self {
        self.low = low;
        self.high = high;
        self
    }

    pub fn with_target_cells(mut self, cells: IVec3) -> Self {
        self.target_cells = cells;
        self
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.low, self.high)
    }

    pub fn target_cells(&self) -> IVec3 {
        self.target_cells
    }

    /// Add one chunk's worth of cells along `axis` (0 = x, 1 = y, 2 = z).
    pub fn grow_cells(&mut self, axis: usize) {
        self.target_cells[axis] = self.target_cells[axis].saturating_add(STEP);
    }

    /// Remove one chunk's worth of cells along `axis`, keeping at least one.
    pub fn shrink_cells(&mut self, axis: usize) {
        if self.target_cells[axis] > STEP {
            self.target_cells[axis] -= STEP;
        }
    }

    /// Jobs along each axis for the current target counts.
    pub fn job_counts(&mut self) -> IVec3 {
        let clamped = self.target_cells.clamp(IVec3::ZERO, IVec3::splat(MAX_TARGET_CELLS));
        if clamped != self.target_cells && !self.warned_clamp {
            log::warn!(
                "Clamping target cell counts to 0..={} (requested {})",
                MAX_TARGET_CELLS,
                self.target_cells
            );
            self.warned_clamp = true;
        }
        let per_axis = |cells: i32| ((cells as f32 / STEP as f32).round() as i32).max(1);
        IVec3::new(per_axis(clamped.x), per_axis(clamped.y), per_axis(clamped.z))
    }

    /// Regenerate the jobs at animation time `t` into `jobs`.
    ///
    /// Jobs are ordered z outer, y, then x inner. Both corners of a job are
    /// computed from the grid, so neighbours agree on their shared plane.
    pub fn generate(&mut self, t: f32, jobs: &mut Vec<JobDescriptor>) {
        let counts = self.job_counts();
        let whole = self.high - self.low;
        let divisor = counts.as_vec3();

        jobs.clear();
        jobs.reserve((counts.x * counts.y * counts.z) as usize);
        for z in 0..counts.z {
            for y in 0..counts.y {
                for x in 0..counts.x {
                    let cell = IVec3::new(x, y, z);
                    let low = self.low + whole * (cell.as_vec3() / divisor);
                    let high = self.low + whole * ((cell + IVec3::ONE).as_vec3() / divisor);
                    jobs.push(JobDescriptor::new(low, high - low, t));
                }
            }
        }
    }
}
