use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::Vec3;

use mcubes_graphics::scheduler::{partition, BatchAnnotations, SlotPool};
use mcubes_graphics::{
    ComputeStage, DebugViewMode, DummyBackend, FramePipeline, FrameRequest, GraphicsError,
    GraphicsStage, JobDescriptor, Presenter, SchedulerConfig, SlotRef, StageContext,
    SubmissionStrategy,
};

fn grid_jobs(count: usize) -> Vec<JobDescriptor> {
    (0..count)
        .map(|i| JobDescriptor::new(Vec3::new(i as f32, 0.0, 0.0), Vec3::ONE, 0.0))
        .collect()
}

struct Nop;

impl ComputeStage<()> for Nop {
    fn fill(
        &mut self,
        _cx: &StageContext<'_>,
        _jobs: &[JobDescriptor],
        _slots: &[SlotRef<'_, ()>],
    ) -> Result<(), GraphicsError> {
        Ok(())
    }
}

impl GraphicsStage<()> for Nop {
    fn draw(
        &mut self,
        _cx: &StageContext<'_>,
        _jobs: &[JobDescriptor],
        _slots: &[SlotRef<'_, ()>],
        annotations: Option<&BatchAnnotations<'_>>,
    ) -> Result<(), GraphicsError> {
        black_box(annotations);
        Ok(())
    }
}

impl Presenter for Nop {
    fn present(&mut self, _cx: &StageContext<'_>) -> Result<(), GraphicsError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CPU-side bookkeeping
// ---------------------------------------------------------------------------

fn bench_partition(c: &mut Criterion) {
    let jobs = grid_jobs(4096);
    c.bench_function("partition_4096_jobs_by_6", |b| {
        b.iter(|| {
            for batch in partition(black_box(&jobs), 6) {
                black_box(batch.jobs.len());
            }
        });
    });
}

fn bench_slot_ring(c: &mut Criterion) {
    c.bench_function("slot_ring_acquire_and_tag_4096", |b| {
        b.iter(|| {
            let mut slots = SlotPool::new(vec![(); 12]);
            let mut indices = Vec::with_capacity(6);
            for signal in 1..=683u64 {
                indices.clear();
                indices.extend((0..6).map(|_| slots.acquire_next()));
                black_box(slots.max_last_use(&indices));
                for &index in &indices {
                    slots.tag_last_use(index, signal);
                }
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Full frames on the simulated device
// ---------------------------------------------------------------------------

fn bench_frame(c: &mut Criterion, strategy: SubmissionStrategy, name: &str) {
    let backend = Arc::new(DummyBackend::new().unwrap());
    let config = SchedulerConfig::default().with_strategy(strategy);
    let mut pipeline = FramePipeline::new(
        backend,
        &config,
        vec![(); config.slot_count],
        Box::new(Nop),
        Box::new(Nop),
        Box::new(Nop),
    )
    .unwrap();
    let jobs = grid_jobs(256);
    let request = FrameRequest {
        jobs: &jobs,
        batch_size: config.batch_size_limit(),
        debug_view: DebugViewMode::ColorBySlot,
    };

    c.bench_function(name, |b| {
        b.iter(|| black_box(pipeline.render_frame(&request).unwrap()));
    });
    pipeline.wait_idle().unwrap();
}

fn bench_dual_queue_frame(c: &mut Criterion) {
    bench_frame(c, SubmissionStrategy::DualQueue, "dual_queue_frame_256_jobs");
}

fn bench_single_queue_frame(c: &mut Criterion) {
    bench_frame(c, SubmissionStrategy::SingleQueue, "single_queue_frame_256_jobs");
}

criterion_group!(
    benches,
    bench_partition,
    bench_slot_ring,
    bench_dual_queue_frame,
    bench_single_queue_frame,
);
criterion_main!(benches);
