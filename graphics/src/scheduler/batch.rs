//! Splitting a frame's jobs into fixed-size batches.

use crate::types::JobDescriptor;

/// A contiguous run of at most `batch_size` jobs.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    /// Position of the batch within the frame.
    pub index: usize,
    /// Index of the first job within the frame.
    pub start: usize,
    pub jobs: &'a [JobDescriptor],
    pub is_first: bool,
    pub is_last: bool,
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Number of batches `jobs` jobs split into.
pub fn batch_count(jobs: usize, batch_size: usize) -> usize {
    assert!(batch_size > 0, "batch size must be at least 1");
    jobs.div_ceil(batch_size)
}

/// Iterate over the batches of `jobs`, in order.
///
/// # Panics
///
/// Panics if `batch_size` is 0.
pub fn partition(jobs: &[JobDescriptor], batch_size: usize) -> Batches<'_> {
    Batches {
        chunks: jobs.chunks(batch_size.max(1)),
        total: batch_count(jobs.len(), batch_size),
        batch_size,
        index: 0,
    }
}

/// Iterator returned by [`partition`].
#[derive(Debug, Clone)]
pub struct Batches<'a> {
    chunks: std::slice::Chunks<'a, JobDescriptor>,
    total: usize,
    batch_size: usize,
    index: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let jobs = self.chunks.next()?;
        let index = self.index;
        self.index += 1;
        Some(Batch {
            index,
            start: index * self.batch_size,
            jobs,
            is_first: index == 0,
            is_last: index + 1 == self.total,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn jobs(count: usize) -> Vec<JobDescriptor> {
        (0..count)
            .map(|i| JobDescriptor::new(Vec3::splat(i as f32), Vec3::ONE, 0.0))
            .collect()
    }

    #[test]
    fn test_batch_count() {
        assert_eq!(batch_count(0, 6), 0);
        assert_eq!(batch_count(1, 6), 1);
        assert_eq!(batch_count(6, 6), 1);
        assert_eq!(batch_count(16, 6), 3);
        assert_eq!(batch_count(64, 1), 64);
    }

    #[test]
    fn test_partition_sizes() {
        let jobs = jobs(16);
        let sizes: Vec<usize> = partition(&jobs, 6).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![6, 6, 4]);
    }

    #[test]
    fn test_partition_flags() {
        let jobs = jobs(16);
        let batches: Vec<_> = partition(&jobs, 6).collect();
        assert!(batches[0].is_first && !batches[0].is_last);
        assert!(!batches[1].is_first && !batches[1].is_last);
        assert!(!batches[2].is_first && batches[2].is_last);
        assert_eq!(batches[2].start, 12);
    }

    #[test]
    fn test_single_batch_is_first_and_last() {
        let jobs = jobs(3);
        let batches: Vec<_> = partition(&jobs, 6).collect();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].is_first && batches[0].is_last);
    }

    #[test]
    fn test_partition_concatenates_to_input() {
        let jobs = jobs(23);
        let joined: Vec<JobDescriptor> = partition(&jobs, 5)
            .flat_map(|b| b.jobs.iter().copied())
            .collect();
        assert_eq!(joined, jobs);
    }

    #[test]
    fn test_empty_frame_has_no_batches() {
        assert_eq!(partition(&[], 4).count(), 0);
        assert_eq!(partition(&[], 4).len(), 0);
    }

    #[test]
    #[should_panic(expected = "batch size must be at least 1")]
    fn test_zero_batch_size_panics() {
        let jobs = jobs(2);
        let _ = partition(&jobs, 0);
    }
}
