//! Deterministic two-stage parallel execution.
//!
//! Work over an index range runs as two explicit stages:
//!
//! 1. [`ParallelMap`] splits `0..len` into `P` contiguous slices (`len / P`
//!    items each, the remainder folded into the last worker) and fills a
//!    pre-sized [`CandidateArray`]. Each worker writes only its own slice.
//! 2. A [`SequentialReduce`] runs on the calling thread after every worker
//!    has finished, consuming the whole candidate array. Anything with an
//!    ordering dependency (CSR compaction, collision resolution) lives here.
//!
//! The partition depends only on `len` and `P`, so results are reproducible
//! for a fixed worker count. Slices run on the current rayon pool when it has
//! at least `P` threads, and otherwise on a pool of `P` threads cached in the
//! [`ExecutionContext`]. Workers poll the caller's cancellation token
//! every item; worker 0 alone reports progress.

use crate::core::error::MappingError;
use crate::core::report::{ExecutionContext, PROGRESS_INTERVAL};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

/// Environment variable that overrides the default worker count.
pub const NUM_WORKERS_ENV: &str = "MESHFIELD_NUM_WORKERS";

/// Resolve the worker count: explicit request, then `MESHFIELD_NUM_WORKERS`,
/// then the machine's available parallelism.
#[must_use]
pub fn resolve_num_workers(requested: Option<usize>) -> usize {
    if let Some(n) = requested.filter(|&n| n > 0) {
        return n;
    }
    if let Ok(v) = std::env::var(NUM_WORKERS_ENV)
        && let Ok(n) = v.trim().parse::<usize>()
        && n > 0
    {
        return n;
    }
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Contiguous index ranges for `workers` workers over `0..len`.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::parallel::partition;
///
/// assert_eq!(partition(10, 3), vec![0..3, 3..6, 6..10]);
/// assert_eq!(partition(2, 4), vec![0..0, 0..0, 0..0, 0..2]);
/// ```
#[must_use]
pub fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let local = len / workers;
    (0..workers)
        .map(|w| {
            let start = local * w;
            let end = if w + 1 == workers { len } else { start + local };
            start..end
        })
        .collect()
}

// =============================================================================
// CANDIDATE ARRAY
// =============================================================================

/// Stage-one output: `len` items of `stride` slots each.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateArray<T> {
    slots: Vec<T>,
    stride: usize,
}

impl<T> CandidateArray<T> {
    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.slots.len() / self.stride
        }
    }

    /// Returns `true` when there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots per item.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Slots of item `index`.
    #[must_use]
    pub fn item(&self, index: usize) -> &[T] {
        &self.slots[index * self.stride..(index + 1) * self.stride]
    }

    /// Iterate items in index order.
    pub fn items(&self) -> impl Iterator<Item = &[T]> + '_ {
        self.slots.chunks_exact(self.stride.max(1))
    }

    /// The flat slot buffer.
    #[must_use]
    pub fn into_slots(self) -> Vec<T> {
        self.slots
    }
}

// =============================================================================
// STAGES
// =============================================================================

/// Stage one: fill per-item slots in parallel over disjoint slices.
#[derive(Clone, Copy, Debug)]
pub struct ParallelMap<'a> {
    workers: usize,
    ctx: &'a ExecutionContext,
}

impl<'a> ParallelMap<'a> {
    /// A map stage with `workers` workers (at least one).
    #[must_use]
    pub fn new(workers: usize, ctx: &'a ExecutionContext) -> Self {
        Self {
            workers: workers.max(1),
            ctx,
        }
    }

    /// Worker count.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f(index, slots)` for every index in `0..len`.
    ///
    /// `slots` is the `stride`-long slice belonging to `index`, pre-filled
    /// with `init`. The first error from any worker aborts the others.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Cancelled`] if the context is cancelled,
    /// [`MappingError::WorkerPool`] if the pool cannot start, or the first
    /// error returned by `f`.
    pub fn run<T, F>(
        &self,
        len: usize,
        stride: usize,
        init: T,
        f: F,
    ) -> Result<CandidateArray<T>, MappingError>
    where
        T: Clone + Send,
        F: Fn(usize, &mut [T]) -> Result<(), MappingError> + Sync,
    {
        let mut slots = vec![init; len * stride];
        let ranges = partition(len, self.workers);
        let failed = AtomicBool::new(false);

        let mut chunks: Vec<(usize, Range<usize>, &mut [T])> = Vec::with_capacity(ranges.len());
        let mut rest: &mut [T] = &mut slots;
        for (worker, range) in ranges.into_iter().enumerate() {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(range.len() * stride);
            chunks.push((worker, range, head));
            rest = tail;
        }

        let work = |(worker, range, chunk): (usize, Range<usize>, &mut [T])| {
            let total = range.len();
            for (offset, index) in range.enumerate() {
                if failed.load(Ordering::Relaxed) {
                    return Ok(());
                }
                if self.ctx.cancellation().is_cancelled() {
                    failed.store(true, Ordering::Relaxed);
                    return Err(MappingError::Cancelled);
                }
                let item = &mut chunk[offset * stride..(offset + 1) * stride];
                if let Err(err) = f(index, item) {
                    failed.store(true, Ordering::Relaxed);
                    return Err(err);
                }
                if worker == 0 && offset % PROGRESS_INTERVAL == 0 {
                    self.ctx.reporter().progress(offset, total);
                }
            }
            Ok(())
        };

        let results: Vec<Result<(), MappingError>> = if self.workers == 1 {
            chunks.into_iter().map(work).collect()
        } else if self.workers <= rayon::current_num_threads() {
            // One task per slice already caps the concurrency at `workers`.
            chunks.into_par_iter().map(work).collect()
        } else {
            self.ctx
                .thread_pool(self.workers)?
                .install(|| chunks.into_par_iter().map(work).collect())
        };

        // Prefer a real failure over the cancellation it may have triggered.
        let mut first_err = None;
        for err in results.into_iter().filter_map(Result::err) {
            if matches!(first_err, None | Some(MappingError::Cancelled)) {
                first_err = Some(err);
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }
        self.ctx.check_cancelled()?;
        Ok(CandidateArray { slots, stride })
    }
}

/// Stage two: single-writer reduction over the complete candidate array.
pub trait SequentialReduce<T> {
    /// Reduction result.
    type Output;

    /// Consume the candidates produced by [`ParallelMap::run`].
    ///
    /// # Errors
    ///
    /// Returns a [`MappingError`] when the candidates violate a reduction rule.
    fn reduce(
        self,
        candidates: CandidateArray<T>,
        ctx: &ExecutionContext,
    ) -> Result<Self::Output, MappingError>;
}

/// Run a [`ParallelMap`] stage and then a [`SequentialReduce`] stage.
///
/// # Errors
///
/// Propagates errors from either stage.
pub fn map_then_reduce<T, F, R>(
    map: &ParallelMap<'_>,
    len: usize,
    stride: usize,
    init: T,
    f: F,
    reduce: R,
) -> Result<R::Output, MappingError>
where
    T: Clone + Send,
    F: Fn(usize, &mut [T]) -> Result<(), MappingError> + Sync,
    R: SequentialReduce<T>,
{
    let candidates = map.run(len, stride, init, f)?;
    reduce.reduce(candidates, map.ctx)
}
