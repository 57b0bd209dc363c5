//! Caller-visible remarks, warnings, progress, and cancellation.
//!
//! Long-running operations take an [`ExecutionContext`] that bundles a
//! [`Reporter`] sink with a [`CancellationToken`] and a cache of dedicated
//! worker pools. The default reporter emits
//! `tracing` events, so callers that already install a subscriber see the
//! messages without extra wiring.

use crate::core::collections::FastHashMap;
use crate::core::error::MappingError;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Progress is reported once per this many processed samples.
pub const PROGRESS_INTERVAL: usize = 200;

// =============================================================================
// REPORTER
// =============================================================================

/// Sink for non-fatal messages and progress.
///
/// Implementations must be cheap; progress is called from a worker thread.
pub trait Reporter: Send + Sync {
    /// Informational remark (e.g. an axis without periodicity was skipped).
    fn remark(&self, message: &str);

    /// Warning about a fallback the operation took.
    fn warning(&self, message: &str);

    /// `done` of `total` samples processed.
    fn progress(&self, done: usize, total: usize) {
        let _ = (done, total);
    }
}

/// Reporter that forwards to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn remark(&self, message: &str) {
        tracing::info!(target: "meshfield", "{message}");
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "meshfield", "{message}");
    }

    fn progress(&self, done: usize, total: usize) {
        tracing::trace!(target: "meshfield", done, total, "progress");
    }
}

/// A recorded reporter message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Report {
    /// See [`Reporter::remark`].
    Remark(String),
    /// See [`Reporter::warning`].
    Warning(String),
}

/// Reporter that stores messages for later inspection.
///
/// Progress calls are counted but not stored.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::report::{CollectingReporter, Report, Reporter};
///
/// let reporter = CollectingReporter::default();
/// reporter.warning("falling back");
/// assert_eq!(reporter.reports(), vec![Report::Warning("falling back".into())]);
/// ```
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<Report>>,
    progress_calls: Mutex<usize>,
}

impl CollectingReporter {
    /// Snapshot of recorded messages in arrival order.
    #[must_use]
    pub fn reports(&self) -> Vec<Report> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Recorded warnings only.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.reports()
            .into_iter()
            .filter_map(|r| match r {
                Report::Warning(w) => Some(w),
                Report::Remark(_) => None,
            })
            .collect()
    }

    /// Recorded remarks only.
    #[must_use]
    pub fn remarks(&self) -> Vec<String> {
        self.reports()
            .into_iter()
            .filter_map(|r| match r {
                Report::Remark(m) => Some(m),
                Report::Warning(_) => None,
            })
            .collect()
    }

    /// Number of progress callbacks received.
    #[must_use]
    pub fn progress_calls(&self) -> usize {
        self.progress_calls.lock().map(|n| *n).unwrap_or_default()
    }

    fn push(&self, report: Report) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
    }
}

impl Reporter for CollectingReporter {
    fn remark(&self, message: &str) {
        self.push(Report::Remark(message.to_owned()));
    }

    fn warning(&self, message: &str) {
        self.push(Report::Warning(message.to_owned()));
    }

    fn progress(&self, _done: usize, _total: usize) {
        if let Ok(mut n) = self.progress_calls.lock() {
            *n += 1;
        }
    }
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cooperative cancellation flag shared between a caller and running work.
///
/// Cloning yields a handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` once [`CancellationToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// =============================================================================
// EXECUTION CONTEXT
// =============================================================================

/// Reporter, cancellation handle, and worker pools passed to every top-level operation.
///
/// Clones share the cancellation flag and the pool cache.
#[derive(Clone)]
pub struct ExecutionContext {
    reporter: Arc<dyn Reporter>,
    cancellation: CancellationToken,
    pools: Arc<Mutex<FastHashMap<usize, Arc<ThreadPool>>>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Arc::new(TracingReporter))
    }
}

impl ExecutionContext {
    /// Context reporting to `reporter` with a fresh cancellation token.
    #[must_use]
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            reporter,
            cancellation: CancellationToken::new(),
            pools: Arc::default(),
        }
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The reporter sink.
    #[must_use]
    pub fn reporter(&self) -> &dyn Reporter {
        self.reporter.as_ref()
    }

    /// The cancellation token.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `Err(Cancelled)` if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Cancelled`].
    pub fn check_cancelled(&self) -> Result<(), MappingError> {
        if self.cancellation.is_cancelled() {
            Err(MappingError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A pool of exactly `workers` threads, built on first request and reused after.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::WorkerPool`] if the threads cannot be spawned.
    pub fn thread_pool(&self, workers: usize) -> Result<Arc<ThreadPool>, MappingError> {
        let workers = workers.max(1);
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pools.get(&workers) {
            return Ok(Arc::clone(pool));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("meshfield-worker-{i}"))
            .build()
            .map_err(|e| MappingError::WorkerPool {
                message: e.to_string(),
            })?;
        tracing::debug!(workers, "started worker pool");
        let pool = Arc::new(pool);
        pools.insert(workers, Arc::clone(&pool));
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared_across_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());

        let ctx = ExecutionContext::default().with_cancellation(other);
        assert!(ctx.check_cancelled().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_thread_pools_are_cached_per_size() {
        let ctx = ExecutionContext::default();
        let a = ctx.thread_pool(3).unwrap();
        let b = ctx.clone().thread_pool(3).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.current_num_threads(), 3);

        let other = ctx.thread_pool(2).unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[test]
    fn test_collecting_reporter_splits_kinds() {
        let reporter = CollectingReporter::default();
        reporter.remark("a");
        reporter.warning("b");
        reporter.progress(1, 2);
        assert_eq!(reporter.remarks(), vec!["a".to_owned()]);
        assert_eq!(reporter.warnings(), vec!["b".to_owned()]);
        assert_eq!(reporter.progress_calls(), 1);
    }
}
