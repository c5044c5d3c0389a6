//! Batch update counters
//!
//! Every counter uses Relaxed ordering: they are observational only and do
//! not synchronize other memory.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every batch created from one factory
#[derive(Debug, Default)]
pub struct UpdateMetrics {
    started: AtomicU64,
    committed: AtomicU64,
    no_op: AtomicU64,
    dry_runs: AtomicU64,
    business_aborted: AtomicU64,
    contention_exhausted: AtomicU64,
    failed: AtomicU64,
    commit_attempts: AtomicU64,
    lock_failures: AtomicU64,
    post_update_failures: AtomicU64,
    index_failures: AtomicU64,
}

/// Point-in-time copy of [`UpdateMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// `execute()` calls
    pub started: u64,
    /// Batches that committed a ref batch
    pub committed: u64,
    /// Batches where nothing needed committing
    pub no_op: u64,
    /// Batches executed as a dry run
    pub dry_runs: u64,
    /// Batches aborted by an operation's business error
    pub business_aborted: u64,
    /// Batches that ran out of attempts
    pub contention_exhausted: u64,
    /// Batches that failed for storage or internal reasons
    pub failed: u64,
    /// Ref database commits attempted
    pub commit_attempts: u64,
    /// Commits that lost a compare-and-swap race
    pub lock_failures: u64,
    /// `post_update` callbacks that returned an error
    pub post_update_failures: u64,
    /// Index or index-delete calls that failed
    pub index_failures: u64,
}

impl MetricsSnapshot {
    /// Batches that reached a terminal outcome
    pub fn finished(&self) -> u64 {
        self.committed
            + self.no_op
            + self.dry_runs
            + self.business_aborted
            + self.contention_exhausted
            + self.failed
    }
}

macro_rules! recorders {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl UpdateMetrics {
    /// Fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    recorders! {
        record_start => started,
        record_commit => committed,
        record_no_op => no_op,
        record_dry_run => dry_runs,
        record_business_abort => business_aborted,
        record_contention_exhausted => contention_exhausted,
        record_failure => failed,
        record_commit_attempt => commit_attempts,
        record_lock_failure => lock_failures,
        record_post_update_failure => post_update_failures,
        record_index_failure => index_failures,
    }

    /// Copy the current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            no_op: self.no_op.load(Ordering::Relaxed),
            dry_runs: self.dry_runs.load(Ordering::Relaxed),
            business_aborted: self.business_aborted.load(Ordering::Relaxed),
            contention_exhausted: self.contention_exhausted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            commit_attempts: self.commit_attempts.load(Ordering::Relaxed),
            lock_failures: self.lock_failures.load(Ordering::Relaxed),
            post_update_failures: self.post_update_failures.load(Ordering::Relaxed),
            index_failures: self.index_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = UpdateMetrics::new();
        metrics.record_start();
        metrics.record_start();
        metrics.record_commit();
        metrics.record_no_op();
        metrics.record_lock_failure();

        let snap = metrics.snapshot();
        assert_eq!(snap.started, 2);
        assert_eq!(snap.committed, 1);
        assert_eq!(snap.lock_failures, 1);
        assert_eq!(snap.finished(), 2);
    }
}
