//! Fault-injecting ref database
//!
//! Faults are queued and consumed one per commit, in order. A commit with no
//! queued fault is delegated to the wrapped [`InMemoryRefDatabase`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use refbatch_core::{ObjectId, RefName, UpdateResult};

use crate::ref_update::{CommitError, CommitOutcome, RefConflict, RefUpdate};
use crate::refs::{check_batch, InMemoryRefDatabase, RefDatabase};

/// Fault applied to the next commit
pub enum Fault {
    /// Report every ref in the batch as concurrently modified
    LockFailure,
    /// Fail with a storage error after validation; nothing is applied
    StorageFailure,
    /// Run a hook (e.g. a competing writer) and then commit normally
    BeforeCommit(Box<dyn FnOnce() + Send>),
}

impl Fault {
    /// Convenience constructor for [`Fault::BeforeCommit`]
    pub fn before_commit(hook: impl FnOnce() + Send + 'static) -> Self {
        Fault::BeforeCommit(Box::new(hook))
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::LockFailure => f.write_str("LockFailure"),
            Fault::StorageFailure => f.write_str("StorageFailure"),
            Fault::BeforeCommit(_) => f.write_str("BeforeCommit(..)"),
        }
    }
}

/// Ref database that fails commits on demand
#[derive(Debug, Default)]
pub struct FaultyRefDatabase {
    inner: InMemoryRefDatabase,
    faults: Mutex<VecDeque<Fault>>,
    always_lock_failure: AtomicBool,
    commit_attempts: AtomicUsize,
}

impl FaultyRefDatabase {
    /// Wrap a fresh in-memory ref database
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for an upcoming commit
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push_back(fault);
    }

    /// Fail every commit with a lock failure until turned off
    pub fn set_always_lock_failure(&self, enabled: bool) {
        self.always_lock_failure.store(enabled, Ordering::SeqCst);
    }

    /// Faults not consumed yet
    pub fn pending_faults(&self) -> usize {
        self.faults.lock().len()
    }

    /// Commits attempted through this database, including failed ones
    pub fn commit_attempts(&self) -> usize {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    fn simulated_conflicts(&self, updates: &[RefUpdate]) -> Vec<RefConflict> {
        updates
            .iter()
            .map(|u| RefConflict {
                name: u.name.clone(),
                expected: u.old,
                actual: self
                    .inner
                    .exact_ref(&u.name)
                    .ok()
                    .flatten()
                    .unwrap_or(ObjectId::ZERO),
            })
            .collect()
    }
}

impl RefDatabase for FaultyRefDatabase {
    fn exact_ref(&self, name: &RefName) -> UpdateResult<Option<ObjectId>> {
        self.inner.exact_ref(name)
    }

    fn refs_by_prefix(&self, prefix: &str) -> UpdateResult<Vec<(RefName, ObjectId)>> {
        self.inner.refs_by_prefix(prefix)
    }

    fn commit_clearing(
        &self,
        updates: &[RefUpdate],
        cleared: &[String],
    ) -> Result<CommitOutcome, CommitError> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);

        if self.always_lock_failure.load(Ordering::SeqCst) {
            return Err(CommitError::LockFailure {
                conflicts: self.simulated_conflicts(updates),
            });
        }

        // Released before running a hook: the hook may commit through us.
        let fault = self.faults.lock().pop_front();
        match fault {
            None => self.inner.commit_clearing(updates, cleared),
            Some(Fault::LockFailure) => Err(CommitError::LockFailure {
                conflicts: self.simulated_conflicts(updates),
            }),
            Some(Fault::StorageFailure) => {
                check_batch(updates, cleared)?;
                Err(CommitError::Storage("injected storage failure".to_string()))
            }
            Some(Fault::BeforeCommit(hook)) => {
                hook();
                self.inner.commit_clearing(updates, cleared)
            }
        }
    }

    fn version(&self) -> u64 {
        self.inner.version()
    }
}
