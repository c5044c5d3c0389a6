//! Ref database: named pointers with atomic multi-ref compare-and-swap
//!
//! [`InMemoryRefDatabase`] keeps all refs in one `BTreeMap` behind a
//! `parking_lot::RwLock`. A commit takes the write lock, validates every
//! update against current state, and only then applies them, so readers never
//! observe a partially applied batch.
//!
//! A commit may also clear ref name prefixes: every ref under a cleared
//! prefix must be deleted by the same batch. A ref there that the batch does
//! not name was created concurrently and fails the commit as a lock failure.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use refbatch_core::{ObjectId, RefName, UpdateResult};

use crate::ref_update::{CommitError, CommitOutcome, RefConflict, RefUpdate};

/// Storage of ref name to object id mappings
pub trait RefDatabase: Send + Sync {
    /// Current value of a ref, `None` if absent
    fn exact_ref(&self, name: &RefName) -> UpdateResult<Option<ObjectId>>;

    /// All refs whose name starts with `prefix`, sorted by name
    fn refs_by_prefix(&self, prefix: &str) -> UpdateResult<Vec<(RefName, ObjectId)>>;

    /// Apply all updates atomically or none of them
    fn commit(&self, updates: &[RefUpdate]) -> Result<CommitOutcome, CommitError> {
        self.commit_clearing(updates, &[])
    }

    /// Apply all updates atomically, leaving no ref under any of `cleared`
    fn commit_clearing(
        &self,
        updates: &[RefUpdate],
        cleared: &[String],
    ) -> Result<CommitOutcome, CommitError>;

    /// Number of successful non-empty commits so far
    fn version(&self) -> u64;
}

/// Check a batch for structural errors before touching state
pub(crate) fn check_batch(updates: &[RefUpdate], cleared: &[String]) -> Result<(), CommitError> {
    let mut seen = HashSet::with_capacity(updates.len());
    for update in updates {
        if !seen.insert(&update.name) {
            return Err(CommitError::Rejected(format!(
                "ref {} appears more than once",
                update.name
            )));
        }
        if update.old.is_zero() && update.new.is_zero() {
            return Err(CommitError::Rejected(format!(
                "ref {} is both created and deleted",
                update.name
            )));
        }
        if !update.is_delete() && cleared.iter().any(|p| update.name.starts_with(p)) {
            return Err(CommitError::Rejected(format!(
                "ref {} is written under a cleared prefix",
                update.name
            )));
        }
    }
    Ok(())
}

/// Ref database held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryRefDatabase {
    refs: RwLock<BTreeMap<RefName, ObjectId>>,
    version: AtomicU64,
}

impl InMemoryRefDatabase {
    /// Create an empty ref database
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of refs currently stored
    pub fn len(&self) -> usize {
        self.refs.read().len()
    }

    /// Whether no refs are stored
    pub fn is_empty(&self) -> bool {
        self.refs.read().is_empty()
    }
}

impl RefDatabase for InMemoryRefDatabase {
    fn exact_ref(&self, name: &RefName) -> UpdateResult<Option<ObjectId>> {
        Ok(self.refs.read().get(name).copied())
    }

    fn refs_by_prefix(&self, prefix: &str) -> UpdateResult<Vec<(RefName, ObjectId)>> {
        let refs = self.refs.read();
        Ok(refs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, id)| (name.clone(), *id))
            .collect())
    }

    fn commit_clearing(
        &self,
        updates: &[RefUpdate],
        cleared: &[String],
    ) -> Result<CommitOutcome, CommitError> {
        check_batch(updates, cleared)?;
        if updates.is_empty() && cleared.is_empty() {
            return Ok(CommitOutcome {
                version: self.version(),
                applied: 0,
            });
        }

        let mut refs = self.refs.write();

        let mut conflicts: Vec<RefConflict> = updates
            .iter()
            .filter_map(|update| {
                let actual = refs.get(&update.name).copied().unwrap_or(ObjectId::ZERO);
                (actual != update.old).then(|| RefConflict {
                    name: update.name.clone(),
                    expected: update.old,
                    actual,
                })
            })
            .collect();
        let named: HashSet<&RefName> = updates.iter().map(|u| &u.name).collect();
        for prefix in cleared {
            conflicts.extend(
                refs.iter()
                    .filter(|(name, _)| name.starts_with(prefix) && !named.contains(*name))
                    .map(|(name, actual)| RefConflict {
                        name: name.clone(),
                        expected: ObjectId::ZERO,
                        actual: *actual,
                    }),
            );
        }
        if !conflicts.is_empty() {
            debug!(
                target: "refbatch::refs",
                conflicts = conflicts.len(),
                refs = updates.len(),
                "Ref batch lost compare-and-swap"
            );
            return Err(CommitError::LockFailure { conflicts });
        }

        if updates.is_empty() {
            return Ok(CommitOutcome {
                version: self.version(),
                applied: 0,
            });
        }
        for update in updates {
            if update.new.is_zero() {
                refs.remove(&update.name);
            } else {
                refs.insert(update.name.clone(), update.new);
            }
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        drop(refs);

        debug!(target: "refbatch::refs", version, refs = updates.len(), "Ref batch committed");
        Ok(CommitOutcome {
            version,
            applied: updates.len(),
        })
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}
