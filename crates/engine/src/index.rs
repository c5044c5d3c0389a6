//! Secondary index hooks
//!
//! The index is a derived view. It is told about a change only after its
//! batch committed, and a failure here never rolls the batch back.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use refbatch_core::{ChangeId, ObjectId, ProjectName, RefName, UpdateError, UpdateResult};
use refbatch_storage::RepositoryManager;

/// Indexing service consumed after commit
pub trait ChangeIndexer: Send + Sync {
    /// (Re)index the change at its current meta tip
    fn index(&self, project: &ProjectName, change: ChangeId) -> UpdateResult<()>;

    /// Remove a deleted change from the index
    fn delete(&self, project: &ProjectName, change: ChangeId) -> UpdateResult<()>;
}

/// Indexer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIndexer;

impl ChangeIndexer for NoopIndexer {
    fn index(&self, _project: &ProjectName, _change: ChangeId) -> UpdateResult<()> {
        Ok(())
    }

    fn delete(&self, _project: &ProjectName, _change: ChangeId) -> UpdateResult<()> {
        Ok(())
    }
}

/// Index recording the meta tip each change was indexed at
#[derive(Debug)]
pub struct InMemoryIndex {
    repos: Arc<RepositoryManager>,
    entries: DashMap<(ProjectName, ChangeId), ObjectId>,
    index_calls: AtomicU64,
    delete_calls: AtomicU64,
    failing: AtomicBool,
}

impl InMemoryIndex {
    /// Index reading meta tips from `repos`
    pub fn new(repos: Arc<RepositoryManager>) -> Self {
        Self {
            repos,
            entries: DashMap::new(),
            index_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Meta tip the change was last indexed at
    pub fn indexed(&self, project: &ProjectName, change: ChangeId) -> Option<ObjectId> {
        self.entries
            .get(&(project.clone(), change))
            .map(|e| *e.value())
    }

    /// Number of changes in the index
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `index` calls received
    pub fn index_calls(&self) -> u64 {
        self.index_calls.load(Ordering::Relaxed)
    }

    /// `delete` calls received
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    fn check_failing(&self) -> UpdateResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpdateError::storage("index unavailable"));
        }
        Ok(())
    }
}

impl ChangeIndexer for InMemoryIndex {
    fn index(&self, project: &ProjectName, change: ChangeId) -> UpdateResult<()> {
        self.index_calls.fetch_add(1, Ordering::Relaxed);
        self.check_failing()?;
        let repo = self.repos.open(project)?;
        match repo.read_ref(&RefName::change_meta(change))? {
            Some(tip) => {
                self.entries.insert((project.clone(), change), tip);
            }
            None => {
                self.entries.remove(&(project.clone(), change));
            }
        }
        Ok(())
    }

    fn delete(&self, project: &ProjectName, change: ChangeId) -> UpdateResult<()> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        self.check_failing()?;
        self.entries.remove(&(project.clone(), change));
        Ok(())
    }
}
