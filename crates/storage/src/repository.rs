//! Repositories and the repository registry
//!
//! A [`Repository`] pairs an object store with a ref database. The
//! [`RepositoryManager`] hands out [`RepositoryHandle`]s; every handle is
//! counted while alive so callers can assert that nothing leaks a repository
//! on an error path.

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use refbatch_core::{ObjectId, ProjectName, RefName, UpdateError, UpdateResult};

use crate::object::ObjectStore;
use crate::ref_update::{CommitError, CommitOutcome, RefUpdate};
use crate::refs::{InMemoryRefDatabase, RefDatabase};

/// One project's objects and refs
pub struct Repository {
    name: ProjectName,
    objects: ObjectStore,
    refs: Arc<dyn RefDatabase>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("objects", &self.objects.len())
            .field("version", &self.refs.version())
            .finish()
    }
}

impl Repository {
    /// Create an empty in-memory repository
    pub fn new(name: ProjectName) -> Self {
        Self::with_ref_database(name, Arc::new(InMemoryRefDatabase::new()))
    }

    /// Create a repository over a custom ref database
    pub fn with_ref_database(name: ProjectName, refs: Arc<dyn RefDatabase>) -> Self {
        Self {
            name,
            objects: ObjectStore::new(),
            refs,
        }
    }

    /// Project name
    pub fn name(&self) -> &ProjectName {
        &self.name
    }

    /// Object store
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Ref database
    pub fn refs(&self) -> &dyn RefDatabase {
        self.refs.as_ref()
    }

    /// Current value of a ref
    pub fn read_ref(&self, name: &RefName) -> UpdateResult<Option<ObjectId>> {
        self.refs.exact_ref(name)
    }

    /// Commit a batch of ref updates atomically
    ///
    /// Every non-deleting update must point at an object already in the
    /// object store.
    pub fn commit(&self, updates: &[RefUpdate]) -> Result<CommitOutcome, CommitError> {
        self.commit_clearing(updates, &[])
    }

    /// Commit a batch that also leaves no ref under any of `cleared`
    pub fn commit_clearing(
        &self,
        updates: &[RefUpdate],
        cleared: &[String],
    ) -> Result<CommitOutcome, CommitError> {
        if let Some(missing) = updates
            .iter()
            .find(|u| !u.new.is_zero() && !self.objects.contains(&u.new))
        {
            return Err(CommitError::Rejected(format!(
                "ref {} points at unknown object {}",
                missing.name,
                missing.new.short()
            )));
        }
        self.refs.commit_clearing(updates, cleared)
    }
}

/// Registry of repositories by project name
#[derive(Debug, Default)]
pub struct RepositoryManager {
    repos: DashMap<ProjectName, Arc<Repository>>,
    open_handles: Arc<AtomicUsize>,
}

impl RepositoryManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty in-memory repository
    pub fn create(&self, name: &ProjectName) -> UpdateResult<Arc<Repository>> {
        self.register(Repository::new(name.clone()))
    }

    /// Register an existing repository (e.g. one over a fault-injecting ref database)
    pub fn register(&self, repo: Repository) -> UpdateResult<Arc<Repository>> {
        match self.repos.entry(repo.name().clone()) {
            Entry::Occupied(_) => Err(UpdateError::conflict(format!(
                "project {} already exists",
                repo.name()
            ))),
            Entry::Vacant(slot) => {
                let repo = Arc::new(repo);
                slot.insert(Arc::clone(&repo));
                Ok(repo)
            }
        }
    }

    /// Open a repository; the handle is counted until dropped
    pub fn open(&self, name: &ProjectName) -> UpdateResult<RepositoryHandle> {
        let repo = self
            .repos
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| UpdateError::not_found(format!("project {}", name)))?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(RepositoryHandle {
            repo,
            open_handles: Arc::clone(&self.open_handles),
        })
    }

    /// Whether a project exists
    pub fn contains(&self, name: &ProjectName) -> bool {
        self.repos.contains_key(name)
    }

    /// Number of handles currently alive
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

/// Open repository; releases its lease when dropped
#[derive(Debug)]
pub struct RepositoryHandle {
    repo: Arc<Repository>,
    open_handles: Arc<AtomicUsize>,
}

impl RepositoryHandle {
    /// Shared repository behind this handle
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }
}

impl Deref for RepositoryHandle {
    type Target = Repository;

    fn deref(&self) -> &Repository {
        &self.repo
    }
}

impl Drop for RepositoryHandle {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
