//! Shared fixture for engine integration tests
//!
//! Every fixture owns one project backed by a fault-injecting ref database,
//! an in-memory index and an outbox notifier, so tests can observe each
//! side of a batch.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use refbatch_concurrency::RetryConfig;
use refbatch_core::{AccountId, ChangeId, ObjectId, ProjectName, RefName, Timestamp};
use refbatch_engine::{
    BatchUpdate, BatchUpdateFactory, InMemoryIndex, InsertChangeOp, OpHandle, OutboxNotifier,
    UpdateConfig,
};
use refbatch_notes::ChangeNotes;
use refbatch_storage::testing::FaultyRefDatabase;
use refbatch_storage::{Repository, RepositoryManager};

pub const OWNER: u32 = 1;
pub const REVIEWER: u32 = 2;

static TRACING: Once = Once::new();

/// Route engine logs to the test harness
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Retry settings that keep tests fast and deterministic
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_attempts(max_attempts)
        .with_base_delay_ms(1)
        .with_max_delay_ms(5)
        .with_jitter(false)
}

pub struct Fixture {
    pub factory: BatchUpdateFactory,
    pub project: ProjectName,
    pub refs: Arc<FaultyRefDatabase>,
    pub repo: Arc<Repository>,
    pub index: Arc<InMemoryIndex>,
    pub outbox: Arc<OutboxNotifier>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(UpdateConfig {
            retry: fast_retry(5),
            ..Default::default()
        })
    }

    pub fn with_config(config: UpdateConfig) -> Self {
        init_tracing();
        let repos = Arc::new(RepositoryManager::new());
        let refs = Arc::new(FaultyRefDatabase::new());
        let project = ProjectName::new("platform/core");
        let repo = repos
            .register(Repository::with_ref_database(project.clone(), refs.clone()))
            .unwrap();
        let index = Arc::new(InMemoryIndex::new(Arc::clone(&repos)));
        let outbox = Arc::new(OutboxNotifier::new());
        let factory = BatchUpdateFactory::builder()
            .with_config(config)
            .with_repositories(repos)
            .with_indexer(index.clone())
            .with_notifier(outbox.clone())
            .build()
            .unwrap();
        Self {
            factory,
            project,
            refs,
            repo,
            index,
            outbox,
        }
    }

    pub fn batch(&self, user: u32) -> BatchUpdate {
        self.batch_in(&self.project, user)
    }

    pub fn batch_in(&self, project: &ProjectName, user: u32) -> BatchUpdate {
        self.factory
            .create(project, AccountId::new(user), Timestamp::from_secs(1_000))
            .unwrap()
    }

    /// Register a second project served by the same factory
    pub fn add_project(
        &self,
        name: &str,
    ) -> (ProjectName, Arc<FaultyRefDatabase>, Arc<Repository>) {
        let project = ProjectName::new(name);
        let refs = Arc::new(FaultyRefDatabase::new());
        let repo = self
            .factory
            .repositories()
            .register(Repository::with_ref_database(project.clone(), refs.clone()))
            .unwrap();
        (project, refs, repo)
    }

    pub fn object(&self, content: &str) -> ObjectId {
        self.repo
            .objects()
            .insert_blob(content.as_bytes().to_vec())
            .unwrap()
    }

    /// Create change `id` owned by [`OWNER`] with one patch set
    pub fn create_change(&self, id: u32) -> ChangeId {
        let change = ChangeId::new(id);
        let commit = self.object(&format!("change {} ps1", id));
        let op = OpHandle::new(InsertChangeOp::new(
            RefName::branch("main").unwrap(),
            format!("Change {}", id),
            commit,
        ));
        let mut bu = self.batch(OWNER);
        bu.insert_change(change, &op);
        bu.execute().unwrap();
        change
    }

    pub fn notes(&self, change: ChangeId) -> ChangeNotes {
        self.factory
            .load_notes(&self.project, change)
            .unwrap()
            .expect("change exists")
    }

    pub fn meta(&self, change: ChangeId) -> Option<ObjectId> {
        self.repo.read_ref(&RefName::change_meta(change)).unwrap()
    }

    pub fn open_handles(&self) -> usize {
        self.factory.repositories().open_handles()
    }
}
