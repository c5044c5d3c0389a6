//! Batch update factory and its shared services
//!
//! Every batch created by one factory shares the repositories, snapshot
//! cache, indexer, notifier, retry policy and metrics.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use refbatch_concurrency::RetryPolicy;
use refbatch_core::{AccountId, ChangeId, ProjectName, Timestamp, UpdateError, UpdateResult};
use refbatch_notes::{ChangeNotes, ChangeNotesCache};
use refbatch_storage::RepositoryManager;

use crate::batch::BatchUpdate;
use crate::config::UpdateConfig;
use crate::index::{ChangeIndexer, NoopIndexer};
use crate::metrics::{MetricsSnapshot, UpdateMetrics};
use crate::notify::{NoopNotifier, NotificationService};

pub(crate) struct Services {
    pub(crate) repos: Arc<RepositoryManager>,
    pub(crate) cache: ChangeNotesCache,
    pub(crate) indexer: Arc<dyn ChangeIndexer>,
    pub(crate) notifier: Arc<dyn NotificationService>,
    pub(crate) policy: Arc<dyn RetryPolicy>,
    pub(crate) config: UpdateConfig,
    pub(crate) metrics: UpdateMetrics,
}

/// Creates [`BatchUpdate`]s
///
/// # Example
///
/// ```ignore
/// let factory = BatchUpdateFactory::builder()
///     .with_config(UpdateConfig::from_file(Path::new("refbatch.toml"))?)
///     .with_indexer(index)
///     .build()?;
/// let mut bu = factory.create(&project, user, Timestamp::now())?;
/// ```
#[derive(Clone)]
pub struct BatchUpdateFactory {
    services: Arc<Services>,
}

impl fmt::Debug for BatchUpdateFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchUpdateFactory")
            .field("config", &self.services.config)
            .field("policy", &self.services.policy)
            .field("open_handles", &self.services.repos.open_handles())
            .finish()
    }
}

impl BatchUpdateFactory {
    /// Start configuring a factory
    pub fn builder() -> BatchUpdateFactoryBuilder {
        BatchUpdateFactoryBuilder::new()
    }

    /// Factory with default config, fresh repositories, no index and no
    /// notifications
    pub fn in_memory() -> Self {
        Self::from_parts(
            UpdateConfig::default(),
            Arc::new(RepositoryManager::new()),
            Arc::new(NoopIndexer),
            Arc::new(NoopNotifier),
            None,
        )
    }

    /// Factory configured from a `refbatch.toml` file
    pub fn from_config_file(path: &Path) -> UpdateResult<Self> {
        Self::builder()
            .with_config(UpdateConfig::from_file(path)?)
            .build()
    }

    fn from_parts(
        config: UpdateConfig,
        repos: Arc<RepositoryManager>,
        indexer: Arc<dyn ChangeIndexer>,
        notifier: Arc<dyn NotificationService>,
        policy: Option<Arc<dyn RetryPolicy>>,
    ) -> Self {
        let policy = policy.unwrap_or_else(|| Arc::new(config.retry.clone()));
        Self {
            services: Arc::new(Services {
                repos,
                cache: ChangeNotesCache::new(config.cache.max_entries),
                indexer,
                notifier,
                policy,
                config,
                metrics: UpdateMetrics::new(),
            }),
        }
    }

    /// New batch acting as `user` at logical time `when`
    pub fn create(
        &self,
        project: &ProjectName,
        user: AccountId,
        when: Timestamp,
    ) -> UpdateResult<BatchUpdate> {
        if !self.services.repos.contains(project) {
            return Err(UpdateError::not_found(format!("project {}", project)));
        }
        Ok(BatchUpdate::new(
            Arc::clone(&self.services),
            project.clone(),
            user,
            when,
        ))
    }

    /// Repositories batches run against
    pub fn repositories(&self) -> &Arc<RepositoryManager> {
        &self.services.repos
    }

    /// Shared snapshot cache
    pub fn cache(&self) -> &ChangeNotesCache {
        &self.services.cache
    }

    /// Effective configuration
    pub fn config(&self) -> &UpdateConfig {
        &self.services.config
    }

    /// Current counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.services.metrics.snapshot()
    }

    /// Current snapshot of a change, `None` if it does not exist
    pub fn load_notes(
        &self,
        project: &ProjectName,
        change: ChangeId,
    ) -> UpdateResult<Option<ChangeNotes>> {
        let repo = self.services.repos.open(project)?;
        self.services.cache.load(&repo, change)
    }
}

/// Builder for [`BatchUpdateFactory`]
#[derive(Default)]
pub struct BatchUpdateFactoryBuilder {
    config: UpdateConfig,
    repos: Option<Arc<RepositoryManager>>,
    indexer: Option<Arc<dyn ChangeIndexer>>,
    notifier: Option<Arc<dyn NotificationService>>,
    policy: Option<Arc<dyn RetryPolicy>>,
}

impl fmt::Debug for BatchUpdateFactoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchUpdateFactoryBuilder")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish()
    }
}

impl BatchUpdateFactoryBuilder {
    /// Builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this configuration
    pub fn with_config(mut self, config: UpdateConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing repository manager
    pub fn with_repositories(mut self, repos: Arc<RepositoryManager>) -> Self {
        self.repos = Some(repos);
        self
    }

    /// Index committed changes
    pub fn with_indexer(mut self, indexer: Arc<dyn ChangeIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Deliver emails sent from `post_update`
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replace the policy derived from `[retry]`
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Validate the configuration and build the factory
    pub fn build(self) -> UpdateResult<BatchUpdateFactory> {
        self.config.validate()?;
        Ok(BatchUpdateFactory::from_parts(
            self.config,
            self.repos.unwrap_or_default(),
            self.indexer.unwrap_or_else(|| Arc::new(NoopIndexer)),
            self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            self.policy,
        ))
    }
}
