//! Batch update engine for refbatch
//!
//! This crate orchestrates the lower layers into transactions over changes:
//! - BatchUpdateFactory: shared services and the entry point for new batches
//! - BatchUpdate: registers operations and executes them atomically, retrying
//!   lost ref races under the configured policy
//! - Operation protocol: `update_repo`, `update_change`, `post_update` with
//!   explicit contexts and a guarded lifecycle per operation
//! - Built-in operations for common change mutations
//! - External hooks: indexing, notifications, batch listeners
//! - Configuration (`refbatch.toml`) and metrics
//!
//! Errors keep three categories apart: business errors from operations are
//! returned unchanged, `ContentionExhausted` tells the caller to try again,
//! and storage errors are failures. Failures after commit are logged only.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod config;
pub mod context;
pub mod index;
pub mod listener;
pub mod metrics;
pub mod notify;
pub mod op;
pub mod ops;
pub mod services;

pub use batch::{BatchUpdate, ChangeResult};
pub use config::{CacheConfig, PhaseOrder, UpdateConfig, CONFIG_FILE_NAME};
pub use context::{ChangeContext, PostUpdateContext, RepoContext};
pub use index::{ChangeIndexer, InMemoryIndex, NoopIndexer};
pub use listener::BatchUpdateListener;
pub use metrics::{MetricsSnapshot, UpdateMetrics};
pub use notify::{
    NoopNotifier, NotificationService, NotifyHandling, NotifyResolution, NotifyResolver,
    OutboxNotifier, OutgoingEmail,
};
pub use op::{BatchUpdateOp, OpHandle, OpState, RepoOnlyOp};
pub use ops::{
    AbandonOp, AddToAttentionSetOp, CreateRefOp, DeleteAssigneeOp, DeleteChangeOp,
    DeletePatchSetOp, InsertChangeOp, PatchSetInserter, PostMessageOp, RemoveFromAttentionSetOp,
    RestoreOp, SetAssigneeOp, SetCustomKeyedValuesOp, SetHashtagsOp,
};
pub use services::{BatchUpdateFactory, BatchUpdateFactoryBuilder};
