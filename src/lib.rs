//! refbatch - transactional change-mutation core
//!
//! Every change lives on an append-only metadata ref; mutations are expressed
//! as operations registered on a [`BatchUpdate`], which snapshots the affected
//! changes, runs each operation's phases, commits all resulting ref updates as
//! one compare-and-swap batch, retries on contention, and only then runs
//! post-commit side effects (notification, indexing).
//!
//! # Quick Start
//!
//! ```ignore
//! use refbatch::{
//!     AbandonOp, AccountId, BatchUpdateFactory, ChangeId, OpHandle, ProjectName, Timestamp,
//! };
//!
//! let factory = BatchUpdateFactory::in_memory();
//! let project = ProjectName::new("platform/core");
//! factory.repositories().create(&project)?;
//!
//! let abandon = OpHandle::new(AbandonOp::new("superseded"));
//! let mut bu = factory.create(&project, AccountId::new(1000), Timestamp::now())?;
//! bu.add_op(ChangeId::new(1), &abandon);
//! bu.execute()?;
//! ```
//!
//! Internal layers are re-exported as modules (`types`, `storage`, `notes`,
//! `concurrency`) for callers that need lower-level access.

pub use refbatch_engine::*;

pub use refbatch_core::{
    AccountId, ChangeId, ChangeStatus, ErrorKind, ObjectId, PatchSetId, ProjectName, RefName,
    Timestamp, UpdateError, UpdateResult,
};
pub use refbatch_concurrency::{NoRetry, RetryConfig, RetryPolicy};
pub use refbatch_notes::{ChangeNotes, ChangeState};

pub use refbatch_concurrency as concurrency;
pub use refbatch_core as types;
pub use refbatch_notes as notes;
pub use refbatch_storage as storage;
