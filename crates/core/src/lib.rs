//! Core types for refbatch
//!
//! This crate defines the foundational types shared by every layer:
//! - Identifiers: ChangeId, PatchSetId, AccountId, ProjectName, MessageId
//! - Refs: RefName and content-addressed ObjectId
//! - Timestamp: the logical time shared by a batch
//! - Change model: status, patch sets, attention set, messages
//! - Error: UpdateError taxonomy with ErrorKind classification

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod change;
pub mod error;
pub mod refs;
pub mod timestamp;
pub mod types;

pub use change::{AttentionOperation, AttentionSetUpdate, ChangeMessage, ChangeStatus, PatchSet};
pub use error::{ErrorKind, UpdateError, UpdateResult};
pub use refs::{ObjectId, RefName, META_SUFFIX, OBJECT_ID_LEN, REFS_CHANGES, REFS_HEADS};
pub use timestamp::Timestamp;
pub use types::{AccountId, ChangeId, MessageId, PatchSetId, ProjectName};
