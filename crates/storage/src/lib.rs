//! Ref transaction store for refbatch
//!
//! This crate implements the storage every change lives on:
//! - ObjectStore: content-addressed blobs and commits (SHA-256 over MessagePack)
//! - RefDatabase: named pointers with atomic multi-ref compare-and-swap
//! - Repository / RepositoryManager: one project's objects and refs, with
//!   counted handles
//! - testing: fault-injecting ref database for atomicity and retry tests
//!
//! A commit either applies every ref update of a batch or none of them. A
//! stale expected value is reported as [`CommitError::LockFailure`], which is
//! the normal "someone else committed first" signal and distinct from I/O
//! failure.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod object;
pub mod ref_update;
pub mod refs;
pub mod repository;
pub mod testing;

pub use object::{Commit, Object, ObjectStore};
pub use ref_update::{CommitError, CommitOutcome, RefConflict, RefUpdate};
pub use refs::{InMemoryRefDatabase, RefDatabase};
pub use repository::{Repository, RepositoryHandle, RepositoryManager};
