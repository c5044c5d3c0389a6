//! Concurrency layer for refbatch
//!
//! This crate implements the optimistic side of a batch update:
//! - RetryPolicy / RetryConfig: whether and when a lost ref race is retried
//! - UpdateManager: assembles one attempt's metadata commits and raw ref
//!   updates into a single compare-and-swap batch and commits it
//!
//! Conflict detection itself happens in the ref database: a stale expected
//! value fails the whole batch and nothing is applied.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod retry;

pub use manager::{PendingChange, RefBatch, UpdateManager};
pub use retry::{NoRetry, RetryConfig, RetryPolicy};
