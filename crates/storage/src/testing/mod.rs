//! Testing utilities for the ref transaction store
//!
//! - **Fault injection**: [`FaultyRefDatabase`] wraps a real ref database and
//!   fails or interleaves upcoming commits on demand
//!
//! # Example
//!
//! ```ignore
//! use refbatch_storage::testing::{Fault, FaultyRefDatabase};
//!
//! let refs = Arc::new(FaultyRefDatabase::new());
//! refs.inject(Fault::LockFailure);
//! let repo = Repository::with_ref_database(project, refs.clone());
//! // next commit against `repo` reports a lock failure and applies nothing
//! ```

mod faults;

pub use faults::{Fault, FaultyRefDatabase};
