//! Change snapshots for refbatch
//!
//! This crate turns a change's metadata ref history into immutable snapshots:
//! - ChangeUpdate: the metadata delta stored as the body of one commit
//! - ChangeState / ChangeNotes: the projection and its binding to a tip
//! - parser: replays history root-first, validating the creation record
//! - ChangeNotesCache: memoizes snapshots by (project, change, tip)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod notes;
pub mod parser;
pub mod update;

pub use cache::{CacheStats, ChangeNotesCache, DEFAULT_MAX_ENTRIES};
pub use notes::{ChangeNotes, ChangeState};
pub use parser::parse_change;
pub use update::{ChangeCreation, ChangeUpdate, FieldChange};
