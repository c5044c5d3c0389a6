//! Batch-level hooks
//!
//! `after_update_repos` runs inside every attempt, once the repo phase has
//! finished, and its error aborts the batch. The other two run only after a
//! successful commit; their errors are logged and otherwise ignored.

use std::collections::BTreeMap;

use refbatch_core::{ChangeId, UpdateResult};
use refbatch_storage::RefUpdate;

use crate::batch::ChangeResult;

/// Observer of one batch's lifecycle
pub trait BatchUpdateListener: Send + Sync {
    /// Repo phase of the current attempt finished
    fn after_update_repos(&self) -> UpdateResult<()> {
        Ok(())
    }

    /// Refs were committed
    fn after_update_refs(&self, _updates: &[RefUpdate]) -> UpdateResult<()> {
        Ok(())
    }

    /// Changes were committed and `post_update` has run
    fn after_update_changes(
        &self,
        _results: &BTreeMap<ChangeId, ChangeResult>,
    ) -> UpdateResult<()> {
        Ok(())
    }
}
