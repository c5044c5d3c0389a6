//! Rebuild a change's state from its meta ref history
//!
//! The history is walked from the tip back to the root commit, then replayed
//! oldest first. The root must carry the creation record and no other commit
//! may carry one.

use std::collections::HashSet;

use tracing::trace;

use refbatch_core::{ChangeId, ObjectId, UpdateError, UpdateResult};
use refbatch_storage::{Commit, ObjectStore};

use crate::notes::ChangeState;
use crate::update::ChangeUpdate;

/// Parse the state of `change` as of `tip`
pub fn parse_change(
    objects: &ObjectStore,
    change: ChangeId,
    tip: ObjectId,
) -> UpdateResult<ChangeState> {
    let history = collect_history(objects, tip)?;

    let mut state = ChangeState::empty(change);
    for (i, commit) in history.iter().enumerate() {
        let update = ChangeUpdate::from_body(&commit.body).map_err(|e| {
            UpdateError::corruption(format!(
                "change {}: undecodable metadata commit: {}",
                change, e
            ))
        })?;
        match (i, update.creation().is_some()) {
            (0, false) => {
                return Err(UpdateError::corruption(format!(
                    "change {}: root commit has no creation record",
                    change
                )))
            }
            (n, true) if n > 0 => {
                return Err(UpdateError::corruption(format!(
                    "change {}: creation record in non-root commit",
                    change
                )))
            }
            _ => {}
        }
        state.apply(&update, commit.timestamp)?;
    }

    trace!(
        target: "refbatch::notes",
        change = %change,
        tip = %tip.short(),
        commits = history.len(),
        "Parsed change history"
    );
    Ok(state)
}

/// Commits from root to `tip`
fn collect_history(objects: &ObjectStore, tip: ObjectId) -> UpdateResult<Vec<Commit>> {
    let mut seen = HashSet::new();
    let mut history = Vec::new();
    let mut next = Some(tip);
    while let Some(id) = next {
        if !seen.insert(id) {
            return Err(UpdateError::corruption(format!(
                "cycle in metadata history at {}",
                id.short()
            )));
        }
        let commit = objects.read_commit(&id)?;
        next = commit.parent;
        history.push(commit);
    }
    history.reverse();
    Ok(history)
}
