//! Assembly and commit of one attempt's ref batch
//!
//! The update manager turns what one attempt staged into a single list of ref
//! updates and commits it atomically:
//!
//! ```text
//! 1. For each touched change: write one metadata commit per contiguous run
//!    of the same author, chained onto the snapshot tip
//! 2. Emit the meta ref update (old = snapshot tip, new = last commit)
//! 3. For deleted changes: emit a delete for every ref under the change prefix
//!    not already named by a raw update
//! 4. Append raw ref updates staged by repo phases
//! 5. Commit everything as one compare-and-swap batch, clearing the prefix
//!    of every deleted change
//! ```
//!
//! The prefix listing of step 3 happens before the commit. A ref created
//! under the prefix in between is not in the batch, so the commit fails as a
//! lock failure and the next attempt lists it again.
//!
//! Objects written in steps 1-2 for an attempt that then loses the race are
//! unreferenced and harmless.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use refbatch_core::{AccountId, ChangeId, ObjectId, RefName, Timestamp, UpdateResult};
use refbatch_notes::ChangeUpdate;
use refbatch_storage::{Commit, CommitError, CommitOutcome, RefUpdate, Repository};

/// Metadata staged for one change during one attempt
#[derive(Debug, Clone)]
pub struct PendingChange {
    /// Change id
    pub change: ChangeId,
    /// Meta ref tip the updates were computed against (`ZERO` for a new change)
    pub base: ObjectId,
    /// Deltas in registration order, one per contiguous author run
    pub updates: Vec<(AccountId, ChangeUpdate)>,
    /// Delete the change and every ref under its prefix
    pub delete: bool,
}

impl PendingChange {
    /// Whether this change contributes anything to the batch
    pub fn is_empty(&self) -> bool {
        !self.delete && self.updates.iter().all(|(_, u)| u.is_empty())
    }
}

/// Ref updates of one attempt, ready to commit
#[derive(Debug, Clone, Default)]
pub struct RefBatch {
    updates: Vec<RefUpdate>,
    new_tips: BTreeMap<ChangeId, ObjectId>,
    cleared_prefixes: Vec<String>,
}

impl RefBatch {
    /// Every ref update in commit order
    pub fn updates(&self) -> &[RefUpdate] {
        &self.updates
    }

    /// New meta tip per change (`ZERO` for deleted changes)
    pub fn new_tips(&self) -> &BTreeMap<ChangeId, ObjectId> {
        &self.new_tips
    }

    /// Ref prefixes that must hold no refs once the batch commits
    pub fn cleared_prefixes(&self) -> &[String] {
        &self.cleared_prefixes
    }

    /// Whether nothing would be committed
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.cleared_prefixes.is_empty()
    }

    /// Consume into the ref update list
    pub fn into_updates(self) -> Vec<RefUpdate> {
        self.updates
    }
}

/// Builds and commits ref batches against one repository
#[derive(Debug)]
pub struct UpdateManager<'a> {
    repo: &'a Repository,
    when: Timestamp,
    ref_log_message: Option<&'a str>,
}

impl<'a> UpdateManager<'a> {
    /// Manager writing commits stamped with `when`
    pub fn new(repo: &'a Repository, when: Timestamp) -> Self {
        Self {
            repo,
            when,
            ref_log_message: None,
        }
    }

    /// Summary line used for metadata commits
    pub fn with_ref_log_message(mut self, message: Option<&'a str>) -> Self {
        self.ref_log_message = message;
        self
    }

    /// Assemble the batch for one attempt
    pub fn build(&self, pending: &[PendingChange], raw: &[RefUpdate]) -> UpdateResult<RefBatch> {
        let mut batch = RefBatch::default();
        let raw_names: HashSet<&RefName> = raw.iter().map(|u| &u.name).collect();

        for change in pending {
            if change.delete {
                self.stage_delete(change, &raw_names, &mut batch)?;
            } else {
                self.stage_metadata(change, &mut batch)?;
            }
        }
        batch.updates.extend(raw.iter().cloned());

        debug!(
            target: "refbatch::update",
            changes = batch.new_tips.len(),
            refs = batch.updates.len(),
            "Assembled ref batch"
        );
        Ok(batch)
    }

    /// Commit an assembled batch atomically
    pub fn commit(&self, batch: &RefBatch) -> Result<CommitOutcome, CommitError> {
        self.repo.commit_clearing(&batch.updates, &batch.cleared_prefixes)
    }

    fn stage_metadata(&self, change: &PendingChange, batch: &mut RefBatch) -> UpdateResult<()> {
        let mut tip = change.base;
        for (author, update) in change.updates.iter().filter(|(_, u)| !u.is_empty()) {
            let commit = Commit {
                parent: (!tip.is_zero()).then_some(tip),
                author: *author,
                timestamp: self.when,
                message: update.commit_message(change.change, self.ref_log_message),
                body: update.to_body()?,
            };
            tip = self.repo.objects().insert_commit(commit)?;
        }
        if tip != change.base {
            batch.updates.push(RefUpdate::update(
                RefName::change_meta(change.change),
                change.base,
                tip,
            ));
            batch.new_tips.insert(change.change, tip);
        }
        Ok(())
    }

    /// Refs already named by a raw update are left to that update
    fn stage_delete(
        &self,
        change: &PendingChange,
        raw_names: &HashSet<&RefName>,
        batch: &mut RefBatch,
    ) -> UpdateResult<()> {
        let meta = RefName::change_meta(change.change);
        if !change.base.is_zero() {
            batch.updates.push(RefUpdate::delete(meta.clone(), change.base));
        }
        let prefix = RefName::change_prefix(change.change);
        for (name, current) in self.repo.refs().refs_by_prefix(&prefix)? {
            if name != meta && !raw_names.contains(&name) {
                batch.updates.push(RefUpdate::delete(name, current));
            }
        }
        batch.cleared_prefixes.push(prefix);
        batch.new_tips.insert(change.change, ObjectId::ZERO);
        Ok(())
    }
}
