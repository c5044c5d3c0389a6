//! Immutable change snapshots
//!
//! [`ChangeState`] is the projection of a change's metadata history.
//! [`ChangeNotes`] binds a state to the meta ref tip it was built from; it is
//! shared behind an `Arc` and never mutated, so any number of transactions can
//! read the same snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::sync::Arc;

use refbatch_core::{
    AccountId, AttentionOperation, AttentionSetUpdate, ChangeId, ChangeMessage, ChangeStatus,
    ObjectId, PatchSet, PatchSetId, ProjectName, RefName, Timestamp, UpdateError, UpdateResult,
};

use crate::update::{ChangeUpdate, FieldChange};

/// Projection of a change's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeState {
    /// Change id
    pub change_id: ChangeId,
    /// Change owner
    pub owner: AccountId,
    /// Destination branch
    pub branch: Option<RefName>,
    /// Subject of the current patch set
    pub subject: String,
    /// Topic
    pub topic: Option<String>,
    /// Lifecycle status
    pub status: ChangeStatus,
    /// Creation time
    pub created_on: Timestamp,
    /// Time of the latest metadata commit
    pub last_updated_on: Timestamp,
    /// Patch sets by number (deleted ones are absent)
    pub patch_sets: BTreeMap<u32, PatchSet>,
    /// Current assignee
    pub assignee: Option<AccountId>,
    /// Everyone who was ever assigned
    pub past_assignees: BTreeSet<AccountId>,
    /// Hashtags
    pub hashtags: BTreeSet<String>,
    /// Latest attention-set decision per account
    pub attention_set: BTreeMap<AccountId, AttentionSetUpdate>,
    /// Custom keyed values
    pub custom_keyed_values: BTreeMap<String, String>,
    /// Message log, oldest first
    pub messages: Vec<ChangeMessage>,
    /// Work-in-progress flag
    pub work_in_progress: bool,
}

impl ChangeState {
    /// State of a change that has no history yet
    pub fn empty(change_id: ChangeId) -> Self {
        Self {
            change_id,
            owner: AccountId::SERVER,
            branch: None,
            subject: String::new(),
            topic: None,
            status: ChangeStatus::New,
            created_on: Timestamp::EPOCH,
            last_updated_on: Timestamp::EPOCH,
            patch_sets: BTreeMap::new(),
            assignee: None,
            past_assignees: BTreeSet::new(),
            hashtags: BTreeSet::new(),
            attention_set: BTreeMap::new(),
            custom_keyed_values: BTreeMap::new(),
            messages: Vec::new(),
            work_in_progress: false,
        }
    }

    /// Current (highest-numbered) patch set
    pub fn current_patch_set(&self) -> Option<&PatchSet> {
        self.patch_sets.values().next_back()
    }

    /// Patch set by id
    pub fn patch_set(&self, id: PatchSetId) -> Option<&PatchSet> {
        if id.change() != self.change_id {
            return None;
        }
        self.patch_sets.get(&id.number())
    }

    /// Accounts whose latest attention decision is `Add`
    pub fn active_attention(&self) -> BTreeSet<AccountId> {
        self.attention_set
            .values()
            .filter(|u| u.operation == AttentionOperation::Add)
            .map(|u| u.account)
            .collect()
    }

    /// Everyone who ever took part: owner, uploaders, assignees,
    /// attention-set members and message authors
    pub fn participants(&self) -> BTreeSet<AccountId> {
        let mut accounts = BTreeSet::new();
        accounts.insert(self.owner);
        accounts.extend(self.patch_sets.values().map(|ps| ps.uploader));
        accounts.extend(self.assignee);
        accounts.extend(self.past_assignees.iter().copied());
        accounts.extend(self.attention_set.keys().copied());
        accounts.extend(self.messages.iter().map(|m| m.author));
        accounts.remove(&AccountId::SERVER);
        accounts
    }

    /// Apply one metadata delta committed at `when`
    ///
    /// Fails with `Corruption` if the delta cannot apply to this state
    /// (e.g. deleting a patch set that does not exist).
    pub fn apply(&mut self, update: &ChangeUpdate, when: Timestamp) -> UpdateResult<()> {
        if let Some(creation) = update.creation() {
            self.owner = creation.owner;
            self.branch = Some(creation.branch.clone());
            self.subject = creation.subject.clone();
            self.created_on = when;
        }
        if let Some(status) = update.status() {
            self.status = status;
        }
        if let Some(subject) = update.subject() {
            self.subject = subject.to_string();
        }
        match update.topic() {
            Some(FieldChange::Set(topic)) => self.topic = Some(topic.clone()),
            Some(FieldChange::Clear) => self.topic = None,
            None => {}
        }
        match update.assignee() {
            Some(FieldChange::Set(account)) => {
                self.assignee = Some(*account);
                self.past_assignees.insert(*account);
            }
            Some(FieldChange::Clear) => self.assignee = None,
            None => {}
        }
        for tag in update.hashtags_removed() {
            self.hashtags.remove(tag);
        }
        self.hashtags.extend(update.hashtags_added().iter().cloned());
        for attention in update.attention() {
            let mut recorded = attention.clone();
            recorded.timestamp = when;
            self.attention_set.insert(recorded.account, recorded);
        }
        for (key, value) in update.custom_keyed_values() {
            match value {
                Some(value) => {
                    self.custom_keyed_values.insert(key.clone(), value.clone());
                }
                None => {
                    self.custom_keyed_values.remove(key);
                }
            }
        }
        self.messages.extend(update.messages().iter().cloned());
        for ps in update.patch_sets() {
            if ps.id.change() != self.change_id {
                return Err(UpdateError::corruption(format!(
                    "patch set {} recorded on change {}",
                    ps.id, self.change_id
                )));
            }
            self.patch_sets.insert(ps.id.number(), ps.clone());
        }
        for id in update.deleted_patch_sets() {
            if self.patch_sets.remove(&id.number()).is_none() {
                return Err(UpdateError::corruption(format!(
                    "deleted patch set {} does not exist",
                    id
                )));
            }
        }
        if let Some(wip) = update.work_in_progress() {
            self.work_in_progress = wip;
        }
        self.last_updated_on = when;
        Ok(())
    }
}

/// Snapshot of a change as of one meta ref tip
#[derive(Debug, Clone)]
pub struct ChangeNotes {
    project: ProjectName,
    meta_id: ObjectId,
    state: Arc<ChangeState>,
}

impl ChangeNotes {
    /// Bind a state to the tip it was parsed from
    pub fn new(project: ProjectName, meta_id: ObjectId, state: Arc<ChangeState>) -> Self {
        Self {
            project,
            meta_id,
            state,
        }
    }

    /// Notes of a change that does not exist yet (tip is `ZERO`)
    pub fn empty(project: ProjectName, change: ChangeId) -> Self {
        Self::new(project, ObjectId::ZERO, Arc::new(ChangeState::empty(change)))
    }

    /// Project the change lives in
    pub fn project(&self) -> &ProjectName {
        &self.project
    }

    /// Meta ref tip this snapshot reflects; `ZERO` for a new change
    pub fn meta_id(&self) -> ObjectId {
        self.meta_id
    }

    /// Whether the change has any history
    pub fn exists(&self) -> bool {
        !self.meta_id.is_zero()
    }

    /// Shared state
    pub fn state(&self) -> &Arc<ChangeState> {
        &self.state
    }

    /// Meta ref name of this change
    pub fn meta_ref(&self) -> RefName {
        RefName::change_meta(self.state.change_id)
    }
}

impl Deref for ChangeNotes {
    type Target = ChangeState;

    fn deref(&self) -> &ChangeState {
        &self.state
    }
}
