//! Metadata delta staged against one change
//!
//! A [`ChangeUpdate`] is the body of one metadata commit. Operations fill it
//! through a change context; the coordinator serializes it with MessagePack
//! and writes it as a commit on the change's meta ref.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use refbatch_core::{
    AccountId, AttentionSetUpdate, ChangeId, ChangeMessage, ChangeStatus, PatchSet, PatchSetId,
    RefName, UpdateError, UpdateResult,
};

/// Set or clear an optional field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldChange<T> {
    /// Replace the value
    Set(T),
    /// Remove the value
    Clear,
}

/// Creation record carried by the root commit of every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCreation {
    /// Change owner
    pub owner: AccountId,
    /// Destination branch
    pub branch: RefName,
    /// Initial subject
    pub subject: String,
}

/// Metadata delta for one change, attributed to one author
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeUpdate {
    creation: Option<ChangeCreation>,
    status: Option<ChangeStatus>,
    subject: Option<String>,
    topic: Option<FieldChange<String>>,
    assignee: Option<FieldChange<AccountId>>,
    hashtags_added: BTreeSet<String>,
    hashtags_removed: BTreeSet<String>,
    attention: Vec<AttentionSetUpdate>,
    custom_keyed_values: BTreeMap<String, Option<String>>,
    messages: Vec<ChangeMessage>,
    patch_sets: Vec<PatchSet>,
    deleted_patch_sets: Vec<PatchSetId>,
    work_in_progress: Option<bool>,
}

impl ChangeUpdate {
    /// Empty delta
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self == &ChangeUpdate::default()
    }

    /// Record the creation of the change
    pub fn set_creation(&mut self, creation: ChangeCreation) {
        self.creation = Some(creation);
    }

    /// Set the change status
    pub fn set_status(&mut self, status: ChangeStatus) {
        self.status = Some(status);
    }

    /// Set the subject
    pub fn set_subject(&mut self, subject: impl Into<String>) {
        self.subject = Some(subject.into());
    }

    /// Set or clear the topic
    pub fn set_topic(&mut self, topic: Option<String>) {
        self.topic = Some(match topic {
            Some(t) => FieldChange::Set(t),
            None => FieldChange::Clear,
        });
    }

    /// Set the assignee
    pub fn set_assignee(&mut self, assignee: AccountId) {
        self.assignee = Some(FieldChange::Set(assignee));
    }

    /// Remove the assignee
    pub fn remove_assignee(&mut self) {
        self.assignee = Some(FieldChange::Clear);
    }

    /// Add hashtags; cancels a pending removal of the same tag
    pub fn add_hashtags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            self.hashtags_removed.remove(&tag);
            self.hashtags_added.insert(tag);
        }
    }

    /// Remove hashtags; cancels a pending addition of the same tag
    pub fn remove_hashtags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            self.hashtags_added.remove(&tag);
            self.hashtags_removed.insert(tag);
        }
    }

    /// Record an attention-set decision
    pub fn add_attention(&mut self, update: AttentionSetUpdate) {
        self.attention.push(update);
    }

    /// Set a custom keyed value
    pub fn set_custom_keyed_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom_keyed_values.insert(key.into(), Some(value.into()));
    }

    /// Delete a custom keyed value
    pub fn delete_custom_keyed_value(&mut self, key: impl Into<String>) {
        self.custom_keyed_values.insert(key.into(), None);
    }

    /// Append a message to the change log
    pub fn add_message(&mut self, message: ChangeMessage) {
        self.messages.push(message);
    }

    /// Add a new patch set; it becomes current
    pub fn add_patch_set(&mut self, patch_set: PatchSet) {
        self.patch_sets.push(patch_set);
    }

    /// Delete a non-current patch set
    pub fn delete_patch_set(&mut self, id: PatchSetId) {
        self.deleted_patch_sets.push(id);
    }

    /// Set the work-in-progress flag
    pub fn set_work_in_progress(&mut self, wip: bool) {
        self.work_in_progress = Some(wip);
    }

    /// Creation record, if this delta creates the change
    pub fn creation(&self) -> Option<&ChangeCreation> {
        self.creation.as_ref()
    }

    pub(crate) fn status(&self) -> Option<ChangeStatus> {
        self.status
    }

    pub(crate) fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub(crate) fn topic(&self) -> Option<&FieldChange<String>> {
        self.topic.as_ref()
    }

    pub(crate) fn assignee(&self) -> Option<&FieldChange<AccountId>> {
        self.assignee.as_ref()
    }

    pub(crate) fn hashtags_added(&self) -> &BTreeSet<String> {
        &self.hashtags_added
    }

    pub(crate) fn hashtags_removed(&self) -> &BTreeSet<String> {
        &self.hashtags_removed
    }

    pub(crate) fn attention(&self) -> &[AttentionSetUpdate] {
        &self.attention
    }

    pub(crate) fn custom_keyed_values(&self) -> &BTreeMap<String, Option<String>> {
        &self.custom_keyed_values
    }

    pub(crate) fn messages(&self) -> &[ChangeMessage] {
        &self.messages
    }

    pub(crate) fn patch_sets(&self) -> &[PatchSet] {
        &self.patch_sets
    }

    pub(crate) fn deleted_patch_sets(&self) -> &[PatchSetId] {
        &self.deleted_patch_sets
    }

    pub(crate) fn work_in_progress(&self) -> Option<bool> {
        self.work_in_progress
    }

    /// Serialize as a commit body
    pub fn to_body(&self) -> UpdateResult<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| UpdateError::Serialization(e.to_string()))
    }

    /// Deserialize from a commit body
    pub fn from_body(body: &[u8]) -> UpdateResult<Self> {
        rmp_serde::from_slice(body).map_err(|e| UpdateError::Serialization(e.to_string()))
    }

    /// Commit message summarizing this delta
    ///
    /// The first line names the change; footer lines list what changed.
    pub fn commit_message(&self, change: ChangeId, ref_log_message: Option<&str>) -> String {
        let mut msg = match (&self.creation, ref_log_message) {
            (Some(_), _) => format!("Create change {}", change),
            (None, Some(log)) => log.to_string(),
            (None, None) => format!("Update change {}", change),
        };
        let mut footers = Vec::new();
        if let Some(status) = self.status {
            footers.push(format!("Status: {}", status));
        }
        if let Some(subject) = &self.subject {
            footers.push(format!("Subject: {}", subject));
        }
        if let Some(topic) = &self.topic {
            footers.push(match topic {
                FieldChange::Set(t) => format!("Topic: {}", t),
                FieldChange::Clear => "Topic:".to_string(),
            });
        }
        if let Some(assignee) = &self.assignee {
            footers.push(match assignee {
                FieldChange::Set(a) => format!("Assignee: {}", a),
                FieldChange::Clear => "Assignee:".to_string(),
            });
        }
        if !self.hashtags_added.is_empty() || !self.hashtags_removed.is_empty() {
            footers.push("Hashtags: updated".to_string());
        }
        for ps in &self.patch_sets {
            footers.push(format!("Patch-set: {}", ps.id.number()));
        }
        for ps in &self.deleted_patch_sets {
            footers.push(format!("Deleted-patch-set: {}", ps.number()));
        }
        for update in &self.attention {
            footers.push(format!("Attention: {} {:?}", update.account, update.operation));
        }
        if !footers.is_empty() {
            msg.push_str("\n\n");
            msg.push_str(&footers.join("\n"));
        }
        msg
    }
}
