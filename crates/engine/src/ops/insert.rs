use std::collections::BTreeSet;

use refbatch_core::{ChangeId, ObjectId, PatchSet, PatchSetId, RefName, UpdateError, UpdateResult};
use refbatch_notes::ChangeCreation;
use refbatch_storage::RefUpdate;

use super::change_message;
use crate::context::{ChangeContext, PostUpdateContext, RepoContext};
use crate::op::BatchUpdateOp;

/// Creates a change with its first patch set
///
/// Register with [`BatchUpdate::insert_change`](crate::BatchUpdate::insert_change).
/// The acting user becomes the owner; `commit` must already be in the
/// repository's object store.
#[derive(Debug, Clone)]
pub struct InsertChangeOp {
    branch: RefName,
    subject: String,
    commit: ObjectId,
    topic: Option<String>,
    hashtags: BTreeSet<String>,
    work_in_progress: bool,
    patch_set: Option<PatchSetId>,
}

impl InsertChangeOp {
    /// Change on `branch` whose first patch set points at `commit`
    pub fn new(branch: RefName, subject: impl Into<String>, commit: ObjectId) -> Self {
        Self {
            branch,
            subject: subject.into(),
            commit,
            topic: None,
            hashtags: BTreeSet::new(),
            work_in_progress: false,
            patch_set: None,
        }
    }

    /// Initial topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Initial hashtags
    pub fn with_hashtags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hashtags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Create the change as work in progress
    pub fn with_work_in_progress(mut self, wip: bool) -> Self {
        self.work_in_progress = wip;
        self
    }

    /// The created patch set
    pub fn patch_set(&self) -> Option<PatchSetId> {
        self.patch_set
    }

    fn first_patch_set(change: Option<ChangeId>) -> UpdateResult<PatchSetId> {
        change
            .map(|c| PatchSetId::new(c, 1))
            .ok_or_else(|| UpdateError::internal("change insertion registered without a change"))
    }
}

impl BatchUpdateOp for InsertChangeOp {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> UpdateResult<()> {
        let ps = Self::first_patch_set(ctx.change())?;
        ctx.add_ref_update(RefUpdate::create(RefName::patch_set(ps), self.commit))
    }

    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        if !ctx.is_new() {
            return Err(UpdateError::conflict(format!(
                "change {} already exists",
                ctx.change()
            )));
        }
        if self.subject.trim().is_empty() {
            return Err(UpdateError::bad_request("subject must not be empty"));
        }
        let ps = Self::first_patch_set(Some(ctx.change()))?;
        let message = change_message(
            ctx,
            "Uploaded patch set 1.",
            Some("autogenerated:newchange"),
            Some(ps),
        );
        let patch_set = PatchSet {
            id: ps,
            commit: self.commit,
            uploader: ctx.user(),
            created_on: ctx.when(),
            description: None,
        };
        let owner = ctx.user();
        let update = ctx.update();
        update.set_creation(ChangeCreation {
            owner,
            branch: self.branch.clone(),
            subject: self.subject.clone(),
        });
        update.add_patch_set(patch_set);
        if self.topic.is_some() {
            update.set_topic(self.topic.clone());
        }
        if !self.hashtags.is_empty() {
            update.add_hashtags(self.hashtags.iter().cloned());
        }
        if self.work_in_progress {
            update.set_work_in_progress(true);
        }
        update.add_message(message);
        self.patch_set = Some(ps);
        Ok(true)
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        if self.work_in_progress {
            return Ok(());
        }
        let change = ctx.change().map(|c| c.to_string()).unwrap_or_default();
        ctx.send_email(
            "newchange",
            format!("New change: {}", self.subject),
            format!("Change {} uploaded on {}", change, self.branch),
        )
    }
}
