use refbatch_core::{ObjectId, PatchSet, PatchSetId, RefName, UpdateError, UpdateResult};
use refbatch_notes::ChangeState;
use refbatch_storage::RefUpdate;

use super::change_message;
use crate::context::{ChangeContext, PostUpdateContext, RepoContext};
use crate::op::BatchUpdateOp;

fn next_patch_set(state: &ChangeState) -> PatchSetId {
    state
        .current_patch_set()
        .map(|ps| ps.id.next())
        .unwrap_or_else(|| PatchSetId::new(state.change_id, 1))
}

/// Uploads a new patch set to an open change
///
/// `commit` must already be in the repository's object store. Several
/// inserters on one change in one batch take consecutive numbers in
/// registration order.
#[derive(Debug, Clone)]
pub struct PatchSetInserter {
    commit: ObjectId,
    description: Option<String>,
    message: Option<String>,
    patch_set: Option<PatchSetId>,
}

impl PatchSetInserter {
    /// New patch set pointing at `commit`
    pub fn new(commit: ObjectId) -> Self {
        Self {
            commit,
            description: None,
            message: None,
            patch_set: None,
        }
    }

    /// Description of the patch set
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Text appended to the upload message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The inserted patch set
    pub fn patch_set(&self) -> Option<PatchSetId> {
        self.patch_set
    }
}

impl BatchUpdateOp for PatchSetInserter {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> UpdateResult<()> {
        let notes = ctx.notes().ok_or_else(|| {
            UpdateError::internal("patch set inserter registered without a change")
        })?;
        // Earlier inserters of this attempt have staged their refs already
        let mut ps = next_patch_set(notes);
        while ctx
            .staged_ref(&RefName::patch_set(ps))
            .is_some_and(|u| u.is_create())
        {
            ps = ps.next();
        }
        ctx.add_ref_update(RefUpdate::create(RefName::patch_set(ps), self.commit))
    }

    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        let state = ctx.view()?;
        if state.status.is_closed() {
            return Err(UpdateError::conflict(format!(
                "cannot add patch set to {} change {}",
                state.status,
                ctx.change()
            )));
        }
        let ps = next_patch_set(&state);

        let mut text = format!("Uploaded patch set {}.", ps.number());
        if let Some(extra) = &self.message {
            text.push_str("\n\n");
            text.push_str(extra);
        }
        let message = change_message(ctx, text, Some("autogenerated:newpatchset"), Some(ps));
        let patch_set = PatchSet {
            id: ps,
            commit: self.commit,
            uploader: ctx.user(),
            created_on: ctx.when(),
            description: self.description.clone(),
        };
        let update = ctx.update();
        update.add_patch_set(patch_set);
        update.add_message(message);
        self.patch_set = Some(ps);
        Ok(true)
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        let Some(ps) = self.patch_set else {
            return Ok(());
        };
        ctx.send_email(
            "newpatchset",
            format!("Patch set {} uploaded", ps.number()),
            self.message.clone().unwrap_or_default(),
        )
    }
}

/// Deletes a patch set other than the current one, and its ref
#[derive(Debug, Clone)]
pub struct DeletePatchSetOp {
    patch_set: PatchSetId,
    ref_deleted: bool,
}

impl DeletePatchSetOp {
    /// Delete `patch_set`
    pub fn new(patch_set: PatchSetId) -> Self {
        Self {
            patch_set,
            ref_deleted: false,
        }
    }

    /// Deleted patch set
    pub fn patch_set(&self) -> PatchSetId {
        self.patch_set
    }

    /// Whether the patch set ref existed and was deleted
    pub fn ref_deleted(&self) -> bool {
        self.ref_deleted
    }
}

impl BatchUpdateOp for DeletePatchSetOp {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> UpdateResult<()> {
        let name = RefName::patch_set(self.patch_set);
        self.ref_deleted = false;
        if let Some(current) = ctx.read_ref(&name)? {
            ctx.add_ref_update(RefUpdate::delete(name, current))?;
            self.ref_deleted = true;
        }
        Ok(())
    }

    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        let state = ctx.view()?;
        if state.patch_set(self.patch_set).is_none() {
            return Err(UpdateError::not_found(format!("patch set {}", self.patch_set)));
        }
        if state.current_patch_set().map(|ps| ps.id) == Some(self.patch_set) {
            return Err(UpdateError::conflict(format!(
                "patch set {} is the current patch set and cannot be deleted",
                self.patch_set
            )));
        }
        let message = change_message(
            ctx,
            format!("Patch set {}: deleted", self.patch_set.number()),
            Some("autogenerated:deletepatchset"),
            None,
        );
        let update = ctx.update();
        update.delete_patch_set(self.patch_set);
        update.add_message(message);
        Ok(true)
    }
}
