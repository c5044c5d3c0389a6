use refbatch_core::{AccountId, UpdateError, UpdateResult};

use super::change_message;
use crate::context::{ChangeContext, PostUpdateContext};
use crate::op::BatchUpdateOp;

/// Sets the assignee of a change
#[derive(Debug, Clone)]
pub struct SetAssigneeOp {
    assignee: AccountId,
    previous: Option<AccountId>,
}

impl SetAssigneeOp {
    /// Assign the change to `assignee`
    pub fn new(assignee: AccountId) -> Self {
        Self {
            assignee,
            previous: None,
        }
    }

    /// Assignee after the update
    pub fn new_assignee(&self) -> AccountId {
        self.assignee
    }

    /// Assignee before the update
    pub fn previous_assignee(&self) -> Option<AccountId> {
        self.previous
    }
}

impl BatchUpdateOp for SetAssigneeOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        if self.assignee.is_server() {
            return Err(UpdateError::bad_request("cannot assign to the server identity"));
        }
        let state = ctx.view()?;
        if state.status.is_closed() {
            return Err(UpdateError::conflict(format!(
                "change {} is {}",
                ctx.change(),
                state.status
            )));
        }
        self.previous = state.assignee;
        if self.previous == Some(self.assignee) {
            return Ok(false);
        }
        let message = change_message(
            ctx,
            format!("Assignee changed to {}", self.assignee),
            Some("autogenerated:assignee"),
            None,
        );
        let update = ctx.update();
        update.set_assignee(self.assignee);
        update.add_message(message);
        Ok(true)
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        ctx.send_email(
            "assignee",
            "Assignee changed",
            format!("Assigned to {}", self.assignee),
        )
    }
}

/// Clears the assignee of a change
#[derive(Debug, Clone, Default)]
pub struct DeleteAssigneeOp {
    deleted: Option<AccountId>,
}

impl DeleteAssigneeOp {
    /// Clear the current assignee
    pub fn new() -> Self {
        Self::default()
    }

    /// Assignee that was removed, `None` if there was none
    pub fn deleted_assignee(&self) -> Option<AccountId> {
        self.deleted
    }
}

impl BatchUpdateOp for DeleteAssigneeOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        self.deleted = ctx.view()?.assignee;
        let Some(previous) = self.deleted else {
            return Ok(false);
        };
        let message = change_message(
            ctx,
            format!("Assignee deleted: {}", previous),
            Some("autogenerated:assignee"),
            None,
        );
        let update = ctx.update();
        update.remove_assignee();
        update.add_message(message);
        Ok(true)
    }
}
