use refbatch_core::{ChangeStatus, UpdateError, UpdateResult};

use crate::context::ChangeContext;
use crate::op::BatchUpdateOp;

/// Deletes an unmerged change and every ref under its prefix
#[derive(Debug, Clone, Default)]
pub struct DeleteChangeOp {
    deleted: bool,
}

impl DeleteChangeOp {
    /// Delete the change the op is registered for
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the change was deleted
    pub fn deleted(&self) -> bool {
        self.deleted
    }
}

impl BatchUpdateOp for DeleteChangeOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        let state = ctx.view()?;
        if state.status == ChangeStatus::Merged {
            return Err(UpdateError::conflict(format!(
                "change {} is merged and cannot be deleted",
                ctx.change()
            )));
        }
        ctx.delete_change();
        self.deleted = true;
        Ok(true)
    }
}
