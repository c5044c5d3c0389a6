use refbatch_core::{ChangeMessage, ChangeStatus, UpdateError, UpdateResult};

use super::change_message;
use crate::context::{ChangeContext, PostUpdateContext};
use crate::op::BatchUpdateOp;

/// Abandons an open change
#[derive(Debug, Clone, Default)]
pub struct AbandonOp {
    reason: String,
    message: Option<ChangeMessage>,
}

impl AbandonOp {
    /// Abandon with an optional reason (may be empty)
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: None,
        }
    }

    /// Message recorded on the change
    pub fn message(&self) -> Option<&ChangeMessage> {
        self.message.as_ref()
    }
}

impl BatchUpdateOp for AbandonOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        let state = ctx.view()?;
        if state.status.is_closed() {
            return Err(UpdateError::conflict(format!(
                "change {} is {}",
                ctx.change(),
                state.status
            )));
        }
        let text = if self.reason.is_empty() {
            "Abandoned".to_string()
        } else {
            format!("Abandoned\n\n{}", self.reason)
        };
        let patch_set = state.current_patch_set().map(|ps| ps.id);
        let message = change_message(ctx, text, Some("autogenerated:abandon"), patch_set);
        let update = ctx.update();
        update.set_status(ChangeStatus::Abandoned);
        update.add_message(message.clone());
        self.message = Some(message);
        Ok(true)
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        let subject = ctx.notes().map(|n| n.subject.clone()).unwrap_or_default();
        ctx.send_email("abandon", format!("Abandoned: {}", subject), self.reason.clone())
    }
}

/// Restores an abandoned change
#[derive(Debug, Clone, Default)]
pub struct RestoreOp {
    reason: String,
    message: Option<ChangeMessage>,
}

impl RestoreOp {
    /// Restore with an optional reason (may be empty)
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: None,
        }
    }

    /// Message recorded on the change
    pub fn message(&self) -> Option<&ChangeMessage> {
        self.message.as_ref()
    }
}

impl BatchUpdateOp for RestoreOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        let state = ctx.view()?;
        if state.status != ChangeStatus::Abandoned {
            return Err(UpdateError::conflict(format!(
                "change {} is {}",
                ctx.change(),
                state.status
            )));
        }
        let text = if self.reason.is_empty() {
            "Restored".to_string()
        } else {
            format!("Restored\n\n{}", self.reason)
        };
        let patch_set = state.current_patch_set().map(|ps| ps.id);
        let message = change_message(ctx, text, Some("autogenerated:restore"), patch_set);
        let update = ctx.update();
        update.set_status(ChangeStatus::New);
        update.add_message(message.clone());
        self.message = Some(message);
        Ok(true)
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        let subject = ctx.notes().map(|n| n.subject.clone()).unwrap_or_default();
        ctx.send_email("restore", format!("Restored: {}", subject), self.reason.clone())
    }
}
