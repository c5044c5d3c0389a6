use refbatch_core::{ChangeMessage, UpdateError, UpdateResult};

use super::change_message;
use crate::context::{ChangeContext, PostUpdateContext};
use crate::op::BatchUpdateOp;

/// Appends a message to the change log
#[derive(Debug, Clone)]
pub struct PostMessageOp {
    text: String,
    tag: Option<String>,
    posted: Option<ChangeMessage>,
}

impl PostMessageOp {
    /// Post `text`
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tag: None,
            posted: None,
        }
    }

    /// Machine-readable tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// The posted message
    pub fn message(&self) -> Option<&ChangeMessage> {
        self.posted.as_ref()
    }
}

impl BatchUpdateOp for PostMessageOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(UpdateError::bad_request("message must not be empty"));
        }
        let patch_set = ctx.view()?.current_patch_set().map(|ps| ps.id);
        let message = change_message(ctx, text, self.tag.as_deref(), patch_set);
        ctx.update().add_message(message.clone());
        self.posted = Some(message);
        Ok(true)
    }

    fn post_update(&mut self, ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        ctx.send_email("comment", "New comment", self.text.clone())
    }
}
