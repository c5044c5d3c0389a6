//! Built-in operations
//!
//! Each operation reads its preconditions from [`ChangeContext::view`], so it
//! sees what earlier operations on the same change staged in this attempt.
//! Results are read through [`OpHandle::result`](crate::OpHandle::result)
//! once the batch executed.
//!
//! [`ChangeContext::view`]: crate::ChangeContext::view

mod assignee;
mod attention;
mod create_ref;
mod custom_kv;
mod delete_change;
mod hashtags;
mod insert;
mod message;
mod patch_set;
mod status;

pub use assignee::{DeleteAssigneeOp, SetAssigneeOp};
pub use attention::{AddToAttentionSetOp, RemoveFromAttentionSetOp};
pub use create_ref::CreateRefOp;
pub use custom_kv::SetCustomKeyedValuesOp;
pub use delete_change::DeleteChangeOp;
pub use hashtags::SetHashtagsOp;
pub use insert::InsertChangeOp;
pub use message::PostMessageOp;
pub use patch_set::{DeletePatchSetOp, PatchSetInserter};
pub use status::{AbandonOp, RestoreOp};

use refbatch_core::{ChangeMessage, MessageId, PatchSetId};

use crate::context::ChangeContext;

/// Message entry authored by the acting user at the batch time
pub(crate) fn change_message(
    ctx: &ChangeContext<'_>,
    text: impl Into<String>,
    tag: Option<&str>,
    patch_set: Option<PatchSetId>,
) -> ChangeMessage {
    ChangeMessage {
        id: MessageId::new(),
        author: ctx.user(),
        message: text.into(),
        tag: tag.map(str::to_string),
        patch_set,
        written_on: ctx.when(),
    }
}
