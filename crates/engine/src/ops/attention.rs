use refbatch_core::{AccountId, AttentionOperation, AttentionSetUpdate, UpdateError, UpdateResult};

use crate::context::ChangeContext;
use crate::op::BatchUpdateOp;

/// Puts an account into the attention set
///
/// A no-op on closed changes and for accounts already in the set.
#[derive(Debug, Clone)]
pub struct AddToAttentionSetOp {
    account: AccountId,
    reason: String,
    added: bool,
}

impl AddToAttentionSetOp {
    /// Add `account` for `reason`
    pub fn new(account: AccountId, reason: impl Into<String>) -> Self {
        Self {
            account,
            reason: reason.into(),
            added: false,
        }
    }

    /// Whether the account was added
    pub fn added(&self) -> bool {
        self.added
    }
}

impl BatchUpdateOp for AddToAttentionSetOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        if self.account.is_server() {
            return Err(UpdateError::bad_request("server identity cannot need attention"));
        }
        let state = ctx.view()?;
        self.added = !state.status.is_closed() && !state.active_attention().contains(&self.account);
        if self.added {
            ctx.update().add_attention(AttentionSetUpdate::new(
                self.account,
                AttentionOperation::Add,
                self.reason.clone(),
            ));
        }
        Ok(self.added)
    }
}

/// Takes an account out of the attention set
#[derive(Debug, Clone)]
pub struct RemoveFromAttentionSetOp {
    account: AccountId,
    reason: String,
    removed: bool,
}

impl RemoveFromAttentionSetOp {
    /// Remove `account` for `reason`
    pub fn new(account: AccountId, reason: impl Into<String>) -> Self {
        Self {
            account,
            reason: reason.into(),
            removed: false,
        }
    }

    /// Whether the account was removed
    pub fn removed(&self) -> bool {
        self.removed
    }
}

impl BatchUpdateOp for RemoveFromAttentionSetOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        self.removed = ctx.view()?.active_attention().contains(&self.account);
        if self.removed {
            ctx.update().add_attention(AttentionSetUpdate::new(
                self.account,
                AttentionOperation::Remove,
                self.reason.clone(),
            ));
        }
        Ok(self.removed)
    }
}
