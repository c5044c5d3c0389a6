//! Change model types
//!
//! Value types that appear inside a change snapshot. They are immutable once
//! recorded: a later metadata commit supersedes them, it never edits them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::refs::ObjectId;
use crate::timestamp::Timestamp;
use crate::types::{AccountId, MessageId, PatchSetId};

/// Lifecycle status of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ChangeStatus {
    /// Open for review
    #[default]
    New,
    /// Submitted into its destination branch
    Merged,
    /// Closed without submitting
    Abandoned,
}

impl ChangeStatus {
    /// Closed changes reject most mutations
    pub fn is_closed(&self) -> bool {
        !matches!(self, ChangeStatus::New)
    }

    /// Lowercase name used in messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::New => "new",
            ChangeStatus::Merged => "merged",
            ChangeStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One revision of a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    /// Patch set id
    pub id: PatchSetId,
    /// Content hash of the revision's commit
    pub commit: ObjectId,
    /// Account that uploaded this revision
    pub uploader: AccountId,
    /// When the revision was created
    pub created_on: Timestamp,
    /// Optional free-form description
    pub description: Option<String>,
}

/// Whether an attention-set update adds or removes the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttentionOperation {
    /// Account now needs to act
    Add,
    /// Account no longer needs to act
    Remove,
}

/// Latest attention-set decision for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionSetUpdate {
    /// Affected account
    pub account: AccountId,
    /// Add or remove
    pub operation: AttentionOperation,
    /// Human readable reason
    pub reason: String,
    /// When the decision was recorded
    pub timestamp: Timestamp,
}

impl AttentionSetUpdate {
    /// Create an update (timestamp is assigned when committed)
    pub fn new(
        account: AccountId,
        operation: AttentionOperation,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            account,
            operation,
            reason: reason.into(),
            timestamp: Timestamp::EPOCH,
        }
    }
}

/// Entry of a change's message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMessage {
    /// Unique message id
    pub id: MessageId,
    /// Author of the message
    pub author: AccountId,
    /// Message text
    pub message: String,
    /// Machine-readable tag, e.g. `autogenerated:abandon`
    pub tag: Option<String>,
    /// Patch set the message refers to
    pub patch_set: Option<PatchSetId>,
    /// When the message was written
    pub written_on: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_closed() {
        assert!(!ChangeStatus::New.is_closed());
        assert!(ChangeStatus::Merged.is_closed());
        assert!(ChangeStatus::Abandoned.is_closed());
        assert_eq!(ChangeStatus::default(), ChangeStatus::New);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ChangeStatus::Abandoned.to_string(), "abandoned");
    }
}
