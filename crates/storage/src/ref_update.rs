//! Compare-and-swap ref updates and commit outcomes

use std::fmt;

use thiserror::Error;

use refbatch_core::{ObjectId, RefName, UpdateError};

/// Proposed compare-and-swap of one ref
///
/// `old == ObjectId::ZERO` means the ref must not exist yet,
/// `new == ObjectId::ZERO` deletes the ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    /// Ref to update
    pub name: RefName,
    /// Value the ref must currently have
    pub old: ObjectId,
    /// Value to set
    pub new: ObjectId,
}

impl RefUpdate {
    /// Create a ref that must not exist yet
    pub fn create(name: RefName, new: ObjectId) -> Self {
        Self {
            name,
            old: ObjectId::ZERO,
            new,
        }
    }

    /// Move a ref from `old` to `new`
    pub fn update(name: RefName, old: ObjectId, new: ObjectId) -> Self {
        Self { name, old, new }
    }

    /// Delete a ref currently pointing at `old`
    pub fn delete(name: RefName, old: ObjectId) -> Self {
        Self {
            name,
            old,
            new: ObjectId::ZERO,
        }
    }

    /// Whether this creates the ref
    pub fn is_create(&self) -> bool {
        self.old.is_zero()
    }

    /// Whether this deletes the ref
    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }
}

impl fmt::Display for RefUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}..{}", self.name, self.old.short(), self.new.short())
    }
}

/// One ref whose expected value did not match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefConflict {
    /// Ref name
    pub name: RefName,
    /// Value the update expected
    pub expected: ObjectId,
    /// Value actually found (`ZERO` if absent)
    pub actual: ObjectId,
}

/// Result of a successful atomic commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Ref database version after the commit
    pub version: u64,
    /// Number of ref updates applied
    pub applied: usize,
}

/// Failure of an atomic commit; nothing was applied in every case
#[derive(Debug, Error)]
pub enum CommitError {
    /// At least one expected value was stale (someone else committed first)
    #[error("lock failure: {} ref(s) changed concurrently", .conflicts.len())]
    LockFailure {
        /// Every stale ref in the batch
        conflicts: Vec<RefConflict>,
    },

    /// The batch itself is malformed
    #[error("rejected ref batch: {0}")]
    Rejected(String),

    /// Backing store failure
    #[error("ref storage failure: {0}")]
    Storage(String),
}

impl CommitError {
    /// Whether this is the retryable compare-and-swap race
    pub fn is_lock_failure(&self) -> bool {
        matches!(self, CommitError::LockFailure { .. })
    }

    /// Names of the refs that lost the race
    pub fn conflicting_refs(&self) -> Vec<RefName> {
        match self {
            CommitError::LockFailure { conflicts } => {
                conflicts.iter().map(|c| c.name.clone()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<CommitError> for UpdateError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::LockFailure { conflicts } => UpdateError::ContentionExhausted {
                attempts: 1,
                refs: conflicts.into_iter().map(|c| c.name).collect(),
            },
            CommitError::Rejected(msg) => {
                UpdateError::bad_request(format!("rejected ref batch: {}", msg))
            }
            CommitError::Storage(msg) => UpdateError::storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refbatch_core::ChangeId;

    #[test]
    fn test_create_and_delete_flags() {
        let name = RefName::change_meta(ChangeId::new(3));
        let id = ObjectId::from_bytes([9u8; 32]);
        assert!(RefUpdate::create(name.clone(), id).is_create());
        assert!(RefUpdate::delete(name.clone(), id).is_delete());
        let update = RefUpdate::update(name, id, id);
        assert!(!update.is_create());
        assert!(!update.is_delete());
    }

    #[test]
    fn test_lock_failure_maps_to_contention() {
        let name = RefName::change_meta(ChangeId::new(3));
        let err = CommitError::LockFailure {
            conflicts: vec![RefConflict {
                name: name.clone(),
                expected: ObjectId::ZERO,
                actual: ObjectId::from_bytes([1u8; 32]),
            }],
        };
        assert!(err.is_lock_failure());
        assert_eq!(err.conflicting_refs(), vec![name]);
        let update_err: UpdateError = err.into();
        assert!(update_err.is_contention());
    }

    #[test]
    fn test_rejected_batch_maps_to_bad_request() {
        let err: UpdateError =
            CommitError::Rejected("ref refs/heads/main appears more than once".into()).into();
        assert!(matches!(err, UpdateError::BadRequest(_)));
        assert!(err.is_business());
        assert!(!err.is_retryable_by_caller());
    }

    #[test]
    fn test_storage_failure_maps_to_storage() {
        let err: UpdateError = CommitError::Storage("disk full".into()).into();
        assert_eq!(err.kind(), refbatch_core::ErrorKind::Storage);
    }
}
