//! Operation protocol
//!
//! An operation is registered with a [`BatchUpdate`](crate::BatchUpdate)
//! through an [`OpHandle`]. Each attempt drives it through up to three
//! callbacks:
//!
//! ```text
//! update_repo    stage raw ref updates (runs once per attempt)
//! update_change  stage a metadata delta, return whether it is needed
//! post_update    side effects, only after a durable commit
//! ```
//!
//! Lifecycle of one handle:
//!
//! ```text
//! Created -> RepoPhaseDone -> ChangePhaseDone -> Committed -> PostUpdateDone
//!                                             -> NoOp
//!                                             -> ConflictAborted
//! ```
//!
//! A lost ref race resets the state to `Created` for the next attempt. A
//! handle can be registered once; registering it again, or driving a handle
//! that already reached a terminal state, is a programming error and panics.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use refbatch_core::UpdateResult;

use crate::context::{ChangeContext, PostUpdateContext, RepoContext};

/// Operation on one change
///
/// Every callback defaults to doing nothing.
pub trait BatchUpdateOp: Send {
    /// Stage ref updates other than the change's meta ref
    ///
    /// Runs on every attempt, so it must not have effects beyond the context.
    fn update_repo(&mut self, _ctx: &mut RepoContext<'_>) -> UpdateResult<()> {
        Ok(())
    }

    /// Stage a metadata delta against the change snapshot
    ///
    /// Returns `true` if the staged delta must be committed, `false` if the
    /// operation turned out to be a no-op. An error aborts the whole batch.
    fn update_change(&mut self, _ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        Ok(false)
    }

    /// Side effects after commit; errors are logged, never propagated
    fn post_update(&mut self, _ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        Ok(())
    }
}

/// Operation that only touches raw refs and is bound to no change
pub trait RepoOnlyOp: Send {
    /// Stage ref updates
    fn update_repo(&mut self, _ctx: &mut RepoContext<'_>) -> UpdateResult<()> {
        Ok(())
    }

    /// Side effects after commit
    fn post_update(&mut self, _ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        Ok(())
    }
}

/// Lifecycle state of a registered operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpState {
    /// Not run in the current attempt yet
    Created,
    /// Repo phase finished
    RepoPhaseDone,
    /// Both phases finished for the current attempt
    ChangePhaseDone,
    /// Its delta is durable; `post_update` pending
    Committed,
    /// `post_update` ran
    PostUpdateDone,
    /// Batch committed without needing this operation
    NoOp,
    /// Both phases ran in a dry run; nothing was committed
    DryRun,
    /// Batch failed
    ConflictAborted,
}

impl OpState {
    /// No further callbacks will run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpState::PostUpdateDone | OpState::NoOp | OpState::DryRun | OpState::ConflictAborted
        )
    }

    /// Results of the operation may be read
    pub fn has_result(&self) -> bool {
        matches!(self, OpState::PostUpdateDone | OpState::NoOp | OpState::DryRun)
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: OpState,
    registered: bool,
}

struct OpCell<T> {
    op: Mutex<T>,
    lifecycle: Mutex<Lifecycle>,
}

/// Shared handle to a registered operation
///
/// The caller keeps a clone to read results after `execute()` succeeded.
pub struct OpHandle<T> {
    cell: Arc<OpCell<T>>,
}

impl<T> Clone for OpHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for OpHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.cell.lifecycle.lock();
        f.debug_struct("OpHandle")
            .field("op", &std::any::type_name::<T>())
            .field("state", &lifecycle.state)
            .field("registered", &lifecycle.registered)
            .finish()
    }
}

impl<T> OpHandle<T> {
    /// Wrap a fresh operation
    pub fn new(op: T) -> Self {
        Self {
            cell: Arc::new(OpCell {
                op: Mutex::new(op),
                lifecycle: Mutex::new(Lifecycle {
                    state: OpState::Created,
                    registered: false,
                }),
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> OpState {
        self.cell.lifecycle.lock().state
    }

    /// Whether the handle was registered with a batch
    pub fn is_registered(&self) -> bool {
        self.cell.lifecycle.lock().registered
    }

    /// Read the operation's results
    ///
    /// # Panics
    ///
    /// If the batch it was registered with has not executed successfully.
    pub fn result<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let state = self.state();
        assert!(
            state.has_result(),
            "operation result read before a successful execute (state {:?})",
            state
        );
        f(&self.cell.op.lock())
    }

    pub(crate) fn bind(&self) {
        let mut lifecycle = self.cell.lifecycle.lock();
        assert!(
            !lifecycle.registered,
            "operation already registered with a batch update (state {:?})",
            lifecycle.state
        );
        lifecycle.registered = true;
    }

    fn set_state(&self, state: OpState) {
        self.cell.lifecycle.lock().state = state;
    }

    /// Run a phase callback, panicking on a terminal handle
    fn drive<R>(&self, phase: &str, done: Option<OpState>, f: impl FnOnce(&mut T) -> R) -> R {
        let state = self.state();
        assert!(
            !state.is_terminal() && state != OpState::Committed,
            "{} invoked on operation in state {:?}",
            phase,
            state
        );
        let out = f(&mut self.cell.op.lock());
        if let Some(done) = done {
            self.set_state(done);
        }
        out
    }
}

// ============================================================================
// Type-erased slots
// ============================================================================

/// What the coordinator needs from any registered operation
pub(crate) trait OpSlot: Send {
    fn run_repo_phase(&self, ctx: &mut RepoContext<'_>) -> UpdateResult<()>;
    fn run_change_phase(&self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool>;
    fn run_post_update(&self, ctx: &PostUpdateContext<'_>) -> UpdateResult<()>;
    fn state(&self) -> OpState;
    fn set_state(&self, state: OpState);
}

fn repo_phase_state(current: OpState) -> Option<OpState> {
    (current == OpState::Created).then_some(OpState::RepoPhaseDone)
}

fn post_update_checked<T>(
    handle: &OpHandle<T>,
    f: impl FnOnce(&mut T) -> UpdateResult<()>,
) -> UpdateResult<()> {
    let state = handle.state();
    assert!(
        state == OpState::Committed,
        "post_update invoked on operation in state {:?}",
        state
    );
    let out = f(&mut handle.cell.op.lock());
    handle.set_state(OpState::PostUpdateDone);
    out
}

pub(crate) struct ChangeOpSlot<T>(pub(crate) OpHandle<T>);

impl<T: BatchUpdateOp> OpSlot for ChangeOpSlot<T> {
    fn run_repo_phase(&self, ctx: &mut RepoContext<'_>) -> UpdateResult<()> {
        let done = repo_phase_state(self.0.state());
        self.0.drive("update_repo", done, |op| op.update_repo(ctx))
    }

    fn run_change_phase(&self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        self.0
            .drive("update_change", Some(OpState::ChangePhaseDone), |op| {
                op.update_change(ctx)
            })
    }

    fn run_post_update(&self, ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        post_update_checked(&self.0, |op| op.post_update(ctx))
    }

    fn state(&self) -> OpState {
        self.0.state()
    }

    fn set_state(&self, state: OpState) {
        self.0.set_state(state)
    }
}

pub(crate) struct RepoOnlyOpSlot<T>(pub(crate) OpHandle<T>);

impl<T: RepoOnlyOp> OpSlot for RepoOnlyOpSlot<T> {
    fn run_repo_phase(&self, ctx: &mut RepoContext<'_>) -> UpdateResult<()> {
        let done = repo_phase_state(self.0.state());
        self.0.drive("update_repo", done, |op| op.update_repo(ctx))
    }

    fn run_change_phase(&self, _ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        Ok(false)
    }

    fn run_post_update(&self, ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        post_update_checked(&self.0, |op| op.post_update(ctx))
    }

    fn state(&self) -> OpState {
        self.0.state()
    }

    fn set_state(&self, state: OpState) {
        self.0.set_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        runs: u32,
    }

    impl BatchUpdateOp for Counter {}

    #[test]
    fn test_result_requires_success() {
        let handle = OpHandle::new(Counter::default());
        handle.set_state(OpState::NoOp);
        assert_eq!(handle.result(|op| op.runs), 0);
    }

    #[test]
    #[should_panic(expected = "before a successful execute")]
    fn test_result_before_execute_panics() {
        let handle = OpHandle::new(Counter::default());
        handle.result(|op| op.runs);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_double_bind_panics() {
        let handle = OpHandle::new(Counter::default());
        handle.bind();
        handle.clone().bind();
    }

    #[test]
    fn test_terminal_states() {
        assert!(OpState::NoOp.is_terminal());
        assert!(OpState::ConflictAborted.is_terminal());
        assert!(!OpState::Committed.is_terminal());
        assert!(!OpState::ConflictAborted.has_result());
        assert!(OpState::DryRun.is_terminal());
        assert!(OpState::DryRun.has_result());
    }
}
