//! Contexts handed to operation callbacks
//!
//! Contexts are passed explicitly to each callback and borrow the attempt's
//! state; nothing is reachable through ambient or thread-local state.

use std::collections::BTreeSet;

use refbatch_core::{
    AccountId, ChangeId, ObjectId, ProjectName, RefName, Timestamp, UpdateError, UpdateResult,
};
use refbatch_notes::{ChangeNotes, ChangeState, ChangeUpdate};
use refbatch_storage::{RefUpdate, Repository};

use crate::batch::ChangeResult;
use crate::notify::{NotificationService, NotifyResolution, OutgoingEmail};

// ============================================================================
// Repo phase
// ============================================================================

/// Context of [`update_repo`](crate::BatchUpdateOp::update_repo)
pub struct RepoContext<'a> {
    repo: &'a Repository,
    user: AccountId,
    when: Timestamp,
    change: Option<ChangeId>,
    notes: Option<&'a ChangeNotes>,
    notify: NotifyResolution,
    staged: &'a mut Vec<RefUpdate>,
}

impl<'a> RepoContext<'a> {
    pub(crate) fn new(
        repo: &'a Repository,
        user: AccountId,
        when: Timestamp,
        change: Option<ChangeId>,
        notes: Option<&'a ChangeNotes>,
        notify: NotifyResolution,
        staged: &'a mut Vec<RefUpdate>,
    ) -> Self {
        Self {
            repo,
            user,
            when,
            change,
            notes,
            notify,
            staged,
        }
    }

    /// Project being updated
    pub fn project(&self) -> &ProjectName {
        self.repo.name()
    }

    /// Repository being updated
    pub fn repository(&self) -> &Repository {
        self.repo
    }

    /// Acting user of this operation
    pub fn user(&self) -> AccountId {
        self.user
    }

    /// Logical time of the batch
    pub fn when(&self) -> Timestamp {
        self.when
    }

    /// Change the operation is registered for (`None` for repo-only ops)
    pub fn change(&self) -> Option<ChangeId> {
        self.change
    }

    /// Snapshot of the change loaded for this attempt
    pub fn notes(&self) -> Option<&ChangeNotes> {
        self.notes
    }

    /// Notification settings for the change
    pub fn notify(&self) -> &NotifyResolution {
        &self.notify
    }

    /// Committed value of a ref
    pub fn read_ref(&self, name: &RefName) -> UpdateResult<Option<ObjectId>> {
        self.repo.read_ref(name)
    }

    /// Raw update already staged for `name` by this or an earlier operation
    pub fn staged_ref(&self, name: &RefName) -> Option<&RefUpdate> {
        self.staged.iter().find(|u| &u.name == name)
    }

    /// Stage a raw ref update for this attempt
    ///
    /// Meta refs are owned by the change phase and rejected here. A ref may be
    /// staged once per attempt.
    pub fn add_ref_update(&mut self, update: RefUpdate) -> UpdateResult<()> {
        if update.name.is_change_meta() {
            return Err(UpdateError::bad_request(format!(
                "{} is a change meta ref and cannot be updated directly",
                update.name
            )));
        }
        if self.staged_ref(&update.name).is_some() {
            return Err(UpdateError::bad_request(format!(
                "{} is already updated by another operation in this batch",
                update.name
            )));
        }
        self.staged.push(update);
        Ok(())
    }
}

// ============================================================================
// Change phase
// ============================================================================

/// Context of [`update_change`](crate::BatchUpdateOp::update_change)
///
/// Every operation on the same change in one attempt shares the staged
/// updates, so a later operation sees what an earlier one staged through
/// [`view`](Self::view).
pub struct ChangeContext<'a> {
    notes: &'a ChangeNotes,
    user: AccountId,
    when: Timestamp,
    notify: NotifyResolution,
    updates: &'a mut Vec<(AccountId, ChangeUpdate)>,
    delete: &'a mut bool,
}

impl<'a> ChangeContext<'a> {
    pub(crate) fn new(
        notes: &'a ChangeNotes,
        user: AccountId,
        when: Timestamp,
        notify: NotifyResolution,
        updates: &'a mut Vec<(AccountId, ChangeUpdate)>,
        delete: &'a mut bool,
    ) -> Self {
        Self {
            notes,
            user,
            when,
            notify,
            updates,
            delete,
        }
    }

    /// Project of the change
    pub fn project(&self) -> &ProjectName {
        self.notes.project()
    }

    /// Change being updated
    pub fn change(&self) -> ChangeId {
        self.notes.change_id
    }

    /// Acting user of this operation
    pub fn user(&self) -> AccountId {
        self.user
    }

    /// Logical time of the batch
    pub fn when(&self) -> Timestamp {
        self.when
    }

    /// Notification settings for the change
    pub fn notify(&self) -> &NotifyResolution {
        &self.notify
    }

    /// Snapshot loaded at the start of the attempt
    pub fn notes(&self) -> &ChangeNotes {
        self.notes
    }

    /// Whether the change has no meta ref yet
    pub fn is_new(&self) -> bool {
        !self.notes.exists()
    }

    /// Delta attributed to the acting user
    ///
    /// Consecutive operations by the same user share one delta; a different
    /// user starts a new one, committed separately.
    pub fn update(&mut self) -> &mut ChangeUpdate {
        let reuse = matches!(self.updates.last(), Some((author, _)) if *author == self.user);
        if !reuse {
            self.updates.push((self.user, ChangeUpdate::new()));
        }
        let last = self.updates.len() - 1;
        &mut self.updates[last].1
    }

    /// A fresh delta that is committed on its own
    pub fn distinct_update(&mut self) -> &mut ChangeUpdate {
        self.updates.push((self.user, ChangeUpdate::new()));
        let last = self.updates.len() - 1;
        &mut self.updates[last].1
    }

    /// Snapshot with every delta staged so far applied
    pub fn view(&self) -> UpdateResult<ChangeState> {
        let mut state = ChangeState::clone(self.notes.state());
        for (_, update) in self.updates.iter() {
            if !update.is_empty() {
                state.apply(update, self.when)?;
            }
        }
        Ok(state)
    }

    /// Delete the change together with every ref under its prefix
    pub fn delete_change(&mut self) {
        *self.delete = true;
    }

    /// Whether an operation asked to delete the change
    pub fn is_deleted(&self) -> bool {
        *self.delete
    }
}

// ============================================================================
// Post-update
// ============================================================================

/// Context of [`post_update`](crate::BatchUpdateOp::post_update)
pub struct PostUpdateContext<'a> {
    pub(crate) project: &'a ProjectName,
    pub(crate) user: AccountId,
    pub(crate) when: Timestamp,
    pub(crate) change: Option<ChangeId>,
    pub(crate) notes: Option<&'a ChangeNotes>,
    pub(crate) result: Option<ChangeResult>,
    pub(crate) notify: NotifyResolution,
    pub(crate) notifier: &'a dyn NotificationService,
    pub(crate) ref_updates: &'a [RefUpdate],
}

impl<'a> PostUpdateContext<'a> {
    /// Project that was updated
    pub fn project(&self) -> &ProjectName {
        self.project
    }

    /// Acting user of this operation
    pub fn user(&self) -> AccountId {
        self.user
    }

    /// Logical time of the batch
    pub fn when(&self) -> Timestamp {
        self.when
    }

    /// Change the operation is registered for
    pub fn change(&self) -> Option<ChangeId> {
        self.change
    }

    /// Committed snapshot (`None` for deleted changes and repo-only ops)
    pub fn notes(&self) -> Option<&ChangeNotes> {
        self.notes
    }

    /// What happened to the change
    pub fn result(&self) -> Option<ChangeResult> {
        self.result
    }

    /// Notification settings for the change
    pub fn notify(&self) -> &NotifyResolution {
        &self.notify
    }

    /// Every ref update the batch committed
    pub fn ref_updates(&self) -> &[RefUpdate] {
        self.ref_updates
    }

    /// Recipients for an email about the change
    pub fn recipients(&self) -> BTreeSet<AccountId> {
        match self.notes {
            Some(notes) => self.notify.recipients(notes, self.user),
            None => self.notify.accounts().clone(),
        }
    }

    /// Deliver an email
    pub fn send(&self, email: OutgoingEmail) -> UpdateResult<()> {
        self.notifier.send(email)
    }

    /// Email the resolved recipients about the change
    ///
    /// Does nothing for repo-only ops or when nobody is to be notified.
    pub fn send_email(
        &self,
        category: &str,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> UpdateResult<()> {
        let Some(change) = self.change else {
            return Ok(());
        };
        let recipients = self.recipients();
        if recipients.is_empty() {
            return Ok(());
        }
        self.send(OutgoingEmail {
            project: self.project.clone(),
            change,
            category: category.to_string(),
            sender: self.user,
            recipients,
            subject: subject.into(),
            body: body.into(),
        })
    }
}
