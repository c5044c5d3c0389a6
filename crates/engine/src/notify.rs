//! Notification settings and delivery
//!
//! Resolution is a pure function of the handling policy, the explicit
//! accounts and the committed snapshot, so the same inputs always produce the
//! same recipients. Delivery happens from `post_update` only.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use refbatch_core::{AccountId, ChangeId, ProjectName, UpdateResult};
use refbatch_notes::ChangeState;

/// Who is notified about a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NotifyHandling {
    /// Only explicitly listed accounts
    None,
    /// The change owner
    Owner,
    /// The owner and everyone in the attention set
    OwnerReviewers,
    /// Everyone who ever took part in the change
    #[default]
    All,
}

/// Resolved notification settings for one change
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotifyResolution {
    handling: NotifyHandling,
    accounts: BTreeSet<AccountId>,
}

impl NotifyResolution {
    /// Resolution with explicit accounts
    pub fn new(handling: NotifyHandling, accounts: BTreeSet<AccountId>) -> Self {
        Self { handling, accounts }
    }

    /// Handling policy
    pub fn handling(&self) -> NotifyHandling {
        self.handling
    }

    /// Explicitly listed accounts
    pub fn accounts(&self) -> &BTreeSet<AccountId> {
        &self.accounts
    }

    /// Copy with a different handling policy, keeping explicit accounts
    pub fn with_handling(&self, handling: NotifyHandling) -> Self {
        Self {
            handling,
            accounts: self.accounts.clone(),
        }
    }

    /// Final recipients for a change acted on by `actor`
    ///
    /// Explicit accounts are always included. Derived recipients never
    /// include the actor or the server identity.
    pub fn recipients(&self, state: &ChangeState, actor: AccountId) -> BTreeSet<AccountId> {
        let mut derived = match self.handling {
            NotifyHandling::None => BTreeSet::new(),
            NotifyHandling::Owner => BTreeSet::from([state.owner]),
            NotifyHandling::OwnerReviewers => {
                let mut accounts = state.active_attention();
                accounts.insert(state.owner);
                accounts
            }
            NotifyHandling::All => state.participants(),
        };
        derived.remove(&actor);
        derived.remove(&AccountId::SERVER);
        derived.extend(self.accounts.iter().copied());
        derived
    }
}

/// Builds [`NotifyResolution`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyResolver;

impl NotifyResolver {
    /// Combine a policy with explicit recipients
    pub fn resolve<I>(handling: NotifyHandling, explicit: I) -> NotifyResolution
    where
        I: IntoIterator<Item = AccountId>,
    {
        NotifyResolution::new(handling, explicit.into_iter().collect())
    }
}

/// Email produced by an operation's `post_update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    /// Project of the change
    pub project: ProjectName,
    /// Change the email is about
    pub change: ChangeId,
    /// Kind of event, e.g. "abandon" or "comment"
    pub category: String,
    /// Acting user
    pub sender: AccountId,
    /// Resolved recipients
    pub recipients: BTreeSet<AccountId>,
    /// Subject line
    pub subject: String,
    /// Body text
    pub body: String,
}

/// Notification delivery consumed from `post_update`
pub trait NotificationService: Send + Sync {
    /// Deliver one email
    fn send(&self, email: OutgoingEmail) -> UpdateResult<()>;
}

/// Drops every email
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl NotificationService for NoopNotifier {
    fn send(&self, _email: OutgoingEmail) -> UpdateResult<()> {
        Ok(())
    }
}

/// Records every email in memory
#[derive(Debug, Default)]
pub struct OutboxNotifier {
    outbox: Mutex<Vec<OutgoingEmail>>,
}

impl OutboxNotifier {
    /// Empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Emails sent so far, oldest first
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.outbox.lock().clone()
    }

    /// Number of emails sent
    pub fn len(&self) -> usize {
        self.outbox.lock().len()
    }

    /// Whether nothing was sent
    pub fn is_empty(&self) -> bool {
        self.outbox.lock().is_empty()
    }
}

impl NotificationService for OutboxNotifier {
    fn send(&self, email: OutgoingEmail) -> UpdateResult<()> {
        debug!(
            target: "refbatch::update",
            change = %email.change,
            category = %email.category,
            recipients = email.recipients.len(),
            "Email queued"
        );
        self.outbox.lock().push(email);
        Ok(())
    }
}
