//! Batch update coordinator
//!
//! A [`BatchUpdate`] collects operations for one project and executes them
//! as a single atomic ref transaction:
//!
//! ```text
//! for attempt in 1..:
//!     load the snapshot of every change
//!     run update_change per change (registration order, shared deltas)
//!     run update_repo for every op            (order is configurable)
//!     nothing active?  -> no-op, done
//!     assemble meta + raw ref updates, commit them in one batch
//!     lock failure?    -> ask the retry policy, back off, start over
//! invalidate cache, post_update active ops, index, notify listeners
//! ```
//!
//! A business error from any callback aborts the batch immediately and is
//! returned unchanged; it is never retried. The repository handle is held
//! only for the duration of `execute()`.
//!
//! [`BatchUpdate::execute_all`] runs batches for different projects as one
//! unit: every repo phase, then the shared `after_update_repos`, then every
//! change phase, then one commit per project. A dry run stops short of the
//! commits and runs no post-commit step.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use refbatch_concurrency::{PendingChange, RefBatch, UpdateManager};
use refbatch_core::{
    AccountId, ChangeId, ErrorKind, ProjectName, RefName, Timestamp, UpdateError, UpdateResult,
};
use refbatch_notes::{ChangeNotes, ChangeUpdate};
use refbatch_storage::{CommitError, RefUpdate, Repository, RepositoryHandle};

use crate::config::PhaseOrder;
use crate::context::{ChangeContext, PostUpdateContext, RepoContext};
use crate::listener::BatchUpdateListener;
use crate::notify::{NotifyHandling, NotifyResolution};
use crate::op::{BatchUpdateOp, ChangeOpSlot, OpHandle, OpSlot, OpState, RepoOnlyOp, RepoOnlyOpSlot};
use crate::services::Services;

/// What a committed batch did to one change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeResult {
    /// Nothing was written for the change
    Skipped,
    /// The change's meta ref was created or advanced
    Upserted,
    /// The change and all of its refs were deleted
    Deleted,
}

struct RegisteredOp {
    change: Option<ChangeId>,
    user: AccountId,
    slot: Box<dyn OpSlot>,
}

/// Everything one attempt staged
struct Attempt {
    snapshots: BTreeMap<ChangeId, ChangeNotes>,
    pending: Vec<PendingChange>,
    raw: Vec<RefUpdate>,
    active: Vec<bool>,
}

impl Attempt {
    fn is_noop(&self) -> bool {
        self.raw.is_empty() && !self.active.iter().any(|a| *a)
    }

    /// Result of every loaded change once `batch` is applied
    fn results(&self, batch: &RefBatch) -> BTreeMap<ChangeId, ChangeResult> {
        let mut results: BTreeMap<ChangeId, ChangeResult> = self
            .snapshots
            .keys()
            .map(|c| (*c, ChangeResult::Skipped))
            .collect();
        for (change, tip) in batch.new_tips() {
            let result = if tip.is_zero() {
                ChangeResult::Deleted
            } else {
                ChangeResult::Upserted
            };
            results.insert(*change, result);
        }
        results
    }
}

/// How the ref transaction of one batch ended
enum Outcome {
    NoOp(Attempt),
    DryRun {
        attempt: Attempt,
        batch: RefBatch,
    },
    Committed {
        attempt: Attempt,
        batch: RefBatch,
        attempts: u32,
    },
}

fn check_different_projects(updates: &[BatchUpdate]) {
    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<&ProjectName> = updates
        .iter()
        .map(|u| &u.project)
        .filter(|p| !seen.insert(*p))
        .collect();
    assert!(
        duplicates.is_empty(),
        "updates must all be for different projects, got duplicates: {:?}",
        duplicates
    );
}

/// One transaction over the changes of a project
///
/// Created by [`BatchUpdateFactory::create`](crate::BatchUpdateFactory::create).
pub struct BatchUpdate {
    services: Arc<Services>,
    project: ProjectName,
    user: AccountId,
    when: Timestamp,
    ops: Vec<RegisteredOp>,
    inserted: BTreeSet<ChangeId>,
    notify: NotifyResolution,
    notify_handling: BTreeMap<ChangeId, NotifyHandling>,
    ref_log_message: Option<String>,
    listeners: Vec<Arc<dyn BatchUpdateListener>>,
    executed: bool,
    ref_updates: Vec<RefUpdate>,
    change_results: BTreeMap<ChangeId, ChangeResult>,
}

impl fmt::Debug for BatchUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchUpdate")
            .field("project", &self.project)
            .field("user", &self.user)
            .field("when", &self.when)
            .field("ops", &self.ops.len())
            .field("executed", &self.executed)
            .finish()
    }
}

impl BatchUpdate {
    pub(crate) fn new(
        services: Arc<Services>,
        project: ProjectName,
        user: AccountId,
        when: Timestamp,
    ) -> Self {
        Self {
            services,
            project,
            user,
            when,
            ops: Vec::new(),
            inserted: BTreeSet::new(),
            notify: NotifyResolution::default(),
            notify_handling: BTreeMap::new(),
            ref_log_message: None,
            listeners: Vec::new(),
            executed: false,
            ref_updates: Vec::new(),
            change_results: BTreeMap::new(),
        }
    }

    /// Project this batch updates
    pub fn project(&self) -> &ProjectName {
        &self.project
    }

    /// Acting user of the batch
    pub fn user(&self) -> AccountId {
        self.user
    }

    /// Logical time shared by every write of the batch
    pub fn when(&self) -> Timestamp {
        self.when
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register an operation on an existing change
    ///
    /// # Panics
    ///
    /// If the handle was already registered or the batch already executed.
    pub fn add_op<T>(&mut self, change: ChangeId, op: &OpHandle<T>) -> &mut Self
    where
        T: BatchUpdateOp + 'static,
    {
        let user = self.user;
        self.add_op_as(change, user, op)
    }

    /// Register an operation that runs as a different user
    pub fn add_op_as<T>(
        &mut self,
        change: ChangeId,
        user: AccountId,
        op: &OpHandle<T>,
    ) -> &mut Self
    where
        T: BatchUpdateOp + 'static,
    {
        self.check_not_executed();
        op.bind();
        self.ops.push(RegisteredOp {
            change: Some(change),
            user,
            slot: Box::new(ChangeOpSlot(op.clone())),
        });
        self
    }

    /// Register an operation that only stages raw ref updates
    pub fn add_repo_only_op<T>(&mut self, op: &OpHandle<T>) -> &mut Self
    where
        T: RepoOnlyOp + 'static,
    {
        self.check_not_executed();
        op.bind();
        self.ops.push(RegisteredOp {
            change: None,
            user: self.user,
            slot: Box::new(RepoOnlyOpSlot(op.clone())),
        });
        self
    }

    /// Register the operation creating a change that does not exist yet
    ///
    /// Execution fails with `ResourceConflict` if the change exists by then.
    pub fn insert_change<T>(&mut self, change: ChangeId, op: &OpHandle<T>) -> &mut Self
    where
        T: BatchUpdateOp + 'static,
    {
        self.add_op(change, op);
        self.inserted.insert(change);
        self
    }

    /// Batch-wide notification settings
    pub fn set_notify(&mut self, notify: NotifyResolution) -> &mut Self {
        self.notify = notify;
        self
    }

    /// Override the notification policy of one change
    pub fn set_notify_handling(&mut self, change: ChangeId, handling: NotifyHandling) -> &mut Self {
        self.notify_handling.insert(change, handling);
        self
    }

    /// Summary line of the metadata commits
    pub fn set_ref_log_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.ref_log_message = Some(message.into());
        self
    }

    /// Observe this batch's lifecycle
    pub fn add_listener(&mut self, listener: Arc<dyn BatchUpdateListener>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    // ========================================================================
    // Results
    // ========================================================================

    /// Whether `execute` was called
    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Ref updates committed by `execute` (empty for a no-op or failure)
    ///
    /// After a dry run these are the updates that would have been committed.
    pub fn ref_updates(&self) -> &[RefUpdate] {
        &self.ref_updates
    }

    /// Branch updates among [`ref_updates`](Self::ref_updates)
    pub fn updated_branches(&self) -> impl Iterator<Item = &RefUpdate> + '_ {
        self.ref_updates.iter().filter(|u| u.name.is_branch())
    }

    /// Per-change outcome of a successful `execute`
    pub fn change_results(&self) -> &BTreeMap<ChangeId, ChangeResult> {
        &self.change_results
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute every registered operation as one transaction
    ///
    /// # Errors
    ///
    /// - business errors raised by an operation, unchanged
    /// - `ContentionExhausted` once the retry policy gives up
    /// - storage and corruption errors
    ///
    /// # Panics
    ///
    /// If called twice.
    pub fn execute(&mut self) -> UpdateResult<()> {
        self.start(false);
        let repo = match self.services.repos.open(&self.project) {
            Ok(repo) => repo,
            Err(e) => {
                self.abort(&e);
                return Err(e);
            }
        };
        match self.run(&repo, None, false) {
            Ok(outcome) => {
                self.record(&outcome);
                self.post_commit(&repo, &outcome);
                Ok(())
            }
            Err(e) => {
                self.abort(&e);
                Err(e)
            }
        }
    }

    /// Execute batches for different projects as one unit
    ///
    /// The first attempt runs the repo phase of every batch, then
    /// `after_update_repos` of `listeners`, then the change phase of every
    /// batch. Each batch then commits in slice order; a batch that loses a
    /// ref race retries on its own with its configured phase order. Once all
    /// batches are through, `listeners` see `after_update_refs` for each
    /// batch, every batch runs its post-commit steps, and `listeners` see
    /// `after_update_changes`.
    ///
    /// With `dry_run` nothing is committed: each batch records the ref
    /// updates it would have made, active operations end in
    /// [`OpState::DryRun`], and no post-commit step or commit listener runs.
    ///
    /// If a batch fails, batches committed before it still run their
    /// post-commit steps; it and every later batch are aborted.
    ///
    /// # Panics
    ///
    /// If two batches update the same project or any batch already executed.
    pub fn execute_all(
        updates: &mut [BatchUpdate],
        listeners: &[Arc<dyn BatchUpdateListener>],
        dry_run: bool,
    ) -> UpdateResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        check_different_projects(updates);
        for update in updates.iter_mut() {
            update.start(dry_run);
        }

        let mut repos = Vec::with_capacity(updates.len());
        let mut outcomes = Vec::with_capacity(updates.len());
        let failure = match Self::prepare_all(updates, listeners, &mut repos) {
            Ok(attempts) => {
                let mut failure = None;
                for ((update, repo), attempt) in updates.iter_mut().zip(&repos).zip(attempts) {
                    match update.run(repo, Some(attempt), dry_run) {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                failure
            }
            Err(e) => Some(e),
        };

        let (done, rest) = updates.split_at_mut(outcomes.len());
        for (update, outcome) in done.iter_mut().zip(&outcomes) {
            update.record(outcome);
        }
        if !dry_run {
            for update in done.iter().filter(|u| !u.ref_updates.is_empty()) {
                for listener in listeners {
                    if let Err(e) = listener.after_update_refs(&update.ref_updates) {
                        warn!(
                            target: "refbatch::update",
                            project = %update.project,
                            error = %e,
                            "after_update_refs listener failed"
                        );
                    }
                }
            }
            for ((update, repo), outcome) in done.iter().zip(&repos).zip(&outcomes) {
                update.post_commit(repo, outcome);
            }
            for update in done.iter() {
                for listener in listeners {
                    if let Err(e) = listener.after_update_changes(&update.change_results) {
                        warn!(
                            target: "refbatch::update",
                            project = %update.project,
                            error = %e,
                            "after_update_changes listener failed"
                        );
                    }
                }
            }
        }

        match failure {
            Some(e) => {
                for update in rest.iter() {
                    update.abort(&e);
                }
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// First attempt of every batch, phases interleaved across batches
    fn prepare_all(
        updates: &[BatchUpdate],
        listeners: &[Arc<dyn BatchUpdateListener>],
        repos: &mut Vec<RepositoryHandle>,
    ) -> UpdateResult<Vec<Attempt>> {
        for update in updates {
            repos.push(update.services.repos.open(&update.project)?);
        }
        let mut attempts = Vec::with_capacity(updates.len());
        for (update, repo) in updates.iter().zip(repos.iter()) {
            let mut attempt = update.begin_attempt(repo)?;
            update.run_repo_phase(repo, &mut attempt)?;
            attempts.push(attempt);
        }
        for listener in listeners {
            listener.after_update_repos()?;
        }
        for (update, attempt) in updates.iter().zip(attempts.iter_mut()) {
            update.run_change_phase(attempt)?;
            update.end_attempt();
        }
        Ok(attempts)
    }

    fn check_not_executed(&self) {
        assert!(!self.executed, "update already executed");
    }

    fn start(&mut self, dry_run: bool) {
        self.check_not_executed();
        self.executed = true;
        self.services.metrics.record_start();
        debug!(
            target: "refbatch::update",
            project = %self.project,
            user = %self.user,
            ops = self.ops.len(),
            dry_run,
            "Executing batch update"
        );
    }

    /// Attempt loop; `first` is an attempt whose phases already ran
    fn run(
        &mut self,
        repo: &Repository,
        first: Option<Attempt>,
        dry_run: bool,
    ) -> UpdateResult<Outcome> {
        let policy = Arc::clone(&self.services.policy);
        let mut prepared = first;
        let mut attempt_no = 1u32;
        loop {
            let attempt = match prepared.take() {
                Some(attempt) => attempt,
                None => self.run_attempt(repo)?,
            };
            if attempt.is_noop() {
                return Ok(Outcome::NoOp(attempt));
            }

            let manager = UpdateManager::new(repo, self.when)
                .with_ref_log_message(self.ref_log_message.as_deref());
            let batch = manager.build(&attempt.pending, &attempt.raw)?;
            if dry_run {
                return Ok(Outcome::DryRun { attempt, batch });
            }
            if batch.is_empty() {
                return Ok(Outcome::Committed {
                    attempt,
                    batch,
                    attempts: attempt_no,
                });
            }

            self.services.metrics.record_commit_attempt();
            match manager.commit(&batch) {
                Ok(outcome) => {
                    debug!(
                        target: "refbatch::refs",
                        version = outcome.version,
                        applied = outcome.applied,
                        "Ref batch committed"
                    );
                    return Ok(Outcome::Committed {
                        attempt,
                        batch,
                        attempts: attempt_no,
                    });
                }
                Err(CommitError::LockFailure { conflicts }) => {
                    self.services.metrics.record_lock_failure();
                    let refs: Vec<RefName> = conflicts.iter().map(|c| c.name.clone()).collect();
                    if !policy.should_retry(attempt_no, &conflicts) {
                        return Err(UpdateError::ContentionExhausted {
                            attempts: attempt_no,
                            refs,
                        });
                    }
                    let delay = policy.backoff(attempt_no);
                    warn!(
                        target: "refbatch::retry",
                        project = %self.project,
                        attempt = attempt_no,
                        refs = ?refs,
                        delay_ms = delay.as_millis() as u64,
                        "Lost ref race, retrying"
                    );
                    thread::sleep(delay);
                    attempt_no += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn run_attempt(&self, repo: &Repository) -> UpdateResult<Attempt> {
        let mut attempt = self.begin_attempt(repo)?;
        match self.services.config.phase_order {
            PhaseOrder::ChangeFirst => {
                self.run_change_phase(&mut attempt)?;
                self.run_repo_phase(repo, &mut attempt)?;
            }
            PhaseOrder::RepoFirst => {
                self.run_repo_phase(repo, &mut attempt)?;
                self.run_change_phase(&mut attempt)?;
            }
        }
        self.end_attempt();
        Ok(attempt)
    }

    fn begin_attempt(&self, repo: &Repository) -> UpdateResult<Attempt> {
        for op in &self.ops {
            op.slot.set_state(OpState::Created);
        }
        Ok(Attempt {
            snapshots: self.load_snapshots(repo)?,
            pending: Vec::new(),
            raw: Vec::new(),
            active: vec![false; self.ops.len()],
        })
    }

    fn end_attempt(&self) {
        for op in &self.ops {
            op.slot.set_state(OpState::ChangePhaseDone);
        }
    }

    /// Changes in order of first registration, each with its op indices
    fn changes(&self) -> Vec<(ChangeId, Vec<usize>)> {
        let mut groups: Vec<(ChangeId, Vec<usize>)> = Vec::new();
        for (i, op) in self.ops.iter().enumerate() {
            let Some(change) = op.change else { continue };
            match groups.iter_mut().find(|(c, _)| *c == change) {
                Some((_, indices)) => indices.push(i),
                None => groups.push((change, vec![i])),
            }
        }
        groups
    }

    fn load_snapshots(&self, repo: &Repository) -> UpdateResult<BTreeMap<ChangeId, ChangeNotes>> {
        let mut snapshots = BTreeMap::new();
        for (change, _) in self.changes() {
            let loaded = self.services.cache.load(repo, change)?;
            let notes = match (loaded, self.inserted.contains(&change)) {
                (Some(_), true) => {
                    return Err(UpdateError::conflict(format!(
                        "change {} already exists",
                        change
                    )))
                }
                (Some(notes), false) => notes,
                (None, true) => ChangeNotes::empty(self.project.clone(), change),
                (None, false) => {
                    return Err(UpdateError::not_found(format!(
                        "change {} not found in {}",
                        change, self.project
                    )))
                }
            };
            snapshots.insert(change, notes);
        }
        Ok(snapshots)
    }

    fn run_change_phase(&self, attempt: &mut Attempt) -> UpdateResult<()> {
        for (change, indices) in self.changes() {
            let notes = &attempt.snapshots[&change];
            let notify = self.notify_for(Some(change));
            let mut updates: Vec<(AccountId, ChangeUpdate)> = Vec::new();
            let mut delete = false;
            let mut any_active = false;

            for i in indices {
                let op = &self.ops[i];
                let mut ctx = ChangeContext::new(
                    notes,
                    op.user,
                    self.when,
                    notify.clone(),
                    &mut updates,
                    &mut delete,
                );
                if op.slot.run_change_phase(&mut ctx)? {
                    attempt.active[i] = true;
                    any_active = true;
                }
            }

            if any_active {
                attempt.pending.push(PendingChange {
                    change,
                    base: notes.meta_id(),
                    updates,
                    delete,
                });
            }
        }
        Ok(())
    }

    fn run_repo_phase(&self, repo: &Repository, attempt: &mut Attempt) -> UpdateResult<()> {
        for (i, op) in self.ops.iter().enumerate() {
            let staged_before = attempt.raw.len();
            let notes = op.change.and_then(|c| attempt.snapshots.get(&c));
            let mut ctx = RepoContext::new(
                repo,
                op.user,
                self.when,
                op.change,
                notes,
                self.notify_for(op.change),
                &mut attempt.raw,
            );
            op.slot.run_repo_phase(&mut ctx)?;
            if attempt.raw.len() > staged_before {
                attempt.active[i] = true;
            }
        }
        for listener in &self.listeners {
            listener.after_update_repos()?;
        }
        Ok(())
    }

    fn notify_for(&self, change: Option<ChangeId>) -> NotifyResolution {
        match change.and_then(|c| self.notify_handling.get(&c)) {
            Some(handling) => self.notify.with_handling(*handling),
            None => self.notify.clone(),
        }
    }

    // ========================================================================
    // Outcomes
    // ========================================================================

    /// Record the outcome: results, op states and cache invalidation
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::NoOp(attempt) => self.finish_noop(attempt),
            Outcome::DryRun { attempt, batch } => self.finish_dry_run(attempt, batch),
            Outcome::Committed { attempt, batch, .. } => self.record_committed(attempt, batch),
        }
    }

    fn finish_noop(&mut self, attempt: &Attempt) {
        for op in &self.ops {
            op.slot.set_state(OpState::NoOp);
        }
        self.change_results = attempt
            .snapshots
            .keys()
            .map(|c| (*c, ChangeResult::Skipped))
            .collect();
        self.services.metrics.record_no_op();
        debug!(target: "refbatch::update", project = %self.project, "Nothing to commit");
    }

    fn finish_dry_run(&mut self, attempt: &Attempt, batch: &RefBatch) {
        for (i, op) in self.ops.iter().enumerate() {
            let state = if attempt.active[i] {
                OpState::DryRun
            } else {
                OpState::NoOp
            };
            op.slot.set_state(state);
        }
        self.ref_updates = batch.updates().to_vec();
        self.change_results = attempt.results(batch);
        self.services.metrics.record_dry_run();
        info!(
            target: "refbatch::update",
            project = %self.project,
            changes = batch.new_tips().len(),
            refs = self.ref_updates.len(),
            "Dry run finished, nothing committed"
        );
    }

    fn record_committed(&mut self, attempt: &Attempt, batch: &RefBatch) {
        for change in batch.new_tips().keys() {
            self.services.cache.invalidate(&self.project, *change);
        }
        for (i, op) in self.ops.iter().enumerate() {
            let state = if attempt.active[i] {
                OpState::Committed
            } else {
                OpState::NoOp
            };
            op.slot.set_state(state);
        }
        self.ref_updates = batch.updates().to_vec();
        self.change_results = attempt.results(batch);
    }

    /// Listeners, `post_update` and indexing of a committed batch
    fn post_commit(&self, repo: &Repository, outcome: &Outcome) {
        let Outcome::Committed {
            attempt,
            batch,
            attempts,
        } = outcome
        else {
            return;
        };
        let services = Arc::clone(&self.services);

        if !self.ref_updates.is_empty() {
            for listener in &self.listeners {
                if let Err(e) = listener.after_update_refs(&self.ref_updates) {
                    warn!(
                        target: "refbatch::update",
                        error = %e,
                        "after_update_refs listener failed"
                    );
                }
            }
        }

        // Snapshots as committed: new tip, untouched, or gone
        let mut committed: BTreeMap<ChangeId, ChangeNotes> = BTreeMap::new();
        for (change, notes) in &attempt.snapshots {
            match batch.new_tips().get(change) {
                Some(tip) if tip.is_zero() => {}
                Some(tip) => match services.cache.load_at(repo, *change, *tip) {
                    Ok(notes) => {
                        committed.insert(*change, notes);
                    }
                    Err(e) => {
                        error!(
                            target: "refbatch::update",
                            change = %change,
                            error = %e,
                            "Failed to load committed snapshot"
                        );
                    }
                },
                None if notes.exists() => {
                    committed.insert(*change, notes.clone());
                }
                None => {}
            }
        }

        let results = &self.change_results;
        for (i, op) in self.ops.iter().enumerate() {
            if !attempt.active[i] {
                continue;
            }
            let ctx = PostUpdateContext {
                project: &self.project,
                user: op.user,
                when: self.when,
                change: op.change,
                notes: op.change.and_then(|c| committed.get(&c)),
                result: op.change.and_then(|c| results.get(&c).copied()),
                notify: self.notify_for(op.change),
                notifier: services.notifier.as_ref(),
                ref_updates: &self.ref_updates,
            };
            if let Err(e) = op.slot.run_post_update(&ctx) {
                services.metrics.record_post_update_failure();
                error!(
                    target: "refbatch::update",
                    change = ?op.change,
                    error = %e,
                    "post_update failed"
                );
            }
        }

        for (change, result) in results {
            let outcome = match result {
                ChangeResult::Skipped => continue,
                ChangeResult::Upserted => services.indexer.index(&self.project, *change),
                ChangeResult::Deleted => services.indexer.delete(&self.project, *change),
            };
            if let Err(e) = outcome {
                services.metrics.record_index_failure();
                warn!(
                    target: "refbatch::update",
                    change = %change,
                    error = %e,
                    "Indexing failed"
                );
            }
        }

        for listener in &self.listeners {
            if let Err(e) = listener.after_update_changes(results) {
                warn!(
                    target: "refbatch::update",
                    error = %e,
                    "after_update_changes listener failed"
                );
            }
        }

        services.metrics.record_commit();
        info!(
            target: "refbatch::update",
            project = %self.project,
            changes = batch.new_tips().len(),
            refs = self.ref_updates.len(),
            attempts,
            "Batch update committed"
        );
    }

    fn abort(&self, e: &UpdateError) {
        for op in &self.ops {
            if !op.slot.state().is_terminal() {
                op.slot.set_state(OpState::ConflictAborted);
            }
        }
        let metrics = &self.services.metrics;
        match e.kind() {
            ErrorKind::Business => metrics.record_business_abort(),
            ErrorKind::Contention => metrics.record_contention_exhausted(),
            ErrorKind::Storage | ErrorKind::Internal => metrics.record_failure(),
        }
        warn!(
            target: "refbatch::update",
            project = %self.project,
            error = %e,
            "Batch update aborted"
        );
    }
}
