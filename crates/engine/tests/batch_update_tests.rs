//! Batch update semantics
//!
//! 1. **Atomicity** - every ref of a batch advances, or none does
//! 2. **No-op** - nothing to do means no commit and no side effects
//! 3. **Ordering** - operations on one change see each other's deltas
//! 4. **Cache coherence** - a commit is visible on the next load
//! 5. **Business errors** - returned unchanged, nothing advances
//! 6. **Lifecycle guards** - reuse and premature reads panic
//! 7. **Post-commit** - hooks, listeners and their failure handling

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use common::{fast_retry, Fixture, OWNER, REVIEWER};
use refbatch_core::{
    AccountId, ChangeId, ChangeStatus, ErrorKind, ObjectId, RefName, UpdateError, UpdateResult,
};
use refbatch_engine::{
    AbandonOp, BatchUpdateListener, BatchUpdateOp, ChangeContext, ChangeResult, CreateRefOp,
    DeleteChangeOp, NotifyHandling, NotifyResolver, OpHandle, OpState, PatchSetInserter,
    PhaseOrder, PostUpdateContext, RepoContext, RestoreOp, SetHashtagsOp, UpdateConfig,
};
use refbatch_storage::testing::Fault;
use refbatch_storage::RefUpdate;

// ============================================================================
// Test Ops
// ============================================================================

/// Records whether an earlier op's hashtag is visible
#[derive(Default)]
struct HashtagObserver {
    saw: Option<bool>,
}

impl BatchUpdateOp for HashtagObserver {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        self.saw = Some(ctx.view()?.hashtags.contains("release"));
        Ok(false)
    }
}

/// Logs which phases ran, in order
struct PhaseRecorder {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl BatchUpdateOp for PhaseRecorder {
    fn update_repo(&mut self, _ctx: &mut RepoContext<'_>) -> UpdateResult<()> {
        self.log.lock().push("repo");
        Ok(())
    }

    fn update_change(&mut self, _ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        self.log.lock().push("change");
        Ok(false)
    }
}

/// Commits a subject change, then fails after commit
struct FailingPostUpdate;

impl BatchUpdateOp for FailingPostUpdate {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> UpdateResult<bool> {
        ctx.update().set_subject("Renamed");
        Ok(true)
    }

    fn post_update(&mut self, _ctx: &PostUpdateContext<'_>) -> UpdateResult<()> {
        Err(UpdateError::storage("mail server down"))
    }
}

/// Tries to write a meta ref from the repo phase
struct MetaWriter;

impl BatchUpdateOp for MetaWriter {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> UpdateResult<()> {
        let change = ctx.change().unwrap();
        ctx.add_ref_update(RefUpdate::delete(
            RefName::change_meta(change),
            ObjectId::from_bytes([9; 32]),
        ))
    }
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl BatchUpdateListener for RecordingListener {
    fn after_update_repos(&self) -> UpdateResult<()> {
        self.events.lock().push("repos".to_string());
        Ok(())
    }

    fn after_update_refs(&self, updates: &[RefUpdate]) -> UpdateResult<()> {
        self.events.lock().push(format!("refs:{}", updates.len()));
        Ok(())
    }

    fn after_update_changes(&self, results: &BTreeMap<ChangeId, ChangeResult>) -> UpdateResult<()> {
        self.events.lock().push(format!("changes:{}", results.len()));
        Err(UpdateError::internal("listener failures are only logged"))
    }
}

// ============================================================================
// Happy Path
// ============================================================================

#[test]
fn test_insert_creates_change_and_patch_set_ref() {
    let fx = Fixture::new();
    let change = fx.create_change(1);

    let notes = fx.notes(change);
    assert_eq!(notes.owner, AccountId::new(OWNER));
    assert_eq!(notes.status, ChangeStatus::New);
    assert_eq!(notes.subject, "Change 1");
    assert_eq!(notes.patch_sets.len(), 1);

    let ps_ref = RefName::parse("refs/changes/01/1/1").unwrap();
    assert_eq!(
        fx.repo.read_ref(&ps_ref).unwrap(),
        Some(notes.current_patch_set().unwrap().commit)
    );
    assert_eq!(fx.index.indexed(&fx.project, change), fx.meta(change));
    assert_eq!(fx.open_handles(), 0);
}

#[test]
fn test_abandon_commits_and_notifies() {
    let fx = Fixture::new();
    let change = fx.create_change(1);

    let abandon = OpHandle::new(AbandonOp::new("superseded"));
    let mut bu = fx.batch(REVIEWER);
    bu.add_op(change, &abandon);
    bu.execute().unwrap();

    assert_eq!(abandon.state(), OpState::PostUpdateDone);
    let message = abandon.result(|op| op.message().cloned()).unwrap();
    assert_eq!(message.author, AccountId::new(REVIEWER));
    assert_eq!(message.tag.as_deref(), Some("autogenerated:abandon"));

    let notes = fx.notes(change);
    assert_eq!(notes.status, ChangeStatus::Abandoned);
    assert_eq!(Some(notes.meta_id()), fx.meta(change));
    assert_eq!(bu.change_results()[&change], ChangeResult::Upserted);
    assert_eq!(bu.ref_updates().len(), 1);

    let sent = fx.outbox.sent();
    let email = sent.iter().find(|e| e.category == "abandon").unwrap();
    assert_eq!(email.sender, AccountId::new(REVIEWER));
    assert!(email.recipients.contains(&AccountId::new(OWNER)));
    assert!(!email.recipients.contains(&AccountId::new(REVIEWER)));
}

#[test]
fn test_one_commit_per_acting_user() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let before = fx.meta(change).unwrap();

    let tag = OpHandle::new(SetHashtagsOp::new(["release"], Vec::<String>::new()));
    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &tag);
    bu.add_op_as(change, AccountId::new(7), &abandon);
    bu.execute().unwrap();

    let head = fx.repo.objects().read_commit(&fx.meta(change).unwrap()).unwrap();
    assert_eq!(head.author, AccountId::new(7));
    let parent = fx.repo.objects().read_commit(&head.parent.unwrap()).unwrap();
    assert_eq!(parent.author, AccountId::new(OWNER));
    assert_eq!(parent.parent, Some(before));
}

#[test]
fn test_ref_log_message_in_commit() {
    let fx = Fixture::new();
    let change = fx.create_change(1);

    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.set_ref_log_message("abandon via cleanup");
    bu.add_op(change, &abandon);
    bu.execute().unwrap();

    let head = fx.repo.objects().read_commit(&fx.meta(change).unwrap()).unwrap();
    assert_eq!(head.message.lines().next(), Some("abandon via cleanup"));
}

// ============================================================================
// Atomicity
// ============================================================================

#[test]
fn test_failed_commit_advances_nothing() {
    let fx = Fixture::new();
    let first = fx.create_change(1);
    let second = fx.create_change(2);
    let metas = (fx.meta(first), fx.meta(second));
    let emails = fx.outbox.len();
    let index_calls = fx.index.index_calls();

    let target = fx.object("tag target");
    let branch = RefName::branch("release").unwrap();
    let abandon = OpHandle::new(AbandonOp::new(""));
    let tag = OpHandle::new(SetHashtagsOp::new(["release"], Vec::<String>::new()));
    let create_ref = OpHandle::new(CreateRefOp::new(branch.clone(), target));
    let mut bu = fx.batch(OWNER);
    bu.add_op(first, &abandon);
    bu.add_op(second, &tag);
    bu.add_repo_only_op(&create_ref);

    fx.refs.inject(Fault::StorageFailure);
    let err = bu.execute().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    assert_eq!((fx.meta(first), fx.meta(second)), metas);
    assert_eq!(fx.repo.read_ref(&branch).unwrap(), None);
    assert_eq!(fx.outbox.len(), emails);
    assert_eq!(fx.index.index_calls(), index_calls);
    assert_eq!(abandon.state(), OpState::ConflictAborted);
    assert_eq!(create_ref.state(), OpState::ConflictAborted);
    assert!(bu.ref_updates().is_empty());
    assert_eq!(fx.open_handles(), 0);
    assert_eq!(fx.factory.metrics().failed, 1);
}

// ============================================================================
// No-op
// ============================================================================

#[test]
fn test_noop_batch_commits_nothing() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let tag = OpHandle::new(SetHashtagsOp::new(["release"], Vec::<String>::new()));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &tag);
    bu.execute().unwrap();

    let attempts = fx.refs.commit_attempts();
    let emails = fx.outbox.len();
    let index_calls = fx.index.index_calls();
    let meta = fx.meta(change);

    // Same hashtag again: nothing to do
    let again = OpHandle::new(SetHashtagsOp::new(["#Release"], Vec::<String>::new()));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &again);
    bu.execute().unwrap();

    assert_eq!(again.state(), OpState::NoOp);
    assert!(again.result(|op| op.added().is_empty()));
    assert_eq!(fx.refs.commit_attempts(), attempts);
    assert_eq!(fx.outbox.len(), emails);
    assert_eq!(fx.index.index_calls(), index_calls);
    assert_eq!(fx.meta(change), meta);
    assert_eq!(bu.change_results()[&change], ChangeResult::Skipped);
    assert!(bu.ref_updates().is_empty());
    assert_eq!(fx.factory.metrics().no_op, 1);
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_later_op_sees_earlier_delta() {
    let fx = Fixture::new();
    let change = fx.create_change(1);

    let tag = OpHandle::new(SetHashtagsOp::new(["release"], Vec::<String>::new()));
    let observer = OpHandle::new(HashtagObserver::default());
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &tag);
    bu.add_op(change, &observer);
    bu.execute().unwrap();

    assert_eq!(observer.state(), OpState::NoOp);
    assert_eq!(observer.result(|op| op.saw), Some(true));
    assert_eq!(tag.state(), OpState::PostUpdateDone);
}

#[test]
fn test_abandon_then_restore_in_one_batch() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let messages = fx.notes(change).messages.len();

    let abandon = OpHandle::new(AbandonOp::new(""));
    let restore = OpHandle::new(RestoreOp::new("changed my mind"));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &abandon);
    bu.add_op(change, &restore);
    bu.execute().unwrap();

    let notes = fx.notes(change);
    assert_eq!(notes.status, ChangeStatus::New);
    assert_eq!(notes.messages.len(), messages + 2);
}

#[test]
fn test_phase_order_is_configurable() {
    for (order, expected) in [
        (PhaseOrder::ChangeFirst, ["change", "repo"]),
        (PhaseOrder::RepoFirst, ["repo", "change"]),
    ] {
        let fx = Fixture::with_config(UpdateConfig {
            phase_order: order,
            retry: fast_retry(1),
            ..Default::default()
        });
        let change = fx.create_change(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let op = OpHandle::new(PhaseRecorder {
            log: Arc::clone(&log),
        });
        let mut bu = fx.batch(OWNER);
        bu.add_op(change, &op);
        bu.execute().unwrap();
        assert_eq!(*log.lock(), expected.to_vec());
    }
}

// ============================================================================
// Cache Coherence
// ============================================================================

#[test]
fn test_commit_visible_on_next_load() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let cached = fx.notes(change);
    assert_eq!(cached.status, ChangeStatus::New);

    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &abandon);
    bu.execute().unwrap();

    let fresh = fx.notes(change);
    assert_eq!(fresh.status, ChangeStatus::Abandoned);
    assert_eq!(Some(fresh.meta_id()), fx.meta(change));
    assert_ne!(fresh.meta_id(), cached.meta_id());
}

// ============================================================================
// Business Errors
// ============================================================================

#[test]
fn test_business_conflict_aborts_cleanly() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &abandon);
    bu.execute().unwrap();

    let meta = fx.meta(change);
    let before = fx.notes(change);
    let attempts = fx.refs.commit_attempts();

    let again = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &again);
    let err = bu.execute().unwrap_err();

    assert!(matches!(&err, UpdateError::ResourceConflict(msg) if msg.contains("abandoned")));
    assert!(err.is_business());
    assert!(!err.is_retryable_by_caller());
    assert_eq!(again.state(), OpState::ConflictAborted);
    assert_eq!(fx.meta(change), meta);
    assert_eq!(fx.refs.commit_attempts(), attempts);
    assert_eq!(*fx.notes(change), *before);
    assert_eq!(fx.factory.metrics().business_aborted, 1);
    assert_eq!(fx.open_handles(), 0);
}

#[test]
fn test_conflict_in_one_change_aborts_other_changes() {
    let fx = Fixture::new();
    let open = fx.create_change(1);
    let closed = fx.create_change(2);
    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(closed, &abandon);
    bu.execute().unwrap();
    let metas = (fx.meta(open), fx.meta(closed));

    let tag = OpHandle::new(SetHashtagsOp::new(["release"], Vec::<String>::new()));
    let abandon_again = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(open, &tag);
    bu.add_op(closed, &abandon_again);
    assert!(bu.execute().unwrap_err().is_business());
    assert_eq!((fx.meta(open), fx.meta(closed)), metas);
    assert_eq!(tag.state(), OpState::ConflictAborted);
    assert!(fx.notes(open).hashtags.is_empty());
}

#[test]
fn test_insert_existing_change_conflicts() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let op = OpHandle::new(refbatch_engine::InsertChangeOp::new(
        RefName::branch("main").unwrap(),
        "Again",
        fx.object("again"),
    ));
    let mut bu = fx.batch(OWNER);
    bu.insert_change(change, &op);
    assert!(matches!(bu.execute(), Err(UpdateError::ResourceConflict(_))));
}

#[test]
fn test_missing_change_not_found() {
    let fx = Fixture::new();
    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(ChangeId::new(404), &abandon);
    assert!(matches!(bu.execute(), Err(UpdateError::ResourceNotFound(_))));
    assert_eq!(fx.open_handles(), 0);
}

#[test]
fn test_meta_ref_not_writable_from_repo_phase() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let op = OpHandle::new(MetaWriter);
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &op);
    assert!(matches!(bu.execute(), Err(UpdateError::BadRequest(_))));
}

// ============================================================================
// Lifecycle Guards
// ============================================================================

#[test]
#[should_panic(expected = "already registered")]
fn test_reusing_executed_op_panics() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &abandon);
    bu.execute().unwrap();

    let mut second = fx.batch(OWNER);
    second.add_op(change, &abandon);
}

#[test]
#[should_panic(expected = "update already executed")]
fn test_execute_twice_panics() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &abandon);
    bu.execute().unwrap();
    assert!(bu.is_executed());
    let _ = bu.execute();
}

#[test]
#[should_panic(expected = "before a successful execute")]
fn test_result_before_execute_panics() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &abandon);
    abandon.result(|op| op.message().is_some());
}

#[test]
#[should_panic(expected = "before a successful execute")]
fn test_result_after_failure_panics() {
    let fx = Fixture::new();
    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(ChangeId::new(404), &abandon);
    let _ = bu.execute();
    abandon.result(|op| op.message().is_some());
}

// ============================================================================
// Post-commit
// ============================================================================

#[test]
fn test_post_update_failure_is_not_propagated() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let op = OpHandle::new(FailingPostUpdate);
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &op);
    bu.execute().unwrap();

    assert_eq!(fx.notes(change).subject, "Renamed");
    assert_eq!(op.state(), OpState::PostUpdateDone);
    assert_eq!(fx.factory.metrics().post_update_failures, 1);
}

#[test]
fn test_index_failure_is_not_propagated() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    fx.index.set_failing(true);

    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &abandon);
    bu.execute().unwrap();

    assert_eq!(fx.notes(change).status, ChangeStatus::Abandoned);
    assert_eq!(fx.factory.metrics().index_failures, 1);
}

#[test]
fn test_listener_hooks_in_order() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let listener = Arc::new(RecordingListener::default());

    let abandon = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(OWNER);
    bu.add_listener(listener.clone());
    bu.add_op(change, &abandon);
    bu.execute().unwrap();

    assert_eq!(
        *listener.events.lock(),
        vec!["repos".to_string(), "refs:1".to_string(), "changes:1".to_string()]
    );
}

#[test]
fn test_notify_settings() {
    let fx = Fixture::new();
    let change = fx.create_change(1);

    let silent = OpHandle::new(AbandonOp::new(""));
    let mut bu = fx.batch(REVIEWER);
    bu.set_notify_handling(change, NotifyHandling::None);
    bu.add_op(change, &silent);
    bu.execute().unwrap();
    assert!(fx.outbox.sent().iter().all(|e| e.category != "abandon"));

    let restore = OpHandle::new(RestoreOp::new(""));
    let mut bu = fx.batch(REVIEWER);
    bu.set_notify(NotifyResolver::resolve(NotifyHandling::None, [AccountId::new(42)]));
    bu.add_op(change, &restore);
    bu.execute().unwrap();
    let email = fx
        .outbox
        .sent()
        .into_iter()
        .find(|e| e.category == "restore")
        .unwrap();
    assert_eq!(email.recipients.into_iter().collect::<Vec<_>>(), vec![AccountId::new(42)]);
}

// ============================================================================
// Deletion and Raw Refs
// ============================================================================

#[test]
fn test_delete_change_removes_all_refs() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let inserter = OpHandle::new(PatchSetInserter::new(fx.object("ps2")));
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &inserter);
    bu.execute().unwrap();
    assert_eq!(
        fx.repo
            .refs()
            .refs_by_prefix(&RefName::change_prefix(change))
            .unwrap()
            .len(),
        3
    );

    let delete = OpHandle::new(DeleteChangeOp::new());
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &delete);
    bu.execute().unwrap();

    assert!(delete.result(|op| op.deleted()));
    assert!(fx
        .repo
        .refs()
        .refs_by_prefix(&RefName::change_prefix(change))
        .unwrap()
        .is_empty());
    assert_eq!(bu.change_results()[&change], ChangeResult::Deleted);
    assert!(fx.factory.load_notes(&fx.project, change).unwrap().is_none());
    assert_eq!(fx.index.indexed(&fx.project, change), None);
    assert_eq!(fx.index.delete_calls(), 1);
}

#[test]
fn test_repo_only_op_creates_ref() {
    let fx = Fixture::new();
    let target = fx.object("release head");
    let branch = RefName::branch("stable").unwrap();

    let create = OpHandle::new(CreateRefOp::new(branch.clone(), target));
    let mut bu = fx.batch(OWNER);
    bu.add_repo_only_op(&create);
    bu.execute().unwrap();

    assert_eq!(create.state(), OpState::PostUpdateDone);
    assert_eq!(fx.repo.read_ref(&branch).unwrap(), Some(target));
    assert!(bu.change_results().is_empty());
    assert_eq!(bu.ref_updates(), &[RefUpdate::create(branch.clone(), target)]);

    let again = OpHandle::new(CreateRefOp::new(branch, target));
    let mut bu = fx.batch(OWNER);
    bu.add_repo_only_op(&again);
    assert!(matches!(bu.execute(), Err(UpdateError::ResourceConflict(_))));
}

#[test]
fn test_same_ref_staged_twice_is_bad_request() {
    let fx = Fixture::new();
    let branch = RefName::branch("stable").unwrap();

    let first = OpHandle::new(CreateRefOp::new(branch.clone(), fx.object("first")));
    let second = OpHandle::new(CreateRefOp::new(branch.clone(), fx.object("second")));
    let mut bu = fx.batch(OWNER);
    bu.add_repo_only_op(&first);
    bu.add_repo_only_op(&second);
    let err = bu.execute().unwrap_err();

    assert!(matches!(err, UpdateError::BadRequest(_)));
    assert_eq!(err.kind(), ErrorKind::Business);
    assert_eq!(fx.repo.read_ref(&branch).unwrap(), None);
    // Rejected before any commit was attempted
    assert_eq!(fx.refs.commit_attempts(), 0);
}
