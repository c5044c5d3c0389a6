//! Concurrent batch updates
//!
//! 1. **Retry convergence** - a batch that loses a ref race re-reads the
//!    snapshot and commits on a later attempt; neither side's change is lost
//! 2. **Contention exhausted** - the retry ceiling surfaces a distinct,
//!    caller-retryable error and advances nothing
//! 3. **Racing inserts** - exactly one creator of a change wins
//! 4. **Many writers** - concurrent batches on one change never lose updates
//! 5. **Delete vs. new ref** - a ref created under a change's prefix while the
//!    change is being deleted is deleted too

mod common;

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use common::{fast_retry, Fixture, OWNER};
use refbatch_core::{AccountId, ChangeId, RefName, Timestamp, UpdateError};
use refbatch_engine::{
    DeleteChangeOp, InsertChangeOp, OpHandle, OpState, SetHashtagsOp, UpdateConfig,
};
use refbatch_storage::testing::Fault;
use refbatch_storage::RefUpdate;

fn add_tag(tag: &str) -> OpHandle<SetHashtagsOp> {
    OpHandle::new(SetHashtagsOp::new([tag.to_string()], Vec::<String>::new()))
}

// ============================================================================
// Retry Convergence
// ============================================================================

#[test]
fn test_lost_race_retries_with_fresh_snapshot() {
    let fx = Fixture::new();
    let change = fx.create_change(1);

    // A competing writer commits between our snapshot and our commit
    let factory = fx.factory.clone();
    let project = fx.project.clone();
    fx.refs.inject(Fault::before_commit(move || {
        let rival = add_tag("rival");
        let mut bu = factory
            .create(&project, AccountId::new(9), Timestamp::from_secs(999))
            .unwrap();
        bu.add_op(change, &rival);
        bu.execute().unwrap();
    }));

    let mine = add_tag("mine");
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &mine);
    bu.execute().unwrap();

    assert_eq!(mine.state(), OpState::PostUpdateDone);
    let hashtags = fx.notes(change).hashtags.clone();
    assert_eq!(
        hashtags,
        BTreeSet::from(["mine".to_string(), "rival".to_string()])
    );
    // The retry observed the rival's tag in its snapshot
    assert_eq!(
        mine.result(|op| op.updated_hashtags().clone()),
        hashtags
    );

    let metrics = fx.factory.metrics();
    assert_eq!(metrics.lock_failures, 1);
    assert_eq!(metrics.committed, 3);
    assert_eq!(fx.open_handles(), 0);
}

#[test]
fn test_injected_lock_failure_is_retried() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    fx.refs.inject(Fault::LockFailure);
    fx.refs.inject(Fault::LockFailure);

    let tag = add_tag("retried");
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &tag);
    bu.execute().unwrap();

    assert!(fx.notes(change).hashtags.contains("retried"));
    assert_eq!(fx.refs.pending_faults(), 0);
    assert_eq!(fx.factory.metrics().lock_failures, 2);
}

#[test]
fn test_delete_clears_ref_created_mid_attempt() {
    let fx = Fixture::new();
    let change = fx.create_change(1);
    let prefix = RefName::change_prefix(change);
    let late = RefName::parse(&format!("{}2", prefix)).unwrap();

    let repo = Arc::clone(&fx.repo);
    let hook_ref = late.clone();
    let late_commit = fx.object("late ps2");
    fx.refs.inject(Fault::before_commit(move || {
        repo.commit(&[RefUpdate::create(hook_ref, late_commit)]).unwrap();
    }));

    let delete = OpHandle::new(DeleteChangeOp::new());
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &delete);
    bu.execute().unwrap();

    assert!(delete.result(|op| op.deleted()));
    assert_eq!(fx.repo.read_ref(&late).unwrap(), None);
    assert!(fx.repo.refs().refs_by_prefix(&prefix).unwrap().is_empty());
    assert_eq!(fx.factory.metrics().lock_failures, 1);
}

// ============================================================================
// Contention Exhausted
// ============================================================================

#[test]
fn test_contention_exhausted_after_ceiling() {
    let fx = Fixture::with_config(UpdateConfig {
        retry: fast_retry(3),
        ..Default::default()
    });
    let change = fx.create_change(1);
    let meta = fx.meta(change);
    let emails = fx.outbox.len();
    let attempts_before = fx.refs.commit_attempts();

    fx.refs.set_always_lock_failure(true);
    let tag = add_tag("never");
    let mut bu = fx.batch(OWNER);
    bu.add_op(change, &tag);
    let err = bu.execute().unwrap_err();
    fx.refs.set_always_lock_failure(false);

    match &err {
        UpdateError::ContentionExhausted { attempts, refs } => {
            assert_eq!(*attempts, 3);
            assert!(refs.contains(&RefName::change_meta(change)));
        }
        other => panic!("expected contention exhausted, got {:?}", other),
    }
    assert!(err.is_contention());
    assert!(!err.is_business());
    assert!(err.is_retryable_by_caller());

    assert_eq!(fx.refs.commit_attempts() - attempts_before, 3);
    assert_eq!(fx.meta(change), meta);
    assert_eq!(fx.outbox.len(), emails);
    assert_eq!(tag.state(), OpState::ConflictAborted);
    assert_eq!(fx.open_handles(), 0);

    let metrics = fx.factory.metrics();
    assert_eq!(metrics.contention_exhausted, 1);
    assert_eq!(metrics.lock_failures, 3);
}

// ============================================================================
// Racing Writers
// ============================================================================

#[test]
fn test_racing_inserts_have_one_winner() {
    const THREADS: usize = 4;

    let fx = Arc::new(Fixture::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let fx = Arc::clone(&fx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let commit = fx.object(&format!("candidate {}", i));
                let op = OpHandle::new(InsertChangeOp::new(
                    RefName::branch("main").unwrap(),
                    format!("Candidate {}", i),
                    commit,
                ));
                let mut bu = fx.batch(10 + i as u32);
                bu.insert_change(ChangeId::new(5), &op);
                barrier.wait();
                bu.execute()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "{:?}", results);
    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(result, UpdateError::ResourceConflict(_)),
            "{:?}",
            result
        );
    }

    let notes = fx.notes(ChangeId::new(5));
    assert!(notes.subject.starts_with("Candidate"));
    assert_eq!(notes.patch_sets.len(), 1);
    assert_eq!(fx.open_handles(), 0);
}

#[test]
fn test_concurrent_writers_never_lose_updates() {
    const THREADS: usize = 8;

    let fx = Arc::new(Fixture::with_config(UpdateConfig {
        retry: fast_retry(50),
        ..Default::default()
    }));
    let change = fx.create_change(1);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let fx = Arc::clone(&fx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let tag = format!("t{}", i);
                let op = add_tag(&tag);
                let mut bu = fx.batch(OWNER);
                bu.add_op(change, &op);
                barrier.wait();
                bu.execute().map(|_| tag)
            })
        })
        .collect();

    let mut committed = BTreeSet::new();
    for handle in handles {
        match handle.join().unwrap() {
            Ok(tag) => {
                committed.insert(tag);
            }
            Err(e) => assert!(e.is_contention(), "unexpected error {:?}", e),
        }
    }

    // Exactly the committed tags are present: none lost, none invented
    assert_eq!(fx.notes(change).hashtags, committed);
    assert!(!committed.is_empty());
    assert_eq!(fx.open_handles(), 0);

    let metrics = fx.factory.metrics();
    assert_eq!(
        metrics.committed + metrics.contention_exhausted,
        THREADS as u64 + 1
    );
}
