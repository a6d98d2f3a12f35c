/// Transaction merging tests
///
/// Adjacent MERGE_TX operations share one transaction; a failed merged
/// transaction is rolled back and every member retried alone.
/// Run with: cargo test --test merge_tests

mod common;

use common::{eager_config, fixture, manual_session, Fixture, Note};
use rustmemodao::{
    AsyncSession, Dao, DaoError, MemoryDao, MemoryStore, OperationFlags, StoreStats,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Merging session on a real worker thread that waits `window` for a partner
fn windowed_session(fixture: &Fixture, window: Duration) -> anyhow::Result<AsyncSession> {
    let session = fixture
        .dao_session
        .async_session_builder()
        .config(eager_config().wait_for_merge(window))
        .build()?;
    Ok(session.with_flags(OperationFlags::MERGE_TX))
}

#[test]
fn test_mergeable_inserts_share_one_commit() -> anyhow::Result<()> {
    let fixture = fixture();
    let (session, spawner) = manual_session(&fixture);
    let session = session.with_flags(OperationFlags::MERGE_TX);

    let first = session.insert(Note::new("e1"))?;
    let second = session.insert(Note::new("e2"))?;
    spawner.run_all()?;

    assert_eq!(first.wait()?, Some(1));
    assert_eq!(second.wait()?, Some(2));
    assert_eq!(first.merged_operations_count(), 2);
    assert_eq!(second.merged_operations_count(), 2);
    assert_eq!(
        fixture.store.stats()?,
        StoreStats {
            commits: 1,
            rollbacks: 0,
            autocommits: 0
        }
    );
    Ok(())
}

#[test]
fn test_failed_member_reverts_batch_and_retries_individually() -> anyhow::Result<()> {
    let fixture = fixture();
    let (session, spawner) = manual_session(&fixture);
    let session = session.with_flags(OperationFlags::MERGE_TX);

    let valid = session.insert(Note::new("e1"))?;
    let invalid = session.insert(Note::invalid())?;
    spawner.run_all()?;

    // The batch rolled back, then e1 was written again on its own
    let stats = fixture.store.stats()?;
    assert_eq!(stats.rollbacks, 1);
    assert_eq!(stats.commits, 0);
    assert_eq!(stats.autocommits, 1);

    assert!(valid.is_completed_successfully());
    assert_eq!(valid.merged_operations_count(), 0);
    let texts: Vec<String> = fixture
        .notes
        .load_all()?
        .into_iter()
        .filter_map(|note| note.text)
        .collect();
    assert_eq!(texts, vec!["e1".to_string()]);

    let err = invalid.wait().unwrap_err();
    assert!(matches!(err.cause(), DaoError::ConstraintViolation(_)));
    assert_eq!(invalid.merged_operations_count(), 0);
    Ok(())
}

#[test]
fn test_commit_failure_falls_back_to_individual_execution() -> anyhow::Result<()> {
    let fixture = fixture();
    let (session, spawner) = manual_session(&fixture);
    let session = session.with_flags(OperationFlags::MERGE_TX);
    fixture.store.inject_commit_failure()?;

    let ops = vec![
        session.insert(Note::new("a"))?,
        session.insert(Note::new("b"))?,
    ];
    spawner.run_all()?;

    for op in &ops {
        assert!(op.is_completed_successfully());
        assert_eq!(op.merged_operations_count(), 0);
    }
    assert_eq!(fixture.store.row_count("notes")?, 2);
    assert_eq!(fixture.store.stats()?.rollbacks, 1);
    Ok(())
}

#[test]
fn test_batch_grows_up_to_configured_maximum() -> anyhow::Result<()> {
    let fixture = fixture();
    let (session, spawner) = manual_session(&fixture);
    session.set_max_operation_count_to_merge(3)?;
    let session = session.with_flags(OperationFlags::MERGE_TX);

    let ops = (0..5)
        .map(|i| session.insert(Note::new(&format!("n{}", i))))
        .collect::<Result<Vec<_>, _>>()?;
    spawner.run_all()?;

    let merged: Vec<usize> = ops.iter().map(|op| op.merged_operations_count()).collect();
    assert_eq!(merged, vec![3, 3, 3, 2, 2]);
    assert_eq!(fixture.store.stats()?.commits, 2);
    Ok(())
}

#[test]
fn test_non_mergeable_neighbours_run_alone() -> anyhow::Result<()> {
    let fixture = fixture();
    let (session, spawner) = manual_session(&fixture);
    let merging = session.with_flags(OperationFlags::MERGE_TX);

    let first = merging.insert(Note::new("merge"))?;
    let second = session.insert(Note::new("plain"))?;
    spawner.run_all()?;

    assert_eq!(first.merged_operations_count(), 0);
    assert_eq!(second.merged_operations_count(), 0);
    assert!(first.time_started() <= second.time_started());
    assert_eq!(fixture.store.stats()?.autocommits, 2);
    Ok(())
}

#[test]
fn test_operations_on_different_stores_do_not_merge() -> anyhow::Result<()> {
    let fixture = fixture();
    let other = MemoryStore::shared("other");
    let other_notes = MemoryDao::<Note>::new(Arc::clone(&other))?;
    let (session, spawner) = manual_session(&fixture);
    let session = session.with_flags(OperationFlags::MERGE_TX);

    let elsewhere = session.query_list(other_notes.query_builder().build())?;
    let here = session.insert(Note::new("x"))?;
    spawner.run_all()?;

    assert_eq!(elsewhere.wait()?, Some(Vec::new()));
    assert_eq!(elsewhere.merged_operations_count(), 0);
    assert_eq!(here.merged_operations_count(), 0);
    assert_eq!(fixture.store.stats()?.commits, 0);
    Ok(())
}

#[test]
fn test_runnables_nest_inside_merged_transaction() -> anyhow::Result<()> {
    let fixture = fixture();
    let (session, spawner) = manual_session(&fixture);
    let session = session.with_flags(OperationFlags::MERGE_TX);

    let store = fixture.store.clone();
    let runnable = session.run_in_tx(move || {
        store.insert_row("notes", None, vec!["from tx".into(), 1i64.into()])?;
        Ok(())
    })?;
    let insert = session.insert(Note::new("after"))?;
    spawner.run_all()?;

    assert!(runnable.is_completed_successfully());
    assert_eq!(runnable.merged_operations_count(), 2);
    assert_eq!(insert.merged_operations_count(), 2);
    assert_eq!(fixture.store.stats()?.commits, 1);
    assert_eq!(fixture.store.row_count("notes")?, 2);
    Ok(())
}

#[test]
fn test_invalid_merge_limit_is_rejected() {
    let fixture = fixture();
    let (session, _spawner) = manual_session(&fixture);
    assert!(matches!(
        session.set_max_operation_count_to_merge(1),
        Err(DaoError::ProtocolMisuse(_))
    ));
    assert_eq!(session.max_operation_count_to_merge(), 50);
}

#[test]
fn test_operation_arriving_within_merge_window_is_merged() -> anyhow::Result<()> {
    let fixture = fixture();
    let session = windowed_session(&fixture, Duration::from_millis(200))?;

    let first = session.insert(Note::new("e1"))?;
    thread::sleep(Duration::from_millis(40));
    let second = session.insert(Note::new("e2"))?;

    assert_eq!(first.wait()?, Some(1));
    assert_eq!(second.wait()?, Some(2));
    session.wait_for_completion()?;

    assert_eq!(first.merged_operations_count(), 2);
    assert_eq!(second.merged_operations_count(), 2);
    let stats = fixture.store.stats()?;
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.autocommits, 0);
    assert_eq!(fixture.store.row_count("notes")?, 2);
    Ok(())
}

#[test]
fn test_invalid_operation_within_merge_window_is_retried_alone() -> anyhow::Result<()> {
    let fixture = fixture();
    let session = windowed_session(&fixture, Duration::from_millis(200))?;

    let valid = session.insert(Note::new("e1"))?;
    thread::sleep(Duration::from_millis(40));
    let invalid = session.insert(Note::invalid())?;
    session.wait_for_completion()?;

    assert!(valid.is_completed_successfully());
    assert_eq!(valid.merged_operations_count(), 0);
    let err = invalid.wait().unwrap_err();
    assert!(matches!(err.cause(), DaoError::ConstraintViolation(_)));
    assert_eq!(invalid.merged_operations_count(), 0);

    let stats = fixture.store.stats()?;
    assert_eq!(stats.commits, 0);
    assert_eq!(stats.rollbacks, 1);
    assert_eq!(stats.autocommits, 1);
    assert_eq!(fixture.store.row_count("notes")?, 1);
    Ok(())
}
