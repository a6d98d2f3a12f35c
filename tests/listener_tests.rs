/// Listener and async wait tests
///
/// Completion notifications on the worker thread and through a main loop,
/// plus awaiting operations from a tokio runtime
/// Run with: cargo test --test listener_tests

mod common;

use common::{eager_config, fixture, manual_session, Note};
use futures::future::join_all;
use rustmemodao::executor::MainTask;
use rustmemodao::{
    AsyncOperation, ChannelMainContext, DaoError, MainContext, OperationFlags, Result,
    TokioBlockingSpawner,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_worker_listener_runs_before_aggregate_completion() -> anyhow::Result<()> {
    let fixture = fixture();
    let session = fixture.dao_session.start_async_session()?;

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    session.set_listener(Some(Arc::new(move |op: &Arc<AsyncOperation>| {
        assert!(op.is_completed());
        counter.fetch_add(1, Ordering::SeqCst);
    })));

    for i in 0..20 {
        session.insert(Note::new(&format!("n{}", i)))?;
    }
    session.insert(Note::invalid())?;
    session.wait_for_completion()?;

    assert_eq!(notified.load(Ordering::SeqCst), 21);
    Ok(())
}

#[test]
fn test_listener_sees_merged_operations_in_order() -> anyhow::Result<()> {
    let fixture = fixture();
    let (session, spawner) = manual_session(&fixture);
    let session = session.with_flags(OperationFlags::MERGE_TX);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    session.set_listener(Some(Arc::new(move |op: &Arc<AsyncOperation>| {
        log.lock()
            .unwrap()
            .push((op.sequence_number(), op.merged_operations_count()));
    })));

    for i in 0..3 {
        session.insert(Note::new(&format!("n{}", i)))?;
    }
    spawner.run_all()?;

    assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    Ok(())
}

#[test]
fn test_main_thread_listener_runs_on_main_loop() -> anyhow::Result<()> {
    let fixture = fixture();
    let (context, mut main_loop) = ChannelMainContext::new();
    let session = fixture
        .dao_session
        .async_session_builder()
        .config(eager_config())
        .main_context(Arc::new(context))
        .build()?;

    let main_thread = thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    session.set_listener_main_thread(Some(Arc::new(move |op: &Arc<AsyncOperation>| {
        assert_eq!(thread::current().id(), main_thread);
        log.lock().unwrap().push((op.sequence_number(), op.is_failed()));
    })))?;

    session.insert(Note::new("ok"))?;
    session.update(Note::with_id(100, "missing"))?;
    session.wait_for_completion()?;

    // Every notification was posted before the aggregate wait returned
    assert_eq!(main_loop.run_pending(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![(1, false), (2, true)]);
    Ok(())
}

#[test]
fn test_main_thread_listener_requires_context() {
    let fixture = fixture();
    let (session, _spawner) = manual_session(&fixture);
    let result = session.set_listener_main_thread(Some(Arc::new(|_: &Arc<AsyncOperation>| {})));
    assert!(matches!(result, Err(DaoError::ProtocolMisuse(_))));
    assert!(session.listener_main_thread().is_none());
}

/// Panics on its first post, then runs tasks inline
struct FlakyContext {
    posts: AtomicUsize,
}

impl MainContext for FlakyContext {
    fn post(&self, task: MainTask) -> Result<()> {
        if self.posts.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("main context unavailable");
        }
        task();
        Ok(())
    }
}

#[test]
fn test_panicking_main_context_still_counts_completion() -> anyhow::Result<()> {
    let fixture = fixture();
    let context = Arc::new(FlakyContext {
        posts: AtomicUsize::new(0),
    });
    let session = fixture
        .dao_session
        .async_session_builder()
        .config(eager_config())
        .main_context(context.clone())
        .build()?;

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    session.set_listener_main_thread(Some(Arc::new(move |_: &Arc<AsyncOperation>| {
        counter.fetch_add(1, Ordering::SeqCst);
    })))?;

    let first = session.insert(Note::new("first"))?;
    let second = session.insert(Note::new("second"))?;

    assert!(session.wait_for_completion_timeout(Duration::from_secs(5))?);
    assert!(session.is_completed());
    assert_eq!(session.enqueued_count(), 2);
    assert_eq!(session.completed_count(), 2);
    assert_eq!(first.wait()?, Some(1));
    assert_eq!(second.wait()?, Some(2));

    // Only the second notification made it through
    assert_eq!(context.posts.load(Ordering::SeqCst), 2);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    // The executor keeps working afterwards
    session.insert(Note::new("third"))?;
    session.wait_for_completion()?;
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_await_operations_on_tokio_runtime() -> anyhow::Result<()> {
    let fixture = fixture();
    let session = fixture
        .dao_session
        .async_session_builder()
        .config(eager_config())
        .spawner(Arc::new(TokioBlockingSpawner::current()?))
        .build()?;

    let handles = (0..5)
        .map(|i| session.insert(Note::new(&format!("async {}", i))))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let keys = join_all(handles.iter().map(|handle| handle.wait_async())).await;
    let keys = keys.into_iter().collect::<std::result::Result<Vec<_>, _>>()?;
    assert_eq!(keys, (1..=5).map(Some).collect::<Vec<_>>());

    let count = session.count::<Note>()?;
    assert_eq!(count.wait_async().await?, Some(5));

    let failed = session.insert(Note::invalid())?;
    let err = failed.wait_async().await.unwrap_err();
    assert!(matches!(err.cause(), DaoError::ConstraintViolation(_)));
    Ok(())
}

#[tokio::test]
async fn test_main_loop_run_next_delivers_notifications() -> anyhow::Result<()> {
    let fixture = fixture();
    let (context, mut main_loop) = ChannelMainContext::new();
    let (session, spawner) = {
        let spawner = Arc::new(rustmemodao::ManualSpawner::new());
        let session = fixture
            .dao_session
            .async_session_builder()
            .config(eager_config())
            .spawner(spawner.clone())
            .main_context(Arc::new(context))
            .build()?;
        (session, spawner)
    };

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    session.set_listener_main_thread(Some(Arc::new(move |_: &Arc<AsyncOperation>| {
        counter.fetch_add(1, Ordering::SeqCst);
    })))?;

    session.count::<Note>()?;
    spawner.run_all()?;

    assert!(main_loop.run_next().await);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}
