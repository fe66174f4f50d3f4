//! Integration tests for the savepoint (first in, last out) MySQL engine.

use std::time::Duration;

use innodb_lock_core::{LockEngine, LockEngineExt, LockErrorKind};
use innodb_lock_mysql::{MySqlFiloLockEngine, MySqlLockEngine};

mod common;
use common::mock_backend::MockBackend;

fn strict(backend: &MockBackend) -> MySqlFiloLockEngine<MockBackend> {
    MySqlFiloLockEngine::new(backend.clone()).unwrap()
}

fn relaxed(backend: &MockBackend) -> MySqlFiloLockEngine<MockBackend> {
    strict(backend).with_strict_order(false)
}

#[tokio::test]
async fn test_heap_table_size_is_mandatory() {
    let backend = MockBackend::new();
    let err = MySqlFiloLockEngine::new(backend).err().unwrap();
    assert_eq!(err.kind(), LockErrorKind::Config);
    assert!(err.to_string().contains("maxHeapTableSize"));
}

#[tokio::test]
async fn test_heap_table_size_is_applied_once() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);
    assert!(engine.is_strict());

    engine.acquire_blocking("a").await.unwrap();
    engine.acquire_blocking("b").await.unwrap();
    assert_eq!(backend.applied_heap_table_sizes(), vec![64 * 1024 * 1024]);

    engine.release_all().await.unwrap();
}

#[tokio::test]
async fn test_engine_runs_on_spawned_tasks() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    let task = tokio::spawn(async move {
        engine.acquire_blocking("A").await.unwrap();
        engine
    });
    let mut engine = task.await.unwrap();

    assert!(engine.is_held("A"));
    assert_eq!(backend.opened_lock_sessions(), 1);
    engine.release("A").await.unwrap();
}

#[tokio::test]
async fn test_reacquire_without_release_is_rejected() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    engine.acquire_blocking("report").await.unwrap();

    let err = engine.acquire_blocking("report").await.unwrap_err();
    assert_eq!(err.kind(), LockErrorKind::NonBlockingLock);

    let err = engine
        .acquire_non_blocking("report", 0, Duration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), LockErrorKind::Deadlock);

    assert_eq!(engine.held_locks(), vec!["report"]);
    engine.release("report").await.unwrap();
}

#[tokio::test]
async fn test_all_locks_share_one_session() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    engine.acquire_blocking("a").await.unwrap();
    engine.acquire_blocking("b").await.unwrap();

    let id = engine.connection_id().unwrap();
    assert_eq!(backend.row_owner("a"), Some(id));
    assert_eq!(backend.row_owner("b"), Some(id));

    engine.release("b").await.unwrap();
    engine.release("a").await.unwrap();

    // The session is reset, not closed, once the stack is empty.
    engine.acquire_blocking("c").await.unwrap();
    assert_eq!(engine.connection_id(), Some(id));
    assert_eq!(backend.opened_lock_sessions(), 1);
    engine.release("c").await.unwrap();
}

#[tokio::test]
async fn test_strict_order_violation() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    engine.acquire_blocking("A").await.unwrap();
    engine.acquire_blocking("B").await.unwrap();

    let err = engine.release("A").await.unwrap_err();
    assert_eq!(err.kind(), LockErrorKind::IntegrityFailed);
    assert!(err.to_string().contains("First in (acquire), last out (release)"));

    // Nothing was released.
    assert_eq!(engine.held_locks(), vec!["A", "B"]);
    assert!(backend.row_owner("A").is_some());
    assert!(backend.row_owner("B").is_some());
    assert!(backend.metadata("A").is_some());
    assert!(backend.metadata("B").is_some());

    engine.release("B").await.unwrap();
    engine.release("A").await.unwrap();
    assert_eq!(backend.metadata_len(), 0);
}

#[tokio::test]
async fn test_releasing_the_top_keeps_the_rest() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    engine.acquire_blocking("A").await.unwrap();
    engine.acquire_blocking("B").await.unwrap();
    engine.release("B").await.unwrap();

    assert_eq!(engine.held_locks(), vec!["A"]);
    assert_eq!(backend.row_owner("A"), engine.connection_id());
    assert_eq!(backend.row_owner("B"), None);
    assert!(backend.metadata("A").is_some());
    assert!(backend.metadata("B").is_none());

    engine.release("A").await.unwrap();
    assert_eq!(backend.row_owner("A"), None);
}

#[tokio::test]
async fn test_relaxed_release_cascades() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = relaxed(&backend);

    for name in ["A", "B", "C"] {
        engine.acquire_blocking(name).await.unwrap();
    }

    engine.release("A").await.unwrap();
    assert!(engine.held_locks().is_empty());
    for name in ["A", "B", "C"] {
        assert_eq!(backend.row_owner(name), None);
    }
    assert_eq!(backend.metadata_len(), 0);

    // Another holder gets the cascaded locks right away.
    let mut other = MySqlLockEngine::new(backend.clone());
    other
        .acquire_non_blocking("B", 0, Duration::ZERO)
        .await
        .unwrap();
    other
        .acquire_non_blocking("C", 0, Duration::ZERO)
        .await
        .unwrap();
    other.release_all().await.unwrap();
}

#[tokio::test]
async fn test_relaxed_release_from_the_middle() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = relaxed(&backend);

    for name in ["A", "B", "C"] {
        engine.acquire_blocking(name).await.unwrap();
    }

    engine.release("B").await.unwrap();
    assert_eq!(engine.held_locks(), vec!["A"]);
    assert_eq!(backend.row_owner("A"), engine.connection_id());
    assert_eq!(backend.row_owner("B"), None);
    assert_eq!(backend.row_owner("C"), None);

    engine.acquire_blocking("C").await.unwrap();
    assert_eq!(engine.held_locks(), vec!["A", "C"]);
    engine.release_all().await.unwrap();
}

#[tokio::test]
async fn test_out_of_order_sequences_in_relaxed_mode() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = relaxed(&backend);

    engine.acquire_blocking("Monday").await.unwrap();
    engine.acquire_blocking("Friday").await.unwrap();
    engine.release("Monday").await.unwrap();
    engine.acquire_blocking("Friday").await.unwrap();
    engine.release("Friday").await.unwrap();

    engine.acquire_blocking("Monday").await.unwrap();
    engine.acquire_blocking("Friday").await.unwrap();
    engine.release("Friday").await.unwrap();
    engine.acquire_blocking("Sunday").await.unwrap();
    engine.release("Monday").await.unwrap();

    assert!(engine.held_locks().is_empty());
    assert_eq!(backend.metadata_len(), 0);
}

#[tokio::test]
async fn test_release_of_unknown_lock_fails() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    let err = engine.release("never-acquired").await.unwrap_err();
    assert_eq!(err.kind(), LockErrorKind::NotHeld);
}

#[tokio::test]
async fn test_contention_rolls_back_only_the_attempt() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);
    let mut other = MySqlLockEngine::new(backend.clone());

    other.acquire_blocking("X").await.unwrap();
    engine.acquire_blocking("mine").await.unwrap();

    let err = engine
        .acquire_non_blocking("X", 1, Duration::from_millis(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), LockErrorKind::NonBlockingLock);
    assert_eq!(engine.held_locks(), vec!["mine"]);
    assert_eq!(backend.row_owner("mine"), engine.connection_id());
    assert_eq!(backend.row_owner("X"), other.connection_id("X"));

    other.release("X").await.unwrap();
    engine.acquire_blocking("X").await.unwrap();
    assert_eq!(engine.held_locks(), vec!["mine", "X"]);
    engine.release_all().await.unwrap();
}

#[tokio::test]
async fn test_deadlock_drops_the_whole_stack() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    engine.acquire_blocking("A").await.unwrap();
    backend.inject_deadlock("B");

    let err = engine.acquire_blocking("B").await.unwrap_err();
    assert_eq!(err.kind(), LockErrorKind::Deadlock);
    assert!(err.to_string().contains("\"A\""));

    assert!(engine.held_locks().is_empty());
    assert_eq!(backend.row_owner("A"), None);
    assert_eq!(backend.metadata_len(), 0);

    // The session is usable again.
    engine.acquire_blocking("A").await.unwrap();
    engine.acquire_blocking("B").await.unwrap();
    engine.release("B").await.unwrap();
    engine.release("A").await.unwrap();
}

#[tokio::test]
async fn test_wait_timeout_keeps_earlier_locks() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    engine.acquire_blocking("A").await.unwrap();
    backend.inject_error("B", 1205);

    let err = engine.acquire_blocking("B").await.unwrap_err();
    assert_eq!(err.kind(), LockErrorKind::WaitTimeout);
    assert_eq!(engine.held_locks(), vec!["A"]);
    assert_eq!(backend.row_owner("A"), engine.connection_id());
    assert_eq!(backend.row_owner("B"), None);

    engine.release("A").await.unwrap();
}

#[tokio::test]
async fn test_unclassified_server_error_is_a_backend_error() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    engine.acquire_blocking("A").await.unwrap();
    backend.inject_error("B", 2013);

    let err = engine.acquire_blocking("B").await.unwrap_err();
    assert_eq!(err.kind(), LockErrorKind::Backend);
    assert_eq!(engine.held_locks(), vec!["A"]);
    assert!(backend.metadata("B").is_none());

    engine.release("A").await.unwrap();
}

#[tokio::test]
async fn test_lost_session_is_reported() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    let err = engine.assert_connected("job").await.unwrap_err();
    assert_eq!(err.kind(), LockErrorKind::NotHeld);

    engine.acquire_blocking("job").await.unwrap();
    engine.assert_connected("job").await.unwrap();

    backend.kill(engine.connection_id().unwrap());
    let err = engine.assert_connected("job").await.unwrap_err();
    assert_eq!(err.kind(), LockErrorKind::IntegrityFailed);
}

#[tokio::test]
async fn test_disconnect_clears_the_stack() {
    let backend = MockBackend::with_heap_table_size();
    let mut engine = strict(&backend);

    engine.acquire_blocking("A").await.unwrap();
    engine.acquire_blocking("B").await.unwrap();

    engine.disconnect().await.unwrap();
    assert!(engine.held_locks().is_empty());
    assert_eq!(engine.connection_id(), None);
    assert_eq!(backend.row_owner("A"), None);
    assert_eq!(backend.row_owner("B"), None);
    assert_eq!(backend.metadata_len(), 0);

    engine.acquire_blocking("A").await.unwrap();
    assert_eq!(backend.opened_lock_sessions(), 2);
    engine.release("A").await.unwrap();
}
