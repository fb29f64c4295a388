//! Tests for the compilation thread and one-shot pool dispatch

use super::helpers::*;
use crate::{
    compile::{queue_compile_operation, CompilationThread, CompileOutcome, ThreadPool},
    config::CompilationThreadConfig,
    depval::dep_val_sys,
    error::AssetError,
    exceptions::{ConstructionError, ConstructionReason, InvalidAsset, PendingAsset},
    marker::{
        as_blob, blob_as_string, ArtifactFuture, AssetState, AsyncMarker, EXCEPTION_ARTIFACT,
    },
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use test_log::test;

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn test_pending_operation_is_retried_until_ready() {
    init_logging();
    let worker = CompilationThread::new().unwrap();
    let future = Arc::new(ArtifactFuture::with_initializer("shader.hlsl"));
    let attempts = Arc::new(AtomicUsize::new(0));
    const PENDING_ROUNDS: usize = 3;

    let counter = attempts.clone();
    worker.push(&future, move |future| {
        if counter.fetch_add(1, Ordering::SeqCst) < PENDING_ROUNDS {
            return CompileOutcome::Pending(PendingAsset::new("include.hlsl"));
        }
        future.set_state(AssetState::Ready);
        CompileOutcome::Completed
    });

    assert_eq!(future.stall_while_pending(WAIT), Some(AssetState::Ready));
    assert_eq!(attempts.load(Ordering::SeqCst), PENDING_ROUNDS + 1);
    assert!(future.artifact(EXCEPTION_ARTIFACT).is_none());

    let stats = worker.stats();
    assert_eq!(stats.retries, PENDING_ROUNDS);
    assert_eq!(stats.executed, PENDING_ROUNDS + 1);
    assert_eq!(stats.delayed_queue_len, 0);
}

#[test]
fn test_generic_error_text_becomes_exception_artifact() {
    let worker = CompilationThread::new().unwrap();
    let future = Arc::new(ArtifactFuture::new());
    let err = AssetError::Custom("unexpected token at line 4".to_string());
    let expected = err.to_string();

    worker.push(&future, move |_| CompileOutcome::Failed(err.clone()));

    assert_eq!(future.stall_while_pending(WAIT), Some(AssetState::Invalid));
    assert_eq!(future.error_message(), Some(expected));
}

#[test]
fn test_construction_error_keeps_log_and_dependencies() {
    let worker = CompilationThread::new().unwrap();
    let future = Arc::new(ArtifactFuture::new());
    let dep_val = dep_val_sys().make();
    let err = ConstructionError::new(
        ConstructionReason::FormatNotUnderstood,
        dep_val.clone(),
        Some(as_blob("bad chunk header")),
    );

    worker.push(&future, move |_| CompileOutcome::Failed(err.clone().into()));

    assert_eq!(future.stall_while_pending(WAIT), Some(AssetState::Invalid));
    let exception = future.artifact(EXCEPTION_ARTIFACT).unwrap();
    assert_eq!(blob_as_string(exception.blob().unwrap()), "bad chunk header");
    assert!(exception.dependency_validation().ptr_eq(&dep_val));
}

#[test]
fn test_invalid_asset_failure() {
    let worker = CompilationThread::new().unwrap();
    let future = Arc::new(ArtifactFuture::new());

    worker.push(&future, |_| {
        CompileOutcome::Failed(
            InvalidAsset::new("brick.dds", Default::default(), Some(as_blob("truncated"))).into(),
        )
    });

    assert_eq!(future.stall_while_pending(WAIT), Some(AssetState::Invalid));
    assert_eq!(future.error_message().as_deref(), Some("truncated"));
}

#[test]
fn test_panicking_operation_marks_invalid_without_payload() {
    let worker = CompilationThread::new().unwrap();
    let future = Arc::new(ArtifactFuture::new());
    worker.push(&future, |_| panic!("compiler crashed"));

    assert_eq!(future.stall_while_pending(WAIT), Some(AssetState::Invalid));
    assert!(future.artifacts().is_empty());

    // The worker survives and keeps serving
    let next = Arc::new(ArtifactFuture::new());
    worker.push(&next, |future| {
        future.set_state(AssetState::Ready);
        CompileOutcome::Completed
    });
    assert_eq!(next.stall_while_pending(WAIT), Some(AssetState::Ready));
}

#[test]
fn test_fresh_items_run_before_delayed_and_in_order() {
    let worker = CompilationThread::with_config(&CompilationThreadConfig {
        delayed_retry_delay_ms: 5,
    })
    .unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    // The first item goes pending once; everything pushed behind it must run before its retry
    let gate = Arc::new(ArtifactFuture::new());
    let gate_order = order.clone();
    let mut first_attempt = true;
    worker.push(&gate, move |future| {
        gate_order.lock().push("gate");
        if std::mem::take(&mut first_attempt) {
            thread::sleep(Duration::from_millis(20));
            return CompileOutcome::Pending(PendingAsset::new("dependency"));
        }
        future.set_state(AssetState::Ready);
        CompileOutcome::Completed
    });

    let mut futures = Vec::new();
    for name in ["a", "b", "c"] {
        let future = Arc::new(ArtifactFuture::new());
        let item_order = order.clone();
        worker.push(&future, move |future| {
            item_order.lock().push(name);
            future.set_state(AssetState::Ready);
            CompileOutcome::Completed
        });
        futures.push(future);
    }

    assert_eq!(gate.stall_while_pending(WAIT), Some(AssetState::Ready));
    for future in futures.iter() {
        assert_eq!(future.stall_while_pending(WAIT), Some(AssetState::Ready));
    }
    assert_eq!(*order.lock(), vec!["gate", "a", "b", "c", "gate"]);
}

#[test]
fn test_dropped_future_is_skipped() {
    let worker = CompilationThread::new().unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    // Block the worker so the second item is still queued when its future is dropped
    let blocker = Arc::new(ArtifactFuture::new());
    worker.push(&blocker, |future| {
        thread::sleep(Duration::from_millis(30));
        future.set_state(AssetState::Ready);
        CompileOutcome::Completed
    });

    let orphan = Arc::new(ArtifactFuture::new());
    let counter = ran.clone();
    worker.push(&orphan, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        CompileOutcome::Completed
    });
    drop(orphan);

    let tail = Arc::new(ArtifactFuture::new());
    worker.push(&tail, |future| {
        future.set_state(AssetState::Ready);
        CompileOutcome::Completed
    });

    assert_eq!(tail.stall_while_pending(WAIT), Some(AssetState::Ready));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_shutdown_abandons_always_pending_operation() {
    let worker = CompilationThread::new().unwrap();
    let future = Arc::new(ArtifactFuture::new());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    worker.push(&future, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        CompileOutcome::Pending(PendingAsset::new("never.dds"))
    });

    while attempts.load(Ordering::SeqCst) < 2 {
        thread::sleep(Duration::from_millis(1));
    }
    worker.stall_on_pending_operations();
    let attempts_at_shutdown = attempts.load(Ordering::SeqCst);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(attempts.load(Ordering::SeqCst), attempts_at_shutdown);
    assert_eq!(future.asset_state(), AssetState::Pending);
    assert_eq!(future.stall_while_pending(Duration::from_millis(10)), None);

    // Pushing after shutdown is ignored
    let late = Arc::new(ArtifactFuture::new());
    worker.push(&late, |future| {
        future.set_state(AssetState::Ready);
        CompileOutcome::Completed
    });
    assert_eq!(late.stall_while_pending(Duration::from_millis(20)), None);
}

#[test]
fn test_outcome_from_result() {
    let completed: Result<(), AssetError> = Ok(());
    let pending: Result<(), AssetError> = Err(PendingAsset::new("x").into());
    let failed: Result<(), AssetError> = Err(AssetError::NotFound("x".to_string()));

    assert!(matches!(CompileOutcome::from(completed), CompileOutcome::Completed));
    assert!(matches!(
        CompileOutcome::from(pending),
        CompileOutcome::Pending(p) if p.initializer() == "x"
    ));
    assert!(matches!(
        CompileOutcome::from(failed),
        CompileOutcome::Failed(AssetError::NotFound(_))
    ));
}

#[test]
fn test_queue_compile_operation_success_and_failure() {
    let pool = ThreadPool::new("queue-test", 2).unwrap();

    let ready = Arc::new(ArtifactFuture::with_initializer("ok.dae"));
    queue_compile_operation(&pool, &ready, |future| {
        future.set_state(AssetState::Ready);
        Ok(())
    })
    .unwrap();

    let failed = Arc::new(ArtifactFuture::with_initializer("bad.dae"));
    let err = AssetError::Io("disk unplugged".to_string());
    let expected = err.to_string();
    queue_compile_operation(&pool, &failed, move |_| Err(err)).unwrap();

    assert_eq!(ready.stall_while_pending(WAIT), Some(AssetState::Ready));
    assert_eq!(failed.stall_while_pending(WAIT), Some(AssetState::Invalid));
    assert_eq!(failed.error_message(), Some(expected));
}

#[test]
fn test_queue_compile_operation_does_not_retry_pending() {
    let pool = ThreadPool::new("queue-pending", 1).unwrap();
    let future = Arc::new(ArtifactFuture::new());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    queue_compile_operation(&pool, &future, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(PendingAsset::new("dependency").into())
    })
    .unwrap();
    pool.shutdown();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(future.asset_state(), AssetState::Pending);
    assert!(future.artifacts().is_empty());
}

#[test]
fn test_queue_compile_operation_panic_and_refusal() {
    let pool = ThreadPool::new("queue-panic", 1).unwrap();
    let future = Arc::new(ArtifactFuture::new());
    queue_compile_operation(&pool, &future, |_| panic!("boom")).unwrap();
    pool.shutdown();
    assert_eq!(future.asset_state(), AssetState::Invalid);
    assert!(future.artifacts().is_empty());

    let refused = Arc::new(ArtifactFuture::new());
    let result = queue_compile_operation(&pool, &refused, |_| Ok(()));
    assert!(matches!(result, Err(AssetError::ThreadPool(_))));
    assert_eq!(refused.asset_state(), AssetState::Pending);
}
