//! Tests for marker state transitions, stalling and the resolution context

use super::helpers::*;
use crate::{
    config::StallBackoff,
    depval::dep_val_sys,
    error::AssetError,
    marker::{
        as_blob, Artifact, ArtifactFuture, AssetState, AsyncMarker, GenericFuture,
        ResolutionContext, EXCEPTION_ARTIFACT,
    },
};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use test_log::test;

#[test]
fn test_generic_future_settles_once() {
    let future = GenericFuture::with_initializer("tex.dds");
    assert_eq!(future.asset_state(), AssetState::Pending);
    assert_eq!(future.initializer(), Some("tex.dds"));

    assert!(future.set_state(AssetState::Pending));
    assert!(future.set_state(AssetState::Ready));
    assert_eq!(future.asset_state(), AssetState::Ready);
    // Re-publishing the same terminal state is harmless
    assert!(future.set_state(AssetState::Ready));
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "cannot change to")]
fn test_terminal_state_change_asserts() {
    let future = GenericFuture::new();
    future.set_state(AssetState::Invalid);
    future.set_state(AssetState::Ready);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "cannot change to")]
fn test_terminal_state_cannot_return_to_pending() {
    let future = ArtifactFuture::new();
    future.set_state(AssetState::Ready);
    future.set_state(AssetState::Pending);
}

#[test]
fn test_marker_ids_are_unique() {
    let a = GenericFuture::new();
    let b = GenericFuture::new();
    let c = ArtifactFuture::new();
    assert_ne!(a.id(), b.id());
    assert_ne!(b.id(), c.id());
}

#[test]
fn test_stall_times_out_while_pending() {
    let future = GenericFuture::new();
    let start = Instant::now();
    assert_eq!(future.stall_while_pending(Duration::from_millis(30)), None);
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(future.asset_state(), AssetState::Pending);
}

#[test]
fn test_stall_observes_state_set_on_another_thread() {
    let future = Arc::new(GenericFuture::new());
    let writer = future.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        writer.set_state(AssetState::Invalid);
    });

    // Zero timeout waits indefinitely
    assert_eq!(
        future.stall_while_pending(Duration::ZERO),
        Some(AssetState::Invalid)
    );
    handle.join().unwrap();
}

#[test]
fn test_stall_returns_immediately_when_settled() {
    let future = GenericFuture::new();
    future.set_state(AssetState::Ready);
    assert_eq!(
        future.stall_while_pending(Duration::from_millis(1)),
        Some(AssetState::Ready)
    );
}

#[test]
fn test_backoff_curve() {
    let backoff = StallBackoff::default();
    assert_eq!(backoff.delay_for(0), None);
    assert_eq!(backoff.delay_for(15), None);
    assert_eq!(backoff.delay_for(16), Some(Duration::from_millis(1)));
    assert_eq!(backoff.delay_for(20), Some(Duration::from_millis(5)));
    assert_eq!(backoff.delay_for(10_000), Some(Duration::from_millis(100)));
}

#[tokio::test]
async fn test_async_stall() {
    init_logging();
    let future = Arc::new(ArtifactFuture::new());
    assert_eq!(
        future.stall_while_pending_async(Duration::from_millis(10)).await,
        None
    );

    let writer = future.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        writer.set_state(AssetState::Ready);
    });
    assert_eq!(
        future.stall_while_pending_async(Duration::from_secs(5)).await,
        Some(AssetState::Ready)
    );
    handle.join().unwrap();
}

#[test]
fn test_artifacts_are_visible_after_settling() {
    let future = Arc::new(ArtifactFuture::with_initializer("model.dae"));
    let dep_val = dep_val_sys().make();
    let writer = future.clone();
    let writer_dep_val = dep_val.clone();
    let handle = thread::spawn(move || {
        writer.add_artifact(
            "geometry",
            Artifact::new(Some(as_blob("verts")), writer_dep_val.clone()),
        );
        writer.add_artifact("skeleton", Artifact::new(None, writer_dep_val.clone()));
        writer.set_dependency_validation(writer_dep_val);
        writer.set_state(AssetState::Ready);
    });

    assert_eq!(
        future.stall_while_pending(Duration::from_secs(5)),
        Some(AssetState::Ready)
    );
    handle.join().unwrap();

    let names: Vec<String> = future.artifacts().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["geometry", "skeleton"]);
    let geometry = future.artifact("geometry").unwrap();
    assert_eq!(geometry.blob().unwrap().as_slice(), b"verts");
    assert!(future.artifact("skeleton").unwrap().blob().is_none());
    assert!(future.dependency_validation().ptr_eq(&dep_val));
    assert_eq!(future.error_message(), None);
}

#[test]
fn test_error_message_reads_exception_artifact() {
    let future = ArtifactFuture::new();
    future.add_artifact(
        EXCEPTION_ARTIFACT,
        Artifact::new(Some(as_blob("bad header")), Default::default()),
    );
    future.set_state(AssetState::Invalid);
    assert_eq!(future.error_message().as_deref(), Some("bad header"));
}

#[test]
fn test_resolution_context_rejects_reentry() {
    let outer = Arc::new(GenericFuture::with_initializer("outer.material"));
    let inner = Arc::new(GenericFuture::with_initializer("inner.dds"));
    let mut ctx = ResolutionContext::new();

    let result = ctx.resolve(&outer, |ctx| {
        assert_eq!(ctx.depth(), 1);
        assert!(ctx.is_resolving(outer.id()));

        let nested = ctx.resolve(&inner, |ctx| {
            let described = ctx.describe();
            assert_eq!(described.len(), 2);
            assert!(described[0].contains("outer.material: Pending"));
            assert!(described[1].contains("inner.dds: Pending"));

            // Resolving the outer marker again is a cycle
            match ctx.resolve(&outer, |_| Some(AssetState::Ready)) {
                Err(AssetError::ReentrantResolution { initializer }) => {
                    assert_eq!(initializer, "outer.material")
                }
                other => panic!("expected reentrant resolution error, got {other:?}"),
            }

            inner.set_state(AssetState::Ready);
            Some(inner.asset_state())
        });
        assert_eq!(nested.unwrap(), Some(AssetState::Ready));

        outer.set_state(AssetState::Invalid);
        Some(outer.asset_state())
    });

    assert_eq!(result.unwrap(), Some(AssetState::Invalid));
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn test_resolution_context_recovers_from_panicking_resolver() {
    let outer = Arc::new(GenericFuture::with_initializer("outer.material"));
    let inner = Arc::new(GenericFuture::with_initializer("inner.dds"));
    let mut ctx = ResolutionContext::new();

    let unwound = catch_unwind(AssertUnwindSafe(|| {
        ctx.resolve(&outer, |ctx| {
            let _ = ctx.resolve(&inner, |_| panic!("decoder failure"));
            None
        })
    }));
    assert!(unwound.is_err());
    assert_eq!(ctx.depth(), 0);
    assert!(!ctx.is_resolving(outer.id()));
    assert!(!ctx.is_resolving(inner.id()));

    // Both markers can be resolved again
    inner.set_state(AssetState::Ready);
    let result = ctx.resolve(&inner, |_| Some(inner.asset_state()));
    assert_eq!(result.unwrap(), Some(AssetState::Ready));
}

#[test]
fn test_resolution_context_stall() {
    let future = Arc::new(ArtifactFuture::new());
    let mut ctx = ResolutionContext::new();
    assert_eq!(
        ctx.stall_while_pending_in(&future, Duration::from_millis(5))
            .unwrap(),
        None
    );
    assert!(!ctx.is_resolving(future.id()));

    future.set_state(AssetState::Ready);
    assert_eq!(
        ctx.stall_while_pending_in(&future, Duration::from_millis(5)).unwrap(),
        Some(AssetState::Ready)
    );
}

#[test]
fn test_resolution_context_describes_unlabeled_markers() {
    let mut ctx = ResolutionContext::new();
    let marker = Arc::new(GenericFuture::new());
    let id = marker.id();
    ctx.resolve(&marker, |ctx| {
        let lines = ctx.describe();
        assert_eq!(lines, vec![format!("{id}: Pending")]);
        None
    })
    .unwrap();
}
