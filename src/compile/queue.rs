use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use super::pool::TaskPool;
use crate::{
    error::AssetError,
    exceptions::PendingAsset,
    marker::{as_blob, Artifact, ArtifactFuture, AssetState, AsyncMarker, EXCEPTION_ARTIFACT},
};

/// What a compile closure reports back to its scheduler.
#[derive(Debug, Clone)]
pub enum CompileOutcome {
    /// The closure set the future's terminal state itself.
    Completed,
    /// A dependency is not ready yet; run the same closure again later.
    Pending(PendingAsset),
    /// Terminal failure; the scheduler marks the future `Invalid`.
    Failed(AssetError),
}

impl From<Result<(), AssetError>> for CompileOutcome {
    fn from(result: Result<(), AssetError>) -> Self {
        match result {
            Ok(()) => CompileOutcome::Completed,
            Err(AssetError::Pending(pending)) => CompileOutcome::Pending(pending),
            Err(err) => CompileOutcome::Failed(err),
        }
    }
}

/// Attach an `"exception"` artifact describing `err` and mark the future `Invalid`.
///
/// Construction and invalid-asset failures keep their own log and dependency handle; any
/// other error contributes its display text.
pub(crate) fn record_failure(future: &ArtifactFuture, err: &AssetError) {
    let state = future.asset_state();
    if state.is_terminal() {
        tracing::error!(
            "Compile operation for {:?} failed after settling as {}: {}",
            future_label(future),
            state,
            err
        );
        return;
    }
    let artifact = match err {
        AssetError::Construction(e) => Artifact::new(
            e.actualization_log().cloned(),
            e.dependency_validation().clone(),
        ),
        AssetError::Invalid(e) => Artifact::new(
            e.actualization_log().cloned(),
            e.dependency_validation().clone(),
        ),
        other => Artifact::new(Some(as_blob(&other.to_string())), Default::default()),
    };
    future.add_artifact(EXCEPTION_ARTIFACT, artifact);
    future.set_state(AssetState::Invalid);
}

/// Last resort: mark the future `Invalid` with no diagnostic payload.
pub(crate) fn record_panic(future: &ArtifactFuture, payload: Box<dyn Any + Send>) {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    tracing::error!(
        "Compile operation for {:?} panicked: {}",
        future_label(future),
        message
    );
    if !future.asset_state().is_terminal() {
        future.set_state(AssetState::Invalid);
    }
}

pub(crate) fn future_label(future: &ArtifactFuture) -> String {
    future
        .initializer()
        .map(str::to_string)
        .unwrap_or_else(|| future.id().to_string())
}

/// Run `op` against `future` once on `pool`.
///
/// Errors returned by `op` become an `Invalid` future with an `"exception"` artifact.
/// There is no retry: an `op` that reports [`AssetError::Pending`] breaks this path's
/// contract, so it is logged and the future is left `Pending`. The task holds only a weak
/// reference, so a future dropped by every caller is skipped.
///
/// Fails only if the pool refuses the task.
pub fn queue_compile_operation<P, F>(
    pool: &P,
    future: &Arc<ArtifactFuture>,
    op: F,
) -> Result<(), AssetError>
where
    P: TaskPool + ?Sized,
    F: FnOnce(&ArtifactFuture) -> Result<(), AssetError> + Send + 'static,
{
    let weak = Arc::downgrade(future);
    pool.enqueue(Box::new(move || {
        let Some(future) = weak.upgrade() else {
            tracing::debug!("Skipping compile operation for a dropped future");
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| op(&future))) {
            Ok(Ok(())) => {}
            Ok(Err(AssetError::Pending(pending))) => {
                tracing::error!(
                    "Compile operation for {:?} reported pending asset {:?} on a path without retry",
                    future_label(&future),
                    pending.initializer()
                );
            }
            Ok(Err(err)) => record_failure(&future, &err),
            Err(payload) => record_panic(&future, payload),
        }
    }))
}
