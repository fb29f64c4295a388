use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use super::{AssetState, AsyncMarker, MarkerId};
use crate::error::AssetError;

struct InFlight {
    id: MarkerId,
    label: Option<String>,
    marker: Weak<dyn AsyncMarker>,
}

/// Pops the in-flight entry even when the resolve closure unwinds.
struct InFlightGuard<'a> {
    ctx: &'a mut ResolutionContext,
    depth: usize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.ctx.stack.truncate(self.depth);
    }
}

/// Stack of markers currently being resolved by one caller.
///
/// Resolving a marker that is already on the stack is a same-thread dependency cycle and
/// fails with [`AssetError::ReentrantResolution`] instead of recursing. The context is
/// threaded through nested resolutions by `&mut`, so it is never shared between threads and
/// does not detect cross-thread deadlocks.
#[derive(Default)]
pub struct ResolutionContext {
    stack: Vec<InFlight>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `resolve_fn` with `marker` registered as in flight.
    ///
    /// `resolve_fn` receives the context so it can resolve further dependencies. When it
    /// reports a completion state, that state must be `Ready` or `Invalid`.
    pub fn resolve<M, F>(
        &mut self,
        marker: &Arc<M>,
        resolve_fn: F,
    ) -> Result<Option<AssetState>, AssetError>
    where
        M: AsyncMarker + 'static,
        F: FnOnce(&mut ResolutionContext) -> Option<AssetState>,
    {
        let id = marker.id();
        let label = marker.initializer().map(str::to_string);

        if self.is_resolving(id) {
            let initializer = label.unwrap_or_else(|| id.to_string());
            tracing::warn!(
                "Reentrant resolution of {} while resolving [{}]",
                initializer,
                self.describe().join(", ")
            );
            return Err(AssetError::ReentrantResolution { initializer });
        }

        let weak: Weak<M> = Arc::downgrade(marker);
        let weak: Weak<dyn AsyncMarker> = weak;
        let mut guard = InFlightGuard {
            depth: self.stack.len(),
            ctx: self,
        };
        guard.ctx.stack.push(InFlight {
            id,
            label,
            marker: weak,
        });
        let result = resolve_fn(&mut *guard.ctx);
        drop(guard);

        if let Some(state) = result {
            debug_assert!(
                state.is_terminal(),
                "resolution of marker {id} completed in state {state}"
            );
        }
        Ok(result)
    }

    /// Stall on `marker` with reentrancy protection.
    pub fn stall_while_pending_in<M>(
        &mut self,
        marker: &Arc<M>,
        timeout: Duration,
    ) -> Result<Option<AssetState>, AssetError>
    where
        M: AsyncMarker + 'static,
    {
        self.resolve(marker, |_| marker.stall_while_pending(timeout))
    }

    pub fn is_resolving(&self, id: MarkerId) -> bool {
        self.stack.iter().any(|entry| entry.id == id)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// One line per in-flight marker, outermost first, with its current state.
    pub fn describe(&self) -> Vec<String> {
        self.stack
            .iter()
            .map(|entry| {
                let state = match entry.marker.upgrade() {
                    Some(marker) => marker.asset_state().to_string(),
                    None => "dropped".to_string(),
                };
                match &entry.label {
                    Some(label) => format!("{} {}: {}", entry.id, label, state),
                    None => format!("{}: {}", entry.id, state),
                }
            })
            .collect()
    }
}
