//! Pollable asset futures.
//!
//! A marker is a tri-state handle (`Pending`, `Ready`, `Invalid`) written once by the worker
//! that produces the asset and read by any number of callers. Readers either poll
//! [`AsyncMarker::asset_state`] or block cooperatively in
//! [`AsyncMarker::stall_while_pending`], which backs off from yielding to capped sleeps.
//!
//! Nested resolution is guarded by an explicit [`ResolutionContext`] instead of thread-local
//! state.

use std::{
    fmt,
    sync::atomic::{AtomicU64, AtomicU8, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::config::StallBackoff;

mod artifact;
mod context;

pub use artifact::{
    as_blob, blob_as_string, Artifact, ArtifactFuture, Blob, CompileFuture, EXCEPTION_ARTIFACT,
};
pub use context::ResolutionContext;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetState {
    Pending = 0,
    Ready = 1,
    Invalid = 2,
}

impl AssetState {
    fn from_u8(value: u8) -> AssetState {
        match value {
            1 => AssetState::Ready,
            2 => AssetState::Invalid,
            _ => AssetState::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != AssetState::Pending
    }
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AssetState::Pending => "Pending",
            AssetState::Ready => "Ready",
            AssetState::Invalid => "Invalid",
        };
        f.write_str(text)
    }
}

/// Process-unique marker identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(u64);

static NEXT_MARKER_ID: AtomicU64 = AtomicU64::new(1);

impl MarkerId {
    pub fn next() -> MarkerId {
        MarkerId(NEXT_MARKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub trait AsyncMarker: Send + Sync {
    fn id(&self) -> MarkerId;

    /// Debug label, usually the asset initializer.
    fn initializer(&self) -> Option<&str> {
        None
    }

    fn asset_state(&self) -> AssetState;

    /// Block until the marker leaves `Pending`. A zero `timeout` waits indefinitely;
    /// `None` means the timeout elapsed first.
    fn stall_while_pending(&self, timeout: Duration) -> Option<AssetState> {
        stall_until_settled(|| self.asset_state(), timeout)
    }
}

/// Atomic state cell shared by every marker implementation.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell(AtomicU8::new(AssetState::Pending as u8))
    }

    pub(crate) fn load(&self) -> AssetState {
        AssetState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Pending moves to a terminal state exactly once. Re-setting the same state is a
    /// no-op; any other change is a programming error.
    pub(crate) fn transition(&self, new_state: AssetState, label: &dyn fmt::Display) -> bool {
        if new_state == AssetState::Pending {
            let current = self.load();
            if current == AssetState::Pending {
                return true;
            }
            reject_transition(current, new_state, label);
            return false;
        }
        match self.0.compare_exchange(
            AssetState::Pending as u8,
            new_state as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) if current == new_state as u8 => true,
            Err(current) => {
                reject_transition(AssetState::from_u8(current), new_state, label);
                false
            }
        }
    }
}

fn reject_transition(current: AssetState, new_state: AssetState, label: &dyn fmt::Display) {
    tracing::error!(
        "Rejected state change {} -> {} on marker {}",
        current,
        new_state,
        label
    );
    debug_assert!(
        false,
        "marker {label} is already {current}; cannot change to {new_state}"
    );
}

/// Poll `load` until it reports a terminal state, following the installed
/// [`StallBackoff`] curve.
pub fn stall_until_settled<F>(load: F, timeout: Duration) -> Option<AssetState>
where
    F: Fn() -> AssetState,
{
    let backoff = StallBackoff::global();
    let deadline = deadline_for(timeout);
    let mut iteration = 0u32;
    loop {
        let state = load();
        if state.is_terminal() {
            return Some(state);
        }
        let remaining = remaining_until(deadline)?;
        match backoff.delay_for(iteration) {
            None => thread::yield_now(),
            Some(delay) => thread::sleep(delay.min(remaining)),
        }
        iteration = iteration.saturating_add(1);
    }
}

/// Async form of [`stall_until_settled`] for callers running on a tokio runtime.
pub async fn stall_until_settled_async<F>(load: F, timeout: Duration) -> Option<AssetState>
where
    F: Fn() -> AssetState,
{
    let backoff = StallBackoff::global();
    let deadline = deadline_for(timeout);
    let mut iteration = 0u32;
    loop {
        let state = load();
        if state.is_terminal() {
            return Some(state);
        }
        let remaining = remaining_until(deadline)?;
        match backoff.delay_for(iteration) {
            None => tokio::task::yield_now().await,
            Some(delay) => tokio::time::sleep(delay.min(remaining)).await,
        }
        iteration = iteration.saturating_add(1);
    }
}

fn deadline_for(timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        None
    } else {
        Instant::now().checked_add(timeout)
    }
}

/// `Some(Duration::MAX)` when there is no deadline, `None` once it has passed.
fn remaining_until(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(Duration::MAX),
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            (!remaining.is_zero()).then_some(remaining)
        }
    }
}

/// The plain marker: a state and an optional label, no payload.
#[derive(Debug)]
pub struct GenericFuture {
    id: MarkerId,
    initializer: Option<String>,
    state: StateCell,
}

impl Default for GenericFuture {
    fn default() -> Self {
        GenericFuture::new()
    }
}

impl GenericFuture {
    pub fn new() -> Self {
        GenericFuture {
            id: MarkerId::next(),
            initializer: None,
            state: StateCell::new(),
        }
    }

    pub fn with_initializer(initializer: impl Into<String>) -> Self {
        GenericFuture {
            initializer: Some(initializer.into()),
            ..GenericFuture::new()
        }
    }

    /// Returns false if the change was rejected.
    pub fn set_state(&self, new_state: AssetState) -> bool {
        self.state.transition(new_state, &self.label())
    }

    pub async fn stall_while_pending_async(&self, timeout: Duration) -> Option<AssetState> {
        stall_until_settled_async(|| self.asset_state(), timeout).await
    }

    fn label(&self) -> String {
        match &self.initializer {
            Some(initializer) => format!("{} ({})", self.id, initializer),
            None => self.id.to_string(),
        }
    }
}

impl AsyncMarker for GenericFuture {
    fn id(&self) -> MarkerId {
        self.id
    }

    fn initializer(&self) -> Option<&str> {
        self.initializer.as_deref()
    }

    fn asset_state(&self) -> AssetState {
        self.state.load()
    }
}
