use parking_lot::Mutex;
use std::{fmt, sync::Arc, time::Duration};

use super::{stall_until_settled_async, AssetState, AsyncMarker, MarkerId, StateCell};
use crate::depval::DependencyValidation;

pub type Blob = Arc<Vec<u8>>;

/// Name of the artifact carrying failure diagnostics on an `Invalid` future.
pub const EXCEPTION_ARTIFACT: &str = "exception";

pub fn as_blob(text: &str) -> Blob {
    Arc::new(text.as_bytes().to_vec())
}

pub fn blob_as_string(blob: &Blob) -> String {
    String::from_utf8_lossy(blob).into_owned()
}

/// One named compile output.
#[derive(Debug, Clone, Default)]
pub struct Artifact {
    blob: Option<Blob>,
    dep_val: DependencyValidation,
}

impl Artifact {
    pub fn new(blob: Option<Blob>, dep_val: DependencyValidation) -> Self {
        Artifact { blob, dep_val }
    }

    pub fn blob(&self) -> Option<&Blob> {
        self.blob.as_ref()
    }

    pub fn dependency_validation(&self) -> &DependencyValidation {
        &self.dep_val
    }
}

/// Future for a compile result: a state plus named artifacts and a dependency handle.
///
/// Artifacts are appended by the single worker that owns the compile, before it publishes
/// the terminal state. A reader that observes `Ready` or `Invalid` sees every artifact.
pub struct ArtifactFuture {
    id: MarkerId,
    initializer: Option<String>,
    state: StateCell,
    artifacts: Mutex<Vec<(String, Arc<Artifact>)>>,
    dep_val: Mutex<DependencyValidation>,
}

pub type CompileFuture = ArtifactFuture;

impl Default for ArtifactFuture {
    fn default() -> Self {
        ArtifactFuture::new()
    }
}

impl ArtifactFuture {
    pub fn new() -> Self {
        ArtifactFuture {
            id: MarkerId::next(),
            initializer: None,
            state: StateCell::new(),
            artifacts: Mutex::new(Vec::new()),
            dep_val: Mutex::new(DependencyValidation::default()),
        }
    }

    pub fn with_initializer(initializer: impl Into<String>) -> Self {
        ArtifactFuture {
            initializer: Some(initializer.into()),
            ..ArtifactFuture::new()
        }
    }

    pub fn add_artifact(&self, name: impl Into<String>, artifact: Artifact) {
        let name = name.into();
        debug_assert!(
            self.asset_state() == AssetState::Pending,
            "artifact '{name}' added to a settled future"
        );
        self.artifacts.lock().push((name, Arc::new(artifact)));
    }

    pub fn artifacts(&self) -> Vec<(String, Arc<Artifact>)> {
        self.artifacts.lock().clone()
    }

    /// First artifact registered under `name`.
    pub fn artifact(&self, name: &str) -> Option<Arc<Artifact>> {
        self.artifacts
            .lock()
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, artifact)| artifact.clone())
    }

    /// Diagnostic text from the `"exception"` artifact, if there is one with a payload.
    pub fn error_message(&self) -> Option<String> {
        self.artifact(EXCEPTION_ARTIFACT)
            .and_then(|artifact| artifact.blob().map(blob_as_string))
    }

    /// Returns false if the change was rejected.
    pub fn set_state(&self, new_state: AssetState) -> bool {
        self.state.transition(new_state, &self.label())
    }

    pub fn dependency_validation(&self) -> DependencyValidation {
        self.dep_val.lock().clone()
    }

    pub fn set_dependency_validation(&self, dep_val: DependencyValidation) {
        *self.dep_val.lock() = dep_val;
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

impl AsyncMarker for ArtifactFuture {
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

impl fmt::Debug for ArtifactFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactFuture")
            .field("id", &self.id)
            .field("initializer", &self.initializer)
            .field("state", &self.asset_state())
            .field("artifacts", &self.artifacts.lock().len())
            .finish()
    }
}
