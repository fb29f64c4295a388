//! Dependency validation: tracking whether a derived result is still valid.
//!
//! A [`DependencyValidation`] handle stands for "this result stays valid as long as these
//! upstream sources are unchanged". Handles form a tree: registering a child handle under a
//! parent makes every change seen by the child visible on the parent. Leaves are source
//! files tracked by the process-wide [`DependencyValidationSystem`].
//!
//! Validity is observed by comparing [`DependencyValidation::validation_index`] values: the
//! index only ever grows, and grows whenever anything upstream changes.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    fs,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::SystemTime,
};

use crate::paths::simplify_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DependentFileStatus {
    #[default]
    Normal,
    DoesNotExist,
    /// Superseded by an in-memory version; treated as a change.
    Shadowed,
}

/// Snapshot of a source file at the time a dependency on it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DependentFileState {
    pub filename: String,
    pub modification_time: Option<SystemTime>,
    pub status: DependentFileStatus,
}

impl DependentFileState {
    /// Read the current state of `filename` from disk.
    pub fn current(filename: &str) -> Self {
        match fs::metadata(filename) {
            Ok(meta) => DependentFileState {
                filename: filename.to_string(),
                modification_time: meta.modified().ok(),
                status: DependentFileStatus::Normal,
            },
            Err(_) => DependentFileState {
                filename: filename.to_string(),
                modification_time: None,
                status: DependentFileStatus::DoesNotExist,
            },
        }
    }

    fn differs_on_disk(&self, other: &DependentFileState) -> bool {
        self.status != other.status || self.modification_time != other.modification_time
    }
}

/// A monitored source file and the history of states observed for it.
#[derive(Debug)]
struct MonitoredFile {
    states: Mutex<Vec<DependentFileState>>,
}

impl MonitoredFile {
    fn change_count(&self) -> u32 {
        self.states.lock().len().saturating_sub(1) as u32
    }

    fn latest(&self) -> DependentFileState {
        self.states.lock().last().cloned().unwrap_or_default()
    }
}

#[derive(Default)]
struct DepValNode {
    change_index: AtomicU32,
    children: Mutex<Vec<DependencyValidation>>,
    files: Mutex<Vec<Arc<MonitoredFile>>>,
}

/// Shared handle onto a node of the dependency tree. Cloning shares the node.
///
/// The default handle is a null marker: it never changes and cannot hold dependencies.
#[derive(Clone, Default)]
pub struct DependencyValidation(Option<Arc<DepValNode>>);

impl DependencyValidation {
    /// Whether this handle refers to a real node.
    pub fn is_valid_handle(&self) -> bool {
        self.0.is_some()
    }

    /// Monotonic counter covering this node, its files and all registered children.
    pub fn validation_index(&self) -> u32 {
        let Some(node) = &self.0 else {
            return 0;
        };
        let own = node.change_index.load(Ordering::Acquire);
        let files: u32 = node.files.lock().iter().map(|f| f.change_count()).sum();
        let children: u32 = node
            .children
            .lock()
            .iter()
            .map(|child| child.validation_index())
            .sum();
        own.wrapping_add(files).wrapping_add(children)
    }

    /// Mark this node itself as changed.
    pub fn on_change(&self) {
        if let Some(node) = &self.0 {
            node.change_index.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Register `dependency` as a child: its changes become visible through `self`.
    ///
    /// Registering a null handle, registering a handle twice, or registering a handle that
    /// already depends on `self` are all ignored. Registrations are serialized process-wide
    /// so two threads linking the same pair in opposite directions cannot form a cycle.
    pub fn register_dependency(&self, dependency: &DependencyValidation) {
        let (Some(node), Some(_)) = (&self.0, &dependency.0) else {
            tracing::debug!("Ignoring dependency registration involving a null handle");
            return;
        };
        // Cycle check and insert must not interleave with another registration
        let _registration = REGISTRATION_LOCK.lock();
        if self.ptr_eq(dependency) || dependency.depends_on(self) {
            tracing::warn!("Ignoring dependency registration that would create a cycle");
            return;
        }
        let mut children = node.children.lock();
        if children.iter().any(|child| child.ptr_eq(dependency)) {
            return;
        }
        children.push(dependency.clone());
    }

    /// Register a source file dependency through the global system.
    pub fn register_file_dependency(&self, filename: &str) {
        dep_val_sys().register_file_dependency(self, filename);
    }

    /// Whether `other` appears anywhere in this node's subtree.
    pub fn depends_on(&self, other: &DependencyValidation) -> bool {
        let Some(node) = &self.0 else {
            return false;
        };
        node.children
            .lock()
            .iter()
            .any(|child| child.ptr_eq(other) || child.depends_on(other))
    }

    pub fn ptr_eq(&self, other: &DependencyValidation) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn attach_file(&self, file: Arc<MonitoredFile>) {
        if let Some(node) = &self.0 {
            let mut files = node.files.lock();
            if !files.iter().any(|existing| Arc::ptr_eq(existing, &file)) {
                files.push(file);
            }
        }
    }
}

impl fmt::Debug for DependencyValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(node) => f
                .debug_struct("DependencyValidation")
                .field("index", &self.validation_index())
                .field("children", &node.children.lock().len())
                .field("files", &node.files.lock().len())
                .finish(),
            None => f.write_str("DependencyValidation(null)"),
        }
    }
}

/// Process-wide registry of monitored source files.
///
/// Changes arrive through [`on_file_change`](Self::on_file_change), fed by the `service`
/// feature's file watcher, or through [`poll_file_changes`](Self::poll_file_changes), which
/// compares each monitored file against the disk and records a new state when it differs.
#[derive(Default)]
pub struct DependencyValidationSystem {
    monitored_files: Mutex<HashMap<String, Arc<MonitoredFile>>>,
}

/// Held across the cycle check and insert of every dependency registration.
static REGISTRATION_LOCK: Mutex<()> = parking_lot::const_mutex(());

static DEP_VAL_SYS: Lazy<DependencyValidationSystem> =
    Lazy::new(DependencyValidationSystem::default);

/// The global dependency validation system.
pub fn dep_val_sys() -> &'static DependencyValidationSystem {
    &DEP_VAL_SYS
}

impl DependencyValidationSystem {
    /// A fresh node with no dependencies.
    pub fn make(&self) -> DependencyValidation {
        DependencyValidation(Some(Arc::new(DepValNode::default())))
    }

    pub fn make_with_files<I, S>(&self, filenames: I) -> DependencyValidation
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dep_val = self.make();
        for filename in filenames {
            self.register_file_dependency(&dep_val, filename.as_ref());
        }
        dep_val
    }

    pub fn make_with_states(&self, states: &[DependentFileState]) -> DependencyValidation {
        self.make_with_files(states.iter().map(|state| state.filename.as_str()))
    }

    pub fn register_file_dependency(&self, dep_val: &DependencyValidation, filename: &str) {
        if !dep_val.is_valid_handle() {
            tracing::debug!("Ignoring file dependency {:?} on a null handle", filename);
            return;
        }
        dep_val.attach_file(self.monitored_file(filename));
    }

    /// Most recent recorded state of `filename` (begins monitoring it if necessary).
    pub fn dependent_file_state(&self, filename: &str) -> DependentFileState {
        self.monitored_file(filename).latest()
    }

    /// Record that `filename` has been replaced by an in-memory version.
    pub fn shadow_file(&self, filename: &str) {
        let file = self.monitored_file(filename);
        let mut states = file.states.lock();
        let mut shadowed = states.last().cloned().unwrap_or_default();
        shadowed.status = DependentFileStatus::Shadowed;
        states.push(shadowed);
        tracing::debug!("Shadowed {:?}", filename);
    }

    /// Record a change notification for `filename` if it is monitored.
    pub fn on_file_change(&self, filename: &str) {
        let key = simplify_path(filename);
        let file = self.monitored_files.lock().get(&key).cloned();
        if let Some(file) = file {
            let mut states = file.states.lock();
            let current = DependentFileState::current(&key);
            tracing::debug!("File change recorded for {:?}: {:?}", key, current.status);
            states.push(current);
        }
    }

    /// Compare every monitored file against the disk, recording changes. Returns the number
    /// of files that changed. Shadowed files are skipped.
    pub fn poll_file_changes(&self) -> usize {
        let files: Vec<(String, Arc<MonitoredFile>)> = self
            .monitored_files
            .lock()
            .iter()
            .map(|(name, file)| (name.clone(), file.clone()))
            .collect();

        let mut changed = 0;
        for (name, file) in files {
            let current = DependentFileState::current(&name);
            let mut states = file.states.lock();
            let differs = match states.last() {
                // Owned by its in-memory replacement until the next explicit change
                Some(last) if last.status == DependentFileStatus::Shadowed => false,
                Some(last) => last.differs_on_disk(&current),
                None => true,
            };
            if differs {
                tracing::debug!("Detected change in monitored file {:?}", name);
                states.push(current);
                changed += 1;
            }
        }
        changed
    }

    /// Simplified names of every monitored file, sorted.
    pub fn monitored_filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.monitored_files.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn monitored_file_count(&self) -> usize {
        self.monitored_files.lock().len()
    }

    fn monitored_file(&self, filename: &str) -> Arc<MonitoredFile> {
        let key = simplify_path(filename);
        self.monitored_files
            .lock()
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(MonitoredFile {
                    states: Mutex::new(vec![DependentFileState::current(&key)]),
                })
            })
            .clone()
    }
}
