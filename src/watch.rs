//! File system watching for dependency validation.
//!
//! [`DependencyWatcher`] forwards create, modify and remove events from the operating system
//! into [`DependencyValidationSystem::on_file_change`](crate::depval::DependencyValidationSystem::on_file_change),
//! so handles depending on a source file see their validation index move shortly after the
//! file changes on disk. Events for files nobody depends on are dropped by the system.
//!
//! Polling through
//! [`poll_file_changes`](crate::depval::DependencyValidationSystem::poll_file_changes) stays
//! available for builds without the `service` feature.

use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer, FileIdMap,
};
use parking_lot::Mutex;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{depval::dep_val_sys, error::AssetError};

type DirectoryWatcher = Debouncer<RecommendedWatcher, FileIdMap>;

pub struct DependencyWatcher {
    debouncer: Mutex<DirectoryWatcher>,
    watched: Mutex<BTreeSet<PathBuf>>,
}

impl DependencyWatcher {
    /// Start a debounced watcher. Nothing is watched until [`watch`](Self::watch) is called.
    pub fn new(debounce: Duration) -> Result<Self, AssetError> {
        let debouncer = new_debouncer(debounce, None, |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events.iter() {
                        match event.event.kind {
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                                for path in event.paths.iter() {
                                    let Some(filename) = path.to_str() else {
                                        tracing::debug!("Skipping non-utf8 path {:?}", path);
                                        continue;
                                    };
                                    dep_val_sys().on_file_change(filename);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                Err(errors) => {
                    tracing::error!("Notify debouncer returned errors: {:?}", errors);
                }
            }
        })?;
        Ok(DependencyWatcher {
            debouncer: Mutex::new(debouncer),
            watched: Mutex::new(BTreeSet::new()),
        })
    }

    /// Watch `directory` and everything beneath it. Watching a directory twice is a no-op.
    pub fn watch(&self, directory: &Path) -> Result<(), AssetError> {
        let mut watched = self.watched.lock();
        if watched.contains(directory) {
            return Ok(());
        }
        self.debouncer
            .lock()
            .watcher()
            .watch(directory, RecursiveMode::Recursive)?;
        tracing::debug!("Watching {:?} for dependency changes", directory);
        watched.insert(directory.to_path_buf());
        Ok(())
    }

    pub fn unwatch(&self, directory: &Path) -> Result<(), AssetError> {
        if !self.watched.lock().remove(directory) {
            return Ok(());
        }
        let unwatch_res = self.debouncer.lock().watcher().unwatch(directory);
        tracing::debug!("Unwatch_res(path: {:?}) = {:?}", directory, unwatch_res);
        unwatch_res?;
        Ok(())
    }

    /// Watch the parent directory of every monitored file that still exists. Returns the
    /// number of directories newly watched. Directories that disappear meanwhile are skipped.
    pub fn watch_monitored_files(&self) -> Result<usize, AssetError> {
        let directories: BTreeSet<PathBuf> = dep_val_sys()
            .monitored_filenames()
            .into_iter()
            .filter_map(|filename| Path::new(&filename).parent().map(Path::to_path_buf))
            .filter(|directory| directory.is_dir())
            .collect();
        let mut added = 0;
        for directory in directories {
            if self.watched.lock().contains(&directory) {
                continue;
            }
            match self.watch(&directory) {
                Ok(()) => added += 1,
                // Removed since it was listed
                Err(_) if !directory.is_dir() => {
                    tracing::debug!("Skipping vanished directory {:?}", directory)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.watched.lock().iter().cloned().collect()
    }
}
