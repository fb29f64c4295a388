//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::{fs, path::Path};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Create a project tree with `assets/` and `fallback/` folders plus the given files,
/// each relative to the project root.
#[allow(dead_code)]
pub fn create_project(files: &[(&str, &str)]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("assets")).unwrap();
    fs::create_dir_all(temp_dir.path().join("fallback")).unwrap();
    for (relative, content) in files {
        let path = temp_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    temp_dir
}

/// A path under the project root as a `/`-separated string.
#[allow(dead_code)]
pub fn project_path(root: &Path, relative: &str) -> String {
    let root = root.to_str().unwrap().replace('\\', "/");
    if relative.is_empty() {
        root
    } else {
        format!("{}/{}", root.trim_end_matches('/'), relative)
    }
}
