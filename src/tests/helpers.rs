//! Shared test helpers

use std::collections::BTreeSet;

use crate::paths::{concat_path, dirname, simplify_path, wildcard_to_regex, FileSystem};

/// Initialize tracing for tests (call once per test)
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// In-memory filesystem. Paths are stored simplified, so lookups of `a/./b` and `a/b` agree.
#[derive(Debug, Default)]
pub struct MockFileSystem {
    files: BTreeSet<String>,
    directories: BTreeSet<String>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file and every directory above it.
    pub fn with_file(mut self, path: &str) -> Self {
        let path = simplify_path(path);
        let mut dir = dirname(&path).to_string();
        while !dir.is_empty() {
            let parent = dirname(&dir).to_string();
            self.directories.insert(dir.clone());
            if parent == dir {
                break;
            }
            dir = parent;
        }
        self.files.insert(path);
        self
    }

    pub fn with_directory(mut self, path: &str) -> Self {
        self.directories.insert(simplify_path(path));
        self
    }
}

impl FileSystem for MockFileSystem {
    fn does_file_exist(&self, path: &str) -> bool {
        self.files.contains(&simplify_path(path))
    }

    fn does_directory_exist(&self, path: &str) -> bool {
        self.directories.contains(&simplify_path(path))
    }

    fn find_files(&self, pattern: &str) -> Vec<String> {
        let dir = dirname(pattern);
        let file_pattern = pattern
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(pattern);
        let Ok(matcher) = wildcard_to_regex(file_pattern) else {
            return Vec::new();
        };
        let simplified_dir = simplify_path(dir);
        self.files
            .iter()
            .filter(|file| dirname(file) == simplified_dir)
            .filter_map(|file| {
                let name = file.rsplit('/').next().unwrap_or(file.as_str());
                matcher.is_match(name).then(|| concat_path(dir, name))
            })
            .collect()
    }
}
