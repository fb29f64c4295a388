//! Synchronous filesystem queries used by search rule resolution.

use std::path::Path;
use walkdir::WalkDir;

use super::path::{concat_path, is_separator, wildcard_to_regex};

/// Existence and listing queries. Implementations must not mutate anything.
pub trait FileSystem: Send + Sync {
    fn does_file_exist(&self, path: &str) -> bool;

    fn does_directory_exist(&self, path: &str) -> bool;

    /// Files matching a `*`/`?` wildcard in the final segment of `pattern`, for example
    /// `textures/*.dds`. Matching is not recursive.
    fn find_files(&self, pattern: &str) -> Vec<String>;
}

/// [`FileSystem`] backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn does_file_exist(&self, path: &str) -> bool {
        !path.is_empty() && Path::new(path).is_file()
    }

    fn does_directory_exist(&self, path: &str) -> bool {
        !path.is_empty() && Path::new(path).is_dir()
    }

    fn find_files(&self, pattern: &str) -> Vec<String> {
        let (dir, file_pattern) = match pattern.rfind(is_separator) {
            Some(idx) => (&pattern[..idx.max(1)], &pattern[idx + 1..]),
            None => ("", pattern),
        };
        let matcher = match wildcard_to_regex(file_pattern) {
            Ok(matcher) => matcher,
            Err(e) => {
                tracing::warn!("find_files: bad wildcard {:?}: {}", file_pattern, e);
                return Vec::new();
            }
        };

        let walk_root = if dir.is_empty() { "." } else { dir };
        WalkDir::new(walk_root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!("find_files: skipping entry under {:?}: {}", walk_root, e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?;
                matcher.is_match(name).then(|| concat_path(dir, name))
            })
            .collect()
    }
}
