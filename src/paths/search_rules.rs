use serde::{Deserialize, Serialize};

use super::{
    filesystem::{FileSystem, OsFileSystem},
    path::{concat_path, dirname, simplify_path, split_parameters},
};

/// Soft cap on registered directories. Search rules are meant for tens of paths, not
/// thousands; directories beyond the cap are dropped with a warning.
pub const MAX_SEARCH_DIRECTORIES: usize = 16;

/// Resolving this name yields the base file the rules were anchored on.
pub const BASE_FILE_SENTINEL: &str = "<.>";

/// An ordered, de-duplicated list of directories used to turn a relative asset name into a
/// path that exists.
///
/// ## Resolution order
///
/// The unmodified name always wins if it exists. Otherwise every directory is tried in
/// registration order and the first hit is returned. There is no ranking beyond that: a
/// directory registered earlier (including this set's own directories when [`merge`]d with
/// another set) always shadows later ones.
///
/// Resolution never fails. If no candidate exists the (lexically simplified) input comes
/// back, and callers decide whether a missing file is an error.
///
/// Resolution performs synchronous filesystem queries through `&self`; mutation requires
/// `&mut self`, so a set shared between threads must be frozen before it is shared.
///
/// [`merge`]: DirectorySearchRules::merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySearchRules {
    directories: Vec<String>,
    base_file: Option<String>,
}

/// Rules seeded with the folder containing `base_file`, with `base_file` recorded so that
/// [`BASE_FILE_SENTINEL`] resolves back to it.
pub fn default_directory_search_rules(base_file: &str) -> DirectorySearchRules {
    let mut rules = DirectorySearchRules::new();
    rules.add_search_directory_from_filename(base_file);
    rules.set_base_file(base_file);
    rules
}

impl DirectorySearchRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_search_directory(&mut self, dir: &str) {
        if self.has_directory(dir) {
            return;
        }
        if self.directories.len() >= MAX_SEARCH_DIRECTORIES {
            tracing::warn!(
                "Search rules already hold {} directories, dropping {:?}",
                MAX_SEARCH_DIRECTORIES,
                dir
            );
            return;
        }
        self.directories.push(dir.to_string());
    }

    pub fn add_search_directory_from_filename(&mut self, filename: &str) {
        self.add_search_directory(dirname(filename));
    }

    /// Case-insensitive comparison against every registered directory.
    pub fn has_directory(&self, dir: &str) -> bool {
        self.directories
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(dir))
    }

    pub fn set_base_file(&mut self, file: &str) {
        self.base_file = Some(file.to_string());
    }

    pub fn base_file(&self) -> Option<&str> {
        self.base_file.as_deref()
    }

    /// The first registered directory, if any.
    pub fn any_search_directory(&self) -> Option<&str> {
        self.directories.first().map(String::as_str)
    }

    pub fn directories(&self) -> impl Iterator<Item = &str> {
        self.directories.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.directories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }

    /// Import every directory from `other` that is not already present. Directories already
    /// registered here keep their precedence.
    pub fn merge(&mut self, other: &DirectorySearchRules) {
        for dir in other.directories() {
            self.add_search_directory(dir);
        }
    }

    pub fn resolve_file(&self, base_name: &str) -> String {
        self.resolve_file_with(&OsFileSystem, base_name)
    }

    pub fn resolve_file_with<F: FileSystem + ?Sized>(&self, fs: &F, base_name: &str) -> String {
        if base_name == BASE_FILE_SENTINEL {
            return self
                .base_file
                .clone()
                .unwrap_or_else(|| BASE_FILE_SENTINEL.to_string());
        }

        let (path, parameters) = split_parameters(base_name);

        // by definition, we always check the unmodified file name first
        if !fs.does_file_exist(path) {
            for dir in self.directories.iter() {
                let candidate = concat_path(dir, path);
                if fs.does_file_exist(&candidate) {
                    tracing::debug!("Resolved {:?} in search directory {:?}", base_name, dir);
                    let mut resolved = simplify_path(&candidate);
                    resolved.push_str(parameters);
                    return resolved;
                }
            }
            tracing::debug!(
                "Could not resolve {:?} in {} search directories",
                base_name,
                self.directories.len()
            );
        }

        let mut resolved = simplify_path(path);
        resolved.push_str(parameters);
        resolved
    }

    /// In-place form of [`resolve_file`](Self::resolve_file): `buffer` holds the name on
    /// entry and the resolved path on return, truncated to at most `capacity - 1` bytes.
    pub fn resolve_file_into(&self, buffer: &mut String, capacity: usize) {
        self.resolve_file_into_with(&OsFileSystem, buffer, capacity)
    }

    pub fn resolve_file_into_with<F: FileSystem + ?Sized>(
        &self,
        fs: &F,
        buffer: &mut String,
        capacity: usize,
    ) {
        let resolved = self.resolve_file_with(fs, buffer.as_str());
        buffer.clear();
        buffer.push_str(truncate_to_capacity(&resolved, capacity));
    }

    pub fn resolve_directory(&self, base_name: &str) -> String {
        self.resolve_directory_with(&OsFileSystem, base_name)
    }

    /// Directory flavor of [`resolve_file_with`](Self::resolve_file_with).
    ///
    /// Names starting with `.` (such as `../`) exist relative to almost anything, so for
    /// those the registered directories are always probed first.
    pub fn resolve_directory_with<F: FileSystem + ?Sized>(
        &self,
        fs: &F,
        base_name: &str,
    ) -> String {
        let use_base_name = !base_name.starts_with('.') && fs.does_directory_exist(base_name);
        if !use_base_name {
            for dir in self.directories.iter() {
                let candidate = concat_path(dir, base_name);
                if fs.does_directory_exist(&candidate) {
                    return simplify_path(&candidate);
                }
            }
        }
        base_name.to_string()
    }

    pub fn find_files(&self, pattern: &str) -> Vec<String> {
        self.find_files_with(&OsFileSystem, pattern)
    }

    /// Aggregate wildcard matches from every directory, in directory registration order.
    pub fn find_files_with<F: FileSystem + ?Sized>(&self, fs: &F, pattern: &str) -> Vec<String> {
        self.directories
            .iter()
            .flat_map(|dir| fs.find_files(&concat_path(dir, pattern)))
            .collect()
    }
}

fn truncate_to_capacity(text: &str, capacity: usize) -> &str {
    let max_len = capacity.saturating_sub(1);
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
