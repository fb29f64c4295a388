//! Asset path handling: lexical path utilities, the filesystem query seam and
//! [`DirectorySearchRules`].

pub mod filesystem;
pub mod path;
pub mod search_rules;

pub use filesystem::{FileSystem, OsFileSystem};
pub use path::{
    concat_path, dirname, is_separator, simplify_path, split_parameters, wildcard_to_regex,
    PARAMETER_DIVIDER,
};
pub use search_rules::{
    default_directory_search_rules, DirectorySearchRules, BASE_FILE_SENTINEL,
    MAX_SEARCH_DIRECTORIES,
};
