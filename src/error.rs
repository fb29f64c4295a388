use std::io;

#[cfg(feature = "service")]
use notify::{Error as NotifyError, ErrorKind as NotifyErrorKind};
use regex::Error as RegexError;
use thiserror::Error;

use crate::exceptions::{ConstructionError, InvalidAsset, PendingAsset, RetrievalError};

#[derive(Debug, Clone, Error)]
pub enum AssetError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
    #[error("Asset '{initializer}' is already being resolved further up this resolution context")]
    ReentrantResolution { initializer: String },
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Pending(#[from] PendingAsset),
    #[error(transparent)]
    Invalid(#[from] InvalidAsset),
    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

impl AssetError {
    /// True for the "try again later" condition. Every other variant is a terminal failure.
    pub fn is_pending(&self) -> bool {
        matches!(self, AssetError::Pending(_))
    }

    /// The asset initializer carried by the taxonomy variants, if any.
    pub fn initializer(&self) -> Option<&str> {
        match self {
            AssetError::Retrieval(e) => Some(e.initializer()),
            AssetError::Pending(e) => Some(e.initializer()),
            AssetError::Invalid(e) => Some(e.initializer()),
            AssetError::ReentrantResolution { initializer } => Some(initializer),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for AssetError {
    fn from(src: toml::de::Error) -> AssetError {
        AssetError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for AssetError {
    fn from(src: toml::ser::Error) -> AssetError {
        AssetError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<io::Error> for AssetError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => AssetError::NotFound(format!("{x}")),
            _ => AssetError::Io(format!("IOError: {}: {x}", x.kind())),
        }
    }
}

impl From<RegexError> for AssetError {
    fn from(x: RegexError) -> Self {
        AssetError::Config(format!("Regex parse failed: {x}"))
    }
}

#[cfg(feature = "service")]
impl From<NotifyError> for AssetError {
    fn from(notify_error: NotifyError) -> Self {
        match notify_error.kind {
            NotifyErrorKind::Generic(msg) => AssetError::Custom(format!(
                "notify-debouncer: {}, paths: {:?}",
                msg, notify_error.paths
            )),
            NotifyErrorKind::Io(io_error) => AssetError::Io(format!(
                "notify-debouncer: io error {}, paths: {:?}",
                io_error.kind(),
                notify_error.paths
            )),
            NotifyErrorKind::PathNotFound => AssetError::NotFound(format!(
                "notify-debouncer: path(s) not found: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::WatchNotFound => AssetError::NotFound(format!(
                "notify-debouncer: watch not found, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::InvalidConfig(_) => {
                AssetError::Config("notify-debouncer invalid config".to_string())
            }
            NotifyErrorKind::MaxFilesWatch => {
                AssetError::Custom("notify-debouncer max file watch limit reached".to_string())
            }
        }
    }
}
