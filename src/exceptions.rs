//! Structured asset failures.
//!
//! [`PendingAsset`] is the only retryable condition; every other type here is terminal and
//! ends up as an `"exception"` artifact on the future it was raised against.

use std::{error::Error as StdError, fmt};
use thiserror::Error;

use crate::{
    depval::{dep_val_sys, DependencyValidation},
    marker::{as_blob, blob_as_string, Blob},
};

/// Hook for diagnostic readouts that want more than the `Display` text. Returns true if
/// the error reported anything.
pub trait CustomReport {
    fn custom_report(&self) -> bool;
}

fn log_text(log: &Option<Blob>) -> String {
    log.as_ref()
        .map(|blob| blob_as_string(blob))
        .unwrap_or_default()
}

/// Something went wrong retrieving or resolving the named asset.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to retrieve asset '{initializer}'")]
pub struct RetrievalError {
    initializer: String,
}

impl RetrievalError {
    pub fn new(initializer: impl Into<String>) -> Self {
        RetrievalError {
            initializer: initializer.into(),
        }
    }

    pub fn initializer(&self) -> &str {
        &self.initializer
    }
}

impl CustomReport for RetrievalError {
    fn custom_report(&self) -> bool {
        tracing::error!("{}", self);
        true
    }
}

/// The asset is still being produced. Not a failure; schedulers requeue on it.
///
/// Raised far too often to be logged on creation, so it only reports through
/// [`CustomReport`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Asset '{initializer}' is still pending")]
pub struct PendingAsset {
    initializer: String,
}

impl PendingAsset {
    pub fn new(initializer: impl Into<String>) -> Self {
        PendingAsset {
            initializer: initializer.into(),
        }
    }

    pub fn initializer(&self) -> &str {
        &self.initializer
    }
}

impl CustomReport for PendingAsset {
    fn custom_report(&self) -> bool {
        tracing::warn!("Pending asset: {}", self.initializer);
        true
    }
}

/// Terminal failure of one specific named asset.
#[derive(Debug, Clone, Error)]
#[error("Invalid asset '{initializer}': {}", log_text(actualization_log))]
pub struct InvalidAsset {
    initializer: String,
    dep_val: DependencyValidation,
    actualization_log: Option<Blob>,
}

impl InvalidAsset {
    /// Logs the failure at error level.
    pub fn new(
        initializer: impl Into<String>,
        dep_val: DependencyValidation,
        actualization_log: Option<Blob>,
    ) -> Self {
        let err = InvalidAsset {
            initializer: initializer.into(),
            dep_val,
            actualization_log,
        };
        tracing::error!("{}", err);
        err
    }

    pub fn initializer(&self) -> &str {
        &self.initializer
    }

    pub fn dependency_validation(&self) -> &DependencyValidation {
        &self.dep_val
    }

    pub fn actualization_log(&self) -> Option<&Blob> {
        self.actualization_log.as_ref()
    }
}

impl CustomReport for InvalidAsset {
    fn custom_report(&self) -> bool {
        tracing::error!("{}", self);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConstructionReason {
    #[default]
    Unknown,
    UnsupportedFormat,
    FormatNotUnderstood,
    MissingFile,
    MissingTarget,
}

impl fmt::Display for ConstructionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConstructionReason::Unknown => "unknown",
            ConstructionReason::UnsupportedFormat => "unsupported format",
            ConstructionReason::FormatNotUnderstood => "format not understood",
            ConstructionReason::MissingFile => "missing file",
            ConstructionReason::MissingTarget => "missing target",
        };
        f.write_str(text)
    }
}

/// Terminal failure while constructing an object derived from one or more assets.
///
/// The dependency handle can be a tree: [`with_dependency`](Self::with_dependency) builds a
/// parent node over an existing error's dependencies and a new handle, so a failure caused
/// by several upstream assets reports all of them.
#[derive(Debug, Clone, Error)]
#[error("Construction error ({reason}): {}", log_text(actualization_log))]
pub struct ConstructionError {
    reason: ConstructionReason,
    dep_val: DependencyValidation,
    actualization_log: Option<Blob>,
}

impl ConstructionError {
    pub fn new(
        reason: ConstructionReason,
        dep_val: DependencyValidation,
        actualization_log: Option<Blob>,
    ) -> Self {
        ConstructionError {
            reason,
            dep_val,
            actualization_log,
        }
    }

    /// Wrap any error's text as the diagnostic log.
    pub fn from_error(err: &dyn StdError, dep_val: DependencyValidation) -> Self {
        ConstructionError::new(
            ConstructionReason::Unknown,
            dep_val,
            Some(as_blob(&err.to_string())),
        )
    }

    /// Same reason and log as `err`, with a dependency node covering both `err`'s
    /// dependencies and `dep_val`.
    pub fn with_dependency(err: &ConstructionError, dep_val: &DependencyValidation) -> Self {
        let merged = dep_val_sys().make();
        merged.register_dependency(&err.dep_val);
        merged.register_dependency(dep_val);
        ConstructionError {
            reason: err.reason,
            dep_val: merged,
            actualization_log: err.actualization_log.clone(),
        }
    }

    pub fn reason(&self) -> ConstructionReason {
        self.reason
    }

    pub fn dependency_validation(&self) -> &DependencyValidation {
        &self.dep_val
    }

    pub fn actualization_log(&self) -> Option<&Blob> {
        self.actualization_log.as_ref()
    }
}

impl CustomReport for ConstructionError {
    fn custom_report(&self) -> bool {
        tracing::error!("{}", self);
        true
    }
}
