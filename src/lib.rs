//! # xle-assets
//!
//! Asynchronous asset resolution and compilation: locating source files through ordered
//! search directories, tracking background work with pollable futures, and scheduling
//! compile closures that may have to wait for other assets.
//!
//! ## Overview
//!
//! An asset request flows through a small number of pieces:
//!
//! 1. A caller asks [`services::Services::begin_compile_operation`] for a target type and an
//!    initializer (usually a file name, optionally followed by `:parameters`).
//! 2. The [`compile::IntermediateCompilers`] registry picks the first compiler whose filter
//!    matches and returns a [`compile::CompileMarker`].
//! 3. Invoking the marker queues the compile on the long-task pool and returns an
//!    [`marker::ArtifactFuture`] in the `Pending` state.
//! 4. A worker runs the compiler, attaches named [`marker::Artifact`]s, and publishes
//!    `Ready` or `Invalid` exactly once.
//! 5. Callers poll [`marker::AsyncMarker::asset_state`] or block in
//!    [`marker::AsyncMarker::stall_while_pending`].
//!
//! Compiles that may depend on assets that are still being built go through a
//! [`compile::CompilationThread`] instead. Their closures return
//! [`compile::CompileOutcome::Pending`] rather than blocking, and the thread retries them
//! from a low-priority delayed queue.
//!
//! ### Key Features
//!
//! - **Search rules**: [`paths::DirectorySearchRules`] resolve names literal-first, then
//!   against each registered directory in order, preserving `:parameter` suffixes
//! - **Write-once futures**: `Pending -> Ready | Invalid`, with atomically published state
//!   and artifacts written before the state flips
//! - **Retry without blocking**: pending work is requeued, never waited on, inside workers
//! - **Reentrancy guard**: an explicit [`marker::ResolutionContext`] rejects resolving a
//!   marker that is already being resolved further up the same call chain
//! - **Structured failures**: [`exceptions`] carry diagnostic logs and
//!   [`depval::DependencyValidation`] trees that say which sources caused them
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//! use xle_assets::{
//!     compile::{CompilationThread, CompileOutcome},
//!     marker::{ArtifactFuture, AssetState, AsyncMarker},
//!     paths::DirectorySearchRules,
//! };
//!
//! # fn main() -> Result<(), xle_assets::AssetError> {
//! let mut rules = DirectorySearchRules::new();
//! rules.add_search_directory("/project/assets");
//! rules.add_search_directory("/project/fallback");
//! let source = rules.resolve_file("tex.dds");
//!
//! let thread = CompilationThread::new()?;
//! let future = Arc::new(ArtifactFuture::with_initializer(source));
//! thread.push(&future, |future| {
//!     future.set_state(AssetState::Ready);
//!     CompileOutcome::Completed
//! });
//!
//! let state = future.stall_while_pending(Duration::from_secs(5));
//! assert_eq!(state, Some(AssetState::Ready));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - **[`paths`]**: path utilities, the [`paths::FileSystem`] seam and search rules
//! - **[`marker`]**: asset states, futures and the resolution context
//! - **[`compile`]**: task pools, dispatch, the compilation thread and compiler registry
//! - **[`exceptions`]**: the asset failure taxonomy
//! - **[`depval`]**: dependency validation handles and file monitoring
//! - **[`config`]**: TOML configuration
//! - **[`services`]**: the process-wide bundle of pools and registry
//! - **`watch`** (feature `service`): file system watcher feeding dependency validation

pub mod compile;
pub mod config;
pub mod depval;
pub mod error;
pub mod exceptions;
pub mod marker;
pub mod paths;
pub mod services;
#[cfg(test)]
mod tests;
#[cfg(feature = "service")]
pub mod watch;

pub use error::*;
