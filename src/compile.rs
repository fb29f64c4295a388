//! Background compilation: the shared task pools, one-shot pool dispatch, the retrying
//! [`CompilationThread`], the [`IntermediateCompilers`] registry and its on-disk
//! [`IntermediatesStore`].

pub mod intermediate;
pub mod pool;
pub mod queue;
pub mod store;
pub mod thread;

pub use intermediate::{
    CompileMarker, CompileOperation, CompilerDelegate, CompilerRegistration, IntermediateCompilers,
    LibVersionDesc, SerializedChunk, TargetDesc,
};
pub use pool::{Job, TaskPool, ThreadPool};
pub use queue::{queue_compile_operation, CompileOutcome};
pub use store::{IntermediatesStore, StoredProduct};
pub use thread::{CompilationThread, CompilationThreadStats};
