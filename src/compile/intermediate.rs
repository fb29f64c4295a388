//! Registry of intermediate compilers.
//!
//! A compiler is registered with a regex over asset initializers and the list of target
//! type codes it can produce. [`IntermediateCompilers::prepare`] picks the first matching
//! compiler and returns a [`CompileMarker`]; invoking the marker runs the compile on the
//! long-task pool and hands back an [`ArtifactFuture`].
//!
//! With an [`IntermediatesStore`] attached, every compile writes all of its targets to the
//! store, and [`CompileMarker::existing_asset`] serves later requests from it while the
//! recorded sources are unchanged.

use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use super::{
    pool::TaskPool,
    queue::{queue_compile_operation, record_failure},
    store::IntermediatesStore,
};
use crate::{
    depval::{dep_val_sys, DependencyValidation, DependentFileState},
    error::AssetError,
    exceptions::{ConstructionError, ConstructionReason},
    marker::{as_blob, Artifact, ArtifactFuture, AssetState, Blob},
    paths::split_parameters,
};

/// Version of the library that provides a compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibVersionDesc {
    pub version_string: String,
    pub build_date_string: String,
}

/// One output a compile operation can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDesc {
    pub type_code: u64,
    pub name: String,
}

/// A named piece of serialized output; each becomes one artifact.
#[derive(Debug, Clone)]
pub struct SerializedChunk {
    pub name: String,
    pub type_code: u64,
    pub version: u32,
    pub data: Blob,
}

/// Produced by a compiler delegate for a single initializer.
pub trait CompileOperation: Send {
    fn targets(&self) -> Vec<TargetDesc>;

    fn serialize_target(&self, index: usize) -> Result<Vec<SerializedChunk>, AssetError>;

    /// Source files the output depends on.
    fn dependencies(&self) -> Vec<DependentFileState>;
}

pub type CompilerDelegate =
    Arc<dyn Fn(&str) -> Result<Box<dyn CompileOperation>, AssetError> + Send + Sync>;

/// Handle returned by [`IntermediateCompilers::register_compiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompilerRegistration(u64);

impl CompilerRegistration {
    pub fn id(&self) -> u64 {
        self.0
    }
}

struct RegisteredCompiler {
    registration: CompilerRegistration,
    name: String,
    filter: Regex,
    output_types: Vec<u64>,
    src_version: LibVersionDesc,
    delegate: CompilerDelegate,
}

/// A compile that has been matched to a compiler but not started.
pub trait CompileMarker: Send + Sync {
    /// Start the compile on the long-task pool.
    fn invoke_compile(&self) -> Arc<ArtifactFuture>;

    /// A `Ready` future built from the intermediates store, if it holds an up to date
    /// product for this request. Always `None` without a store.
    fn existing_asset(&self) -> Option<Arc<ArtifactFuture>>;

    fn initializer(&self) -> &str;
}

pub struct IntermediateCompilers {
    compilers: Mutex<Vec<Arc<RegisteredCompiler>>>,
    next_id: AtomicU64,
    pool: Arc<dyn TaskPool>,
    store: Option<Arc<IntermediatesStore>>,
}

impl IntermediateCompilers {
    pub fn new(pool: Arc<dyn TaskPool>) -> Self {
        IntermediateCompilers {
            compilers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            pool,
            store: None,
        }
    }

    pub fn with_store(pool: Arc<dyn TaskPool>, store: Arc<IntermediatesStore>) -> Self {
        IntermediateCompilers {
            store: Some(store),
            ..IntermediateCompilers::new(pool)
        }
    }

    pub fn store(&self) -> Option<&Arc<IntermediatesStore>> {
        self.store.as_ref()
    }

    /// Register `delegate` for every initializer fully matched by `filter`. Matching
    /// ignores case.
    ///
    /// Compilers are consulted in registration order.
    pub fn register_compiler<F>(
        &self,
        filter: &str,
        output_types: &[u64],
        name: &str,
        src_version: LibVersionDesc,
        delegate: F,
    ) -> Result<CompilerRegistration, AssetError>
    where
        F: Fn(&str) -> Result<Box<dyn CompileOperation>, AssetError> + Send + Sync + 'static,
    {
        let filter = RegexBuilder::new(&format!("^(?:{filter})$"))
            .case_insensitive(true)
            .build()?;
        let registration = CompilerRegistration(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            "Registered compiler '{}' ({}) for {:?}",
            name,
            registration.id(),
            filter.as_str()
        );
        self.compilers.lock().push(Arc::new(RegisteredCompiler {
            registration,
            name: name.to_string(),
            filter,
            output_types: output_types.to_vec(),
            src_version,
            delegate: Arc::new(delegate),
        }));
        Ok(registration)
    }

    /// Returns false if nothing was registered under `registration`.
    pub fn deregister_compiler(&self, registration: CompilerRegistration) -> bool {
        let mut compilers = self.compilers.lock();
        let before = compilers.len();
        compilers.retain(|c| c.registration != registration);
        before != compilers.len()
    }

    /// Name and version of every registered compiler, in registration order.
    pub fn registered_compilers(&self) -> Vec<(CompilerRegistration, String, LibVersionDesc)> {
        self.compilers
            .lock()
            .iter()
            .map(|c| (c.registration, c.name.clone(), c.src_version.clone()))
            .collect()
    }

    pub fn prepare(
        &self,
        type_code: u64,
        initializers: &[&str],
    ) -> Option<Arc<dyn CompileMarker>> {
        let first = initializers.first()?;
        let compilers = self.compilers.lock();
        let compiler = compilers
            .iter()
            .find(|c| c.output_types.contains(&type_code) && c.filter.is_match(first))?;
        let marker: Arc<dyn CompileMarker> = Arc::new(Marker {
            request_name: first.to_string(),
            type_code,
            compiler: Arc::downgrade(compiler),
            pool: Arc::clone(&self.pool),
            store: self.store.clone(),
        });
        Some(marker)
    }
}

impl fmt::Debug for IntermediateCompilers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntermediateCompilers")
            .field("compilers", &self.compilers.lock().len())
            .field("pool_workers", &self.pool.worker_count())
            .field("store", &self.store.as_ref().map(|store| store.root()))
            .finish()
    }
}

struct Marker {
    request_name: String,
    type_code: u64,
    compiler: Weak<RegisteredCompiler>,
    pool: Arc<dyn TaskPool>,
    store: Option<Arc<IntermediatesStore>>,
}

impl CompileMarker for Marker {
    fn invoke_compile(&self) -> Arc<ArtifactFuture> {
        let future = Arc::new(ArtifactFuture::with_initializer(self.request_name.clone()));
        let compiler = self.compiler.clone();
        let request_name = self.request_name.clone();
        let type_code = self.type_code;
        let store = self.store.clone();

        let queued = queue_compile_operation(self.pool.as_ref(), &future, move |future| {
            let Some(compiler) = compiler.upgrade() else {
                tracing::debug!("Compiler for {:?} was deregistered", request_name);
                future.set_state(AssetState::Invalid);
                return Ok(());
            };
            perform_compile(&compiler, store.as_deref(), type_code, &request_name, future)
        });
        if let Err(err) = queued {
            record_failure(&future, &err);
        }
        future
    }

    fn existing_asset(&self) -> Option<Arc<ArtifactFuture>> {
        let store = self.store.as_ref()?;
        let compiler = self.compiler.upgrade()?;
        let product = match store.retrieve_compile_products(
            &self.request_name,
            self.type_code,
            &compiler.src_version,
        ) {
            Ok(product) => product?,
            Err(err) => {
                tracing::warn!(
                    "Ignoring unreadable stored products for {:?}: {}",
                    self.request_name,
                    err
                );
                return None;
            }
        };

        let future = Arc::new(ArtifactFuture::with_initializer(self.request_name.clone()));
        let dep_val = make_dep_val(&product.dependencies, &self.request_name);
        for chunk in product.chunks {
            future.add_artifact(chunk.name, Artifact::new(Some(chunk.data), dep_val.clone()));
        }
        future.set_dependency_validation(dep_val);
        future.set_state(AssetState::Ready);
        tracing::debug!(
            "Serving {:?} ({}) from the intermediates store",
            self.request_name,
            product.target_name
        );
        Some(future)
    }

    fn initializer(&self) -> &str {
        &self.request_name
    }
}

fn perform_compile(
    compiler: &RegisteredCompiler,
    store: Option<&IntermediatesStore>,
    type_code: u64,
    initializer: &str,
    future: &ArtifactFuture,
) -> Result<(), AssetError> {
    let mut deps = Vec::new();
    run_compile(compiler, store, type_code, initializer, future, &mut deps).map_err(|err| {
        let dep_val = make_dep_val(&deps, initializer);
        match err {
            AssetError::Pending(pending) => AssetError::Pending(pending),
            AssetError::Construction(e) => {
                ConstructionError::with_dependency(&e, &dep_val).into()
            }
            other => ConstructionError::from_error(&other, dep_val).into(),
        }
    })
}

fn run_compile(
    compiler: &RegisteredCompiler,
    store: Option<&IntermediatesStore>,
    type_code: u64,
    initializer: &str,
    future: &ArtifactFuture,
    deps: &mut Vec<DependentFileState>,
) -> Result<(), AssetError> {
    let operation = (compiler.delegate)(initializer)?;
    *deps = operation.dependencies();

    let targets = operation.targets();
    let Some(index) = targets
        .iter()
        .position(|target| target.type_code == type_code)
    else {
        return Err(ConstructionError::new(
            ConstructionReason::MissingTarget,
            DependencyValidation::default(),
            Some(as_blob(&format!(
                "Could not find target of the requested type in compile operation for ({initializer})"
            ))),
        )
        .into());
    };

    let chunks = match store {
        Some(store) => store_all_targets(
            compiler,
            store,
            operation.as_ref(),
            &targets,
            index,
            initializer,
            deps,
        )?,
        None => operation.serialize_target(index)?,
    };
    let dep_val = make_dep_val(deps, initializer);
    for chunk in chunks {
        future.add_artifact(chunk.name, Artifact::new(Some(chunk.data), dep_val.clone()));
    }
    future.set_dependency_validation(dep_val);
    future.set_state(AssetState::Ready);
    tracing::debug!("Compiler '{}' produced {:?}", compiler.name, initializer);
    Ok(())
}

/// Serialize every target into `store`, returning the chunks of the requested one. A failed
/// write only costs the cache entry.
fn store_all_targets(
    compiler: &RegisteredCompiler,
    store: &IntermediatesStore,
    operation: &dyn CompileOperation,
    targets: &[TargetDesc],
    requested: usize,
    initializer: &str,
    deps: &[DependentFileState],
) -> Result<Vec<SerializedChunk>, AssetError> {
    let mut products = Vec::with_capacity(targets.len());
    for (index, target) in targets.iter().enumerate() {
        products.push((target.clone(), operation.serialize_target(index)?));
    }

    let mut recorded = deps.to_vec();
    let (source, _) = split_parameters(initializer);
    if !source.is_empty() && !recorded.iter().any(|dep| dep.filename == source) {
        recorded.push(dep_val_sys().dependent_file_state(source));
    }
    if let Err(err) =
        store.store_compile_products(initializer, &compiler.src_version, &products, &recorded)
    {
        tracing::warn!("Could not store compile products for {:?}: {}", initializer, err);
    }

    Ok(products.swap_remove(requested).1)
}

fn make_dep_val(deps: &[DependentFileState], initializer: &str) -> DependencyValidation {
    let dep_val = dep_val_sys().make_with_states(deps);
    let (source, _) = split_parameters(initializer);
    if !source.is_empty() {
        dep_val.register_file_dependency(source);
    }
    dep_val
}
