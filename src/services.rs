use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::{
    compile::{CompileMarker, IntermediateCompilers, IntermediatesStore, TaskPool, ThreadPool},
    config::AssetsConfig,
    depval::{dep_val_sys, DependencyValidationSystem},
    error::AssetError,
};

static SERVICES: OnceCell<Arc<Services>> = OnceCell::new();

/// The shared collaborators of the asset system: the two task pools and the compiler
/// registry. One instance is usually installed for the whole process.
pub struct Services {
    long_task_pool: Arc<ThreadPool>,
    short_task_pool: Arc<ThreadPool>,
    intermediate_compilers: IntermediateCompilers,
}

impl Services {
    pub fn new(config: &AssetsConfig) -> Result<Services, AssetError> {
        config.stall.install_global();
        let long_task_pool = Arc::new(ThreadPool::new(
            "long-task",
            config.pools.long_task_threads,
        )?);
        let short_task_pool = Arc::new(ThreadPool::new(
            "short-task",
            config.pools.short_task_threads,
        )?);
        let compiler_pool: Arc<dyn TaskPool> = long_task_pool.clone();
        let intermediate_compilers = match &config.intermediates.store_dir {
            Some(store_dir) => {
                tracing::info!("Caching compile products under {:?}", store_dir);
                IntermediateCompilers::with_store(compiler_pool, IntermediatesStore::new(store_dir))
            }
            None => IntermediateCompilers::new(compiler_pool),
        };
        Ok(Services {
            long_task_pool,
            short_task_pool,
            intermediate_compilers,
        })
    }

    /// Install `services` as the process-wide instance. Fails if one is already installed.
    pub fn install(services: Services) -> Result<Arc<Services>, AssetError> {
        let services = Arc::new(services);
        SERVICES
            .set(services.clone())
            .map_err(|_| AssetError::Config("asset services are already installed".to_string()))?;
        tracing::info!("Asset services installed");
        Ok(services)
    }

    pub fn get() -> Option<Arc<Services>> {
        SERVICES.get().cloned()
    }

    pub fn long_task_pool(&self) -> &ThreadPool {
        &self.long_task_pool
    }

    pub fn short_task_pool(&self) -> &ThreadPool {
        &self.short_task_pool
    }

    pub fn intermediate_compilers(&self) -> &IntermediateCompilers {
        &self.intermediate_compilers
    }

    pub fn dep_val_sys(&self) -> &'static DependencyValidationSystem {
        dep_val_sys()
    }

    /// Find a compiler for `type_code` and the first initializer.
    pub fn begin_compile_operation(
        &self,
        type_code: u64,
        initializers: &[&str],
    ) -> Option<Arc<dyn CompileMarker>> {
        let marker = self.intermediate_compilers.prepare(type_code, initializers);
        if marker.is_none() {
            tracing::debug!(
                "No compiler registered for type {:#x} and {:?}",
                type_code,
                initializers.first()
            );
        }
        marker
    }
}
