//! On-disk cache of compile products.
//!
//! Each compiled initializer owns a group of files under the store root: one file per
//! serialized chunk, and a `-compileprod` TOML record listing the products by type code,
//! the compiler version that made them and the state of every source file they were built
//! from. The record is written last, so an interrupted store is never read back.
//!
//! A stored product is only returned while every recorded source still matches the state
//! the dependency validation system holds for it.

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use super::intermediate::{LibVersionDesc, SerializedChunk, TargetDesc};
use crate::{
    depval::{dep_val_sys, DependentFileState, DependentFileStatus},
    error::AssetError,
};

const PRODUCTS_SUFFIX: &str = "-compileprod";

#[derive(Debug, Serialize, Deserialize)]
struct CompileProductsRecord {
    compiler_version: LibVersionDesc,
    #[serde(default)]
    products: Vec<ProductRecord>,
    #[serde(default)]
    dependencies: Vec<DependencyRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProductRecord {
    /// Hex, since TOML integers are signed.
    type_code: String,
    target: String,
    #[serde(default)]
    chunks: Vec<ChunkRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    name: String,
    type_code: String,
    version: u32,
    file: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DependencyRecord {
    filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified_ms: Option<i64>,
    status: DependentFileStatus,
}

/// What [`IntermediatesStore::retrieve_compile_products`] hands back for a fresh product.
#[derive(Debug, Clone)]
pub struct StoredProduct {
    pub target_name: String,
    pub chunks: Vec<SerializedChunk>,
    pub dependencies: Vec<DependentFileState>,
}

#[derive(Debug)]
pub struct IntermediatesStore {
    root: PathBuf,
}

impl IntermediatesStore {
    /// A store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(IntermediatesStore { root: root.into() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Base path of the file group belonging to `initializer`.
    ///
    /// `:` becomes `-` and leading separators are dropped, so `/a/b.dae:lod0` maps to
    /// `<root>/a/b.dae-lod0`.
    pub fn intermediate_name(&self, initializer: &str) -> PathBuf {
        let relative = initializer
            .replace(':', "-")
            .replace('\\', "/")
            .trim_start_matches('/')
            .to_string();
        self.root.join(relative)
    }

    /// Write every target's chunks and the products record for `initializer`.
    pub fn store_compile_products(
        &self,
        initializer: &str,
        compiler_version: &LibVersionDesc,
        products: &[(TargetDesc, Vec<SerializedChunk>)],
        dependencies: &[DependentFileState],
    ) -> Result<(), AssetError> {
        let base = self.intermediate_name(initializer);
        if let Some(parent) = base.parent() {
            fs::create_dir_all(parent)?;
        }
        let base_name = file_name_of(&base)?;

        let mut product_records = Vec::with_capacity(products.len());
        for (target, chunks) in products {
            let mut chunk_records = Vec::with_capacity(chunks.len());
            for (index, chunk) in chunks.iter().enumerate() {
                let file = format!("{base_name}-{}-{index}.chunk", sanitize(&target.name));
                fs::write(base.with_file_name(&file), chunk.data.as_slice())?;
                chunk_records.push(ChunkRecord {
                    name: chunk.name.clone(),
                    type_code: format!("{:x}", chunk.type_code),
                    version: chunk.version,
                    file,
                });
            }
            product_records.push(ProductRecord {
                type_code: format!("{:x}", target.type_code),
                target: target.name.clone(),
                chunks: chunk_records,
            });
        }

        let record = CompileProductsRecord {
            compiler_version: compiler_version.clone(),
            products: product_records,
            dependencies: dependencies
                .iter()
                .map(|dep| DependencyRecord {
                    filename: dep.filename.clone(),
                    modified_ms: dep.modification_time.and_then(millis_since_epoch),
                    status: dep.status,
                })
                .collect(),
        };
        let products_path = products_path(&base)?;
        let staging = base.with_file_name(format!("{base_name}{PRODUCTS_SUFFIX}.tmp"));
        fs::write(&staging, toml::to_string(&record)?)?;
        fs::rename(&staging, &products_path)?;
        tracing::debug!("Stored compile products for {:?} at {:?}", initializer, base);
        Ok(())
    }

    /// The stored product of `type_code` for `initializer`, or `None` when nothing was
    /// stored, the compiler version differs, or any recorded source has changed since.
    pub fn retrieve_compile_products(
        &self,
        initializer: &str,
        type_code: u64,
        compiler_version: &LibVersionDesc,
    ) -> Result<Option<StoredProduct>, AssetError> {
        let base = self.intermediate_name(initializer);
        let products_path = products_path(&base)?;
        if !products_path.exists() {
            return Ok(None);
        }
        let record: CompileProductsRecord = toml::from_str(&fs::read_to_string(&products_path)?)?;

        if &record.compiler_version != compiler_version {
            tracing::debug!(
                "Stored products for {:?} came from compiler version {:?}",
                initializer,
                record.compiler_version.version_string
            );
            return Ok(None);
        }
        if let Some(changed) = record.dependencies.iter().find(|dep| is_stale(dep)) {
            tracing::debug!(
                "Stored products for {:?} are stale: {:?} changed",
                initializer,
                changed.filename
            );
            return Ok(None);
        }

        let wanted = format!("{type_code:x}");
        let Some(product) = record.products.iter().find(|p| p.type_code == wanted) else {
            return Ok(None);
        };
        let mut chunks = Vec::with_capacity(product.chunks.len());
        for chunk in product.chunks.iter() {
            let data = match fs::read(base.with_file_name(&chunk.file)) {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!(
                        "Stored chunk {:?} for {:?} is unreadable: {}",
                        chunk.file,
                        initializer,
                        err
                    );
                    return Ok(None);
                }
            };
            chunks.push(SerializedChunk {
                name: chunk.name.clone(),
                type_code: parse_type_code(&chunk.type_code)?,
                version: chunk.version,
                data: Arc::new(data),
            });
        }

        Ok(Some(StoredProduct {
            target_name: product.target.clone(),
            chunks,
            dependencies: record
                .dependencies
                .iter()
                .map(|dep| DependentFileState {
                    filename: dep.filename.clone(),
                    modification_time: dep.modified_ms.and_then(from_millis),
                    status: dep.status,
                })
                .collect(),
        }))
    }
}

fn is_stale(recorded: &DependencyRecord) -> bool {
    let current = dep_val_sys().dependent_file_state(&recorded.filename);
    current.status == DependentFileStatus::Shadowed
        || current.status != recorded.status
        || current.modification_time.and_then(millis_since_epoch) != recorded.modified_ms
}

fn products_path(base: &Path) -> Result<PathBuf, AssetError> {
    Ok(base.with_file_name(format!("{}{PRODUCTS_SUFFIX}", file_name_of(base)?)))
}

fn file_name_of(base: &Path) -> Result<String, AssetError> {
    base.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| AssetError::Io(format!("no intermediate file name for {base:?}")))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .collect()
}

fn parse_type_code(text: &str) -> Result<u64, AssetError> {
    u64::from_str_radix(text, 16)
        .map_err(|e| AssetError::Serialization(format!("bad type code {text:?}: {e}")))
}

fn millis_since_epoch(time: SystemTime) -> Option<i64> {
    let since = time.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(since.as_millis()).ok()
}

fn from_millis(millis: i64) -> Option<SystemTime> {
    let millis = u64::try_from(millis).ok()?;
    UNIX_EPOCH.checked_add(Duration::from_millis(millis))
}
