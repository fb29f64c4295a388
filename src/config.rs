use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::AssetError,
    paths::{default_directory_search_rules, DirectorySearchRules},
};

/// Backoff curve installed for every stall in the process.
static STALL_BACKOFF: Lazy<RwLock<StallBackoff>> = Lazy::new(|| RwLock::new(StallBackoff::default()));

/// Top level configuration, usually read from `xle-assets.toml`.
///
/// Every section and field is optional; missing values take the defaults below.
///
/// ```toml
/// [pools]
/// long_task_threads = 4
///
/// [stall]
/// max_sleep_ms = 50
///
/// [search]
/// base_file = "/project/assets/root.material"
/// directories = ["/project/fallback"]
///
/// [intermediates]
/// store_dir = "/project/.intermediates"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub pools: PoolConfig,
    pub compilation_thread: CompilationThreadConfig,
    pub stall: StallBackoff,
    pub search: SearchConfig,
    pub intermediates: IntermediatesConfig,
}

impl AssetsConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<AssetsConfig, AssetError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read asset config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(AssetsConfig::default());
        }
        let content = read_to_string(path)?;
        AssetsConfig::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<AssetsConfig, AssetError> {
        let config: AssetsConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, AssetError> {
        Ok(toml::to_string(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AssetError> {
        tracing::debug!("Attempting to write asset config to: {:?}", path.as_ref());
        write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Search rules seeded from the `[search]` section: the base file's folder first (when
    /// a base file is set), then the listed directories in order.
    pub fn search_rules(&self) -> DirectorySearchRules {
        let mut rules = match &self.search.base_file {
            Some(base_file) => default_directory_search_rules(base_file),
            None => DirectorySearchRules::new(),
        };
        for dir in self.search.directories.iter() {
            rules.add_search_directory(dir);
        }
        rules
    }

    fn validate(&self) -> Result<(), AssetError> {
        if self.pools.long_task_threads == 0 || self.pools.short_task_threads == 0 {
            return Err(AssetError::Config(
                "thread pools need at least one thread".to_string(),
            ));
        }
        if self.stall.max_sleep_ms < self.stall.sleep_step_ms {
            return Err(AssetError::Config(format!(
                "stall.max_sleep_ms ({}) is smaller than stall.sleep_step_ms ({})",
                self.stall.max_sleep_ms, self.stall.sleep_step_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub long_task_threads: usize,
    pub short_task_threads: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            long_task_threads: 2,
            short_task_threads: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationThreadConfig {
    /// Pause before each item taken from the delayed queue.
    pub delayed_retry_delay_ms: u64,
}

impl Default for CompilationThreadConfig {
    fn default() -> Self {
        CompilationThreadConfig {
            delayed_retry_delay_ms: 1,
        }
    }
}

impl CompilationThreadConfig {
    pub fn delayed_retry_delay(&self) -> Duration {
        Duration::from_millis(self.delayed_retry_delay_ms)
    }
}

/// Wait curve for `stall_while_pending`: `yield_iterations` polls that only yield, then
/// sleeps growing by `sleep_step_ms` per poll up to `max_sleep_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StallBackoff {
    pub yield_iterations: u32,
    pub sleep_step_ms: u64,
    pub max_sleep_ms: u64,
}

impl Default for StallBackoff {
    fn default() -> Self {
        StallBackoff {
            yield_iterations: 16,
            sleep_step_ms: 1,
            max_sleep_ms: 100,
        }
    }
}

impl StallBackoff {
    /// `None` means yield instead of sleeping.
    pub fn delay_for(&self, iteration: u32) -> Option<Duration> {
        if iteration < self.yield_iterations {
            return None;
        }
        let steps = u64::from(iteration - self.yield_iterations) + 1;
        let millis = steps
            .saturating_mul(self.sleep_step_ms)
            .min(self.max_sleep_ms);
        Some(Duration::from_millis(millis))
    }

    pub fn global() -> StallBackoff {
        *STALL_BACKOFF.read()
    }

    pub fn install_global(self) {
        tracing::debug!("Installing stall backoff {:?}", self);
        *STALL_BACKOFF.write() = self;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_file: Option<String>,
    pub directories: Vec<String>,
}

/// Compile products are only cached on disk when `store_dir` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntermediatesConfig {
    pub store_dir: Option<PathBuf>,
}
