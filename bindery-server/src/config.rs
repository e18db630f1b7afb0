use bindery_core::{CatalogConfig, CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Catalog id, also the lease key for mutations.
    pub catalog: String,

    /// Root directory for catalog storage.
    pub root: PathBuf,

    pub bind_addr: String,

    pub lock: LockBackendConfig,

    #[serde(default)]
    pub engine: CatalogConfig,

    /// Flavor definitions applied to every publish, flavor name to rule texts
    /// (`"+ glob"` / `"- glob"`).
    #[serde(default)]
    pub flavors: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockBackendConfig {
    pub backend: LockBackendKind,
    #[serde(default)]
    pub namespace: Option<String>,
    pub redis: Option<RedisConfig>,
}

impl LockBackendConfig {
    pub fn namespace_or_default(&self) -> &str {
        self.namespace
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or("bindery")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackendKind {
    /// In-process locking; single-server deployments only.
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("BINDERY"))
            .build()
            .map_err(|e| CatalogError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| CatalogError::Config(e.to_string()))?;

        Ok(config)
    }
}
