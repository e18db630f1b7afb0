use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors surfaced by the catalog engine.
///
/// Domain errors indicate a caller logic error or a legitimate conflict and
/// are never retried internally. Lock and storage errors are infrastructure
/// failures; the lease is always released before one is surfaced.
#[derive(Debug, Error)]
pub enum CatalogError {
    // --- domain ---
    #[error("duplicate version {version} for bundle '{bundle}'")]
    DuplicateVersion { bundle: String, version: u64 },

    #[error("version conflict for bundle '{bundle}': expected {expected}, got {requested}")]
    VersionConflict {
        bundle: String,
        expected: u64,
        requested: u64,
    },

    #[error(
        "version {version} of bundle '{bundle}' is still referenced by distribution '{distribution}'"
    )]
    ReferencedVersionDelete {
        bundle: String,
        version: u64,
        distribution: String,
    },

    #[error("unknown bundle '{0}'")]
    UnknownBundle(String),

    #[error("unknown version {version} for bundle '{bundle}'")]
    UnknownVersion { bundle: String, version: u64 },

    #[error("unknown distribution '{distribution}' for bundle '{bundle}'")]
    UnknownDistribution {
        bundle: String,
        distribution: String,
    },

    #[error("invalid flavor rule '{0}'")]
    InvalidFlavorRule(String),

    #[error("invalid bundle name '{0}'")]
    InvalidBundleName(String),

    // --- lock ---
    #[error("timed out acquiring lock '{key}' after {waited_ms}ms")]
    AcquireTimeout { key: String, waited_ms: u64 },

    #[error("lock '{0}' was stolen by another holder")]
    LockStolen(String),

    #[error("failed to refresh lock '{0}'")]
    RefreshFailed(String),

    // --- storage / infrastructure ---
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("lock backend error: {0}")]
    LockBackend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CatalogError {
    /// Domain-validation failures; surfaced verbatim, never auto-retried.
    pub fn is_domain_error(&self) -> bool {
        matches!(
            self,
            CatalogError::DuplicateVersion { .. }
                | CatalogError::VersionConflict { .. }
                | CatalogError::ReferencedVersionDelete { .. }
                | CatalogError::UnknownBundle(_)
                | CatalogError::UnknownVersion { .. }
                | CatalogError::UnknownDistribution { .. }
                | CatalogError::InvalidFlavorRule(_)
                | CatalogError::InvalidBundleName(_)
        )
    }

    /// Whether the caller may reasonably retry the same call.
    ///
    /// Acquire timeouts are retryable; `LockStolen` is not, because the
    /// durability of the just-completed mutation is uncertain and the caller
    /// must re-verify index state first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::AcquireTimeout { .. })
    }
}

impl From<redis::RedisError> for CatalogError {
    fn from(error: redis::RedisError) -> Self {
        CatalogError::LockBackend(error.to_string())
    }
}
