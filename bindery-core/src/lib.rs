//! Bindery Core - Versioned, content-addressable bundle catalog engine
//!
//! Publishers push directory trees ("bundles") into a catalog; each push
//! becomes an immutable numbered version described by a manifest. Named
//! distributions tag versions, flavors partition a bundle's files into
//! named subsets, and objects are stored content-addressed and deduplicated.
//! Catalog mutations across independent processes are serialized by a
//! distributed lease with expiry, refresh, and theft detection.

pub mod address;
pub mod archive;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod flavor;
pub mod index;
pub mod layout;
pub mod lock;
pub mod manifest;
pub mod operations;
pub mod storage;

pub use address::{ContentAddresser, ImportedObject, ObjectFormat, ObjectRecord, compute_hash};
pub use archive::ArchiveBuilder;
pub use config::{CatalogConfig, LockConfig};
pub use engine::CatalogEngine;
pub use error::{CatalogError, Result};
pub use filter::{PathFilter, Rule, RuleAction};
pub use flavor::FlavorSpec;
pub use index::{BundleInfo, CatalogIndex};
pub use lock::{LeaseGuard, LeaseHandle, LockBackend, LockCoordinator, MemoryLockBackend, RedisLockBackend};
pub use manifest::{FileEntry, FormatInfo, Manifest};
pub use operations::{
    CleanResult, DeleteDistributionRequest, PublishBundleRequest, PublishBundleResult,
    UpdateDistributionRequest, shadow_name,
};
pub use storage::{FsStorage, MemoryStorage, PutOptions, StorageBackend, StorageMeta};
