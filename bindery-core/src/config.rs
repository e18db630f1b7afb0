use crate::address::DEFAULT_COMPRESSION_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the distributed lease protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long an unrefreshed lease stays valid.
    #[serde(with = "duration_secs")]
    pub expiry: Duration,

    /// Default bound on how long `acquire` waits for a contended lease.
    #[serde(with = "duration_secs")]
    pub acquire_timeout: Duration,

    /// Fallback poll interval for waiters that miss a release notification.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
}

impl LockConfig {
    /// The refresh timer period, a quarter of the expiry window.
    pub fn refresh_interval(&self) -> Duration {
        self.expiry / 4
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Engine-level configuration for one catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Store the gzipped form when `compressed / raw <= threshold`.
    pub compression_threshold: f64,

    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            lock: LockConfig::default(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
