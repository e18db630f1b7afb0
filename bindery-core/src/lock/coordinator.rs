use super::LockBackend;
use crate::config::LockConfig;
use crate::error::{CatalogError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use ulid::Ulid;

/// Message published on a lease's channel when it is released.
const RELEASE_MESSAGE: &str = "released";

/// Consecutive refresh failures tolerated before the lease is written off.
const MAX_REFRESH_FAILURES: u32 = 3;

/// The lease record stored in the lock backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    token: String,
    expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    fn fresh(token: &str, expiry: Duration) -> Self {
        Self {
            token: token.to_string(),
            expires_at: Utc::now() + expiry,
        }
    }

    fn expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Acquires time-bounded exclusive leases on resource keys.
///
/// State machine per lease: `UNLOCKED -> ACQUIRING -> HELD -> (RELEASED |
/// STOLEN)`. While held, a background task refreshes the record every quarter
/// of the expiry window; a refresh whose compare-and-swap fails means another
/// process reclaimed the lease as expired, and the holder must treat it as
/// stolen.
pub struct LockCoordinator {
    backend: Arc<dyn LockBackend>,
    config: LockConfig,
}

impl LockCoordinator {
    pub fn new(backend: Arc<dyn LockBackend>, config: LockConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> Arc<dyn LockBackend> {
        self.backend.clone()
    }

    pub async fn acquire(&self, key: &str) -> Result<LeaseGuard> {
        self.acquire_timeout(key, self.config.acquire_timeout).await
    }

    /// Acquire the lease for `key`, waiting up to `timeout` for contenders.
    ///
    /// Waiters register on the release channel before re-checking lock state,
    /// so a release between check and subscribe cannot be missed; the poll
    /// interval bounds the wait when a notification is lost anyway.
    pub async fn acquire_timeout(&self, key: &str, timeout: Duration) -> Result<LeaseGuard> {
        let started = tokio::time::Instant::now();
        let deadline = started + timeout;

        let mut sub = self.backend.subscribe(key).await?;
        loop {
            if let Some(guard) = self.try_acquire(key).await? {
                return Ok(guard);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(CatalogError::AcquireTimeout {
                    key: key.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            let wait = std::cmp::min(deadline - now, self.config.poll_interval);
            let _ = tokio::time::timeout(wait, sub.recv()).await;
        }
    }

    /// One acquisition attempt: conditional create, or compare-and-swap
    /// reclaim of an expired record. The CAS is keyed on the existing record
    /// so two reclaimers cannot both succeed.
    async fn try_acquire(&self, key: &str) -> Result<Option<LeaseGuard>> {
        let token = Ulid::new().to_string();
        let record = LeaseRecord::fresh(&token, self.config.expiry);
        let value = serde_json::to_string(&record)?;

        let claimed = match self.backend.get(key).await? {
            None => self.backend.conditional_put(key, &value, None).await?,
            Some(existing) => {
                let reclaimable = match serde_json::from_str::<LeaseRecord>(&existing) {
                    Ok(existing_record) => existing_record.expired(),
                    // an unreadable record cannot be refreshed by anyone
                    Err(_) => true,
                };
                if reclaimable {
                    self.backend
                        .conditional_put(key, &value, Some(&existing))
                        .await?
                } else {
                    false
                }
            }
        };

        if !claimed {
            return Ok(None);
        }

        tracing::debug!("acquired lease on '{}' with token {}", key, token);
        Ok(Some(LeaseGuard::start(
            self.backend.clone(),
            key.to_string(),
            token,
            value,
            self.config.clone(),
        )))
    }
}

struct LeaseShared {
    /// Serialized record as last written by this holder. Refresh and release
    /// both lock this before touching the backend, so a refresh can never
    /// race a release.
    record: Mutex<String>,
    closed: AtomicBool,
    stolen: AtomicBool,
    refresh_failed: AtomicBool,
}

/// Cheap view of a held lease, for theft checks inside a critical section.
#[derive(Clone)]
pub struct LeaseHandle {
    key: String,
    shared: Arc<LeaseShared>,
}

impl LeaseHandle {
    pub fn is_stolen(&self) -> bool {
        self.shared.stolen.load(Ordering::SeqCst)
    }

    /// Fail with `LockStolen` if the lease is no longer safely held.
    pub fn ensure_held(&self) -> Result<()> {
        if self.is_stolen() {
            Err(CatalogError::LockStolen(self.key.clone()))
        } else {
            Ok(())
        }
    }
}

/// A held lease. Scoped resource: dropping the guard cancels the refresh
/// timer and releases the record best-effort, but callers should prefer
/// [`LeaseGuard::release`] to observe theft.
pub struct LeaseGuard {
    backend: Arc<dyn LockBackend>,
    key: String,
    shared: Arc<LeaseShared>,
    refresh: JoinHandle<()>,
    released: bool,
}

impl LeaseGuard {
    fn start(
        backend: Arc<dyn LockBackend>,
        key: String,
        token: String,
        value: String,
        config: LockConfig,
    ) -> Self {
        let shared = Arc::new(LeaseShared {
            record: Mutex::new(value),
            closed: AtomicBool::new(false),
            stolen: AtomicBool::new(false),
            refresh_failed: AtomicBool::new(false),
        });

        let refresh = tokio::spawn(refresh_loop(
            backend.clone(),
            key.clone(),
            token,
            shared.clone(),
            config,
        ));

        Self {
            backend,
            key,
            shared,
            refresh,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handle(&self) -> LeaseHandle {
        LeaseHandle {
            key: self.key.clone(),
            shared: self.shared.clone(),
        }
    }

    pub fn is_stolen(&self) -> bool {
        self.shared.stolen.load(Ordering::SeqCst)
    }

    /// Stop the refresh timer, delete the record keyed on our token, and wake
    /// any waiters.
    ///
    /// Returns `LockStolen` when the record no longer matched (someone
    /// reclaimed the lease), and `RefreshFailed` when the refresh loop gave
    /// up on backend errors, leaving the critical section's durability
    /// uncertain.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;

        // Taking the record mutex first guarantees no refresh write is in
        // flight; setting closed under the lock stops the next tick.
        let current = {
            let record = self.shared.record.lock().await;
            self.shared.closed.store(true, Ordering::SeqCst);
            record.clone()
        };
        self.refresh.abort();
        let _ = (&mut self.refresh).await;

        let deleted = self.backend.conditional_delete(&self.key, &current).await;
        let published = self.backend.publish(&self.key, RELEASE_MESSAGE).await;

        let deleted = deleted?;
        published?;

        if self.shared.stolen.load(Ordering::SeqCst) || !deleted {
            return Err(CatalogError::LockStolen(self.key.clone()));
        }
        if self.shared.refresh_failed.load(Ordering::SeqCst) {
            return Err(CatalogError::RefreshFailed(self.key.clone()));
        }

        tracing::debug!("released lease on '{}'", self.key);
        Ok(())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        self.refresh.abort();
        self.shared.closed.store(true, Ordering::SeqCst);

        let backend = self.backend.clone();
        let key = self.key.clone();
        let shared = self.shared.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let current = shared.record.lock().await.clone();
                let _ = backend.conditional_delete(&key, &current).await;
                let _ = backend.publish(&key, RELEASE_MESSAGE).await;
            });
        }
    }
}

async fn refresh_loop(
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
    shared: Arc<LeaseShared>,
    config: LockConfig,
) {
    let mut interval = tokio::time::interval(config.refresh_interval());
    interval.tick().await; // the first tick completes immediately

    let mut failures = 0u32;
    loop {
        interval.tick().await;

        let mut record = shared.record.lock().await;
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }

        let next = LeaseRecord::fresh(&token, config.expiry);
        let value = match serde_json::to_string(&next) {
            Ok(value) => value,
            Err(error) => {
                tracing::error!("lease '{}': failed to encode record: {}", key, error);
                shared.refresh_failed.store(true, Ordering::SeqCst);
                break;
            }
        };

        match backend
            .conditional_put(&key, &value, Some(record.as_str()))
            .await
        {
            Ok(true) => {
                *record = value;
                failures = 0;
            }
            Ok(false) => {
                // token mismatch: another process reclaimed the lease
                tracing::warn!("lease '{}' stolen: refresh lost its compare-and-swap", key);
                shared.stolen.store(true, Ordering::SeqCst);
                break;
            }
            Err(error) => {
                failures += 1;
                tracing::warn!(
                    "lease '{}': refresh attempt {} failed: {}",
                    key,
                    failures,
                    error
                );
                if failures >= MAX_REFRESH_FAILURES {
                    shared.refresh_failed.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    }
}
