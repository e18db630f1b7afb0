//! Distributed locking for catalog mutations.
//!
//! [`LockBackend`] is the raw conditional key-value store plus a pub/sub
//! primitive; [`LockCoordinator`] layers the lease protocol on top: expiry,
//! background refresh, theft detection, and release notification.

pub mod coordinator;
pub mod memory;
pub mod redis;

pub use coordinator::{LeaseGuard, LeaseHandle, LockCoordinator};
pub use memory::MemoryLockBackend;
pub use redis::RedisLockBackend;

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A live subscription to a notification channel.
///
/// Dropping the subscription unregisters it; backends stop forwarding once
/// the receiver is gone.
pub struct Subscription {
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Wait for the next message; `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Atomically set `key` to `value` when its current value equals
    /// `expected` (`None` = key must be absent). Returns whether the write
    /// happened.
    async fn conditional_put(&self, key: &str, value: &str, expected: Option<&str>)
    -> Result<bool>;

    /// Atomically delete `key` when its current value equals `expected`.
    async fn conditional_delete(&self, key: &str, expected: &str) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}
