use super::{LockBackend, Subscription};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};

/// In-process lock backend for tests: a mutexed map plus broadcast channels.
#[derive(Default)]
pub struct MemoryLockBackend {
    values: Mutex<HashMap<String, String>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .clone()
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn conditional_put(
        &self,
        key: &str,
        value: &str,
        expected: Option<&str>,
    ) -> Result<bool> {
        let mut values = self.values.lock().unwrap();
        let matches = match (values.get(key), expected) {
            (None, None) => true,
            (Some(current), Some(expected)) => current == expected,
            _ => false,
        };
        if matches {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(matches)
    }

    async fn conditional_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut values = self.values.lock().unwrap();
        if values.get(key).map(|v| v.as_str()) == Some(expected) {
            values.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        // send fails only when nobody is subscribed
        let _ = self.sender(channel).send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut source = self.sender(channel).subscribe();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    message = source.recv() => match message {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
