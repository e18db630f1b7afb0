use super::{LockBackend, Subscription};
use crate::error::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::Script;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;

const CAS_PUT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
else
  return 0
end
"#;

const CAS_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
else
  return 0
end
"#;

/// Redis-backed lock store: `SET NX` for creation, Lua scripts for the
/// compare-and-swap paths, redis pub/sub for release notifications.
pub struct RedisLockBackend {
    client: redis::Client,
    conn: ConnectionManager,
    namespace: String,
}

impl RedisLockBackend {
    pub async fn new(url: &str, namespace: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            namespace: namespace.to_string(),
        })
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.namespace, key)
    }

    fn channel_name(&self, channel: &str) -> String {
        format!("{}:release:{}", self.namespace, channel)
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn conditional_put(
        &self,
        key: &str,
        value: &str,
        expected: Option<&str>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        match expected {
            None => {
                let created: Option<String> = redis::cmd("SET")
                    .arg(self.lock_key(key))
                    .arg(value)
                    .arg("NX")
                    .query_async(&mut conn)
                    .await?;
                Ok(created.is_some())
            }
            Some(expected) => {
                let swapped: i64 = Script::new(CAS_PUT)
                    .key(self.lock_key(key))
                    .arg(expected)
                    .arg(value)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(swapped == 1)
            }
        }
    }

    async fn conditional_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(CAS_DELETE)
            .key(self.lock_key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.lock_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("PUBLISH")
            .arg(self.channel_name(channel))
            .arg(message)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(self.channel_name(channel)).await?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    message = stream.next() => match message {
                        Some(message) => {
                            let payload: String = message.get_payload().unwrap_or_default();
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
