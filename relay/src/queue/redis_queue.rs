//! Redis-backed message queue.
//!
//! Layout per queue name `q`:
//!
//! - `q:seq`      message id counter
//! - `q:ready`    list of visible message ids
//! - `q:inflight` sorted set of leased ids scored by lease deadline (ms)
//! - `q:bodies`   hash id -> JSON payload
//! - `q:receives` hash id -> receive count
//! - `q:dead`     list of dead-lettered JSON payloads
//!
//! Receiving runs one Lua script so reclaiming expired leases and leasing
//! new ones happen atomically on the server.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{parse_handle, Leased, MessageQueue, QueueConfig, QueueError, ReceiptHandle};

/// Interval between polls while a receive is waiting for messages.
const RECEIVE_POLL_STEP: Duration = Duration::from_millis(250);

/// Reclaims expired leases, then leases up to ARGV[3] messages.
///
/// Returns a flat array of `id, receive_count, body` triples.
const RECEIVE_SCRIPT: &str = r"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[2], id)
  local receives = tonumber(redis.call('HGET', KEYS[4], id) or '0')
  if receives >= tonumber(ARGV[4]) then
    local body = redis.call('HGET', KEYS[3], id)
    if body then
      redis.call('RPUSH', KEYS[5], body)
    end
    redis.call('HDEL', KEYS[3], id)
    redis.call('HDEL', KEYS[4], id)
  else
    redis.call('RPUSH', KEYS[1], id)
  end
end
local out = {}
for _ = 1, tonumber(ARGV[3]) do
  local id = redis.call('LPOP', KEYS[1])
  if not id then
    break
  end
  local body = redis.call('HGET', KEYS[3], id)
  if body then
    local receives = redis.call('HINCRBY', KEYS[4], id, 1)
    redis.call('ZADD', KEYS[2], tonumber(ARGV[1]) + tonumber(ARGV[2]), id)
    table.insert(out, id)
    table.insert(out, tostring(receives))
    table.insert(out, body)
  end
end
return out
";

/// Redis key names for one queue.
#[derive(Debug, Clone)]
struct QueueKeys {
    seq: String,
    ready: String,
    inflight: String,
    bodies: String,
    receives: String,
    dead: String,
}

impl QueueKeys {
    fn new(name: &str) -> Self {
        Self {
            seq: format!("{name}:seq"),
            ready: format!("{name}:ready"),
            inflight: format!("{name}:inflight"),
            bodies: format!("{name}:bodies"),
            receives: format!("{name}:receives"),
            dead: format!("{name}:dead"),
        }
    }
}

/// Redis-backed queue with lease-based delivery.
#[derive(Clone)]
pub struct RedisQueue<T> {
    conn: ConnectionManager,
    config: QueueConfig,
    keys: QueueKeys,
    receive_script: Script,
    _payload: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for RedisQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueue")
            .field("connection", &"ConnectionManager")
            .field("name", &self.config.name)
            .finish()
    }
}

fn transport(e: redis::RedisError) -> QueueError {
    QueueError::Transport(e.to_string())
}

impl<T> RedisQueue<T> {
    /// Connects to Redis and creates the queue handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn connect(redis_url: &str, config: QueueConfig) -> Result<Self, QueueError> {
        info!(queue = %config.name, "Connecting to Redis queue");

        let client = redis::Client::open(redis_url).map_err(transport)?;
        let conn = ConnectionManager::new(client).await.map_err(transport)?;

        info!(queue = %config.name, "Connected to Redis queue");

        Ok(Self {
            conn,
            keys: QueueKeys::new(&config.name),
            config,
            receive_script: Script::new(RECEIVE_SCRIPT),
            _payload: PhantomData,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns the number of dead-lettered messages.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis fails.
    pub async fn dead_letter_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(&self.keys.dead).await.map_err(transport)?;
        Ok(len)
    }

    async fn lease_once(&self, max_messages: usize) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn.clone();
        let visibility_ms = u64::try_from(self.config.visibility_timeout.as_millis()).unwrap_or(u64::MAX);

        let flat: Vec<String> = self
            .receive_script
            .key(&self.keys.ready)
            .key(&self.keys.inflight)
            .key(&self.keys.bodies)
            .key(&self.keys.receives)
            .key(&self.keys.dead)
            .arg(Utc::now().timestamp_millis())
            .arg(visibility_ms)
            .arg(max_messages)
            .arg(self.config.max_receive_count)
            .invoke_async(&mut conn)
            .await
            .map_err(transport)?;

        Ok(flat)
    }
}

impl<T: DeserializeOwned> RedisQueue<T> {
    fn decode(flat: &[String]) -> Vec<Leased<T>> {
        let mut leased = Vec::with_capacity(flat.len() / 3);
        for triple in flat.chunks_exact(3) {
            let [id, receives, body] = triple else {
                continue;
            };
            match serde_json::from_str::<T>(body) {
                Ok(payload) => leased.push(Leased {
                    payload,
                    handle: ReceiptHandle(id.clone()),
                    receive_count: receives.parse().unwrap_or(1),
                }),
                // Left leased so it expires and eventually dead-letters.
                Err(e) => warn!(message_id = %id, error = %e, "Undecodable queue message"),
            }
        }
        leased
    }
}

#[async_trait]
impl<T> MessageQueue<T> for RedisQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn send(&self, payload: &T) -> Result<(), QueueError> {
        let body =
            serde_json::to_string(payload).map_err(|e| QueueError::Serialization(e.to_string()))?;

        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(&self.keys.seq, 1).await.map_err(transport)?;

        let _: () = redis::pipe()
            .atomic()
            .hset(&self.keys.bodies, id, body)
            .ignore()
            .rpush(&self.keys.ready, id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(transport)?;

        debug!(queue = %self.config.name, message_id = id, "Message enqueued");
        Ok(())
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<Leased<T>>, QueueError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + self.config.receive_wait;
        loop {
            let flat = self.lease_once(max_messages).await?;
            if !flat.is_empty() {
                return Ok(Self::decode(&flat));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(RECEIVE_POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn delete(&self, handle: &ReceiptHandle) -> Result<(), QueueError> {
        let id = parse_handle(handle)?;
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .zrem(&self.keys.inflight, id)
            .ignore()
            .hdel(&self.keys.bodies, id)
            .ignore()
            .hdel(&self.keys.receives, id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(transport)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keys() {
        let keys = QueueKeys::new("scan-events");
        assert_eq!(keys.seq, "scan-events:seq");
        assert_eq!(keys.ready, "scan-events:ready");
        assert_eq!(keys.inflight, "scan-events:inflight");
        assert_eq!(keys.bodies, "scan-events:bodies");
        assert_eq!(keys.receives, "scan-events:receives");
        assert_eq!(keys.dead, "scan-events:dead");
    }

    #[test]
    fn test_decode_triples() {
        let flat = vec![
            "4".to_string(),
            "1".to_string(),
            "10".to_string(),
            "5".to_string(),
            "3".to_string(),
            "not json".to_string(),
            "6".to_string(),
            "2".to_string(),
            "12".to_string(),
        ];

        let leased = RedisQueue::<u32>::decode(&flat);
        assert_eq!(leased.len(), 2);
        assert_eq!(leased[0].payload, 10);
        assert_eq!(leased[0].handle, ReceiptHandle("4".to_string()));
        assert_eq!(leased[0].receive_count, 1);
        assert_eq!(leased[1].payload, 12);
        assert_eq!(leased[1].receive_count, 2);
    }

    #[test]
    fn test_decode_ignores_partial_triple() {
        let flat = vec!["1".to_string(), "1".to_string()];
        assert!(RedisQueue::<u32>::decode(&flat).is_empty());
    }
}
