use async_trait::async_trait;

use crate::error::StoreError;

/// Coordination Store client (L0). Backs the token bucket, circuit breaker,
/// and scrape-job progress records. Implementations must be `Clone`-cheap
/// (the Redis implementation wraps a `ConnectionManager`) since every
/// resilience component and every scrape worker holds one.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    /// Sets the key only if absent; returns whether the value was written.
    async fn setnx(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Atomic post-increment; returns the value after incrementing.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    async fn delete(&self, keys: &[&str]) -> Result<(), StoreError>;

    /// Writes every pair in one round trip (a `redis::pipe()`), the same
    /// grouping the circuit breaker's multi-key transitions use in
    /// `original_source/resilience/redis_circuit_breaker.py`. Not a
    /// transaction: concurrent readers may observe a partial write, matching
    /// the donor behavior this crate reproduces.
    async fn pipeline_set(&self, pairs: &[(&str, &str)]) -> Result<(), StoreError>;

    /// `SCAN`-based enumeration of keys matching a glob pattern (e.g.
    /// `"circuit:*:state"`).
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Atomic token-bucket acquisition (§4.2), executed as a single
    /// server-side script so concurrent workers never race the
    /// read-refill-consume sequence.
    async fn acquire_token(
        &self,
        tokens_key: &str,
        last_update_key: &str,
        rate_per_minute: f64,
        max_tokens: f64,
        now_unix: f64,
    ) -> Result<bool, StoreError>;
}

pub mod redis_store {
    use super::*;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    /// `LUA_ACQUIRE_TOKEN` in `original_source/resilience/redis_rate_limiter.py`,
    /// ported verbatim in algorithmic shape.
    const ACQUIRE_TOKEN_SCRIPT: &str = r#"
local tokens_key = KEYS[1]
local last_update_key = KEYS[2]
local rate = tonumber(ARGV[1])
local max_tokens = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local tokens = tonumber(redis.call('GET', tokens_key) or max_tokens)
local last_update = tonumber(redis.call('GET', last_update_key) or now)

local elapsed = now - last_update
local refill = elapsed * (rate / 60.0)
tokens = math.min(max_tokens, tokens + refill)

if tokens >= 1 then
    tokens = tokens - 1
    redis.call('SET', tokens_key, tokens)
    redis.call('SET', last_update_key, now)
    return 1
else
    redis.call('SET', tokens_key, tokens)
    redis.call('SET', last_update_key, now)
    return 0
end
"#;

    /// Redis-backed Coordination Store. Cheap to clone: `ConnectionManager`
    /// multiplexes over a single connection and reconnects transparently.
    #[derive(Clone)]
    pub struct RedisStore {
        conn: ConnectionManager,
        acquire_token_script: std::sync::Arc<redis::Script>,
    }

    impl RedisStore {
        pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
            let client = redis::Client::open(redis_url)?;
            let conn = client.get_connection_manager().await?;
            Ok(Self {
                conn,
                acquire_token_script: std::sync::Arc::new(redis::Script::new(ACQUIRE_TOKEN_SCRIPT)),
            })
        }
    }

    #[async_trait]
    impl Store for RedisStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let mut conn = self.conn.clone();
            Ok(conn.get(key).await?)
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            let mut conn = self.conn.clone();
            conn.set(key, value).await?;
            Ok(())
        }

        async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
            let mut conn = self.conn.clone();
            conn.set_ex(key, value, ttl_seconds).await?;
            Ok(())
        }

        async fn setnx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
            let mut conn = self.conn.clone();
            Ok(conn.set_nx(key, value).await?)
        }

        async fn incr(&self, key: &str) -> Result<i64, StoreError> {
            let mut conn = self.conn.clone();
            Ok(conn.incr(key, 1).await?)
        }

        async fn delete(&self, keys: &[&str]) -> Result<(), StoreError> {
            if keys.is_empty() {
                return Ok(());
            }
            let mut conn = self.conn.clone();
            conn.del(keys).await?;
            Ok(())
        }

        async fn pipeline_set(&self, pairs: &[(&str, &str)]) -> Result<(), StoreError> {
            if pairs.is_empty() {
                return Ok(());
            }
            let mut conn = self.conn.clone();
            let mut pipe = redis::pipe();
            for (key, value) in pairs {
                pipe.set(*key, *value).ignore();
            }
            pipe.query_async::<_, ()>(&mut conn).await?;
            Ok(())
        }

        async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
            let mut conn = self.conn.clone();
            let mut cursor: u64 = 0;
            let mut found = Vec::new();
            loop {
                let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn)
                    .await?;
                found.extend(keys);
                if next_cursor == 0 {
                    break;
                }
                cursor = next_cursor;
            }
            Ok(found)
        }

        async fn acquire_token(
            &self,
            tokens_key: &str,
            last_update_key: &str,
            rate_per_minute: f64,
            max_tokens: f64,
            now_unix: f64,
        ) -> Result<bool, StoreError> {
            let mut conn = self.conn.clone();
            let result: i32 = self
                .acquire_token_script
                .key(tokens_key)
                .key(last_update_key)
                .arg(rate_per_minute)
                .arg(max_tokens)
                .arg(now_unix)
                .invoke_async(&mut conn)
                .await?;
            Ok(result == 1)
        }
    }
}

pub use redis_store::RedisStore;
