use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::store::Store;

/// In-memory Coordination Store double used by scenario tests (S1–S6) so
/// they don't require a live Redis, mirroring how the donor's own test
/// suite avoids a live Postgres outside the storage crate.
#[derive(Default)]
pub struct FakeStore {
    data: DashMap<String, String>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, _ttl_seconds: u64) -> Result<(), StoreError> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn setnx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        if self.data.contains_key(key) {
            return Ok(false);
        }
        self.data.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| "0".to_string());
        let next = entry.parse::<i64>().unwrap_or(0) + 1;
        *entry = next.to_string();
        Ok(next)
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.data.remove(*key);
        }
        Ok(())
    }

    async fn pipeline_set(&self, pairs: &[(&str, &str)]) -> Result<(), StoreError> {
        for (key, value) in pairs {
            self.data.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let prefix = pattern.trim_end_matches('*');
        let suffix = if pattern.starts_with('*') { pattern.trim_start_matches('*') } else { "" };
        Ok(self
            .data
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix) && (suffix.is_empty() || k.ends_with(suffix)))
            .collect())
    }

    async fn acquire_token(
        &self,
        tokens_key: &str,
        last_update_key: &str,
        rate_per_minute: f64,
        max_tokens: f64,
        now_unix: f64,
    ) -> Result<bool, StoreError> {
        let tokens = self
            .data
            .get(tokens_key)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(max_tokens);
        let last_update = self
            .data
            .get(last_update_key)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(now_unix);

        let elapsed = (now_unix - last_update).max(0.0);
        let refill = elapsed * (rate_per_minute / 60.0);
        let mut tokens = (tokens + refill).min(max_tokens);

        let acquired = tokens >= 1.0;
        if acquired {
            tokens -= 1.0;
        }
        self.data.insert(tokens_key.to_string(), tokens.to_string());
        self.data.insert(last_update_key.to_string(), now_unix.to_string());
        Ok(acquired)
    }
}
