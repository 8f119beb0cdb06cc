use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use imotscrape_coordination::{keys, Store};
use imotscrape_core::DomainBucket;
use tracing::{debug, warn};

/// Per-domain token-bucket rate limiter backed by the Coordination Store
/// (§4.2). Grounded in `original_source/resilience/redis_rate_limiter.py`:
/// same key layout, same fail-open contract, same `60/rate` blocking wait.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    rate_limits: HashMap<String, f64>,
    default_rate_per_minute: f64,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn Store>,
        rate_limits: HashMap<String, f64>,
        default_rate_per_minute: f64,
    ) -> Self {
        Self {
            store,
            rate_limits,
            default_rate_per_minute,
        }
    }

    fn rate_for(&self, domain: &str) -> f64 {
        self.rate_limits
            .get(domain)
            .copied()
            .unwrap_or(self.default_rate_per_minute)
    }

    fn now_unix() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    async fn try_acquire(&self, domain: &str, rate: f64, max_tokens: f64) -> bool {
        let tokens_key = keys::ratelimit_tokens(domain);
        let last_update_key = keys::ratelimit_last_update(domain);
        match self
            .store
            .acquire_token(&tokens_key, &last_update_key, rate, max_tokens, Self::now_unix())
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(domain, error = %e, "coordination store error acquiring token, allowing request");
                true
            }
        }
    }

    /// `Acquire(domain, blocking)` (§4.2). Bucket size equals the domain's
    /// rate, matching the donor source's `max_tokens = rate`.
    pub async fn acquire(&self, domain: &str, blocking: bool) -> bool {
        if domain.is_empty() {
            return true;
        }

        let rate = self.rate_for(domain);
        let max_tokens = rate;

        loop {
            if self.try_acquire(domain, rate, max_tokens).await {
                return true;
            }
            if !blocking {
                return false;
            }
            let wait = std::time::Duration::from_secs_f64(60.0 / rate);
            debug!(domain, wait_secs = wait.as_secs_f64(), "rate limited, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Bulk or single-domain reset (§4.2a).
    pub async fn reset(&self, domain: Option<&str>) {
        match domain {
            Some(domain) => {
                let tokens_key = keys::ratelimit_tokens(domain);
                let last_update_key = keys::ratelimit_last_update(domain);
                if let Err(e) = self
                    .store
                    .delete(&[tokens_key.as_str(), last_update_key.as_str()])
                    .await
                {
                    warn!(domain, error = %e, "error resetting rate limiter");
                } else {
                    tracing::info!(domain, "rate limiter reset");
                }
            }
            None => match self.store.scan_match("ratelimit:*").await {
                Ok(key_strs) => {
                    let refs: Vec<&str> = key_strs.iter().map(|s| s.as_str()).collect();
                    if let Err(e) = self.store.delete(&refs).await {
                        warn!(error = %e, "error resetting all rate limiters");
                    } else {
                        tracing::info!(count = refs.len(), "reset all rate limiters");
                    }
                }
                Err(e) => warn!(error = %e, "error scanning rate limiter keys"),
            },
        }
    }

    /// `get_stats(domain)` (§4.2a) — current token count with refill applied.
    pub async fn get_stats(&self, domain: &str) -> DomainBucket {
        let rate = self.rate_for(domain);
        let max_tokens = rate;
        let tokens_key = keys::ratelimit_tokens(domain);
        let last_update_key = keys::ratelimit_last_update(domain);

        let tokens_raw = self.store.get(&tokens_key).await.ok().flatten();
        let last_update_raw = self.store.get(&last_update_key).await.ok().flatten();

        let (tokens, last_update) = match (tokens_raw, last_update_raw) {
            (Some(t), Some(u)) => {
                let t: f64 = t.parse().unwrap_or(max_tokens);
                let u: f64 = u.parse().unwrap_or_else(|_| Self::now_unix());
                let now = Self::now_unix();
                let elapsed = (now - u).max(0.0);
                let refilled = (t + elapsed * (rate / 60.0)).min(max_tokens);
                (refilled, u)
            }
            _ => (max_tokens, Self::now_unix()),
        };

        let last_refill_at = chrono::DateTime::from_timestamp(last_update as i64, 0)
            .unwrap_or_else(chrono::Utc::now);

        DomainBucket {
            domain: domain.to_string(),
            tokens,
            last_refill_at,
            rate_per_minute: rate,
            burst: max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imotscrape_coordination::FakeStore;

    fn limiter(rate: f64) -> RateLimiter {
        let mut limits = HashMap::new();
        limits.insert("imot.bg".to_string(), rate);
        RateLimiter::new(Arc::new(FakeStore::new()), limits, 10.0)
    }

    #[tokio::test]
    async fn burst_of_rate_tokens_is_allowed_then_blocked() {
        let limiter = limiter(5.0);
        for _ in 0..5 {
            assert!(limiter.acquire("imot.bg", false).await);
        }
        assert!(!limiter.acquire("imot.bg", false).await);
    }

    #[tokio::test]
    async fn unknown_domain_falls_back_to_default_rate() {
        let limiter = limiter(5.0);
        for _ in 0..10 {
            assert!(limiter.acquire("unknown.example", false).await);
        }
        assert!(!limiter.acquire("unknown.example", false).await);
    }

    #[tokio::test]
    async fn empty_domain_always_allowed() {
        let limiter = limiter(1.0);
        for _ in 0..100 {
            assert!(limiter.acquire("", false).await);
        }
    }
}
