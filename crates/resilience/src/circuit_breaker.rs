use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use imotscrape_coordination::{keys, Store};
use imotscrape_core::{BlockKind, CircuitState, DomainCircuit};
use tracing::{info, warn};

/// Coordination-store-backed circuit breaker (§4.3). Authoritative per the
/// resolution in DESIGN.md of spec.md's open question 3; [[LocalCircuitBreaker]]
/// is the degraded construction-time fallback, not a runtime-selectable mode.
///
/// Grounded in `original_source/resilience/redis_circuit_breaker.py`: same key
/// layout, same fail-open contract, same pipelined multi-key writes on state
/// transitions.
pub struct CircuitBreaker {
    store: Arc<dyn Store>,
    failure_threshold: u32,
    reset_timeout_seconds: u64,
    half_open_max_calls: u32,
    enabled: bool,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

impl CircuitBreaker {
    pub fn new(
        store: Arc<dyn Store>,
        failure_threshold: u32,
        reset_timeout_seconds: u64,
        half_open_max_calls: u32,
        enabled: bool,
    ) -> Self {
        Self {
            store,
            failure_threshold,
            reset_timeout_seconds,
            half_open_max_calls,
            enabled,
        }
    }

    fn half_open_attempts_key(domain: &str) -> String {
        format!("circuit:{domain}:half_open_attempts")
    }

    /// `CanRequest(domain)` (§4.3 transition table). Fail-open on any store
    /// error or when the breaker is disabled.
    pub async fn can_request(&self, domain: &str) -> bool {
        if !self.enabled || domain.is_empty() {
            return true;
        }

        match self.can_request_inner(domain).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(domain, error = %e, "coordination store error checking circuit, allowing request");
                true
            }
        }
    }

    async fn can_request_inner(&self, domain: &str) -> Result<bool, imotscrape_coordination::StoreError> {
        let state = self.read_state(domain).await?;

        match state {
            CircuitState::Closed => Ok(true),
            CircuitState::Open => {
                let opened_at = self
                    .store
                    .get(&keys::circuit_opened_at(domain))
                    .await?
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0);

                if now_unix() - opened_at >= self.reset_timeout_seconds as i64 {
                    self.store
                        .pipeline_set(&[
                            (keys::circuit_state(domain).as_str(), "HALF_OPEN"),
                            (Self::half_open_attempts_key(domain).as_str(), "0"),
                        ])
                        .await?;
                    info!(domain, "circuit entering HALF_OPEN for testing");
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            CircuitState::HalfOpen => {
                let attempts = self
                    .store
                    .incr(&Self::half_open_attempts_key(domain))
                    .await?;
                Ok(attempts as u32 <= self.half_open_max_calls)
            }
        }
    }

    async fn read_state(&self, domain: &str) -> Result<CircuitState, imotscrape_coordination::StoreError> {
        Ok(self
            .store
            .get(&keys::circuit_state(domain))
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(CircuitState::Closed))
    }

    /// `Success(domain)` (§4.3 transition table).
    pub async fn record_success(&self, domain: &str) {
        if !self.enabled || domain.is_empty() {
            return;
        }
        if let Err(e) = self.record_success_inner(domain).await {
            warn!(domain, error = %e, "coordination store error recording success");
        }
    }

    async fn record_success_inner(&self, domain: &str) -> Result<(), imotscrape_coordination::StoreError> {
        let state = self.read_state(domain).await?;
        match state {
            CircuitState::HalfOpen => {
                self.store
                    .pipeline_set(&[
                        (keys::circuit_state(domain).as_str(), "CLOSED"),
                        (keys::circuit_failures(domain).as_str(), "0"),
                    ])
                    .await?;
                info!(domain, "circuit recovered, closing");
            }
            CircuitState::Closed => {
                self.store.set(&keys::circuit_failures(domain), "0").await?;
            }
            CircuitState::Open => {}
        }
        Ok(())
    }

    /// `Failure(domain, kind)` (§4.3 transition table).
    pub async fn record_failure(&self, domain: &str, kind: BlockKind) {
        if !self.enabled || domain.is_empty() {
            return;
        }
        if let Err(e) = self.record_failure_inner(domain, kind).await {
            warn!(domain, error = %e, "coordination store error recording failure");
        }
    }

    async fn record_failure_inner(
        &self,
        domain: &str,
        kind: BlockKind,
    ) -> Result<(), imotscrape_coordination::StoreError> {
        let state = self.read_state(domain).await?;
        let kind_str = kind.to_string();

        match state {
            CircuitState::HalfOpen => {
                self.store
                    .pipeline_set(&[
                        (keys::circuit_state(domain).as_str(), "OPEN"),
                        (keys::circuit_opened_at(domain).as_str(), &now_unix().to_string()),
                        (keys::circuit_last_block(domain).as_str(), &kind_str),
                    ])
                    .await?;
                info!(domain, "still blocked in HALF_OPEN, circuit re-opened");
            }
            CircuitState::Closed => {
                self.store
                    .setnx(&keys::circuit_state(domain), "CLOSED")
                    .await?;
                let failures = self.store.incr(&keys::circuit_failures(domain)).await?;
                if failures as u32 >= self.failure_threshold {
                    self.store
                        .pipeline_set(&[
                            (keys::circuit_state(domain).as_str(), "OPEN"),
                            (keys::circuit_opened_at(domain).as_str(), &now_unix().to_string()),
                            (keys::circuit_last_block(domain).as_str(), &kind_str),
                        ])
                        .await?;
                    warn!(domain, failures, kind = %kind_str, "circuit OPENED");
                }
            }
            CircuitState::Open => {}
        }
        Ok(())
    }

    /// `get_state(domain)` (§4.3a) — introspection for `status` tooling/tests.
    pub async fn get_state(&self, domain: &str) -> DomainCircuit {
        let state = self.read_state(domain).await.unwrap_or(CircuitState::Closed);
        let failures = self
            .store
            .get(&keys::circuit_failures(domain))
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let opened_at = self
            .store
            .get(&keys::circuit_opened_at(domain))
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0));
        let last_block_kind = self
            .store
            .get(&keys::circuit_last_block(domain))
            .await
            .ok()
            .flatten()
            .and_then(|s| match s.as_str() {
                "captcha" => Some(BlockKind::Captcha),
                "rate_limit" => Some(BlockKind::RateLimit),
                "cloudflare" => Some(BlockKind::Cloudflare),
                "network" => Some(BlockKind::Network),
                "other" => Some(BlockKind::Other),
                _ => None,
            });
        let half_open_attempts = self
            .store
            .get(&Self::half_open_attempts_key(domain))
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        DomainCircuit {
            domain: domain.to_string(),
            state,
            consecutive_failures: failures,
            opened_at,
            half_open_attempts,
            last_block_kind,
        }
    }

    /// `get_all_states()` (§4.3a) — `SCAN`-based enumeration of tracked domains.
    pub async fn get_all_states(&self) -> Vec<DomainCircuit> {
        let keys = self.store.scan_match("circuit:*:state").await.unwrap_or_default();
        let mut states = Vec::new();
        for key in keys {
            if let Some(domain) = key.strip_prefix("circuit:").and_then(|s| s.strip_suffix(":state")) {
                states.push(self.get_state(domain).await);
            }
        }
        states
    }

    /// Admin `Reset(domain)` — force `CLOSED` (§4.3's transition table footnote).
    pub async fn reset(&self, domain: &str) {
        if let Err(e) = self
            .store
            .pipeline_set(&[
                (keys::circuit_state(domain).as_str(), "CLOSED"),
                (keys::circuit_failures(domain).as_str(), "0"),
            ])
            .await
        {
            warn!(domain, error = %e, "error resetting circuit");
            return;
        }
        let _ = self
            .store
            .delete(&[
                keys::circuit_opened_at(domain).as_str(),
                keys::circuit_last_block(domain).as_str(),
                Self::half_open_attempts_key(domain).as_str(),
            ])
            .await;
        info!(domain, "circuit manually reset to CLOSED");
    }
}

/// Extracts the domain component of a URL for circuit/rate-limit keying,
/// falling back to the raw string when it does not parse as a URL.
pub fn domain_of(url: &str) -> String {
    extract_domain(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imotscrape_coordination::FakeStore;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(Arc::new(FakeStore::new()), threshold, 60, 2, true)
    }

    #[tokio::test]
    async fn opens_exactly_at_threshold() {
        let cb = breaker(3);
        assert!(cb.can_request("imot.bg").await);
        cb.record_failure("imot.bg", BlockKind::Network).await;
        assert!(cb.can_request("imot.bg").await);
        cb.record_failure("imot.bg", BlockKind::Network).await;
        assert!(cb.can_request("imot.bg").await);
        cb.record_failure("imot.bg", BlockKind::Network).await;
        assert!(!cb.can_request("imot.bg").await);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let cb = breaker(3);
        cb.record_failure("imot.bg", BlockKind::Network).await;
        cb.record_failure("imot.bg", BlockKind::Network).await;
        cb.record_success("imot.bg").await;
        cb.record_failure("imot.bg", BlockKind::Network).await;
        assert!(cb.can_request("imot.bg").await);
    }

    #[tokio::test]
    async fn disabled_breaker_always_permits() {
        let cb = CircuitBreaker::new(Arc::new(FakeStore::new()), 1, 60, 2, false);
        cb.record_failure("imot.bg", BlockKind::Network).await;
        assert!(cb.can_request("imot.bg").await);
    }

    #[tokio::test]
    async fn two_workers_share_breaker_state() {
        let store = Arc::new(FakeStore::new());
        let worker_a = CircuitBreaker::new(store.clone(), 3, 60, 2, true);
        let worker_b = CircuitBreaker::new(store, 3, 60, 2, true);

        worker_a.record_failure("imot.bg", BlockKind::Network).await;
        worker_a.record_failure("imot.bg", BlockKind::Network).await;
        worker_b.record_failure("imot.bg", BlockKind::Network).await;

        assert!(!worker_a.can_request("imot.bg").await);
        assert!(!worker_b.can_request("imot.bg").await);
    }
}
