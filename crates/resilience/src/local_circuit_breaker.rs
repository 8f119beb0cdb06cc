use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use imotscrape_core::{BlockKind, CircuitState, DomainCircuit};
use tracing::warn;

struct Entry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<i64>,
    half_open_attempts: u32,
    last_block_kind: Option<BlockKind>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_attempts: 0,
            last_block_kind: None,
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Degraded in-process stand-in for [[CircuitBreaker]] (§4.3b), used only
/// when the Coordination Store cannot be reached at startup. State is
/// per-process and lost on restart; this trades the shared-breaker guarantee
/// for the ability to keep scraping solo rather than failing the whole run.
pub struct LocalCircuitBreaker {
    domains: Mutex<HashMap<String, Entry>>,
    failure_threshold: u32,
    reset_timeout_seconds: u64,
    half_open_max_calls: u32,
}

impl LocalCircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout_seconds: u64, half_open_max_calls: u32) -> Self {
        warn!("coordination store unreachable at startup, falling back to a local per-process circuit breaker");
        Self {
            domains: Mutex::new(HashMap::new()),
            failure_threshold,
            reset_timeout_seconds,
            half_open_max_calls,
        }
    }

    pub fn can_request(&self, domain: &str) -> bool {
        if domain.is_empty() {
            return true;
        }
        let mut domains = self.domains.lock().unwrap();
        let entry = domains.entry(domain.to_string()).or_default();

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = entry.opened_at.unwrap_or(0);
                if now_unix() - opened_at >= self.reset_timeout_seconds as i64 {
                    entry.state = CircuitState::HalfOpen;
                    entry.half_open_attempts = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                entry.half_open_attempts += 1;
                entry.half_open_attempts <= self.half_open_max_calls
            }
        }
    }

    pub fn record_success(&self, domain: &str) {
        if domain.is_empty() {
            return;
        }
        let mut domains = self.domains.lock().unwrap();
        let entry = domains.entry(domain.to_string()).or_default();
        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Closed;
                entry.consecutive_failures = 0;
                entry.opened_at = None;
            }
            CircuitState::Closed => entry.consecutive_failures = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, domain: &str, kind: BlockKind) {
        if domain.is_empty() {
            return;
        }
        let mut domains = self.domains.lock().unwrap();
        let entry = domains.entry(domain.to_string()).or_default();
        entry.last_block_kind = Some(kind);

        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(now_unix());
            }
            CircuitState::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(now_unix());
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn get_state(&self, domain: &str) -> DomainCircuit {
        let mut domains = self.domains.lock().unwrap();
        let entry = domains.entry(domain.to_string()).or_default();
        DomainCircuit {
            domain: domain.to_string(),
            state: entry.state,
            consecutive_failures: entry.consecutive_failures,
            opened_at: entry
                .opened_at
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)),
            half_open_attempts: entry.half_open_attempts,
            last_block_kind: entry.last_block_kind,
        }
    }

    pub fn reset(&self, domain: &str) {
        self.domains.lock().unwrap().remove(domain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let cb = LocalCircuitBreaker::new(2, 60, 1);
        assert!(cb.can_request("imot.bg"));
        cb.record_failure("imot.bg", BlockKind::Network);
        assert!(cb.can_request("imot.bg"));
        cb.record_failure("imot.bg", BlockKind::Network);
        assert!(!cb.can_request("imot.bg"));
    }

    #[test]
    fn reset_clears_tracked_domain() {
        let cb = LocalCircuitBreaker::new(1, 60, 1);
        cb.record_failure("imot.bg", BlockKind::Network);
        assert!(!cb.can_request("imot.bg"));
        cb.reset("imot.bg");
        assert!(cb.can_request("imot.bg"));
    }
}
