use std::time::Duration;

use dashmap::DashMap;
use imotscrape_core::{Protocol, ProxyScore};
use tracing::debug;

use crate::error::ProxyError;
use crate::judge::{self, JudgeRotation};

/// Runs liveness checks against a rotated judge list and maintains the
/// rolling `ProxyScore` record for each proxy endpoint (§4.5).
pub struct ProxyValidator {
    timeout: Duration,
    liveness_judges: Vec<String>,
    alpha: f64,
    beta: f64,
    max_failures: u32,
    min_score: f64,
    scores: DashMap<String, ProxyScore>,
    rotation: JudgeRotation,
}

impl ProxyValidator {
    pub fn new(
        timeout: Duration,
        liveness_judges: Vec<String>,
        alpha: f64,
        beta: f64,
        max_failures: u32,
        min_score: f64,
    ) -> Self {
        Self {
            timeout,
            liveness_judges,
            alpha,
            beta,
            max_failures,
            min_score,
            scores: DashMap::new(),
            rotation: JudgeRotation::new(),
        }
    }

    /// `Liveness(url, update_score)` (§4.5) — one judge hit.
    pub async fn liveness(&self, proxy_url: &str, update_score: bool) -> bool {
        let Some(judge_url) = self.rotation.next(&self.liveness_judges) else {
            return false;
        };
        let (success, response_time_ms) = self.probe(proxy_url, judge_url).await;
        if update_score {
            self.record(proxy_url, success, response_time_ms);
        }
        success
    }

    /// `MultiURL(url, n)` (§4.5) — hits `n` distinct judges, returns the
    /// success ratio; used as a cheap pre-check before high-cost work, so it
    /// does not itself mutate the score record.
    pub async fn multi_url(&self, proxy_url: &str, n: usize) -> f64 {
        let judges: Vec<&str> = self
            .liveness_judges
            .iter()
            .take(n.max(1))
            .map(String::as_str)
            .collect();
        if judges.is_empty() {
            return 0.0;
        }
        let mut successes = 0usize;
        for judge_url in &judges {
            let (success, _) = self.probe(proxy_url, judge_url).await;
            if success {
                successes += 1;
            }
        }
        successes as f64 / judges.len() as f64
    }

    /// `Preflight(rotator_url)` (§4.5) — `Liveness` with `update_score=false`;
    /// the rotator is not an individual proxy and must not pollute its score.
    pub async fn preflight(&self, rotator_url: &str) -> bool {
        self.liveness(rotator_url, false).await
    }

    async fn probe(&self, proxy_url: &str, judge_url: &str) -> (bool, u64) {
        let client = match judge::build_client(Some(proxy_url), self.timeout) {
            Ok(c) => c,
            Err(e) => {
                debug!(proxy_url, error = %e, "could not build client for proxy");
                return (false, 0);
            }
        };
        match judge::hit_judge(&client, judge_url).await {
            Ok((body, elapsed)) => (judge::extract_ipv4(&body).is_some(), elapsed),
            Err(e) => {
                debug!(proxy_url, judge_url, error = %e, "liveness probe failed");
                (false, 0)
            }
        }
    }

    fn record(&self, proxy_url: &str, success: bool, response_time_ms: u64) {
        let mut entry = self
            .scores
            .entry(proxy_url.to_string())
            .or_insert_with(|| new_score_for(proxy_url));

        if success {
            entry.score = (entry.score * self.alpha).min(10.0);
            entry.failures = 0;
            entry.successes += 1;
        } else {
            entry.score *= self.beta;
            entry.failures += 1;
            if entry.is_dead(self.max_failures, self.min_score) {
                entry.score = 0.0;
            }
        }
        entry.last_response_time_ms = response_time_ms;
        entry.last_check_at = chrono::Utc::now();
    }

    /// `is_proxy_usable` (§4.5a) — combines the dead-proxy criteria from §3's
    /// invariant; a proxy never probed before is assumed usable.
    pub fn is_proxy_usable(&self, proxy_url: &str) -> bool {
        self.scores
            .get(proxy_url)
            .map(|s| s.is_usable(self.max_failures, self.min_score))
            .unwrap_or(true)
    }

    /// `get_proxy_stats` (§4.5a).
    pub fn get_proxy_stats(&self, proxy_url: &str) -> Option<ProxyScore> {
        self.scores.get(proxy_url).map(|s| s.clone())
    }

    /// `get_all_stats` (§4.5a).
    pub fn get_all_stats(&self) -> Vec<ProxyScore> {
        self.scores.iter().map(|e| e.value().clone()).collect()
    }

    /// `cleanup_dead_proxies` (§4.5a) — purges score-dead entries after one
    /// full cleanup cycle, returning the number removed.
    pub fn cleanup_dead_proxies(&self) -> usize {
        let dead: Vec<String> = self
            .scores
            .iter()
            .filter(|e| e.value().is_dead(self.max_failures, self.min_score))
            .map(|e| e.key().clone())
            .collect();
        for key in &dead {
            self.scores.remove(key);
        }
        dead.len()
    }
}

fn new_score_for(proxy_url: &str) -> ProxyScore {
    let parsed = url::Url::parse(proxy_url).ok();
    let host = parsed
        .as_ref()
        .and_then(|u| u.host_str())
        .unwrap_or("unknown")
        .to_string();
    let port = parsed.as_ref().and_then(|u| u.port()).unwrap_or(0);
    let protocol = match parsed.as_ref().map(|u| u.scheme()) {
        Some("https") => Protocol::Https,
        Some("socks4") => Protocol::Socks4,
        Some("socks5") => Protocol::Socks5,
        _ => Protocol::Http,
    };
    ProxyScore::new(host, port, protocol)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ProxyValidator {
        ProxyValidator::new(Duration::from_secs(1), vec![], 1.2, 0.6, 5, 0.5)
    }

    #[test]
    fn never_probed_proxy_is_usable() {
        let v = validator();
        assert!(v.is_proxy_usable("http://203.0.113.1:8080"));
    }

    #[test]
    fn dead_proxy_cleanup_removes_entry() {
        let v = validator();
        for _ in 0..5 {
            v.record("http://203.0.113.1:8080", false, 0);
        }
        assert!(!v.is_proxy_usable("http://203.0.113.1:8080"));
        assert_eq!(v.cleanup_dead_proxies(), 1);
        assert!(v.get_proxy_stats("http://203.0.113.1:8080").is_none());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let v = validator();
        v.record("http://203.0.113.1:8080", false, 0);
        v.record("http://203.0.113.1:8080", false, 0);
        v.record("http://203.0.113.1:8080", true, 120);
        let stats = v.get_proxy_stats("http://203.0.113.1:8080").unwrap();
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.successes, 1);
    }
}
