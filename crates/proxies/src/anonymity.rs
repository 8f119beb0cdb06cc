use std::net::Ipv4Addr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use imotscrape_core::Anonymity;
use tracing::{debug, warn};

use crate::judge;

/// Fixed privacy-header set (§4.6) — presence of any of these (case-insensitive,
/// matched against the judge's echoed-headers body) marks a proxy `Anonymous`
/// rather than `Elite`.
const PRIVACY_HEADERS: &[&str] = &[
    "VIA",
    "X-FORWARDED-FOR",
    "FORWARDED-FOR",
    "X-REAL-IP",
    "CLIENT-IP",
    "X-CLIENT-IP",
    "PROXY-CONNECTION",
    "X-PROXY-ID",
    "X-BLUECOAT-VIA",
    "X-ORIGINATING-IP",
    "FORWARDED",
    "X-FORWARDED",
];

const REAL_IP_CACHE_TTL: Duration = Duration::from_secs(600);

/// Caches the operator's real IPv4, refetched from the real-IP judge list
/// (bypassing the proxy). Supports forced refresh per
/// `original_source/proxies/anonymity_checker.py`'s `get_real_ip(force_refresh)`.
pub struct RealIpCache {
    real_ip_urls: Vec<String>,
    timeout: Duration,
    cached: RwLock<Option<(Ipv4Addr, Instant)>>,
}

impl RealIpCache {
    pub fn new(real_ip_urls: Vec<String>, timeout: Duration) -> Self {
        Self {
            real_ip_urls,
            timeout,
            cached: RwLock::new(None),
        }
    }

    pub async fn get(&self, force_refresh: bool) -> Option<Ipv4Addr> {
        if !force_refresh {
            if let Some((ip, at)) = *self.cached.read().unwrap() {
                if at.elapsed() < REAL_IP_CACHE_TTL {
                    return Some(ip);
                }
            }
        }

        for url in &self.real_ip_urls {
            let client = match judge::build_client(None, self.timeout) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if let Ok((body, _)) = judge::hit_judge(&client, url).await {
                if let Some(ip) = judge::extract_ipv4(&body) {
                    *self.cached.write().unwrap() = Some((ip, Instant::now()));
                    return Some(ip);
                }
            }
        }
        warn!("could not determine operator real IP from any real-IP judge");
        None
    }
}

/// Classifies a live proxy's anonymity level (§4.6).
pub struct AnonymityClassifier {
    judges: Vec<String>,
    timeout: Duration,
}

impl AnonymityClassifier {
    pub fn new(judges: Vec<String>, timeout: Duration) -> Self {
        Self { judges, timeout }
    }

    /// Returns the classification and the exit IP observed, if any.
    pub async fn classify(
        &self,
        proxy_url: &str,
        real_ip: Option<Ipv4Addr>,
        previously_observed_exit_ip: Option<&str>,
    ) -> (Anonymity, Option<String>) {
        for judge_url in &self.judges {
            let client = match judge::build_client(Some(proxy_url), self.timeout) {
                Ok(c) => c,
                Err(e) => {
                    debug!(proxy_url, judge_url, error = %e, "client build failed, trying next judge");
                    continue;
                }
            };
            let (body, _) = match judge::hit_judge(&client, judge_url).await {
                Ok(r) => r,
                Err(e) => {
                    debug!(proxy_url, judge_url, error = %e, "judge failed, trying next");
                    continue;
                }
            };

            let exit_ip = judge::extract_ipv4(&body).map(|ip| ip.to_string());

            if let Some(real_ip) = real_ip {
                if body.contains(&real_ip.to_string()) {
                    return (Anonymity::Transparent, exit_ip);
                }
            }

            let upper = body.to_uppercase();
            if PRIVACY_HEADERS.iter().any(|h| upper.contains(h)) {
                return (Anonymity::Anonymous, exit_ip);
            }

            return (Anonymity::Elite, exit_ip);
        }

        // All judges failed: fall back to comparing the previously observed
        // exit IP against the proxy host (§4.6).
        let proxy_host = url::Url::parse(proxy_url).ok().and_then(|u| u.host_str().map(String::from));
        match (previously_observed_exit_ip, proxy_host) {
            (Some(exit_ip), Some(host)) if exit_ip != host => {
                (Anonymity::Anonymous, Some(exit_ip.to_string()))
            }
            (Some(exit_ip), _) => (Anonymity::Transparent, Some(exit_ip.to_string())),
            // Real IP undetermined: conservative Anonymous (§4.6, §9).
            _ => (Anonymity::Anonymous, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privacy_headers_are_case_insensitive_matched() {
        let body = "headers: {\"via\": \"1.1 proxy\"}".to_uppercase();
        assert!(PRIVACY_HEADERS.iter().any(|h| body.contains(h)));
    }

    #[tokio::test]
    async fn no_judges_and_no_history_falls_back_to_anonymous() {
        let classifier = AnonymityClassifier::new(vec![], Duration::from_secs(1));
        let (anonymity, exit_ip) = classifier.classify("http://203.0.113.1:8080", None, None).await;
        assert_eq!(anonymity, Anonymity::Anonymous);
        assert!(exit_ip.is_none());
    }

    #[tokio::test]
    async fn no_judges_with_matching_history_is_transparent() {
        let classifier = AnonymityClassifier::new(vec![], Duration::from_secs(1));
        let (anonymity, _) = classifier
            .classify("http://203.0.113.1:8080", None, Some("203.0.113.1"))
            .await;
        assert_eq!(anonymity, Anonymity::Transparent);
    }
}
