use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::debug;

use crate::judge;

pub(crate) fn same_slash_24(a: Ipv4Addr, b: Ipv4Addr) -> bool {
    a.octets()[..3] == b.octets()[..3]
}

/// Confirms a proxy actually changes the observed egress IP and, optionally,
/// that it can reach the target site (§4.7).
pub struct QualityProber {
    real_ip_urls: Vec<String>,
    timeout: Duration,
}

impl QualityProber {
    pub fn new(real_ip_urls: Vec<String>, timeout: Duration) -> Self {
        Self { real_ip_urls, timeout }
    }

    /// Returns `(passes, exit_ip)`. Fails if no judge returns a usable IP, or
    /// if the exit IP falls in the same /24 as `real_ip`.
    pub async fn probe(&self, proxy_url: &str, real_ip: Option<Ipv4Addr>) -> (bool, Option<Ipv4Addr>) {
        for url in &self.real_ip_urls {
            let client = match judge::build_client(Some(proxy_url), self.timeout) {
                Ok(c) => c,
                Err(e) => {
                    debug!(proxy_url, error = %e, "quality probe client build failed");
                    continue;
                }
            };
            let Ok((body, _)) = judge::hit_judge(&client, url).await else {
                continue;
            };
            let Some(exit_ip) = judge::extract_ipv4(&body) else {
                continue;
            };

            let passes = match real_ip {
                Some(real_ip) => !same_slash_24(exit_ip, real_ip),
                None => true,
            };
            return (passes, Some(exit_ip));
        }
        (false, None)
    }

    /// Optional target-site stage (§4.7a): succeeds on HTTP 200 from the
    /// proxy against each configured target base URL. Status-code-only, per
    /// spec.md's literal wording (no content-indicator matching).
    pub async fn probe_target(&self, proxy_url: &str, target_urls: &[String]) -> bool {
        for url in target_urls {
            let client = match judge::build_client(Some(proxy_url), self.timeout) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if let Ok(resp) = client.get(url).send().await {
                if resp.status().is_success() {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_same_slash_24() {
        let a = Ipv4Addr::new(203, 0, 113, 10);
        let b = Ipv4Addr::new(203, 0, 113, 200);
        assert!(same_slash_24(a, b));
    }

    #[test]
    fn detects_different_slash_24() {
        let a = Ipv4Addr::new(203, 0, 113, 10);
        let b = Ipv4Addr::new(198, 51, 100, 10);
        assert!(!same_slash_24(a, b));
    }
}
