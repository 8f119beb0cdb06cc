use std::net::Ipv4Addr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ProxyError;

static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})\b").expect("valid ipv4 regex")
});

/// Extracts the first well-formed IPv4 address from a judge response body
/// (JSON or plain text), per §4.5 — "a valid IPv4 is extracted from the
/// response (JSON or plain text)".
pub fn extract_ipv4(body: &str) -> Option<Ipv4Addr> {
    IPV4_RE.captures_iter(body).find_map(|caps| {
        let octet = |i: usize| caps.get(i)?.as_str().parse::<u8>().ok();
        Some(Ipv4Addr::new(octet(1)?, octet(2)?, octet(3)?, octet(4)?))
    })
}

/// Builds a short-lived client routed through `proxy_url`, or direct when
/// `proxy_url` is `None` (used for the operator's own real-IP lookups, which
/// must bypass the proxy under test).
pub fn build_client(proxy_url: Option<&str>, timeout: Duration) -> Result<reqwest::Client, ProxyError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy_url) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    } else {
        builder = builder.no_proxy();
    }
    Ok(builder.build()?)
}

/// One GET against `judge_url`, returning the raw response body text.
pub async fn hit_judge(
    client: &reqwest::Client,
    judge_url: &str,
) -> Result<(String, u64), ProxyError> {
    let start = std::time::Instant::now();
    let resp = client.get(judge_url).send().await?;
    if !resp.status().is_success() {
        return Err(ProxyError::MalformedJudgeResponse);
    }
    let body = resp.text().await?;
    Ok((body, start.elapsed().as_millis() as u64))
}

/// Round-robins over a judge list, handing each caller the next index.
pub struct JudgeRotation {
    counter: std::sync::atomic::AtomicUsize,
}

impl JudgeRotation {
    pub fn new() -> Self {
        Self {
            counter: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn next<'a>(&self, judges: &'a [String]) -> Option<&'a str> {
        if judges.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % judges.len();
        Some(judges[idx].as_str())
    }
}

impl Default for JudgeRotation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ip_from_plain_text() {
        assert_eq!(extract_ipv4("your ip is 203.0.113.7 today"), Some(Ipv4Addr::new(203, 0, 113, 7)));
    }

    #[test]
    fn extracts_ip_from_json() {
        let body = r#"{"origin": "198.51.100.23"}"#;
        assert_eq!(extract_ipv4(body), Some(Ipv4Addr::new(198, 51, 100, 23)));
    }

    #[test]
    fn returns_none_for_malformed_body() {
        assert_eq!(extract_ipv4("no address here"), None);
    }

    #[test]
    fn rotation_cycles_through_judges() {
        let judges = vec!["a".to_string(), "b".to_string()];
        let rot = JudgeRotation::new();
        assert_eq!(rot.next(&judges), Some("a"));
        assert_eq!(rot.next(&judges), Some("b"));
        assert_eq!(rot.next(&judges), Some("a"));
    }
}
