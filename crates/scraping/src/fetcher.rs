use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use imotscrape_core::{BlockKind, ScrapeError, SiteConfig};
use imotscrape_resilience::{domain_of, CircuitBreaker, RateLimiter};
use rand::Rng;
use tracing::{debug, warn};

use crate::block_detection;
use crate::encoding;

/// Per-call knobs (§4.1): timeout, custom headers, and a resilience bypass
/// used only for judge/IP-echo probes, which must never be rate-limited or
/// circuit-gated the way site fetches are.
pub struct FetchOptions {
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
    pub bypass_resilience: bool,
    pub fallback_encoding: String,
    pub max_attempts: u32,
    pub backoff_base_seconds: f64,
    pub backoff_multiplier: f64,
    pub backoff_max_seconds: f64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            headers: HashMap::new(),
            bypass_resilience: false,
            fallback_encoding: "windows-1251".to_string(),
            max_attempts: 3,
            backoff_base_seconds: 1.0,
            backoff_multiplier: 2.0,
            backoff_max_seconds: 300.0,
        }
    }
}

impl FetchOptions {
    /// Builds fetch options from a site's dispatch tunables (§4.1/§4.10),
    /// the seam `dispatcher::dispatch` and `worker::scrape_chunk` both use so
    /// `fetch_max_attempts`/`backoff_*` from `[sites.<site>]` actually reach
    /// the retry loop instead of silently falling back to `Default`.
    pub fn for_site(site_config: &SiteConfig) -> Self {
        Self {
            fallback_encoding: site_config.fallback_encoding.clone(),
            max_attempts: site_config.fetch_max_attempts,
            backoff_base_seconds: site_config.backoff_base_seconds,
            backoff_multiplier: site_config.backoff_multiplier,
            backoff_max_seconds: site_config.backoff_max_seconds,
            ..Self::default()
        }
    }
}

pub struct FetchResult {
    pub body: Vec<u8>,
    pub text: String,
    pub final_url: String,
    pub encoding: &'static str,
    pub had_decode_warning: bool,
}

/// `Fetch(url, options)` (§4.1). Requests egress through the Rotating Proxy
/// Endpoint's local listen address, configured once at construction — this
/// pipeline's proxy routing is per-request via that local endpoint rather
/// than the donor's per-network static client pool (DESIGN.md notes the
/// deviation).
pub struct Fetcher {
    client: reqwest::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<RateLimiter>,
}

impl Fetcher {
    pub fn new(
        rotator_proxy_url: &str,
        circuit_breaker: Arc<CircuitBreaker>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(rotator_proxy_url)?)
            .build()?;
        Ok(Self {
            client,
            circuit_breaker,
            rate_limiter,
        })
    }

    /// Direct-client constructor, bypassing the rotating endpoint. Used by
    /// scenario tests that point at a local mock server, and available to
    /// embedders who want their own `reqwest::Client` configuration.
    pub fn with_client(client: reqwest::Client, circuit_breaker: Arc<CircuitBreaker>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            circuit_breaker,
            rate_limiter,
        }
    }

    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResult, ScrapeError> {
        let domain = domain_of(url);

        if !options.bypass_resilience {
            if !self.circuit_breaker.can_request(&domain).await {
                return Err(ScrapeError::CircuitOpen(domain));
            }
            self.rate_limiter.acquire(&domain, true).await;
        }

        let mut last_err = None;
        let mut last_kind = BlockKind::Network;
        for attempt in 0..options.max_attempts {
            match self.attempt(url, options).await {
                Ok(result) => {
                    if !options.bypass_resilience {
                        self.circuit_breaker.record_success(&domain).await;
                    }
                    return Ok(result);
                }
                Err((err, kind)) => {
                    warn!(url, attempt, error = %err, "fetch attempt failed");
                    last_err = Some(err);
                    last_kind = kind;
                    if attempt + 1 < options.max_attempts {
                        self.sleep_backoff(attempt, options).await;
                    }
                }
            }
        }

        if !options.bypass_resilience {
            self.circuit_breaker.record_failure(&domain, last_kind).await;
        }

        Err(last_err.unwrap_or_else(|| ScrapeError::Network("exhausted retries".into())))
    }

    async fn attempt(&self, url: &str, options: &FetchOptions) -> Result<FetchResult, (ScrapeError, BlockKind)> {
        let mut request = self.client.get(url).timeout(options.timeout);
        for (key, value) in &options.headers {
            request = request.header(key, value);
        }

        let resp = request.send().await.map_err(|e| {
            let kind = if e.is_connect() || e.is_timeout() {
                BlockKind::Network
            } else {
                BlockKind::Other
            };
            (map_transport_error(e), kind)
        })?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = resp
            .bytes()
            .await
            .map_err(|e| (ScrapeError::Http(e), BlockKind::Network))?
            .to_vec();

        let decoded = encoding::decode(&body, content_type.as_deref(), &options.fallback_encoding);

        if let Some(kind) = block_detection::classify(status, &decoded.text) {
            let err = match kind {
                BlockKind::RateLimit => ScrapeError::RateLimited,
                other => ScrapeError::Blocked(other),
            };
            return Err((err, kind));
        }

        if !(200..300).contains(&status) {
            return Err((ScrapeError::Network(format!("unexpected status {status}")), BlockKind::Network));
        }

        if decoded.had_replacement {
            debug!(url, encoding = decoded.encoding, "decode produced replacement characters");
        }

        Ok(FetchResult {
            body,
            text: decoded.text,
            final_url,
            encoding: decoded.encoding,
            had_decode_warning: decoded.had_replacement,
        })
    }

    async fn sleep_backoff(&self, attempt: u32, options: &FetchOptions) {
        let backoff = (options.backoff_base_seconds * options.backoff_multiplier.powi(attempt as i32))
            .min(options.backoff_max_seconds);
        let jitter_ms = rand::thread_rng().gen_range(0..500);
        tokio::time::sleep(Duration::from_secs_f64(backoff) + Duration::from_millis(jitter_ms)).await;
    }
}

fn map_transport_error(e: reqwest::Error) -> ScrapeError {
    if e.is_connect() {
        ScrapeError::ProxyUnreachable(e.to_string())
    } else {
        ScrapeError::Network(e.to_string())
    }
}
