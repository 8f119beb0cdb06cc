use thiserror::Error;

/// Block kind observed on a soft-blocked 200 response, or attached to a
/// circuit-breaker failure record. Mirrors `circuit:{domain}:last_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Captcha,
    RateLimit,
    Cloudflare,
    Network,
    Other,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockKind::Captcha => "captcha",
            BlockKind::RateLimit => "rate_limit",
            BlockKind::Cloudflare => "cloudflare",
            BlockKind::Network => "network",
            BlockKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Error taxonomy of §7, independent of transport. `Fetcher`, the scrape
/// worker, and the dispatcher all surface these; the aggregator and the
/// resilience layer pattern-match on the variant to decide retry policy.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited")]
    RateLimited,

    #[error("soft block detected ({0})")]
    Blocked(BlockKind),

    #[error("circuit open for domain {0}")]
    CircuitOpen(String),

    #[error("rotating proxy endpoint unreachable: {0}")]
    ProxyUnreachable(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("listing store error: {0}")]
    StoreError(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ScrapeError {
    /// Whether the Fetcher should retry this error with backoff (§7 "Recovery" column).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ScrapeError::Network(_)
                | ScrapeError::RateLimited
                | ScrapeError::Blocked(_)
                | ScrapeError::ProxyUnreachable(_)
                | ScrapeError::Http(_)
        )
    }

    /// Short machine-readable tag used in `ChunkResult` error entries, e.g.
    /// `{"url": ..., "error": "circuit_open", "skipped": true}`.
    pub fn tag(&self) -> &'static str {
        match self {
            ScrapeError::Network(_) | ScrapeError::Http(_) => "network",
            ScrapeError::RateLimited => "rate_limited",
            ScrapeError::Blocked(_) => "blocked",
            ScrapeError::CircuitOpen(_) => "circuit_open",
            ScrapeError::ProxyUnreachable(_) => "proxy_unreachable",
            ScrapeError::Parse(_) => "extraction_failed",
            ScrapeError::StoreError(_) => "db_save",
            ScrapeError::Fatal(_) => "fatal",
            ScrapeError::UrlParse(_) => "invalid_url",
        }
    }
}
