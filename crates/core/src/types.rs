use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Transport scheme of a proxy endpoint (§3 `RawProxy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5",
        };
        f.write_str(s)
    }
}

/// Anonymity class assigned by the Anonymity Classifier (§4.6, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Anonymity {
    Transparent,
    Anonymous,
    Elite,
    #[default]
    Unknown,
}

impl Anonymity {
    /// True for the anonymity classes the invariant in §3/§8.6 permits publishing.
    pub fn is_publishable(&self) -> bool {
        !matches!(self, Anonymity::Transparent)
    }
}

/// Raw proxy as emitted by the external `RawProxySource` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProxy {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl RawProxy {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// A proxy that has passed liveness + classification (§3 `LiveProxy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveProxy {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub anonymity: Anonymity,
    pub exit_ip: Option<String>,
    pub response_time_ms: u64,
    pub last_checked_at: chrono::DateTime<chrono::Utc>,
}

impl LiveProxy {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn identity(&self) -> (Protocol, String, u16) {
        (self.protocol, self.host.clone(), self.port)
    }

    /// §3 invariant: Transparent or exit-IP-in-operator's-/24 proxies are ineligible.
    pub fn is_eligible(&self, real_ip_prefix: Option<&str>) -> bool {
        if !self.anonymity.is_publishable() {
            return false;
        }
        if let (Some(prefix), Some(exit_ip)) = (real_ip_prefix, self.exit_ip.as_deref()) {
            if exit_ip.starts_with(&format!("{prefix}.")) {
                return false;
            }
        }
        true
    }
}

/// Rolling performance record keyed by proxy endpoint URL (§3 `ProxyScore`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyScore {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub score: f64,
    pub failures: u32,
    pub successes: u32,
    pub last_response_time_ms: u64,
    pub last_check_at: chrono::DateTime<chrono::Utc>,
}

impl ProxyScore {
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            score: 1.0,
            failures: 0,
            successes: 0,
            last_response_time_ms: 0,
            last_check_at: chrono::Utc::now(),
        }
    }

    /// §3: `failures >= MaxFailures OR score < MinScore` ⇒ dead.
    pub fn is_dead(&self, max_failures: u32, min_score: f64) -> bool {
        self.failures >= max_failures || self.score < min_score
    }

    pub fn is_usable(&self, max_failures: u32, min_score: f64) -> bool {
        !self.is_dead(max_failures, min_score)
    }
}

/// Per-domain circuit breaker state (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for CircuitState {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOSED" => Ok(CircuitState::Closed),
            "OPEN" => Ok(CircuitState::Open),
            "HALF_OPEN" => Ok(CircuitState::HalfOpen),
            _ => Err(()),
        }
    }
}

/// In-memory snapshot of a `circuit:{domain}:*` record, returned by
/// introspection operations (`get_state`, `get_all_states`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainCircuit {
    pub domain: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<chrono::DateTime<chrono::Utc>>,
    pub half_open_attempts: u32,
    pub last_block_kind: Option<crate::error::BlockKind>,
}

/// In-memory snapshot of a `ratelimit:{domain}:*` record, returned by `get_stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainBucket {
    pub domain: String,
    pub tokens: f64,
    pub last_refill_at: chrono::DateTime<chrono::Utc>,
    pub rate_per_minute: f64,
    pub burst: f64,
}

/// One site-scoped scrape run (§3 `ScrapeJob`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Collecting,
    Dispatched,
    Processing,
    Aggregating,
    Complete,
    Failed,
}

impl JobStatus {
    /// Monotonicity invariant (§8.10): no transition out of a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Collecting => "COLLECTING",
            JobStatus::Dispatched => "DISPATCHED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Aggregating => "AGGREGATING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COLLECTING" => Ok(JobStatus::Collecting),
            "DISPATCHED" => Ok(JobStatus::Dispatched),
            "PROCESSING" => Ok(JobStatus::Processing),
            "AGGREGATING" => Ok(JobStatus::Aggregating),
            "COMPLETE" => Ok(JobStatus::Complete),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub job_id: String,
    pub site: String,
    pub total_urls: u64,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    pub result_count: u64,
    pub error_count: u64,
    pub status: JobStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ScrapeJob {
    pub fn new(job_id: impl Into<String>, site: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            site: site.into(),
            total_urls: 0,
            total_chunks: 0,
            completed_chunks: 0,
            result_count: 0,
            error_count: 0,
            status: JobStatus::Collecting,
            started_at: chrono::Utc::now(),
            completed_at: None,
        }
    }
}

/// Opaque record produced by a site `Parser` (§3 `ExtractedListing`). The
/// core only inspects `external_id`/`source_site`/`url`; the rest travels as
/// an untyped JSON map through the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedListing {
    pub external_id: String,
    pub source_site: String,
    pub url: String,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl ExtractedListing {
    pub fn identity(&self) -> (String, String) {
        (self.source_site.clone(), self.external_id.clone())
    }
}

/// One entry of a `ChunkResult` — a successfully extracted listing, or an
/// error tagged the way §4.11/§7 describe (`{url, error, skipped?}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScrapeOutcome {
    Listing(ExtractedListing),
    Error {
        url: String,
        error: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        skipped: bool,
    },
}

impl ScrapeOutcome {
    pub fn error(url: impl Into<String>, error: impl Into<String>) -> Self {
        ScrapeOutcome::Error {
            url: url.into(),
            error: error.into(),
            skipped: false,
        }
    }

    pub fn skipped(url: impl Into<String>, error: impl Into<String>) -> Self {
        ScrapeOutcome::Error {
            url: url.into(),
            error: error.into(),
            skipped: true,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ScrapeOutcome::Error { .. })
    }
}

/// Output of one worker chunk: an ordered list of outcomes, one per input URL.
pub type ChunkResult = Vec<ScrapeOutcome>;

/// Crash-recovery snapshot of a long scrape (§3 `Checkpoint`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub name: String,
    pub scraped: Vec<String>,
    pub pending: Vec<String>,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}
