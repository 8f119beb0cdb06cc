use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub coordination: CoordinationConfig,
    pub resilience: ResilienceConfig,
    pub proxies: ProxiesConfig,
    pub rotator: RotatorConfig,
    #[serde(default)]
    pub sites: HashMap<String, SiteConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    pub data_dir: String,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
}

fn default_checkpoint_dir() -> String {
    "data/checkpoints".to_string()
}

/// Connection to the Coordination Store. The donor kept one connection
/// string per backing service; this carries the same shape for Redis.
#[derive(Debug, Deserialize, Clone)]
pub struct CoordinationConfig {
    pub redis_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    #[serde(default = "default_rate_limits")]
    pub domain_rate_limits: HashMap<String, f64>,
    #[serde(default = "default_rate")]
    pub default_rate_per_minute: f64,
    #[serde(default = "default_fail_max")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_reset_timeout")]
    pub circuit_reset_timeout_seconds: u64,
    #[serde(default = "default_half_open_calls")]
    pub circuit_half_open_max_calls: u32,
    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,
    #[serde(default = "default_checkpoint_batch_size")]
    pub checkpoint_batch_size: u32,
}

fn default_rate_limits() -> HashMap<String, f64> {
    let mut m = HashMap::new();
    m.insert("imot.bg".to_string(), 10.0);
    m.insert("bazar.bg".to_string(), 10.0);
    m
}
fn default_rate() -> f64 {
    10.0
}
fn default_fail_max() -> u32 {
    5
}
fn default_reset_timeout() -> u64 {
    60
}
fn default_half_open_calls() -> u32 {
    2
}
fn default_true() -> bool {
    true
}
fn default_checkpoint_batch_size() -> u32 {
    10
}

/// Proxy lifecycle tunables, mirroring `original_source/config/settings.py`.
#[derive(Debug, Deserialize, Clone)]
pub struct ProxiesConfig {
    #[serde(default = "default_proxy_timeout")]
    pub proxy_timeout_seconds: u64,
    #[serde(default = "default_score_alpha")]
    pub score_success_multiplier: f64,
    #[serde(default = "default_score_beta")]
    pub score_failure_multiplier: f64,
    #[serde(default = "default_max_proxy_failures")]
    pub max_failures: u32,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_liveness_judges")]
    pub liveness_judges: Vec<String>,
    #[serde(default = "default_anonymity_judges")]
    pub anonymity_judges: Vec<String>,
    #[serde(default = "default_real_ip_urls")]
    pub real_ip_urls: Vec<String>,
    #[serde(default = "default_raw_proxy_source_path")]
    pub raw_proxy_source_path: String,
    #[serde(default = "default_liveness_prober_path")]
    pub liveness_prober_path: String,
    #[serde(default = "default_liveness_timeout")]
    pub liveness_per_proxy_timeout_seconds: u64,
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_seconds: u64,
    #[serde(default = "default_chunk_size")]
    pub validation_chunk_size: usize,
    #[serde(default)]
    pub target_site_urls: Vec<String>,
}

fn default_proxy_timeout() -> u64 {
    45
}
fn default_score_alpha() -> f64 {
    1.2
}
fn default_score_beta() -> f64 {
    0.6
}
fn default_max_proxy_failures() -> u32 {
    5
}
fn default_min_score() -> f64 {
    0.5
}
fn default_liveness_judges() -> Vec<String> {
    vec![
        "https://httpbin.org/ip".to_string(),
        "https://icanhazip.com".to_string(),
        "https://checkip.amazonaws.com".to_string(),
        "https://ifconfig.me/ip".to_string(),
        "https://ident.me".to_string(),
        "https://api.ipify.org".to_string(),
    ]
}
fn default_anonymity_judges() -> Vec<String> {
    vec![
        "https://httpbin.org/headers".to_string(),
        "http://httpbin.org/headers".to_string(),
        "https://httpbin.io/headers".to_string(),
        "http://httpbin.io/headers".to_string(),
        "https://ifconfig.me/all.json".to_string(),
    ]
}
fn default_real_ip_urls() -> Vec<String> {
    vec![
        "https://api.ipify.org".to_string(),
        "https://icanhazip.com".to_string(),
        "https://checkip.amazonaws.com".to_string(),
    ]
}
fn default_raw_proxy_source_path() -> String {
    "proxies/external/proxy-scraper-checker".to_string()
}
fn default_liveness_prober_path() -> String {
    "proxies/external/mubeng".to_string()
}
fn default_liveness_timeout() -> u64 {
    10
}
fn default_discovery_timeout() -> u64 {
    300
}
fn default_chunk_size() -> usize {
    100
}

/// Rotating Proxy Endpoint configuration (external `mubeng`-style binary).
#[derive(Debug, Deserialize, Clone)]
pub struct RotatorConfig {
    #[serde(default = "default_rotator_binary_path")]
    pub binary_path: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_rotation_mode")]
    pub rotation_mode: String,
    #[serde(default)]
    pub country_filter: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_live_proxies_json")]
    pub live_proxies_json_path: String,
    #[serde(default = "default_live_proxies_txt")]
    pub live_proxies_txt_path: String,
}

fn default_rotator_binary_path() -> String {
    "proxies/external/mubeng".to_string()
}
fn default_listen_addr() -> String {
    "127.0.0.1:8089".to_string()
}
fn default_rotation_mode() -> String {
    "random".to_string()
}
fn default_request_timeout() -> u64 {
    45
}
fn default_live_proxies_json() -> String {
    "proxies/live_proxies.json".to_string()
}
fn default_live_proxies_txt() -> String {
    "proxies/live_proxies.txt".to_string()
}

/// Per-site scrape-dispatch tunables. `original_source/config/scraping_config.py`
/// merges a base YAML doc with per-site overrides; here each site gets its own
/// TOML table and falls back to `Default` when absent.
#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    #[serde(default = "default_max_per_domain")]
    pub max_per_domain: usize,
    #[serde(default = "default_fetch_max_attempts")]
    pub fetch_max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_seconds: f64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_seconds: f64,
    #[serde(default = "default_fallback_encoding")]
    pub fallback_encoding: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            max_per_domain: default_max_per_domain(),
            fetch_max_attempts: default_fetch_max_attempts(),
            backoff_base_seconds: default_backoff_base(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_seconds: default_backoff_max(),
            fallback_encoding: default_fallback_encoding(),
        }
    }
}

fn default_max_per_domain() -> usize {
    2
}
fn default_fetch_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> f64 {
    1.0
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_backoff_max() -> f64 {
    300.0
}
fn default_fallback_encoding() -> String {
    "windows-1251".to_string()
}

impl AppConfig {
    pub fn site(&self, site: &str) -> SiteConfig {
        self.sites.get(site).cloned().unwrap_or_default()
    }

    pub fn rate_for_domain(&self, domain: &str) -> f64 {
        self.resilience
            .domain_rate_limits
            .get(domain)
            .copied()
            .unwrap_or(self.resilience.default_rate_per_minute)
    }
}
