use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use imotscrape_core::{LiveProxy, RawProxy};
use tracing::{info, warn};

use crate::anonymity::{AnonymityClassifier, RealIpCache};
use crate::atomic_write::write_atomic;
use crate::error::ProxyError;
use crate::external_process::ExternalProcess;
use crate::quality::{same_slash_24, QualityProber};

struct Inner {
    raw_proxy_source_path: String,
    liveness_prober_path: String,
    discovery_timeout: Duration,
    per_proxy_timeout: Duration,
    validation_chunk_size: usize,
    work_dir: PathBuf,
    live_json_path: PathBuf,
    live_txt_path: PathBuf,
    classifier: AnonymityClassifier,
    prober: QualityProber,
    real_ip_cache: RealIpCache,
}

/// `RefreshChain()` (§4.8): discovery → chunked validation fan-out →
/// enrichment → atomic publish. The chunk fan-out is the `coordination`
/// crate's `group` broker primitive, matching the chord pattern
/// `original_source/proxies/tasks.py` builds with Celery `group`+`chord`.
pub struct ProxyLifecycleEngine(Arc<Inner>);

impl ProxyLifecycleEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        raw_proxy_source_path: String,
        liveness_prober_path: String,
        discovery_timeout: Duration,
        per_proxy_timeout: Duration,
        validation_chunk_size: usize,
        work_dir: PathBuf,
        live_json_path: PathBuf,
        live_txt_path: PathBuf,
        anonymity_judges: Vec<String>,
        real_ip_urls: Vec<String>,
        judge_timeout: Duration,
    ) -> Self {
        Self(Arc::new(Inner {
            raw_proxy_source_path,
            liveness_prober_path,
            discovery_timeout,
            per_proxy_timeout,
            validation_chunk_size: validation_chunk_size.max(1),
            work_dir,
            live_json_path,
            live_txt_path,
            classifier: AnonymityClassifier::new(anonymity_judges, judge_timeout),
            prober: QualityProber::new(real_ip_urls.clone(), judge_timeout),
            real_ip_cache: RealIpCache::new(real_ip_urls, judge_timeout),
        }))
    }

    pub async fn refresh_chain(&self) -> Result<Vec<LiveProxy>, ProxyError> {
        let raw = self.discover().await?;
        info!(count = raw.len(), "discovered raw proxies");

        let chunks: Vec<Vec<RawProxy>> = raw
            .chunks(self.0.validation_chunk_size)
            .map(|c| c.to_vec())
            .collect();

        let inner = self.0.clone();
        let results = imotscrape_coordination::broker::group(chunks, move |chunk| {
            let inner = inner.clone();
            async move { check_chunk(inner, chunk).await }
        })
        .await;

        let mut live: Vec<LiveProxy> = results.into_iter().flatten().flatten().collect();
        // Callback (§4.8 step 4): drop Transparent, sort by ascending response time.
        live.retain(|p| p.anonymity.is_publishable());
        live.sort_by_key(|p| p.response_time_ms);

        self.publish(&live).await?;
        info!(count = live.len(), "published live proxy set");
        Ok(live)
    }

    async fn discover(&self) -> Result<Vec<RawProxy>, ProxyError> {
        let out_path = self.0.work_dir.join("raw_proxies.json");
        let log_path = self.0.work_dir.join("raw_proxy_source.log");
        let args = vec!["-o".to_string(), out_path.to_string_lossy().to_string()];

        let mut proc = ExternalProcess::spawn(&self.0.raw_proxy_source_path, &args, log_path).await?;
        match proc.wait_timeout(self.0.discovery_timeout).await? {
            Some(_) => {}
            None => {
                proc.terminate(Duration::from_secs(5)).await;
                return Err(ProxyError::SourceTimeout);
            }
        }

        let body = tokio::fs::read(&out_path).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn publish(&self, proxies: &[LiveProxy]) -> Result<(), ProxyError> {
        let json = serde_json::to_vec_pretty(proxies)?;
        write_atomic(&self.0.live_json_path, &json).await?;

        let lines = proxies
            .iter()
            .map(|p| p.url())
            .collect::<Vec<_>>()
            .join("\n");
        write_atomic(&self.0.live_txt_path, lines.as_bytes()).await?;
        Ok(())
    }
}

async fn check_chunk(inner: Arc<Inner>, chunk: Vec<RawProxy>) -> Vec<LiveProxy> {
    let token = uuid::Uuid::new_v4();
    let input_path = inner.work_dir.join(format!("chunk_{token}_in.txt"));
    let output_path = inner.work_dir.join(format!("chunk_{token}_out.txt"));
    let log_path = inner.work_dir.join(format!("chunk_{token}_prober.log"));

    let body: String = chunk.iter().map(|p| format!("{}\n", p.url())).collect();
    if let Err(e) = tokio::fs::write(&input_path, body).await {
        warn!(error = %e, "could not write liveness input chunk, skipping chunk");
        return vec![];
    }

    let args = vec![
        "-f".to_string(),
        input_path.display().to_string(),
        "-o".to_string(),
        output_path.display().to_string(),
        "--timeout".to_string(),
        inner.per_proxy_timeout.as_secs().to_string(),
    ];

    let mut proc = match ExternalProcess::spawn_ptywrapped(&inner.liveness_prober_path, &args, log_path).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "liveness prober failed to spawn, skipping chunk");
            let _ = tokio::fs::remove_file(&input_path).await;
            return vec![];
        }
    };

    let chunk_budget = inner.per_proxy_timeout * (chunk.len() as u32).max(1);
    if proc.wait_timeout(chunk_budget).await.ok().flatten().is_none() {
        warn!("liveness prober exceeded its per-chunk budget, terminating");
        proc.terminate(Duration::from_secs(5)).await;
    }

    let alive_urls: HashSet<String> = match tokio::fs::read_to_string(&output_path).await {
        Ok(body) => body.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect(),
        Err(_) => HashSet::new(),
    };
    let _ = tokio::fs::remove_file(&input_path).await;
    let _ = tokio::fs::remove_file(&output_path).await;

    let real_ip = inner.real_ip_cache.get(false).await;
    let mut enriched = Vec::new();

    for proxy in chunk.iter().filter(|p| alive_urls.contains(&p.url())) {
        let start = Instant::now();
        let url = proxy.url();

        let (anonymity, exit_ip) = inner.classifier.classify(&url, real_ip, None).await;

        if exceeds_operator_subnet(real_ip, exit_ip.as_deref()) {
            continue;
        }

        let (passes, quality_exit_ip) = inner.prober.probe(&url, real_ip).await;
        if !passes {
            continue;
        }

        enriched.push(LiveProxy {
            protocol: proxy.protocol,
            host: proxy.host.clone(),
            port: proxy.port,
            anonymity,
            exit_ip: exit_ip.or_else(|| quality_exit_ip.map(|ip| ip.to_string())),
            response_time_ms: start.elapsed().as_millis() as u64,
            last_checked_at: chrono::Utc::now(),
        });
    }

    enriched
}

fn exceeds_operator_subnet(real_ip: Option<Ipv4Addr>, exit_ip: Option<&str>) -> bool {
    match (real_ip, exit_ip.and_then(|s| s.parse::<Ipv4Addr>().ok())) {
        (Some(real_ip), Some(exit_ip)) => same_slash_24(real_ip, exit_ip),
        _ => false,
    }
}
