use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use imotscrape_core::{AppConfig, ScrapeError, SiteConfig};
use imotscrape_resilience::{CheckpointManager, CircuitBreaker};
use tracing::warn;

use crate::contracts::{ListingStore, Parser};
use crate::fetcher::{FetchOptions, Fetcher};
use crate::progress::JobProgress;

pub struct DispatchResult {
    pub job_id: String,
    pub chord_id: String,
    pub total_urls: u64,
    pub total_chunks: u64,
}

/// Live checkpoint bookkeeping for one dispatch (§4.4/S3): `pending` starts
/// as the full URL set and shrinks as each worker finishes a URL, moving it
/// into `scraped`; every move persists through `CheckpointManager`'s own
/// batching policy so a crash mid-run leaves a checkpoint a restart can
/// resume from.
struct CheckpointState {
    scraped: Vec<String>,
    pending: Vec<String>,
}

pub(crate) struct CheckpointHandle {
    manager: Arc<CheckpointManager>,
    state: tokio::sync::Mutex<CheckpointState>,
}

impl CheckpointHandle {
    fn new(manager: Arc<CheckpointManager>, scraped: Vec<String>, pending: Vec<String>) -> Self {
        Self {
            manager,
            state: tokio::sync::Mutex::new(CheckpointState { scraped, pending }),
        }
    }

    /// Moves `url` out of `pending` and into `scraped`, then persists.
    pub(crate) async fn mark_done(&self, url: &str) {
        let mut state = self.state.lock().await;
        state.pending.retain(|u| u != url);
        state.scraped.push(url.to_string());
        if let Err(e) = self.manager.save(&state.scraped, &state.pending, false).await {
            warn!(url, error = %e, "could not persist checkpoint progress");
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// `Dispatch(site, seed_urls)` (§4.10). The chunk chord is spawned in the
/// background and `dispatch` returns as soon as the chord is emitted,
/// matching the donor Celery task's fire-and-return semantics — callers
/// follow progress via `status {job_id}`.
pub struct ScrapeDispatcher {
    config: Arc<AppConfig>,
    fetcher: Arc<Fetcher>,
    circuit_breaker: Arc<CircuitBreaker>,
    progress: Arc<JobProgress>,
    listing_store: Arc<dyn ListingStore>,
    checkpoint: Option<Arc<CheckpointManager>>,
}

impl ScrapeDispatcher {
    pub fn new(
        config: Arc<AppConfig>,
        fetcher: Arc<Fetcher>,
        circuit_breaker: Arc<CircuitBreaker>,
        progress: Arc<JobProgress>,
        listing_store: Arc<dyn ListingStore>,
    ) -> Self {
        Self {
            config,
            fetcher,
            circuit_breaker,
            progress,
            listing_store,
            checkpoint: None,
        }
    }

    /// Enables checkpoint persistence (§4.4) for every dispatch this instance
    /// runs. Without this, `pending`/`scraped` are tracked only in memory and
    /// a crash loses all progress — callers that want S3's crash-recovery
    /// behavior must opt in.
    pub fn with_checkpoint(mut self, checkpoint: Arc<CheckpointManager>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub async fn dispatch(
        &self,
        site: &str,
        seed_urls: &[String],
        parser: Arc<dyn Parser>,
    ) -> Result<DispatchResult, ScrapeError> {
        let job_id = self.new_job_id(site);
        let site_config = self.config.site(site);

        if let Err(e) = self.progress.init(&job_id, now_unix()).await {
            warn!(job_id, error = %e, "could not initialize job progress record");
        }

        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for seed in seed_urls {
            let options = FetchOptions::for_site(&site_config);
            match self.fetcher.fetch(seed, &options).await {
                Ok(fetched) => match parser.extract_search_results(&fetched.text, seed) {
                    Ok(found) => {
                        for url in found {
                            if seen.insert(url.clone()) {
                                urls.push(url);
                            }
                        }
                    }
                    Err(e) => warn!(seed, error = %e, "seed url search-result extraction failed"),
                },
                Err(e) => warn!(seed, error = %e, "seed url fetch failed"),
            }
        }

        self.dispatch_collected(job_id, site, site_config, Vec::new(), urls, parser).await
    }

    /// Resumes a dispatch directly from a checkpoint's `pending` set (§4.4/S3),
    /// skipping seed fetch and `extract_search_results` entirely — `pending`
    /// already holds individual listing URLs, the same unit `scrape_chunk`
    /// consumes, not search-result pages. `scraped_so_far` carries the prior
    /// run's already-completed URLs forward so a second crash doesn't make the
    /// checkpoint forget them.
    pub async fn dispatch_pending(
        &self,
        site: &str,
        scraped_so_far: &[String],
        pending_urls: &[String],
        parser: Arc<dyn Parser>,
    ) -> Result<DispatchResult, ScrapeError> {
        let job_id = self.new_job_id(site);
        let site_config = self.config.site(site);

        if let Err(e) = self.progress.init(&job_id, now_unix()).await {
            warn!(job_id, error = %e, "could not initialize job progress record");
        }

        self.dispatch_collected(
            job_id,
            site,
            site_config,
            scraped_so_far.to_vec(),
            pending_urls.to_vec(),
            parser,
        )
        .await
    }

    fn new_job_id(&self, site: &str) -> String {
        format!("scrape_{site}_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
    }

    async fn dispatch_collected(
        &self,
        job_id: String,
        site: &str,
        site_config: SiteConfig,
        scraped_so_far: Vec<String>,
        urls: Vec<String>,
        parser: Arc<dyn Parser>,
    ) -> Result<DispatchResult, ScrapeError> {
        if urls.is_empty() {
            self.progress.set_aggregated(&job_id, 0, 0, now_unix()).await.ok();
            return Ok(DispatchResult {
                job_id,
                chord_id: String::new(),
                total_urls: 0,
                total_chunks: 0,
            });
        }

        let checkpoint = self
            .checkpoint
            .clone()
            .map(|manager| Arc::new(CheckpointHandle::new(manager, scraped_so_far, urls.clone())));

        let chunk_size = (site_config.max_per_domain * 10).max(20);
        let chunks: Vec<Vec<String>> = urls.chunks(chunk_size).map(|c| c.to_vec()).collect();
        let total_urls = urls.len() as u64;
        let total_chunks = chunks.len() as u64;

        self.progress
            .set_dispatched(&job_id, total_chunks, total_urls)
            .await
            .ok();

        let chord_id = uuid::Uuid::new_v4().to_string();
        self.spawn_chord(job_id.clone(), site.to_string(), chunks, parser, site_config, checkpoint);

        Ok(DispatchResult {
            job_id,
            chord_id,
            total_urls,
            total_chunks,
        })
    }

    fn spawn_chord(
        &self,
        job_id: String,
        site: String,
        chunks: Vec<Vec<String>>,
        parser: Arc<dyn Parser>,
        site_config: SiteConfig,
        checkpoint: Option<Arc<CheckpointHandle>>,
    ) {
        let fetcher = self.fetcher.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let progress = self.progress.clone();
        let listing_store = self.listing_store.clone();

        tokio::spawn(async move {
            let worker_job_id = job_id.clone();
            let worker_site = site.clone();
            let results = imotscrape_coordination::broker::group(chunks, move |chunk| {
                crate::worker::scrape_chunk(
                    chunk,
                    worker_job_id.clone(),
                    fetcher.clone(),
                    circuit_breaker.clone(),
                    parser.clone(),
                    progress.clone(),
                    worker_site.clone(),
                    site_config.clone(),
                    checkpoint.clone(),
                )
            })
            .await;

            crate::aggregator::aggregate_results(&job_id, results, listing_store, progress).await;
        });
    }
}
