use std::sync::Arc;

use imotscrape_core::{ChunkResult, ExtractedListing, ScrapeOutcome, SiteConfig};
use imotscrape_resilience::{domain_of, CircuitBreaker};
use tracing::warn;

use crate::contracts::Parser;
use crate::dispatcher::CheckpointHandle;
use crate::fetcher::{FetchOptions, Fetcher};
use crate::progress::JobProgress;

/// `ScrapeChunk(chunk, job_id, site)` (§4.11) — one worker's unit of the
/// chord's group. Per-URL errors accumulate into the chunk result rather
/// than aborting the chunk (§7's propagation policy). Every URL, whatever
/// its outcome, is reported to `checkpoint` — a URL that was attempted and
/// failed or was skipped is no longer pending on a resume either.
pub async fn scrape_chunk(
    urls: Vec<String>,
    job_id: String,
    fetcher: Arc<Fetcher>,
    circuit_breaker: Arc<CircuitBreaker>,
    parser: Arc<dyn Parser>,
    progress: Arc<JobProgress>,
    site: String,
    site_config: SiteConfig,
    checkpoint: Option<Arc<CheckpointHandle>>,
) -> ChunkResult {
    let mut outcomes = Vec::with_capacity(urls.len());
    let options = FetchOptions::for_site(&site_config);

    for url in urls {
        let domain = domain_of(&url);

        if !circuit_breaker.can_request(&domain).await {
            outcomes.push(ScrapeOutcome::skipped(&url, "circuit_open"));
            if let Some(checkpoint) = &checkpoint {
                checkpoint.mark_done(&url).await;
            }
            continue;
        }

        let fetched = match fetcher.fetch(&url, &options).await {
            Ok(f) => f,
            Err(e) => {
                warn!(url, error = %e, "fetch failed for listing url");
                outcomes.push(ScrapeOutcome::error(&url, e.tag()));
                if let Some(checkpoint) = &checkpoint {
                    checkpoint.mark_done(&url).await;
                }
                continue;
            }
        };

        match parser.extract_listing(&fetched.text, &url) {
            Ok(Some(listing)) => outcomes.push(ScrapeOutcome::Listing(listing)),
            Ok(None) => outcomes.push(ScrapeOutcome::error(&url, "extraction_failed")),
            Err(e) => {
                warn!(url, error = %e, "parser raised on listing extraction");
                outcomes.push(ScrapeOutcome::error(&url, "extraction_failed"));
            }
        }

        if let Some(checkpoint) = &checkpoint {
            checkpoint.mark_done(&url).await;
        }
    }

    if let Err(e) = progress.record_chunk_completed(&job_id).await {
        warn!(job_id, site, error = %e, "could not record chunk completion");
    }

    outcomes
}

/// Reconstructs a transport-form listing back into `ExtractedListing` — a
/// no-op today since `ScrapeOutcome::Listing` already carries the typed
/// value, kept as the named seam §4.12 describes ("reconstruct a listing
/// object") in case a future transport serializes chunk results to JSON
/// across a process boundary.
pub fn reconstruct(listing: ExtractedListing) -> ExtractedListing {
    listing
}
