use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use imotscrape_core::{ChunkResult, JobStatus, ScrapeOutcome};
use tracing::warn;

use crate::contracts::ListingStore;
use crate::progress::JobProgress;

#[derive(Debug, Clone, serde::Serialize)]
pub struct AggregateSummary {
    pub job_id: String,
    pub saved: u64,
    pub errors: u64,
    pub total: u64,
}

/// `AggregateResults(job_id, site)` (§4.12). `chunks` may contain `None`
/// entries where a worker died without reporting (§5's "unreported chunks
/// become missing entries" rule) — those contribute zero outcomes.
pub async fn aggregate_results(
    job_id: &str,
    chunks: Vec<Option<ChunkResult>>,
    listing_store: Arc<dyn ListingStore>,
    progress: Arc<JobProgress>,
) -> AggregateSummary {
    if let Err(e) = progress.set_status(job_id, JobStatus::Aggregating).await {
        warn!(job_id, error = %e, "could not set AGGREGATING status");
    }

    let outcomes: Vec<ScrapeOutcome> = chunks.into_iter().flatten().flatten().collect();
    let total = outcomes.len() as u64;

    let mut saved = 0u64;
    let mut errors = 0u64;

    for outcome in outcomes {
        match outcome {
            ScrapeOutcome::Listing(listing) => match listing_store.save(&listing).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    warn!(job_id, url = %listing.url, error = %e, "listing store save failed");
                    errors += 1;
                }
            },
            ScrapeOutcome::Error { .. } => errors += 1,
        }
    }

    let completed_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    if let Err(e) = progress.set_aggregated(job_id, saved, errors, completed_at).await {
        warn!(job_id, error = %e, "could not persist aggregation results");
    }

    AggregateSummary {
        job_id: job_id.to_string(),
        saved,
        errors,
        total,
    }
}
