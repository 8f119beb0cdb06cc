use std::sync::Arc;

use imotscrape_coordination::{keys, Store, StoreError};
use imotscrape_core::JobStatus;
use tracing::warn;

const TTL: u64 = keys::JOB_KEY_TTL_SECONDS;

/// Thin wrapper over the Coordination Store for `scraping:{job_id}:*` keys
/// (§6). Every write is TTL'd so abandoned jobs self-expire after an hour.
pub struct JobProgress {
    store: Arc<dyn Store>,
}

impl JobProgress {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn init(&self, job_id: &str, started_at_unix: i64) -> Result<(), StoreError> {
        self.store
            .set_ex(&keys::scraping_status(job_id), JobStatus::Collecting.to_string().as_str(), TTL)
            .await?;
        self.store
            .set_ex(&keys::scraping_started_at(job_id), &started_at_unix.to_string(), TTL)
            .await?;
        Ok(())
    }

    pub async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<(), StoreError> {
        self.store
            .set_ex(&keys::scraping_status(job_id), status.to_string().as_str(), TTL)
            .await
    }

    pub async fn set_dispatched(&self, job_id: &str, total_chunks: u64, total_urls: u64) -> Result<(), StoreError> {
        self.store
            .set_ex(&keys::scraping_total_chunks(job_id), &total_chunks.to_string(), TTL)
            .await?;
        self.store
            .set_ex(&keys::scraping_total_urls(job_id), &total_urls.to_string(), TTL)
            .await?;
        self.set_status(job_id, JobStatus::Dispatched).await
    }

    /// Atomic post-increment of `completed_chunks`, also flipping status to
    /// `PROCESSING` on the first chunk to complete (§4.11 step 4).
    pub async fn record_chunk_completed(&self, job_id: &str) -> Result<i64, StoreError> {
        let completed = self.store.incr(&keys::scraping_completed_chunks(job_id)).await?;
        if completed == 1 {
            self.set_status(job_id, JobStatus::Processing).await?;
        }
        Ok(completed)
    }

    pub async fn set_aggregated(&self, job_id: &str, result_count: u64, error_count: u64, completed_at_unix: i64) -> Result<(), StoreError> {
        self.store
            .set_ex(&keys::scraping_result_count(job_id), &result_count.to_string(), TTL)
            .await?;
        self.store
            .set_ex(&keys::scraping_error_count(job_id), &error_count.to_string(), TTL)
            .await?;
        self.store
            .set_ex(&keys::scraping_completed_at(job_id), &completed_at_unix.to_string(), TTL)
            .await?;
        self.set_status(job_id, JobStatus::Complete).await
    }

    pub async fn fail(&self, job_id: &str) {
        if let Err(e) = self.set_status(job_id, JobStatus::Failed).await {
            warn!(job_id, error = %e, "could not persist FAILED status");
        }
    }

    /// Renders the `status {job_id}` CLI snapshot.
    pub async fn snapshot(&self, job_id: &str) -> JobSnapshot {
        let get_u64 = |k: String| {
            let store = self.store.clone();
            async move { store.get(&k).await.ok().flatten().and_then(|v| v.parse().ok()) }
        };

        JobSnapshot {
            job_id: job_id.to_string(),
            status: self
                .store
                .get(&keys::scraping_status(job_id))
                .await
                .ok()
                .flatten()
                .and_then(|s| s.parse().ok()),
            total_chunks: get_u64(keys::scraping_total_chunks(job_id)).await,
            completed_chunks: get_u64(keys::scraping_completed_chunks(job_id)).await,
            total_urls: get_u64(keys::scraping_total_urls(job_id)).await,
            result_count: get_u64(keys::scraping_result_count(job_id)).await,
            error_count: get_u64(keys::scraping_error_count(job_id)).await,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: Option<JobStatus>,
    pub total_chunks: Option<u64>,
    pub completed_chunks: Option<u64>,
    pub total_urls: Option<u64>,
    pub result_count: Option<u64>,
    pub error_count: Option<u64>,
}
