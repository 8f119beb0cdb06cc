use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use imotscrape_core::Checkpoint;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Periodic progress snapshots for resumable scrapes (§4.4). Grounded in
/// `original_source/resilience/checkpoint.py`'s batching policy, but writes
/// atomically (`.tmp` + fsync + rename) where the donor used a plain
/// `json.dump` that could leave a truncated file on a crash mid-write.
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
    name: String,
    batch_size: u32,
    counter: AtomicU32,
}

impl CheckpointManager {
    pub fn new(checkpoint_dir: impl Into<PathBuf>, name: impl Into<String>, batch_size: u32) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            name: name.into(),
            batch_size: batch_size.max(1),
            counter: AtomicU32::new(0),
        }
    }

    fn path(&self) -> PathBuf {
        self.checkpoint_dir.join(format!("{}.json", self.name))
    }

    /// `save(scraped, pending, force)` (§4.4). Skips the write unless this is
    /// the `batch_size`th call since the last save, or `force` is set. Returns
    /// whether a write actually happened.
    pub async fn save(&self, scraped: &[String], pending: &[String], force: bool) -> Result<bool, std::io::Error> {
        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if !force && count % self.batch_size != 0 {
            return Ok(false);
        }

        let checkpoint = Checkpoint {
            name: self.name.clone(),
            scraped: scraped.to_vec(),
            pending: pending.to_vec(),
            saved_at: chrono::Utc::now(),
        };

        self.write_atomic(&checkpoint).await?;
        debug!(name = %self.name, scraped = scraped.len(), pending = pending.len(), "checkpoint saved");
        Ok(true)
    }

    async fn write_atomic(&self, checkpoint: &Checkpoint) -> Result<(), std::io::Error> {
        tokio::fs::create_dir_all(&self.checkpoint_dir).await?;
        let final_path = self.path();
        let tmp_path = final_path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    /// `load()` (§4.4) — returns `None` if no checkpoint has ever been saved.
    pub async fn load(&self) -> Result<Option<Checkpoint>, std::io::Error> {
        match tokio::fs::read(self.path()).await {
            Ok(body) => {
                let checkpoint = serde_json::from_slice(&body)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!(name = %self.name, error = %e, "error reading checkpoint");
                Err(e)
            }
        }
    }

    /// `clear()` (§4.4) — removes the checkpoint after a successful run.
    pub async fn clear(&self) -> Result<(), std::io::Error> {
        match tokio::fs::remove_file(self.path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_save_until_batch_size_reached() {
        let dir = tempfile_dir();
        let mgr = CheckpointManager::new(&dir, "imot.bg", 3);

        assert!(!mgr.save(&["a".into()], &[], false).await.unwrap());
        assert!(!mgr.save(&["a".into(), "b".into()], &[], false).await.unwrap());
        assert!(mgr.save(&["a".into(), "b".into(), "c".into()], &[], false).await.unwrap());

        let loaded = mgr.load().await.unwrap().unwrap();
        assert_eq!(loaded.scraped.len(), 3);
    }

    #[tokio::test]
    async fn force_bypasses_batching() {
        let dir = tempfile_dir();
        let mgr = CheckpointManager::new(&dir, "imot.bg", 10);
        assert!(mgr.save(&["a".into()], &["b".into()], true).await.unwrap());
    }

    #[tokio::test]
    async fn clear_removes_checkpoint() {
        let dir = tempfile_dir();
        let mgr = CheckpointManager::new(&dir, "imot.bg", 1);
        mgr.save(&["a".into()], &[], true).await.unwrap();
        assert!(mgr.load().await.unwrap().is_some());
        mgr.clear().await.unwrap();
        assert!(mgr.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_without_prior_save_is_none() {
        let dir = tempfile_dir();
        let mgr = CheckpointManager::new(&dir, "never-saved", 1);
        assert!(mgr.load().await.unwrap().is_none());
    }

    fn tempfile_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("imotscrape-checkpoint-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
