use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::error::ProxyError;

/// Writes `body` to `path` atomically (temp file + fsync + rename), so a
/// reader never observes a partial write (§4.8's idempotency requirement and
/// §9's "atomic file writes" pattern).
pub async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), ProxyError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(body).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("imotscrape-atomic-write-test-{}-{name}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let path = tmp_path("live_proxies.json");
        write_atomic(&path, b"[1,2,3]").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"[1,2,3]");
        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn second_write_atomically_replaces_the_first() {
        let path = tmp_path("live_proxies.json");
        write_atomic(&path, b"old").await.unwrap();
        write_atomic(&path, b"new").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"new");

        let tmp = path.with_extension("json.tmp");
        assert!(tokio::fs::metadata(&tmp).await.is_err(), "temp file must not survive the rename");
        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = std::env::temp_dir().join(format!("imotscrape-atomic-write-dir-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("live_proxies.json");
        write_atomic(&path, b"x").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"x");
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
