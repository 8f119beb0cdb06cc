use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ProxyError;
use crate::external_process::ExternalProcess;

/// Handle to the externally-run `RotatingProxyBinary` (§4.9, §6). The binary
/// forwards requests through a uniformly-random live proxy and is started
/// with its own file-watch flag (`-w`, per
/// `original_source/proxies/mubeng_manager.py`'s "Solution F" invocation) so
/// it reloads its proxy list itself on a modification to the published
/// proxy file, without dropping in-flight connections — this handle only
/// owns the process's lifecycle, not its reload signaling.
pub struct RotatingProxyEndpoint {
    process: ExternalProcess,
}

impl RotatingProxyEndpoint {
    pub async fn start(
        binary_path: &str,
        proxies_file: &Path,
        listen_addr: &str,
        rotation_mode: &str,
        country_filter: &[String],
        log_path: PathBuf,
    ) -> Result<Self, ProxyError> {
        let mut args = vec![
            "-f".to_string(),
            proxies_file.display().to_string(),
            "-l".to_string(),
            listen_addr.to_string(),
            "-m".to_string(),
            rotation_mode.to_string(),
            "-w".to_string(),
        ];
        if !country_filter.is_empty() {
            args.push("-c".to_string());
            args.push(country_filter.join(","));
        }

        let process = ExternalProcess::spawn(binary_path, &args, log_path).await?;

        Ok(Self { process })
    }

    pub async fn is_alive(&mut self) -> bool {
        self.process.is_alive().await
    }

    pub async fn stop(mut self, grace: Duration) {
        self.process.terminate(grace).await;
    }
}
