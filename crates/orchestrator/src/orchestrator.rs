use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use imotscrape_coordination::Store;
use imotscrape_proxies::{ProxyLifecycleEngine, RotatingProxyEndpoint};
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::OrchestratorError;

const POLL_INTERVAL_SECONDS: u64 = 15;

/// Lifecycle manager that owns the coordination store handle, the proxy
/// lifecycle engine, and the rotating proxy endpoint's process (§4.13). The
/// scrape dispatcher's chord workers are in-process `tokio::spawn` tasks, not
/// separate OS processes, so this crate's "broker worker" restart policy
/// narrows to the one genuinely out-of-process long-lived child it
/// supervises: the `RotatingProxyBinary` handle. Documented in DESIGN.md.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    engine: Arc<ProxyLifecycleEngine>,
    live_proxies_json_path: PathBuf,
    rotator_binary_path: String,
    rotator_listen_addr: String,
    rotator_rotation_mode: String,
    rotator_country_filter: Vec<String>,
    rotator_log_path: PathBuf,
    shutdown: broadcast::Sender<()>,
    endpoint: Mutex<Option<RotatingProxyEndpoint>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<ProxyLifecycleEngine>,
        live_proxies_json_path: PathBuf,
        rotator_binary_path: String,
        rotator_listen_addr: String,
        rotator_rotation_mode: String,
        rotator_country_filter: Vec<String>,
        rotator_log_path: PathBuf,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            store,
            engine,
            live_proxies_json_path,
            rotator_binary_path,
            rotator_listen_addr,
            rotator_rotation_mode,
            rotator_country_filter,
            rotator_log_path,
            shutdown,
            endpoint: Mutex::new(None),
        }
    }

    /// `Start()` (§4.13): brings up the rotating proxy endpoint pointed at
    /// the currently-published proxy file and installs the signal handler
    /// that drives `Stop()`.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let endpoint = RotatingProxyEndpoint::start(
            &self.rotator_binary_path,
            &self.live_proxies_json_path,
            &self.rotator_listen_addr,
            &self.rotator_rotation_mode,
            &self.rotator_country_filter,
            self.rotator_log_path.clone(),
        )
        .await?;
        *self.endpoint.lock().await = Some(endpoint);

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "could not install SIGTERM handler");
                        let _ = ctrl_c.await;
                        let _ = shutdown.send(());
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT"),
                    _ = term.recv() => info!("received SIGTERM"),
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
                info!("received ctrl-c");
            }
            let _ = shutdown.send(());
        });

        Ok(())
    }

    /// `Stop()`: terminates the rotating endpoint's process group, escalating
    /// to SIGKILL after a 5 s grace period (§5's "session/process group"
    /// requirement).
    pub async fn stop(&self) {
        if let Some(endpoint) = self.endpoint.lock().await.take() {
            endpoint.stop(Duration::from_secs(5)).await;
        }
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.recv().await;
    }

    /// `WaitForProxies(min_count, timeout)` (§4.13). Polls the usable-proxy
    /// count from the published set; if below `min_count`, triggers
    /// `RefreshChain` and waits on its completion.
    pub async fn wait_for_proxies(&self, min_count: usize, timeout: Duration) -> Result<bool, OrchestratorError> {
        let deadline = Instant::now() + timeout;
        loop {
            let count = self.usable_proxy_count().await;
            if count >= min_count {
                return Ok(true);
            }

            info!(count, min_count, "usable proxy count below threshold, triggering refresh");
            let mtime_before = file_mtime(&self.live_proxies_json_path).await;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }

            let refreshed = self
                .wait_for_refresh_completion(mtime_before, min_count, remaining)
                .await?;
            if refreshed {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    /// `WaitForRefreshCompletion(mtime_before, min_count, timeout)`. There is
    /// no separate chord/task id to await in this design — `RefreshChain`
    /// runs to completion inline — so this directly awaits the chain and
    /// falls back to file-mtime polling only if the chain itself fails.
    /// `timeout = Duration::ZERO` waits indefinitely.
    pub async fn wait_for_refresh_completion(
        &self,
        mtime_before: Option<std::time::SystemTime>,
        min_count: usize,
        timeout: Duration,
    ) -> Result<bool, OrchestratorError> {
        let refresh = self.engine.refresh_chain();
        let outcome = if timeout.is_zero() {
            Ok(refresh.await)
        } else {
            tokio::time::timeout(timeout, refresh).await
        };

        match outcome {
            Ok(Ok(proxies)) => return Ok(proxies.len() >= min_count),
            Ok(Err(e)) => warn!(error = %e, "RefreshChain failed, falling back to file-mtime polling"),
            Err(_) => warn!("RefreshChain timed out, falling back to file-mtime polling"),
        }

        self.poll_file_mtime_change(mtime_before, min_count, timeout).await
    }

    async fn poll_file_mtime_change(
        &self,
        mtime_before: Option<std::time::SystemTime>,
        min_count: usize,
        timeout: Duration,
    ) -> Result<bool, OrchestratorError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mtime_now = file_mtime(&self.live_proxies_json_path).await;
            if mtime_now.is_some() && mtime_now != mtime_before {
                return Ok(self.usable_proxy_count().await >= min_count);
            }
            if !timeout.is_zero() && Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECONDS)).await;
        }
    }

    async fn usable_proxy_count(&self) -> usize {
        match tokio::fs::read(&self.live_proxies_json_path).await {
            Ok(body) => serde_json::from_slice::<Vec<imotscrape_core::LiveProxy>>(&body)
                .map(|v| v.len())
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Admin reset of a circuit breaker entry to `CLOSED` (the `reset-circuit`
    /// CLI command), implemented here directly against the store rather than
    /// threading a `CircuitBreaker` handle through, since it is a one-shot
    /// administrative action outside the request path.
    pub async fn reset_circuit(&self, domain: &str) -> Result<(), OrchestratorError> {
        let state_key = imotscrape_coordination::keys::circuit_state(domain);
        let failures_key = imotscrape_coordination::keys::circuit_failures(domain);
        let opened_at_key = imotscrape_coordination::keys::circuit_opened_at(domain);
        let last_block_key = imotscrape_coordination::keys::circuit_last_block(domain);

        self.store
            .pipeline_set(&[(state_key.as_str(), "CLOSED"), (failures_key.as_str(), "0")])
            .await?;
        self.store
            .delete(&[opened_at_key.as_str(), last_block_key.as_str()])
            .await?;
        Ok(())
    }
}

async fn file_mtime(path: &std::path::Path) -> Option<std::time::SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use imotscrape_coordination::FakeStore;
    use imotscrape_core::{Anonymity, LiveProxy, Protocol};

    fn test_engine() -> Arc<ProxyLifecycleEngine> {
        Arc::new(ProxyLifecycleEngine::new(
            "/bin/true".to_string(),
            "/bin/true".to_string(),
            Duration::from_secs(1),
            Duration::from_secs(1),
            10,
            std::env::temp_dir(),
            std::env::temp_dir().join("live_proxies.json"),
            std::env::temp_dir().join("live_proxies.txt"),
            vec![],
            vec![],
            Duration::from_secs(1),
        ))
    }

    fn make_orchestrator(live_json: PathBuf) -> Orchestrator {
        Orchestrator::new(
            Arc::new(FakeStore::new()),
            test_engine(),
            live_json,
            "/bin/true".to_string(),
            "127.0.0.1:0".to_string(),
            "random".to_string(),
            vec![],
            std::env::temp_dir().join("rotator.log"),
        )
    }

    fn sample_proxy() -> LiveProxy {
        LiveProxy {
            protocol: Protocol::Http,
            host: "203.0.113.9".to_string(),
            port: 8080,
            anonymity: Anonymity::Elite,
            exit_ip: Some("203.0.113.9".to_string()),
            response_time_ms: 120,
            last_checked_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn reset_circuit_clears_all_tracked_keys() {
        let orchestrator = make_orchestrator(std::env::temp_dir().join("unused.json"));
        orchestrator
            .store
            .pipeline_set(&[
                ("circuit:imot.bg:state", "OPEN"),
                ("circuit:imot.bg:failures", "5"),
            ])
            .await
            .unwrap();

        orchestrator.reset_circuit("imot.bg").await.unwrap();

        assert_eq!(orchestrator.store.get("circuit:imot.bg:state").await.unwrap(), Some("CLOSED".to_string()));
        assert_eq!(orchestrator.store.get("circuit:imot.bg:failures").await.unwrap(), Some("0".to_string()));
        assert_eq!(orchestrator.store.get("circuit:imot.bg:opened_at").await.unwrap(), None);
    }

    #[tokio::test]
    async fn wait_for_proxies_returns_immediately_when_already_satisfied() {
        let dir = std::env::temp_dir().join(format!("orch-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let live_json = dir.join("live_proxies.json");
        let proxies = vec![sample_proxy(), sample_proxy(), sample_proxy()];
        tokio::fs::write(&live_json, serde_json::to_vec(&proxies).unwrap()).await.unwrap();

        let orchestrator = make_orchestrator(live_json);
        let satisfied = orchestrator
            .wait_for_proxies(2, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(satisfied);
    }
}
