mod cli;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser as _;
use tracing::{info, warn};

use imotscrape_core::AppConfig;
use imotscrape_coordination::RedisStore;
use imotscrape_orchestrator::Orchestrator;
use imotscrape_proxies::ProxyLifecycleEngine;
use imotscrape_resilience::{CheckpointManager, CircuitBreaker, RateLimiter};
use imotscrape_scraping::{Fetcher, JobProgress, ListingStore, NullListingStore, Parser, ScrapeDispatcher};

use crate::cli::{Cli, Commands};

// glibc malloc doesn't release memory well under the fan-out/fan-in chunk
// workload this binary drives; mimalloc avoids the long-run RSS creep.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn exit_code_for(e: &anyhow::Error) -> i32 {
    if let Some(oe) = e.downcast_ref::<imotscrape_orchestrator::OrchestratorError>() {
        return oe.exit_code();
    }
    1
}

/// Site parsers are an external collaborator capability (§6, §1 out-of-scope):
/// this binary carries only the registration seam, not a concrete site parser.
/// A deployment wires its own `Parser` implementations in before calling `run`.
fn parser_registry() -> HashMap<String, Arc<dyn Parser>> {
    HashMap::new()
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using embedded defaults");
        include_str!("../config/default.toml").to_string()
    });
    let config: AppConfig = toml::from_str(&config_str).context("parsing config file")?;
    let config = Arc::new(config);

    let store = match RedisStore::connect(&config.coordination.redis_url).await {
        Ok(store) => Arc::new(store) as Arc<dyn imotscrape_coordination::Store>,
        Err(e) => {
            return Err(imotscrape_orchestrator::OrchestratorError::InfrastructureUnreachable(format!(
                "coordination store unreachable: {e}"
            ))
            .into());
        }
    };

    match cli.command {
        Commands::Run { site, seeds, min_proxies } => cmd_run(config, store, site, seeds, min_proxies).await,
        Commands::RefreshProxies => cmd_refresh_proxies(config).await,
        Commands::Status { job_id } => cmd_status(store, job_id).await,
        Commands::ResetCircuit { domain } => cmd_reset_circuit(config, store, domain).await,
    }
}

fn build_engine(config: &AppConfig) -> ProxyLifecycleEngine {
    ProxyLifecycleEngine::new(
        config.proxies.raw_proxy_source_path.clone(),
        config.proxies.liveness_prober_path.clone(),
        Duration::from_secs(config.proxies.discovery_timeout_seconds),
        Duration::from_secs(config.proxies.liveness_per_proxy_timeout_seconds),
        config.proxies.validation_chunk_size,
        PathBuf::from(&config.general.data_dir).join("proxies"),
        PathBuf::from(&config.rotator.live_proxies_json_path),
        PathBuf::from(&config.rotator.live_proxies_txt_path),
        config.proxies.anonymity_judges.clone(),
        config.proxies.real_ip_urls.clone(),
        Duration::from_secs(config.proxies.proxy_timeout_seconds),
    )
}

fn build_orchestrator(config: &AppConfig, store: Arc<dyn imotscrape_coordination::Store>) -> Orchestrator {
    let engine = Arc::new(build_engine(config));
    Orchestrator::new(
        store,
        engine,
        PathBuf::from(&config.rotator.live_proxies_json_path),
        config.rotator.binary_path.clone(),
        config.rotator.listen_addr.clone(),
        config.rotator.rotation_mode.clone(),
        config.rotator.country_filter.clone(),
        PathBuf::from(&config.general.data_dir).join("logs/rotator.log"),
    )
}

async fn cmd_refresh_proxies(config: Arc<AppConfig>) -> Result<()> {
    let engine = build_engine(&config);
    let live = engine.refresh_chain().await.context("RefreshChain failed")?;
    info!(count = live.len(), "proxy refresh complete");
    println!("{} live proxies published", live.len());
    Ok(())
}

async fn cmd_status(store: Arc<dyn imotscrape_coordination::Store>, job_id: String) -> Result<()> {
    let progress = JobProgress::new(store);
    let snapshot = progress.snapshot(&job_id).await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn cmd_reset_circuit(config: Arc<AppConfig>, store: Arc<dyn imotscrape_coordination::Store>, domain: String) -> Result<()> {
    let orchestrator = build_orchestrator(&config, store);
    orchestrator.reset_circuit(&domain).await?;
    println!("circuit for {domain} reset to CLOSED");
    Ok(())
}

async fn cmd_run(
    config: Arc<AppConfig>,
    store: Arc<dyn imotscrape_coordination::Store>,
    site: String,
    seeds: Vec<String>,
    min_proxies: usize,
) -> Result<()> {
    let registry = parser_registry();
    let parser = registry.get(&site).cloned().ok_or_else(|| {
        imotscrape_orchestrator::OrchestratorError::Configuration(format!(
            "no Parser registered for site '{site}' — a deployment must inject one before calling run"
        ))
    })?;

    if seeds.is_empty() {
        return Err(anyhow!("no seed URLs provided"));
    }

    let orchestrator = build_orchestrator(&config, store.clone());
    orchestrator.start().await.context("starting orchestrator")?;

    let satisfied = orchestrator
        .wait_for_proxies(min_proxies, Duration::from_secs(2400))
        .await
        .context("waiting for usable proxies")?;
    if !satisfied {
        orchestrator.stop().await;
        return Err(imotscrape_orchestrator::OrchestratorError::InfrastructureUnreachable(
            "could not reach the minimum usable proxy count in time".to_string(),
        )
        .into());
    }

    let circuit_breaker = Arc::new(CircuitBreaker::new(
        store.clone(),
        config.resilience.circuit_failure_threshold,
        config.resilience.circuit_reset_timeout_seconds,
        config.resilience.circuit_half_open_max_calls,
        config.resilience.circuit_breaker_enabled,
    ));
    let rate_limiter = Arc::new(RateLimiter::new(
        store.clone(),
        config.resilience.domain_rate_limits.clone(),
        config.resilience.default_rate_per_minute,
    ));
    let checkpoint = Arc::new(CheckpointManager::new(
        &config.general.checkpoint_dir,
        &site,
        config.resilience.checkpoint_batch_size,
    ));

    let rotator_proxy_url = format!("http://{}", config.rotator.listen_addr);
    let fetcher = Arc::new(Fetcher::new(&rotator_proxy_url, circuit_breaker.clone(), rate_limiter)?);
    let progress = Arc::new(JobProgress::new(store));
    let listing_store: Arc<dyn ListingStore> = Arc::new(NullListingStore::new());

    let dispatcher =
        ScrapeDispatcher::new(config.clone(), fetcher, circuit_breaker, progress, listing_store)
            .with_checkpoint(checkpoint.clone());

    // §4.4/S3: resume directly from a prior crash's pending set — already
    // individual listing URLs, not search-result seeds — instead of dispatching
    // the given seeds, when one exists for this site's checkpoint name.
    let resume = checkpoint
        .load()
        .await
        .unwrap_or(None)
        .filter(|c| !c.pending.is_empty());

    let result = match resume {
        Some(c) => {
            info!(site, scraped = c.scraped.len(), pending = c.pending.len(), "resuming from checkpoint");
            dispatcher.dispatch_pending(&site, &c.scraped, &c.pending, parser).await?
        }
        None => dispatcher.dispatch(&site, &seeds, parser).await?,
    };
    checkpoint.clear().await.ok();

    println!(
        "job {} dispatched: {} urls in {} chunks",
        result.job_id, result.total_urls, result.total_chunks
    );

    orchestrator.wait_for_shutdown().await;
    orchestrator.stop().await;
    Ok(())
}
