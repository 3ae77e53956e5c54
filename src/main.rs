//! News pipeline binary.
//! Loads config, wires store → dedup → enrichment → orchestrator → scheduler,
//! and runs until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use news_pipeline::config::AppConfig;
use news_pipeline::dedup::{DeduplicationEngine, FingerprintStore};
use news_pipeline::enrich::{build_nlp_client, EnrichmentPipeline};
use news_pipeline::ingest::providers::RssFetcher;
use news_pipeline::ingest::{IngestOrchestrator, SourceScheduler};
use news_pipeline::scoring::ImportanceScorer;
use news_pipeline::store::{FileCache, InMemoryArticleStore, InMemoryCache, KeyValueCache};

/// Compact logs by default, JSON with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("news_pipeline=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default()?;
    if let Some(addr) = cfg.metrics.listen {
        news_pipeline::metrics::install_prometheus(addr)?;
    }

    let cache: Arc<dyn KeyValueCache> = match &cfg.cache.dir {
        Some(dir) => Arc::new(FileCache::new(dir)?),
        None => Arc::new(InMemoryCache::new()),
    };
    let store = Arc::new(InMemoryArticleStore::new());

    let registry = FingerprintStore::new(Arc::clone(&cache))
        .with_ttls(cfg.dedup.duplicate_ttl(), cfg.dedup.duplicate_ttl());
    let dedup = Arc::new(DeduplicationEngine::new(store.clone(), registry, cfg.dedup.clone()));

    let nlp = build_nlp_client(&cfg.nlp, cfg.enrichment.remote_timeout())?;
    tracing::info!(provider = nlp.name(), "remote NLP provider");
    let scorer = ImportanceScorer::new(cfg.scoring.weights, cfg.scoring.source_weights());
    let pipeline = Arc::new(EnrichmentPipeline::new(
        nlp,
        Arc::clone(&cache),
        scorer,
        cfg.enrichment.clone(),
    ));

    let fetcher = Arc::new(RssFetcher::new(Duration::from_secs(20))?);
    let orchestrator = Arc::new(IngestOrchestrator::new(
        fetcher,
        store.clone(),
        store.clone(),
        dedup,
        pipeline,
    ));

    if cfg.sources.is_empty() {
        tracing::warn!("no sources configured; the scheduler will idle");
    }
    let scheduler = SourceScheduler::new(cfg.sources.clone(), orchestrator.clone(), cfg.scheduler.clone());
    let root = CancellationToken::new();
    scheduler.start(&root).context("starting scheduler")?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    scheduler.stop().await;
    root.cancel();

    let totals = orchestrator.totals();
    tracing::info!(
        stored = totals.stored,
        duplicates = totals.duplicates,
        articles = store.len(),
        "bye"
    );
    Ok(())
}
