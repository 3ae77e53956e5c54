//! Metric descriptions and the optional Prometheus exporter.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;

pub const CRAWL_ATTEMPTS: &str = "scheduler_crawl_attempts_total";
pub const CRAWL_RETRIES: &str = "scheduler_crawl_retries_total";
pub const CRAWL_FAILURES: &str = "scheduler_crawl_failures_total";
pub const CRAWL_TICKS_SKIPPED: &str = "scheduler_ticks_skipped_total";
pub const ACTIVE_TASKS: &str = "scheduler_active_tasks";
pub const HEALTH_MISMATCH: &str = "scheduler_health_mismatch";
pub const DEDUP_MATCHES: &str = "dedup_matches_total";
pub const DEDUP_FINGERPRINT_HITS: &str = "dedup_fingerprint_hits_total";
pub const ENRICH_CACHE_HITS: &str = "enrich_cache_hits_total";
pub const ENRICH_CACHE_MISSES: &str = "enrich_cache_misses_total";
pub const ENRICH_SUBTASK_FAILURES: &str = "enrich_subtask_failures_total";
pub const ENRICH_FALLBACKS: &str = "enrich_local_fallback_total";
pub const ENRICH_LATENCY: &str = "enrich_latency_ms";
pub const INGEST_FETCHED: &str = "ingest_fetched_total";
pub const INGEST_STORED: &str = "ingest_stored_total";
pub const INGEST_DUPLICATES: &str = "ingest_duplicates_total";
pub const INGEST_PARSE_MS: &str = "ingest_parse_ms";
pub const INGEST_PROVIDER_ERRORS: &str = "ingest_provider_errors_total";

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(CRAWL_ATTEMPTS, "Crawl attempts, retries included.");
        describe_counter!(CRAWL_RETRIES, "Crawl attempts after the first one.");
        describe_counter!(CRAWL_FAILURES, "Crawls that failed after all retries.");
        describe_counter!(
            CRAWL_TICKS_SKIPPED,
            "Periodic ticks skipped because the source was still crawling."
        );
        describe_gauge!(ACTIVE_TASKS, "Running per-source crawl tasks.");
        describe_gauge!(
            HEALTH_MISMATCH,
            "Enabled sources minus active tasks at the last health check."
        );
        describe_counter!(DEDUP_MATCHES, "Duplicate candidates found, by stage.");
        describe_counter!(
            DEDUP_FINGERPRINT_HITS,
            "Articles short-circuited by a known fingerprint."
        );
        describe_counter!(ENRICH_CACHE_HITS, "Enrichment results served from cache.");
        describe_counter!(ENRICH_CACHE_MISSES, "Enrichment cache misses.");
        describe_counter!(
            ENRICH_SUBTASK_FAILURES,
            "Remote enrichment sub-task failures, by task."
        );
        describe_counter!(ENRICH_FALLBACKS, "Results produced by the local fallback path.");
        describe_histogram!(ENRICH_LATENCY, Unit::Milliseconds, "Per-article enrichment time.");
        describe_counter!(INGEST_FETCHED, "Articles returned by fetchers.");
        describe_counter!(INGEST_STORED, "Articles written to the store.");
        describe_counter!(INGEST_DUPLICATES, "Incoming articles recorded as duplicates.");
        describe_histogram!(INGEST_PARSE_MS, Unit::Milliseconds, "Feed parse time.");
        describe_counter!(INGEST_PROVIDER_ERRORS, "Feed fetches that failed at the HTTP layer.");
    });
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
/// Must be called from within a Tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("installing prometheus exporter on {addr}"))?;
    ensure_described();
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
