// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod config;
pub mod dedup;
pub mod enrich;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod scoring;
pub mod similarity;
pub mod store;
pub mod text;

// ---- Re-exports for stable public API ----
pub use crate::config::AppConfig;
pub use crate::dedup::{DedupConfig, DedupError, DeduplicationEngine, FingerprintStore};
pub use crate::enrich::{EnrichmentConfig, EnrichmentPipeline, FallbackPolicy, RemoteNlp};
pub use crate::ingest::{
    CrawlBackend, CrawlErrorHandler, IngestOrchestrator, IngestStats, SchedulerConfig,
    SchedulerError, SourceScheduler,
};
pub use crate::model::{EnrichmentResult, NewsArticle, NewsSource, SentimentLabel};
pub use crate::scoring::ImportanceScorer;
