//! Crawl scheduling and the glue from fetched articles to stored records.
//!
//! - [`scheduler::SourceScheduler`] owns one periodic task per enabled source.
//! - [`CrawlBackend`] is what a crawl actually does; [`orchestrator::IngestOrchestrator`]
//!   is the bundled implementation (fetch → dedup → enrich → persist).
//! - [`ArticleFetcher`] turns a source into raw articles ([`providers::rss::RssFetcher`]).

pub mod orchestrator;
pub mod providers;
pub mod scheduler;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::{NewsArticle, NewsSource};

pub use orchestrator::{IngestOrchestrator, IngestStats};
pub use scheduler::{
    HealthReport, SchedulerConfig, SchedulerError, SchedulerStatus, SourceScheduler, SourceState,
    SourceStatus,
};

/// Performs crawls on behalf of the scheduler.
#[async_trait]
pub trait CrawlBackend: Send + Sync {
    async fn crawl_source(&self, cancel: &CancellationToken, source: &NewsSource) -> Result<()>;

    async fn crawl_sources(&self, cancel: &CancellationToken, sources: &[NewsSource]) -> Result<()>;

    /// Called once when the scheduler stops.
    async fn stop(&self);
}

/// Receives crawl errors that survived every retry.
pub trait CrawlErrorHandler: Send + Sync {
    fn handle_error(&self, source: &str, err: &anyhow::Error);
}

/// Default handler: log at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl CrawlErrorHandler for LogErrorHandler {
    fn handle_error(&self, source: &str, err: &anyhow::Error) {
        tracing::error!(target: "scheduler", source = %source, error = ?err, "crawl failed after retries");
    }
}

/// Fetches the current articles of one source.
#[async_trait]
pub trait ArticleFetcher: Send + Sync {
    async fn fetch(&self, source: &NewsSource) -> Result<Vec<NewsArticle>>;
    fn name(&self) -> &'static str;
}
