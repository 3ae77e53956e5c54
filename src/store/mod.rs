//! Interfaces to the persistence and key-value layers, plus in-process
//! implementations used by the binary and the tests.

pub mod cache;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::model::NewsArticle;

pub use cache::{FileCache, InMemoryCache};
pub use memory::InMemoryArticleStore;

/// Read side of the article repository.
#[async_trait]
pub trait ArticleReader: Send + Sync {
    async fn get_by_url(&self, url: &str) -> Result<Option<NewsArticle>>;

    /// Articles whose title or content contains `keyword` (case-insensitive).
    async fn search_by_keyword(
        &self,
        keyword: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NewsArticle>>;

    /// Articles published within `[start, end]`.
    async fn get_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NewsArticle>>;
}

/// Write side of the article repository.
#[async_trait]
pub trait ArticleWriter: Send + Sync {
    async fn create(&self, article: &NewsArticle) -> Result<()>;
    async fn update(&self, article: &NewsArticle) -> Result<()>;
}

/// String key-value store with per-entry TTL. Concurrent writers to the same
/// key are tolerated (last write wins).
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
}
