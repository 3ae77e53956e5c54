use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{ArticleReader, ArticleWriter};
use crate::model::NewsArticle;

/// Vec-backed article repository. `url` and `id` are unique.
#[derive(Debug, Default)]
pub struct InMemoryArticleStore {
    inner: RwLock<Vec<NewsArticle>>,
}

impl InMemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(articles: Vec<NewsArticle>) -> Self {
        Self {
            inner: RwLock::new(articles),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<NewsArticle> {
        self.inner.read().iter().find(|a| a.id == id).cloned()
    }

    pub fn snapshot(&self) -> Vec<NewsArticle> {
        self.inner.read().clone()
    }
}

#[async_trait]
impl ArticleReader for InMemoryArticleStore {
    async fn get_by_url(&self, url: &str) -> Result<Option<NewsArticle>> {
        Ok(self.inner.read().iter().find(|a| a.url == url).cloned())
    }

    async fn search_by_keyword(
        &self,
        keyword: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NewsArticle>> {
        let needle = keyword.to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<NewsArticle> = self
            .inner
            .read()
            .iter()
            .filter(|a| {
                a.title.to_lowercase().contains(&needle)
                    || a.content.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.publish_time.cmp(&a.publish_time));
        Ok(hits.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NewsArticle>> {
        let mut hits: Vec<NewsArticle> = self
            .inner
            .read()
            .iter()
            .filter(|a| a.publish_time >= start && a.publish_time <= end)
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.publish_time.cmp(&b.publish_time));
        Ok(hits.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl ArticleWriter for InMemoryArticleStore {
    async fn create(&self, article: &NewsArticle) -> Result<()> {
        let mut v = self.inner.write();
        if v.iter().any(|a| a.id == article.id || a.url == article.url) {
            bail!("article already exists: {}", article.url);
        }
        v.push(article.clone());
        Ok(())
    }

    async fn update(&self, article: &NewsArticle) -> Result<()> {
        let mut v = self.inner.write();
        match v.iter_mut().find(|a| a.id == article.id) {
            Some(slot) => {
                *slot = article.clone();
                Ok(())
            }
            None => bail!("article not found: {}", article.id),
        }
    }
}
