//! # Deduplication engine
//!
//! Decides whether an incoming article duplicates something already stored.
//! Three stages run in order and their matches are unioned by candidate id:
//!
//! 1. exact URL match,
//! 2. title similarity (Jaccard over normalized title tokens, `> 0.8`),
//! 3. content similarity (cosine over term frequencies of articles published
//!    within ±12h, `> 0.7`).
//!
//! Store lookups are best-effort: a failing stage is logged and skipped.
//! Duplicate records go to a TTL store and never touch the canonical article.

pub mod completeness;
pub mod fingerprint;

use chrono::Duration as ChronoDuration;
use ::metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics;
use crate::model::NewsArticle;
use crate::similarity::{cosine, jaccard};
use crate::store::ArticleReader;
use crate::text::{content_tokens, tokenize};

pub use completeness::{choose_canonical, completeness_score, most_complete, Canonical};
pub use fingerprint::{fingerprint_text, FingerprintStore};

/// Titles shorter than this many tokens skip the title stage.
const MIN_TITLE_TOKENS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("article {0} has neither title nor content")]
    MalformedArticle(String),
    #[error("duplicate registry unavailable")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<anyhow::Error> for DedupError {
    fn from(e: anyhow::Error) -> Self {
        Self::Store(e.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub title_threshold: f64,
    pub content_threshold: f64,
    pub title_candidate_limit: usize,
    pub content_window_hours: i64,
    pub content_candidate_limit: usize,
    pub duplicate_ttl_secs: u64,
    pub fingerprint_token_cap: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_threshold: 0.8,
            content_threshold: 0.7,
            title_candidate_limit: 100,
            content_window_hours: 12,
            content_candidate_limit: 200,
            duplicate_ttl_secs: fingerprint::DUPLICATE_TTL.as_secs(),
            fingerprint_token_cap: fingerprint::FINGERPRINT_TOKEN_CAP,
        }
    }
}

impl DedupConfig {
    /// Clamp thresholds into `[0, 1]` and replace zero limits with defaults.
    pub fn sanitize(&mut self) {
        let d = Self::default();
        if !(0.0..=1.0).contains(&self.title_threshold) {
            self.title_threshold = d.title_threshold;
        }
        if !(0.0..=1.0).contains(&self.content_threshold) {
            self.content_threshold = d.content_threshold;
        }
        if self.title_candidate_limit == 0 {
            self.title_candidate_limit = d.title_candidate_limit;
        }
        if self.content_candidate_limit == 0 {
            self.content_candidate_limit = d.content_candidate_limit;
        }
        if self.content_window_hours <= 0 {
            self.content_window_hours = d.content_window_hours;
        }
        if self.fingerprint_token_cap == 0 {
            self.fingerprint_token_cap = d.fingerprint_token_cap;
        }
    }

    pub fn duplicate_ttl(&self) -> Duration {
        Duration::from_secs(self.duplicate_ttl_secs)
    }
}

/// Which stage flagged a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    Url,
    Title,
    Content,
}

impl MatchStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Title => "title",
            Self::Content => "content",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub article: NewsArticle,
    pub stage: MatchStage,
    /// 1.0 for URL matches.
    pub similarity: f64,
}

pub struct DeduplicationEngine {
    reader: Arc<dyn ArticleReader>,
    registry: FingerprintStore,
    cfg: DedupConfig,
}

impl DeduplicationEngine {
    pub fn new(reader: Arc<dyn ArticleReader>, registry: FingerprintStore, cfg: DedupConfig) -> Self {
        Self {
            reader,
            registry,
            cfg,
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &FingerprintStore {
        &self.registry
    }

    /// Stable content fingerprint (see [`fingerprint_text`]).
    pub fn generate_fingerprint(&self, article: &NewsArticle) -> String {
        fingerprint_text(
            &article.title,
            &article.content,
            self.cfg.fingerprint_token_cap,
        )
    }

    /// Existing articles that duplicate `article`, de-duplicated by id.
    pub async fn detect_duplicates(
        &self,
        article: &NewsArticle,
    ) -> Result<Vec<NewsArticle>, DedupError> {
        Ok(self
            .detect_matches(article)
            .await?
            .into_iter()
            .map(|m| m.article)
            .collect())
    }

    /// Like [`Self::detect_duplicates`] but keeps the stage and similarity of
    /// each match. The first stage to flag a candidate wins.
    pub async fn detect_matches(
        &self,
        article: &NewsArticle,
    ) -> Result<Vec<DuplicateMatch>, DedupError> {
        if article.title.trim().is_empty() && article.content.trim().is_empty() {
            return Err(DedupError::MalformedArticle(article.id.clone()));
        }

        let mut out = Vec::new();
        out.extend(self.match_url(article).await);
        out.extend(self.match_title(article).await);
        out.extend(self.match_content(article).await);

        let mut seen = HashSet::new();
        out.retain(|m| seen.insert(m.article.id.clone()));

        if !out.is_empty() {
            for m in &out {
                counter!(metrics::DEDUP_MATCHES, "stage" => m.stage.as_str()).increment(1);
            }
            debug!(
                target: "dedup",
                id = %article.id,
                matches = out.len(),
                stages = ?out.iter().map(|m| m.stage).collect::<Vec<_>>(),
                "duplicates detected"
            );
        }
        Ok(out)
    }

    /// Whether `id` was recorded as a duplicate, and of which canonical id.
    pub async fn is_duplicate(&self, id: &str) -> Result<(bool, Option<String>), DedupError> {
        let canonical = self.registry.canonical_of(id).await?;
        Ok((canonical.is_some(), canonical))
    }

    pub async fn mark_duplicate(&self, id: &str, canonical_id: &str) -> Result<(), DedupError> {
        self.registry.mark_duplicate(id, canonical_id).await?;
        Ok(())
    }

    async fn match_url(&self, article: &NewsArticle) -> Vec<DuplicateMatch> {
        if article.url.trim().is_empty() {
            return Vec::new();
        }
        match self.reader.get_by_url(&article.url).await {
            Ok(Some(existing)) if existing.id != article.id => vec![DuplicateMatch {
                article: existing,
                stage: MatchStage::Url,
                similarity: 1.0,
            }],
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!(target: "dedup", error = ?e, "url lookup failed; skipping stage");
                Vec::new()
            }
        }
    }

    async fn match_title(&self, article: &NewsArticle) -> Vec<DuplicateMatch> {
        let tokens = tokenize(&article.title);
        if tokens.len() < MIN_TITLE_TOKENS {
            return Vec::new();
        }
        // Second token tends to be more selective than a leading article/name.
        let keyword = tokens.get(1).unwrap_or(&tokens[0]);

        let candidates = match self
            .reader
            .search_by_keyword(keyword, self.cfg.title_candidate_limit, 0)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "dedup", error = ?e, keyword = %keyword, "keyword search failed; skipping stage");
                return Vec::new();
            }
        };

        candidates
            .into_iter()
            .filter(|c| c.id != article.id)
            .filter_map(|c| {
                let sim = jaccard(&tokens, &tokenize(&c.title));
                (sim > self.cfg.title_threshold).then_some(DuplicateMatch {
                    article: c,
                    stage: MatchStage::Title,
                    similarity: sim,
                })
            })
            .collect()
    }

    async fn match_content(&self, article: &NewsArticle) -> Vec<DuplicateMatch> {
        let tokens = content_tokens(&article.content);
        if tokens.is_empty() {
            return Vec::new();
        }
        let window = ChronoDuration::hours(self.cfg.content_window_hours);
        let candidates = match self
            .reader
            .get_by_time_range(
                article.publish_time - window,
                article.publish_time + window,
                self.cfg.content_candidate_limit,
                0,
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "dedup", error = ?e, "time-range lookup failed; skipping stage");
                return Vec::new();
            }
        };

        candidates
            .into_iter()
            .filter(|c| c.id != article.id)
            .filter_map(|c| {
                let sim = cosine(&tokens, &content_tokens(&c.content));
                (sim > self.cfg.content_threshold).then_some(DuplicateMatch {
                    article: c,
                    stage: MatchStage::Content,
                    similarity: sim,
                })
            })
            .collect()
    }
}
