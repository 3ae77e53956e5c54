//! # Enrichment pipeline
//!
//! For one article: cache lookup, then sentiment / entities / keywords (remote)
//! and related instruments (local) run concurrently and are fanned in. Each
//! remote sub-task may fail on its own; when the [`FallbackPolicy`] says too
//! many failed, the local dictionary/regex path produces the result instead.
//! The importance level is computed last and the result is cached.

pub mod instruments;
pub mod local;
pub mod remote;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ::metrics::{counter, histogram};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics;
use crate::model::{
    Entities, Entity, EnrichmentResult, NewsArticle, SentimentLabel, SentimentReading,
    WeightedKeyword,
};
use crate::scoring::ImportanceScorer;
use crate::store::cache::{get_json, set_json};
use crate::store::KeyValueCache;
use crate::text::{clean_for_enrichment, truncate_chars};

pub use instruments::InstrumentExtractor;
pub use remote::{build_nlp_client, DisabledNlp, DynNlp, NlpConfig, NlpProvider, OpenAiNlp, RemoteNlp};

const CACHE_PREFIX: &str = "news:enrich:";
const REMOTE_SUBTASKS: usize = 3;

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub cache_ttl_secs: u64,
    pub entity_confidence_threshold: f64,
    pub min_keyword_score: f64,
    pub max_keywords: usize,
    /// Content sent to keyword extraction is capped at this many characters.
    pub keyword_content_cap: usize,
    pub batch_concurrency: usize,
    pub remote_timeout_secs: u64,
    /// Extra company name → instrument code entries.
    pub instrument_aliases: BTreeMap<String, String>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 24 * 3600,
            entity_confidence_threshold: 0.6,
            min_keyword_score: 0.1,
            max_keywords: 10,
            keyword_content_cap: 2000,
            batch_concurrency: 3,
            remote_timeout_secs: 15,
            instrument_aliases: BTreeMap::new(),
        }
    }
}

impl EnrichmentConfig {
    pub fn sanitize(&mut self) {
        let d = Self::default();
        self.entity_confidence_threshold = self.entity_confidence_threshold.clamp(0.0, 1.0);
        self.min_keyword_score = self.min_keyword_score.clamp(0.0, 1.0);
        if self.max_keywords == 0 {
            self.max_keywords = d.max_keywords;
        }
        if self.keyword_content_cap == 0 {
            self.keyword_content_cap = d.keyword_content_cap;
        }
        self.batch_concurrency = self.batch_concurrency.max(1);
        if self.remote_timeout_secs == 0 {
            self.remote_timeout_secs = d.remote_timeout_secs;
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

/// How many remote sub-task failures switch the whole result to the local path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    pub failures_before_fallback: usize,
}

impl Default for FallbackPolicy {
    /// Fall back only when every remote sub-task failed.
    fn default() -> Self {
        Self {
            failures_before_fallback: REMOTE_SUBTASKS,
        }
    }
}

impl FallbackPolicy {
    pub fn should_fall_back(&self, failures: usize) -> bool {
        failures >= self.failures_before_fallback.max(1)
    }
}

/// Fan-in of the remote sub-tasks; `None` marks a failed task.
#[derive(Debug, Default)]
struct RemoteOutcome {
    sentiment: Option<SentimentReading>,
    entities: Option<Vec<Entity>>,
    keywords: Option<Vec<WeightedKeyword>>,
}

impl RemoteOutcome {
    fn failures(&self) -> usize {
        [
            self.sentiment.is_none(),
            self.entities.is_none(),
            self.keywords.is_none(),
        ]
        .into_iter()
        .filter(|failed| *failed)
        .count()
    }
}

/// Cache key for a title/content pair.
pub fn cache_key(title: &str, content: &str) -> String {
    let digest = md5::compute(format!("{title}{content}").as_bytes());
    format!("{CACHE_PREFIX}{digest:x}")
}

pub struct EnrichmentPipeline {
    nlp: DynNlp,
    cache: Arc<dyn KeyValueCache>,
    instruments: InstrumentExtractor,
    scorer: ImportanceScorer,
    cfg: EnrichmentConfig,
    policy: FallbackPolicy,
}

impl EnrichmentPipeline {
    pub fn new(
        nlp: DynNlp,
        cache: Arc<dyn KeyValueCache>,
        scorer: ImportanceScorer,
        cfg: EnrichmentConfig,
    ) -> Self {
        metrics::ensure_described();
        let instruments = InstrumentExtractor::new().with_aliases(cfg.instrument_aliases.iter());
        Self {
            nlp,
            cache,
            instruments,
            scorer,
            cfg,
            policy: FallbackPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &EnrichmentConfig {
        &self.cfg
    }

    /// Enrich one article. Never fails: remote errors degrade fields or
    /// switch to the local path, cache errors count as misses.
    pub async fn process(&self, article: &NewsArticle) -> EnrichmentResult {
        self.process_with(article, None).await
    }

    /// Enrich many articles, output in input order, at most
    /// `batch_concurrency` at a time. When the provider supports it,
    /// sentiment for uncached articles is pre-fetched with one batched call;
    /// if that call fails the articles are processed one by one.
    pub async fn process_batch(&self, articles: &[NewsArticle]) -> Vec<EnrichmentResult> {
        if articles.is_empty() {
            return Vec::new();
        }

        let mut misses: Vec<usize> = Vec::new();
        if self.nlp.supports_batch() {
            for (i, a) in articles.iter().enumerate() {
                if self.cached(&cache_key(&a.title, &a.content)).await.is_none() {
                    misses.push(i);
                }
            }
        }

        let mut presets: HashMap<usize, SentimentReading> = HashMap::new();
        if !misses.is_empty() {
            let texts: Vec<String> = misses
                .iter()
                .map(|&i| combined_text(&articles[i]))
                .collect();
            let batch = tokio::time::timeout(self.cfg.remote_timeout(), self.nlp.sentiment_batch(&texts))
                .await
                .map_err(anyhow::Error::from)
                .and_then(|r| r);
            match batch {
                Ok(readings) => presets.extend(misses.iter().copied().zip(readings)),
                Err(e) => {
                    warn!(
                        target: "enrich",
                        provider = self.nlp.name(),
                        error = %e,
                        articles = articles.len(),
                        "batched sentiment failed; processing sequentially"
                    );
                    let mut out = Vec::with_capacity(articles.len());
                    for a in articles {
                        out.push(self.process(a).await);
                    }
                    return out;
                }
            }
        }

        let futs: Vec<_> = articles
            .iter()
            .enumerate()
            .map(|(i, a)| self.process_with(a, presets.get(&i).copied()))
            .collect();
        stream::iter(futs)
            .buffered(self.cfg.batch_concurrency.max(1))
            .collect()
            .await
    }

    async fn process_with(
        &self,
        article: &NewsArticle,
        preset_sentiment: Option<SentimentReading>,
    ) -> EnrichmentResult {
        let started = Instant::now();
        let key = cache_key(&article.title, &article.content);

        if let Some(mut hit) = self.cached(&key).await {
            counter!(metrics::ENRICH_CACHE_HITS).increment(1);
            hit.cache_hit = true;
            return hit;
        }
        counter!(metrics::ENRICH_CACHE_MISSES).increment(1);

        let title = clean_for_enrichment(&article.title);
        let content = clean_for_enrichment(&article.content);
        let text = join_text(&title, &content);
        let keyword_content = truncate_chars(&content, self.cfg.keyword_content_cap);

        let (sentiment, entities, keywords, related_instruments) = tokio::join!(
            async {
                match preset_sentiment {
                    Some(r) => Some(r),
                    None => self.remote("sentiment", self.nlp.sentiment(&text)).await,
                }
            },
            self.remote("entities", self.nlp.entities(&text)),
            self.remote("keywords", self.nlp.keywords(&title, &keyword_content)),
            async { self.instruments.extract(&text) },
        );
        let outcome = RemoteOutcome {
            sentiment,
            entities,
            keywords,
        };

        let mut result = if self.policy.should_fall_back(outcome.failures()) {
            counter!(metrics::ENRICH_FALLBACKS).increment(1);
            debug!(target: "enrich", id = %article.id, "all remote sub-tasks failed; using local analysis");
            self.local_result(&text)
        } else {
            self.remote_result(outcome)
        };
        result.related_instruments = related_instruments;

        let view = NewsArticle {
            title,
            content,
            ..article.clone()
        };
        result.importance_level = self.scorer.score(&view, &result);

        if let Err(e) = set_json(self.cache.as_ref(), &key, &result, self.cfg.cache_ttl()).await {
            warn!(target: "enrich", error = ?e, "enrichment cache write failed");
        }

        histogram!(metrics::ENRICH_LATENCY).record(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn cached(&self, key: &str) -> Option<EnrichmentResult> {
        match get_json::<EnrichmentResult>(self.cache.as_ref(), key).await {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "enrich", error = ?e, "enrichment cache read failed; treating as miss");
                None
            }
        }
    }

    /// Run one remote sub-task under the per-call timeout.
    async fn remote<T>(&self, task: &'static str, fut: impl Future<Output = Result<T>>) -> Option<T> {
        match tokio::time::timeout(self.cfg.remote_timeout(), fut).await {
            Ok(Ok(v)) => Some(v),
            Ok(Err(e)) => {
                counter!(metrics::ENRICH_SUBTASK_FAILURES, "task" => task).increment(1);
                warn!(target: "enrich", task, provider = self.nlp.name(), error = %e, "sub-task failed");
                None
            }
            Err(_) => {
                counter!(metrics::ENRICH_SUBTASK_FAILURES, "task" => task).increment(1);
                warn!(target: "enrich", task, provider = self.nlp.name(), timeout = ?self.cfg.remote_timeout(), "sub-task timed out");
                None
            }
        }
    }

    fn remote_result(&self, outcome: RemoteOutcome) -> EnrichmentResult {
        let mut result = EnrichmentResult::default();
        if let Some(reading) = outcome.sentiment {
            result.sentiment_score = Some(reading.signed_score());
            result.sentiment_label = reading.label;
        }
        if let Some(entities) = outcome.entities {
            result.entities = group_entities(entities, self.cfg.entity_confidence_threshold);
        }
        if let Some(keywords) = outcome.keywords {
            result.keywords =
                select_keywords(keywords, self.cfg.min_keyword_score, self.cfg.max_keywords);
        }
        result
    }

    fn local_result(&self, text: &str) -> EnrichmentResult {
        let local = local::analyze_locally(text, self.cfg.max_keywords);
        EnrichmentResult {
            sentiment_score: Some(local.sentiment_score),
            sentiment_label: SentimentLabel::from_score(local.sentiment_score),
            keywords: local.keywords,
            entities: local.entities,
            fallback: true,
            ..Default::default()
        }
    }
}

fn join_text(title: &str, content: &str) -> String {
    format!("{title} {content}").trim().to_string()
}

fn combined_text(article: &NewsArticle) -> String {
    join_text(
        &clean_for_enrichment(&article.title),
        &clean_for_enrichment(&article.content),
    )
}

/// Entities at or above `threshold`, grouped by lowercase category, first-seen
/// order, no repeated mentions.
pub fn group_entities(entities: Vec<Entity>, threshold: f64) -> Entities {
    let mut out = Entities::new();
    for e in entities {
        let text = e.text.trim();
        if e.confidence < threshold || text.is_empty() {
            continue;
        }
        let category = match e.category.trim() {
            "" => "other".to_string(),
            c => c.to_lowercase(),
        };
        let list = out.entry(category).or_default();
        if !list.iter().any(|m| m == text) {
            list.push(text.to_string());
        }
    }
    out
}

/// Keywords scoring at least `min_score`, best first, unique, at most `max`.
pub fn select_keywords(mut keywords: Vec<WeightedKeyword>, min_score: f64, max: usize) -> Vec<String> {
    keywords.retain(|k| k.score >= min_score && !k.word.trim().is_empty());
    keywords.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut out: Vec<String> = Vec::new();
    for k in keywords {
        let word = k.word.trim().to_string();
        if !out.contains(&word) {
            out.push(word);
        }
        if out.len() == max {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ent(text: &str, category: &str, confidence: f64) -> Entity {
        Entity {
            text: text.into(),
            category: category.into(),
            confidence,
        }
    }

    fn kw(word: &str, score: f64) -> WeightedKeyword {
        WeightedKeyword {
            word: word.into(),
            score,
        }
    }

    #[test]
    fn entities_filtered_and_grouped() {
        let g = group_entities(
            vec![
                ent("Kweichow Moutai", "ORGANIZATION", 0.9),
                ent("Kweichow Moutai", "organization", 0.95),
                ent("Guiyang", "location", 0.4),
                ent("2024-10-15", "", 0.8),
            ],
            0.6,
        );
        assert_eq!(g["organization"], vec!["Kweichow Moutai".to_string()]);
        assert!(!g.contains_key("location"));
        assert_eq!(g["other"], vec!["2024-10-15".to_string()]);
    }

    #[test]
    fn keywords_sorted_capped_and_thresholded() {
        let k = select_keywords(
            vec![kw("profit", 0.5), kw("noise", 0.05), kw("moutai", 0.9), kw("profit", 0.4)],
            0.1,
            10,
        );
        assert_eq!(k, vec!["moutai", "profit"]);
        let k = select_keywords(vec![kw("a", 0.9), kw("b", 0.8), kw("c", 0.7)], 0.1, 2);
        assert_eq!(k, vec!["a", "b"]);
    }

    #[test]
    fn default_policy_needs_every_remote_failure() {
        let p = FallbackPolicy::default();
        assert!(!p.should_fall_back(2));
        assert!(p.should_fall_back(3));
        let strict = FallbackPolicy {
            failures_before_fallback: 1,
        };
        assert!(strict.should_fall_back(1));
    }

    #[test]
    fn cache_key_depends_on_title_and_content() {
        assert_eq!(cache_key("t", "c"), cache_key("t", "c"));
        assert_ne!(cache_key("t", "c"), cache_key("t", "d"));
        assert!(cache_key("t", "c").starts_with("news:enrich:"));
    }

    #[test]
    fn sanitize_fixes_zero_concurrency() {
        let mut cfg = EnrichmentConfig {
            batch_concurrency: 0,
            entity_confidence_threshold: 3.0,
            ..Default::default()
        };
        cfg.sanitize();
        assert_eq!(cfg.batch_concurrency, 1);
        assert_eq!(cfg.entity_confidence_threshold, 1.0);
    }
}
