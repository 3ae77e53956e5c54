//! Fetch → dedup → enrich → persist, for one source per crawl.
//!
//! Per crawl:
//! 1. fetch the source's articles;
//! 2. drop or record duplicates: same URL already stored, a fingerprint already
//!    registered for another id, a repeat within the same fetch, or a match
//!    from the [`DeduplicationEngine`];
//! 3. enrich the survivors as one batch;
//! 4. for articles with duplicate matches, keep whichever side is more
//!    complete; store, register the fingerprint.

use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ArticleFetcher, CrawlBackend};
use crate::dedup::{choose_canonical, most_complete, Canonical, DedupError, DeduplicationEngine};
use crate::enrich::EnrichmentPipeline;
use crate::metrics as m;
use crate::model::{NewsArticle, NewsSource};
use crate::store::{ArticleReader, ArticleWriter};

/// Counters for one crawl (or a running total).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub fetched: usize,
    pub stored: usize,
    /// Existing articles re-fetched with changed text.
    pub updated: usize,
    pub duplicates: usize,
    /// Stored duplicates superseded by a more complete incoming article.
    pub superseded: usize,
    /// Already stored and unchanged, or malformed.
    pub skipped: usize,
    pub failed: usize,
}

impl AddAssign for IngestStats {
    fn add_assign(&mut self, o: Self) {
        self.fetched += o.fetched;
        self.stored += o.stored;
        self.updated += o.updated;
        self.duplicates += o.duplicates;
        self.superseded += o.superseded;
        self.skipped += o.skipped;
        self.failed += o.failed;
    }
}

/// An article that survived the duplicate checks and needs enrichment.
struct Pending {
    article: NewsArticle,
    fingerprint: String,
    /// Stored duplicates the article competes with for canonical status.
    rivals: Vec<NewsArticle>,
    /// Replaces the stored record with the same id.
    replaces_existing: bool,
}

pub struct IngestOrchestrator {
    fetcher: Arc<dyn ArticleFetcher>,
    reader: Arc<dyn ArticleReader>,
    writer: Arc<dyn ArticleWriter>,
    dedup: Arc<DeduplicationEngine>,
    pipeline: Arc<EnrichmentPipeline>,
    totals: Mutex<IngestStats>,
}

impl IngestOrchestrator {
    pub fn new(
        fetcher: Arc<dyn ArticleFetcher>,
        reader: Arc<dyn ArticleReader>,
        writer: Arc<dyn ArticleWriter>,
        dedup: Arc<DeduplicationEngine>,
        pipeline: Arc<EnrichmentPipeline>,
    ) -> Self {
        m::ensure_described();
        Self {
            fetcher,
            reader,
            writer,
            dedup,
            pipeline,
            totals: Mutex::new(IngestStats::default()),
        }
    }

    /// Running totals over every crawl since construction.
    pub fn totals(&self) -> IngestStats {
        *self.totals.lock()
    }

    /// Crawl one source end to end.
    pub async fn ingest_source(&self, cancel: &CancellationToken, source: &NewsSource) -> Result<IngestStats> {
        let fetched = self
            .fetcher
            .fetch(source)
            .await
            .with_context(|| format!("fetching {} via {}", source.name, self.fetcher.name()))?;
        counter!(m::INGEST_FETCHED).increment(fetched.len() as u64);
        let stats = self.ingest_articles(cancel, source, fetched).await;
        *self.totals.lock() += stats;
        info!(
            target: "ingest",
            source = %source.name,
            fetched = stats.fetched,
            stored = stats.stored,
            updated = stats.updated,
            duplicates = stats.duplicates,
            failed = stats.failed,
            "crawl finished"
        );
        Ok(stats)
    }

    /// Dedup, enrich and persist already fetched articles.
    pub async fn ingest_articles(
        &self,
        cancel: &CancellationToken,
        source: &NewsSource,
        articles: Vec<NewsArticle>,
    ) -> IngestStats {
        let mut stats = IngestStats {
            fetched: articles.len(),
            ..Default::default()
        };
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut pending: Vec<Pending> = Vec::new();

        for mut article in articles {
            if cancel.is_cancelled() {
                debug!(target: "ingest", source = %source.name, "crawl cancelled during dedup");
                break;
            }
            if article.source.trim().is_empty() {
                article.source = source.name.clone();
            }
            if article.category.trim().is_empty() {
                article.category = source.category.clone();
            }
            match self.screen(article, &mut seen).await {
                Screened::Pending(p) => pending.push(p),
                Screened::Duplicate => stats.duplicates += 1,
                Screened::Skipped => stats.skipped += 1,
            }
        }
        if pending.is_empty() || cancel.is_cancelled() {
            counter!(m::INGEST_DUPLICATES).increment(stats.duplicates as u64);
            return stats;
        }

        let batch: Vec<NewsArticle> = pending.iter().map(|p| p.article.clone()).collect();
        let results = self.pipeline.process_batch(&batch).await;

        for (mut p, result) in pending.into_iter().zip(results) {
            p.article.apply_enrichment(&result);
            self.persist(p, &mut stats).await;
        }
        counter!(m::INGEST_DUPLICATES).increment(stats.duplicates as u64);
        stats
    }

    async fn screen(&self, article: NewsArticle, seen: &mut HashMap<String, String>) -> Screened {
        let fp = self.dedup.generate_fingerprint(&article);

        // Same URL already stored: unchanged text is a no-op, changed text an update.
        let mut replaces_existing = false;
        match self.reader.get_by_url(&article.url).await {
            Ok(Some(existing)) if existing.id == article.id => {
                if self.dedup.generate_fingerprint(&existing) == fp {
                    return Screened::Skipped;
                }
                replaces_existing = true;
            }
            Ok(_) => {}
            Err(e) => warn!(target: "ingest", error = ?e, url = %article.url, "url lookup failed"),
        }

        match self.dedup.registry().lookup(&fp).await {
            Ok(Some(known)) if known != article.id => {
                counter!(m::DEDUP_FINGERPRINT_HITS).increment(1);
                self.record_duplicate(&article.id, &known).await;
                return Screened::Duplicate;
            }
            Ok(_) => {}
            Err(e) => warn!(target: "ingest", error = ?e, "fingerprint lookup failed"),
        }

        // Repeats inside one fetch are not registered yet.
        if let Some(first) = seen.get(&fp) {
            if *first != article.id {
                self.record_duplicate(&article.id, first).await;
                return Screened::Duplicate;
            }
        }
        seen.insert(fp.clone(), article.id.clone());

        let rivals = match self.dedup.detect_duplicates(&article).await {
            Ok(m) => m,
            Err(DedupError::MalformedArticle(id)) => {
                debug!(target: "ingest", id = %id, "malformed article skipped");
                return Screened::Skipped;
            }
            Err(e) => {
                warn!(target: "ingest", error = ?e, "duplicate detection failed; treating as new");
                Vec::new()
            }
        };

        Screened::Pending(Pending {
            article,
            fingerprint: fp,
            rivals,
            replaces_existing,
        })
    }

    async fn persist(&self, p: Pending, stats: &mut IngestStats) {
        let Pending {
            article,
            fingerprint,
            rivals,
            replaces_existing,
        } = p;

        if let Some(best) = most_complete(&rivals) {
            if choose_canonical(best, &article) == Canonical::Existing {
                self.record_duplicate(&article.id, &best.id).await;
                stats.duplicates += 1;
                return;
            }
        }

        let write = if replaces_existing {
            self.writer.update(&article).await
        } else {
            self.writer.create(&article).await
        };
        if let Err(e) = write {
            warn!(target: "ingest", error = ?e, id = %article.id, "article write failed");
            stats.failed += 1;
            return;
        }
        if replaces_existing {
            stats.updated += 1;
        } else {
            stats.stored += 1;
        }
        counter!(m::INGEST_STORED).increment(1);

        for rival in &rivals {
            self.record_duplicate(&rival.id, &article.id).await;
            stats.superseded += 1;
        }
        if let Err(e) = self.dedup.registry().remember(&fingerprint, &article.id).await {
            warn!(target: "ingest", error = ?e, "fingerprint registration failed");
        }
    }

    async fn record_duplicate(&self, id: &str, canonical_id: &str) {
        debug!(target: "ingest", id, canonical = canonical_id, "duplicate recorded");
        if let Err(e) = self.dedup.mark_duplicate(id, canonical_id).await {
            warn!(target: "ingest", error = ?e, id, "duplicate record write failed");
        }
    }
}

enum Screened {
    Pending(Pending),
    Duplicate,
    /// Already stored unchanged, or malformed.
    Skipped,
}

#[async_trait]
impl CrawlBackend for IngestOrchestrator {
    async fn crawl_source(&self, cancel: &CancellationToken, source: &NewsSource) -> Result<()> {
        self.ingest_source(cancel, source).await.map(|_| ())
    }

    /// Every source is attempted; the error lists the ones that failed.
    async fn crawl_sources(&self, cancel: &CancellationToken, sources: &[NewsSource]) -> Result<()> {
        let mut failed: Vec<&str> = Vec::new();
        for source in sources {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.ingest_source(cancel, source).await {
                warn!(target: "ingest", source = %source.name, error = ?e, "crawl failed");
                failed.push(&source.name);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            bail!("{} of {} sources failed: {}", failed.len(), sources.len(), failed.join(", "))
        }
    }

    async fn stop(&self) {
        info!(target: "ingest", totals = ?self.totals(), "ingest orchestrator stopped");
    }
}
