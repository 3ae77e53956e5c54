// tests/enrichment.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use news_pipeline::enrich::{EnrichmentConfig, EnrichmentPipeline, FallbackPolicy, RemoteNlp};
use news_pipeline::model::{Entity, NewsArticle, SentimentLabel, SentimentReading, WeightedKeyword};
use news_pipeline::scoring::{ImportanceScorer, ImportanceWeights, SourceWeightsConfig};
use news_pipeline::store::InMemoryCache;

#[derive(Default)]
struct MockNlp {
    fail_sentiment: bool,
    fail_entities: bool,
    fail_keywords: bool,
    batch: bool,
    fail_batch: bool,
    hang: bool,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sentiment_calls: AtomicUsize,
    entity_calls: AtomicUsize,
    keyword_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl MockNlp {
    fn all_failing() -> Self {
        Self {
            fail_sentiment: true,
            fail_entities: true,
            fail_keywords: true,
            ..Default::default()
        }
    }

    fn remote_calls(&self) -> usize {
        self.sentiment_calls.load(Ordering::SeqCst)
            + self.entity_calls.load(Ordering::SeqCst)
            + self.keyword_calls.load(Ordering::SeqCst)
            + self.batch_calls.load(Ordering::SeqCst)
    }
}

fn reading_for(text: &str) -> SentimentReading {
    if text.contains("plunge") {
        SentimentReading {
            label: SentimentLabel::Negative,
            confidence: 0.9,
        }
    } else {
        SentimentReading {
            label: SentimentLabel::Positive,
            confidence: 0.8,
        }
    }
}

#[async_trait]
impl RemoteNlp for MockNlp {
    async fn sentiment(&self, text: &str) -> Result<SentimentReading> {
        self.sentiment_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_sentiment {
            bail!("sentiment service down");
        }
        Ok(reading_for(text))
    }

    async fn entities(&self, _text: &str) -> Result<Vec<Entity>> {
        self.entity_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_entities {
            bail!("entity service down");
        }
        Ok(vec![
            Entity {
                text: "Kweichow Moutai".into(),
                category: "ORGANIZATION".into(),
                confidence: 0.95,
            },
            Entity {
                text: "Guiyang".into(),
                category: "location".into(),
                confidence: 0.3,
            },
        ])
    }

    async fn keywords(&self, _title: &str, _content: &str) -> Result<Vec<WeightedKeyword>> {
        self.keyword_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_keywords {
            bail!("keyword service down");
        }
        Ok(vec![
            WeightedKeyword {
                word: "profit".into(),
                score: 0.6,
            },
            WeightedKeyword {
                word: "moutai".into(),
                score: 0.9,
            },
            WeightedKeyword {
                word: "the".into(),
                score: 0.02,
            },
        ])
    }

    async fn sentiment_batch(&self, texts: &[String]) -> Result<Vec<SentimentReading>> {
        if !self.batch {
            bail!("no batch support");
        }
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batch {
            bail!("batch endpoint down");
        }
        Ok(texts.iter().map(|t| reading_for(t)).collect())
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

fn pipeline(nlp: Arc<MockNlp>) -> EnrichmentPipeline {
    EnrichmentPipeline::new(
        nlp,
        Arc::new(InMemoryCache::new()),
        ImportanceScorer::new(ImportanceWeights::default(), SourceWeightsConfig::default_seed()),
        EnrichmentConfig::default(),
    )
}

fn moutai_article() -> NewsArticle {
    NewsArticle::new(
        "https://news.example.com/moutai",
        "Kweichow Moutai profit beats forecasts",
        "Kweichow Moutai (600519) reported quarterly net profit up 15%. \
         A stray number 999999 also appears in the text.",
        "Reuters",
        Utc::now(),
    )
}

#[tokio::test]
async fn remote_success_fills_every_field() {
    let nlp = Arc::new(MockNlp::default());
    let p = pipeline(nlp.clone());

    let r = p.process(&moutai_article()).await;
    assert!(!r.fallback);
    assert!(!r.cache_hit);
    assert_eq!(r.sentiment_label, SentimentLabel::Positive);
    assert!((r.sentiment_score.unwrap() - 0.8).abs() < 1e-9);
    assert_eq!(r.entities["organization"], vec!["Kweichow Moutai".to_string()]);
    assert!(!r.entities.contains_key("location"));
    assert_eq!(r.keywords, vec!["moutai".to_string(), "profit".to_string()]);
    assert_eq!(r.related_instruments, vec!["600519".to_string()]);
    assert!((1..=5).contains(&r.importance_level));
}

#[tokio::test]
async fn unknown_six_digit_numbers_are_not_instruments() {
    let p = pipeline(Arc::new(MockNlp::default()));
    let a = NewsArticle::new("u", "Order 999999 shipped", "Reference 999999 only.", "s", Utc::now());
    assert!(p.process(&a).await.related_instruments.is_empty());
}

#[tokio::test]
async fn total_remote_failure_falls_back_to_local_analysis() {
    let nlp = Arc::new(MockNlp::all_failing());
    let p = pipeline(nlp.clone());

    let r = p.process(&moutai_article()).await;
    assert!(r.fallback);
    assert!(!r.cache_hit);
    assert!(r.sentiment_score.is_some());
    assert!((1..=5).contains(&r.importance_level));
    // Instruments are local, so they survive the remote outage.
    assert_eq!(r.related_instruments, vec!["600519".to_string()]);
    assert_eq!(nlp.sentiment_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn partial_failure_keeps_remote_fields() {
    let nlp = Arc::new(MockNlp {
        fail_entities: true,
        ..Default::default()
    });
    let p = pipeline(nlp);

    let r = p.process(&moutai_article()).await;
    assert!(!r.fallback);
    assert!(r.entities.is_empty());
    assert_eq!(r.sentiment_label, SentimentLabel::Positive);
    assert!(!r.keywords.is_empty());
}

#[tokio::test]
async fn strict_policy_falls_back_on_first_failure() {
    let nlp = Arc::new(MockNlp {
        fail_keywords: true,
        ..Default::default()
    });
    let p = pipeline(nlp).with_policy(FallbackPolicy {
        failures_before_fallback: 1,
    });
    assert!(p.process(&moutai_article()).await.fallback);
}

#[tokio::test]
async fn second_call_is_served_from_cache() {
    let nlp = Arc::new(MockNlp::default());
    let p = pipeline(nlp.clone());
    let a = moutai_article();

    let first = p.process(&a).await;
    let calls = nlp.remote_calls();
    assert_eq!(calls, 3);

    let second = p.process(&a).await;
    assert!(second.cache_hit);
    assert_eq!(nlp.remote_calls(), calls);
    assert_eq!(
        EnrichmentResultView::from(&first),
        EnrichmentResultView::from(&second)
    );
}

/// Everything except the cache flag.
#[derive(Debug, PartialEq)]
struct EnrichmentResultView {
    score: Option<f64>,
    label: SentimentLabel,
    keywords: Vec<String>,
    instruments: Vec<String>,
    level: u8,
}

impl From<&news_pipeline::EnrichmentResult> for EnrichmentResultView {
    fn from(r: &news_pipeline::EnrichmentResult) -> Self {
        Self {
            score: r.sentiment_score,
            label: r.sentiment_label,
            keywords: r.keywords.clone(),
            instruments: r.related_instruments.clone(),
            level: r.importance_level,
        }
    }
}

#[tokio::test]
async fn fallback_results_are_cached_too() {
    let nlp = Arc::new(MockNlp::all_failing());
    let p = pipeline(nlp.clone());
    let a = moutai_article();

    p.process(&a).await;
    let r = p.process(&a).await;
    assert!(r.cache_hit);
    assert!(r.fallback);
    assert_eq!(nlp.sentiment_calls.load(Ordering::SeqCst), 1);
}

fn batch_articles() -> Vec<NewsArticle> {
    vec![
        NewsArticle::new("https://n.example.com/1", "Shares plunge on probe", "Regulators opened a probe.", "s", Utc::now()),
        NewsArticle::new("https://n.example.com/2", "Profit beats forecasts", "Strong quarter for the group.", "s", Utc::now()),
        NewsArticle::new("https://n.example.com/3", "Stocks plunge again", "Selling continued into the close.", "s", Utc::now()),
    ]
}

#[tokio::test]
async fn batch_keeps_input_order_and_uses_one_sentiment_call() {
    let nlp = Arc::new(MockNlp {
        batch: true,
        ..Default::default()
    });
    let p = pipeline(nlp.clone());

    let out = p.process_batch(&batch_articles()).await;
    let labels: Vec<SentimentLabel> = out.iter().map(|r| r.sentiment_label).collect();
    assert_eq!(
        labels,
        vec![SentimentLabel::Negative, SentimentLabel::Positive, SentimentLabel::Negative]
    );
    assert_eq!(nlp.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(nlp.sentiment_calls.load(Ordering::SeqCst), 0);
    assert_eq!(nlp.entity_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_batch_call_degrades_to_sequential_processing() {
    let nlp = Arc::new(MockNlp {
        batch: true,
        fail_batch: true,
        ..Default::default()
    });
    let p = pipeline(nlp.clone());

    let out = p.process_batch(&batch_articles()).await;
    assert_eq!(out.len(), 3);
    assert_eq!(out[1].sentiment_label, SentimentLabel::Positive);
    assert_eq!(nlp.sentiment_calls.load(Ordering::SeqCst), 3);
    assert!(out.iter().all(|r| !r.fallback));
}

#[tokio::test(start_paused = true)]
async fn batch_without_batched_sentiment_runs_articles_concurrently() {
    let nlp = Arc::new(MockNlp {
        latency: Some(Duration::from_secs(1)),
        ..Default::default()
    });
    let p = pipeline(nlp.clone());
    let articles: Vec<NewsArticle> = (0..6)
        .map(|i| {
            NewsArticle::new(
                format!("https://n.example.com/c{i}"),
                format!("Quarterly update number {i}"),
                "Revenue grew on steady demand.",
                "s",
                Utc::now(),
            )
        })
        .collect();

    let started = tokio::time::Instant::now();
    let out = p.process_batch(&articles).await;
    assert_eq!(out.len(), 6);
    assert!(out.iter().all(|r| !r.fallback));
    assert_eq!(nlp.batch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(nlp.sentiment_calls.load(Ordering::SeqCst), 6);
    assert_eq!(nlp.max_in_flight.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test]
async fn batch_skips_cached_articles() {
    let nlp = Arc::new(MockNlp {
        batch: true,
        ..Default::default()
    });
    let p = pipeline(nlp.clone());
    let articles = batch_articles();

    p.process(&articles[0]).await;
    let out = p.process_batch(&articles).await;
    assert!(out[0].cache_hit);
    assert!(!out[1].cache_hit && !out[2].cache_hit);
    assert_eq!(nlp.entity_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn empty_batch_makes_no_calls() {
    let nlp = Arc::new(MockNlp {
        batch: true,
        ..Default::default()
    });
    let p = pipeline(nlp.clone());
    assert!(p.process_batch(&[]).await.is_empty());
    assert_eq!(nlp.remote_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn hung_sentiment_call_times_out() {
    let nlp = Arc::new(MockNlp {
        hang: true,
        ..Default::default()
    });
    let p = pipeline(nlp);

    let r = p.process(&moutai_article()).await;
    assert!(!r.fallback);
    assert!(r.sentiment_score.is_none());
    assert_eq!(r.sentiment_label, SentimentLabel::Neutral);
    assert!(!r.keywords.is_empty());
}
