//! # Data model
//! Sources, articles and the enrichment result that flows between the
//! scheduler, the dedup engine and the enrichment pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Crawl period used when a source has no (or a zero) update frequency.
pub const DEFAULT_UPDATE_FREQUENCY: Duration = Duration::from_secs(30 * 60);

/// A configured news source. `name` is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsSource {
    pub name: String,
    /// Feed location used by the fetcher (may be empty for custom backends).
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Crawl period in seconds; `0` means "use the default".
    #[serde(default)]
    pub update_frequency_secs: u64,
    #[serde(default)]
    pub category: String,
}

fn default_enabled() -> bool {
    true
}

impl NewsSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: String::new(),
            enabled: true,
            update_frequency_secs: 0,
            category: String::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_frequency(mut self, freq: Duration) -> Self {
        self.update_frequency_secs = freq.as_secs();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Configured period, falling back to `default` when unset or zero.
    pub fn update_frequency_or(&self, default: Duration) -> Duration {
        if self.update_frequency_secs == 0 {
            default
        } else {
            Duration::from_secs(self.update_frequency_secs)
        }
    }

    /// Configured period with the built-in 30 minute fallback.
    pub fn update_frequency(&self) -> Duration {
        self.update_frequency_or(DEFAULT_UPDATE_FREQUENCY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl SentimentLabel {
    /// Parse loosely: accepts "POSITIVE", "pos", "negative", ...
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "pos" => Some(Self::Positive),
            "negative" | "neg" => Some(Self::Negative),
            "neutral" | "neu" => Some(Self::Neutral),
            _ => None,
        }
    }

    /// Label for a signed score with a small dead zone around zero.
    pub fn from_score(score: f64) -> Self {
        if score > 0.1 {
            Self::Positive
        } else if score < -0.1 {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

/// Entity mentions grouped by category (e.g. "organization" → ["Acme Corp"]).
pub type Entities = BTreeMap<String, Vec<String>>;

/// A news article as stored by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub publish_time: DateTime<Utc>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub related_instruments: BTreeSet<String>,
    /// In `[-1, 1]` when present.
    #[serde(default)]
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub sentiment_label: Option<SentimentLabel>,
    /// Relevance-descending.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub entities: Entities,
    /// In `1..=5` when set.
    #[serde(default)]
    pub importance_level: Option<u8>,
    #[serde(default)]
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewsArticle {
    /// Fresh, unprocessed article. The id is the MD5 of the URL.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
        publish_time: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        let now = Utc::now();
        Self {
            id: article_id_for_url(&url),
            url,
            title: title.into(),
            content: content.into(),
            source: source.into(),
            publish_time,
            category: String::new(),
            related_instruments: BTreeSet::new(),
            sentiment_score: None,
            sentiment_label: None,
            keywords: Vec::new(),
            entities: Entities::new(),
            importance_level: None,
            processed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy enrichment output onto the article and mark it processed.
    pub fn apply_enrichment(&mut self, result: &EnrichmentResult) {
        self.sentiment_score = result.sentiment_score.map(|s| s.clamp(-1.0, 1.0));
        self.sentiment_label = Some(result.sentiment_label);
        self.keywords = result.keywords.clone();
        self.entities = result.entities.clone();
        self.related_instruments = result.related_instruments.iter().cloned().collect();
        self.importance_level = Some(result.importance_level.clamp(1, 5));
        self.processed = true;
        self.updated_at = Utc::now();
    }
}

pub fn article_id_for_url(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

/// Output of the enrichment pipeline for one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub sentiment_score: Option<f64>,
    pub sentiment_label: SentimentLabel,
    pub keywords: Vec<String>,
    pub entities: Entities,
    /// Sorted, de-duplicated instrument codes.
    pub related_instruments: Vec<String>,
    pub importance_level: u8,
    #[serde(default)]
    pub cache_hit: bool,
    /// Produced by the local dictionary/regex path.
    #[serde(default)]
    pub fallback: bool,
}

impl Default for EnrichmentResult {
    fn default() -> Self {
        Self {
            sentiment_score: None,
            sentiment_label: SentimentLabel::Neutral,
            keywords: Vec::new(),
            entities: Entities::new(),
            related_instruments: Vec::new(),
            importance_level: 1,
            cache_hit: false,
            fallback: false,
        }
    }
}

/// Remote sentiment classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    pub label: SentimentLabel,
    pub confidence: f64,
}

impl SentimentReading {
    /// positive → +confidence, negative → −confidence, neutral → 0.
    pub fn signed_score(&self) -> f64 {
        let c = self.confidence.clamp(0.0, 1.0);
        match self.label {
            SentimentLabel::Positive => c,
            SentimentLabel::Negative => -c,
            SentimentLabel::Neutral => 0.0,
        }
    }
}

/// Named entity returned by a remote extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub category: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedKeyword {
    pub word: String,
    pub score: f64,
}
