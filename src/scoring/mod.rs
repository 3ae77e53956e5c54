//! Importance scoring.
//!
//! Seven signals in `[0,1]` are blended with calibrated weights:
//!
//! | signal      | weight |
//! |-------------|--------|
//! | keyword     | 0.30   |
//! | source      | 0.20   |
//! | recency     | 0.10   |
//! | instruments | 0.15   |
//! | sentiment   | 0.10   |
//! | numeric     | 0.10   |
//! | length      | 0.05   |
//!
//! The blend is divided by the weight sum and clamped, then bucketed into a
//! level: `>=0.8 → 5`, `>=0.6 → 4`, `>=0.4 → 3`, `>=0.2 → 2`, else `1`.

pub mod source_weights;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{EnrichmentResult, NewsArticle, SentimentLabel};
use crate::text::tokenize;

pub use source_weights::SourceWeightsConfig;

const TITLE_MULTIPLIER: f64 = 1.5;

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number regex"));
static RE_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?\s?[%％]").expect("percent regex"));

/// Market-moving terms and their weights.
pub static KEYWORD_WEIGHTS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    [
        ("涨停", 1.0),
        ("跌停", 1.0),
        ("降息", 1.0),
        ("加息", 1.0),
        ("降准", 0.9),
        ("重组", 0.9),
        ("并购", 0.9),
        ("收购", 0.8),
        ("退市", 0.9),
        ("立案调查", 0.9),
        ("处罚", 0.8),
        ("违约", 0.8),
        ("ipo", 0.8),
        ("上市", 0.6),
        ("业绩", 0.7),
        ("财报", 0.7),
        ("利润", 0.6),
        ("营收", 0.6),
        ("分红", 0.6),
        ("回购", 0.6),
        ("增持", 0.6),
        ("减持", 0.7),
        ("央行", 0.8),
        ("证监会", 0.8),
        ("政策", 0.5),
        ("rate cut", 1.0),
        ("rate hike", 1.0),
        ("merger", 0.9),
        ("acquisition", 0.8),
        ("bankruptcy", 1.0),
        ("earnings", 0.7),
        ("guidance", 0.6),
        ("dividend", 0.6),
        ("buyback", 0.6),
        ("profit", 0.6),
        ("revenue", 0.6),
        ("lawsuit", 0.7),
        ("investigation", 0.8),
    ]
    .into_iter()
    .collect()
});

/// Text prepared for dictionary lookups: lowercase text for CJK substring
/// matches and a space-padded token string for whole-word ASCII matches.
pub(crate) struct TermHaystack {
    lower: String,
    padded_tokens: String,
}

impl TermHaystack {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            lower: text.to_lowercase(),
            padded_tokens: format!(" {} ", tokenize(text).join(" ")),
        }
    }

    pub(crate) fn contains(&self, term: &str) -> bool {
        if term.is_ascii() {
            self.padded_tokens.contains(&format!(" {term} "))
        } else {
            self.lower.contains(term)
        }
    }
}

/// Dictionary terms found in `text`, heaviest first.
pub fn dictionary_matches(text: &str) -> Vec<(&'static str, f64)> {
    let hay = TermHaystack::new(text);
    let mut found: Vec<(&'static str, f64)> = KEYWORD_WEIGHTS
        .iter()
        .filter(|(term, _)| hay.contains(term))
        .map(|(term, w)| (*term, *w))
        .collect();
    found.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(b.0)));
    found
}

/// Calibrated weights; the blend is normalized by their sum.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceWeights {
    pub w_keyword: f64,
    pub w_source: f64,
    pub w_recency: f64,
    pub w_instruments: f64,
    pub w_sentiment: f64,
    pub w_numeric: f64,
    pub w_length: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            w_keyword: 0.30,
            w_source: 0.20,
            w_recency: 0.10,
            w_instruments: 0.15,
            w_sentiment: 0.10,
            w_numeric: 0.10,
            w_length: 0.05,
        }
    }
}

/// Per-signal scores, all in `[0,1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ImportanceBreakdown {
    pub keyword: f64,
    pub source: f64,
    pub recency: f64,
    pub instruments: f64,
    pub sentiment: f64,
    pub numeric: f64,
    pub length: f64,
    pub total: f64,
    pub level: u8,
}

#[derive(Debug, Clone, Default)]
pub struct ImportanceScorer {
    weights: ImportanceWeights,
    sources: SourceWeightsConfig,
}

impl ImportanceScorer {
    pub fn new(weights: ImportanceWeights, sources: SourceWeightsConfig) -> Self {
        Self { weights, sources }
    }

    /// Importance level (1..=5) as of now.
    pub fn score(&self, article: &NewsArticle, result: &EnrichmentResult) -> u8 {
        self.breakdown_at(article, result, Utc::now()).level
    }

    pub fn breakdown_at(
        &self,
        article: &NewsArticle,
        result: &EnrichmentResult,
        now: DateTime<Utc>,
    ) -> ImportanceBreakdown {
        let mut b = ImportanceBreakdown {
            keyword: keyword_score(&article.title, &article.content),
            source: self.sources.weight_for(&article.source),
            recency: recency_score(now, article.publish_time),
            instruments: instrument_score(result.related_instruments.len()),
            sentiment: sentiment_score(result),
            numeric: numeric_density_score(&format!("{} {}", article.title, article.content)),
            length: length_score(&article.title, &article.content),
            ..Default::default()
        };

        let w = &self.weights;
        let raw = b.keyword * w.w_keyword
            + b.source * w.w_source
            + b.recency * w.w_recency
            + b.instruments * w.w_instruments
            + b.sentiment * w.w_sentiment
            + b.numeric * w.w_numeric
            + b.length * w.w_length;
        let denom = (w.w_keyword
            + w.w_source
            + w.w_recency
            + w.w_instruments
            + w.w_sentiment
            + w.w_numeric
            + w.w_length)
            .max(1e-6);
        b.total = (raw / denom).clamp(0.0, 1.0);
        b.level = level_for_score(b.total);
        b
    }
}

pub fn level_for_score(total: f64) -> u8 {
    if total >= 0.8 {
        5
    } else if total >= 0.6 {
        4
    } else if total >= 0.4 {
        3
    } else if total >= 0.2 {
        2
    } else {
        1
    }
}

/// Average weight of dictionary terms present; title hits count 1.5×.
pub fn keyword_score(title: &str, content: &str) -> f64 {
    let title_hay = TermHaystack::new(title);
    let body_hay = TermHaystack::new(content);
    let hits: Vec<f64> = KEYWORD_WEIGHTS
        .iter()
        .filter_map(|(term, w)| {
            if title_hay.contains(term) {
                Some(w * TITLE_MULTIPLIER)
            } else if body_hay.contains(term) {
                Some(*w)
            } else {
                None
            }
        })
        .collect();
    if hits.is_empty() {
        return 0.0;
    }
    (hits.iter().sum::<f64>() / hits.len() as f64).min(1.0)
}

pub fn recency_score(now: DateTime<Utc>, published: DateTime<Utc>) -> f64 {
    let age_secs = (now - published).num_seconds().max(0);
    const HOUR: i64 = 3600;
    match age_secs {
        a if a <= HOUR => 1.0,
        a if a <= 6 * HOUR => 0.8,
        a if a <= 24 * HOUR => 0.6,
        a if a <= 72 * HOUR => 0.4,
        _ => 0.2,
    }
}

pub fn instrument_score(count: usize) -> f64 {
    match count {
        0 => 0.0,
        1 => 0.8,
        2..=3 => 0.6,
        4..=5 => 0.4,
        _ => 0.2,
    }
}

/// Negative news is treated as slightly more decision-relevant.
pub fn sentiment_score(result: &EnrichmentResult) -> f64 {
    if result.sentiment_score.is_none() {
        return 0.5;
    }
    match result.sentiment_label {
        SentimentLabel::Positive => 0.7,
        SentimentLabel::Negative => 0.8,
        SentimentLabel::Neutral => 0.5,
    }
}

/// Bare numbers add 0.05 each (max 0.5); percentages add 0.1 each (max 0.5).
pub fn numeric_density_score(text: &str) -> f64 {
    let percents = RE_PERCENT.find_iter(text).count();
    let numbers = RE_NUMBER.find_iter(text).count().saturating_sub(percents);
    let n = (numbers as f64 * 0.05).min(0.5);
    let p = (percents as f64 * 0.1).min(0.5);
    (n + p).min(1.0)
}

fn title_length_score(chars: usize) -> f64 {
    match chars {
        0..=4 => 0.2,
        5..=9 => 0.6,
        10..=60 => 1.0,
        61..=100 => 0.7,
        _ => 0.4,
    }
}

fn content_length_score(chars: usize) -> f64 {
    match chars {
        0..=49 => 0.2,
        50..=199 => 0.6,
        200..=3000 => 1.0,
        3001..=10000 => 0.7,
        _ => 0.4,
    }
}

/// Average of title and content "sweet spot" scores.
pub fn length_score(title: &str, content: &str) -> f64 {
    let t = title_length_score(title.trim().chars().count());
    let c = content_length_score(content.trim().chars().count());
    (t + c) / 2.0
}
