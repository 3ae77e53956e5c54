//! Local enrichment used when every remote call fails: lexicon sentiment,
//! regex entity patterns and dictionary keywords.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::model::Entities;
use crate::scoring::dictionary_matches;
use crate::text::tokenize;

static LEXICON: Lazy<HashMap<String, f64>> = Lazy::new(|| {
    let raw = include_str!("sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, f64>>(raw).expect("valid sentiment lexicon")
});

/// ASCII terms vs CJK terms; they are matched differently.
static SPLIT_LEXICON: Lazy<(Vec<(&'static str, f64)>, Vec<(&'static str, f64)>)> = Lazy::new(|| {
    let mut ascii = Vec::new();
    let mut cjk = Vec::new();
    for (k, v) in LEXICON.iter() {
        if k.is_ascii() {
            ascii.push((k.as_str(), *v));
        } else if k.chars().count() >= 2 {
            cjk.push((k.as_str(), *v));
        }
    }
    // Longer terms first so "不及预期" is seen before any shorter overlap.
    cjk.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()).then(a.0.cmp(b.0)));
    (ascii, cjk)
});

const CJK_NEGATORS: [char; 4] = ['不', '没', '未', '无'];

/// Negators as produced by [`tokenize`] ("isn't" → "isn", "t").
fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "without"
            | "cannot"
            | "isn"
            | "wasn"
            | "aren"
            | "weren"
            | "don"
            | "doesn"
            | "didn"
            | "won"
    )
}

#[derive(Debug, Clone, Default)]
pub struct LexiconSentiment;

impl LexiconSentiment {
    pub fn new() -> Self {
        Self
    }

    /// Average weight of lexicon hits, clamped to `[-1, 1]`, and the number of hits.
    ///
    /// English terms are negated when a negator appears in the previous 1..=3
    /// tokens; Chinese terms when the character right before the match is one
    /// of 不/没/未/无.
    pub fn score_text(&self, text: &str) -> (f64, usize) {
        let (ascii, cjk) = &*SPLIT_LEXICON;
        let mut hits: Vec<f64> = Vec::new();

        let tokens = tokenize(text);
        for (i, tok) in tokens.iter().enumerate() {
            let Some((_, w)) = ascii.iter().find(|(t, _)| *t == tok.as_str()) else {
                continue;
            };
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            hits.push(if negated { -w } else { *w });
        }

        let mut rest = text.to_string();
        for (term, w) in cjk {
            if !rest.contains(term) {
                continue;
            }
            let mut masked = String::with_capacity(rest.len());
            let mut last = 0;
            for (pos, _) in rest.match_indices(term) {
                let negated = rest[..pos]
                    .chars()
                    .next_back()
                    .is_some_and(|c| CJK_NEGATORS.contains(&c));
                hits.push(if negated { -w } else { *w });
                masked.push_str(&rest[last..pos]);
                masked.push(' ');
                last = pos + term.len();
            }
            masked.push_str(&rest[last..]);
            // Consumed spans are blanked so shorter terms do not count twice.
            rest = masked;
        }

        if hits.is_empty() {
            return (0.0, 0);
        }
        let avg = hits.iter().sum::<f64>() / hits.len() as f64;
        (avg.clamp(-1.0, 1.0), hits.len())
    }
}

static ENTITY_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (
            "organization",
            r"\p{Han}{2,12}?(?:股份有限公司|有限公司|集团|银行|证券|保险|公司)",
        ),
        (
            "organization",
            r"\b[A-Z][A-Za-z&]+(?:\s[A-Z][A-Za-z&]+)*\s(?:Inc|Corp|Corporation|Ltd|Group|Holdings|Bank)\b\.?",
        ),
        (
            "money",
            r"\d+(?:\.\d+)?\s?(?:万亿元|亿美元|亿元|万元|美元|元)",
        ),
        (
            "money",
            r"(?i)(?:US)?\$\s?\d+(?:\.\d+)?(?:\s?(?:million|billion|trillion|bn|m))?",
        ),
        ("percentage", r"[-+]?\d+(?:\.\d+)?\s?[%％]"),
        ("date", r"\d{4}年\d{1,2}月(?:\d{1,2}日)?"),
        ("date", r"\b\d{4}-\d{2}-\d{2}\b"),
    ]
    .into_iter()
    .map(|(cat, pat)| (cat, Regex::new(pat).expect("entity regex")))
    .collect()
});

/// Pattern-based entities grouped by category, first-seen order, no repeats.
pub fn extract_entities(text: &str) -> Entities {
    let mut out = Entities::new();
    for (category, re) in ENTITY_PATTERNS.iter() {
        for m in re.find_iter(text) {
            let mention = m.as_str().trim().to_string();
            if mention.is_empty() {
                continue;
            }
            let list = out.entry((*category).to_string()).or_default();
            if !list.contains(&mention) {
                list.push(mention);
            }
        }
    }
    out
}

/// Dictionary terms present in the text, heaviest first.
pub fn dictionary_keywords(text: &str, max: usize) -> Vec<String> {
    dictionary_matches(text)
        .into_iter()
        .take(max)
        .map(|(term, _)| term.to_string())
        .collect()
}

/// Everything the local path produces for one text.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalAnalysis {
    pub sentiment_score: f64,
    pub sentiment_hits: usize,
    pub entities: Entities,
    pub keywords: Vec<String>,
}

pub fn analyze_locally(text: &str, max_keywords: usize) -> LocalAnalysis {
    let (sentiment_score, sentiment_hits) = LexiconSentiment::new().score_text(text);
    LocalAnalysis {
        sentiment_score,
        sentiment_hits,
        entities: extract_entities(text),
        keywords: dictionary_keywords(text, max_keywords),
    }
}
