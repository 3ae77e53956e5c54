//! # Source Weights
//!
//! Maps news sources (e.g. "新华社", "Reuters", "sina") to trust weights in
//! `[0.0, 1.0]`. Official and financial press rank highest, portals lower,
//! unknown sources fall back to `default_weight` (0.3).
//!
//! - Loads from JSON config (weights + aliases).
//! - Case-insensitive lookup with normalization of punctuation, dashes, etc.
//! - Fallback order: aliases → exact match → substring match → default.

use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct SourceWeightsConfig {
    /// Weight used when no match is found.
    #[serde(default = "default_default_weight")]
    pub default_weight: f64,
    /// Explicit weights for canonical source names.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    /// Aliases mapping non-canonical names → canonical names.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_default_weight() -> f64 {
    0.30
}

impl Default for SourceWeightsConfig {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl SourceWeightsConfig {
    /// Load configuration from a JSON file, falling back to `default_seed()`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(s) => match serde_json::from_str::<Self>(&s) {
                Ok(mut cfg) => {
                    cfg.normalize_keys();
                    cfg
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid source weights; using built-in seed");
                    Self::default_seed()
                }
            },
            Err(_) => Self::default_seed(),
        }
    }

    /// Weight for a source name.
    pub fn weight_for(&self, source: &str) -> f64 {
        let s = normalize(source);

        // 1) Alias resolution.
        if let Some(canon) = self.aliases.get(&s) {
            if let Some(&w) = self.weights.get(&normalize(canon)) {
                return clamp01(w);
            }
        }

        // 2) Exact weight match.
        if let Some(&w) = self.weights.get(&s) {
            return clamp01(w);
        }

        // 3) Substring fallback, longest key first so "财新网" beats "财新".
        let mut keys: Vec<(&String, &f64)> = self.weights.iter().collect();
        keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        for (k, &w) in keys {
            if !k.is_empty() && s.contains(k.as_str()) {
                return clamp01(w);
            }
        }

        // 4) Default.
        clamp01(self.default_weight)
    }

    fn normalize_keys(&mut self) {
        self.weights = self
            .weights
            .drain()
            .map(|(k, v)| (normalize(&k), v))
            .collect();
        self.aliases = self
            .aliases
            .drain()
            .map(|(k, v)| (normalize(&k), v))
            .collect();
    }

    /// Built-in seed with official, financial-press and portal sources.
    pub fn default_seed() -> Self {
        let mut weights = HashMap::new();
        let mut aliases = HashMap::new();

        for (k, v) in [
            // official / regulators
            ("新华社", 1.0),
            ("人民日报", 1.0),
            ("央视新闻", 0.95),
            ("中国证监会", 1.0),
            ("中国人民银行", 1.0),
            ("国务院", 1.0),
            // financial press
            ("证券时报", 0.9),
            ("中国证券报", 0.9),
            ("上海证券报", 0.9),
            ("证券日报", 0.85),
            ("财新", 0.85),
            ("第一财经", 0.8),
            ("21世纪经济报道", 0.8),
            ("经济观察报", 0.8),
            ("reuters", 0.85),
            ("bloomberg", 0.85),
            ("wall street journal", 0.85),
            ("financial times", 0.85),
            // portals
            ("新浪财经", 0.6),
            ("东方财富", 0.6),
            ("同花顺", 0.55),
            ("腾讯财经", 0.5),
            ("网易财经", 0.5),
            ("搜狐财经", 0.5),
            ("凤凰财经", 0.5),
        ] {
            weights.insert(normalize(k), v);
        }

        for (a, c) in [
            ("xinhua", "新华社"),
            ("xinhuanet", "新华社"),
            ("people's daily", "人民日报"),
            ("cctv", "央视新闻"),
            ("csrc", "中国证监会"),
            ("pboc", "中国人民银行"),
            ("stcn", "证券时报"),
            ("cs com cn", "中国证券报"),
            ("cnstock", "上海证券报"),
            ("caixin", "财新"),
            ("yicai", "第一财经"),
            ("21jingji", "21世纪经济报道"),
            ("wsj", "wall street journal"),
            ("ft", "financial times"),
            ("sina", "新浪财经"),
            ("sina finance", "新浪财经"),
            ("eastmoney", "东方财富"),
            ("10jqka", "同花顺"),
            ("qq finance", "腾讯财经"),
            ("163 money", "网易财经"),
            ("sohu", "搜狐财经"),
            ("ifeng", "凤凰财经"),
        ] {
            aliases.insert(normalize(a), c.to_string());
        }

        Self {
            default_weight: default_default_weight(),
            weights,
            aliases,
        }
    }
}

/// Lowercase, replace punctuation/dashes with spaces, collapse spaces.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_lowercase();

    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['\n', '\r', '\t', '.', ',', '‚', '’', '\''], " ");

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
