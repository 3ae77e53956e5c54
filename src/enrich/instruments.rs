//! Related-instrument extraction. Always local, never remote.
//!
//! Two signals are combined:
//! - bare 6-digit codes whose 3-digit prefix is on the exchange whitelist,
//! - company names from a curated name → code map. Map entries are
//!   registered with corporate suffixes stripped and bracketed aliases split
//!   out, so "中国平安保险（集团）股份有限公司" also answers to "中国平安保险".

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

use crate::scoring::TermHaystack;
use crate::text::tokenize;

/// Code prefixes of the Shanghai / Shenzhen boards.
pub const DEFAULT_CODE_PREFIXES: &[&str] = &[
    "600", "601", "603", "605", "688", "000", "001", "002", "003", "300",
];

const CORPORATE_SUFFIXES: &[&str] = &[
    "股份有限公司",
    "有限责任公司",
    "有限公司",
    "控股集团",
    "集团",
    "股份",
    "公司",
    " co., ltd.",
    " co., ltd",
    " limited",
    " inc.",
    " inc",
    " corp.",
    " corp",
];

const ALIAS_PREFIXES: &[&str] = &["简称", "原", "下称"];

static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digit regex"));
static RE_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[（(]([^（()）]*)[）)]").expect("bracket regex"));

fn seed_names() -> Vec<(&'static str, &'static str)> {
    vec![
        ("贵州茅台酒股份有限公司", "600519"),
        ("茅台", "600519"),
        ("Kweichow Moutai", "600519"),
        ("中国平安保险（集团）股份有限公司", "601318"),
        ("中国平安", "601318"),
        ("Ping An Insurance", "601318"),
        ("招商银行股份有限公司", "600036"),
        ("工商银行", "601398"),
        ("中国工商银行股份有限公司（ICBC）", "601398"),
        ("建设银行", "601939"),
        ("农业银行", "601288"),
        ("中国银行", "601988"),
        ("兴业银行", "601166"),
        ("平安银行股份有限公司（原深发展）", "000001"),
        ("万科企业股份有限公司（万科）", "000002"),
        ("五粮液", "000858"),
        ("美的集团股份有限公司", "000333"),
        ("格力电器", "000651"),
        ("比亚迪股份有限公司（BYD）", "002594"),
        ("海康威视", "002415"),
        ("立讯精密", "002475"),
        ("宁德时代新能源科技股份有限公司（宁德时代）", "300750"),
        ("CATL", "300750"),
        ("东方财富", "300059"),
        ("迈瑞医疗", "300760"),
        ("中芯国际集成电路制造有限公司（中芯国际）", "688981"),
        ("隆基绿能科技股份有限公司（隆基绿能）", "601012"),
        ("长江电力", "600900"),
        ("中国石油天然气股份有限公司（中国石油）", "601857"),
        ("中国石化", "600028"),
        ("中信证券", "600030"),
        ("恒瑞医药", "600276"),
        ("伊利股份", "600887"),
        ("海天味业", "603288"),
        ("紫金矿业", "601899"),
    ]
}

/// Strip one trailing corporate suffix (case-insensitive for ASCII names).
pub fn strip_corporate_suffix(name: &str) -> String {
    let trimmed = name.trim();
    let lower = trimmed.to_lowercase();
    for suffix in CORPORATE_SUFFIXES {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            // Suffixes are ASCII or whole CJK words, so the byte cut is on a char boundary.
            return trimmed[..trimmed.len() - suffix.len()].trim().to_string();
        }
    }
    trimmed.to_string()
}

#[derive(Debug, Clone)]
pub struct InstrumentExtractor {
    prefixes: Vec<String>,
    /// Lowercased name → code.
    names: HashMap<String, String>,
}

impl Default for InstrumentExtractor {
    fn default() -> Self {
        let mut ex = Self {
            prefixes: DEFAULT_CODE_PREFIXES.iter().map(|p| p.to_string()).collect(),
            names: HashMap::new(),
        };
        for (name, code) in seed_names() {
            ex.register(name, code);
        }
        ex
    }
}

impl InstrumentExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the built-in name map.
    pub fn with_aliases<'a>(mut self, aliases: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (name, code) in aliases {
            self.register(name, code);
        }
        self
    }

    /// Register a company name. Bracketed parts become separate aliases, and the
    /// remainder is registered both as given and with its suffix stripped.
    pub fn register(&mut self, name: &str, code: &str) {
        let mut aliases: Vec<String> = RE_BRACKET
            .captures_iter(name)
            .filter_map(|c| c.get(1))
            .map(|m| {
                let mut inner = m.as_str().trim();
                for p in ALIAS_PREFIXES {
                    inner = inner.strip_prefix(p).unwrap_or(inner);
                }
                inner.to_string()
            })
            .collect();

        let base = RE_BRACKET.replace_all(name, "").trim().to_string();
        aliases.push(strip_corporate_suffix(&base));
        aliases.push(base);

        for alias in aliases {
            // Single characters and bare suffix words are too ambiguous.
            if alias.chars().count() < 2 || CORPORATE_SUFFIXES.contains(&alias.as_str()) {
                continue;
            }
            // ASCII names are matched on whole tokens.
            let key = if alias.is_ascii() {
                tokenize(&alias).join(" ")
            } else {
                alias.to_lowercase()
            };
            if !key.is_empty() {
                self.names.insert(key, code.to_string());
            }
        }
    }

    pub fn is_valid_code(&self, code: &str) -> bool {
        code.len() == 6
            && code.bytes().all(|b| b.is_ascii_digit())
            && self.prefixes.iter().any(|p| code.starts_with(p.as_str()))
    }

    /// Sorted, de-duplicated instrument codes mentioned in `text`.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut found = BTreeSet::new();

        // Whole digit runs only: "6005190" must not yield "600519".
        for m in RE_DIGITS.find_iter(text) {
            if self.is_valid_code(m.as_str()) {
                found.insert(m.as_str().to_string());
            }
        }

        let hay = TermHaystack::new(text);
        for (name, code) in &self.names {
            if hay.contains(name) {
                found.insert(code.clone());
            }
        }

        found.into_iter().collect()
    }
}
