//! Text normalization and tokenization shared by dedup, enrichment and scoring.
//!
//! Three flavours of normalization:
//! - [`normalize_text`]: display form (entities decoded, tags stripped, quotes folded).
//! - [`clean_for_enrichment`]: what the NLP calls see (tags + control chars stripped).
//! - [`normalize_for_match`]: comparison form (lowercase, punctuation removed).
//!
//! Tokens are whitespace-separated words; runs of CJK ideographs are split into
//! one token per character so Chinese text still yields comparable token sets.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Normalize text for display/storage: decode entities, strip tags, fold typographic
/// quotes and collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let decoded = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    let mut out = RE_TAGS.replace_all(&decoded, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// Prepare title/content for the enrichment calls: strip tags and control
/// characters, collapse whitespace.
pub fn clean_for_enrichment(s: &str) -> String {
    let no_tags = RE_TAGS.replace_all(s, " ");
    let no_ctrl: String = no_tags
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    RE_WS.replace_all(&no_ctrl, " ").trim().to_string()
}

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn normalize_for_match(s: &str) -> String {
    let replaced: String = s
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tokenize after [`normalize_for_match`].
pub fn tokenize(s: &str) -> Vec<String> {
    let norm = normalize_for_match(s);
    let mut out = Vec::new();
    for word in norm.split(' ').filter(|w| !w.is_empty()) {
        if !word.chars().any(is_cjk) {
            out.push(word.to_string());
            continue;
        }
        let mut buf = String::new();
        for ch in word.chars() {
            if is_cjk(ch) {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
                out.push(ch.to_string());
            } else {
                buf.push(ch);
            }
        }
        if !buf.is_empty() {
            out.push(buf);
        }
    }
    out
}

/// Tokenize and drop stopwords.
pub fn content_tokens(s: &str) -> Vec<String> {
    tokenize(s).into_iter().filter(|t| !is_stopword(t)).collect()
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{30FF}')
}

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English
        "a", "an", "the", "and", "or", "but", "of", "to", "in", "on", "at", "by", "for",
        "with", "from", "as", "is", "are", "was", "were", "be", "been", "being", "it", "its",
        "this", "that", "these", "those", "has", "have", "had", "will", "would", "can",
        "could", "should", "may", "might", "do", "does", "did", "not", "no", "so", "than",
        "then", "there", "their", "they", "he", "she", "we", "you", "i", "his", "her", "our",
        "your", "about", "after", "before", "over", "into", "up", "down", "out", "also",
        "said", "says",
        // Chinese function characters
        "的", "了", "和", "是", "在", "也", "就", "都", "而", "及", "与", "着", "或", "一个",
        "没有", "我们", "你们", "他们", "这", "那", "之", "其", "于", "以", "为", "被",
    ]
    .into_iter()
    .collect()
});

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Cap a string at `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "<p>Hello&nbsp;<b>world</b> &ldquo;ok&rdquo;</p>";
        assert_eq!(normalize_text(s), r#"Hello world "ok""#);
    }

    #[test]
    fn clean_for_enrichment_drops_control_chars() {
        let s = "<div>Profit\u{0007} up</div>\n\n\tstrongly";
        assert_eq!(clean_for_enrichment(s), "Profit up strongly");
    }

    #[test]
    fn match_form_ignores_case_and_punctuation() {
        assert_eq!(
            normalize_for_match("Company X: Profits RISE!!"),
            "company x profits rise"
        );
        assert_eq!(normalize_for_match("  "), "");
    }

    #[test]
    fn cjk_runs_split_per_character() {
        let toks = tokenize("600519 贵州茅台 Q3");
        assert_eq!(toks, vec!["600519", "贵", "州", "茅", "台", "q3"]);
    }

    #[test]
    fn content_tokens_remove_stopwords() {
        let toks = content_tokens("The profits of the company rose");
        assert_eq!(toks, vec!["profits", "company", "rose"]);
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate_chars("贵州茅台", 2), "贵州");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
