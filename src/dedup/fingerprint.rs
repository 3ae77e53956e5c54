//! Content fingerprints and the TTL-bound registry of fingerprints and
//! duplicate records.
//!
//! A fingerprint is MD5 over the sorted, stopword-free, length-capped token
//! list of `title + " " + content`. Token order, case, punctuation and
//! whitespace do not affect it.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::model::NewsArticle;
use crate::store::KeyValueCache;
use crate::text::content_tokens;

/// Default cap on tokens fed into the hash.
pub const FINGERPRINT_TOKEN_CAP: usize = 100;

/// Duplicate records live for a week.
pub const DUPLICATE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

const FP_PREFIX: &str = "news:fp:";
const DUP_PREFIX: &str = "news:dup:";

/// Fingerprint of raw `title`/`content`, keeping the first `cap` sorted tokens.
pub fn fingerprint_text(title: &str, content: &str, cap: usize) -> String {
    let mut tokens = content_tokens(&format!("{title} {content}"));
    tokens.sort_unstable();
    tokens.truncate(cap);
    format!("{:x}", md5::compute(tokens.join(" ").as_bytes()))
}

pub fn fingerprint(article: &NewsArticle) -> String {
    fingerprint_text(&article.title, &article.content, FINGERPRINT_TOKEN_CAP)
}

/// Registry over an external key-value store:
/// - fingerprint → article id of the first article seen with that content
/// - duplicate id → canonical id (audit only; canonical records are untouched)
#[derive(Clone)]
pub struct FingerprintStore {
    cache: Arc<dyn KeyValueCache>,
    fingerprint_ttl: Duration,
    duplicate_ttl: Duration,
}

impl FingerprintStore {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self {
            cache,
            fingerprint_ttl: DUPLICATE_TTL,
            duplicate_ttl: DUPLICATE_TTL,
        }
    }

    pub fn with_ttls(mut self, fingerprint_ttl: Duration, duplicate_ttl: Duration) -> Self {
        self.fingerprint_ttl = fingerprint_ttl;
        self.duplicate_ttl = duplicate_ttl;
        self
    }

    /// Article id registered for `fp`, if any.
    pub async fn lookup(&self, fp: &str) -> Result<Option<String>> {
        self.cache.get(&format!("{FP_PREFIX}{fp}")).await
    }

    pub async fn remember(&self, fp: &str, article_id: &str) -> Result<()> {
        self.cache
            .set(
                &format!("{FP_PREFIX}{fp}"),
                article_id.to_string(),
                self.fingerprint_ttl,
            )
            .await
    }

    pub async fn mark_duplicate(&self, id: &str, canonical_id: &str) -> Result<()> {
        self.cache
            .set(
                &format!("{DUP_PREFIX}{id}"),
                canonical_id.to_string(),
                self.duplicate_ttl,
            )
            .await
    }

    /// Canonical id recorded for `id`, if `id` was marked as a duplicate.
    pub async fn canonical_of(&self, id: &str) -> Result<Option<String>> {
        self.cache.get(&format!("{DUP_PREFIX}{id}")).await
    }
}
