use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::ingest::ArticleFetcher;
use crate::metrics as m;
use crate::model::{NewsArticle, NewsSource};
use crate::text::normalize_text;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    category: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(ts.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// RSS 2.0 over HTTP. Article ids are the MD5 of the item link.
pub struct RssFetcher {
    client: reqwest::Client,
}

impl RssFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("news-pipeline/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("building rss http client")?;
        Ok(Self { client })
    }

    /// Parse a feed body into articles attributed to `source`. Items without
    /// a link or without any text are dropped.
    pub fn parse_feed(xml: &str, source: &NewsSource) -> Result<Vec<NewsArticle>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean)
            .with_context(|| format!("parsing rss xml for {}", source.name))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let Some(link) = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) else {
                continue;
            };
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            let content = normalize_text(it.description.as_deref().unwrap_or_default());
            if title.is_empty() && content.is_empty() {
                continue;
            }
            let published = it
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822)
                .unwrap_or_else(Utc::now);

            let mut article = NewsArticle::new(link, title, content, source.name.clone(), published);
            article.category = it
                .category
                .map(|c| normalize_text(&c))
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| source.category.clone());
            out.push(article);
        }

        histogram!(m::INGEST_PARSE_MS).record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[async_trait]
impl ArticleFetcher for RssFetcher {
    async fn fetch(&self, source: &NewsSource) -> Result<Vec<NewsArticle>> {
        if source.url.trim().is_empty() {
            anyhow::bail!("source {} has no feed url", source.name);
        }
        let resp = match self.client.get(&source.url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, source = %source.name, "rss http error");
                counter!(m::INGEST_PROVIDER_ERRORS).increment(1);
                return Err(e).with_context(|| format!("GET {}", source.url));
            }
        };
        let status = resp.status();
        if !status.is_success() {
            counter!(m::INGEST_PROVIDER_ERRORS).increment(1);
            anyhow::bail!("GET {} returned {status}", source.url);
        }
        let body = resp.text().await.context("reading rss body")?;
        Self::parse_feed(&body, source)
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}

/// XML only knows five named entities; map the common HTML ones first.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
