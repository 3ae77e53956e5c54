//! Remote NLP provider abstraction + concrete providers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::{Entity, SentimentLabel, SentimentReading, WeightedKeyword};

/// Remote sentiment / entity / keyword service.
#[async_trait]
pub trait RemoteNlp: Send + Sync {
    async fn sentiment(&self, text: &str) -> Result<SentimentReading>;

    async fn entities(&self, text: &str) -> Result<Vec<Entity>>;

    async fn keywords(&self, title: &str, content: &str) -> Result<Vec<WeightedKeyword>>;

    /// Whether [`RemoteNlp::sentiment_batch`] is implemented.
    fn supports_batch(&self) -> bool {
        false
    }

    /// One call for many texts; output order matches input order.
    async fn sentiment_batch(&self, texts: &[String]) -> Result<Vec<SentimentReading>> {
        let _ = texts;
        bail!("{} does not support batched sentiment", self.name())
    }

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

pub type DynNlp = Arc<dyn RemoteNlp>;

/// Always fails; the pipeline then takes the local path.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNlp;

#[async_trait]
impl RemoteNlp for DisabledNlp {
    async fn sentiment(&self, _text: &str) -> Result<SentimentReading> {
        bail!("remote NLP disabled")
    }

    async fn entities(&self, _text: &str) -> Result<Vec<Entity>> {
        bail!("remote NLP disabled")
    }

    async fn keywords(&self, _title: &str, _content: &str) -> Result<Vec<WeightedKeyword>> {
        bail!("remote NLP disabled")
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NlpProvider {
    #[default]
    Disabled,
    #[serde(alias = "open_ai")]
    OpenAi,
}

/// `[nlp]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NlpConfig {
    pub provider: NlpProvider,
    pub model: String,
    /// `"ENV"` reads `OPENAI_API_KEY`.
    pub api_key: String,
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            provider: NlpProvider::Disabled,
            model: "gpt-4o-mini".to_string(),
            api_key: "ENV".to_string(),
        }
    }
}

impl NlpConfig {
    pub fn resolve_api_key(&self) -> String {
        if self.api_key == "ENV" {
            std::env::var("OPENAI_API_KEY").unwrap_or_default()
        } else {
            self.api_key.clone()
        }
    }
}

/// Build a client according to config. An OpenAI provider without a key
/// degrades to [`DisabledNlp`].
pub fn build_nlp_client(cfg: &NlpConfig, timeout: Duration) -> Result<DynNlp> {
    match cfg.provider {
        NlpProvider::Disabled => Ok(Arc::new(DisabledNlp)),
        NlpProvider::OpenAi => {
            let key = cfg.resolve_api_key();
            if key.is_empty() {
                tracing::warn!(target: "enrich", "openai selected but no API key set; remote NLP disabled");
                return Ok(Arc::new(DisabledNlp));
            }
            Ok(Arc::new(OpenAiNlp::new(&cfg.model, key, timeout)?))
        }
    }
}

// ------------------------------------------------------------
// OpenAI (Chat Completions, JSON mode)
// ------------------------------------------------------------

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiNlp {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct RawSentiment {
    label: String,
    #[serde(default)]
    confidence: f64,
}

impl RawSentiment {
    fn into_reading(self) -> Result<SentimentReading> {
        let label = SentimentLabel::parse(&self.label)
            .ok_or_else(|| anyhow!("unknown sentiment label {:?}", self.label))?;
        Ok(SentimentReading {
            label,
            confidence: self.confidence.clamp(0.0, 1.0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct EntitiesResp {
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Debug, Deserialize)]
struct KeywordsResp {
    #[serde(default)]
    keywords: Vec<WeightedKeyword>,
}

#[derive(Debug, Deserialize)]
struct BatchResp {
    #[serde(default)]
    results: Vec<RawSentiment>,
}

impl OpenAiNlp {
    pub fn new(model: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("news-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            api_key,
            model: model.to_string(),
        })
    }

    async fn chat_json<T: DeserializeOwned>(&self, system: &str, user: &str) -> Result<T> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("openai request")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("openai returned {status}");
        }
        let body: Resp = resp.json().await.context("decoding openai response")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| anyhow!("openai returned no choices"))?;
        serde_json::from_str(content).context("decoding openai JSON payload")
    }
}

#[async_trait]
impl RemoteNlp for OpenAiNlp {
    async fn sentiment(&self, text: &str) -> Result<SentimentReading> {
        let sys = "Classify the financial sentiment of the news text. Reply with JSON \
                   {\"label\": \"positive\"|\"neutral\"|\"negative\", \"confidence\": 0..1}.";
        let raw: RawSentiment = self.chat_json(sys, text).await?;
        raw.into_reading()
    }

    async fn entities(&self, text: &str) -> Result<Vec<Entity>> {
        let sys = "Extract named entities from the news text. Reply with JSON \
                   {\"entities\": [{\"text\": str, \"category\": \"organization\"|\"person\"|\"location\"|\"money\"|\"date\", \"confidence\": 0..1}]}.";
        let resp: EntitiesResp = self.chat_json(sys, text).await?;
        Ok(resp.entities)
    }

    async fn keywords(&self, title: &str, content: &str) -> Result<Vec<WeightedKeyword>> {
        let sys = "Extract up to 15 keywords from the news article, most relevant first. Reply with JSON \
                   {\"keywords\": [{\"word\": str, \"score\": 0..1}]}.";
        let user = format!("Title: {title}\n\n{content}");
        let resp: KeywordsResp = self.chat_json(sys, &user).await?;
        Ok(resp.keywords)
    }

    async fn sentiment_batch(&self, texts: &[String]) -> Result<Vec<SentimentReading>> {
        let sys = "Classify the financial sentiment of each numbered news text. Reply with JSON \
                   {\"results\": [{\"label\": \"positive\"|\"neutral\"|\"negative\", \"confidence\": 0..1}]} \
                   with exactly one entry per text, in input order.";
        let user = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("[{}] {}", i + 1, t))
            .collect::<Vec<_>>()
            .join("\n\n");
        let resp: BatchResp = self.chat_json(sys, &user).await?;
        if resp.results.len() != texts.len() {
            bail!(
                "batched sentiment returned {} results for {} texts",
                resp.results.len(),
                texts.len()
            );
        }
        resp.results.into_iter().map(RawSentiment::into_reading).collect()
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
