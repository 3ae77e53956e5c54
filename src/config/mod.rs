//! Application configuration (TOML).
//!
//! Lookup order:
//! 1) `$NEWS_PIPELINE_CONFIG`
//! 2) `config/pipeline.toml`
//! 3) built-in defaults
//!
//! Every section and field is optional. Values are sanitized after parsing.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::dedup::DedupConfig;
use crate::enrich::{EnrichmentConfig, NlpConfig};
use crate::ingest::SchedulerConfig;
use crate::model::NewsSource;
use crate::scoring::{ImportanceWeights, SourceWeightsConfig};

pub const ENV_CONFIG_PATH: &str = "NEWS_PIPELINE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// File cache directory; in-memory cache when unset.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus listener address, e.g. "127.0.0.1:9000".
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// JSON file with `default_weight`, `weights` and `aliases`; built-in
    /// source table when unset.
    pub source_weights_path: Option<PathBuf>,
    pub weights: ImportanceWeights,
}

impl ScoringConfig {
    pub fn source_weights(&self) -> SourceWeightsConfig {
        match &self.source_weights_path {
            Some(p) => SourceWeightsConfig::load_from_file(p),
            None => SourceWeightsConfig::default_seed(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sources: Vec<NewsSource>,
    pub scheduler: SchedulerConfig,
    pub dedup: DedupConfig,
    pub enrichment: EnrichmentConfig,
    pub nlp: NlpConfig,
    pub scoring: ScoringConfig,
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: Self = toml::from_str(s).context("parsing pipeline config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Env path, then `config/pipeline.toml`, then defaults. A set but
    /// missing env path is an error.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                ));
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        let mut cfg = Self::default();
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn sanitize(&mut self) {
        self.scheduler.sanitize();
        self.dedup.sanitize();
        self.enrichment.sanitize();

        let mut names: Vec<String> = Vec::new();
        self.sources.retain_mut(|s| {
            s.name = s.name.trim().to_string();
            if s.name.is_empty() {
                tracing::warn!("source without a name ignored");
                return false;
            }
            if names.contains(&s.name) {
                tracing::warn!(source = %s.name, "duplicate source ignored");
                return false;
            }
            names.push(s.name.clone());
            true
        });
    }
}
