use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sismo_adapters::{ExtractorSettings, DEFAULT_MAX_ROWS, DEFAULT_TABLE_CLASS};
use sismo_core::IngestionStrategy;
use sismo_storage::DEFAULT_USER_AGENT;

pub const DEFAULT_API_URL: &str = "https://ultimosismo.igp.gob.pe/api/ultimo-sismo/ajaxb/2025";
pub const DEFAULT_HTML_URL: &str = "https://ultimosismo.igp.gob.pe/ultimo-sismo/sismos-reportados";
pub const DEFAULT_CONFIG_PATH: &str = "./sismo.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub strategy: IngestionStrategy,
    pub api_url: String,
    pub html_url: String,
    pub table_class: String,
    pub max_rows: usize,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub store_url: String,
    pub table_name: String,
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: IngestionStrategy::Api,
            api_url: DEFAULT_API_URL.to_string(),
            html_url: DEFAULT_HTML_URL.to_string(),
            table_class: DEFAULT_TABLE_CLASS.to_string(),
            max_rows: DEFAULT_MAX_ROWS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 20,
            store_url: "./data/sismos.json".to_string(),
            table_name: "tabla_web_scrapping_igp".to_string(),
            log_level: "info".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}"))
}

impl SyncConfig {
    /// Defaults, then `SISMO_CONFIG` (or `./sismo.yaml` when present), then `SISMO_*` env vars.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var("SISMO_CONFIG").ok().map(PathBuf::from);
        let base = match explicit {
            Some(path) => Self::from_yaml_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_yaml_file(DEFAULT_CONFIG_PATH)?
            }
            None => Self::default(),
        };
        base.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("SISMO_STRATEGY") {
            self.strategy = v
                .parse()
                .map_err(|e: String| anyhow::anyhow!("invalid SISMO_STRATEGY: {e}"))?;
        }
        if let Some(v) = lookup("SISMO_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = lookup("SISMO_HTML_URL") {
            self.html_url = v;
        }
        if let Some(v) = lookup("SISMO_TABLE_CLASS") {
            self.table_class = v;
        }
        if let Some(v) = lookup("SISMO_MAX_ROWS") {
            self.max_rows = parse_env("SISMO_MAX_ROWS", &v)?;
        }
        if let Some(v) = lookup("SISMO_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = lookup("SISMO_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_env("SISMO_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SISMO_STORE_URL") {
            self.store_url = v;
        }
        if let Some(v) = lookup("SISMO_TABLE_NAME") {
            self.table_name = v;
        }
        if let Some(v) = lookup("SISMO_LOG") {
            self.log_level = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rows == 0 {
            bail!("max_rows must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be at least 1");
        }
        if self.store_url.trim().is_empty() {
            bail!("store_url must not be empty");
        }
        sismo_storage::validate_table_name(&self.table_name)?;
        Ok(())
    }

    pub fn url_for(&self, strategy: IngestionStrategy) -> &str {
        match strategy {
            IngestionStrategy::Api => &self.api_url,
            IngestionStrategy::Html => &self.html_url,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn extractor_settings(&self) -> ExtractorSettings {
        ExtractorSettings {
            max_rows: self.max_rows,
            table_class: self.table_class.clone(),
        }
    }
}
