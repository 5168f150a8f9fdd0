//! Sync pipeline: fetch, extract, full-table replace, respond.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sismo_adapters::{extractor_for, ExtractError, Extractor};
use sismo_core::{IngestionStrategy, InvocationResult, SnapshotRow};
use sismo_storage::{
    open_table_store, FetchError, HttpClientConfig, HttpFetcher, PageFetcher, StoreError,
    TableStore,
};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

mod config;
mod replace;

pub use config::{SyncConfig, DEFAULT_API_URL, DEFAULT_CONFIG_PATH, DEFAULT_HTML_URL};
pub use replace::{ReplaceReport, SnapshotReplacer};

pub const CRATE_NAME: &str = "sismo-sync";

pub const MSG_NO_DATA: &str = "No se encontraron datos sísmicos";
pub const MSG_TABLE_NOT_FOUND: &str = "No se encontró la tabla en la página";

/// Steps of one invocation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    Fetching,
    Parsing,
    Extracting,
    Replacing,
    Responding,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "FETCHING",
            Self::Parsing => "PARSING",
            Self::Extracting => "EXTRACTING",
            Self::Replacing => "REPLACING",
            Self::Responding => "RESPONDING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("upstream answered http status {status}")]
    UpstreamHttp {
        status: u16,
        strategy: IngestionStrategy,
    },
    #[error("network error: {detail}")]
    Network { detail: String },
    #[error("decoding upstream body: {detail}")]
    Decode { detail: String },
    #[error("no seismic records in upstream payload")]
    NoData,
    #[error("no table element in upstream document")]
    TableNotFound { preview: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("encoding response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<ExtractError> for SyncError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NoData => Self::NoData,
            ExtractError::TableNotFound { preview } => Self::TableNotFound { preview },
            ExtractError::Decode { detail, .. } => Self::Decode { detail },
            other @ ExtractError::Selector { .. } => Self::Decode {
                detail: other.to_string(),
            },
        }
    }
}

impl SyncError {
    pub fn from_fetch(err: FetchError, strategy: IngestionStrategy) -> Self {
        match err {
            FetchError::HttpStatus { status, .. } => Self::UpstreamHttp { status, strategy },
            FetchError::Request(err) => Self::Network {
                detail: err.to_string(),
            },
        }
    }

    pub fn phase(&self) -> SyncPhase {
        match self {
            Self::UpstreamHttp { .. } | Self::Network { .. } => SyncPhase::Fetching,
            Self::Decode { .. } => SyncPhase::Parsing,
            Self::NoData | Self::TableNotFound { .. } => SyncPhase::Extracting,
            Self::Store(_) => SyncPhase::Replacing,
            Self::Encode(_) => SyncPhase::Responding,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::UpstreamHttp { status, .. } => *status,
            Self::NoData | Self::TableNotFound { .. } => 404,
            Self::Network { .. } | Self::Decode { .. } | Self::Store(_) | Self::Encode(_) => 500,
        }
    }

    pub fn error_body(&self) -> JsonValue {
        match self {
            Self::UpstreamHttp { status, strategy } => {
                let target = match strategy {
                    IngestionStrategy::Api => "la API",
                    IngestionStrategy::Html => "la página",
                };
                json!({ "error": format!("Error al acceder a {target}: {status}") })
            }
            Self::Network { detail } | Self::Decode { detail } => {
                json!({ "error": format!("Error en la solicitud: {detail}") })
            }
            Self::NoData => json!({ "error": MSG_NO_DATA }),
            Self::TableNotFound { preview } => json!({
                "error": MSG_TABLE_NOT_FOUND,
                "html_preview": preview,
            }),
            Self::Store(err) => json!({ "error": format!("Error al actualizar la tabla: {err}") }),
            Self::Encode(err) => json!({ "error": format!("Error al generar la respuesta: {err}") }),
        }
    }

    pub fn to_invocation_result(&self) -> InvocationResult {
        InvocationResult::json(self.status_code(), &self.error_body())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub strategy: IngestionStrategy,
    pub source_url: String,
    pub store: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status_code: u16,
    pub failed_phase: Option<SyncPhase>,
    pub deleted_rows: usize,
    pub inserted_rows: usize,
}

#[derive(Debug, Clone)]
pub struct SyncRun {
    pub result: InvocationResult,
    pub summary: SyncRunSummary,
}

pub struct SyncPipeline {
    config: SyncConfig,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Box<dyn Extractor>,
    store: Arc<dyn TableStore>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, fetcher: Arc<dyn PageFetcher>, store: Arc<dyn TableStore>) -> Self {
        let extractor = extractor_for(config.strategy, &config.extractor_settings());
        Self {
            config,
            fetcher,
            extractor,
            store,
        }
    }

    /// Build the reqwest fetcher and open the configured store.
    pub async fn from_config(config: SyncConfig) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout(),
            user_agent: Some(config.user_agent.clone()),
        })
        .context("building http client")?;
        let store = open_table_store(&config.store_url, &config.table_name)
            .await
            .with_context(|| format!("opening store {}", config.store_url))?;
        Ok(Self::new(config, Arc::new(fetcher), store))
    }

    pub fn with_extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn strategy(&self) -> IngestionStrategy {
        self.extractor.strategy()
    }

    /// Invocation entry point. The event is accepted for compatibility and ignored.
    pub async fn invoke(&self, _event: &JsonValue) -> InvocationResult {
        self.run_once().await.result
    }

    pub async fn run_once(&self) -> SyncRun {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let strategy = self.strategy();
        let source_url = self.config.url_for(strategy).to_string();

        let span = info_span!("sync_run", %run_id, %strategy);
        let outcome = self.execute(&source_url).instrument(span).await;

        let (result, failed_phase, deleted_rows, inserted_rows) = match outcome {
            Ok((report, result)) => (result, None, report.deleted, report.inserted.len()),
            Err(err) => {
                warn!(%run_id, phase = %err.phase(), status = err.status_code(), error = %err, "sync run failed");
                (err.to_invocation_result(), Some(err.phase()), 0, 0)
            }
        };

        SyncRun {
            summary: SyncRunSummary {
                run_id,
                strategy,
                source_url,
                store: self.store.describe(),
                started_at,
                finished_at: Utc::now(),
                status_code: result.status_code,
                failed_phase,
                deleted_rows,
                inserted_rows,
            },
            result,
        }
    }

    async fn execute(&self, source_url: &str) -> Result<(ReplaceReport, InvocationResult), SyncError> {
        let strategy = self.extractor.strategy();

        info!(phase = %SyncPhase::Fetching, url = source_url, "fetching upstream");
        let page = self
            .fetcher
            .fetch(source_url, self.extractor.accept())
            .await
            .map_err(|err| SyncError::from_fetch(err, strategy))?;

        info!(phase = %SyncPhase::Parsing, bytes = page.body.len(), "decoding body");
        let decoded = self.extractor.decode(&page.body)?;

        info!(phase = %SyncPhase::Extracting, "extracting rows");
        let rows = self.extractor.extract(decoded)?;

        info!(phase = %SyncPhase::Replacing, rows = rows.len(), "replacing snapshot");
        let report = SnapshotReplacer::new(self.store.as_ref()).replace(rows).await?;

        info!(phase = %SyncPhase::Responding, total = report.inserted.len(), "sync run complete");
        let result = success_result(&report.inserted)?;
        Ok((report, result))
    }

    /// Current snapshot ordered by sequence number.
    pub async fn current_snapshot(&self) -> Result<Vec<SnapshotRow>, StoreError> {
        let mut rows = self.store.scan_all().await?;
        sismo_core::sort_by_sequence(&mut rows);
        Ok(rows)
    }
}

fn success_result(rows: &[SnapshotRow]) -> Result<InvocationResult, SyncError> {
    let body = json!({
        "message": format!("Se insertaron {} registros sísmicos", rows.len()),
        "total": rows.len(),
        "data": serde_json::to_value(rows)?,
    });
    Ok(InvocationResult::json(200, &body))
}

/// Load config from file and env, optionally force a strategy, and run one sync.
pub async fn run_sync_once_from_env(
    strategy: Option<IngestionStrategy>,
) -> anyhow::Result<SyncRun> {
    let mut config = SyncConfig::load()?;
    if let Some(strategy) = strategy {
        config.strategy = strategy;
    }
    let pipeline = SyncPipeline::from_config(config).await?;
    Ok(pipeline.run_once().await)
}
