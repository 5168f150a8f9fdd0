use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sismo_core::SnapshotRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt table file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding table file {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid table name `{0}`")]
    InvalidTableName(String),
    #[error("{0}")]
    Message(String),
}

/// Opaque key-value table keyed by `record_id`.
///
/// Deleting a key that is not present is a no-op. Scan order is unspecified.
#[async_trait]
pub trait TableStore: Send + Sync {
    fn describe(&self) -> String;

    async fn ensure_table(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn scan_all(&self) -> Result<Vec<SnapshotRow>, StoreError>;

    async fn delete(&self, record_id: &str) -> Result<(), StoreError>;

    /// Delete every key in `record_ids`. Not atomic: a failure may leave some deleted.
    async fn delete_batch(&self, record_ids: &[String]) -> Result<usize, StoreError> {
        for record_id in record_ids {
            self.delete(record_id).await?;
        }
        Ok(record_ids.len())
    }

    async fn put(&self, row: &SnapshotRow) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryTableStore {
    rows: Mutex<BTreeMap<String, SnapshotRow>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn scan_all(&self) -> Result<Vec<SnapshotRow>, StoreError> {
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn delete(&self, record_id: &str) -> Result<(), StoreError> {
        self.rows.lock().await.remove(record_id);
        Ok(())
    }

    async fn put(&self, row: &SnapshotRow) -> Result<(), StoreError> {
        self.rows
            .lock()
            .await
            .insert(row.record_id.clone(), row.clone());
        Ok(())
    }
}

/// Table persisted as one JSON object (`record_id -> row`), rewritten atomically.
#[derive(Debug)]
pub struct FileTableStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, SnapshotRow>, StoreError> {
        let exists = fs::try_exists(&self.path)
            .await
            .map_err(|e| Self::io_err(&self.path, e))?;
        if !exists {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|e| Self::io_err(&self.path, e))?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn create_parent(&self) -> Result<PathBuf, StoreError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| Self::io_err(&parent, e))?;
        Ok(parent)
    }

    /// Write through a temp file in the same directory, then rename over the table.
    async fn store(&self, rows: &BTreeMap<String, SnapshotRow>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(rows).map_err(|source| StoreError::Encode {
            path: self.path.clone(),
            source,
        })?;
        let parent = self.create_parent().await?;
        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|e| Self::io_err(&temp_path, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| Self::io_err(&temp_path, e))?;
        file.flush()
            .await
            .map_err(|e| Self::io_err(&temp_path, e))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Self::io_err(&self.path, err));
        }
        debug!(path = %self.path.display(), rows = rows.len(), "table file written");
        Ok(())
    }
}

#[async_trait]
impl TableStore for FileTableStore {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn ensure_table(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.create_parent().await?;
        let rows = self.load().await?;
        self.store(&rows).await
    }

    async fn scan_all(&self) -> Result<Vec<SnapshotRow>, StoreError> {
        Ok(self.load().await?.into_values().collect())
    }

    async fn delete(&self, record_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.load().await?;
        if rows.remove(record_id).is_some() {
            self.store(&rows).await?;
        }
        Ok(())
    }

    async fn delete_batch(&self, record_ids: &[String]) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.load().await?;
        let removed = record_ids
            .iter()
            .filter(|id| rows.remove(id.as_str()).is_some())
            .count();
        if removed > 0 {
            self.store(&rows).await?;
        }
        Ok(removed)
    }

    async fn put(&self, row: &SnapshotRow) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.load().await?;
        rows.insert(row.record_id.clone(), row.clone());
        self.store(&rows).await
    }
}

/// Postgres-backed table: `(id TEXT PRIMARY KEY, item JSONB, written_at TIMESTAMPTZ)`.
#[derive(Debug, Clone)]
pub struct PgTableStore {
    pool: PgPool,
    table: String,
}

pub fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(name.to_string()))
    }
}

impl PgTableStore {
    pub async fn connect(database_url: &str, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Self::with_pool(pool, table)
    }

    pub fn with_pool(pool: PgPool, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                item JSONB NOT NULL,
                written_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.table
        )
    }

    fn select_sql(&self) -> String {
        format!("SELECT item FROM {}", self.table)
    }

    fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE id = $1", self.table)
    }

    fn delete_batch_sql(&self) -> String {
        format!("DELETE FROM {} WHERE id = ANY($1)", self.table)
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (id, item) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET item = EXCLUDED.item, written_at = now()",
            self.table
        )
    }
}

#[async_trait]
impl TableStore for PgTableStore {
    fn describe(&self) -> String {
        format!("postgres:{}", self.table)
    }

    async fn ensure_table(&self) -> Result<(), StoreError> {
        sqlx::query(&self.create_table_sql())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_all(&self) -> Result<Vec<SnapshotRow>, StoreError> {
        let rows = sqlx::query(&self.select_sql())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<Json<SnapshotRow>, _>("item")
                    .map(|item| item.0)
                    .map_err(StoreError::from)
            })
            .collect()
    }

    async fn delete(&self, record_id: &str) -> Result<(), StoreError> {
        sqlx::query(&self.delete_sql())
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_batch(&self, record_ids: &[String]) -> Result<usize, StoreError> {
        if record_ids.is_empty() {
            return Ok(0);
        }
        let done = sqlx::query(&self.delete_batch_sql())
            .bind(record_ids)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() as usize)
    }

    async fn put(&self, row: &SnapshotRow) -> Result<(), StoreError> {
        sqlx::query(&self.upsert_sql())
            .bind(&row.record_id)
            .bind(Json(row))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Open the store named by `store_url`.
///
/// `memory:` gives an in-process table, `postgres://`/`postgresql://` a Postgres
/// table named `table`, anything else is a file path (`<dir>/<table>.json` when it
/// does not end in `.json`).
pub async fn open_table_store(
    store_url: &str,
    table: &str,
) -> Result<Arc<dyn TableStore>, StoreError> {
    let url = store_url.trim();
    if url == "memory:" || url == "memory" {
        return Ok(Arc::new(MemoryTableStore::new()));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        return Ok(Arc::new(PgTableStore::connect(url, table).await?));
    }
    validate_table_name(table)?;
    let path = PathBuf::from(url);
    let path = if path.extension().is_some_and(|ext| ext == "json") {
        path
    } else {
        path.join(format!("{table}.json"))
    };
    Ok(Arc::new(FileTableStore::new(path)))
}
