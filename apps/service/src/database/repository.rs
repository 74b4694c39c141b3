use async_trait::async_trait;
use libsql::{Builder, Connection, Database, params};
use thiserror::Error;
use tracing::{error, warn};

use super::migrations;
use super::models::{CHECK_COLUMNS, StoredCheck, timestamp_to_text};
use crate::config::{SinkConfig, SinkTarget};
use crate::monitoring::types::CheckResult;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open database {target}: {source}")]
    Open { target: String, source: libsql::Error },
    #[error("failed to connect to database: {0}")]
    Connect(#[source] libsql::Error),
    #[error("failed to insert check result: {0}")]
    Insert(#[source] libsql::Error),
    #[error("failed to commit check result: {0}")]
    Commit(#[source] libsql::Error),
    #[error("database query failed: {0}")]
    Query(#[source] libsql::Error),
    #[error("no check result with id {0}")]
    NotFound(i64),
    #[error("stored check result is invalid: {0}")]
    InvalidRow(String),
    #[error("schema migration failed: {0}")]
    Migration(String),
}

/// Durable destination for check results
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Append one result and return its row id
    async fn persist(&self, result: &CheckResult) -> Result<i64, SinkError>;
}

/// Best-effort persistence: failures are logged and reported as `false`
pub async fn persist_result(sink: &dyn ResultSink, result: &CheckResult) -> bool {
    match sink.persist(result).await {
        Ok(_) => true,
        Err(e) => {
            error!("Failed to store {} result: {}", result.check_type, e);
            false
        }
    }
}

/// Summary of the storage backend, for diagnostics
#[derive(Debug, Clone)]
pub struct SinkDiagnostics {
    pub engine_version: String,
    pub table_exists: bool,
    /// `(name, declared type)` per column of `network_checks`
    pub columns: Vec<(String, String)>,
    pub row_count: Option<i64>,
}

/// libsql-backed sink. Every operation opens its own connection and drops it
/// when done; nothing is pooled.
pub struct LibsqlSink {
    config: SinkConfig,
}

impl LibsqlSink {
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    async fn connect(&self) -> Result<(Database, Connection), SinkError> {
        let built = match self.config.target() {
            SinkTarget::Local(path) => Builder::new_local(path).build().await,
            SinkTarget::Remote { url, auth_token } => {
                Builder::new_remote(url, auth_token).build().await
            }
        };
        let database =
            built.map_err(|source| SinkError::Open { target: self.config.describe(), source })?;
        let conn = database.connect().map_err(SinkError::Connect)?;
        Ok((database, conn))
    }

    /// Create the schema if needed
    pub async fn initialize(&self) -> Result<(), SinkError> {
        let (_database, conn) = self.connect().await?;
        migrations::run_migrations(&conn)
            .await
            .map_err(|e| SinkError::Migration(format!("{:#}", e)))
    }

    /// Read a stored result back by primary key
    pub async fn fetch(&self, id: i64) -> Result<StoredCheck, SinkError> {
        let (_database, conn) = self.connect().await?;
        let sql = format!("SELECT id, {}, created_at FROM network_checks WHERE id = ?", CHECK_COLUMNS);
        let mut rows = conn.query(&sql, params![id]).await.map_err(SinkError::Query)?;
        let row = rows.next().await.map_err(SinkError::Query)?.ok_or(SinkError::NotFound(id))?;

        StoredCheck::from_row(&row).map_err(|e| SinkError::InvalidRow(format!("{:#}", e)))
    }

    /// Most recently stored result, if any
    pub async fn latest(&self) -> Result<Option<StoredCheck>, SinkError> {
        let id = {
            let (_database, conn) = self.connect().await?;
            let mut rows = conn
                .query("SELECT MAX(id) FROM network_checks", ())
                .await
                .map_err(SinkError::Query)?;
            match rows.next().await.map_err(SinkError::Query)? {
                Some(row) => row.get::<Option<i64>>(0).map_err(SinkError::Query)?,
                None => None,
            }
        };

        match id {
            Some(id) => self.fetch(id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Number of stored results
    pub async fn count(&self) -> Result<i64, SinkError> {
        let (_database, conn) = self.connect().await?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM network_checks", ())
            .await
            .map_err(SinkError::Query)?;
        match rows.next().await.map_err(SinkError::Query)? {
            Some(row) => row.get::<i64>(0).map_err(SinkError::Query),
            None => Ok(0),
        }
    }

    /// Inspect the backend: engine version, table presence, columns
    pub async fn diagnose(&self) -> Result<SinkDiagnostics, SinkError> {
        let (_database, conn) = self.connect().await?;

        let mut rows = conn.query("SELECT sqlite_version()", ()).await.map_err(SinkError::Query)?;
        let engine_version = match rows.next().await.map_err(SinkError::Query)? {
            Some(row) => row.get::<String>(0).map_err(SinkError::Query)?,
            None => "unknown".to_string(),
        };

        let mut rows = conn
            .query("PRAGMA table_info(network_checks)", ())
            .await
            .map_err(SinkError::Query)?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next().await.map_err(SinkError::Query)? {
            let name = row.get::<String>(1).map_err(SinkError::Query)?;
            let declared = row.get::<String>(2).map_err(SinkError::Query)?;
            columns.push((name, declared));
        }

        let table_exists = !columns.is_empty();
        let row_count = if table_exists { Some(self.count().await?) } else { None };

        Ok(SinkDiagnostics { engine_version, table_exists, columns, row_count })
    }
}

#[async_trait]
impl ResultSink for LibsqlSink {
    async fn persist(&self, result: &CheckResult) -> Result<i64, SinkError> {
        let (_database, conn) = self.connect().await?;
        let tx = conn.transaction().await.map_err(SinkError::Connect)?;

        let sql = format!(
            "INSERT INTO network_checks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CHECK_COLUMNS
        );
        let inserted = tx
            .execute(
                &sql,
                params![
                    timestamp_to_text(result.timestamp),
                    result.check_type.as_str(),
                    result.target.clone(),
                    if result.reachable { 1 } else { 0 },
                    result.latency_ms,
                    result.packet_loss,
                    result.download_mbps,
                    result.upload_mbps,
                    result.error_message.clone()
                ],
            )
            .await;

        match inserted {
            Ok(_) => {
                let id = tx.last_insert_rowid();
                tx.commit().await.map_err(SinkError::Commit)?;
                Ok(id)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback after failed insert also failed: {}", rollback_err);
                }
                Err(SinkError::Insert(e))
            }
        }
    }
}
