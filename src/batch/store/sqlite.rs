//! SQLite-backed coordinator store: the durable relational substrate.
//!
//! Batched writes (mark_pending, apply_terminal) run inside one
//! transaction so a coordinator restart never observes a half-applied
//! fan-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{CoordinatorStore, HostJobStatus};
use crate::batch::signature::Signature;
use crate::errors::{OrchestratorError, Result};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the store and bootstrap its schema.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| store_err("connect", e))?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await
            .map_err(|e| store_err("pragma", e))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS batch_members (
                task TEXT NOT NULL,
                signature TEXT NOT NULL,
                host TEXT NOT NULL,
                status TEXT NOT NULL,
                job_id TEXT,
                message TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (task, signature, host)
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| store_err("create batch_members", e))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS batch_jobs (
                job_id TEXT PRIMARY KEY,
                last_polled TEXT
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| store_err("create batch_jobs", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_batch_members_job ON batch_members(job_id)")
            .execute(&pool)
            .await
            .map_err(|e| store_err("create index", e))?;

        Ok(SqliteStore { pool })
    }
}

fn store_err(operation: &str, e: sqlx::Error) -> OrchestratorError {
    OrchestratorError::store(operation, e.to_string())
}

fn row_to_status(status: &str, job_id: Option<String>, message: Option<String>) -> HostJobStatus {
    match status {
        "waiting" => HostJobStatus::Waiting,
        "pending" => HostJobStatus::Pending {
            job_id: job_id.unwrap_or_default(),
        },
        "succeeded" => HostJobStatus::Succeeded,
        _ => HostJobStatus::Failed {
            message: message.unwrap_or_default(),
        },
    }
}

fn status_to_row(status: &HostJobStatus) -> (&'static str, Option<&str>, Option<&str>) {
    match status {
        HostJobStatus::Waiting => ("waiting", None, None),
        HostJobStatus::Pending { job_id } => ("pending", Some(job_id.as_str()), None),
        HostJobStatus::Succeeded => ("succeeded", None, None),
        HostJobStatus::Failed { message } => ("failed", None, Some(message.as_str())),
    }
}

#[async_trait]
impl CoordinatorStore for SqliteStore {
    async fn register_waiting(&self, task: &str, signature: &Signature, host: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO batch_members (task, signature, host, status, updated_at)
             VALUES (?, ?, ?, 'waiting', ?)",
        )
        .bind(task)
        .bind(signature.as_str())
        .bind(host)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("register_waiting", e))?;
        Ok(())
    }

    async fn waiting_hosts(&self, task: &str, signature: &Signature) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT host FROM batch_members
             WHERE task = ? AND signature = ? AND status = 'waiting'
             ORDER BY host",
        )
        .bind(task)
        .bind(signature.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("waiting_hosts", e))?;
        Ok(rows.iter().map(|r| r.get::<String, _>("host")).collect())
    }

    async fn mark_pending(&self, task: &str, signature: &Signature, hosts: &[String], job_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| store_err("mark_pending", e))?;
        let now = Utc::now().to_rfc3339();
        for host in hosts {
            sqlx::query(
                "UPDATE batch_members SET status = 'pending', job_id = ?, updated_at = ?
                 WHERE task = ? AND signature = ? AND host = ? AND status = 'waiting'",
            )
            .bind(job_id)
            .bind(&now)
            .bind(task)
            .bind(signature.as_str())
            .bind(host)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("mark_pending", e))?;
        }
        sqlx::query("INSERT OR IGNORE INTO batch_jobs (job_id, last_polled) VALUES (?, NULL)")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("mark_pending", e))?;
        tx.commit().await.map_err(|e| store_err("mark_pending", e))?;
        Ok(())
    }

    async fn host_status(&self, task: &str, signature: &Signature, host: &str) -> Result<Option<HostJobStatus>> {
        let row = sqlx::query(
            "SELECT status, job_id, message FROM batch_members
             WHERE task = ? AND signature = ? AND host = ?",
        )
        .bind(task)
        .bind(signature.as_str())
        .bind(host)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("host_status", e))?;
        Ok(row.map(|r| {
            row_to_status(
                &r.get::<String, _>("status"),
                r.get::<Option<String>, _>("job_id"),
                r.get::<Option<String>, _>("message"),
            )
        }))
    }

    async fn apply_terminal(&self, job_id: &str, statuses: &[(String, HostJobStatus)]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| store_err("apply_terminal", e))?;
        let now = Utc::now().to_rfc3339();
        for (host, status) in statuses {
            let (status_str, _, message) = status_to_row(status);
            sqlx::query(
                "UPDATE batch_members SET status = ?, message = ?, updated_at = ?
                 WHERE job_id = ? AND host = ? AND status = 'pending'",
            )
            .bind(status_str)
            .bind(message)
            .bind(&now)
            .bind(job_id)
            .bind(host)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("apply_terminal", e))?;
        }
        tx.commit().await.map_err(|e| store_err("apply_terminal", e))?;
        Ok(())
    }

    async fn last_polled(&self, job_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT last_polled FROM batch_jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_err("last_polled", e))?;
        let Some(row) = row else { return Ok(None) };
        let Some(raw) = row.get::<Option<String>, _>("last_polled") else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| OrchestratorError::store("last_polled", format!("bad timestamp {raw}: {e}")))?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    async fn touch_last_polled(&self, job_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO batch_jobs (job_id, last_polled) VALUES (?, ?)
             ON CONFLICT(job_id) DO UPDATE SET last_polled = excluded.last_polled",
        )
        .bind(job_id)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("touch_last_polled", e))?;
        Ok(())
    }
}
