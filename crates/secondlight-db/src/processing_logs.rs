//! Processing log repository: one append-only row per analysis attempt.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use secondlight_core::{
    new_v7, Error, LogStatus, ProcessingLog, ProcessingLogRepository, Result,
};

/// PostgreSQL implementation of ProcessingLogRepository.
#[derive(Clone)]
pub struct PgProcessingLogRepository {
    pool: Pool<Postgres>,
}

impl PgProcessingLogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_log_row(row: sqlx::postgres::PgRow) -> ProcessingLog {
        let status: String = row.get("status");
        ProcessingLog {
            id: row.get("id"),
            document_id: row.get("document_id"),
            request_payload: row.get("request_payload"),
            response_payload: row.get("response_payload"),
            status: LogStatus::parse(&status),
            error_message: row.get("error_message"),
            processing_time_ms: row.get("processing_time_ms"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

fn finished_once(log_id: Uuid, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        return Err(Error::NotFound(format!("open processing log {}", log_id)));
    }
    Ok(())
}

#[async_trait]
impl ProcessingLogRepository for PgProcessingLogRepository {
    async fn start(&self, document_id: Uuid, request_payload: JsonValue) -> Result<Uuid> {
        let id = new_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO document_processing_logs
                (id, document_id, request_payload, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)",
        )
        .bind(id)
        .bind(document_id)
        .bind(&request_payload)
        .bind(LogStatus::Processing.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }

    async fn complete(
        &self,
        log_id: Uuid,
        response_payload: JsonValue,
        processing_time_ms: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE document_processing_logs
             SET response_payload = $2, status = $3, processing_time_ms = $4,
                 error_message = NULL, updated_at = $5
             WHERE id = $1 AND status = $6",
        )
        .bind(log_id)
        .bind(&response_payload)
        .bind(LogStatus::Completed.as_str())
        .bind(processing_time_ms)
        .bind(Utc::now())
        .bind(LogStatus::Processing.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        finished_once(log_id, result.rows_affected())
    }

    async fn fail(
        &self,
        log_id: Uuid,
        error_message: &str,
        processing_time_ms: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE document_processing_logs
             SET status = $2, error_message = $3, processing_time_ms = $4, updated_at = $5
             WHERE id = $1 AND status = $6",
        )
        .bind(log_id)
        .bind(LogStatus::Error.as_str())
        .bind(error_message)
        .bind(processing_time_ms)
        .bind(Utc::now())
        .bind(LogStatus::Processing.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        finished_once(log_id, result.rows_affected())
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingLog>> {
        let rows = sqlx::query(
            "SELECT id, document_id, request_payload, response_payload, status,
                    error_message, processing_time_ms, created_at, updated_at
             FROM document_processing_logs
             WHERE document_id = $1
             ORDER BY created_at DESC, id DESC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_log_row).collect())
    }
}
