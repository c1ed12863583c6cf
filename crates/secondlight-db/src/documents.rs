//! Document repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use secondlight_core::{
    new_v7, CreateDocumentRequest, Document, DocumentRepository, DocumentState, Error, Result,
};

const DOCUMENT_COLUMNS: &str = "id, user_id, title, type, processing_status, summary, \
     error_message, file_paths, date, created_at, updated_at";

/// PostgreSQL implementation of DocumentRepository.
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    /// Create a new PgDocumentRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a document row. `status` is not read: it is derived from
    /// `processing_status`.
    fn parse_document_row(row: sqlx::postgres::PgRow) -> Result<Document> {
        let processing_status: String = row.get("processing_status");
        Ok(Document {
            id: row.get("id"),
            user_id: row.get("user_id"),
            title: row.get("title"),
            doc_type: row.get("type"),
            state: processing_status.parse()?,
            summary: row.get("summary"),
            error_message: row.get("error_message"),
            file_paths: row.get("file_paths"),
            date: row.get("date"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Conditionally move a document to `next`.
    ///
    /// The WHERE clause pins the current state to one of the legal
    /// predecessors so concurrent writers cannot leave a terminal state.
    async fn apply_transition(
        &self,
        id: Uuid,
        next: DocumentState,
        summary: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let predecessors: Vec<String> = next
            .allowed_predecessors()
            .iter()
            .map(|s| s.processing_status().to_string())
            .collect();

        let result = sqlx::query(
            "UPDATE documents
             SET processing_status = $2,
                 status = $3,
                 summary = COALESCE($4, summary),
                 error_message = $5,
                 updated_at = $6
             WHERE id = $1 AND processing_status = ANY($7)",
        )
        .bind(id)
        .bind(next.processing_status())
        .bind(next.display_status())
        .bind(summary)
        .bind(error_message)
        .bind(Utc::now())
        .bind(&predecessors)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 1 {
            debug!(
                subsystem = "db",
                component = "documents",
                document_id = %id,
                state = %next,
                "Document state updated"
            );
            return Ok(());
        }

        let current: Option<String> =
            sqlx::query_scalar("SELECT processing_status FROM documents WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

        match current {
            None => Err(Error::DocumentNotFound(id)),
            Some(current) => {
                let current: DocumentState = current.parse()?;
                current.transition(next).map(|_| ())
            }
        }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn insert(&self, req: CreateDocumentRequest) -> Result<Uuid> {
        let id = new_v7();
        let now = Utc::now();
        let state = DocumentState::Pending;

        sqlx::query(
            "INSERT INTO documents
                (id, user_id, title, type, status, processing_status, summary, file_paths,
                 date, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, '', $7, $8, $8, $8)",
        )
        .bind(id)
        .bind(req.user_id)
        .bind(&req.title)
        .bind(req.kind.as_str())
        .bind(state.display_status())
        .bind(state.processing_status())
        .bind(&req.file_paths)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(id)
    }

    async fn fetch(&self, id: Uuid) -> Result<Document> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::DocumentNotFound(id))?;

        Self::parse_document_row(row)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
            DOCUMENT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_document_row).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        next: DocumentState,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.apply_transition(id, next, None, error_message).await
    }

    async fn complete(&self, id: Uuid, summary: &str) -> Result<()> {
        self.apply_transition(id, DocumentState::Completed, Some(summary), None)
            .await
    }

    async fn count_created_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE user_id = $1 AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(count)
    }
}
