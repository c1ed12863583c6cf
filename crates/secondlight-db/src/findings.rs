//! Key finding and recommendation repositories.
//!
//! Both tables are owned by their document and written once, during a
//! successful analysis. Inserts for one document happen in a single
//! transaction so a document never shows a half-written list.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use secondlight_core::{
    new_v7, Error, FindingCategory, KeyFinding, KeyFindingRepository, NewKeyFinding,
    Recommendation, RecommendationRepository, Result,
};

/// PostgreSQL implementation of KeyFindingRepository.
#[derive(Clone)]
pub struct PgKeyFindingRepository {
    pool: Pool<Postgres>,
}

impl PgKeyFindingRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyFindingRepository for PgKeyFindingRepository {
    async fn insert_many(&self, document_id: Uuid, findings: &[NewKeyFinding]) -> Result<()> {
        if findings.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for (position, finding) in findings.iter().enumerate() {
            sqlx::query(
                "INSERT INTO key_findings
                    (id, document_id, marker, value, reference_range, interpretation,
                     category, position, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(new_v7())
            .bind(document_id)
            .bind(&finding.marker)
            .bind(&finding.value)
            .bind(&finding.reference_range)
            .bind(&finding.interpretation)
            .bind(finding.category.as_str())
            .bind(position as i32)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<KeyFinding>> {
        let rows = sqlx::query(
            "SELECT id, document_id, marker, value, reference_range, interpretation,
                    category, created_at
             FROM key_findings
             WHERE document_id = $1
             ORDER BY position, created_at",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let category: String = row.get("category");
                KeyFinding {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    marker: row.get("marker"),
                    value: row.get("value"),
                    reference_range: row.get("reference_range"),
                    interpretation: row.get("interpretation"),
                    category: FindingCategory::from_label(&category),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }
}

/// PostgreSQL implementation of RecommendationRepository.
#[derive(Clone)]
pub struct PgRecommendationRepository {
    pool: Pool<Postgres>,
}

impl PgRecommendationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecommendationRepository for PgRecommendationRepository {
    async fn insert_many(&self, document_id: Uuid, contents: &[String]) -> Result<()> {
        if contents.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for (position, content) in contents.iter().enumerate() {
            sqlx::query(
                "INSERT INTO recommendations (id, document_id, content, position, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(new_v7())
            .bind(document_id)
            .bind(content)
            .bind(position as i32)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Recommendation>> {
        let rows = sqlx::query(
            "SELECT id, document_id, content, created_at
             FROM recommendations
             WHERE document_id = $1
             ORDER BY position, created_at",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| Recommendation {
                id: row.get("id"),
                document_id: row.get("document_id"),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
