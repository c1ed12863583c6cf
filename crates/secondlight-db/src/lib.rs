//! # secondlight-db
//!
//! PostgreSQL database and file storage layer for Second Light.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for documents, findings, recommendations,
//!   processing logs, subscriptions and sessions
//! - The filesystem storage backend with signed URLs
//!
//! ## Example
//!
//! ```rust,ignore
//! use secondlight_db::{CreateDocumentRequest, Database, DocumentKind, DocumentRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/secondlight").await?;
//!
//!     let id = db.documents.insert(CreateDocumentRequest {
//!         user_id,
//!         title: "Bloodwork March".to_string(),
//!         kind: DocumentKind::Pdf,
//!         file_paths: Vec::new(),
//!     }).await?;
//!
//!     println!("Created document: {}", id);
//!     Ok(())
//! }
//! ```
pub mod accounts;
pub mod documents;
pub mod file_storage;
pub mod findings;
pub mod pool;
pub mod processing_logs;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use secondlight_core::*;

pub use accounts::{PgSessionRepository, PgSubscriptionRepository};
pub use documents::PgDocumentRepository;
pub use file_storage::{storage_path, validate_object_path, FilesystemBackend, StorageBackend};
pub use findings::{PgKeyFindingRepository, PgRecommendationRepository};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use processing_logs::PgProcessingLogRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Document rows and their state machine.
    pub documents: PgDocumentRepository,
    /// Key findings extracted by analysis.
    pub key_findings: PgKeyFindingRepository,
    /// Recommendations extracted by analysis.
    pub recommendations: PgRecommendationRepository,
    /// One row per analysis attempt.
    pub processing_logs: PgProcessingLogRepository,
    pub subscriptions: PgSubscriptionRepository,
    pub sessions: PgSessionRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            documents: PgDocumentRepository::new(pool.clone()),
            key_findings: PgKeyFindingRepository::new(pool.clone()),
            recommendations: PgRecommendationRepository::new(pool.clone()),
            processing_logs: PgProcessingLogRepository::new(pool.clone()),
            subscriptions: PgSubscriptionRepository::new(pool.clone()),
            sessions: PgSessionRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
