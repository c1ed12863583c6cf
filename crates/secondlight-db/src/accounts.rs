//! Subscription and session lookups.
//!
//! Both tables are written by external collaborators (the billing webhook and
//! the authentication provider); this crate only reads them, plus a session
//! insert used by provisioning scripts and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use secondlight_core::{
    Error, Result, SessionRepository, Subscription, SubscriptionRepository, SubscriptionStatus,
};

/// PostgreSQL implementation of SubscriptionRepository.
#[derive(Clone)]
pub struct PgSubscriptionRepository {
    pool: Pool<Postgres>,
}

impl PgSubscriptionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn fetch_for_user(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        let row = sqlx::query(
            "SELECT user_id, status, subscription_start_date, next_billing_date
             FROM subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| {
            let status: String = row.get("status");
            Subscription {
                user_id: row.get("user_id"),
                status: SubscriptionStatus::parse(&status),
                subscription_start_date: row.get("subscription_start_date"),
                next_billing_date: row.get("next_billing_date"),
            }
        }))
    }
}

/// PostgreSQL implementation of SessionRepository.
///
/// Tokens are never stored in clear; rows are keyed by their SHA-256 hex.
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: Pool<Postgres>,
}

impl PgSessionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Hash a bearer token for storage and lookup.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Register a token for a user.
    pub async fn insert(&self, token: &str, user_id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_sessions (token_hash, user_id, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (token_hash) DO UPDATE SET user_id = $2, expires_at = $3",
        )
        .bind(Self::hash_token(token))
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn resolve_token(&self, token: &str) -> Result<Option<Uuid>> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM user_sessions WHERE token_hash = $1 AND expires_at > $2",
        )
        .bind(Self::hash_token(token))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(user_id)
    }
}
