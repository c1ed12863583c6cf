//! Subscription and quota handlers.

use axum::extract::State;
use axum::Json;
use uuid::Uuid;

use secondlight_core::QuotaSummary;

use crate::{ApiError, AppState, RequireUser};

/// Compute the caller's quota.
///
/// Usage counts documents created since the subscription started. Without a
/// subscription row the user is `inactive` with nothing remaining.
pub async fn quota_for(state: &AppState, user_id: Uuid) -> Result<QuotaSummary, ApiError> {
    let subscription = state.subscriptions.fetch_for_user(user_id).await?;
    let used = match &subscription {
        Some(sub) => {
            state
                .documents
                .count_created_since(user_id, sub.subscription_start_date)
                .await?
        }
        None => 0,
    };
    Ok(QuotaSummary::from_usage(
        subscription.as_ref(),
        used,
        state.monthly_allowance,
    ))
}

/// `GET /api/v1/subscription`
pub async fn get_subscription(
    State(state): State<AppState>,
    user: RequireUser,
) -> Result<Json<QuotaSummary>, ApiError> {
    Ok(Json(quota_for(&state, user.user_id).await?))
}
