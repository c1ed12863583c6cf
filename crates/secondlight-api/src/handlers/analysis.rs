//! The analysis endpoint.

use axum::extract::State;
use axum::Json;
use serde_json::Value as JsonValue;

use secondlight_analysis::{success_body, AnalysisRequest};

use crate::{ApiError, AppState, RequireUser};

/// Analyze a document's extracted text synchronously.
///
/// # Body
/// `{documentId, documentText, documentType, documentTitle}`
///
/// # Returns
/// - 200 OK with `{message, summary, processingTime}`
/// - 400 Bad Request when a field is missing or the text is too short
/// - 404 Not Found when the document does not exist or is not the caller's
/// - 409 Conflict when the document already finished
/// - 500 with `{success: false, error, status}` for any other failure
///
/// No quota check is made here; admission happens at upload.
pub async fn process_document(
    State(state): State<AppState>,
    user: RequireUser,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let outcome = state.pipeline.run(&request, Some(user.user_id)).await?;
    Ok(Json(success_body(&outcome)))
}
