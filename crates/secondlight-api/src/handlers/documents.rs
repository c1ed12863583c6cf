//! Document upload, read and file handlers.

use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use secondlight_analysis::{detect_file, AnalysisRequest, ExtractionError, FileKind};
use secondlight_core::{
    defaults, new_v7, CreateDocumentRequest, Document, DocumentKind, FindingCategory, KeyFinding,
    Recommendation,
};
use secondlight_db::{storage_path, StorageBackend};

use super::subscription::quota_for;
use crate::{ApiError, AppState, RequireUser};

const DEFAULT_TITLE: &str = "Untitled Document";

// =============================================================================
// RESPONSE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFindingResponse {
    pub id: Uuid,
    pub marker: String,
    pub value: String,
    pub reference_range: Option<String>,
    pub interpretation: Option<String>,
    pub category: FindingCategory,
}

impl From<KeyFinding> for KeyFindingResponse {
    fn from(f: KeyFinding) -> Self {
        Self {
            id: f.id,
            marker: f.marker,
            value: f.value,
            reference_range: f.reference_range,
            interpretation: f.interpretation,
            category: f.category,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResponse {
    pub id: Uuid,
    pub content: String,
}

impl From<Recommendation> for RecommendationResponse {
    fn from(r: Recommendation) -> Self {
        Self {
            id: r.id,
            content: r.content,
        }
    }
}

/// A document as clients see it. Both status strings come from one state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub status: &'static str,
    pub processing_status: &'static str,
    pub summary: String,
    pub error_message: Option<String>,
    pub has_file: bool,
    pub file_count: usize,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_findings: Option<Vec<KeyFindingResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<RecommendationResponse>>,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            status: doc.status(),
            processing_status: doc.processing_status(),
            title: doc.title,
            doc_type: doc.doc_type,
            summary: doc.summary,
            error_message: doc.error_message,
            has_file: !doc.file_paths.is_empty(),
            file_count: doc.file_paths.len(),
            date: doc.date,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            key_findings: None,
            recommendations: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub document_id: Uuid,
    pub status: &'static str,
    pub processing_status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUrlResponse {
    /// The first uploaded file.
    pub url: String,
    /// Every uploaded file, in upload order.
    pub urls: Vec<String>,
    pub expires_in: u64,
}

// =============================================================================
// UPLOAD
// =============================================================================

struct UploadedFile {
    name: String,
    data: Vec<u8>,
}

/// Upload one or more files and start analysis in the background.
///
/// # Multipart Fields
/// - any field carrying a filename: a file to analyze (at least one)
/// - `title`: document title (optional, defaults to the first file name)
/// - `password`: password for a protected PDF (optional)
///
/// # Returns
/// - 202 Accepted with `{documentId, status, processingStatus}`
/// - 400 Bad Request when no file was sent
/// - 401 with code `password_required` / `incorrect_password`
/// - 402 Payment Required when the subscription admits no more uploads
/// - 415 for unsupported file types, 422 for unreadable files
///
/// Nothing is stored when extraction fails.
pub async fn upload_document(
    State(state): State<AppState>,
    user: RequireUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut files: Vec<UploadedFile> = Vec::new();
    let mut title: Option<String> = None;
    let mut password: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let file_name = field.file_name().map(|n| n.to_string());
        let field_name = field.name().map(|n| n.to_string());

        if let Some(name) = file_name {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?
                .to_vec();
            files.push(UploadedFile { name, data });
            continue;
        }

        match field_name.as_deref() {
            Some("title") => {
                let val = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?;
                if !val.trim().is_empty() {
                    title = Some(val.trim().to_string());
                }
            }
            Some("password") => {
                let val = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?;
                if !val.is_empty() {
                    password = Some(val);
                }
            }
            _ => {} // ignore unknown fields
        }
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest(
            "Missing file in multipart form".to_string(),
        ));
    }

    let quota = quota_for(&state, user.user_id).await?;
    if !quota.admits_upload() {
        return Err(ApiError::PaymentRequired(format!(
            "No reports remaining (subscription {})",
            quota.status.as_str()
        )));
    }

    let mut detected = Vec::with_capacity(files.len());
    for file in &files {
        let d = detect_file(&file.data)?;
        debug!(file_name = %file.name, kind = ?d.kind, mime = d.mime_type, size = file.data.len(), "Detected upload");
        detected.push(d);
    }

    let inputs: Vec<(FileKind, &[u8])> = detected
        .iter()
        .zip(&files)
        .map(|(d, f)| (d.kind, f.data.as_slice()))
        .collect();
    let text = state
        .extraction
        .extract_all(&inputs, password.as_deref())
        .await?;
    if text.trim().is_empty() {
        return Err(ExtractionError::Unreadable("no text found in the upload".to_string()).into());
    }

    let mut stored_paths = Vec::with_capacity(files.len());
    for (d, f) in detected.iter().zip(&files) {
        let path = storage_path(user.user_id, new_v7(), d.extension);
        stored_paths.push(state.storage.upload(&path, &f.data).await?);
    }

    let kinds: Vec<DocumentKind> = detected.iter().map(|d| d.kind.document_kind()).collect();
    let kind = DocumentKind::combine(&kinds).unwrap_or(DocumentKind::Mixed);
    let title = title
        .or_else(|| files.first().map(|f| f.name.clone()))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let document_id = state
        .documents
        .insert(CreateDocumentRequest {
            user_id: user.user_id,
            title: title.clone(),
            kind,
            file_paths: stored_paths,
        })
        .await?;

    info!(
        %document_id,
        user_id = %user.user_id,
        doc_type = kind.as_str(),
        file_count = files.len(),
        text_length = text.len(),
        "Document uploaded, analysis started"
    );

    state.pipeline.spawn(
        AnalysisRequest::new(document_id, text, kind.as_str(), title),
        Some(user.user_id),
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            document_id,
            status: secondlight_core::DocumentState::Pending.display_status(),
            processing_status: secondlight_core::DocumentState::Pending.processing_status(),
        }),
    ))
}

// =============================================================================
// READS
// =============================================================================

/// Fetch a document the caller owns. Other users' documents read as missing.
async fn owned_document(state: &AppState, id: Uuid, user_id: Uuid) -> Result<Document, ApiError> {
    let doc = state.documents.fetch(id).await?;
    if doc.user_id != user_id {
        return Err(ApiError::NotFound(format!("Document not found: {}", id)));
    }
    Ok(doc)
}

/// `GET /api/v1/documents`: the caller's documents, newest first.
pub async fn list_documents(
    State(state): State<AppState>,
    user: RequireUser,
) -> Result<Json<Vec<DocumentResponse>>, ApiError> {
    let docs = state.documents.list_for_user(user.user_id).await?;
    Ok(Json(docs.into_iter().map(DocumentResponse::from).collect()))
}

/// `GET /api/v1/documents/:id` with findings and recommendations.
pub async fn get_document(
    State(state): State<AppState>,
    user: RequireUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let doc = owned_document(&state, id, user.user_id).await?;
    let findings = state.key_findings.list_for_document(id).await?;
    let recommendations = state.recommendations.list_for_document(id).await?;

    let mut response = DocumentResponse::from(doc);
    response.key_findings = Some(findings.into_iter().map(Into::into).collect());
    response.recommendations = Some(recommendations.into_iter().map(Into::into).collect());
    Ok(Json(response))
}

/// `GET /api/v1/documents/:id/file`: expiring URLs for the stored files.
pub async fn get_document_file_url(
    State(state): State<AppState>,
    user: RequireUser,
    Path(id): Path<Uuid>,
) -> Result<Json<FileUrlResponse>, ApiError> {
    let doc = owned_document(&state, id, user.user_id).await?;
    if doc.file_paths.is_empty() {
        return Err(ApiError::NotFound(format!("Document {} has no stored file", id)));
    }

    let ttl = Duration::from_secs(defaults::SIGNED_URL_TTL_SECS);
    let urls = doc
        .file_paths
        .iter()
        .map(|path| state.storage.signed_url(path, ttl))
        .collect::<secondlight_core::Result<Vec<_>>>()?;
    Ok(Json(FileUrlResponse {
        url: urls[0].clone(),
        urls,
        expires_in: defaults::SIGNED_URL_TTL_SECS,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SignedFileQuery {
    pub expires: i64,
    pub signature: String,
}

/// `GET /files/*path`: serve a stored file when the signature checks out.
pub async fn serve_signed_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedFileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let path = path.trim_start_matches('/');
    let now = Utc::now().timestamp();
    if !state
        .storage
        .verify_signed_url(path, query.expires, &query.signature, now)
    {
        warn!(storage_path = %path, "Rejected file request with bad or expired signature");
        return Err(ApiError::Forbidden(
            "Invalid or expired signature".to_string(),
        ));
    }

    let data = state.storage.download(path).await?;
    let content_type = infer::get(&data)
        .map(|t| t.mime_type())
        .unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, content_type)], data))
}
