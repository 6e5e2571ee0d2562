//! Upload endpoints: single-shot files and chunked transfers.
//!
//! Visitor routes are bound by the settings snapshot (user-agent filter and
//! image/video toggles). Admin routes only apply the extension allow-list.

use super::handlers::{AppError, AppJson, ChatState, ServerState, StatusResponse};
use crate::uploads::{
    MediaKind, MergeRequest, PartUpload, TransferMetadata, TransferProgress, UploadError,
    UploadPolicy,
};
use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Multipart form parsing
// ============================================================================

/// A parsed multipart body: the `file` part plus every text field.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file_name: Option<String>,
    pub file: Option<Bytes>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(format!("Malformed multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                form.file_name = field.file_name().map(|s| s.to_string());
                form.file = Some(field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read file part: {}", e))
                })?);
            } else {
                let value = field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read field {}: {}", name, e))
                })?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    fn file(&self) -> Result<&Bytes, UploadError> {
        self.file
            .as_ref()
            .ok_or(UploadError::MissingParameter("file"))
    }

    fn text(&self, key: &'static str) -> Result<&str, UploadError> {
        self.fields
            .get(key)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(UploadError::MissingParameter(key))
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.fields.get(key).filter(|s| !s.is_empty()).cloned()
    }

    fn number(&self, key: &'static str) -> Result<u32, UploadError> {
        let raw = self.text(key)?;
        raw.trim()
            .parse()
            .map_err(|_| UploadError::InvalidParameter(format!("{} is not a number: {}", key, raw)))
    }

    /// Interpret the form as one part of a chunked transfer.
    pub fn into_part(self) -> Result<(PartUpload, Bytes), UploadError> {
        let part = PartUpload {
            transfer_id: self.text("fileId")?.to_string(),
            part_index: self.number("chunkIndex")?,
            total_parts: self.number("totalChunks")?,
            filename: self.text("fileName")?.to_string(),
            size_hint: self.optional("fileSize"),
            mime_hint: self.optional("fileType"),
        };
        let bytes = self.file()?.clone();
        Ok((part, bytes))
    }
}

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: String,
    pub filename: String,
    pub message_type: MediaKind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub status: String,
    pub chunk_index: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    #[serde(default)]
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeChunksRequest {
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub total_chunks: u32,
    #[serde(default)]
    pub file_name: String,
    pub file_type: Option<String>,
}

impl From<MergeChunksRequest> for MergeRequest {
    fn from(req: MergeChunksRequest) -> Self {
        MergeRequest {
            transfer_id: req.file_id,
            total_parts: req.total_chunks,
            filename: req.file_name,
            mime_type: req.file_type,
        }
    }
}

/// Body of `/check_upload_status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub status: String,
    #[serde(flatten)]
    pub metadata: Option<TransferMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_chunks: Option<u32>,
}

impl From<TransferProgress> for UploadStatusResponse {
    fn from(progress: TransferProgress) -> Self {
        match progress {
            TransferProgress::NotFound => Self {
                status: "not_found".into(),
                metadata: None,
                uploaded_chunks: Some(0),
            },
            TransferProgress::Recorded(metadata) => Self {
                status: "success".into(),
                metadata: Some(metadata),
                uploaded_chunks: None,
            },
            TransferProgress::Counted { uploaded_chunks } => Self {
                status: "success".into(),
                metadata: None,
                uploaded_chunks: Some(uploaded_chunks),
            },
        }
    }
}

// ============================================================================
// Shared operations
// ============================================================================

async fn store_single(
    state: &ServerState,
    form: UploadForm,
    policy: &UploadPolicy,
) -> Result<Json<StoredResponse>, AppError> {
    let data = form.file()?;
    let name = form.file_name.clone().unwrap_or_default();
    let blob = state.blobs.store_upload(&name, data, policy).await?;
    Ok(Json(StoredResponse {
        status: "success".into(),
        filename: blob.filename,
        message_type: blob.message_type,
    }))
}

async fn store_chunk(state: &ServerState, form: UploadForm) -> Result<Json<ChunkResponse>, AppError> {
    let (part, bytes) = form.into_part()?;
    let chunk_index = state.assembler.receive_part(part, &bytes).await?;
    Ok(Json(ChunkResponse {
        status: "success".into(),
        chunk_index,
    }))
}

async fn merge(
    state: &ServerState,
    req: MergeChunksRequest,
    policy: &UploadPolicy,
) -> Result<Json<StoredResponse>, AppError> {
    let blob = state.assembler.merge(req.into(), policy).await?;
    Ok(Json(StoredResponse {
        status: "success".into(),
        filename: blob.filename,
        message_type: blob.message_type,
    }))
}

async fn visitor_policy(state: &ServerState, headers: &HeaderMap) -> Result<UploadPolicy, AppError> {
    let settings = state.settings().await?;
    state.check_user_agent(headers, &settings)?;
    Ok(settings.visitor_upload_policy(state.allowed_extensions.clone()))
}

// ============================================================================
// Visitor endpoints
// ============================================================================

/// POST /upload
pub async fn upload_file(
    State(state): State<ChatState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<StoredResponse>, AppError> {
    let policy = visitor_policy(&state, &headers).await?;
    let form = UploadForm::read(multipart).await?;
    store_single(&state, form, &policy).await
}

/// POST /upload_chunk
pub async fn upload_chunk(
    State(state): State<ChatState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<ChunkResponse>, AppError> {
    visitor_policy(&state, &headers).await?;
    let form = UploadForm::read(multipart).await?;
    store_chunk(&state, form).await
}

/// POST /check_upload_status
pub async fn check_upload_status(
    State(state): State<ChatState>,
    headers: HeaderMap,
    AppJson(req): AppJson<TransferRequest>,
) -> Result<Json<UploadStatusResponse>, AppError> {
    visitor_policy(&state, &headers).await?;
    let progress = state.assembler.status(&req.file_id).await?;
    Ok(Json(progress.into()))
}

/// POST /merge_chunks
pub async fn merge_chunks(
    State(state): State<ChatState>,
    headers: HeaderMap,
    AppJson(req): AppJson<MergeChunksRequest>,
) -> Result<Json<StoredResponse>, AppError> {
    let policy = visitor_policy(&state, &headers).await?;
    merge(&state, req, &policy).await
}

/// POST /delete_chunks
pub async fn delete_chunks(
    State(state): State<ChatState>,
    headers: HeaderMap,
    AppJson(req): AppJson<TransferRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    visitor_policy(&state, &headers).await?;
    state.assembler.cancel(&req.file_id).await?;
    Ok(StatusResponse::success())
}

// ============================================================================
// Admin endpoints
// ============================================================================

fn admin_policy(state: &ServerState) -> UploadPolicy {
    UploadPolicy::unrestricted(state.allowed_extensions.clone())
}

/// POST /admin/upload
pub async fn admin_upload_file(
    State(state): State<ChatState>,
    multipart: Multipart,
) -> Result<Json<StoredResponse>, AppError> {
    let form = UploadForm::read(multipart).await?;
    store_single(&state, form, &admin_policy(&state)).await
}

/// POST /admin/upload_chunk
pub async fn admin_upload_chunk(
    State(state): State<ChatState>,
    multipart: Multipart,
) -> Result<Json<ChunkResponse>, AppError> {
    let form = UploadForm::read(multipart).await?;
    store_chunk(&state, form).await
}

/// POST /admin/merge_chunks
pub async fn admin_merge_chunks(
    State(state): State<ChatState>,
    AppJson(req): AppJson<MergeChunksRequest>,
) -> Result<Json<StoredResponse>, AppError> {
    merge(&state, req, &admin_policy(&state)).await
}
