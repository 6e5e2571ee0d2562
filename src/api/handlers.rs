//! API request handlers: shared state, errors, visitor endpoints

use crate::chat::models::{normalize_chat_path, MessageType, MessageView, Settings, Visitor};
use crate::chat::visitor::{generate_user_id, is_allowed_user_agent};
use crate::chat::{AutoResponder, ChatStore, MessageRelay};
use crate::events::EventBus;
use crate::uploads::{is_valid_blob_name, BlobStore, ChunkAssembler, UploadError};
use crate::AuthConfig;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, FromRequest, Query, State},
    http::{header, Extensions, HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

/// Shared server state
pub struct ServerState {
    pub store: Arc<dyn ChatStore>,
    pub blobs: Arc<BlobStore>,
    pub assembler: Arc<ChunkAssembler>,
    pub relay: MessageRelay,
    pub responder: AutoResponder,
    pub event_bus: Arc<EventBus>,
    pub auth: AuthConfig,
    /// Upload extension allow-list (lower-case, no dot)
    pub allowed_extensions: Arc<HashSet<String>>,
    pub max_content_length: usize,
}

/// Shared chat server state
pub type ChatState = Arc<ServerState>;

impl ServerState {
    /// One settings snapshot for the current request.
    pub async fn settings(&self) -> Result<Settings, AppError> {
        Ok(self.store.get_settings().await?)
    }

    /// Reject visitor requests whose user agent fails the settings policy.
    pub fn check_user_agent(&self, headers: &HeaderMap, settings: &Settings) -> Result<(), AppError> {
        if is_allowed_user_agent(user_agent(headers), settings) {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "Access Denied: Invalid User Agent".to_string(),
            ))
        }
    }
}

pub(crate) fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Client address: nearest `X-Forwarded-For` hop, else the socket peer.
pub(crate) fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

/// JSON body extractor whose rejections use the `AppError` body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// `{"status": "success"}`
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn success() -> Json<Self> {
        Json(Self { status: "success" })
    }
}

// ============================================================================
// Health check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub connections: usize,
    pub transfers_in_flight: usize,
}

pub async fn health(State(state): State<ChatState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: state.event_bus.subscriber_count(),
        transfers_in_flight: state.assembler.registry().len(),
    })
}

// ============================================================================
// Visitor page bootstrap
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct BootstrapQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionEntry {
    pub id: u64,
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BootstrapResponse {
    pub user_id: String,
    pub common_questions: Vec<QuestionEntry>,
    pub allow_images: bool,
    pub allow_videos: bool,
}

/// GET /: visitor page data when the chat is served at the root.
pub async fn visitor_home(
    State(state): State<ChatState>,
    Query(query): Query<BootstrapQuery>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Result<Json<BootstrapResponse>, AppError> {
    bootstrap(&state, "/", query, &headers, &extensions).await
}

/// Fallback for every other GET path: served only when it equals `chat_path`.
pub async fn visitor_page(
    State(state): State<ChatState>,
    uri: Uri,
    Query(query): Query<BootstrapQuery>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Result<Json<BootstrapResponse>, AppError> {
    bootstrap(&state, uri.path(), query, &headers, &extensions).await
}

async fn bootstrap(
    state: &ServerState,
    path: &str,
    query: BootstrapQuery,
    headers: &HeaderMap,
    extensions: &Extensions,
) -> Result<Json<BootstrapResponse>, AppError> {
    let settings = state.settings().await?;
    if !settings.serves_path(path) {
        debug!(path = %normalize_chat_path(path), chat_path = %settings.chat_path, "Not the chat path");
        return Err(AppError::NotFound("Not Found".to_string()));
    }
    state.check_user_agent(headers, &settings)?;

    let known = match query.user_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => state.store.get_visitor(id).await?,
        None => None,
    };

    let visitor = match known {
        Some(visitor) => visitor,
        None => {
            let ua = Some(user_agent(headers).to_string()).filter(|ua| !ua.is_empty());
            let visitor = Visitor::new(generate_user_id(), client_ip(headers, extensions), ua);
            state.store.create_visitor(&visitor).await?;
            seed_welcome_messages(state, &visitor.user_id).await?;
            debug!(user_id = %visitor.user_id, "New visitor");
            visitor
        }
    };

    let common_questions = state
        .store
        .list_common_questions()
        .await?
        .into_iter()
        .map(|q| QuestionEntry {
            id: q.id,
            question: q.question,
            answer: q.content,
        })
        .collect();

    Ok(Json(BootstrapResponse {
        user_id: visitor.user_id,
        common_questions,
        allow_images: settings.allow_user_images,
        allow_videos: settings.allow_user_videos,
    }))
}

/// Copy the welcome messages into a fresh conversation, staff-authored.
async fn seed_welcome_messages(state: &ServerState, user_id: &str) -> Result<(), AppError> {
    for welcome in state.store.list_welcome_messages().await? {
        state
            .store
            .insert_message(crate::chat::NewMessage {
                user_id: user_id.to_string(),
                content: welcome.content,
                message_type: welcome.message_type,
                is_admin: true,
            })
            .await?;
    }
    Ok(())
}

// ============================================================================
// Visitor messages
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub user_id: String,
}

/// POST /get_messages: conversation history.
pub async fn get_messages(
    State(state): State<ChatState>,
    AppJson(req): AppJson<UserRequest>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let messages = state.store.list_messages(&req.user_id).await?;
    Ok(Json(messages.iter().map(MessageView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
}

impl SendMessageRequest {
    /// Non-empty content; media content must name a blob.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.user_id.is_empty() {
            return Err(AppError::BadRequest("user_id is required".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(AppError::BadRequest("content is required".to_string()));
        }
        if self.message_type.is_media() && !is_valid_blob_name(&self.content) {
            return Err(AppError::BadRequest(format!(
                "invalid file name for {} message",
                self.message_type
            )));
        }
        Ok(())
    }
}

/// POST /send_message: visitor-authored message, then auto-reply.
pub async fn send_message(
    State(state): State<ChatState>,
    headers: HeaderMap,
    AppJson(req): AppJson<SendMessageRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    let settings = state.settings().await?;
    state.check_user_agent(&headers, &settings)?;
    req.validate()?;

    if state.store.get_visitor(&req.user_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Visitor not found: {}", req.user_id)));
    }

    state
        .relay
        .publish(&req.user_id, &req.content, req.message_type, false)
        .await?;
    state
        .responder
        .respond(&req.user_id, &req.content, req.message_type)
        .await?;

    Ok(StatusResponse::success())
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    NotFound(String),
    MissingParameter(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    Upload(UploadError),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::MissingParameter(_) => (StatusCode::BAD_REQUEST, "missing_parameter"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Upload(e) => {
                let status = match e {
                    UploadError::MissingParameter(_) | UploadError::InvalidParameter(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    UploadError::NotFound(_) => StatusCode::NOT_FOUND,
                    UploadError::IncompleteTransfer { .. } | UploadError::TransferBusy(_) => {
                        StatusCode::CONFLICT
                    }
                    UploadError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    UploadError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind())
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "{}", e),
            AppError::Upload(e) => write!(f, "{}", e),
            AppError::NotFound(msg)
            | AppError::MissingParameter(msg)
            | AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg) => f.write_str(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, kind) = self.parts();
        let message = match self {
            AppError::Internal(e) => {
                error!("Internal error: {:#}", e);
                e.to_string()
            }
            AppError::Upload(e) => {
                if status.is_server_error() {
                    error!("Upload storage failure: {}", e);
                }
                e.to_string()
            }
            AppError::NotFound(msg)
            | AppError::MissingParameter(msg)
            | AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg) => msg,
        };

        let body = Json(serde_json::json!({
            "status": "error",
            "error": kind,
            "message": message
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let message = rejection.body_text();
        match rejection {
            JsonRejection::JsonDataError(_) if message.contains("missing field") => {
                AppError::MissingParameter(message)
            }
            _ => AppError::BadRequest(message),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        AppError::Upload(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    async fn error_body(err: AppError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_upload_error_status_mapping() {
        let (status, body) = error_body(
            UploadError::IncompleteTransfer {
                received: 1,
                expected: 3,
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "incomplete_transfer");
        assert_eq!(body["message"], "not all chunks uploaded (1/3)");

        let (status, _) = error_body(UploadError::UnsupportedType("a.exe".into()).into()).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let (status, _) = error_body(UploadError::MissingParameter("fileId").into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let io = std::io::Error::other("disk full");
        let (status, body) = error_body(UploadError::StorageFailure(io).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "storage_failure");
    }

    #[tokio::test]
    async fn test_app_error_body() {
        let (status, body) = error_body(AppError::Forbidden("nope".into())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
        assert_eq!(body["message"], "nope");

        let (status, _) = error_body(anyhow::anyhow!("boom").into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_send_message_validation() {
        let ok = SendMessageRequest {
            user_id: "user_a".into(),
            content: "hi".into(),
            message_type: MessageType::Text,
        };
        assert!(ok.validate().is_ok());

        let blank = SendMessageRequest {
            content: "   ".into(),
            ..ok
        };
        assert!(blank.validate().is_err());

        let traversal = SendMessageRequest {
            user_id: "user_a".into(),
            content: "../secret.png".into(),
            message_type: MessageType::Image,
        };
        assert!(traversal.validate().is_err());
    }

    #[test]
    fn test_client_ip_uses_nearest_forwarded_hop() {
        let mut headers = HeaderMap::new();
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(client_ip(&headers, &extensions).as_deref(), Some("127.0.0.1"));

        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(client_ip(&headers, &extensions).as_deref(), Some("198.51.100.7"));

        // Client-supplied entries come first; the proxy appends the real peer
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(client_ip(&headers, &extensions).as_deref(), Some("10.0.0.1"));

        assert_eq!(client_ip(&HeaderMap::new(), &Extensions::new()), None);
    }
}
