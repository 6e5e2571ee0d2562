//! Admin console handlers.
//!
//! Everything except `POST /admin/login` sits behind the Bearer-token middleware.

use super::handlers::{AppError, AppJson, ChatState, SendMessageRequest, StatusResponse};
use crate::auth::jwt::{encode_jwt, Claims};
use crate::auth::password::{hash_password, verify_password};
use crate::chat::models::{format_timestamp, normalize_chat_path, MessageType, MessageView, Settings};
use crate::chat::visitor::detect_device_type;
use crate::chat::{AdminAccount, AutoReply, CommonQuestion, WelcomeMessage};
use crate::uploads::{is_valid_blob_name, UploadPolicy};
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Authentication
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: u64,
}

/// POST /admin/login: exchange credentials for a JWT.
///
/// The error never says whether the username exists.
pub async fn login(
    State(state): State<ChatState>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let invalid_credentials = || AppError::Unauthorized("Invalid username or password".to_string());

    let admin = state
        .store
        .get_admin(&req.username)
        .await?
        .ok_or_else(invalid_credentials)?;
    if !verify_password(&req.password, &admin.password_hash) {
        warn!(username = %req.username, "Failed admin login");
        return Err(invalid_credentials());
    }

    let token = encode_jwt(&admin.username, &state.auth.jwt_secret, state.auth.jwt_expiry_secs)
        .map_err(AppError::Internal)?;
    info!(username = %admin.username, "Admin logged in");

    Ok(Json(LoginResponse {
        token,
        expires_in: state.auth.jwt_expiry_secs,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// POST /admin/change_password
pub async fn change_password(
    State(state): State<ChatState>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<ChangePasswordRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    let admin = state
        .store
        .get_admin(&claims.sub)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Admin not found: {}", claims.sub)))?;

    if !verify_password(&req.current_password, &admin.password_hash) {
        return Err(AppError::Unauthorized("Current password is incorrect".to_string()));
    }
    if req.new_password.is_empty() {
        return Err(AppError::BadRequest("New password must not be empty".to_string()));
    }
    if req.new_password != req.confirm_password {
        return Err(AppError::BadRequest(
            "New password and confirmation do not match".to_string(),
        ));
    }

    let password_hash = hash_password(&req.new_password, state.auth.bcrypt_cost)?;
    state
        .store
        .put_admin(AdminAccount {
            username: admin.username,
            password_hash,
        })
        .await?;
    info!(username = %claims.sub, "Admin password changed");

    Ok(StatusResponse::success())
}

// ============================================================================
// Dashboard and conversations
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct VisitorSummary {
    pub user_id: String,
    pub alias: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: String,
    pub remark: String,
    pub created_at: String,
    pub latest_message_time: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardEntry {
    pub user: VisitorSummary,
    pub unread_count: usize,
}

/// GET /admin/dashboard: every visitor, most recent activity first.
pub async fn dashboard(State(state): State<ChatState>) -> Result<Json<Vec<DashboardEntry>>, AppError> {
    let mut rows = Vec::new();
    for visitor in state.store.list_visitors().await? {
        let unread_count = state.store.unread_count(&visitor.user_id).await?;
        let latest = state
            .store
            .latest_message_time(&visitor.user_id)
            .await?
            .unwrap_or(visitor.created_at);
        rows.push((latest, unread_count, visitor));
    }
    rows.sort_by(|a, b| b.0.cmp(&a.0));

    let entries = rows
        .into_iter()
        .map(|(latest, unread_count, v)| DashboardEntry {
            user: VisitorSummary {
                device_type: detect_device_type(v.user_agent.as_deref()).to_string(),
                created_at: format_timestamp(&v.created_at),
                latest_message_time: format_timestamp(&latest),
                user_id: v.user_id,
                alias: v.alias,
                ip_address: v.ip_address,
                user_agent: v.user_agent,
                remark: v.remark,
            },
            unread_count,
        })
        .collect();

    Ok(Json(entries))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub user_id: String,
    pub messages: Vec<MessageView>,
}

/// GET /admin/chat/{user_id}: history; the visitor's messages become read.
pub async fn conversation(
    State(state): State<ChatState>,
    Path(user_id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let messages = state.store.list_messages(&user_id).await?;
    state.store.mark_visitor_messages_read(&user_id).await?;
    Ok(Json(ConversationResponse {
        messages: messages.iter().map(MessageView::from).collect(),
        user_id,
    }))
}

/// POST /admin/send_message: staff-authored message.
pub async fn send_message(
    State(state): State<ChatState>,
    AppJson(req): AppJson<SendMessageRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    req.validate()?;
    if state.store.get_visitor(&req.user_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Visitor not found: {}", req.user_id)));
    }
    state
        .relay
        .publish(&req.user_id, &req.content, req.message_type, true)
        .await?;
    Ok(StatusResponse::success())
}

// ============================================================================
// Canned replies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AutoReplyRequest {
    pub keyword: String,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub order_index: i32,
}

/// GET /admin/auto_replies
pub async fn list_auto_replies(State(state): State<ChatState>) -> Result<Json<Vec<AutoReply>>, AppError> {
    Ok(Json(state.store.list_auto_replies().await?))
}

/// POST /admin/auto_replies
pub async fn add_auto_reply(
    State(state): State<ChatState>,
    AppJson(req): AppJson<AutoReplyRequest>,
) -> Result<Json<AutoReply>, AppError> {
    if req.keyword.is_empty() || req.content.is_empty() {
        return Err(AppError::BadRequest("keyword and content are required".to_string()));
    }
    let reply = state
        .store
        .add_auto_reply(&req.keyword, &req.content, req.message_type, req.order_index)
        .await?;
    Ok(Json(reply))
}

/// DELETE /admin/auto_replies/{id}
pub async fn delete_auto_reply(
    State(state): State<ChatState>,
    Path(id): Path<u64>,
) -> Result<Json<StatusResponse>, AppError> {
    if !state.store.delete_auto_reply(id).await? {
        return Err(AppError::NotFound(format!("Auto-reply not found: {}", id)));
    }
    Ok(StatusResponse::success())
}

#[derive(Debug, Deserialize)]
pub struct CommonQuestionRequest {
    pub question: String,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub order_index: i32,
}

/// GET /admin/common_questions
pub async fn list_common_questions(
    State(state): State<ChatState>,
) -> Result<Json<Vec<CommonQuestion>>, AppError> {
    Ok(Json(state.store.list_common_questions().await?))
}

/// POST /admin/common_questions
pub async fn add_common_question(
    State(state): State<ChatState>,
    AppJson(req): AppJson<CommonQuestionRequest>,
) -> Result<Json<CommonQuestion>, AppError> {
    if req.question.is_empty() || req.content.is_empty() {
        return Err(AppError::BadRequest("question and content are required".to_string()));
    }
    let entry = state
        .store
        .add_common_question(&req.question, &req.content, req.message_type, req.order_index)
        .await?;
    Ok(Json(entry))
}

/// DELETE /admin/common_questions/{id}
pub async fn delete_common_question(
    State(state): State<ChatState>,
    Path(id): Path<u64>,
) -> Result<Json<StatusResponse>, AppError> {
    if !state.store.delete_common_question(id).await? {
        return Err(AppError::NotFound(format!("Common question not found: {}", id)));
    }
    Ok(StatusResponse::success())
}

// ============================================================================
// Welcome messages
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WelcomeMessageRequest {
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub content: Option<String>,
    /// Blob name returned by an admin upload, for image/video greetings
    #[serde(default)]
    pub uploaded_filename: Option<String>,
    #[serde(default)]
    pub order_index: i32,
}

/// GET /admin/welcome_messages
pub async fn list_welcome_messages(
    State(state): State<ChatState>,
) -> Result<Json<Vec<WelcomeMessage>>, AppError> {
    Ok(Json(state.store.list_welcome_messages().await?))
}

/// POST /admin/welcome_messages
pub async fn add_welcome_message(
    State(state): State<ChatState>,
    AppJson(req): AppJson<WelcomeMessageRequest>,
) -> Result<Json<WelcomeMessage>, AppError> {
    let content = if req.message_type.is_media() {
        let policy = UploadPolicy::unrestricted(state.allowed_extensions.clone());
        req.uploaded_filename
            .filter(|name| is_valid_blob_name(name) && policy.is_allowed_name(name))
            .ok_or_else(|| {
                AppError::BadRequest("uploaded_filename must name an uploaded file".to_string())
            })?
    } else {
        req.content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("content is required".to_string()))?
    };

    let entry = state
        .store
        .add_welcome_message(&content, req.message_type, req.order_index)
        .await?;
    Ok(Json(entry))
}

/// DELETE /admin/welcome_messages/{id}: media greetings also lose their file.
pub async fn delete_welcome_message(
    State(state): State<ChatState>,
    Path(id): Path<u64>,
) -> Result<Json<StatusResponse>, AppError> {
    let removed = state
        .store
        .delete_welcome_message(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Welcome message not found: {}", id)))?;

    if removed.message_type.is_media() {
        match state.blobs.delete(&removed.content).await {
            Ok(true) => {}
            Ok(false) => warn!(blob = %removed.content, "Welcome message file already gone"),
            Err(e) => warn!(blob = %removed.content, "Failed to delete welcome message file: {}", e),
        }
    }
    Ok(StatusResponse::success())
}

// ============================================================================
// Settings
// ============================================================================

/// GET /admin/settings
pub async fn get_settings(State(state): State<ChatState>) -> Result<Json<Settings>, AppError> {
    Ok(Json(state.settings().await?))
}

/// PUT /admin/settings: replace the whole snapshot.
pub async fn put_settings(
    State(state): State<ChatState>,
    AppJson(mut settings): AppJson<Settings>,
) -> Result<Json<Settings>, AppError> {
    settings.chat_path = normalize_chat_path(&settings.chat_path);
    state.store.put_settings(settings.clone()).await?;
    info!(chat_path = %settings.chat_path, "Settings replaced");
    Ok(Json(settings))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub key: String,
    pub value: String,
}

/// POST /admin/update_setting: change one existing key.
pub async fn update_setting(
    State(state): State<ChatState>,
    AppJson(req): AppJson<UpdateSettingRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    if !state.store.update_setting(&req.key, &req.value).await? {
        return Err(AppError::NotFound(format!("Setting not found: {}", req.key)));
    }
    info!(key = %req.key, "Setting updated");
    Ok(StatusResponse::success())
}

// ============================================================================
// Visitors
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateUserInfoRequest {
    pub user_id: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub remark: String,
}

/// POST /admin/update_user_info
pub async fn update_user_info(
    State(state): State<ChatState>,
    AppJson(req): AppJson<UpdateUserInfoRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    if !state
        .store
        .update_visitor_info(&req.user_id, &req.alias, &req.remark)
        .await?
    {
        return Err(AppError::NotFound(format!("Visitor not found: {}", req.user_id)));
    }
    Ok(StatusResponse::success())
}

/// DELETE /admin/users/{user_id}: visitor and their whole conversation.
pub async fn delete_user(
    State(state): State<ChatState>,
    Path(user_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    if !state.store.delete_visitor(&user_id).await? {
        return Err(AppError::NotFound(format!("Visitor not found: {}", user_id)));
    }
    info!(user_id = %user_id, "Visitor deleted");
    Ok(StatusResponse::success())
}
