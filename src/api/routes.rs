//! API route definitions

use super::handlers::{self, ChatState};
use super::{admin_handlers, upload_handlers, ws_handlers};
use crate::auth::middleware::require_admin;
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: ChatState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // ====================================================================
        // Visitor
        // ====================================================================
        .route("/", get(handlers::visitor_home))
        .route("/get_messages", post(handlers::get_messages))
        .route("/send_message", post(handlers::send_message))
        // ====================================================================
        // Visitor uploads
        // ====================================================================
        .route("/upload", post(upload_handlers::upload_file))
        .route("/upload_chunk", post(upload_handlers::upload_chunk))
        .route("/check_upload_status", post(upload_handlers::check_upload_status))
        .route("/merge_chunks", post(upload_handlers::merge_chunks))
        .route("/delete_chunks", post(upload_handlers::delete_chunks))
        .nest_service("/uploads", ServeDir::new(state.blobs.root()))
        // WebSocket
        .route("/ws", get(ws_handlers::ws_chat))
        // ====================================================================
        // Admin console
        // ====================================================================
        .route("/admin/login", post(admin_handlers::login))
        .merge(admin_routes(state.clone()))
        // Custom chat paths are resolved against settings at request time
        .fallback(get(handlers::visitor_page))
        .layer(DefaultBodyLimit::max(state.max_content_length))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Routes that require an admin Bearer token.
fn admin_routes(state: ChatState) -> Router<ChatState> {
    Router::new()
        .route("/admin/change_password", post(admin_handlers::change_password))
        .route("/admin/dashboard", get(admin_handlers::dashboard))
        .route("/admin/chat/{user_id}", get(admin_handlers::conversation))
        .route("/admin/send_message", post(admin_handlers::send_message))
        .route(
            "/admin/auto_replies",
            get(admin_handlers::list_auto_replies).post(admin_handlers::add_auto_reply),
        )
        .route("/admin/auto_replies/{id}", delete(admin_handlers::delete_auto_reply))
        .route(
            "/admin/common_questions",
            get(admin_handlers::list_common_questions).post(admin_handlers::add_common_question),
        )
        .route(
            "/admin/common_questions/{id}",
            delete(admin_handlers::delete_common_question),
        )
        .route(
            "/admin/welcome_messages",
            get(admin_handlers::list_welcome_messages).post(admin_handlers::add_welcome_message),
        )
        .route(
            "/admin/welcome_messages/{id}",
            delete(admin_handlers::delete_welcome_message),
        )
        .route(
            "/admin/settings",
            get(admin_handlers::get_settings).put(admin_handlers::put_settings),
        )
        .route("/admin/update_setting", post(admin_handlers::update_setting))
        .route("/admin/update_user_info", post(admin_handlers::update_user_info))
        .route("/admin/users/{user_id}", delete(admin_handlers::delete_user))
        .route("/admin/upload", post(upload_handlers::admin_upload_file))
        .route("/admin/upload_chunk", post(upload_handlers::admin_upload_chunk))
        .route("/admin/merge_chunks", post(upload_handlers::admin_merge_chunks))
        .route_layer(from_fn_with_state(state, require_admin))
}
