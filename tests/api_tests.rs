//! API integration tests
//!
//! Drive the full router in-process with `tower::ServiceExt::oneshot`.
//! Run with: cargo test --test api_tests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use support_chat::api::create_router;
use support_chat::{build_state, AuthConfig, Config};
use tempfile::TempDir;
use tower::ServiceExt;

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

async fn test_app() -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        server_port: 0,
        max_content_length: 8 * 1024 * 1024,
        upload_dir: dir.path().join("uploads"),
        chunk_dir: dir.path().join("temp_chunks"),
        allowed_extensions: vec!["png".into(), "jpg".into(), "mp4".into()],
        auth: AuthConfig {
            jwt_secret: "integration-secret-key-32-chars-long".into(),
            jwt_expiry_secs: 600,
            bcrypt_cost: 4,
        },
        admin_username: "admin".into(),
        admin_password: "admin123".into(),
    };
    let state = build_state(&config).await.unwrap();
    (dir, create_router(state))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("user-agent", BROWSER_UA)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("user-agent", BROWSER_UA)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_token(mut req: Request<Body>, token: &str) -> Request<Body> {
    req.headers_mut()
        .insert("authorization", format!("Bearer {}", token).parse().unwrap());
    req
}

async fn bootstrap(app: &Router) -> String {
    let (status, body) = send(app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    body["user_id"].as_str().unwrap().to_string()
}

async fn admin_token(app: &Router) -> String {
    let (status, body) = send(
        app,
        post_json("/admin/login", json!({"username": "admin", "password": "admin123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, app) = test_app().await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_bootstrap_creates_visitor_with_welcome_messages() {
    let (_dir, app) = test_app().await;
    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);

    let user_id = body["user_id"].as_str().unwrap();
    assert!(user_id.starts_with("user_"));
    assert!(body["common_questions"].as_array().unwrap().len() >= 2);
    assert_eq!(body["allow_images"], true);

    let (_, history) = send(&app, post_json("/get_messages", json!({"user_id": user_id}))).await;
    let history = history.as_array().unwrap();
    assert!(!history.is_empty());
    assert!(history.iter().all(|m| m["is_admin"] == true));

    // Returning visitor keeps the same id and no extra greeting
    let (_, again) = send(&app, get(&format!("/?user_id={}", user_id))).await;
    assert_eq!(again["user_id"], user_id);
    let (_, history2) = send(&app, post_json("/get_messages", json!({"user_id": user_id}))).await;
    assert_eq!(history2.as_array().unwrap().len(), history.len());
}

#[tokio::test]
async fn test_bootstrap_rejects_missing_user_agent() {
    let (_dir, app) = test_app().await;
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_send_message_gets_canned_answer() {
    let (_dir, app) = test_app().await;
    let user_id = bootstrap(&app).await;
    let (_, before) = send(&app, post_json("/get_messages", json!({"user_id": user_id}))).await;
    let before = before.as_array().unwrap().len();

    let (status, _) = send(
        &app,
        post_json(
            "/send_message",
            json!({"user_id": user_id, "content": "如何注册账号？", "message_type": "text"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, history) = send(&app, post_json("/get_messages", json!({"user_id": user_id}))).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), before + 2);
    assert_eq!(history[before]["is_admin"], false);
    assert_eq!(history[before + 1]["is_admin"], true);
}

#[tokio::test]
async fn test_send_message_unknown_visitor() {
    let (_dir, app) = test_app().await;
    let (status, body) = send(
        &app,
        post_json("/send_message", json!({"user_id": "user_ghost", "content": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_admin_flow() {
    let (_dir, app) = test_app().await;
    let user_id = bootstrap(&app).await;
    send(
        &app,
        post_json("/send_message", json!({"user_id": user_id, "content": "有人吗"})),
    )
    .await;

    let token = admin_token(&app).await;

    let (status, dashboard) = send(&app, with_token(get("/admin/dashboard"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    let entry = &dashboard.as_array().unwrap()[0];
    assert_eq!(entry["user"]["user_id"], user_id.as_str());
    assert_eq!(entry["unread_count"], 1);
    assert_eq!(entry["user"]["device_type"], "Windows桌面");

    let (status, conv) = send(
        &app,
        with_token(get(&format!("/admin/chat/{}", user_id)), &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!conv["messages"].as_array().unwrap().is_empty());

    let (_, dashboard) = send(&app, with_token(get("/admin/dashboard"), &token)).await;
    assert_eq!(dashboard[0]["unread_count"], 0);

    let (status, _) = send(
        &app,
        with_token(
            post_json(
                "/admin/send_message",
                json!({"user_id": user_id, "content": "您好，请讲"}),
            ),
            &token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_requires_token() {
    let (_dir, app) = test_app().await;
    let (status, _) = send(&app, get("/admin/settings")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, with_token(get("/admin/settings"), "not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_update_setting_unknown_key() {
    let (_dir, app) = test_app().await;
    let token = admin_token(&app).await;
    let (status, body) = send(
        &app,
        with_token(
            post_json("/admin/update_setting", json!({"key": "bogus", "value": "1"})),
            &token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_custom_chat_path() {
    let (_dir, app) = test_app().await;
    let token = admin_token(&app).await;
    let (status, _) = send(
        &app,
        with_token(
            post_json(
                "/admin/update_setting",
                json!({"key": "chat_path", "value": "support"}),
            ),
            &token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, get("/support")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["user_id"].is_string());
}

#[tokio::test]
async fn test_user_agent_filter() {
    let (_dir, app) = test_app().await;
    let token = admin_token(&app).await;
    send(
        &app,
        with_token(
            post_json(
                "/admin/update_setting",
                json!({"key": "enable_user_agent_filter", "value": "true"}),
            ),
            &token,
        ),
    )
    .await;

    let bot = Request::builder()
        .uri("/")
        .header("user-agent", "Googlebot/2.1 crawler")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, bot).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
}
