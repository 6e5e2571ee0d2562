//! Shared fixtures for unit tests
//!
//! `test_state` builds the real service graph on top of throwaway directories.
#![allow(dead_code)]

use crate::api::handlers::ChatState;
use crate::{AuthConfig, Config};

/// JWT secret used by every test state
pub const TEST_SECRET: &str = "test-secret-key-minimum-32-chars!!";

/// Admin credentials seeded into every test state
pub const TEST_ADMIN: (&str, &str) = ("admin", "admin123");

/// Config rooted in `dir`, with the cheapest bcrypt cost.
pub fn test_config(dir: &std::path::Path) -> Config {
    Config {
        server_port: 0,
        max_content_length: 16 * 1024 * 1024,
        upload_dir: dir.join("uploads"),
        chunk_dir: dir.join("temp_chunks"),
        allowed_extensions: ["png", "jpg", "jpeg", "gif", "mp4", "webm"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        auth: AuthConfig {
            jwt_secret: TEST_SECRET.to_string(),
            jwt_expiry_secs: 3600,
            bcrypt_cost: 4,
        },
        admin_username: TEST_ADMIN.0.to_string(),
        admin_password: TEST_ADMIN.1.to_string(),
    }
}

/// Full server state over a fresh temp directory.
///
/// Keep the returned `TempDir` alive for the duration of the test.
pub async fn test_state() -> (tempfile::TempDir, ChatState) {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = crate::build_state(&test_config(dir.path()))
        .await
        .expect("test state should build");
    (dir, state)
}

/// `Authorization` header value for the seeded admin.
pub fn test_bearer_token() -> String {
    let token = crate::auth::jwt::encode_jwt(TEST_ADMIN.0, TEST_SECRET, 3600)
        .expect("test token encoding should succeed");
    format!("Bearer {}", token)
}
