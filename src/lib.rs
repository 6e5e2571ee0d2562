//! Support Chat
//!
//! A customer-support live-chat server with:
//! - Anonymous visitor conversations relayed to staff over WebSocket
//! - Chunked and single-shot media uploads merged into a blob store
//! - Canned auto-replies, welcome messages and runtime settings
//! - JWT-protected admin console

pub mod api;
pub mod auth;
pub mod chat;
pub mod events;
pub mod uploads;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub storage: StorageYamlConfig,
    pub auth: AuthConfig,
    pub admin: AdminYamlConfig,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub port: u16,
    /// Request body cap in bytes; bounds single uploads and chunk parts alike
    pub max_content_length: usize,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            max_content_length: 1024 * 1024 * 1024,
        }
    }
}

/// Storage configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageYamlConfig {
    pub upload_dir: String,
    pub chunk_dir: String,
    pub allowed_extensions: Vec<String>,
}

impl Default for StorageYamlConfig {
    fn default() -> Self {
        Self {
            upload_dir: "uploads".into(),
            chunk_dir: "temp_chunks".into(),
            allowed_extensions: uploads::DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Token signing and password hashing parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret. Empty means a random secret is generated at startup.
    pub jwt_secret: String,
    /// JWT token lifetime in seconds (default: 28800 = 8h)
    pub jwt_expiry_secs: u64,
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_expiry_secs: 28800,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

/// Seed admin account.
///
/// `password` may be a bcrypt hash (`$2b$...`) or plaintext, which is hashed
/// at startup with a warning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminYamlConfig {
    pub username: String,
    pub password: String,
}

impl Default for AdminYamlConfig {
    fn default() -> Self {
        Self {
            username: "admin".into(),
            password: "admin123".into(),
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub max_content_length: usize,
    pub upload_dir: PathBuf,
    pub chunk_dir: PathBuf,
    /// Lower-cased, without leading dots
    pub allowed_extensions: Vec<String>,
    pub auth: AuthConfig,
    pub admin_username: String,
    pub admin_password: String,
}

impl Config {
    /// Load configuration from environment variables and `config.yaml` in CWD.
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let mut auth = yaml.auth;
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            auth.jwt_secret = secret;
        }
        if auth.jwt_secret.is_empty() {
            tracing::warn!("No jwt_secret configured, generating a random one; tokens will not survive a restart");
            auth.jwt_secret = uploads::random_alphanumeric(48);
        }

        let max_content_length = match std::env::var("MAX_CONTENT_LENGTH") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("Invalid MAX_CONTENT_LENGTH: {}", raw))?,
            Err(_) => yaml.server.max_content_length,
        };

        Ok(Self {
            server_port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(yaml.server.port),
            max_content_length,
            upload_dir: std::env::var("UPLOAD_DIR")
                .unwrap_or(yaml.storage.upload_dir)
                .into(),
            chunk_dir: std::env::var("CHUNK_DIR")
                .unwrap_or(yaml.storage.chunk_dir)
                .into(),
            allowed_extensions: yaml
                .storage
                .allowed_extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            auth,
            admin_username: std::env::var("ADMIN_USERNAME").unwrap_or(yaml.admin.username),
            admin_password: std::env::var("ADMIN_PASSWORD").unwrap_or(yaml.admin.password),
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }

    pub fn allowed_extension_set(&self) -> Arc<HashSet<String>> {
        Arc::new(self.allowed_extensions.iter().cloned().collect())
    }
}

// ============================================================================
// Server bootstrap
// ============================================================================

/// Build every service from config: storage directories, seeded store, relay.
pub async fn build_state(config: &Config) -> Result<api::handlers::ChatState> {
    let blobs = Arc::new(uploads::BlobStore::new(&config.upload_dir));
    blobs
        .init()
        .await
        .with_context(|| format!("Failed to create {}", config.upload_dir.display()))?;

    let assembler = Arc::new(uploads::ChunkAssembler::new(&config.chunk_dir, blobs.clone()));
    assembler
        .init()
        .await
        .with_context(|| format!("Failed to create {}", config.chunk_dir.display()))?;

    let password_hash =
        auth::password::ensure_hashed(&config.admin_password, config.auth.bcrypt_cost)?;
    let store: Arc<dyn chat::ChatStore> = Arc::new(
        chat::MemoryChatStore::with_defaults(chat::AdminAccount {
            username: config.admin_username.clone(),
            password_hash,
        })
        .await?,
    );

    let event_bus = Arc::new(events::EventBus::default());
    let relay = chat::MessageRelay::new(store.clone(), event_bus.clone());
    let responder = chat::AutoResponder::new(store.clone(), relay.clone());

    Ok(Arc::new(api::handlers::ServerState {
        store,
        blobs,
        assembler,
        relay,
        responder,
        event_bus,
        auth: config.auth.clone(),
        allowed_extensions: config.allowed_extension_set(),
        max_content_length: config.max_content_length,
    }))
}

/// Start the HTTP/WebSocket server and serve until the process is stopped.
pub async fn start_server(config: Config) -> Result<()> {
    let state = build_state(&config).await?;
    let app = api::create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(
        upload_dir = %config.upload_dir.display(),
        chunk_dir = %config.chunk_dir.display(),
        "Support chat listening on {}",
        addr
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("Server error")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
server:
  port: 9090
  max_content_length: 1048576

storage:
  upload_dir: /srv/chat/uploads
  chunk_dir: /srv/chat/chunks
  allowed_extensions: [png, webm]

auth:
  jwt_secret: "super-secret-key-min-32-characters!"
  jwt_expiry_secs: 3600

admin:
  username: support
  password: "$2b$12$LJ3m4ys1fFNwNkfMjkLx3u"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.max_content_length, 1048576);
        assert_eq!(config.storage.upload_dir, "/srv/chat/uploads");
        assert_eq!(config.storage.allowed_extensions, vec!["png", "webm"]);
        assert_eq!(config.auth.jwt_expiry_secs, 3600);
        assert_eq!(config.auth.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert_eq!(config.admin.username, "support");
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.max_content_length, 1024 * 1024 * 1024);
        assert_eq!(config.storage.upload_dir, "uploads");
        assert_eq!(config.storage.chunk_dir, "temp_chunks");
        assert_eq!(config.storage.allowed_extensions.len(), 8);
        assert_eq!(config.auth.jwt_expiry_secs, 28800);
        assert!(config.auth.jwt_secret.is_empty());
        assert_eq!(config.admin.username, "admin");
        assert_eq!(config.admin.password, "admin123");
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let yaml = r#"
server:
  port: 8081
auth:
  bcrypt_cost: 4
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.max_content_length, 1024 * 1024 * 1024);
        assert_eq!(config.auth.bcrypt_cost, 4);
        assert_eq!(config.auth.jwt_expiry_secs, 28800);
        assert_eq!(config.storage.chunk_dir, "temp_chunks");
    }

    /// Combined test for YAML file loading and env var overrides.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        fn clear_env() {
            for var in &[
                "SERVER_PORT",
                "UPLOAD_DIR",
                "CHUNK_DIR",
                "JWT_SECRET",
                "ADMIN_USERNAME",
                "ADMIN_PASSWORD",
                "MAX_CONTENT_LENGTH",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
server:
  port: 9999
storage:
  upload_dir: yaml-uploads
  allowed_extensions: [".PNG", " mp4 ", ""]
auth:
  jwt_secret: yaml-secret-yaml-secret-yaml-secret
admin:
  username: yaml-admin
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.server_port, 9999);
        assert_eq!(config.upload_dir, PathBuf::from("yaml-uploads"));
        assert_eq!(config.chunk_dir, PathBuf::from("temp_chunks"));
        assert_eq!(config.allowed_extensions, vec!["png", "mp4"]);
        assert_eq!(config.auth.jwt_secret, "yaml-secret-yaml-secret-yaml-secret");
        assert_eq!(config.admin_username, "yaml-admin");
        assert_eq!(config.admin_password, "admin123");

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("SERVER_PORT", "7777");
        std::env::set_var("CHUNK_DIR", "/tmp/env-chunks");
        std::env::set_var("JWT_SECRET", "env-secret");
        std::env::set_var("ADMIN_PASSWORD", "from-env");
        std::env::set_var("MAX_CONTENT_LENGTH", "2048");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.server_port, 7777);
        assert_eq!(config.chunk_dir, PathBuf::from("/tmp/env-chunks"));
        assert_eq!(config.auth.jwt_secret, "env-secret");
        assert_eq!(config.admin_password, "from-env");
        assert_eq!(config.max_content_length, 2048);
        // YAML value still used where no env override
        assert_eq!(config.admin_username, "yaml-admin");

        // --- Phase 3: Malformed numeric override is an error ---
        std::env::set_var("MAX_CONTENT_LENGTH", "lots");
        assert!(Config::from_yaml_and_env(Some(&file_path)).is_err());

        clear_env();

        // --- Phase 4: No YAML file → defaults, random secret ---
        let nonexistent = Path::new("/tmp/nonexistent-support-chat-12345.yaml");
        let config = Config::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.server_port, 5000);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.auth.jwt_secret.len(), 48);
        assert_eq!(config.allowed_extensions.len(), 8);
    }
}
