//! Admin password hashing with bcrypt.

use anyhow::{Context, Result};
use tracing::warn;

/// Hash a plaintext password.
pub fn hash_password(plain: &str, cost: u32) -> Result<String> {
    bcrypt::hash(plain, cost).context("Failed to hash password")
}

/// Check a plaintext password against a stored hash. Malformed hashes never verify.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

fn looks_like_bcrypt(value: &str) -> bool {
    ["$2a$", "$2b$", "$2x$", "$2y$"]
        .iter()
        .any(|prefix| value.starts_with(prefix))
}

/// Accept either a bcrypt hash or a plaintext password from config.
///
/// Plaintext is hashed with a warning so the secret is never kept in memory as-is.
pub fn ensure_hashed(configured: &str, cost: u32) -> Result<String> {
    if looks_like_bcrypt(configured) {
        return Ok(configured.to_string());
    }
    warn!("Admin password configured in plaintext, hashing at startup");
    hash_password(configured, cost)
}
