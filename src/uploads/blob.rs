//! Filesystem blob store for finished uploads.
//!
//! Layout:
//! ```text
//! {root}/
//!   {20 random alphanumerics}.{ext}     # finished, immutable, served
//! {parent}/.{root name}-partial/
//!   {name}.partial                      # in-flight write, renamed on commit
//! ```
//!
//! The staging directory sits next to the root so the commit rename stays on
//! one filesystem and in-flight writes are never reachable through the root.

use super::error::UploadError;
use super::models::{StoredBlob, UploadPolicy};
use rand::distr::{Alphanumeric, SampleString};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const NAME_LEN: usize = 20;

/// Random alphanumeric string of `len` characters.
pub(crate) fn random_alphanumeric(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), len)
}

/// `{parent}/.{root name}-partial`
fn staging_dir_for(root: &Path) -> PathBuf {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "uploads".to_string());
    root.parent()
        .unwrap_or_else(|| Path::new(""))
        .join(format!(".{}-partial", name))
}

/// A blob name is a bare file name: no separators, no leading dot.
pub fn is_valid_blob_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != ".."
}

/// Finished uploads, addressed by generated file name.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    staging: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let staging = staging_dir_for(&root);
        Self { root, staging }
    }

    /// Create the root and staging directories if needed.
    pub async fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        fs::create_dir_all(&self.staging).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Fresh blob name with the given extension.
    pub fn generate_name(extension: &str) -> String {
        format!("{}.{}", random_alphanumeric(NAME_LEN), extension)
    }

    /// Where in-flight writes live until they are committed.
    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Open a staged partial file that becomes a blob on [`PendingBlob::commit`].
    pub async fn create_pending(&self, extension: &str) -> std::io::Result<PendingBlob> {
        let name = Self::generate_name(extension);
        let partial_path = self.staging.join(format!("{}.partial", name));
        let final_path = self.root.join(&name);
        let file = fs::File::create(&partial_path).await?;
        Ok(PendingBlob {
            name,
            partial_path,
            final_path,
            file,
        })
    }

    /// Write a whole upload in one go.
    pub async fn put(&self, extension: &str, data: &[u8]) -> std::io::Result<String> {
        let mut pending = self.create_pending(extension).await?;
        if let Err(e) = pending.file.write_all(data).await {
            pending.discard().await;
            return Err(e);
        }
        pending.commit().await
    }

    /// Validate a single-shot upload against `policy` and store it.
    pub async fn store_upload(
        &self,
        filename: &str,
        data: &[u8],
        policy: &UploadPolicy,
    ) -> Result<StoredBlob, UploadError> {
        if filename.is_empty() {
            return Err(UploadError::MissingParameter("file"));
        }
        let accepted = policy.check(filename)?;
        let name = self.put(&accepted.extension, data).await?;
        debug!(blob = %name, bytes = data.len(), "Stored upload");
        Ok(StoredBlob {
            filename: name,
            message_type: accepted.kind,
        })
    }

    /// Remove a blob. Returns `false` if it did not exist.
    pub async fn delete(&self, name: &str) -> std::io::Result<bool> {
        if !is_valid_blob_name(name) {
            return Ok(false);
        }
        match fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// A blob being written. Dropped without `commit` it leaves only a staged `.partial` file.
#[derive(Debug)]
pub struct PendingBlob {
    name: String,
    partial_path: PathBuf,
    final_path: PathBuf,
    pub(crate) file: fs::File,
}

impl PendingBlob {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flush to disk and publish under the final name.
    pub async fn commit(mut self) -> std::io::Result<String> {
        let result = async {
            self.file.flush().await?;
            self.file.sync_all().await?;
            fs::rename(&self.partial_path, &self.final_path).await
        }
        .await;

        match result {
            Ok(()) => Ok(self.name),
            Err(e) => {
                self.discard().await;
                Err(e)
            }
        }
    }

    /// Drop the partial file.
    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.partial_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.partial_path.display(), "Failed to remove partial blob: {}", e);
            }
        }
    }
}
