//! Upload data types: media kinds, policy, transfer metadata

use super::error::UploadError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Extensions rendered inline as images; every other allowed extension is a video.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// Extensions accepted when the config does not override the list.
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 8] =
    ["png", "jpg", "jpeg", "gif", "mp4", "mov", "avi", "wmv"];

/// Coarse category of a finished upload, doubles as the chat message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Self {
        if IMAGE_EXTENSIONS.contains(&ext) {
            MediaKind::Image
        } else {
            MediaKind::Video
        }
    }
}

/// Lower-cased text after the last `.`, if the name has one.
pub fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Extension and category of a filename that passed an [`UploadPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedMedia {
    pub extension: String,
    pub kind: MediaKind,
}

/// Which uploads a caller may finish.
///
/// Visitors are bound by the image/video toggles of the current settings
/// snapshot; staff uploads only go through the extension allow-list.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_extensions: Arc<HashSet<String>>,
    allow_images: bool,
    allow_videos: bool,
}

impl UploadPolicy {
    pub fn new(allowed_extensions: Arc<HashSet<String>>, allow_images: bool, allow_videos: bool) -> Self {
        Self {
            allowed_extensions,
            allow_images,
            allow_videos,
        }
    }

    /// Policy for admin uploads: category toggles are ignored.
    pub fn unrestricted(allowed_extensions: Arc<HashSet<String>>) -> Self {
        Self::new(allowed_extensions, true, true)
    }

    /// Check the extension only, ignoring category toggles.
    pub fn is_allowed_name(&self, filename: &str) -> bool {
        extension_of(filename).is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }

    /// Validate a declared filename and classify it.
    pub fn check(&self, filename: &str) -> Result<AcceptedMedia, UploadError> {
        let extension = extension_of(filename)
            .filter(|ext| self.allowed_extensions.contains(ext))
            .ok_or_else(|| UploadError::UnsupportedType(filename.to_string()))?;

        let kind = MediaKind::from_extension(&extension);
        let enabled = match kind {
            MediaKind::Image => self.allow_images,
            MediaKind::Video => self.allow_videos,
        };
        if !enabled {
            return Err(UploadError::UnsupportedType(filename.to_string()));
        }

        Ok(AcceptedMedia { extension, kind })
    }
}

/// A finished blob as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub filename: String,
    pub message_type: MediaKind,
}

/// One numbered part of a chunked transfer, minus its bytes.
#[derive(Debug, Clone)]
pub struct PartUpload {
    pub transfer_id: String,
    pub part_index: u32,
    pub total_parts: u32,
    pub filename: String,
    pub size_hint: Option<String>,
    pub mime_hint: Option<String>,
}

/// Request to assemble a transfer into a blob.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub transfer_id: String,
    pub total_parts: u32,
    pub filename: String,
    pub mime_type: Option<String>,
}

/// Sidecar persisted next to the parts after every upload (`metadata.json`).
///
/// Field names match what the browser client sends and reads back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    pub file_id: String,
    pub file_name: String,
    pub file_size: Option<String>,
    pub file_type: Option<String>,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferProgress {
    /// No working directory for this id.
    NotFound,
    /// Sidecar was readable.
    Recorded(TransferMetadata),
    /// Sidecar missing or unreadable; parts were counted instead.
    Counted { uploaded_chunks: u32 },
}
