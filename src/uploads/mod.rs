//! File uploads: single-shot blobs and chunked transfers
//!
//! - `BlobStore`: finished uploads under random names
//! - `TransferRegistry`: lifecycle of transfers in flight
//! - `ChunkAssembler`: numbered parts, progress sidecar, merge into a blob

mod assembler;
mod blob;
mod error;
pub mod models;
mod registry;

pub use assembler::{validate_transfer_id, ChunkAssembler};
pub use blob::{is_valid_blob_name, BlobStore, PendingBlob};
pub(crate) use blob::random_alphanumeric;
pub use error::UploadError;
pub use models::{
    extension_of, AcceptedMedia, MediaKind, MergeRequest, PartUpload, StoredBlob,
    TransferMetadata, TransferProgress, UploadPolicy, DEFAULT_ALLOWED_EXTENSIONS,
};
pub use registry::{is_complete, TransferRecord, TransferRegistry, TransferState};
