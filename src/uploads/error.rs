//! Upload error taxonomy

use thiserror::Error;

/// Errors surfaced by blob and chunked-transfer operations.
#[derive(Debug, Error)]
pub enum UploadError {
    /// A required request field was absent or empty.
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// A field was present but unusable (bad transfer id, index out of range).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No working directory exists for the transfer id.
    #[error("transfer not found: {0}")]
    NotFound(String),

    /// Merge attempted before every part was present.
    #[error("not all chunks uploaded ({received}/{expected})")]
    IncompleteTransfer {
        /// Parts currently on disk.
        received: usize,
        /// Parts the client declared.
        expected: u32,
    },

    /// Extension outside the allow-list, or its category is switched off.
    #[error("file type not allowed: {0}")]
    UnsupportedType(String),

    /// The transfer is being merged and cannot take more parts or a second merge.
    #[error("transfer is being merged: {0}")]
    TransferBusy(String),

    /// Filesystem failure while writing, merging or deleting.
    #[error("storage failure: {0}")]
    StorageFailure(#[from] std::io::Error),
}

impl UploadError {
    /// Stable machine-readable tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::MissingParameter(_) => "missing_parameter",
            UploadError::InvalidParameter(_) => "invalid_parameter",
            UploadError::NotFound(_) => "not_found",
            UploadError::IncompleteTransfer { .. } => "incomplete_transfer",
            UploadError::UnsupportedType(_) => "unsupported_type",
            UploadError::TransferBusy(_) => "transfer_busy",
            UploadError::StorageFailure(_) => "storage_failure",
        }
    }
}
