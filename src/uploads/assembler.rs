//! Chunked transfers: numbered parts on disk, assembled into one blob.
//!
//! Each transfer owns `{chunk_root}/{transfer_id}/`:
//! ```text
//! chunk_0, chunk_1, ...   # raw part bytes, overwritten on resend
//! metadata.json           # progress sidecar, last writer wins
//! ```
//! Parts are always concatenated in ascending numeric index order, never in
//! directory enumeration order.

use super::blob::BlobStore;
use super::error::UploadError;
use super::models::{MergeRequest, PartUpload, StoredBlob, TransferMetadata, TransferProgress, UploadPolicy};
use super::registry::{is_complete, TransferRegistry, TransferState};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

const PART_PREFIX: &str = "chunk_";
const METADATA_FILE: &str = "metadata.json";

fn part_file_name(index: u32) -> String {
    format!("{}{}", PART_PREFIX, index)
}

/// Transfer ids name directories, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_transfer_id(id: &str) -> Result<(), UploadError> {
    if id.is_empty() {
        return Err(UploadError::MissingParameter("fileId"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(UploadError::InvalidParameter(format!(
            "transfer id contains unsupported characters: {}",
            id
        )));
    }
    Ok(())
}

/// Indices of the parts currently present in `dir`.
async fn parts_on_disk(dir: &Path) -> std::io::Result<BTreeSet<u32>> {
    let mut parts = BTreeSet::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(index) = name
            .to_str()
            .and_then(|n| n.strip_prefix(PART_PREFIX))
            .and_then(|n| n.parse::<u32>().ok())
        {
            parts.insert(index);
        }
    }
    Ok(parts)
}

/// Accepts parts, reports progress, merges and cancels transfers.
pub struct ChunkAssembler {
    chunk_root: PathBuf,
    blobs: Arc<BlobStore>,
    registry: TransferRegistry,
}

impl ChunkAssembler {
    pub fn new(chunk_root: impl Into<PathBuf>, blobs: Arc<BlobStore>) -> Self {
        Self {
            chunk_root: chunk_root.into(),
            blobs,
            registry: TransferRegistry::new(),
        }
    }

    /// Create the chunk root if needed.
    pub async fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.chunk_root).await
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    fn transfer_dir(&self, id: &str) -> Result<PathBuf, UploadError> {
        validate_transfer_id(id)?;
        Ok(self.chunk_root.join(id))
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Store one part and rewrite the progress sidecar. Returns the part index.
    pub async fn receive_part(&self, part: PartUpload, bytes: &[u8]) -> Result<u32, UploadError> {
        let dir = self.transfer_dir(&part.transfer_id)?;
        if part.filename.is_empty() {
            return Err(UploadError::MissingParameter("fileName"));
        }
        if part.total_parts == 0 {
            return Err(UploadError::InvalidParameter(
                "totalChunks must be at least 1".to_string(),
            ));
        }
        if part.part_index >= part.total_parts {
            return Err(UploadError::InvalidParameter(format!(
                "chunkIndex {} out of range for {} chunks",
                part.part_index, part.total_parts
            )));
        }
        self.registry.ensure_accepting(&part.transfer_id)?;

        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(part_file_name(part.part_index)), bytes).await?;

        let state = self
            .registry
            .record_part(&part.transfer_id, part.part_index, part.total_parts);

        let uploaded = parts_on_disk(&dir).await?.len() as u32;
        let metadata = TransferMetadata {
            file_id: part.transfer_id.clone(),
            file_name: part.filename,
            file_size: part.size_hint,
            file_type: part.mime_hint,
            total_chunks: part.total_parts,
            uploaded_chunks: uploaded,
        };
        let json = serde_json::to_vec(&metadata).map_err(std::io::Error::other)?;
        fs::write(dir.join(METADATA_FILE), json).await?;

        debug!(
            transfer_id = %part.transfer_id,
            part = part.part_index,
            uploaded,
            total = part.total_parts,
            bytes = bytes.len(),
            "Stored chunk"
        );
        if state == TransferState::Complete {
            debug!(transfer_id = %part.transfer_id, "All chunks received");
        }

        Ok(part.part_index)
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn status(&self, transfer_id: &str) -> Result<TransferProgress, UploadError> {
        let dir = self.transfer_dir(transfer_id)?;
        if !fs::try_exists(&dir).await? {
            return Ok(TransferProgress::NotFound);
        }

        match fs::read(dir.join(METADATA_FILE)).await {
            Ok(raw) => match serde_json::from_slice::<TransferMetadata>(&raw) {
                Ok(metadata) => return Ok(TransferProgress::Recorded(metadata)),
                Err(e) => {
                    warn!(transfer_id, "Unreadable transfer metadata, recounting: {}", e);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let uploaded_chunks = parts_on_disk(&dir).await?.len() as u32;
        Ok(TransferProgress::Counted { uploaded_chunks })
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Concatenate a complete transfer into a new blob and drop its parts.
    ///
    /// On any filesystem failure the parts stay where they are and no blob is
    /// left behind, so the caller can retry.
    pub async fn merge(
        &self,
        request: MergeRequest,
        policy: &UploadPolicy,
    ) -> Result<StoredBlob, UploadError> {
        let dir = self.transfer_dir(&request.transfer_id)?;
        if request.total_parts == 0 {
            return Err(UploadError::MissingParameter("totalChunks"));
        }
        if request.filename.is_empty() {
            return Err(UploadError::MissingParameter("fileName"));
        }
        if !fs::try_exists(&dir).await? {
            return Err(UploadError::NotFound(request.transfer_id));
        }

        let on_disk = parts_on_disk(&dir).await?;
        if !is_complete(&on_disk, request.total_parts) {
            return Err(UploadError::IncompleteTransfer {
                received: on_disk.len(),
                expected: request.total_parts,
            });
        }

        let accepted = policy.check(&request.filename)?;
        self.registry
            .begin_merge(&request.transfer_id, request.total_parts, on_disk)?;

        let name = match self
            .concatenate(&dir, request.total_parts, &accepted.extension)
            .await
        {
            Ok(name) => name,
            Err(e) => {
                self.registry.abort_merge(&request.transfer_id);
                warn!(transfer_id = %request.transfer_id, "Merge failed: {}", e);
                return Err(e.into());
            }
        };

        self.registry.remove(&request.transfer_id);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            warn!(transfer_id = %request.transfer_id, "Failed to remove merged chunks: {}", e);
        }

        info!(
            transfer_id = %request.transfer_id,
            blob = %name,
            parts = request.total_parts,
            mime = request.mime_type.as_deref().unwrap_or("-"),
            "Merged chunked upload"
        );

        Ok(StoredBlob {
            filename: name,
            message_type: accepted.kind,
        })
    }

    async fn concatenate(&self, dir: &Path, total: u32, extension: &str) -> std::io::Result<String> {
        let mut pending = self.blobs.create_pending(extension).await?;
        for index in 0..total {
            let copied = async {
                let mut part = fs::File::open(dir.join(part_file_name(index))).await?;
                tokio::io::copy(&mut part, &mut pending.file).await
            }
            .await;
            if let Err(e) = copied {
                pending.discard().await;
                return Err(e);
            }
        }
        pending.commit().await
    }

    // ========================================================================
    // Cancel
    // ========================================================================

    /// Drop a transfer's parts. Unknown ids are a no-op.
    pub async fn cancel(&self, transfer_id: &str) -> Result<(), UploadError> {
        let dir = self.transfer_dir(transfer_id)?;
        self.registry.remove(transfer_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(transfer_id, "Cancelled transfer");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploads::models::{MediaKind, DEFAULT_ALLOWED_EXTENSIONS};
    use std::collections::HashSet;

    struct Fixture {
        _dir: tempfile::TempDir,
        blobs: Arc<BlobStore>,
        assembler: ChunkAssembler,
        chunk_root: PathBuf,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path().join("uploads")));
        blobs.init().await.unwrap();
        let chunk_root = dir.path().join("temp_chunks");
        let assembler = ChunkAssembler::new(&chunk_root, blobs.clone());
        assembler.init().await.unwrap();
        Fixture {
            _dir: dir,
            blobs,
            assembler,
            chunk_root,
        }
    }

    fn policy() -> UploadPolicy {
        let allowed: HashSet<String> = DEFAULT_ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect();
        UploadPolicy::unrestricted(Arc::new(allowed))
    }

    fn part(id: &str, index: u32, total: u32) -> PartUpload {
        PartUpload {
            transfer_id: id.to_string(),
            part_index: index,
            total_parts: total,
            filename: "movie.mp4".to_string(),
            size_hint: Some("9".to_string()),
            mime_hint: Some("video/mp4".to_string()),
        }
    }

    fn merge_request(id: &str, total: u32, filename: &str) -> MergeRequest {
        MergeRequest {
            transfer_id: id.to_string(),
            total_parts: total,
            filename: filename.to_string(),
            mime_type: None,
        }
    }

    fn blob_count(blobs: &BlobStore) -> usize {
        std::fs::read_dir(blobs.root()).unwrap().count()
    }

    #[tokio::test]
    async fn test_status_unknown_transfer_is_not_found() {
        let f = fixture().await;
        assert_eq!(
            f.assembler.status("never-uploaded").await.unwrap(),
            TransferProgress::NotFound
        );
    }

    #[tokio::test]
    async fn test_receive_part_writes_sidecar() {
        let f = fixture().await;
        let index = f.assembler.receive_part(part("t1", 1, 3), b"bbb").await.unwrap();
        assert_eq!(index, 1);

        match f.assembler.status("t1").await.unwrap() {
            TransferProgress::Recorded(meta) => {
                assert_eq!(meta.file_id, "t1");
                assert_eq!(meta.file_name, "movie.mp4");
                assert_eq!(meta.total_chunks, 3);
                assert_eq!(meta.uploaded_chunks, 1);
                assert_eq!(meta.file_type.as_deref(), Some("video/mp4"));
            }
            other => panic!("expected recorded metadata, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_recounts_without_sidecar() {
        let f = fixture().await;
        f.assembler.receive_part(part("t1", 0, 3), b"a").await.unwrap();
        f.assembler.receive_part(part("t1", 2, 3), b"c").await.unwrap();
        std::fs::remove_file(f.chunk_root.join("t1").join(METADATA_FILE)).unwrap();

        assert_eq!(
            f.assembler.status("t1").await.unwrap(),
            TransferProgress::Counted { uploaded_chunks: 2 }
        );
    }

    #[tokio::test]
    async fn test_resend_overwrites_part() {
        let f = fixture().await;
        f.assembler.receive_part(part("t1", 0, 1), b"old").await.unwrap();
        f.assembler.receive_part(part("t1", 0, 1), b"new").await.unwrap();

        let blob = f
            .assembler
            .merge(merge_request("t1", 1, "movie.mp4"), &policy())
            .await
            .unwrap();
        assert_eq!(std::fs::read(f.blobs.path_for(&blob.filename)).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_merge_out_of_order_upload_is_byte_identical() {
        let f = fixture().await;
        let pieces: Vec<Vec<u8>> = (0..12u8).map(|i| vec![i; (i as usize) + 1]).collect();
        let order = [7, 0, 11, 3, 10, 1, 9, 2, 8, 4, 6, 5];
        for &i in &order {
            f.assembler
                .receive_part(part("ooo", i, 12), &pieces[i as usize])
                .await
                .unwrap();
        }

        let blob = f
            .assembler
            .merge(merge_request("ooo", 12, "movie.mp4"), &policy())
            .await
            .unwrap();
        assert_eq!(blob.message_type, MediaKind::Video);

        let expected: Vec<u8> = pieces.concat();
        assert_eq!(std::fs::read(f.blobs.path_for(&blob.filename)).unwrap(), expected);
        assert!(!f.chunk_root.join("ooo").exists());
        assert!(f.assembler.registry().get("ooo").is_none());
    }

    #[tokio::test]
    async fn test_merge_orders_numerically_past_ten_parts() {
        // chunk_10 sorts before chunk_2 lexically
        let f = fixture().await;
        for i in 0..11u32 {
            f.assembler
                .receive_part(part("num", i, 11), format!("[{}]", i).as_bytes())
                .await
                .unwrap();
        }
        let blob = f
            .assembler
            .merge(merge_request("num", 11, "pic.png"), &policy())
            .await
            .unwrap();
        assert_eq!(blob.message_type, MediaKind::Image);
        let merged = std::fs::read_to_string(f.blobs.path_for(&blob.filename)).unwrap();
        assert_eq!(merged, "[0][1][2][3][4][5][6][7][8][9][10]");
    }

    #[tokio::test]
    async fn test_merge_incomplete_leaves_directory_unchanged() {
        let f = fixture().await;
        f.assembler.receive_part(part("t1", 0, 3), b"a").await.unwrap();
        f.assembler.receive_part(part("t1", 2, 3), b"c").await.unwrap();
        let before = std::fs::read_dir(f.chunk_root.join("t1")).unwrap().count();

        let err = f
            .assembler
            .merge(merge_request("t1", 3, "movie.mp4"), &policy())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::IncompleteTransfer {
                received: 2,
                expected: 3
            }
        ));
        assert_eq!(std::fs::read_dir(f.chunk_root.join("t1")).unwrap().count(), before);
        assert_eq!(blob_count(&f.blobs), 0);
    }

    #[tokio::test]
    async fn test_merge_disallowed_extension_writes_nothing() {
        let f = fixture().await;
        f.assembler.receive_part(part("t1", 0, 1), b"MZ").await.unwrap();

        let err = f
            .assembler
            .merge(merge_request("t1", 1, "payload.exe"), &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedType(_)));
        assert_eq!(blob_count(&f.blobs), 0);
        assert!(f.chunk_root.join("t1").join("chunk_0").exists());
    }

    #[tokio::test]
    async fn test_merge_unknown_transfer_is_not_found() {
        let f = fixture().await;
        let err = f
            .assembler
            .merge(merge_request("ghost", 1, "a.png"), &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_merge_storage_failure_keeps_parts() {
        let f = fixture().await;
        f.assembler.receive_part(part("t1", 0, 2), b"a").await.unwrap();
        f.assembler.receive_part(part("t1", 1, 2), b"b").await.unwrap();

        // A directory where the part file should be makes the read fail
        let chunk = f.chunk_root.join("t1").join("chunk_1");
        std::fs::remove_file(&chunk).unwrap();
        std::fs::create_dir(&chunk).unwrap();

        let err = f
            .assembler
            .merge(merge_request("t1", 2, "movie.mp4"), &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::StorageFailure(_)));
        assert!(f.chunk_root.join("t1").join("chunk_0").exists());
        assert_eq!(blob_count(&f.blobs), 0, "no partial blob may remain");
        assert_eq!(std::fs::read_dir(f.blobs.staging_dir()).unwrap().count(), 0);
        assert_ne!(
            f.assembler.registry().get("t1").unwrap().state,
            TransferState::Merging
        );

        // Retry after fixing the part succeeds
        std::fs::remove_dir(&chunk).unwrap();
        f.assembler.receive_part(part("t1", 1, 2), b"b").await.unwrap();
        let blob = f
            .assembler
            .merge(merge_request("t1", 2, "movie.mp4"), &policy())
            .await
            .unwrap();
        assert_eq!(std::fs::read(f.blobs.path_for(&blob.filename)).unwrap(), b"ab");
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_noop_and_cancel_clears() {
        let f = fixture().await;
        f.assembler.cancel("nothing-here").await.unwrap();

        f.assembler.receive_part(part("t1", 0, 2), b"a").await.unwrap();
        f.assembler.cancel("t1").await.unwrap();
        assert_eq!(f.assembler.status("t1").await.unwrap(), TransferProgress::NotFound);
        assert!(f.assembler.registry().get("t1").is_none());
    }

    #[tokio::test]
    async fn test_rejects_bad_parameters() {
        let f = fixture().await;
        assert!(matches!(
            f.assembler.receive_part(part("../escape", 0, 1), b"x").await,
            Err(UploadError::InvalidParameter(_))
        ));
        assert!(matches!(
            f.assembler.receive_part(part("", 0, 1), b"x").await,
            Err(UploadError::MissingParameter(_))
        ));
        assert!(matches!(
            f.assembler.receive_part(part("t1", 3, 3), b"x").await,
            Err(UploadError::InvalidParameter(_))
        ));
        assert!(matches!(
            f.assembler
                .merge(merge_request("t1", 0, "a.png"), &policy())
                .await,
            Err(UploadError::MissingParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_rejected_while_merging() {
        let f = fixture().await;
        f.assembler.receive_part(part("t1", 0, 1), b"a").await.unwrap();
        f.assembler
            .registry()
            .begin_merge("t1", 1, [0].into_iter().collect())
            .unwrap();

        assert!(matches!(
            f.assembler.receive_part(part("t1", 0, 1), b"a").await,
            Err(UploadError::TransferBusy(_))
        ));
        assert!(matches!(
            f.assembler
                .merge(merge_request("t1", 1, "movie.mp4"), &policy())
                .await,
            Err(UploadError::TransferBusy(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transfers_keep_their_own_bytes() {
        let f = fixture().await;
        let assembler = Arc::new(ChunkAssembler::new(f.chunk_root.join("shared"), f.blobs.clone()));
        assembler.init().await.unwrap();

        const TRANSFERS: u8 = 16;
        const PARTS: u8 = 8;
        let piece = |t: u8, p: u8| vec![t.wrapping_mul(31).wrapping_add(p); 64 + p as usize];

        // Part-major order so every transfer has writes in flight at once
        let mut uploads = Vec::new();
        for p in (0..PARTS).rev() {
            for t in 0..TRANSFERS {
                let assembler = assembler.clone();
                let bytes = piece(t, p);
                uploads.push(tokio::spawn(async move {
                    assembler
                        .receive_part(part(&format!("xfer_{}", t), p as u32, PARTS as u32), &bytes)
                        .await
                }));
            }
        }
        for handle in uploads {
            handle.await.unwrap().unwrap();
        }

        let mut merges = Vec::new();
        for t in 0..TRANSFERS {
            let assembler = assembler.clone();
            merges.push(tokio::spawn(async move {
                let blob = assembler
                    .merge(merge_request(&format!("xfer_{}", t), PARTS as u32, "movie.mp4"), &policy())
                    .await;
                (t, blob)
            }));
        }
        let mut names = HashSet::new();
        for handle in merges {
            let (t, blob) = handle.await.unwrap();
            let blob = blob.unwrap();
            let expected: Vec<u8> = (0..PARTS).flat_map(|p| piece(t, p)).collect();
            assert_eq!(std::fs::read(f.blobs.path_for(&blob.filename)).unwrap(), expected);
            assert!(names.insert(blob.filename));
        }
        assert_eq!(assembler.registry().len(), 0);
    }
}
