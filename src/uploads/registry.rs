//! In-memory registry of transfers in flight.
//!
//! The working directory still holds the bytes; the registry holds the
//! lifecycle so a transfer being merged cannot take new parts or be merged
//! twice.

use super::error::UploadError;
use dashmap::DashMap;
use std::collections::BTreeSet;

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Some declared parts are still missing.
    Collecting,
    /// Every part `0..total` has been received.
    Complete,
    /// Parts are being concatenated into a blob.
    Merging,
}

/// Registry entry for one transfer id.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub total_parts: u32,
    pub received: BTreeSet<u32>,
    pub state: TransferState,
}

impl TransferRecord {
    fn new(total_parts: u32) -> Self {
        Self {
            total_parts,
            received: BTreeSet::new(),
            state: TransferState::Collecting,
        }
    }

    fn refresh_state(&mut self) {
        if self.state != TransferState::Merging {
            self.state = if is_complete(&self.received, self.total_parts) {
                TransferState::Complete
            } else {
                TransferState::Collecting
            };
        }
    }
}

/// True iff `received` is exactly `{0 .. total-1}`.
pub fn is_complete(received: &BTreeSet<u32>, total: u32) -> bool {
    total > 0 && received.len() == total as usize && received.iter().copied().eq(0..total)
}

/// Map from transfer id to its record.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    transfers: DashMap<String, TransferRecord>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject uploads into a transfer that is being merged.
    pub fn ensure_accepting(&self, id: &str) -> Result<(), UploadError> {
        match self.transfers.get(id) {
            Some(record) if record.state == TransferState::Merging => {
                Err(UploadError::TransferBusy(id.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Record a stored part. The latest declared total wins.
    pub fn record_part(&self, id: &str, index: u32, total: u32) -> TransferState {
        let mut record = self
            .transfers
            .entry(id.to_string())
            .or_insert_with(|| TransferRecord::new(total));
        record.total_parts = total;
        record.received.insert(index);
        record.refresh_state();
        record.state
    }

    /// Move a transfer into `Merging`, syncing its part set from disk.
    ///
    /// The caller has already verified completeness against `on_disk`.
    pub fn begin_merge(
        &self,
        id: &str,
        total: u32,
        on_disk: BTreeSet<u32>,
    ) -> Result<(), UploadError> {
        let mut record = self
            .transfers
            .entry(id.to_string())
            .or_insert_with(|| TransferRecord::new(total));
        if record.state == TransferState::Merging {
            return Err(UploadError::TransferBusy(id.to_string()));
        }
        record.total_parts = total;
        record.received = on_disk;
        record.state = TransferState::Merging;
        Ok(())
    }

    /// Merge failed: the transfer goes back to collecting/complete.
    pub fn abort_merge(&self, id: &str) {
        if let Some(mut record) = self.transfers.get_mut(id) {
            record.state = TransferState::Collecting;
            record.refresh_state();
        }
    }

    /// Forget a transfer (merged or cancelled).
    pub fn remove(&self, id: &str) -> Option<TransferRecord> {
        self.transfers.remove(id).map(|(_, record)| record)
    }

    pub fn get(&self, id: &str) -> Option<TransferRecord> {
        self.transfers.get(id).map(|record| record.clone())
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}
