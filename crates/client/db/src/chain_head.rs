use std::sync::atomic::{AtomicU64, Ordering::SeqCst};

use crate::{Column, DatabaseExt, StorageError, DB};

/// Latest block number a stage has fully committed, or `None` before the first commit.
///
/// Stored shifted by one so the atomic can represent the empty state.
#[derive(serde::Serialize, serde::Deserialize, Debug, Default)]
#[serde(transparent)]
pub struct BlockNStatus(AtomicU64);

impl BlockNStatus {
    pub fn get(&self) -> Option<u64> {
        self.0.load(SeqCst).checked_sub(1)
    }

    pub fn set(&self, block_n: Option<u64>) {
        self.0.store(block_n.map(|block_n| block_n + 1).unwrap_or(0), SeqCst)
    }

    /// Next block this stage has to process.
    pub fn next(&self) -> u64 {
        self.0.load(SeqCst)
    }
}

impl Clone for BlockNStatus {
    fn clone(&self) -> Self {
        Self(self.0.load(SeqCst).into())
    }
}

/// Progress counters of the sync pipeline, one per stage. Persisted as a single meta row so a
/// restart resumes each stage from its own high-water mark.
#[derive(serde::Serialize, serde::Deserialize, Debug, Default, Clone)]
pub struct ChainHead {
    pub headers: BlockNStatus,
    pub bodies: BlockNStatus,
}

pub(crate) const ROW_HEAD_STATUS: &[u8] = b"head_status";

impl ChainHead {
    /// The canonical chain tip is whatever the headers stage has committed.
    pub fn latest_block_n(&self) -> Option<u64> {
        self.headers.get()
    }

    pub(crate) fn load_from_db(db: &DB) -> Result<Self, StorageError> {
        let col = db.get_column(Column::BlockStorageMeta);
        if let Some(res) = db.get_pinned_cf(&col, ROW_HEAD_STATUS)? {
            return Ok(bincode::deserialize(res.as_ref())?);
        }
        Ok(Default::default())
    }
}
