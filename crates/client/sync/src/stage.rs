use std::fmt;

use alloy_primitives::B256;

use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageId {
    Headers,
    Bodies,
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageId::Headers => write!(f, "Headers"),
            StageId::Bodies => write!(f, "Bodies"),
        }
    }
}

/// What a forward pass reports back to the stage loop. Fatal conditions travel as `Err`;
/// inconsistencies that a rewind can repair travel as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// No further progress is possible right now.
    Done,
    /// A downstream inconsistency was detected; the loop must rewind the touched stages.
    UnwindNeeded {
        /// Highest block number that is still good.
        unwind_point: u64,
        /// The offending header, destined for the blacklist.
        bad_block: Option<B256>,
    },
}

/// A unit of the pipeline.
#[async_trait::async_trait]
pub trait Stage: Send {
    fn id(&self) -> StageId;

    /// Advances persisted state as far as current inputs allow. May block waiting for input;
    /// observes cancellation at batch boundaries. Commits exactly one write batch per pass.
    async fn forward(&mut self, first_sync: bool) -> Result<StageOutcome, SyncError>;

    /// Atomically reverts all persisted side effects above `point` and blacklists `bad_block`.
    /// Idempotent; a no-op when `point` is at or above the stage's head.
    async fn unwind_to(&mut self, point: u64, bad_block: Option<B256>) -> Result<(), SyncError>;
}
