//! Second stage of the pipeline: fetch and persist a body for every canonical header.

use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::B256;
use hc_db::{HematiteBackend, StorageError};
use hp_block::BlockBody;
use hp_utils::service::ServiceContext;

use crate::stage::{Stage, StageId, StageOutcome};
use crate::{ExchangeHandle, SyncConfig, SyncError};

const PROGRESS_LOG_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
/// Bodies scheduled ahead of the delivery mark in one pass; bounds the pending pool.
const FEED_SPAN: u64 = 16_384;

pub struct BodiesStage {
    backend: Arc<HematiteBackend>,
    exchange: ExchangeHandle,
    config: Arc<SyncConfig>,
    ctx: ServiceContext,
}

impl BodiesStage {
    pub fn new(
        backend: Arc<HematiteBackend>,
        exchange: ExchangeHandle,
        config: Arc<SyncConfig>,
        ctx: ServiceContext,
    ) -> Self {
        Self { backend, exchange, config, ctx }
    }
}

#[async_trait::async_trait]
impl Stage for BodiesStage {
    fn id(&self) -> StageId {
        StageId::Bodies
    }

    async fn forward(&mut self, _first_sync: bool) -> Result<StageOutcome, SyncError> {
        let Some(headers_height) = self.backend.chain_head().headers.get() else {
            return Ok(StageOutcome::Done);
        };
        let mut progress = self.backend.chain_head().bodies.get().unwrap_or(0);
        if progress >= headers_height {
            return Ok(StageOutcome::Done);
        }
        let target = headers_height.min(progress + FEED_SPAN);

        tracing::debug!("[Bodies] Fetching bodies {}..={target}", progress + 1);
        self.exchange.reset_bodies(progress);

        // Everything the headers stage persisted but whose body is still missing.
        for block_n in progress + 1..=target {
            let header = self
                .backend
                .get_canonical_header(block_n)?
                .ok_or_else(|| StorageError::inconsistency("bodies stage ran ahead of the canonical index"))?;
            if self.backend.has_body(block_n, &header.hash())? {
                let body = self
                    .backend
                    .get_body(block_n, &header.hash())?
                    .ok_or_else(|| StorageError::inconsistency("body record vanished"))?;
                self.exchange.feed_arrived_body(header, body);
            } else {
                self.exchange.feed_bodies([header]);
            }
        }

        let mut idle_polls = 0u32;
        let mut last_log = Instant::now();
        while progress < target {
            if self.ctx.is_cancelled() {
                break;
            }

            let arrived = self.exchange.next_arrived_bodies().await;
            if arrived.is_empty() {
                idle_polls += 1;
                if idle_polls >= self.config.stage_idle_polls {
                    // Starved of responses; end the pass, the next round re-requests.
                    break;
                }
                continue;
            }
            idle_polls = 0;

            // A body for a header that is no longer canonical means the chain moved under us.
            let first = arrived.first().expect("non-empty");
            if self.backend.get_canonical_hash(first.block_n)? != Some(first.header.hash()) {
                return Ok(StageOutcome::UnwindNeeded { unwind_point: first.block_n - 1, bad_block: None });
            }

            let entries: Vec<(u64, B256, BlockBody)> =
                arrived.into_iter().map(|block| (block.block_n, block.header.hash(), block.body)).collect();
            self.backend.store_bodies(&entries)?;
            progress = entries.last().expect("non-empty").0;

            if last_log.elapsed() > PROGRESS_LOG_INTERVAL {
                last_log = Instant::now();
                tracing::info!("📦 Wrote block bodies up to #{progress}");
            }
        }

        if progress >= target {
            tracing::debug!("[Bodies] Done up to #{progress}");
        }
        Ok(StageOutcome::Done)
    }

    async fn unwind_to(&mut self, point: u64, _bad_block: Option<B256>) -> Result<(), SyncError> {
        self.backend.unwind_bodies_to(point)?;
        let progress = self.backend.chain_head().bodies.get().unwrap_or(0);
        self.exchange.reset_bodies(progress);
        Ok(())
    }
}
