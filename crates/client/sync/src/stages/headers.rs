//! First stage of the pipeline: drain verified, connected headers from the exchange and make
//! them canonical.

use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::B256;
use hc_db::{HematiteBackend, StorageError};
use hc_sentry::eth::BlockHashAndNumber;
use hp_block::{validation, SealedHeader};
use hp_utils::service::ServiceContext;
use hp_utils::trim_hash;

use crate::stage::{Stage, StageId, StageOutcome};
use crate::{ExchangeHandle, SyncConfig, SyncError};

const PROGRESS_LOG_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

pub struct HeadersStage {
    backend: Arc<HematiteBackend>,
    exchange: ExchangeHandle,
    config: Arc<SyncConfig>,
    ctx: ServiceContext,
}

impl HeadersStage {
    pub fn new(
        backend: Arc<HematiteBackend>,
        exchange: ExchangeHandle,
        config: Arc<SyncConfig>,
        ctx: ServiceContext,
    ) -> Self {
        Self { backend, exchange, config, ctx }
    }

    fn head(&self) -> Result<(u64, B256), SyncError> {
        let (block_n, hash, _td) = self
            .backend
            .head_info()?
            .ok_or_else(|| StorageError::inconsistency("headers stage started before genesis was written"))?;
        Ok((block_n, hash))
    }
}

#[async_trait::async_trait]
impl Stage for HeadersStage {
    fn id(&self) -> StageId {
        StageId::Headers
    }

    async fn forward(&mut self, first_sync: bool) -> Result<StageOutcome, SyncError> {
        let (initial_height, head_hash) = self.head()?;
        self.exchange.sync_header_chain(initial_height, head_hash);

        let mut parent = self
            .backend
            .get_canonical_header(initial_height)?
            .ok_or_else(|| StorageError::inconsistency("head status points at a missing header"))?;
        let mut height = initial_height;
        let mut idle_polls = 0u32;
        let mut last_log = Instant::now();

        tracing::debug!("[Headers] Waiting for headers... from={initial_height}");

        loop {
            if self.ctx.is_cancelled() {
                break;
            }

            let (headers, in_sync) = self.exchange.next_stable_headers(self.config.headers_persist_batch).await;
            let best_changed = height > initial_height;

            if headers.is_empty() {
                idle_polls += 1;
                let finished = if first_sync { in_sync && best_changed } else { best_changed };
                // A quiet, in-sync cursor also ends the pass, so the loop stays responsive when
                // the network has nothing new for us.
                if finished || (in_sync && idle_polls >= self.config.stage_idle_polls) {
                    break;
                }
                continue;
            }
            idle_polls = 0;

            // One verification sweep, one write batch.
            let mut verified: Vec<SealedHeader> = Vec::with_capacity(headers.len());
            let mut failure: Option<B256> = None;
            for header in headers {
                if self.backend.is_bad_block(&header.hash())? {
                    tracing::warn!("Refusing blacklisted header #{} {:#x}", header.number(), header.hash());
                    failure = Some(header.hash());
                    break;
                }
                if let Err(err) =
                    validation::validate_header_against_parent(header.header(), &parent, self.backend.chain_config())
                {
                    tracing::warn!("Rejecting header #{} {:#x}: {err}", header.number(), header.hash());
                    failure = Some(header.hash());
                    break;
                }
                parent = header.clone();
                verified.push(header);
            }

            if !verified.is_empty() {
                self.backend.store_canonical_headers(&verified)?;
                height = parent.number();
                let tip = verified.last().expect("non-empty");
                self.exchange.announce(vec![BlockHashAndNumber { hash: tip.hash(), number: tip.number() }]);

                if last_log.elapsed() > PROGRESS_LOG_INTERVAL {
                    last_log = Instant::now();
                    tracing::info!("⛏️  Wrote block headers up to #{height} ({})", trim_hash(&tip.hash()));
                }
            }

            if let Some(bad_block) = failure {
                return Ok(StageOutcome::UnwindNeeded { unwind_point: parent.number(), bad_block: Some(bad_block) });
            }

            let best_changed = height > initial_height;
            let finished = if first_sync { in_sync && best_changed } else { best_changed };
            if finished {
                break;
            }
        }

        if height > initial_height {
            tracing::info!("✨ Headers stage done, head #{height} (+{})", height - initial_height);
        }
        Ok(StageOutcome::Done)
    }

    async fn unwind_to(&mut self, point: u64, bad_block: Option<B256>) -> Result<(), SyncError> {
        self.backend.unwind_headers_to(point, bad_block)?;
        if let Some(bad_block) = bad_block {
            self.exchange.add_bad_headers([bad_block]);
        }
        // The in-memory graph is session state; rebuild it on the restored head so nothing above
        // the unwind point survives in memory either.
        let (height, hash) = self.head()?;
        self.exchange.sync_header_chain(height, hash);
        Ok(())
    }
}
