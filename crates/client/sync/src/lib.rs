//! The block download engine.
//!
//! Three cooperating pieces drive the canonical chain forward:
//!
//! - the [`exchange::BlockExchange`], a long-running engine that multiplexes header and body
//!   requests across peers and reassembles the results in memory;
//! - the two [`stage::Stage`]s (headers, bodies) that drain the exchange's cursors and commit
//!   to the database, one write batch per pass;
//! - the [`stage_loop::StageLoop`] that runs the stages forward in order and rewinds them, in
//!   reverse order, when one of them detects an inconsistency.

mod config;
mod error;

pub mod metrics;

pub mod chain;
pub mod exchange;
pub mod messages;
pub mod stage;
pub mod stage_loop;
pub mod stages;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::Context;
use hc_db::HematiteBackend;
use hc_sentry::{set_status_and_handshake, SentryClient, Status};
use hp_utils::service::ServiceContext;
use tokio::task::JoinSet;

pub use config::SyncConfig;
pub use error::SyncError;
pub use exchange::{BlockExchange, ExchangeHandle};

/// Current chain position, as advertised to the sentry.
fn chain_status(backend: &HematiteBackend) -> Result<Status, SyncError> {
    let chain_config = backend.chain_config();
    let (head_n, head_hash, head_td) = backend
        .head_info()?
        .ok_or_else(|| hc_db::StorageError::inconsistency("sync started before genesis was written"))?;
    Ok(Status {
        network_id: chain_config.network_id,
        total_difficulty: head_td,
        best_hash: head_hash,
        genesis_hash: chain_config.genesis_hash,
        fork_id: chain_config.fork_id(head_n),
        max_block: head_n,
    })
}

/// Publishes our status again whenever the canonical head has moved.
async fn status_loop(
    backend: Arc<HematiteBackend>,
    sentry: Arc<dyn SentryClient>,
    ctx: ServiceContext,
) -> anyhow::Result<()> {
    let mut last_published = backend.chain_head().headers.get();
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while ctx.run_until_cancelled(interval.tick()).await.is_some() {
        let head = backend.chain_head().headers.get();
        if head == last_published {
            continue;
        }
        let status = chain_status(&backend)?;
        match sentry.set_status(status).await {
            Ok(()) => last_published = head,
            Err(err) if err.is_cancelled() => break,
            Err(err) => return Err(err).context("Re-publishing sentry status"),
        }
    }
    Ok(())
}

/// Entry point of the sync engine: handshake with the sentry, then run the block exchange and
/// the stage loop until cancellation or a fatal error.
pub async fn sync_worker(
    backend: Arc<HematiteBackend>,
    sentry: Arc<dyn SentryClient>,
    config: SyncConfig,
    ctx: ServiceContext,
) -> anyhow::Result<()> {
    let config = Arc::new(config);

    set_status_and_handshake(&*sentry, chain_status(&backend)?).await.context("Sentry handshake")?;

    let (exchange, handle) = BlockExchange::new(Arc::clone(&backend), Arc::clone(&sentry), Arc::clone(&config));

    let headers_stage = stages::HeadersStage::new(Arc::clone(&backend), handle.clone(), Arc::clone(&config), ctx.child());
    let bodies_stage = stages::BodiesStage::new(Arc::clone(&backend), handle.clone(), Arc::clone(&config), ctx.child());
    let mut stage_loop =
        stage_loop::StageLoop::new(vec![Box::new(headers_stage), Box::new(bodies_stage)], Arc::clone(&config));

    let mut join_set = JoinSet::new();
    join_set.spawn(exchange.run(ctx.child()));
    join_set.spawn(status_loop(Arc::clone(&backend), Arc::clone(&sentry), ctx.child()));
    let loop_ctx = ctx.child();
    join_set.spawn(async move { stage_loop.run(loop_ctx).await.context("Stage loop") });

    // The first task error takes the engine down; the others observe the cancellation.
    let mut result = Ok(());
    while let Some(res) = join_set.join_next().await {
        match res.context("Sync task panicked") {
            Ok(Ok(())) => {}
            Ok(Err(err)) | Err(err) => {
                if result.is_ok() {
                    result = Err(err);
                }
                ctx.cancel_local();
            }
        }
    }
    result
}
