//! Hematite node command line.

mod cli;
mod genesis;
mod service;

use anyhow::Context;
use clap::Parser;
use cli::RunCmd;
use hc_db::DatabaseService;
use hc_sentry::SentryGrpcClient;
use hp_utils::service::ServiceMonitor;
use service::SyncService;
use std::sync::Arc;

const GREET_SUPPORT_URL: &str = "https://github.com/hematite-eth/hematite/issues";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let run_cmd = RunCmd::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (chain_config, genesis) = run_cmd.chain_config().context("Assembling chain config")?;
    // Chains without implemented consensus rules are refused before any service starts.
    chain_config.ensure_supported()?;

    tracing::info!("🪨 Hematite Node");
    tracing::info!("✌️  Version {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("💁 Support URL: {}", GREET_SUPPORT_URL);
    tracing::info!("🌐 Network: {} (chain id {})", chain_config.chain_name, chain_config.chain_id);
    tracing::info!("🧱 Genesis: {:#x}", chain_config.genesis_hash);

    // ===================================================================== //
    //                             SERVICES (SETUP)                          //
    // ===================================================================== //

    let service_db =
        DatabaseService::new(&run_cmd.db_params.base_path, Arc::clone(&chain_config)).context("Initializing db service")?;

    service_db.backend().init_genesis(&genesis).context("Writing genesis block")?;

    tracing::info!("📡 Sentry: {}", run_cmd.sentry_params.sentry_url);
    let sentry = SentryGrpcClient::connect(&run_cmd.sentry_params.sentry_url)
        .await
        .context("Connecting to the sentry")?;

    let service_sync = SyncService::new(
        Arc::clone(service_db.backend()),
        Arc::new(sentry),
        run_cmd.sync_params.sync_config(),
    );

    // ===================================================================== //
    //                             SERVICES (START)                          //
    // ===================================================================== //

    let app = ServiceMonitor::default().with(service_db).with(service_sync);
    app.start().await?;

    anyhow::Ok(())
}
