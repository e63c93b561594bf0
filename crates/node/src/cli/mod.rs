mod db;
mod sentry;
mod sync;

pub use db::DbParams;
pub use sentry::SentryParams;
pub use sync::SyncParams;

use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::B256;
use hp_block::SealedHeader;
use hp_chain_config::{ChainConfig, PreverifiedHashes};

use crate::genesis;

/// Built-in network presets.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum NetworkType {
    /// Ethereum mainnet.
    Mainnet,
    /// The Sepolia test network.
    Sepolia,
    /// The Goerli test network (no consensus rules implemented; refused at startup).
    Goerli,
    /// Single-node development chain.
    Dev,
}

impl NetworkType {
    fn chain_config(&self) -> ChainConfig {
        match self {
            NetworkType::Mainnet => ChainConfig::mainnet(),
            NetworkType::Sepolia => ChainConfig::sepolia(),
            NetworkType::Goerli => ChainConfig::goerli(),
            NetworkType::Dev => ChainConfig::dev(),
        }
    }
}

#[derive(Debug, clap::Parser)]
#[clap(name = "hematite", version, about = "Connect to a p2p sentry and run the header/body download stages")]
pub struct RunCmd {
    #[clap(flatten)]
    pub db_params: DbParams,

    #[clap(flatten)]
    pub sentry_params: SentryParams,

    #[clap(flatten)]
    pub sync_params: SyncParams,

    /// The network to sync.
    #[arg(env = "HEMATITE_NETWORK", long, value_enum, default_value_t = NetworkType::Mainnet)]
    pub network: NetworkType,

    /// Custom chain config file; overrides `--network`.
    #[arg(env = "HEMATITE_CHAIN_CONFIG_PATH", long, value_name = "PATH")]
    pub chain_config_path: Option<PathBuf>,

    /// Preverified checkpoint table to load on top of the chain config.
    #[arg(env = "HEMATITE_PREVERIFIED_HASHES_PATH", long, value_name = "PATH")]
    pub preverified_hashes_path: Option<PathBuf>,
}

impl RunCmd {
    /// Resolves the chain config and the matching genesis header.
    pub fn chain_config(&self) -> anyhow::Result<(Arc<ChainConfig>, SealedHeader)> {
        let mut config = match &self.chain_config_path {
            Some(path) => ChainConfig::from_yaml_file(path)?,
            None => self.network.chain_config(),
        };
        if let Some(path) = &self.preverified_hashes_path {
            config.preverified = PreverifiedHashes::from_yaml_file(path)?;
        }

        let genesis = genesis::genesis_header(&config);
        if config.genesis_hash == B256::ZERO {
            // Dev-style chains declare no genesis hash; adopt the built one.
            config.genesis_hash = genesis.hash();
        } else if config.genesis_hash != genesis.hash() {
            anyhow::bail!(
                "Genesis header for chain `{}` hashes to {:#x}, config says {:#x}",
                config.chain_name,
                genesis.hash(),
                config.genesis_hash
            );
        }
        Ok((Arc::new(config), genesis))
    }
}
