//! Note: the chain presets are built in code, NOT read from files at runtime. The binary must be
//! self contained: a user running it outside a checkout of the repo still needs mainnet to work.
//! Use [`ChainConfig::from_yaml_file`] for custom chains and tests only.

use std::collections::BTreeSet;
use std::path::Path;

use alloy_primitives::{b256, B256, U256};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::preverified::PreverifiedHashes;

/// Consensus engine securing the chain's header seals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusKind {
    /// Proof-of-work chains (mainnet, sepolia pre-merge).
    Ethash,
    /// Proof-of-authority test networks. No rules implemented; rejected at startup.
    Clique,
}

#[derive(Debug, thiserror::Error)]
#[error("Consensus rules not implemented for chain `{chain_name}` (chain id {chain_id})")]
pub struct UnsupportedChainError {
    pub chain_name: String,
    pub chain_id: u64,
}

/// Static chain descriptor consumed by the sync handshake and header validation.
///
/// Fork fields are activation block numbers; `None` means the fork never activates on this
/// chain. The distinct set of activation blocks feeds the EIP-2124 fork id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_name: String,
    pub chain_id: u64,
    pub network_id: u64,
    pub genesis_hash: B256,
    pub genesis_timestamp: u64,
    pub genesis_difficulty: U256,
    pub consensus: ConsensusKind,

    pub homestead_block: Option<u64>,
    pub dao_block: Option<u64>,
    pub tangerine_block: Option<u64>,
    pub spurious_dragon_block: Option<u64>,
    pub byzantium_block: Option<u64>,
    pub constantinople_block: Option<u64>,
    pub petersburg_block: Option<u64>,
    pub istanbul_block: Option<u64>,
    pub muir_glacier_block: Option<u64>,
    pub berlin_block: Option<u64>,
    pub london_block: Option<u64>,
    pub arrow_glacier_block: Option<u64>,
    pub gray_glacier_block: Option<u64>,

    pub terminal_total_difficulty: Option<U256>,

    #[serde(default)]
    pub preverified: PreverifiedHashes,
}

impl ChainConfig {
    /// Ethereum mainnet.
    pub fn mainnet() -> Self {
        Self {
            chain_name: "mainnet".into(),
            chain_id: 1,
            network_id: 1,
            genesis_hash: b256!("d4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3"),
            genesis_timestamp: 0,
            genesis_difficulty: U256::from(17_179_869_184_u64),
            consensus: ConsensusKind::Ethash,
            homestead_block: Some(1_150_000),
            dao_block: Some(1_920_000),
            tangerine_block: Some(2_463_000),
            spurious_dragon_block: Some(2_675_000),
            byzantium_block: Some(4_370_000),
            constantinople_block: Some(7_280_000),
            petersburg_block: Some(7_280_000),
            istanbul_block: Some(9_069_000),
            muir_glacier_block: Some(9_200_000),
            berlin_block: Some(12_244_000),
            london_block: Some(12_965_000),
            arrow_glacier_block: Some(13_773_000),
            gray_glacier_block: Some(15_050_000),
            terminal_total_difficulty: Some(
                U256::from_str_radix("58750000000000000000000", 10).expect("valid decimal"),
            ),
            // No checkpoint data is bundled for the public presets; load a table with
            // `--preverified-hashes-path` to enable the fast-path rejection.
            preverified: PreverifiedHashes::default(),
        }
    }

    /// Sepolia test network.
    pub fn sepolia() -> Self {
        Self {
            chain_name: "sepolia".into(),
            chain_id: 11_155_111,
            network_id: 11_155_111,
            genesis_hash: b256!("25a5cc106eea7138acab33231d7160d69cb777ee0c2c553fcddf5138993e6dd9"),
            genesis_timestamp: 1_633_267_481,
            genesis_difficulty: U256::from(0x20000),
            consensus: ConsensusKind::Ethash,
            homestead_block: Some(0),
            dao_block: None,
            tangerine_block: Some(0),
            spurious_dragon_block: Some(0),
            byzantium_block: Some(0),
            constantinople_block: Some(0),
            petersburg_block: Some(0),
            istanbul_block: Some(0),
            muir_glacier_block: Some(0),
            berlin_block: Some(0),
            london_block: Some(0),
            arrow_glacier_block: None,
            gray_glacier_block: None,
            terminal_total_difficulty: Some(U256::from(17_000_000_000_000_000_u64)),
            preverified: PreverifiedHashes::default(),
        }
    }

    /// Goerli: clique, no consensus rules implemented. Kept so the startup error names the chain.
    pub fn goerli() -> Self {
        Self {
            chain_name: "goerli".into(),
            chain_id: 5,
            network_id: 5,
            genesis_hash: b256!("bf7e331f7f7c1dd2e05159666b3bf8bc7a8a3a9eb1d518969eab529dd9b88c1a"),
            genesis_timestamp: 1_548_854_791,
            genesis_difficulty: U256::from(1),
            consensus: ConsensusKind::Clique,
            homestead_block: Some(0),
            dao_block: None,
            tangerine_block: Some(0),
            spurious_dragon_block: Some(0),
            byzantium_block: Some(0),
            constantinople_block: Some(0),
            petersburg_block: Some(0),
            istanbul_block: Some(1_561_651),
            muir_glacier_block: None,
            berlin_block: Some(4_460_644),
            london_block: Some(5_062_605),
            arrow_glacier_block: None,
            gray_glacier_block: None,
            terminal_total_difficulty: Some(U256::from(10_790_000)),
            preverified: PreverifiedHashes::default(),
        }
    }

    /// Single-node dev chain: every fork active at genesis, caller supplies the genesis hash.
    pub fn dev() -> Self {
        Self {
            chain_name: "dev".into(),
            chain_id: 1337,
            network_id: 1337,
            genesis_hash: B256::ZERO,
            genesis_timestamp: 0,
            genesis_difficulty: U256::from(0x20000),
            consensus: ConsensusKind::Ethash,
            homestead_block: Some(0),
            dao_block: None,
            tangerine_block: Some(0),
            spurious_dragon_block: Some(0),
            byzantium_block: Some(0),
            constantinople_block: Some(0),
            petersburg_block: Some(0),
            istanbul_block: Some(0),
            muir_glacier_block: Some(0),
            berlin_block: Some(0),
            london_block: None,
            arrow_glacier_block: None,
            gray_glacier_block: None,
            terminal_total_difficulty: None,
            preverified: PreverifiedHashes::default(),
        }
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path).with_context(|| format!("Opening chain config at {}", path.display()))?;
        let config: Self = serde_yaml::from_reader(file).context("Parsing chain config")?;
        Ok(config)
    }

    /// Distinct fork activation blocks, ordered, genesis excluded. This is the EIP-2124 input.
    pub fn distinct_fork_blocks(&self) -> Vec<u64> {
        let forks: BTreeSet<u64> = [
            self.homestead_block,
            self.dao_block,
            self.tangerine_block,
            self.spurious_dragon_block,
            self.byzantium_block,
            self.constantinople_block,
            self.petersburg_block,
            self.istanbul_block,
            self.muir_glacier_block,
            self.berlin_block,
            self.london_block,
            self.arrow_glacier_block,
            self.gray_glacier_block,
        ]
        .into_iter()
        .flatten()
        .filter(|n| *n != 0)
        .collect();
        forks.into_iter().collect()
    }

    /// Chains without implemented consensus rules are rejected before any service starts.
    pub fn ensure_supported(&self) -> Result<(), UnsupportedChainError> {
        match self.consensus {
            ConsensusKind::Ethash => Ok(()),
            ConsensusKind::Clique => {
                Err(UnsupportedChainError { chain_name: self.chain_name.clone(), chain_id: self.chain_id })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_fork_schedule_is_ordered_and_distinct() {
        let config = ChainConfig::mainnet();
        let forks = config.distinct_fork_blocks();
        assert!(forks.windows(2).all(|w| w[0] < w[1]));
        // Constantinople and Petersburg activate at the same block and must collapse to one entry.
        assert_eq!(forks.iter().filter(|n| **n == 7_280_000).count(), 1);
        assert_eq!(forks.first(), Some(&1_150_000));
        assert_eq!(forks.last(), Some(&15_050_000));
    }

    #[test]
    fn clique_chains_are_rejected() {
        assert!(ChainConfig::goerli().ensure_supported().is_err());
        assert!(ChainConfig::mainnet().ensure_supported().is_ok());
    }

    #[test]
    fn yaml_round_trip() {
        let config = ChainConfig::sepolia();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: ChainConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.chain_id, config.chain_id);
        assert_eq!(back.genesis_hash, config.genesis_hash);
        assert_eq!(back.distinct_fork_blocks(), config.distinct_fork_blocks());
    }
}
