//! Genesis headers of the built-in networks.
//!
//! The headers are built in code so the binary is self contained; the computed hash is checked
//! against the chain config at startup, so a wrong constant cannot silently seed a wrong chain.

use alloy_consensus::constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH};
use alloy_primitives::{b256, bytes, B256, B64, U256};
use hp_block::{Header, SealedHeader};
use hp_chain_config::ChainConfig;

pub fn genesis_header(config: &ChainConfig) -> SealedHeader {
    match config.chain_name.as_str() {
        "mainnet" => mainnet(),
        "sepolia" => sepolia(),
        // Custom and dev chains: an empty genesis carrying the configured difficulty.
        _ => SealedHeader::new(Header {
            difficulty: config.genesis_difficulty,
            timestamp: config.genesis_timestamp,
            gas_limit: 8_000_000,
            ..empty_genesis()
        }),
    }
}

fn empty_genesis() -> Header {
    Header {
        parent_hash: B256::ZERO,
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        state_root: EMPTY_ROOT_HASH,
        transactions_root: EMPTY_ROOT_HASH,
        receipts_root: EMPTY_ROOT_HASH,
        number: 0,
        ..Default::default()
    }
}

fn mainnet() -> SealedHeader {
    SealedHeader::new(Header {
        state_root: b256!("d7f8974fb5ac78d9ac099b9ad5018bedc2ce0a72dad1827a1709da30580f0544"),
        difficulty: U256::from(0x400000000_u64),
        gas_limit: 5_000,
        timestamp: 0,
        extra_data: bytes!("11bbe8db4e347b4e8c937c1c8370e4b5ed33adb3db69cbdb7a38e1e50b1b82fa"),
        nonce: B64::new(0x42_u64.to_be_bytes()),
        ..empty_genesis()
    })
}

fn sepolia() -> SealedHeader {
    SealedHeader::new(Header {
        state_root: b256!("5eb6e371a698b8d68f665192350ffcecbbbf322916f4b51bd79bb6887da3f494"),
        difficulty: U256::from(0x20000),
        gas_limit: 0x1c9c380,
        timestamp: 0x6159af19,
        extra_data: bytes!("5365706f6c69612c20417468656e732c204174746963612c2047726565636521"),
        nonce: B64::ZERO,
        ..empty_genesis()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_genesis_matches_the_chain_config() {
        let config = ChainConfig::mainnet();
        assert_eq!(genesis_header(&config).hash(), config.genesis_hash);
    }

    #[test]
    fn sepolia_genesis_matches_the_chain_config() {
        let config = ChainConfig::sepolia();
        assert_eq!(genesis_header(&config).hash(), config.genesis_hash);
    }

    #[test]
    fn dev_genesis_is_deterministic() {
        let config = ChainConfig::dev();
        assert_eq!(genesis_header(&config).hash(), genesis_header(&config).hash());
    }
}
