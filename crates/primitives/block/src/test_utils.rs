//! Deterministic chain generators shared by the db and sync test suites.

use alloy_consensus::constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH};
use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_primitives::{Bytes, Signature, TxKind, B256, U256};
use hp_chain_config::ChainConfig;

use crate::difficulty::canonical_difficulty;
use crate::{BlockBody, Header, SealedHeader};

const TEST_GAS_LIMIT: u64 = 8_000_000;
/// Block spacing chosen so the difficulty schedule keeps the difficulty flat on the dev chain.
const TEST_BLOCK_TIME: u64 = 10;

/// Genesis header matching the given chain config's difficulty and timestamp.
pub fn dev_genesis(config: &ChainConfig) -> SealedHeader {
    SealedHeader::new(Header {
        parent_hash: B256::ZERO,
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        state_root: EMPTY_ROOT_HASH,
        transactions_root: EMPTY_ROOT_HASH,
        receipts_root: EMPTY_ROOT_HASH,
        difficulty: config.genesis_difficulty,
        number: 0,
        gas_limit: TEST_GAS_LIMIT,
        timestamp: config.genesis_timestamp,
        ..Default::default()
    })
}

/// `len` consecutive empty-bodied children of `genesis`, each passing the full header checks.
pub fn build_chain(config: &ChainConfig, genesis: &SealedHeader, len: usize) -> Vec<SealedHeader> {
    build_chain_with_bodies(config, genesis, &vec![BlockBody::default(); len])
}

/// A chain whose header commitments bind the given bodies, one block per body.
pub fn build_chain_with_bodies(
    config: &ChainConfig,
    genesis: &SealedHeader,
    bodies: &[BlockBody],
) -> Vec<SealedHeader> {
    let mut chain = Vec::with_capacity(bodies.len());
    let mut parent = genesis.clone();
    for body in bodies {
        let timestamp = parent.timestamp + TEST_BLOCK_TIME;
        let header = Header {
            parent_hash: parent.hash(),
            ommers_hash: body.ommers_hash(),
            state_root: EMPTY_ROOT_HASH,
            transactions_root: body.transactions_root(),
            receipts_root: EMPTY_ROOT_HASH,
            difficulty: canonical_difficulty(parent.header(), timestamp, config),
            number: parent.number() + 1,
            gas_limit: TEST_GAS_LIMIT,
            timestamp,
            ..Default::default()
        };
        let sealed = SealedHeader::new(header);
        chain.push(sealed.clone());
        parent = sealed;
    }
    chain
}

/// A body with `tx_count` legacy transactions. The signatures are junk; only the commitments
/// matter to the download pipeline.
pub fn sample_body(tx_count: usize) -> BlockBody {
    let transactions = (0..tx_count)
        .map(|i| {
            let tx = TxLegacy {
                chain_id: None,
                nonce: i as u64,
                gas_price: 1,
                gas_limit: 21_000,
                to: TxKind::Create,
                value: U256::from(i),
                input: Bytes::new(),
            };
            let signature = Signature::new(U256::from(1), U256::from(1), false);
            TxEnvelope::Legacy(tx.into_signed(signature))
        })
        .collect();
    BlockBody { transactions, ommers: vec![] }
}
