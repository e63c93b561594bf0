//! Header and body validation rules enforced by the download pipeline.
//!
//! Standalone checks run when headers first enter the in-memory chain graph; parent-dependent
//! checks (including the difficulty recomputation that stands in for seal validity) run when a
//! header is persisted, where the predecessor is always at hand. Bodies are checked against
//! their header's commitments at ingestion.

use alloy_primitives::{B256, U256};
use hp_chain_config::ChainConfig;

use crate::difficulty::canonical_difficulty;
use crate::{BlockBody, Header, SealedHeader};

/// Headers below the frontier gas floor are malformed on every supported chain.
const MIN_GAS_LIMIT: u64 = 5_000;
/// Maximum extra-data payload.
const MAX_EXTRA_DATA_BYTES: usize = 32;
/// Denominator of the per-block gas limit drift bound.
const GAS_LIMIT_BOUND_DIVISOR: u64 = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("Parent hash mismatch: expected {expected:#x}, got {got:#x}")]
    ParentHash { got: B256, expected: B256 },
    #[error("Block number mismatch: expected {expected}, got {got}")]
    BlockNumber { got: u64, expected: u64 },
    #[error("Timestamp {got} not after parent timestamp {parent}")]
    TimestampNotIncreasing { got: u64, parent: u64 },
    #[error("Gas used {gas_used} exceeds gas limit {gas_limit}")]
    GasUsedExceedsLimit { gas_used: u64, gas_limit: u64 },
    #[error("Gas limit {got} drifted more than 1/{GAS_LIMIT_BOUND_DIVISOR} from parent {parent}")]
    GasLimitOutOfBounds { got: u64, parent: u64 },
    #[error("Gas limit {got} below minimum {MIN_GAS_LIMIT}")]
    GasLimitTooLow { got: u64 },
    #[error("Extra data too long: {len} bytes")]
    ExtraDataTooLong { len: usize },
    #[error("Invalid seal: difficulty mismatch, expected {expected}, got {got}")]
    Difficulty { got: U256, expected: U256 },
    #[error("Invalid seal: zero difficulty on a proof-of-work chain")]
    ZeroDifficulty,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    #[error("Transactions root mismatch: expected {expected:#x}, got {got:#x}")]
    TransactionsRoot { got: B256, expected: B256 },
    #[error("Ommers hash mismatch: expected {expected:#x}, got {got:#x}")]
    OmmersHash { got: B256, expected: B256 },
}

/// Checks that need no parent context. Run on every header entering the chain graph.
pub fn validate_header_standalone(header: &Header) -> Result<(), HeaderError> {
    if header.extra_data.len() > MAX_EXTRA_DATA_BYTES {
        return Err(HeaderError::ExtraDataTooLong { len: header.extra_data.len() });
    }
    if header.gas_limit < MIN_GAS_LIMIT {
        return Err(HeaderError::GasLimitTooLow { got: header.gas_limit });
    }
    if header.gas_used > header.gas_limit {
        return Err(HeaderError::GasUsedExceedsLimit { gas_used: header.gas_used, gas_limit: header.gas_limit });
    }
    if header.difficulty.is_zero() {
        return Err(HeaderError::ZeroDifficulty);
    }
    Ok(())
}

/// Parent-dependent checks, including the canonical-difficulty recomputation.
pub fn validate_header_against_parent(
    header: &Header,
    parent: &SealedHeader,
    config: &ChainConfig,
) -> Result<(), HeaderError> {
    if header.number != parent.number() + 1 {
        return Err(HeaderError::BlockNumber { got: header.number, expected: parent.number() + 1 });
    }
    if header.parent_hash != parent.hash() {
        return Err(HeaderError::ParentHash { got: header.parent_hash, expected: parent.hash() });
    }
    if header.timestamp <= parent.timestamp {
        return Err(HeaderError::TimestampNotIncreasing { got: header.timestamp, parent: parent.timestamp });
    }

    let bound = parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR;
    if header.gas_limit.abs_diff(parent.gas_limit) >= bound {
        return Err(HeaderError::GasLimitOutOfBounds { got: header.gas_limit, parent: parent.gas_limit });
    }

    let expected = canonical_difficulty(parent.header(), header.timestamp, config);
    if header.difficulty != expected {
        return Err(HeaderError::Difficulty { got: header.difficulty, expected });
    }

    Ok(())
}

/// Body-to-header binding: the recomputed commitments must match the header.
pub fn validate_body(body: &BlockBody, header: &Header) -> Result<(), BodyError> {
    let transactions_root = body.transactions_root();
    if transactions_root != header.transactions_root {
        return Err(BodyError::TransactionsRoot { got: transactions_root, expected: header.transactions_root });
    }
    let ommers_hash = body.ommers_hash();
    if ommers_hash != header.ommers_hash {
        return Err(BodyError::OmmersHash { got: ommers_hash, expected: header.ommers_hash });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_chain, dev_genesis};

    #[test]
    fn generated_chain_passes_parent_checks() {
        let config = ChainConfig::dev();
        let genesis = dev_genesis(&config);
        let chain = build_chain(&config, &genesis, 5);

        let mut parent = genesis;
        for header in chain {
            validate_header_standalone(header.header()).unwrap();
            validate_header_against_parent(header.header(), &parent, &config).unwrap();
            parent = header;
        }
    }

    #[test]
    fn wrong_difficulty_is_an_invalid_seal() {
        let config = ChainConfig::dev();
        let genesis = dev_genesis(&config);
        let chain = build_chain(&config, &genesis, 1);

        let mut header = chain[0].header().clone();
        header.difficulty += U256::from(1);
        assert!(matches!(
            validate_header_against_parent(&header, &genesis, &config),
            Err(HeaderError::Difficulty { .. })
        ));
    }

    #[test]
    fn parent_mismatches_are_reported() {
        let config = ChainConfig::dev();
        let genesis = dev_genesis(&config);
        let chain = build_chain(&config, &genesis, 2);

        // Child of genesis checked against block 1.
        let err = validate_header_against_parent(chain[0].header(), &chain[1], &config).unwrap_err();
        assert!(matches!(err, HeaderError::BlockNumber { .. }));

        let mut header = chain[1].header().clone();
        header.parent_hash = B256::ZERO;
        let err = validate_header_against_parent(&header, &chain[0], &config).unwrap_err();
        assert!(matches!(err, HeaderError::ParentHash { .. }));
    }

    #[test]
    fn standalone_rejects_malformed_headers() {
        let config = ChainConfig::dev();
        let genesis = dev_genesis(&config);
        let good = build_chain(&config, &genesis, 1).remove(0);

        let mut header = good.header().clone();
        header.extra_data = vec![0u8; 33].into();
        assert!(matches!(validate_header_standalone(&header), Err(HeaderError::ExtraDataTooLong { .. })));

        let mut header = good.header().clone();
        header.gas_used = header.gas_limit + 1;
        assert!(matches!(validate_header_standalone(&header), Err(HeaderError::GasUsedExceedsLimit { .. })));

        let mut header = good.header().clone();
        header.difficulty = U256::ZERO;
        assert!(matches!(validate_header_standalone(&header), Err(HeaderError::ZeroDifficulty)));
    }

    #[test]
    fn body_binding() {
        let body = BlockBody::default();
        let header = Header {
            transactions_root: body.transactions_root(),
            ommers_hash: body.ommers_hash(),
            ..Default::default()
        };
        validate_body(&body, &header).unwrap();

        let mut wrong = header.clone();
        wrong.transactions_root = B256::ZERO;
        assert!(matches!(validate_body(&body, &wrong), Err(BodyError::TransactionsRoot { .. })));

        let mut wrong = header;
        wrong.ommers_hash = B256::ZERO;
        assert!(matches!(validate_body(&body, &wrong), Err(BodyError::OmmersHash { .. })));
    }
}
