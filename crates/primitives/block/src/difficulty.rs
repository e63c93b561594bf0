//! Canonical proof-of-work difficulty schedule.
//!
//! Frontier, Homestead and Byzantium adjustment families plus the difficulty-bomb delays of the
//! later forks. This is the parent-dependent half of seal validity: a header whose difficulty
//! does not match the recomputation is not a valid child of its parent.

use alloy_consensus::constants::EMPTY_OMMER_ROOT_HASH;
use alloy_consensus::Header;
use alloy_primitives::U256;
use hp_chain_config::ChainConfig;

/// 2^17, the floor the adjustment never goes below.
const MIN_DIFFICULTY: u64 = 131_072;
/// Bomb period length in blocks.
const EXP_DIFF_PERIOD: u64 = 100_000;

fn active(fork: Option<u64>, block_n: u64) -> bool {
    fork.is_some_and(|activation| block_n >= activation)
}

fn bomb_delay(config: &ChainConfig, block_n: u64) -> u64 {
    if active(config.gray_glacier_block, block_n) {
        11_400_000
    } else if active(config.arrow_glacier_block, block_n) {
        10_700_000
    } else if active(config.london_block, block_n) {
        9_700_000
    } else if active(config.muir_glacier_block, block_n) {
        9_000_000
    } else if active(config.constantinople_block, block_n) {
        5_000_000
    } else if active(config.byzantium_block, block_n) {
        3_000_000
    } else {
        0
    }
}

/// Difficulty a child of `parent` sealed at `timestamp` must carry.
pub fn canonical_difficulty(parent: &Header, timestamp: u64, config: &ChainConfig) -> U256 {
    let block_n = parent.number + 1;
    let delta = timestamp.saturating_sub(parent.timestamp);
    let adjustment = parent.difficulty >> 11;

    let mut difficulty = if active(config.byzantium_block, block_n) {
        // Uncle-aware target: y = 2 when the parent has ommers.
        let y: u64 = if parent.ommers_hash == EMPTY_OMMER_ROOT_HASH { 1 } else { 2 };
        let quotient = delta / 9;
        if quotient <= y {
            parent.difficulty + adjustment * U256::from(y - quotient)
        } else {
            let magnitude = (quotient - y).min(99);
            parent.difficulty.saturating_sub(adjustment * U256::from(magnitude))
        }
    } else if active(config.homestead_block, block_n) {
        let quotient = delta / 10;
        if quotient <= 1 {
            parent.difficulty + adjustment * U256::from(1 - quotient)
        } else {
            let magnitude = (quotient - 1).min(99);
            parent.difficulty.saturating_sub(adjustment * U256::from(magnitude))
        }
    } else {
        // Frontier: fixed step either way around a 13 second target.
        if delta < 13 {
            parent.difficulty + adjustment
        } else {
            parent.difficulty.saturating_sub(adjustment)
        }
    };

    if difficulty < U256::from(MIN_DIFFICULTY) {
        difficulty = U256::from(MIN_DIFFICULTY);
    }

    // Difficulty bomb, on the fork-delayed block number.
    let fake_block_n = block_n.saturating_sub(bomb_delay(config, block_n));
    let period = fake_block_n / EXP_DIFF_PERIOD;
    if period > 1 {
        difficulty += U256::from(2).pow(U256::from(period - 2));
    }

    difficulty
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(number: u64, difficulty: u64, timestamp: u64) -> Header {
        Header {
            number,
            difficulty: U256::from(difficulty),
            timestamp,
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            ..Default::default()
        }
    }

    #[test]
    fn fast_blocks_raise_difficulty() {
        let config = ChainConfig::dev();
        let parent = parent(100, 10_000_000, 1_000);
        let fast = canonical_difficulty(&parent, 1_005, &config);
        let slow = canonical_difficulty(&parent, 1_100, &config);
        assert!(fast > parent.difficulty);
        assert!(slow < parent.difficulty);
        assert!(fast > slow);
    }

    #[test]
    fn never_below_minimum() {
        let config = ChainConfig::dev();
        let parent = parent(10, MIN_DIFFICULTY, 1_000);
        let diff = canonical_difficulty(&parent, 100_000, &config);
        assert_eq!(diff, U256::from(MIN_DIFFICULTY));
    }

    #[test]
    fn downward_adjustment_is_clamped() {
        let config = ChainConfig::dev();
        let parent = parent(100, 10_000_000, 1_000);
        // An absurdly late child only loses 99 adjustment quanta.
        let late = canonical_difficulty(&parent, u64::MAX / 2, &config);
        let floor = U256::from(10_000_000u64).saturating_sub((U256::from(10_000_000u64) >> 11) * U256::from(99u64));
        assert_eq!(late, floor.max(U256::from(MIN_DIFFICULTY)));
    }

    #[test]
    fn bomb_kicks_in_after_delay() {
        let mut config = ChainConfig::dev();
        config.constantinople_block = None;
        config.muir_glacier_block = None;
        config.berlin_block = None;
        // At block 3_200_000 with byzantium's 3_000_000 delay the fake block sits in period 2.
        let parent = parent(3_199_999, 10_000_000, 1_000);
        let with_bomb = canonical_difficulty(&parent, 1_009, &config);

        config.muir_glacier_block = Some(0);
        // With a bigger delay the bomb contribution disappears.
        let without_bomb = canonical_difficulty(&parent, 1_009, &config);
        assert_eq!(with_bomb, without_bomb + U256::from(1));
    }
}
