//! EIP-2124 fork identity, built from the chain's activation schedule.
//!
//! The fork id travels in the sentry status message; the fork filter validates the fork id
//! advertised by remote peers so that nodes on a different chain (or a stale fork of ours) are
//! disconnected during the handshake instead of feeding us useless headers.

pub use alloy_eip2124::{ForkFilter, ForkFilterKey, ForkId, Head, ValidationError};

use crate::ChainConfig;

impl ChainConfig {
    /// Fork filter positioned at the given head block.
    pub fn fork_filter(&self, head_block: u64) -> ForkFilter {
        let head = Head { number: head_block, ..Default::default() };
        ForkFilter::new(
            head,
            self.genesis_hash,
            self.genesis_timestamp,
            self.distinct_fork_blocks().into_iter().map(ForkFilterKey::Block),
        )
    }

    /// Our EIP-2124 fork id at the given head block.
    pub fn fork_id(&self, head_block: u64) -> ForkId {
        self.fork_filter(head_block).current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_id_changes_across_activations() {
        let config = ChainConfig::mainnet();
        let genesis_id = config.fork_id(0);
        let homestead_id = config.fork_id(1_150_000);
        assert_ne!(genesis_id.hash, homestead_id.hash);
        // `next` always points at the first activation strictly above the head.
        assert_eq!(genesis_id.next, 1_150_000);
        assert_eq!(homestead_id.next, 1_920_000);
        // Past the last fork there is nothing to announce.
        assert_eq!(config.fork_id(20_000_000).next, 0);
    }

    #[test]
    fn same_chain_same_height_validates() {
        let config = ChainConfig::mainnet();
        let filter = config.fork_filter(12_000_000);
        assert!(filter.validate(config.fork_id(12_000_000)).is_ok());
    }

    #[test]
    fn different_genesis_is_rejected() {
        let mainnet = ChainConfig::mainnet();
        let sepolia = ChainConfig::sepolia();
        let filter = mainnet.fork_filter(0);
        assert!(filter.validate(sepolia.fork_id(0)).is_err());
    }
}
