//! Chain identity for the sync engine: network/chain ids, genesis, the hard-fork schedule,
//! the EIP-2124 fork id derived from it, and the preverified checkpoint table.

mod chain_config;
mod fork_id;
mod preverified;

pub use chain_config::{ChainConfig, ConsensusKind, UnsupportedChainError};
pub use fork_id::{ForkFilter, ForkId, Head, ValidationError};
pub use preverified::PreverifiedHashes;
