pub mod body_sequence;
pub mod header_chain;

pub use body_sequence::{ArrivedBlock, BodyRequest, BodySequence};
pub use header_chain::HeaderChain;

use hc_sentry::{Penalty, PeerId};

/// A penalisation waiting to be delivered to the sentry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPenalty {
    pub peer: PeerId,
    pub penalty: Penalty,
}
