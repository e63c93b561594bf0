//! Outbound messages, one variant per kind.
//!
//! Fan-out and timeout policy is a property of the variant, not of the call site: header and
//! body requests go to a single peer chosen by chain position, announcements are broadcast,
//! replies and penalisations are unicast to the peer that triggered them.

use std::time::Duration;

use hc_sentry::eth::{
    BlockBodiesMessage, BlockHashAndNumber, BlockHeadersMessage, EthMessage, GetBlockBodiesMessage,
    GetBlockHeadersMessage, GetBlockHeadersParams, NewBlockHashesMessage, NewBlockMessage,
};
use hc_sentry::{Penalty, PeerId, SentryClient, SentryError};
use hp_block::Header;

/// Gossip fan-out for re-broadcast `NewBlock` announcements.
const NEW_BLOCK_GOSSIP_PEERS: u64 = 8;

#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Header request: single peer that has at least `min_block`, bounded call.
    GetBlockHeaders { request_id: u64, params: GetBlockHeadersParams, min_block: u64 },
    /// Body request: unicast when a peer has been picked, by chain position otherwise.
    GetBlockBodies { request_id: u64, hashes: Vec<alloy_primitives::B256>, min_block: u64, peer: Option<PeerId> },
    /// Announcement of freshly persisted blocks: broadcast.
    NewBlockHashes(Vec<BlockHashAndNumber>),
    /// Re-broadcast of a block announcement: a random subset of peers.
    NewBlock(Box<NewBlockMessage>),
    /// Reply to an inbound header query: unicast.
    BlockHeaders { peer: PeerId, request_id: u64, headers: Vec<Header> },
    /// Reply to an inbound body query: unicast.
    BlockBodies { peer: PeerId, request_id: u64, bodies: Vec<hp_block::BlockBody> },
    /// Best effort; failures are logged by the caller and never retried.
    Penalize { peer: PeerId, penalty: Penalty },
}

impl OutboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetBlockHeaders { .. } => "GetBlockHeaders",
            Self::GetBlockBodies { .. } => "GetBlockBodies",
            Self::NewBlockHashes(_) => "NewBlockHashes",
            Self::NewBlock(_) => "NewBlock",
            Self::BlockHeaders { .. } => "BlockHeaders",
            Self::BlockBodies { .. } => "BlockBodies",
            Self::Penalize { .. } => "Penalize",
        }
    }

    /// One-line content summary for the trace logs.
    pub fn summary(&self) -> String {
        match self {
            Self::GetBlockHeaders { request_id, params, .. } => {
                format!("req_id={request_id} origin={:?} amount={}", params.origin, params.amount)
            }
            Self::GetBlockBodies { request_id, hashes, .. } => {
                format!("req_id={request_id} blocks={}", hashes.len())
            }
            Self::NewBlockHashes(hashes) => format!("hashes={}", hashes.len()),
            Self::NewBlock(message) => format!("block={}", message.block.header.number),
            Self::BlockHeaders { request_id, headers, .. } => {
                format!("req_id={request_id} headers={}", headers.len())
            }
            Self::BlockBodies { request_id, bodies, .. } => format!("req_id={request_id} bodies={}", bodies.len()),
            Self::Penalize { peer, penalty } => format!("peer={peer} reason={penalty:?}"),
        }
    }

    /// Performs the sentry call with this variant's fan-out policy. Returns the peers the
    /// message was handed to; empty means no peer qualified.
    pub async fn execute<S: SentryClient + ?Sized>(
        &self,
        sentry: &S,
        call_timeout: Duration,
    ) -> Result<Vec<PeerId>, SentryError> {
        let call = async {
            match self {
                Self::GetBlockHeaders { request_id, params, min_block } => {
                    let message = EthMessage::GetBlockHeaders(GetBlockHeadersMessage {
                        request_id: *request_id,
                        params: *params,
                    });
                    sentry.send_message_by_min_block(*min_block, &message).await
                }
                Self::GetBlockBodies { request_id, hashes, min_block, peer } => {
                    let message = EthMessage::GetBlockBodies(GetBlockBodiesMessage {
                        request_id: *request_id,
                        hashes: hashes.clone(),
                    });
                    match peer {
                        Some(peer) => sentry.send_message_by_id(*peer, &message).await,
                        None => sentry.send_message_by_min_block(*min_block, &message).await,
                    }
                }
                Self::NewBlockHashes(hashes) => {
                    let message = EthMessage::NewBlockHashes(NewBlockHashesMessage(hashes.clone()));
                    sentry.send_message_to_all(&message).await
                }
                Self::NewBlock(message) => {
                    let message = EthMessage::NewBlock(message.clone());
                    sentry.send_message_to_random_peers(NEW_BLOCK_GOSSIP_PEERS, &message).await
                }
                Self::BlockHeaders { peer, request_id, headers } => {
                    let message = EthMessage::BlockHeaders(BlockHeadersMessage {
                        request_id: *request_id,
                        headers: headers.clone(),
                    });
                    sentry.send_message_by_id(*peer, &message).await
                }
                Self::BlockBodies { peer, request_id, bodies } => {
                    let message = EthMessage::BlockBodies(BlockBodiesMessage {
                        request_id: *request_id,
                        bodies: bodies.clone(),
                    });
                    sentry.send_message_by_id(*peer, &message).await
                }
                Self::Penalize { peer, penalty } => sentry.penalize_peer(*peer, *penalty).await.map(|()| Vec::new()),
            }
        };
        match tokio::time::timeout(call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SentryError::Timeout),
        }
    }
}
