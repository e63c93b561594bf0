//! Reply path for inbound queries about already-persisted blocks.
//!
//! This is the only serving the engine does: peers asking for headers or bodies we hold get an
//! answer assembled from the store; everything else they send is sync input or discarded.

use hc_db::HematiteBackend;
use hc_sentry::eth::{GetBlockBodiesMessage, GetBlockHeadersMessage, HashOrNumber};
use hc_sentry::PeerId;
use hp_block::Header;

use crate::messages::OutboundMessage;
use crate::SyncError;

/// Caps on what a single inbound query may ask of the store.
const MAX_HEADERS_SERVED: u64 = 1024;
const MAX_BODIES_SERVED: usize = 256;

pub fn reply_to_get_block_headers(
    backend: &HematiteBackend,
    peer: PeerId,
    query: &GetBlockHeadersMessage,
) -> Result<OutboundMessage, SyncError> {
    let origin = match query.params.origin {
        HashOrNumber::Number(block_n) => Some(block_n),
        HashOrNumber::Hash(hash) => backend.get_block_number(&hash)?,
    };

    let mut headers: Vec<Header> = Vec::new();
    if let Some(origin) = origin {
        let amount = query.params.amount.min(MAX_HEADERS_SERVED);
        let stride = query.params.skip + 1;
        let mut block_n = Some(origin);
        for _ in 0..amount {
            let Some(current) = block_n else { break };
            let Some(header) = backend.get_canonical_header(current)? else { break };
            headers.push(header.into_header());
            block_n = if query.params.reverse { current.checked_sub(stride) } else { current.checked_add(stride) };
        }
    }

    Ok(OutboundMessage::BlockHeaders { peer, request_id: query.request_id, headers })
}

pub fn reply_to_get_block_bodies(
    backend: &HematiteBackend,
    peer: PeerId,
    query: &GetBlockBodiesMessage,
) -> Result<OutboundMessage, SyncError> {
    let mut bodies = Vec::new();
    for hash in query.hashes.iter().take(MAX_BODIES_SERVED) {
        let Some(block_n) = backend.get_block_number(hash)? else { continue };
        if let Some(body) = backend.get_body(block_n, hash)? {
            bodies.push(body);
        }
    }
    Ok(OutboundMessage::BlockBodies { peer, request_id: query.request_id, bodies })
}
