//! The sentry RPC surface, as consumed by the sync engine.

use alloy_primitives::{Bytes, B256, B512, U256};
use futures::stream::BoxStream;
use hp_chain_config::ForkId;

use crate::eth::{EthMessage, EthMessageId};
use crate::SentryError;

/// 64-byte peer identifier assigned by the sentry.
pub type PeerId = B512;

/// The eth protocol generation this engine speaks. Anything older cannot carry request ids.
pub const ETH_PROTOCOL_VERSION: u32 = 66;

/// Reason a peer is reported to the sentry for disconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    /// Served a header or body that fails validation.
    BadBlock,
    /// Re-sent headers we already hold.
    DuplicateHeader,
    /// Sent headers that contradict the chain they claim to extend.
    WrongBlock,
    /// Header seal does not verify.
    InvalidSeal,
    /// Repeatedly let body requests expire.
    Timeout,
}

/// Chain position advertised to the sentry, which forwards it to peers during their handshake.
#[derive(Debug, Clone)]
pub struct Status {
    pub network_id: u64,
    pub total_difficulty: U256,
    pub best_hash: B256,
    pub genesis_hash: B256,
    pub fork_id: ForkId,
    pub max_block: u64,
}

/// A message received from a peer, payload still RLP.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: EthMessageId,
    pub peer_id: PeerId,
    pub data: Bytes,
}

/// Client surface of the sentry daemon.
///
/// All send calls return the set of peers the message was handed to; an empty set means no peer
/// qualified and the caller is expected to back off and retry.
#[async_trait::async_trait]
pub trait SentryClient: Send + Sync + 'static {
    async fn set_status(&self, status: Status) -> Result<(), SentryError>;

    /// Confirms the sentry is ready and returns the eth protocol version it speaks.
    async fn hand_shake(&self) -> Result<u32, SentryError>;

    async fn penalize_peer(&self, peer_id: PeerId, penalty: Penalty) -> Result<(), SentryError>;

    async fn peer_min_block(&self, peer_id: PeerId, block_n: u64) -> Result<(), SentryError>;

    async fn send_message_by_id(&self, peer_id: PeerId, message: &EthMessage) -> Result<Vec<PeerId>, SentryError>;

    async fn send_message_by_min_block(&self, min_block: u64, message: &EthMessage)
        -> Result<Vec<PeerId>, SentryError>;

    async fn send_message_to_random_peers(
        &self,
        max_peers: u64,
        message: &EthMessage,
    ) -> Result<Vec<PeerId>, SentryError>;

    async fn send_message_to_all(&self, message: &EthMessage) -> Result<Vec<PeerId>, SentryError>;

    /// Subscribes to inbound messages with the given ids.
    async fn messages(
        &self,
        ids: Vec<EthMessageId>,
    ) -> Result<BoxStream<'static, Result<InboundMessage, SentryError>>, SentryError>;

    async fn peer_count(&self) -> Result<u64, SentryError>;
}

/// Connection lifecycle: publish our status, then confirm the sentry agrees on the protocol.
///
/// Run once at startup and again whenever the canonical head moves.
pub async fn set_status_and_handshake<S: SentryClient + ?Sized>(
    sentry: &S,
    status: Status,
) -> Result<(), SentryError> {
    sentry.set_status(status).await?;
    let protocol = sentry.hand_shake().await?;
    if protocol < ETH_PROTOCOL_VERSION {
        return Err(SentryError::ProtocolMismatch(protocol));
    }
    tracing::debug!("Sentry handshake done, protocol eth/{protocol}");
    Ok(())
}
