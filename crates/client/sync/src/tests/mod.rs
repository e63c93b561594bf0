//! Mocks the sentry and its peers, and checks the behavior of the download engine in isolation.


use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::B256;
use hc_db::HematiteBackend;
use hc_sentry::eth::{
    BlockBodiesMessage, BlockHashAndNumber, BlockHeadersMessage, EthMessage, HashOrNumber, NewBlockHashesMessage,
};
use hc_sentry::mock::MockSentry;
use hc_sentry::PeerId;
use hp_block::test_utils::{build_chain_with_bodies, dev_genesis};
use hp_block::{BlockBody, SealedHeader};
use hp_chain_config::ChainConfig;
use hp_utils::AbortOnDrop;

use crate::SyncConfig;

pub(crate) fn peer(n: u8) -> PeerId {
    PeerId::repeat_byte(n)
}

/// A generated chain plus everything needed to emulate peers serving it.
pub(crate) struct TestNet {
    pub chain_config: Arc<ChainConfig>,
    pub backend: Arc<HematiteBackend>,
    pub genesis: SealedHeader,
    pub headers: Vec<SealedHeader>,
    pub bodies_by_hash: HashMap<B256, BlockBody>,
    pub sentry: Arc<MockSentry>,
}

impl TestNet {
    pub fn new(len: usize) -> Self {
        let mut chain_config = ChainConfig::dev();
        let genesis = dev_genesis(&chain_config);
        chain_config.genesis_hash = genesis.hash();
        let chain_config = Arc::new(chain_config);

        let bodies: Vec<BlockBody> = (0..len).map(|i| hp_block::test_utils::sample_body(i % 5)).collect();
        let headers = build_chain_with_bodies(&chain_config, &genesis, &bodies);
        let bodies_by_hash = headers.iter().map(SealedHeader::hash).zip(bodies).collect();

        let backend = HematiteBackend::open_for_testing(Arc::clone(&chain_config));
        backend.init_genesis(&genesis).unwrap();

        Self { chain_config, backend, genesis, headers, bodies_by_hash, sentry: Arc::new(MockSentry::new()) }
    }

    /// Engine tunables suited to a paused-clock test: no real-time rate limits. Deadlines and
    /// retry intervals run on the monotonic clock, which barely moves under a paused runtime.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            anchor_retry_interval: std::time::Duration::ZERO,
            max_anchor_retries: u32::MAX,
            no_peer_delay: std::time::Duration::from_millis(1),
            ..Default::default()
        }
    }

    pub fn tip_announcement(&self) -> EthMessage {
        let tip = self.headers.last().unwrap();
        EthMessage::NewBlockHashes(NewBlockHashesMessage(vec![BlockHashAndNumber {
            hash: tip.hash(),
            number: tip.number(),
        }]))
    }

    fn header_index(&self, hash: &B256) -> Option<usize> {
        self.headers.iter().position(|header| header.hash() == *hash)
    }

    /// Answers one header query the way a well-behaved peer would.
    fn serve_headers(&self, query: &hc_sentry::eth::GetBlockHeadersMessage) -> EthMessage {
        let amount = query.params.amount as usize;
        let headers: Vec<hp_block::Header> = match query.params.origin {
            HashOrNumber::Number(block_n) => {
                let start = (block_n.max(1) - 1) as usize;
                self.headers.iter().skip(start).take(amount).map(|h| h.header().clone()).collect()
            }
            HashOrNumber::Hash(hash) => match self.header_index(&hash) {
                Some(index) if query.params.reverse => {
                    let start = (index + 1).saturating_sub(amount);
                    self.headers[start..=index].iter().map(|h| h.header().clone()).collect()
                }
                Some(index) => self.headers.iter().skip(index).take(amount).map(|h| h.header().clone()).collect(),
                None => Vec::new(),
            },
        };
        EthMessage::BlockHeaders(BlockHeadersMessage { request_id: query.request_id, headers })
    }

    /// Answers one body query, in reverse order to exercise the matching.
    fn serve_bodies(&self, query: &hc_sentry::eth::GetBlockBodiesMessage) -> EthMessage {
        let mut bodies: Vec<BlockBody> =
            query.hashes.iter().filter_map(|hash| self.bodies_by_hash.get(hash).cloned()).collect();
        bodies.reverse();
        EthMessage::BlockBodies(BlockBodiesMessage { request_id: query.request_id, bodies })
    }

    /// Spawns a task that keeps answering the engine's requests from the generated chain.
    /// `tamper` may replace any served message before delivery.
    pub fn spawn_responder(
        self: &Arc<Self>,
        tamper: impl Fn(EthMessage) -> EthMessage + Send + Sync + 'static,
    ) -> AbortOnDrop<()> {
        let net = Arc::clone(self);
        AbortOnDrop::spawn(async move {
            let mut served = 0;
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                let sent = net.sentry.sent();
                for record in &sent[served..] {
                    // Unanswered sends (no delivery peers) stay unanswered, like on a real net.
                    let Some(&responding_peer) = record.peers.first() else { continue };
                    let reply = match &record.message {
                        EthMessage::GetBlockHeaders(query) => Some(net.serve_headers(query)),
                        EthMessage::GetBlockBodies(query) => Some(net.serve_bodies(query)),
                        _ => None,
                    };
                    if let Some(reply) = reply {
                        net.sentry.push_inbound(responding_peer, &tamper(reply));
                    }
                }
                served = sent.len();
            }
        })
    }
}

/// Polls until the headers and bodies stages have both reached `height`.
pub(crate) async fn wait_for_height(backend: &HematiteBackend, height: u64) {
    loop {
        let head = backend.chain_head();
        if head.headers.get() >= Some(height) && head.bodies.get() >= Some(height) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
