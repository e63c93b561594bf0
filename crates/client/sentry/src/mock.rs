//! In-process sentry double for the sync test suites.
//!
//! Records every outbound call and lets tests feed inbound messages through the same stream
//! interface the gRPC client exposes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::api::{InboundMessage, Penalty, PeerId, SentryClient, Status};
use crate::eth::{EthMessage, EthMessageId};
use crate::SentryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    ById(PeerId),
    ByMinBlock(u64),
    Random(u64),
    All,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub kind: SendKind,
    pub message: EthMessage,
    /// Peers the mock pretended to deliver to.
    pub peers: Vec<PeerId>,
}

pub struct MockSentry {
    peers: Mutex<Vec<PeerId>>,
    next_peer: AtomicUsize,
    sent: Mutex<Vec<SentMessage>>,
    penalties: Mutex<Vec<(PeerId, Penalty)>>,
    statuses: Mutex<Vec<Status>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
}

impl Default for MockSentry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSentry {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            peers: Mutex::new(Vec::new()),
            next_peer: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            penalties: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn with_peers(peers: Vec<PeerId>) -> Self {
        let mock = Self::new();
        mock.set_peers(peers);
        mock
    }

    pub fn set_peers(&self, peers: Vec<PeerId>) {
        *self.peers.lock().unwrap() = peers;
    }

    /// Feeds a message into the inbound stream, as if `peer` had sent it.
    pub fn push_inbound(&self, peer: PeerId, message: &EthMessage) {
        let inbound = InboundMessage { id: message.id(), peer_id: peer, data: message.encoded() };
        if let Some(tx) = self.inbound_tx.lock().unwrap().as_ref() {
            let _ = tx.send(inbound);
        }
    }

    /// Closes the inbound stream, as the sentry does during shutdown.
    pub fn close_inbound(&self) {
        self.inbound_tx.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self, id: EthMessageId) -> usize {
        self.sent.lock().unwrap().iter().filter(|m| m.message.id() == id).count()
    }

    pub fn penalties(&self) -> Vec<(PeerId, Penalty)> {
        self.penalties.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().unwrap().clone()
    }

    fn record(&self, kind: SendKind, message: &EthMessage, peers: Vec<PeerId>) -> Vec<PeerId> {
        self.sent.lock().unwrap().push(SentMessage { kind, message: message.clone(), peers: peers.clone() });
        peers
    }

    fn pick_one(&self) -> Vec<PeerId> {
        let peers = self.peers.lock().unwrap();
        if peers.is_empty() {
            return Vec::new();
        }
        let index = self.next_peer.fetch_add(1, Ordering::Relaxed) % peers.len();
        vec![peers[index]]
    }
}

#[async_trait::async_trait]
impl SentryClient for MockSentry {
    async fn set_status(&self, status: Status) -> Result<(), SentryError> {
        self.statuses.lock().unwrap().push(status);
        Ok(())
    }

    async fn hand_shake(&self) -> Result<u32, SentryError> {
        Ok(crate::ETH_PROTOCOL_VERSION)
    }

    async fn penalize_peer(&self, peer_id: PeerId, penalty: Penalty) -> Result<(), SentryError> {
        self.penalties.lock().unwrap().push((peer_id, penalty));
        Ok(())
    }

    async fn peer_min_block(&self, _peer_id: PeerId, _block_n: u64) -> Result<(), SentryError> {
        Ok(())
    }

    async fn send_message_by_id(&self, peer_id: PeerId, message: &EthMessage) -> Result<Vec<PeerId>, SentryError> {
        let delivered = if self.peers.lock().unwrap().contains(&peer_id) { vec![peer_id] } else { Vec::new() };
        Ok(self.record(SendKind::ById(peer_id), message, delivered))
    }

    async fn send_message_by_min_block(
        &self,
        min_block: u64,
        message: &EthMessage,
    ) -> Result<Vec<PeerId>, SentryError> {
        let delivered = self.pick_one();
        Ok(self.record(SendKind::ByMinBlock(min_block), message, delivered))
    }

    async fn send_message_to_random_peers(
        &self,
        max_peers: u64,
        message: &EthMessage,
    ) -> Result<Vec<PeerId>, SentryError> {
        let delivered: Vec<PeerId> = self.peers.lock().unwrap().iter().copied().take(max_peers as usize).collect();
        Ok(self.record(SendKind::Random(max_peers), message, delivered))
    }

    async fn send_message_to_all(&self, message: &EthMessage) -> Result<Vec<PeerId>, SentryError> {
        let delivered = self.peers.lock().unwrap().clone();
        Ok(self.record(SendKind::All, message, delivered))
    }

    async fn messages(
        &self,
        _ids: Vec<EthMessageId>,
    ) -> Result<BoxStream<'static, Result<InboundMessage, SentryError>>, SentryError> {
        let receiver = self
            .inbound_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SentryError::malformed("mock messages stream already taken"))?;
        let stream = futures::stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|message| (Ok(message), rx))
        })
        .boxed();
        Ok(stream)
    }

    async fn peer_count(&self) -> Result<u64, SentryError> {
        Ok(self.peers.lock().unwrap().len() as u64)
    }
}
