//! Pending block bodies: which ones we still need, which request covers them, and which have
//! arrived.
//!
//! Bodies cannot be matched to blocks by position; a response may cover any subset of a request
//! in any order. Matching goes through the body's recomputed commitments, which also doubles as
//! the validation step: a body matching no requested header is a bad body.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::B256;
use hc_sentry::{Penalty, PeerId};
use hp_block::{BlockBody, SealedHeader};

use super::PeerPenalty;
use crate::SyncConfig;

/// A body request ready to be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyRequest {
    pub request_id: u64,
    pub hashes: Vec<B256>,
    /// Lowest block number in the batch; lets the sentry pick a peer that has it.
    pub min_block: u64,
}

/// A body that arrived and passed its header binding.
#[derive(Debug, Clone)]
pub struct ArrivedBlock {
    pub block_n: u64,
    pub header: SealedHeader,
    pub body: BlockBody,
}

enum BodyState {
    Ready,
    Requested { request_id: u64 },
    Arrived(BlockBody),
}

struct PendingBody {
    header: SealedHeader,
    state: BodyState,
    retries: u32,
}

struct OpenRequest {
    /// Peer the request was handed to; unknown until the sentry reports delivery.
    peer: Option<PeerId>,
    hashes: Vec<B256>,
    deadline: Instant,
}

pub struct BodySequence {
    config: Arc<SyncConfig>,
    /// Pending bodies by block number; BTreeMap so batching prefers the oldest.
    pending: BTreeMap<u64, PendingBody>,
    by_hash: HashMap<B256, u64>,
    requests: HashMap<u64, OpenRequest>,
    outstanding: HashMap<PeerId, usize>,
    next_request_id: u64,
    /// Everything at or below this mark has been handed to the bodies stage.
    highest_delivered: u64,
}

impl BodySequence {
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self {
            config,
            pending: BTreeMap::new(),
            by_hash: HashMap::new(),
            requests: HashMap::new(),
            outstanding: HashMap::new(),
            next_request_id: 1,
            highest_delivered: 0,
        }
    }

    /// Clears all session state and restarts above `highest_delivered`.
    pub fn reset(&mut self, highest_delivered: u64) {
        self.pending.clear();
        self.by_hash.clear();
        self.requests.clear();
        self.outstanding.clear();
        self.highest_delivered = highest_delivered;
    }

    /// Adds headers whose bodies must be fetched.
    pub fn feed(&mut self, headers: impl IntoIterator<Item = SealedHeader>) {
        for header in headers {
            let block_n = header.number();
            if block_n <= self.highest_delivered || self.pending.contains_key(&block_n) {
                continue;
            }
            self.by_hash.insert(header.hash(), block_n);
            self.pending.insert(block_n, PendingBody { header, state: BodyState::Ready, retries: 0 });
        }
    }

    /// Adds a block whose body is already at hand (e.g. still in the store after a partial
    /// unwind), so the contiguous drain does not stall on it.
    pub fn feed_arrived(&mut self, header: SealedHeader, body: BlockBody) {
        let block_n = header.number();
        if block_n <= self.highest_delivered {
            return;
        }
        self.by_hash.insert(header.hash(), block_n);
        self.pending.insert(block_n, PendingBody { header, state: BodyState::Arrived(body), retries: 0 });
    }

    /// Expires requests whose deadline has passed: their entries go back to `Ready`, and a peer
    /// that made an entry cross the retry threshold is penalised, once.
    pub fn expire(&mut self, now: Instant) -> Vec<PeerPenalty> {
        let expired: Vec<u64> =
            self.requests.iter().filter(|(_, req)| req.deadline <= now).map(|(id, _)| *id).collect();

        let mut penalties = Vec::new();
        for request_id in expired {
            let request = self.requests.remove(&request_id).expect("id taken from the map");
            if let Some(peer) = request.peer {
                self.release_outstanding(&peer);
            }
            let mut should_penalise = false;
            for hash in &request.hashes {
                let Some(entry) = self.by_hash.get(hash).and_then(|n| self.pending.get_mut(n)) else { continue };
                if !matches!(entry.state, BodyState::Requested { request_id: id } if id == request_id) {
                    continue;
                }
                entry.state = BodyState::Ready;
                entry.retries += 1;
                if entry.retries == self.config.body_retry_penalty_threshold {
                    should_penalise = true;
                }
            }
            if should_penalise {
                if let Some(peer) = request.peer {
                    penalties.push(PeerPenalty { peer, penalty: Penalty::Timeout });
                }
            }
        }
        penalties
    }

    /// Forms the next batch of up to `max_blocks_per_request` ready entries, oldest first.
    /// Entries are marked requested immediately; [`Self::on_sent`] or [`Self::on_no_peer`]
    /// must follow.
    pub fn next_request(&mut self, now: Instant) -> Option<BodyRequest> {
        let mut hashes = Vec::new();
        let mut min_block = u64::MAX;
        let request_id = self.next_request_id;

        for (block_n, entry) in self.pending.iter_mut() {
            if hashes.len() >= self.config.max_blocks_per_request {
                break;
            }
            if !matches!(entry.state, BodyState::Ready) {
                continue;
            }
            entry.state = BodyState::Requested { request_id };
            hashes.push(entry.header.hash());
            min_block = min_block.min(*block_n);
        }

        if hashes.is_empty() {
            return None;
        }
        self.next_request_id += 1;
        self.requests.insert(
            request_id,
            OpenRequest { peer: None, hashes: hashes.clone(), deadline: now + self.config.request_deadline },
        );
        Some(BodyRequest { request_id, hashes, min_block })
    }

    /// Records which peer accepted the request.
    pub fn on_sent(&mut self, request_id: u64, peer: PeerId) {
        if let Some(request) = self.requests.get_mut(&request_id) {
            request.peer = Some(peer);
            *self.outstanding.entry(peer).or_default() += 1;
        }
    }

    /// No peer accepted the request; the entries become ready again without a retry mark.
    pub fn on_no_peer(&mut self, request_id: u64) {
        let Some(request) = self.requests.remove(&request_id) else { return };
        for hash in &request.hashes {
            if let Some(entry) = self.by_hash.get(hash).and_then(|n| self.pending.get_mut(n)) {
                if matches!(entry.state, BodyState::Requested { request_id: id } if id == request_id) {
                    entry.state = BodyState::Ready;
                }
            }
        }
    }

    /// Ingests a `BlockBodies` response. Unknown request ids are stale and ignored without
    /// penalty; a body matching none of the requested headers penalises the sender.
    pub fn accept_response(
        &mut self,
        request_id: u64,
        from_peer: PeerId,
        bodies: Vec<BlockBody>,
    ) -> (usize, Vec<PeerPenalty>) {
        let Some(request) = self.requests.remove(&request_id) else {
            tracing::debug!("Discarding stale bodies response (request_id={request_id})");
            return (0, Vec::new());
        };
        if let Some(peer) = request.peer {
            self.release_outstanding(&peer);
        }

        // Requested hashes by their expected commitments. Several blocks can share commitments
        // (empty blocks all do), so every root pair keys a list.
        let mut expected: HashMap<(B256, B256), Vec<B256>> = HashMap::new();
        for hash in request.hashes.iter().rev() {
            if let Some(entry) = self.by_hash.get(hash).and_then(|n| self.pending.get(n)) {
                let key = (entry.header.transactions_root, entry.header.ommers_hash);
                expected.entry(key).or_default().push(*hash);
            }
        }

        let mut penalties = Vec::new();
        let mut arrived = 0;
        for body in bodies {
            let key = (body.transactions_root(), body.ommers_hash());
            let matched = expected.get_mut(&key).and_then(Vec::pop);
            let Some(hash) = matched else {
                penalties.push(PeerPenalty { peer: from_peer, penalty: Penalty::BadBlock });
                continue;
            };
            let entry = self.by_hash.get(&hash).and_then(|n| self.pending.get_mut(n)).expect("matched above");
            if matches!(entry.state, BodyState::Requested { request_id: id } if id == request_id) {
                entry.state = BodyState::Arrived(body);
                arrived += 1;
            }
        }

        // Whatever the response did not cover goes back into the pool.
        for hash in &request.hashes {
            if let Some(entry) = self.by_hash.get(hash).and_then(|n| self.pending.get_mut(n)) {
                if matches!(entry.state, BodyState::Requested { request_id: id } if id == request_id) {
                    entry.state = BodyState::Ready;
                }
            }
        }

        (arrived, penalties)
    }

    /// Hands over the contiguous arrived prefix, advancing the delivery mark.
    pub fn drain_arrived(&mut self) -> Vec<ArrivedBlock> {
        let mut out = Vec::new();
        loop {
            let next = self.highest_delivered + 1;
            let Some(entry) = self.pending.get(&next) else { break };
            if !matches!(entry.state, BodyState::Arrived(_)) {
                break;
            }
            let entry = self.pending.remove(&next).expect("checked above");
            self.by_hash.remove(&entry.header.hash());
            let BodyState::Arrived(body) = entry.state else { unreachable!() };
            out.push(ArrivedBlock { block_n: next, header: entry.header, body });
            self.highest_delivered = next;
        }
        out
    }

    pub fn outstanding_for(&self, peer: &PeerId) -> usize {
        self.outstanding.get(peer).copied().unwrap_or(0)
    }

    pub fn has_capacity(&self, peer: &PeerId) -> bool {
        self.outstanding_for(peer) < self.config.max_requests_per_peer
    }

    /// Nothing pending and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.requests.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn open_request_count(&self) -> usize {
        self.requests.len()
    }

    fn release_outstanding(&mut self, peer: &PeerId) {
        if let Some(count) = self.outstanding.get_mut(peer) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.outstanding.remove(peer);
            }
        }
    }
}
