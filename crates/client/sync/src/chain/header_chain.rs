//! In-memory reconstruction of the header chain above the persisted head.
//!
//! Arriving header batches are split into segments (maximal parent-hash runs) and attached to
//! the graph: onto an existing link or the persisted head ("connect"), below an anchor that was
//! waiting for them ("extend down"), or as a fresh anchor when nothing matches. Links form an
//! arena keyed by hash; connectivity is reachability from the persisted head, so dropping the
//! arena is all an unwind needs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::B256;
use hc_sentry::eth::{GetBlockHeadersParams, HashOrNumber};
use hc_sentry::{Penalty, PeerId};
use hp_block::{validation, SealedHeader};
use hp_chain_config::ChainConfig;

use super::PeerPenalty;
use crate::SyncConfig;

struct Link {
    header: SealedHeader,
}

struct Anchor {
    /// Hash of the missing parent this anchor waits for.
    parent_hash: B256,
    /// Number of the lowest header hanging on the anchor.
    block_num: u64,
    /// Timestamp of the last extension attempt.
    last_attempt: Option<Instant>,
    retries: u32,
}

/// Outcome of one accepted batch.
#[derive(Debug, Default)]
pub struct AcceptOutcome {
    pub penalties: Vec<PeerPenalty>,
    /// Headers newly inserted into the graph.
    pub inserted: usize,
}

pub struct HeaderChain {
    chain_config: Arc<ChainConfig>,
    config: Arc<SyncConfig>,

    /// Number and hash of the highest persisted header.
    highest_in_db: u64,
    head_hash: B256,

    links: HashMap<B256, Link>,
    /// parent hash -> child link hashes. Rebuilt on pruning.
    children: HashMap<B256, Vec<B256>>,
    /// Keyed by the parent hash the anchor waits for.
    anchors: HashMap<B256, Anchor>,

    /// Headers (and therefore their descendants) that must never be accepted again.
    bad_headers: HashSet<B256>,

    /// Highest block number seen in announcements or batches.
    top_seen_height: u64,
    /// Rate limiter for the forward probe emitted when no anchor is open.
    last_skeleton_request: Option<Instant>,
}

impl HeaderChain {
    pub fn new(chain_config: Arc<ChainConfig>, config: Arc<SyncConfig>) -> Self {
        Self {
            chain_config,
            config,
            highest_in_db: 0,
            head_hash: B256::ZERO,
            links: HashMap::new(),
            children: HashMap::new(),
            anchors: HashMap::new(),
            bad_headers: HashSet::new(),
            top_seen_height: 0,
            last_skeleton_request: None,
        }
    }

    /// Rebuilds the in-memory state on top of the persisted head. Links and anchors are session
    /// state and are dropped wholesale; the rejection set survives.
    pub fn sync_current_state(&mut self, highest_in_db: u64, head_hash: B256) {
        self.highest_in_db = highest_in_db;
        self.head_hash = head_hash;
        self.links.clear();
        self.children.clear();
        self.anchors.clear();
        self.last_skeleton_request = None;
    }

    pub fn add_bad_headers(&mut self, hashes: impl IntoIterator<Item = B256>) {
        self.bad_headers.extend(hashes);
    }

    pub fn note_target(&mut self, block_n: u64) {
        self.top_seen_height = self.top_seen_height.max(block_n);
    }

    pub fn top_seen_height(&self) -> u64 {
        self.top_seen_height
    }

    pub fn highest_in_db(&self) -> u64 {
        self.highest_in_db
    }

    /// All announced blocks are covered by the persisted chain.
    pub fn in_sync(&self) -> bool {
        self.top_seen_height <= self.highest_in_db
    }

    pub fn has_header(&self, hash: &B256) -> bool {
        self.links.contains_key(hash)
    }

    /// Ingests a batch of headers from `peer`.
    pub fn accept_headers(&mut self, headers: Vec<SealedHeader>, peer: PeerId) -> AcceptOutcome {
        let mut outcome = AcceptOutcome::default();
        if headers.is_empty() {
            return outcome;
        }

        if let Some(top) = headers.iter().map(SealedHeader::number).max() {
            self.note_target(top);
        }

        // Drop headers at or below the persisted head; their slots are already decided.
        let mut fresh: Vec<SealedHeader> =
            headers.into_iter().filter(|header| header.number() > self.highest_in_db).collect();
        if fresh.is_empty() {
            return outcome;
        }
        fresh.sort_by_key(SealedHeader::number);

        let segments = split_segments(fresh);
        let mut all_duplicate = true;
        for segment in segments {
            match self.attach_segment(segment) {
                Ok(Attachment::Duplicate) => {}
                Ok(attachment) => {
                    all_duplicate = false;
                    if let Attachment::Inserted(count) = attachment {
                        outcome.inserted += count;
                    }
                }
                Err(penalty) => {
                    all_duplicate = false;
                    outcome.penalties.push(PeerPenalty { peer, penalty });
                }
            }
        }
        if all_duplicate {
            outcome.penalties.push(PeerPenalty { peer, penalty: Penalty::DuplicateHeader });
        }

        outcome
    }

    fn attach_segment(&mut self, segment: Vec<SealedHeader>) -> Result<Attachment, Penalty> {
        // Descendants of blacklisted headers are as bad as the blacklisted header itself.
        if segment.iter().any(|h| self.bad_headers.contains(&h.hash()) || self.bad_headers.contains(&h.parent_hash)) {
            return Err(Penalty::BadBlock);
        }
        // Checkpoint mismatch means a wrong chain; reject before any other work.
        if segment.iter().any(|h| self.chain_config.preverified.contradicts(h.number(), h.hash())) {
            return Err(Penalty::BadBlock);
        }
        for header in &segment {
            if validation::validate_header_standalone(header.header()).is_err() {
                return Err(Penalty::InvalidSeal);
            }
        }

        if segment.iter().all(|h| self.links.contains_key(&h.hash())) {
            return Ok(Attachment::Duplicate);
        }

        let bottom = segment.first().expect("segments are non-empty");
        let top = segment.last().expect("segments are non-empty");
        let top_hash = top.hash();

        if let Some(parent) = self.links.get(&bottom.parent_hash) {
            // Connect onto an existing link.
            if bottom.number() != parent.header.number() + 1 {
                return Err(Penalty::WrongBlock);
            }
        } else if bottom.parent_hash == self.head_hash {
            // Connect onto the persisted head.
            if bottom.number() != self.highest_in_db + 1 {
                return Err(Penalty::WrongBlock);
            }
        } else if let Some(anchor) = self.anchors.get(&top_hash) {
            // Extend down: this segment is the missing lower part of an anchored subtree.
            if anchor.block_num != top.number() + 1 {
                return Err(Penalty::WrongBlock);
            }
            let retries = anchor.retries;
            self.anchors.remove(&top_hash);
            self.anchors.insert(
                bottom.parent_hash,
                Anchor { parent_hash: bottom.parent_hash, block_num: bottom.number(), last_attempt: None, retries },
            );
        } else {
            // Nothing matches: open a fresh anchor, bounded by the global cap.
            if self.anchors.len() >= self.config.max_anchors {
                return Ok(Attachment::Dropped);
            }
            self.anchors.insert(
                bottom.parent_hash,
                Anchor { parent_hash: bottom.parent_hash, block_num: bottom.number(), last_attempt: None, retries: 0 },
            );
        }

        let mut inserted = 0;
        for header in segment {
            let hash = header.hash();
            if self.links.contains_key(&hash) {
                continue;
            }
            self.children.entry(header.parent_hash).or_default().push(hash);
            self.links.insert(hash, Link { header });
            inserted += 1;
        }

        // If an anchor was waiting on this segment's top, its subtree is now attached through us.
        self.anchors.remove(&top_hash);

        Ok(Attachment::Inserted(inserted))
    }

    /// Requests to emit on this scheduling tick: anchor extensions first (oldest anchors first),
    /// then a forward probe when nothing is anchored.
    pub fn header_requests(&mut self, now: Instant) -> Vec<GetBlockHeadersParams> {
        self.retire_expired_anchors();

        let mut due: Vec<&mut Anchor> = self
            .anchors
            .values_mut()
            .filter(|anchor| {
                anchor.last_attempt.map_or(true, |at| now.duration_since(at) >= self.config.anchor_retry_interval)
            })
            .collect();
        due.sort_by_key(|anchor| (anchor.last_attempt, anchor.block_num));

        let mut requests = Vec::with_capacity(due.len());
        for anchor in due {
            anchor.last_attempt = Some(now);
            anchor.retries += 1;
            requests.push(GetBlockHeadersParams {
                origin: HashOrNumber::Hash(anchor.parent_hash),
                amount: self.config.max_headers_per_request,
                skip: 0,
                reverse: true,
            });
        }

        // Forward probe: with no anchor open and no links in flight, ask for headers above the
        // persisted head to discover where the peers are.
        if requests.is_empty() && self.anchors.is_empty() && self.links.is_empty() {
            let due = self
                .last_skeleton_request
                .map_or(true, |at| now.duration_since(at) >= self.config.anchor_retry_interval);
            if due {
                self.last_skeleton_request = Some(now);
                requests.push(GetBlockHeadersParams {
                    origin: HashOrNumber::Number(self.highest_in_db + 1),
                    amount: self.config.max_headers_per_request,
                    skip: 0,
                    reverse: false,
                });
            }
        }

        requests
    }

    fn retire_expired_anchors(&mut self) {
        let expired: Vec<B256> = self
            .anchors
            .values()
            .filter(|anchor| anchor.retries >= self.config.max_anchor_retries)
            .map(|anchor| anchor.parent_hash)
            .collect();
        for parent_hash in expired {
            tracing::debug!("Retiring anchor at parent {parent_hash:#x} after too many attempts");
            self.anchors.remove(&parent_hash);
            self.remove_subtree(parent_hash);
        }
    }

    /// Drops every link reachable downward from `parent_hash`.
    fn remove_subtree(&mut self, parent_hash: B256) {
        let mut queue = vec![parent_hash];
        while let Some(parent) = queue.pop() {
            let Some(kids) = self.children.remove(&parent) else { continue };
            for kid in kids {
                self.links.remove(&kid);
                queue.push(kid);
            }
        }
        self.rebuild_children();
    }

    /// Withdraws the longest connected run above the persisted head, advancing the head mark.
    /// Headers are returned in strictly increasing order; forks are resolved towards the
    /// higher-difficulty child.
    pub fn withdraw_stable_headers(&mut self, max: usize) -> Vec<SealedHeader> {
        let mut out = Vec::new();
        let mut current = self.head_hash;
        while out.len() < max {
            let Some(kids) = self.children.get(&current) else { break };
            let next = kids
                .iter()
                .filter_map(|hash| self.links.get(hash))
                .max_by_key(|link| link.header.difficulty())
                .map(|link| link.header.clone());
            let Some(header) = next else { break };
            current = header.hash();
            out.push(header);
        }

        if let Some(last) = out.last() {
            self.highest_in_db = last.number();
            self.head_hash = last.hash();
            self.prune_persisted();
        }
        out
    }

    /// Drops links and anchors at or below the persisted head; stale fork branches go with them.
    fn prune_persisted(&mut self) {
        let cutoff = self.highest_in_db;
        self.links.retain(|_, link| link.header.number() > cutoff);
        self.anchors.retain(|_, anchor| anchor.block_num > cutoff);
        self.rebuild_children();
    }

    fn rebuild_children(&mut self) {
        self.children.clear();
        for (hash, link) in &self.links {
            self.children.entry(link.header.parent_hash).or_default().push(*hash);
        }
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

enum Attachment {
    Inserted(usize),
    Duplicate,
    /// Anchor cap reached; back-pressure, not an offence.
    Dropped,
}

/// Splits an ascending batch into maximal parent-hash runs.
fn split_segments(headers: Vec<SealedHeader>) -> Vec<Vec<SealedHeader>> {
    let mut segments: Vec<Vec<SealedHeader>> = Vec::new();
    for header in headers {
        let attached = segments.iter_mut().find(|segment| {
            let last = segment.last().expect("segments are non-empty");
            header.parent_hash == last.hash() && header.number() == last.number() + 1
        });
        match attached {
            Some(segment) => segment.push(header),
            None => segments.push(vec![header]),
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use hp_block::test_utils::{build_chain, dev_genesis};
    use hp_block::Header;
    use hp_chain_config::PreverifiedHashes;
    use rstest::{fixture, rstest};
    use std::time::Duration;

    fn peer(n: u8) -> PeerId {
        PeerId::repeat_byte(n)
    }

    struct Harness {
        chain: HeaderChain,
        genesis: SealedHeader,
        headers: Vec<SealedHeader>,
    }

    #[fixture]
    fn harness() -> Harness {
        harness_with(ChainConfig::dev(), SyncConfig::default(), 12)
    }

    fn harness_with(chain_config: ChainConfig, config: SyncConfig, len: usize) -> Harness {
        let chain_config = Arc::new(chain_config);
        let genesis = dev_genesis(&chain_config);
        let headers = build_chain(&chain_config, &genesis, len);
        let mut chain = HeaderChain::new(chain_config, Arc::new(config));
        chain.sync_current_state(0, genesis.hash());
        Harness { chain, genesis, headers }
    }

    #[rstest]
    fn connects_ascending_batches(mut harness: Harness) {
        let outcome = harness.chain.accept_headers(harness.headers.clone(), peer(1));
        assert!(outcome.penalties.is_empty());
        assert_eq!(outcome.inserted, 12);

        let withdrawn = harness.chain.withdraw_stable_headers(100);
        assert_eq!(withdrawn, harness.headers);
        assert_eq!(harness.chain.highest_in_db(), 12);
        assert!(harness.chain.in_sync());
        assert_eq!(harness.chain.link_count(), 0);
    }

    #[rstest]
    fn out_of_order_arrival_joins_through_an_anchor(mut harness: Harness) {
        let (low, high) = harness.headers.split_at(6);

        // The upper half arrives first and has nothing to attach to.
        let outcome = harness.chain.accept_headers(high.to_vec(), peer(1));
        assert!(outcome.penalties.is_empty());
        assert_eq!(harness.chain.anchor_count(), 1);
        assert!(harness.chain.withdraw_stable_headers(100).is_empty());

        // The missing lower half extends the anchor down and connects to the head.
        let outcome = harness.chain.accept_headers(low.to_vec(), peer(2));
        assert!(outcome.penalties.is_empty());
        let withdrawn = harness.chain.withdraw_stable_headers(100);
        assert_eq!(withdrawn, harness.headers);
        assert_eq!(harness.chain.anchor_count(), 0);
    }

    #[rstest]
    fn withdrawal_is_bounded_and_resumable(mut harness: Harness) {
        harness.chain.accept_headers(harness.headers.clone(), peer(1));
        let first = harness.chain.withdraw_stable_headers(5);
        assert_eq!(first, harness.headers[..5]);
        assert_eq!(harness.chain.highest_in_db(), 5);
        assert!(!harness.chain.in_sync());
        let rest = harness.chain.withdraw_stable_headers(100);
        assert_eq!(rest, harness.headers[5..]);
    }

    #[rstest]
    fn duplicate_batch_is_penalised(mut harness: Harness) {
        harness.chain.accept_headers(harness.headers.clone(), peer(1));
        let outcome = harness.chain.accept_headers(harness.headers[2..8].to_vec(), peer(2));
        assert_eq!(outcome.penalties, vec![PeerPenalty { peer: peer(2), penalty: Penalty::DuplicateHeader }]);
        assert_eq!(outcome.inserted, 0);
    }

    #[rstest]
    fn stale_headers_below_the_head_are_ignored(mut harness: Harness) {
        harness.chain.accept_headers(harness.headers.clone(), peer(1));
        harness.chain.withdraw_stable_headers(100);

        let outcome = harness.chain.accept_headers(harness.headers[..4].to_vec(), peer(2));
        assert!(outcome.penalties.is_empty());
        assert_eq!(outcome.inserted, 0);
        assert_eq!(harness.chain.link_count(), 0);
    }

    #[rstest]
    fn fabricated_numbers_are_a_wrong_block(mut harness: Harness) {
        // A header whose parent is the head but whose number skips ahead.
        let mut header = harness.headers[0].header().clone();
        header.number = 5;
        let forged = SealedHeader::new(header);
        let outcome = harness.chain.accept_headers(vec![forged], peer(1));
        assert_eq!(outcome.penalties, vec![PeerPenalty { peer: peer(1), penalty: Penalty::WrongBlock }]);
    }

    #[rstest]
    fn blacklisted_headers_and_descendants_are_rejected(mut harness: Harness) {
        harness.chain.add_bad_headers([harness.headers[3].hash()]);

        let outcome = harness.chain.accept_headers(harness.headers.clone(), peer(1));
        assert_eq!(outcome.penalties, vec![PeerPenalty { peer: peer(1), penalty: Penalty::BadBlock }]);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(harness.chain.link_count(), 0);

        // A child of the blacklisted header is rejected on its own too.
        let outcome = harness.chain.accept_headers(vec![harness.headers[4].clone()], peer(2));
        assert_eq!(outcome.penalties, vec![PeerPenalty { peer: peer(2), penalty: Penalty::BadBlock }]);
    }

    #[rstest]
    fn preverified_contradiction_rejects_the_segment() {
        let mut chain_config = ChainConfig::dev();
        // Pin a checkpoint at height 4 that the generated chain cannot match.
        chain_config.preverified = PreverifiedHashes::new(4, vec![B256::repeat_byte(0xee)]);
        let mut harness = harness_with(chain_config, SyncConfig::default(), 8);

        let outcome = harness.chain.accept_headers(harness.headers.clone(), peer(1));
        assert_eq!(outcome.penalties, vec![PeerPenalty { peer: peer(1), penalty: Penalty::BadBlock }]);
        assert_eq!(harness.chain.link_count(), 0);
    }

    #[rstest]
    fn malformed_headers_are_an_invalid_seal(mut harness: Harness) {
        let mut header = harness.headers[0].header().clone();
        header.difficulty = U256::ZERO;
        let outcome = harness.chain.accept_headers(vec![SealedHeader::new(header)], peer(1));
        assert_eq!(outcome.penalties, vec![PeerPenalty { peer: peer(1), penalty: Penalty::InvalidSeal }]);
    }

    #[rstest]
    fn anchor_cap_drops_extra_segments() {
        let config = SyncConfig { max_anchors: 2, ..Default::default() };
        let mut harness = harness_with(ChainConfig::dev(), config, 12);

        // Three disjoint upper segments; each would need its own anchor.
        for start in [3usize, 6, 9] {
            let segment = vec![harness.headers[start].clone()];
            let outcome = harness.chain.accept_headers(segment, peer(1));
            assert!(outcome.penalties.is_empty());
        }
        assert_eq!(harness.chain.anchor_count(), 2);
        assert_eq!(harness.chain.link_count(), 2);
    }

    #[rstest]
    fn fork_choice_prefers_higher_difficulty(mut harness: Harness) {
        let child = harness.headers[0].clone();
        // A competing child of the head with a heavier (structurally valid) difficulty.
        let mut heavy = child.header().clone();
        heavy.difficulty = child.difficulty() + U256::from(1000);
        heavy.extra_data = alloy_primitives::Bytes::from_static(b"fork");
        let heavy = SealedHeader::new(heavy);

        harness.chain.accept_headers(vec![child, heavy.clone()], peer(1));
        let withdrawn = harness.chain.withdraw_stable_headers(1);
        assert_eq!(withdrawn, vec![heavy]);
    }

    #[rstest]
    fn anchor_requests_target_the_missing_parent(mut harness: Harness) {
        let upper = harness.headers[6..].to_vec();
        let missing_parent = upper[0].parent_hash;
        harness.chain.accept_headers(upper, peer(1));

        let now = Instant::now();
        let requests = harness.chain.header_requests(now);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].origin, HashOrNumber::Hash(missing_parent));
        assert!(requests[0].reverse);

        // Within the retry interval the anchor stays quiet.
        assert!(harness.chain.header_requests(now + Duration::from_secs(1)).is_empty());
        // Past it, the anchor retries.
        assert_eq!(harness.chain.header_requests(now + Duration::from_secs(6)).len(), 1);
    }

    #[rstest]
    fn skeleton_probe_when_nothing_is_anchored(mut harness: Harness) {
        harness.chain.note_target(12);
        let requests = harness.chain.header_requests(Instant::now());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].origin, HashOrNumber::Number(1));
        assert!(!requests[0].reverse);
    }

    #[rstest]
    fn anchors_expire_after_too_many_retries() {
        let config = SyncConfig {
            anchor_retry_interval: Duration::from_millis(0),
            max_anchor_retries: 3,
            ..Default::default()
        };
        let mut harness = harness_with(ChainConfig::dev(), config, 12);
        harness.chain.accept_headers(harness.headers[6..].to_vec(), peer(1));
        assert_eq!(harness.chain.anchor_count(), 1);

        let mut now = Instant::now();
        for _ in 0..3 {
            assert!(!harness.chain.header_requests(now).is_empty());
            now += Duration::from_millis(1);
        }
        // The fourth tick retires the anchor and its links.
        harness.chain.header_requests(now);
        assert_eq!(harness.chain.anchor_count(), 0);
        assert_eq!(harness.chain.link_count(), 0);
    }

    #[rstest]
    fn resync_drops_session_state_but_keeps_the_blacklist(mut harness: Harness) {
        harness.chain.add_bad_headers([harness.headers[5].hash()]);
        harness.chain.accept_headers(harness.headers[..4].to_vec(), peer(1));
        assert!(harness.chain.link_count() > 0);

        harness.chain.sync_current_state(0, harness.genesis.hash());
        assert_eq!(harness.chain.link_count(), 0);
        assert_eq!(harness.chain.anchor_count(), 0);

        let outcome = harness.chain.accept_headers(vec![harness.headers[5].clone()], peer(1));
        assert_eq!(outcome.penalties, vec![PeerPenalty { peer: peer(1), penalty: Penalty::BadBlock }]);
    }
}
