//! The block exchange: the long-running engine between the sentry and the stages.
//!
//! Three loops run for the lifetime of the sync: the receiving loop drains the sentry's message
//! stream into a queue, the execution loop consumes that queue and schedules outbound requests
//! on a timer tick, and the stats loop reports peer counts and request counters. The header
//! chain and body sequence are owned here; stages reach them only through [`ExchangeHandle`],
//! a bounded cursor interface.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context;
use hc_db::HematiteBackend;
use hc_sentry::eth::{BlockHashAndNumber, EthMessage, EthMessageId, HashOrNumber};
use hc_sentry::{InboundMessage, Penalty, PeerId, SentryClient, SentryError};
use hp_block::{BlockBody, SealedHeader};
use hp_utils::service::ServiceContext;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;

use crate::chain::header_chain::AcceptOutcome;
use crate::chain::{ArrivedBlock, BodySequence, HeaderChain, PeerPenalty};
use crate::messages::{inbound, OutboundMessage};
use crate::metrics::ExchangeStats;
use crate::{SyncConfig, SyncError};

/// Message ids the exchange subscribes to; everything else never reaches us.
const SUBSCRIBED_IDS: [EthMessageId; 6] = [
    EthMessageId::GetBlockHeaders,
    EthMessageId::BlockHeaders,
    EthMessageId::GetBlockBodies,
    EthMessageId::BlockBodies,
    EthMessageId::NewBlockHashes,
    EthMessageId::NewBlock,
];

/// Peers remembered for body-request targeting.
const KNOWN_PEERS_CAP: usize = 64;

struct ExchangeShared {
    config: Arc<SyncConfig>,
    header_chain: Mutex<HeaderChain>,
    body_sequence: Mutex<BodySequence>,
    headers_notify: Notify,
    bodies_notify: Notify,
    /// Canonical-tip announcements queued by the headers stage, broadcast on the next tick.
    announcements: Mutex<Vec<BlockHashAndNumber>>,
    known_peers: Mutex<VecDeque<PeerId>>,
    no_peer_until: Mutex<Option<Instant>>,
    next_request_id: AtomicU64,
    stats: ExchangeStats,
}

impl ExchangeShared {
    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn record_peer(&self, peer: PeerId) {
        let mut known = self.known_peers.lock().expect("poisoned");
        if !known.contains(&peer) {
            known.push_back(peer);
            if known.len() > KNOWN_PEERS_CAP {
                known.pop_front();
            }
        }
    }
}

/// Bounded cursor interface between the stages and the exchange-owned state. This is the only
/// cross-task mutation point; every method takes the lock briefly and never awaits while
/// holding it.
#[derive(Clone)]
pub struct ExchangeHandle {
    shared: Arc<ExchangeShared>,
}

impl ExchangeHandle {
    /// Rebuilds the header chain on top of the persisted head.
    pub fn sync_header_chain(&self, highest_in_db: u64, head_hash: alloy_primitives::B256) {
        self.shared.header_chain.lock().expect("poisoned").sync_current_state(highest_in_db, head_hash);
    }

    pub fn add_bad_headers(&self, hashes: impl IntoIterator<Item = alloy_primitives::B256>) {
        self.shared.header_chain.lock().expect("poisoned").add_bad_headers(hashes);
    }

    pub fn note_target(&self, block_n: u64) {
        self.shared.header_chain.lock().expect("poisoned").note_target(block_n);
    }

    pub fn target_height(&self) -> u64 {
        self.shared.header_chain.lock().expect("poisoned").top_seen_height()
    }

    /// Feeds a batch of headers into the chain graph, as if received from `peer`.
    pub fn accept_headers(&self, headers: Vec<SealedHeader>, peer: PeerId) -> AcceptOutcome {
        let outcome = self.shared.header_chain.lock().expect("poisoned").accept_headers(headers, peer);
        if outcome.inserted > 0 {
            self.shared.headers_notify.notify_waiters();
        }
        outcome
    }

    /// Waits (bounded) for the next run of stable connected headers above the persisted head.
    /// Returns the run and whether the chain considers itself in sync with its peers.
    pub async fn next_stable_headers(&self, max: usize) -> (Vec<SealedHeader>, bool) {
        let notified = self.shared.headers_notify.notified();
        tokio::pin!(notified);
        {
            let mut chain = self.shared.header_chain.lock().expect("poisoned");
            let headers = chain.withdraw_stable_headers(max);
            if !headers.is_empty() {
                let in_sync = chain.in_sync();
                return (headers, in_sync);
            }
        }
        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep(self.shared.config.stage_poll_interval) => {}
        }
        let mut chain = self.shared.header_chain.lock().expect("poisoned");
        let headers = chain.withdraw_stable_headers(max);
        let in_sync = chain.in_sync();
        (headers, in_sync)
    }

    /// Queues a canonical-tip announcement for broadcast.
    pub fn announce(&self, announcements: Vec<BlockHashAndNumber>) {
        self.shared.announcements.lock().expect("poisoned").extend(announcements);
    }

    // Bodies cursor

    pub fn reset_bodies(&self, highest_delivered: u64) {
        self.shared.body_sequence.lock().expect("poisoned").reset(highest_delivered);
    }

    pub fn feed_bodies(&self, headers: impl IntoIterator<Item = SealedHeader>) {
        self.shared.body_sequence.lock().expect("poisoned").feed(headers);
    }

    pub fn feed_arrived_body(&self, header: SealedHeader, body: BlockBody) {
        self.shared.body_sequence.lock().expect("poisoned").feed_arrived(header, body);
        self.shared.bodies_notify.notify_waiters();
    }

    /// Feeds a bodies response into the sequence, as if received from `peer`.
    pub fn accept_bodies(&self, request_id: u64, peer: PeerId, bodies: Vec<BlockBody>) -> (usize, Vec<PeerPenalty>) {
        let result = self.shared.body_sequence.lock().expect("poisoned").accept_response(request_id, peer, bodies);
        if result.0 > 0 {
            self.shared.bodies_notify.notify_waiters();
        }
        result
    }

    /// Waits (bounded) for the next contiguous run of arrived bodies.
    pub async fn next_arrived_bodies(&self) -> Vec<ArrivedBlock> {
        let notified = self.shared.bodies_notify.notified();
        tokio::pin!(notified);
        {
            let mut sequence = self.shared.body_sequence.lock().expect("poisoned");
            let arrived = sequence.drain_arrived();
            if !arrived.is_empty() {
                return arrived;
            }
        }
        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep(self.shared.config.stage_poll_interval) => {}
        }
        self.shared.body_sequence.lock().expect("poisoned").drain_arrived()
    }

    pub fn bodies_idle(&self) -> bool {
        self.shared.body_sequence.lock().expect("poisoned").is_idle()
    }

    pub fn stats(&self) -> &ExchangeStats {
        &self.shared.stats
    }
}

/// Orchestrator of the download engine; see the module docs for the loop structure.
pub struct BlockExchange {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<HematiteBackend>,
    sentry: Arc<dyn SentryClient>,
    config: Arc<SyncConfig>,
    shared: Arc<ExchangeShared>,
}

impl BlockExchange {
    pub fn new(
        backend: Arc<HematiteBackend>,
        sentry: Arc<dyn SentryClient>,
        config: Arc<SyncConfig>,
    ) -> (Self, ExchangeHandle) {
        let shared = Arc::new(ExchangeShared {
            header_chain: Mutex::new(HeaderChain::new(Arc::clone(backend.chain_config()), Arc::clone(&config))),
            body_sequence: Mutex::new(BodySequence::new(Arc::clone(&config))),
            headers_notify: Notify::new(),
            bodies_notify: Notify::new(),
            announcements: Mutex::new(Vec::new()),
            known_peers: Mutex::new(VecDeque::new()),
            no_peer_until: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
            stats: ExchangeStats::default(),
            config: Arc::clone(&config),
        });
        let handle = ExchangeHandle { shared: Arc::clone(&shared) };
        (Self { inner: Arc::new(Inner { backend, sentry, config, shared }) }, handle)
    }

    /// Runs the exchange until cancellation. Any fatal error tears the sync service down.
    pub async fn run(self, ctx: ServiceContext) -> anyhow::Result<()> {
        let inner = self.inner;

        // The blacklist survives restarts; seed the in-memory rejection set from it.
        let bad_blocks = inner.backend.bad_blocks().context("Loading bad-block blacklist")?;
        if !bad_blocks.is_empty() {
            tracing::info!("🚫 {} blacklisted block(s) carried over from previous runs", bad_blocks.len());
            inner.shared.header_chain.lock().expect("poisoned").add_bad_headers(bad_blocks);
        }

        let stream =
            inner.sentry.messages(SUBSCRIBED_IDS.to_vec()).await.context("Subscribing to sentry messages")?;
        let (inbound_tx, inbound_rx) = mpsc::channel(64);

        let mut join_set = JoinSet::new();
        join_set.spawn(receiving_loop(stream, inbound_tx, ctx.child()));
        join_set.spawn(stats_loop(Arc::clone(&inner), ctx.child()));
        join_set.spawn(execution_loop(Arc::clone(&inner), inbound_rx, ctx.child()));

        let mut result = Ok(());
        while let Some(res) = join_set.join_next().await {
            match res.context("Exchange task panicked") {
                Ok(Ok(())) => {}
                Ok(Err(err)) | Err(err) => {
                    if result.is_ok() {
                        result = Err(err);
                    }
                    ctx.cancel_local();
                }
            }
        }
        result
    }
}

/// Drains the sentry stream into the execution loop's queue. A cancelled stream is normal
/// termination; any other stream failure is fatal.
async fn receiving_loop(
    mut stream: futures::stream::BoxStream<'static, Result<InboundMessage, SentryError>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    ctx: ServiceContext,
) -> anyhow::Result<()> {
    use futures::StreamExt;
    loop {
        match ctx.run_until_cancelled(stream.next()).await {
            None => break,
            Some(None) => {
                if ctx.is_cancelled() {
                    break;
                }
                anyhow::bail!("Sentry dropped the message stream");
            }
            Some(Some(Err(err))) if err.is_cancelled() => break,
            Some(Some(Err(err))) => return Err(err).context("Sentry message stream"),
            Some(Some(Ok(message))) => {
                if inbound_tx.send(message).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Periodic visibility into the exchange: peer count and request counters.
async fn stats_loop(inner: Arc<Inner>, ctx: ServiceContext) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    while ctx.run_until_cancelled(interval.tick()).await.is_some() {
        let peers = match inner.sentry.peer_count().await {
            Ok(count) => count,
            Err(err) if err.is_cancelled() => break,
            Err(err) => return Err(err).context("Querying sentry peer count"),
        };
        let head = inner.backend.chain_head();
        tracing::info!(
            "🔗 Head: {} headers / {} bodies | 🕸️  {peers} peer(s) | req out: {} headers, {} bodies",
            hp_utils::fmt_option(head.headers.get(), "N"),
            hp_utils::fmt_option(head.bodies.get(), "N"),
            inner.shared.stats.header_requests(),
            inner.shared.stats.body_requests(),
        );
    }
    Ok(())
}

/// Processes inbound messages and schedules outbound requests.
async fn execution_loop(
    inner: Arc<Inner>,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    ctx: ServiceContext,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            message = inbound_rx.recv() => match message {
                Some(message) => on_inbound(&inner, message).await?,
                None => break,
            },
            _ = tick.tick() => schedule_outbound(&inner).await?,
        }
    }
    Ok(())
}

async fn on_inbound(inner: &Arc<Inner>, message: InboundMessage) -> Result<(), SyncError> {
    ExchangeStats::bump(&inner.shared.stats.inbound_messages);
    inner.shared.record_peer(message.peer_id);
    let peer = message.peer_id;

    let decoded = match EthMessage::decode(message.id, &message.data) {
        Ok(decoded) => decoded,
        Err(err) => {
            tracing::debug!("Malformed {:?} message from {peer}: {err}", message.id);
            send_penalty(inner, PeerPenalty { peer, penalty: Penalty::WrongBlock }).await;
            return Ok(());
        }
    };
    tracing::trace!("Inbound {:?} from {peer}", message.id);

    match decoded {
        EthMessage::BlockHeaders(response) => {
            let headers = response.headers.into_iter().map(SealedHeader::new).collect();
            let outcome = {
                let mut chain = inner.shared.header_chain.lock().expect("poisoned");
                chain.accept_headers(headers, peer)
            };
            if outcome.inserted > 0 {
                inner.shared.headers_notify.notify_waiters();
            }
            for penalty in outcome.penalties {
                send_penalty(inner, penalty).await;
            }
        }
        EthMessage::BlockBodies(response) => {
            let (arrived, penalties) = {
                let mut sequence = inner.shared.body_sequence.lock().expect("poisoned");
                sequence.accept_response(response.request_id, peer, response.bodies)
            };
            if arrived > 0 {
                inner.shared.bodies_notify.notify_waiters();
            }
            for penalty in penalties {
                send_penalty(inner, penalty).await;
            }
        }
        EthMessage::NewBlockHashes(announcements) => {
            // The announcement tells us how far this peer is; the sentry uses that for routing.
            if let Some(top) = announcements.0.iter().map(|ann| ann.number).max() {
                if let Err(err) = inner.sentry.peer_min_block(peer, top).await {
                    if !err.is_cancelled() {
                        tracing::debug!("PeerMinBlock failed: {err:#}");
                    }
                }
            }
            let unknown: Vec<BlockHashAndNumber> = {
                let mut chain = inner.shared.header_chain.lock().expect("poisoned");
                announcements
                    .0
                    .into_iter()
                    .filter(|ann| {
                        chain.note_target(ann.number);
                        ann.number > chain.highest_in_db() && !chain.has_header(&ann.hash)
                    })
                    .collect()
            };
            for ann in unknown {
                let request = OutboundMessage::GetBlockHeaders {
                    request_id: inner.shared.next_request_id(),
                    params: hc_sentry::eth::GetBlockHeadersParams {
                        origin: HashOrNumber::Hash(ann.hash),
                        amount: inner.config.max_headers_per_request,
                        skip: 0,
                        reverse: true,
                    },
                    min_block: ann.number,
                };
                if !execute_required(inner, &request).await?.is_empty() {
                    ExchangeStats::bump(&inner.shared.stats.header_requests_sent);
                }
            }
        }
        EthMessage::NewBlock(announcement) => {
            let header = SealedHeader::new(announcement.block.header.clone());
            let outcome = {
                let mut chain = inner.shared.header_chain.lock().expect("poisoned");
                chain.accept_headers(vec![header], peer)
            };
            if outcome.inserted > 0 {
                inner.shared.headers_notify.notify_waiters();
                // Relay the announcement to a random subset before the block is even persisted;
                // the rest of the network learns the hash from our canonical-tip announcements.
                execute_best_effort(inner, OutboundMessage::NewBlock(announcement)).await;
            }
            for penalty in outcome.penalties {
                send_penalty(inner, penalty).await;
            }
        }
        EthMessage::GetBlockHeaders(query) => {
            let reply = inbound::reply_to_get_block_headers(&inner.backend, peer, &query)?;
            execute_best_effort(inner, reply).await;
        }
        EthMessage::GetBlockBodies(query) => {
            let reply = inbound::reply_to_get_block_bodies(&inner.backend, peer, &query)?;
            execute_best_effort(inner, reply).await;
        }
    }
    Ok(())
}

/// One scheduling tick: broadcast queued announcements, expire overdue body requests, emit
/// header requests for hungry anchors, and batch body requests towards peers with capacity.
async fn schedule_outbound(inner: &Arc<Inner>) -> Result<(), SyncError> {
    let now = Instant::now();

    let announcements = std::mem::take(&mut *inner.shared.announcements.lock().expect("poisoned"));
    if !announcements.is_empty() {
        execute_required(inner, &OutboundMessage::NewBlockHashes(announcements)).await?;
    }

    // Back-pressure from peer scarcity: nothing is requested until the delay has passed.
    if let Some(until) = *inner.shared.no_peer_until.lock().expect("poisoned") {
        if now < until {
            return Ok(());
        }
    }
    let peer_count = match inner.sentry.peer_count().await {
        Ok(count) => count,
        Err(err) if err.is_cancelled() => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if peer_count == 0 {
        tracing::debug!("No peers available, delaying requests");
        enter_no_peer_backoff(inner, now);
        return Ok(());
    }

    let expired_penalties = {
        let mut sequence = inner.shared.body_sequence.lock().expect("poisoned");
        sequence.expire(now)
    };
    for penalty in expired_penalties {
        send_penalty(inner, penalty).await;
    }

    // Header requests: anchors first, then the forward probe.
    let header_requests = {
        let mut chain = inner.shared.header_chain.lock().expect("poisoned");
        let highest = chain.highest_in_db();
        chain
            .header_requests(now)
            .into_iter()
            .map(|params| {
                let min_block = match params.origin {
                    HashOrNumber::Number(block_n) => block_n,
                    HashOrNumber::Hash(_) => highest,
                };
                OutboundMessage::GetBlockHeaders { request_id: inner.shared.next_request_id(), params, min_block }
            })
            .collect::<Vec<_>>()
    };
    for request in header_requests {
        let sent = execute_required(inner, &request).await?;
        if sent.is_empty() {
            enter_no_peer_backoff(inner, now);
            return Ok(());
        }
        ExchangeStats::bump(&inner.shared.stats.header_requests_sent);
    }

    // Body requests, until either the pool or the peers' capacity is drained.
    loop {
        let (request, peer) = {
            let mut sequence = inner.shared.body_sequence.lock().expect("poisoned");
            let peer = pick_body_peer(inner, &sequence);
            let known_any = !inner.shared.known_peers.lock().expect("poisoned").is_empty();
            if peer.is_none() && known_any {
                // Every known peer is at its outstanding cap.
                break;
            }
            match sequence.next_request(now) {
                Some(request) => (request, peer),
                None => break,
            }
        };

        let message = OutboundMessage::GetBlockBodies {
            request_id: request.request_id,
            hashes: request.hashes.clone(),
            min_block: request.min_block,
            peer,
        };
        let sent = execute_required(inner, &message).await?;
        let mut sequence = inner.shared.body_sequence.lock().expect("poisoned");
        match sent.first() {
            Some(peer) => {
                sequence.on_sent(request.request_id, *peer);
                ExchangeStats::bump(&inner.shared.stats.body_requests_sent);
            }
            None => {
                sequence.on_no_peer(request.request_id);
                drop(sequence);
                enter_no_peer_backoff(inner, now);
                break;
            }
        }
    }

    Ok(())
}

/// Least-recently-used known peer that still has request capacity.
fn pick_body_peer(inner: &Arc<Inner>, sequence: &BodySequence) -> Option<PeerId> {
    let mut known = inner.shared.known_peers.lock().expect("poisoned");
    let index = known.iter().position(|peer| sequence.has_capacity(peer))?;
    let peer = known.remove(index).expect("index from position");
    known.push_back(peer);
    Some(peer)
}

fn enter_no_peer_backoff(inner: &Arc<Inner>, now: Instant) {
    *inner.shared.no_peer_until.lock().expect("poisoned") = Some(now + inner.config.no_peer_delay);
}

/// Sends a message whose delivery matters for progress. Timeouts count as "no peers"; transport
/// failures propagate; cancellation is normal shutdown.
async fn execute_required(inner: &Arc<Inner>, message: &OutboundMessage) -> Result<Vec<PeerId>, SyncError> {
    tracing::trace!("Outbound {} ({})", message.name(), message.summary());
    match message.execute(&*inner.sentry, inner.config.sentry_call_timeout).await {
        Ok(peers) => {
            for peer in &peers {
                inner.shared.record_peer(*peer);
            }
            Ok(peers)
        }
        Err(err) if err.is_cancelled() => Ok(Vec::new()),
        Err(SentryError::Timeout) => {
            tracing::warn!("{} call timed out", message.name());
            Ok(Vec::new())
        }
        Err(err) => Err(err.into()),
    }
}

/// Replies and penalisations are best effort: failure is logged and never retried.
async fn execute_best_effort(inner: &Arc<Inner>, message: OutboundMessage) {
    if let Err(err) = message.execute(&*inner.sentry, inner.config.sentry_call_timeout).await {
        if !err.is_cancelled() {
            tracing::debug!("{} failed: {err:#} ({})", message.name(), message.summary());
        }
    }
}

async fn send_penalty(inner: &Arc<Inner>, penalty: PeerPenalty) {
    tracing::debug!("Penalising peer {} ({:?})", penalty.peer, penalty.penalty);
    ExchangeStats::bump(&inner.shared.stats.penalties_sent);
    execute_best_effort(inner, OutboundMessage::Penalize { peer: penalty.peer, penalty: penalty.penalty }).await;
}
