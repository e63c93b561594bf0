use std::time::Duration;

/// Tunables of the download engine, threaded through construction of the body sequence, header
/// chain and block exchange.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Max number of blocks requested to peers in a single body request.
    pub max_blocks_per_request: usize,
    /// Max number of pending body requests per peer.
    pub max_requests_per_peer: usize,
    /// Time after which a body response is considered lost and the entries are re-tried.
    pub request_deadline: Duration,
    /// Time to wait before making a new request when no peer accepted the last one.
    pub no_peer_delay: Duration,

    /// Headers asked for in a single header request.
    pub max_headers_per_request: u64,
    /// Cap on simultaneously open anchors; segments arriving past the cap are dropped.
    pub max_anchors: usize,
    /// Time between extension attempts of the same anchor.
    pub anchor_retry_interval: Duration,
    /// Extension attempts before an anchor and its headers are abandoned.
    pub max_anchor_retries: u32,

    /// Body retry count at which the unresponsive peer is penalised.
    pub body_retry_penalty_threshold: u32,
    /// Max headers persisted in one write batch.
    pub headers_persist_batch: usize,
    /// How long a stage waits on an exchange cursor before polling again.
    pub stage_poll_interval: Duration,
    /// Consecutive empty polls while in sync after which a stage pass returns.
    pub stage_idle_polls: u32,
    /// Pause between stage-loop rounds.
    pub round_idle_pause: Duration,
    /// Per-call deadline on outbound sentry calls.
    pub sentry_call_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_request: 128,
            max_requests_per_peer: 4,
            request_deadline: Duration::from_secs(30),
            no_peer_delay: Duration::from_millis(1000),
            max_headers_per_request: 192,
            max_anchors: 16,
            anchor_retry_interval: Duration::from_secs(5),
            max_anchor_retries: 10,
            body_retry_penalty_threshold: 3,
            headers_persist_batch: 4096,
            stage_poll_interval: Duration::from_millis(500),
            stage_idle_polls: 4,
            round_idle_pause: Duration::from_secs(1),
            sentry_call_timeout: Duration::from_secs(5),
        }
    }
}
