use std::time::Duration;

use hc_sync::SyncConfig;

#[derive(Clone, Debug, clap::Args)]
pub struct SyncParams {
    /// Max number of blocks requested to peers in a single request.
    #[arg(env = "HEMATITE_MAX_BLOCKS_PER_REQ", long, default_value_t = 128, value_name = "COUNT")]
    pub max_blocks_per_req: usize,

    /// Max number of pending requests made to each peer.
    #[arg(env = "HEMATITE_MAX_REQUESTS_PER_PEER", long, default_value_t = 4, value_name = "COUNT")]
    pub max_requests_per_peer: usize,

    /// Time (secs) after which a response is considered lost and will be re-tried.
    #[arg(env = "HEMATITE_REQUEST_DEADLINE_S", long, default_value_t = 30, value_name = "SECONDS")]
    pub request_deadline_s: u64,

    /// Time (msecs) to wait before making a new request when no peer accepted the last.
    #[arg(env = "HEMATITE_NO_PEER_DELAY_MS", long, default_value_t = 1000, value_name = "MILLISECONDS")]
    pub no_peer_delay_ms: u64,
}

impl SyncParams {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_blocks_per_request: self.max_blocks_per_req,
            max_requests_per_peer: self.max_requests_per_peer,
            request_deadline: Duration::from_secs(self.request_deadline_s),
            no_peer_delay: Duration::from_millis(self.no_peer_delay_ms),
            ..Default::default()
        }
    }
}
