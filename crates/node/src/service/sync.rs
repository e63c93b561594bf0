use std::sync::Arc;

use hc_db::HematiteBackend;
use hc_sentry::SentryClient;
use hc_sync::{sync_worker, SyncConfig};
use hp_utils::service::{Service, ServiceRunner};

pub struct SyncService {
    backend: Arc<HematiteBackend>,
    sentry: Arc<dyn SentryClient>,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(backend: Arc<HematiteBackend>, sentry: Arc<dyn SentryClient>, config: SyncConfig) -> Self {
        tracing::info!(
            "⚙️  Sync: max_blocks_per_req={} max_requests_per_peer={} request_deadline={:?} no_peer_delay={:?}",
            config.max_blocks_per_request,
            config.max_requests_per_peer,
            config.request_deadline,
            config.no_peer_delay,
        );
        Self { backend, sentry, config }
    }
}

#[async_trait::async_trait]
impl Service for SyncService {
    async fn start<'a>(&mut self, runner: ServiceRunner<'a>) -> anyhow::Result<()> {
        let backend = Arc::clone(&self.backend);
        let sentry = Arc::clone(&self.sentry);
        let config = self.config.clone();
        runner.service_loop(move |ctx| sync_worker(backend, sentry, config, ctx));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sync"
    }
}
