//! Service framework for the node's long-running tasks.
//!
//! Every long-lived component (database, sentry connection, sync engine) implements [`Service`].
//! A service starts its main loop through [`ServiceRunner::service_loop`]; the loop receives a
//! [`ServiceContext`] and must keep running until it completes or the context is cancelled.
//! Cancellation is cooperative: a loop that ignores its context is forcefully aborted after
//! [`SERVICE_GRACE_PERIOD`].
//!
//! [`ServiceMonitor`] drives the set of registered services to completion and translates
//! SIGINT/SIGTERM into a global cancellation. The node exits once every service loop has
//! returned.

use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Maximum duration a service is allowed to take to shut down after cancellation, after which it
/// is forcefully aborted.
pub const SERVICE_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Cancellation scope handed to every service loop.
///
/// A context is a pair of cancellation tokens: the global one covers the whole node, the local
/// one this service and its children. [`ServiceContext::child`] builds nested scopes so a service
/// can cancel its own subtasks without taking the node down.
#[derive(Clone)]
pub struct ServiceContext {
    global: CancellationToken,
    local: CancellationToken,
}

impl Default for ServiceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceContext {
    pub fn new() -> Self {
        let global = CancellationToken::new();
        let local = global.child_token();
        Self { global, local }
    }

    /// A nested scope: cancelling the child does not affect the parent.
    pub fn child(&self) -> Self {
        Self { global: self.global.clone(), local: self.local.child_token() }
    }

    /// Resolves when this service is cancelled, either locally or globally.
    pub async fn cancelled(&self) {
        self.local.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.local.is_cancelled()
    }

    /// Cancels every service of the node.
    pub fn cancel_global(&self) {
        self.global.cancel()
    }

    /// Cancels this service and its children.
    pub fn cancel_local(&self) {
        self.local.cancel()
    }

    /// Runs the given future to completion, or returns `None` if the service is cancelled first.
    pub async fn run_until_cancelled<F: Future>(&self, f: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.cancelled() => None,
            res = f => Some(res),
        }
    }
}

/// A long-running component of the node.
///
/// `start` must register the service's main loop through the runner and return promptly; the
/// loop itself runs until completion or cancellation.
#[async_trait::async_trait]
pub trait Service: Send {
    async fn start<'a>(&mut self, runner: ServiceRunner<'a>) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// Handle through which a [`Service`] registers its main loop.
pub struct ServiceRunner<'a> {
    ctx: ServiceContext,
    join_set: &'a mut JoinSet<anyhow::Result<()>>,
    name: &'static str,
}

impl<'a> ServiceRunner<'a> {
    fn new(ctx: ServiceContext, join_set: &'a mut JoinSet<anyhow::Result<()>>, name: &'static str) -> Self {
        Self { ctx, join_set, name }
    }

    /// Registers the main loop of the service.
    ///
    /// The future must only resolve once the service has finished execution or observed
    /// cancellation; the monitor treats its completion as the service being stopped.
    pub fn service_loop<F, Fut>(self, f: F)
    where
        F: FnOnce(ServiceContext) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = self.name;
        let fut = f(self.ctx);
        self.join_set.spawn(async move {
            tracing::debug!("Starting service loop: {name}");
            let res = fut.await;
            tracing::debug!("Service loop ended: {name}");
            res.with_context(|| format!("In service: {name}"))
        });
    }
}

/// Orchestrates the node's services: starts them, waits for completion, cancels everything on
/// SIGINT/SIGTERM or on the first service error.
#[derive(Default)]
pub struct ServiceMonitor {
    services: Vec<Box<dyn Service>>,
}

impl ServiceMonitor {
    pub fn with(mut self, service: impl Service + 'static) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Runs every registered service to completion.
    ///
    /// Returns the first service error, if any; the remaining services are cancelled and given
    /// [`SERVICE_GRACE_PERIOD`] to wind down.
    pub async fn start(mut self) -> anyhow::Result<()> {
        let ctx = ServiceContext::new();
        let mut join_set = JoinSet::new();

        for service in &mut self.services {
            let runner = ServiceRunner::new(ctx.child(), &mut join_set, service.name());
            service.start(runner).await.with_context(|| format!("Starting service: {}", service.name()))?;
        }

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Installing SIGTERM handler")?;

        let mut first_error = None;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("🛑 SIGINT received, shutting down...");
                    ctx.cancel_global();
                }
                _ = sigterm.recv() => {
                    tracing::info!("🛑 SIGTERM received, shutting down...");
                    ctx.cancel_global();
                }
                res = join_set.join_next() => match res {
                    Some(res) => {
                        match res.context("Service panicked")? {
                            Ok(()) => {}
                            Err(err) => {
                                tracing::error!("Service error: {err:#}");
                                first_error.get_or_insert(err);
                                // A dead service takes the node down with it.
                                ctx.cancel_global();
                            }
                        }
                    }
                    None => break,
                },
            }

            if ctx.is_cancelled() {
                self.drain(join_set).await?;
                break;
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Waits for the remaining service loops, aborting them past the grace period.
    async fn drain(&self, mut join_set: JoinSet<anyhow::Result<()>>) -> anyhow::Result<()> {
        let graceful = tokio::time::timeout(SERVICE_GRACE_PERIOD, async {
            while let Some(res) = join_set.join_next().await {
                log_shutdown_result(res);
            }
        })
        .await;
        if graceful.is_err() {
            tracing::warn!("Some services did not shut down within the grace period, aborting them");
            join_set.abort_all();
            while let Some(res) = join_set.join_next().await {
                log_shutdown_result(res);
            }
        }
        Ok(())
    }
}

fn log_shutdown_result(res: Result<anyhow::Result<()>, tokio::task::JoinError>) {
    match res {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!("Service error during shutdown: {err:#}"),
        Err(err) if err.is_cancelled() => {}
        Err(err) => tracing::error!("Service panicked during shutdown: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Looper {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Service for Looper {
        async fn start<'a>(&mut self, runner: ServiceRunner<'a>) -> anyhow::Result<()> {
            let stopped = self.stopped.clone();
            runner.service_loop(move |ctx| async move {
                ctx.cancelled().await;
                stopped.store(true, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        }

        fn name(&self) -> &'static str {
            "looper"
        }
    }

    #[tokio::test]
    async fn child_cancellation_does_not_reach_parent() {
        let parent = ServiceContext::new();
        let child = parent.child();
        child.cancel_local();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn global_cancellation_reaches_children() {
        let parent = ServiceContext::new();
        let child = parent.child().child();
        parent.cancel_global();
        child.cancelled().await;
    }

    #[tokio::test]
    async fn run_until_cancelled_returns_none_on_cancel() {
        let ctx = ServiceContext::new();
        ctx.cancel_local();
        let res = ctx.run_until_cancelled(std::future::pending::<()>()).await;
        assert!(res.is_none());
    }

    #[tokio::test]
    async fn monitor_stops_service_on_global_cancel() {
        let stopped = Arc::new(AtomicBool::new(false));
        let monitor = ServiceMonitor::default().with(Looper { stopped: stopped.clone() });

        // Cancel from inside: a second service that immediately requests global shutdown.
        struct Canceller;
        #[async_trait::async_trait]
        impl Service for Canceller {
            async fn start<'a>(&mut self, runner: ServiceRunner<'a>) -> anyhow::Result<()> {
                runner.service_loop(|ctx| async move {
                    ctx.cancel_global();
                    Ok(())
                });
                Ok(())
            }
            fn name(&self) -> &'static str {
                "canceller"
            }
        }

        let monitor = monitor.with(Canceller);
        monitor.start().await.unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }
}
