//! Top-level driver: runs the stages forward in order, rewinds them in reverse order when one
//! of them reports an inconsistency, and repeats until cancelled or a stage fails.

use std::sync::Arc;

use alloy_primitives::B256;
use hp_utils::service::ServiceContext;

use crate::stage::{Stage, StageOutcome};
use crate::{SyncConfig, SyncError};

pub struct StageLoop {
    stages: Vec<Box<dyn Stage>>,
    config: Arc<SyncConfig>,
}

impl StageLoop {
    pub fn new(stages: Vec<Box<dyn Stage>>, config: Arc<SyncConfig>) -> Self {
        Self { stages, config }
    }

    pub async fn run(&mut self, ctx: ServiceContext) -> Result<(), SyncError> {
        let mut first_sync = true;
        while !ctx.is_cancelled() {
            let (outcome, last_stage) = self.forward(first_sync, &ctx).await?;

            if let StageOutcome::UnwindNeeded { unwind_point, bad_block } = outcome {
                tracing::warn!(
                    "🔙 Unwinding to block {unwind_point}{}",
                    bad_block.map(|hash| format!(" (bad block {:#x})", hash)).unwrap_or_default()
                );
                self.unwind(unwind_point, bad_block, last_stage).await?;
            }

            first_sync = false;
            // An in-sync node re-enters forward to pick up further progress; the pause keeps it
            // from spinning against empty cursors.
            if ctx.run_until_cancelled(tokio::time::sleep(self.config.round_idle_pause)).await.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Runs stages in array order. The first `UnwindNeeded` truncates the pass; the index
    /// reached is reported so the unwind covers exactly the touched stages.
    async fn forward(&mut self, first_sync: bool, ctx: &ServiceContext) -> Result<(StageOutcome, usize), SyncError> {
        for (index, stage) in self.stages.iter_mut().enumerate() {
            if ctx.is_cancelled() {
                break;
            }
            tracing::debug!("[{}] forward (first_sync={first_sync})", stage.id());
            match stage.forward(first_sync).await? {
                StageOutcome::Done => {}
                outcome @ StageOutcome::UnwindNeeded { .. } => return Ok((outcome, index)),
            }
        }
        Ok((StageOutcome::Done, self.stages.len().saturating_sub(1)))
    }

    /// Rewinds the touched stages in reverse order, from `last_stage` down to stage 0 inclusive.
    async fn unwind(&mut self, point: u64, bad_block: Option<B256>, last_stage: usize) -> Result<(), SyncError> {
        for index in (0..=last_stage).rev() {
            let stage = &mut self.stages[index];
            tracing::debug!("[{}] unwind to {point}", stage.id());
            stage.unwind_to(point, bad_block).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageId;
    use std::sync::Mutex;

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct ScriptedStage {
        id: StageId,
        log: CallLog,
        // One entry per forward call; when exhausted the stage keeps returning Done.
        script: Vec<Result<StageOutcome, ()>>,
        calls: usize,
    }

    impl ScriptedStage {
        fn new(id: StageId, log: CallLog, script: Vec<Result<StageOutcome, ()>>) -> Self {
            Self { id, log, script, calls: 0 }
        }
    }

    #[async_trait::async_trait]
    impl Stage for ScriptedStage {
        fn id(&self) -> StageId {
            self.id
        }

        async fn forward(&mut self, _first_sync: bool) -> Result<StageOutcome, SyncError> {
            self.log.lock().unwrap().push(format!("forward {}", self.id));
            let outcome = self.script.get(self.calls).cloned().unwrap_or(Ok(StageOutcome::Done));
            self.calls += 1;
            outcome.map_err(|_| SyncError::Other(anyhow::anyhow!("scripted failure")))
        }

        async fn unwind_to(&mut self, point: u64, _bad_block: Option<B256>) -> Result<(), SyncError> {
            self.log.lock().unwrap().push(format!("unwind {} to {point}", self.id));
            Ok(())
        }
    }

    fn harness(scripts: Vec<(StageId, Vec<Result<StageOutcome, ()>>)>) -> (StageLoop, CallLog) {
        let log: CallLog = Default::default();
        let stages = scripts
            .into_iter()
            .map(|(id, script)| Box::new(ScriptedStage::new(id, log.clone(), script)) as Box<dyn Stage>)
            .collect();
        let config = SyncConfig { round_idle_pause: std::time::Duration::from_millis(1), ..Default::default() };
        (StageLoop::new(stages, Arc::new(config)), log)
    }

    #[tokio::test]
    async fn forward_runs_stages_in_order() {
        let (mut stage_loop, log) = harness(vec![(StageId::Headers, vec![]), (StageId::Bodies, vec![])]);
        let ctx = ServiceContext::new();
        let (outcome, last) = stage_loop.forward(true, &ctx).await.unwrap();
        assert_eq!(outcome, StageOutcome::Done);
        assert_eq!(last, 1);
        assert_eq!(*log.lock().unwrap(), vec!["forward Headers", "forward Bodies"]);
    }

    #[tokio::test]
    async fn unwind_needed_truncates_the_pass() {
        let unwind = StageOutcome::UnwindNeeded { unwind_point: 7, bad_block: None };
        let (mut stage_loop, log) =
            harness(vec![(StageId::Headers, vec![Ok(unwind)]), (StageId::Bodies, vec![])]);
        let ctx = ServiceContext::new();
        let (outcome, last) = stage_loop.forward(true, &ctx).await.unwrap();
        assert_eq!(outcome, unwind);
        assert_eq!(last, 0);
        // The second stage was never reached.
        assert_eq!(*log.lock().unwrap(), vec!["forward Headers"]);
    }

    #[tokio::test]
    async fn unwind_runs_touched_stages_in_reverse_down_to_zero() {
        let (mut stage_loop, log) = harness(vec![(StageId::Headers, vec![]), (StageId::Bodies, vec![])]);
        stage_loop.unwind(42, None, 1).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["unwind Bodies to 42", "unwind Headers to 42"]);
    }

    #[tokio::test]
    async fn run_unwinds_only_stages_reached_by_forward() {
        let unwind = StageOutcome::UnwindNeeded { unwind_point: 3, bad_block: Some(B256::repeat_byte(1)) };
        // Second forward round returns Done so the loop can be cancelled deterministically.
        let (mut stage_loop, log) =
            harness(vec![(StageId::Headers, vec![Ok(unwind), Ok(StageOutcome::Done)]), (StageId::Bodies, vec![])]);

        let ctx = ServiceContext::new();
        let loop_ctx = ctx.child();
        let handle = tokio::spawn(async move { stage_loop.run(loop_ctx).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        ctx.cancel_global();
        handle.await.unwrap().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log[0], "forward Headers");
        // The bodies stage was not part of the truncated pass, so it is not unwound.
        assert_eq!(log[1], "unwind Headers to 3");
        assert_eq!(log[2], "forward Headers");
        assert_eq!(log[3], "forward Bodies");
    }

    #[tokio::test]
    async fn stage_error_aborts_the_loop() {
        let (mut stage_loop, _log) = harness(vec![(StageId::Headers, vec![Err(())]), (StageId::Bodies, vec![])]);
        let ctx = ServiceContext::new();
        assert!(stage_loop.run(ctx).await.is_err());
    }
}
