// src/core/runner.rs — Runs one generation pass through the pipeline collaborator

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::GenerationManifest;
use crate::infra::errors::{Result, VidloopError};
use crate::pipeline::{GenerationPipeline, PipelineRequest, StageEvent, StageSink};

/// Stage name used when a failure happens before any stage started.
const UNKNOWN_STAGE: &str = "pipeline";

pub struct GenerationRunner {
    pipeline: Arc<dyn GenerationPipeline>,
    timeout: Duration,
}

impl GenerationRunner {
    pub fn new(pipeline: Arc<dyn GenerationPipeline>, timeout: Duration) -> Self {
        Self { pipeline, timeout }
    }

    pub fn pipeline_name(&self) -> &str {
        self.pipeline.name()
    }

    /// Run the pipeline once in a spawned worker and wait for its manifest.
    ///
    /// Stage notifications are passed to `on_event` as they arrive. Any
    /// failure comes back as `Generation { stage, cause }` naming the last
    /// stage attempted. Cancellation is left to the pipeline to observe
    /// between stages; the runner only reports it once as a stage message.
    /// The worker is aborted when the timeout elapses.
    pub async fn run(
        &self,
        request: PipelineRequest,
        cancel: &CancellationToken,
        mut on_event: impl FnMut(&StageEvent) + Send,
    ) -> Result<GenerationManifest> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = StageSink::new(tx, cancel.clone());
        let pipeline = self.pipeline.clone();
        let mut worker = tokio::spawn(async move { pipeline.execute(request, sink).await });

        let mut last_stage: Option<String> = None;
        let mut track = |ev: StageEvent, last: &mut Option<String>| {
            if let StageEvent::Started(stage) = &ev {
                *last = Some(stage.clone());
            }
            on_event(&ev);
        };

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut cancel_noted = false;
        let joined = loop {
            tokio::select! {
                Some(ev) = rx.recv() => track(ev, &mut last_stage),
                _ = cancel.cancelled(), if !cancel_noted => {
                    cancel_noted = true;
                    tracing::debug!("cancellation requested mid-generation");
                    track(StageEvent::Message("cancellation requested, finishing current stage".into()), &mut last_stage);
                }
                res = &mut worker => break res,
                _ = &mut deadline => {
                    worker.abort();
                    let stage = last_stage.unwrap_or_else(|| UNKNOWN_STAGE.to_string());
                    tracing::warn!(stage = %stage, "generation timed out after {}s", self.timeout.as_secs());
                    return Err(VidloopError::Generation {
                        stage,
                        cause: format!("timed out after {}s", self.timeout.as_secs()),
                    });
                }
            }
        };

        // Events sent just before the worker returned.
        while let Ok(ev) = rx.try_recv() {
            track(ev, &mut last_stage);
        }

        let fallback_stage = || last_stage.clone().unwrap_or_else(|| UNKNOWN_STAGE.to_string());
        match joined {
            Ok(Ok(manifest)) => Ok(manifest),
            Ok(Err(e)) => Err(VidloopError::Generation {
                stage: if e.stage.is_empty() { fallback_stage() } else { e.stage },
                cause: e.cause,
            }),
            Err(join_err) => Err(VidloopError::Generation {
                stage: fallback_stage(),
                cause: format!("pipeline worker failed: {join_err}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::translator::heuristic_requirement;
    use crate::core::types::ConfigSnapshot;
    use crate::pipeline::StageError;
    use async_trait::async_trait;
    use std::path::PathBuf;

    enum Behaviour {
        Succeed,
        FailAt(&'static str),
        FailUnnamed,
        Hang,
        Panic,
    }

    struct Scripted(Behaviour);

    #[async_trait]
    impl GenerationPipeline for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn execute(
            &self,
            _request: PipelineRequest,
            sink: StageSink,
        ) -> std::result::Result<GenerationManifest, StageError> {
            sink.stage_started("script");
            sink.message("writing");
            sink.stage_started("compile");
            match self.0 {
                Behaviour::Succeed => Ok(GenerationManifest {
                    artifact_path: PathBuf::from("final.mp4"),
                    scenes: vec![],
                    reported: None,
                    logs_path: None,
                }),
                Behaviour::FailAt(stage) => Err(StageError::new(stage, "boom")),
                Behaviour::FailUnnamed => Err(StageError::new("", "boom")),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(StageError::new("compile", "unreachable"))
                }
                Behaviour::Panic => panic!("pipeline bug"),
            }
        }
    }

    fn request() -> PipelineRequest {
        let requirement = heuristic_requirement("15s tech explainer");
        let config = ConfigSnapshot::initial(&requirement);
        PipelineRequest {
            run_id: "r1".into(),
            iteration: 1,
            stages: config.stages,
            requirement,
            config,
            work_dir: PathBuf::from("."),
        }
    }

    async fn run(b: Behaviour, timeout: Duration) -> (Result<GenerationManifest>, Vec<StageEvent>) {
        let runner = GenerationRunner::new(Arc::new(Scripted(b)), timeout);
        let mut events = Vec::new();
        let res = runner
            .run(request(), &CancellationToken::new(), |e| events.push(e.clone()))
            .await;
        (res, events)
    }

    #[tokio::test]
    async fn test_success_forwards_all_events() {
        let (res, events) = run(Behaviour::Succeed, Duration::from_secs(5)).await;
        assert!(res.is_ok());
        assert_eq!(
            events,
            vec![
                StageEvent::Started("script".into()),
                StageEvent::Message("writing".into()),
                StageEvent::Started("compile".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_named_failure() {
        let (res, _) = run(Behaviour::FailAt("narration"), Duration::from_secs(5)).await;
        match res {
            Err(VidloopError::Generation { stage, cause }) => {
                assert_eq!(stage, "narration");
                assert_eq!(cause, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unnamed_failure_blames_last_stage() {
        let (res, _) = run(Behaviour::FailUnnamed, Duration::from_secs(5)).await;
        assert!(matches!(res, Err(VidloopError::Generation { stage, .. }) if stage == "compile"));
    }

    #[tokio::test]
    async fn test_timeout_aborts_worker() {
        let (res, _) = run(Behaviour::Hang, Duration::from_millis(100)).await;
        match res {
            Err(VidloopError::Generation { stage, cause }) => {
                assert_eq!(stage, "compile");
                assert!(cause.contains("timed out"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_is_reported_but_does_not_abort() {
        let runner = GenerationRunner::new(Arc::new(Scripted(Behaviour::Hang)), Duration::from_millis(100));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut events = Vec::new();
        let res = runner.run(request(), &cancel, |e| events.push(e.clone())).await;

        // The stage keeps running until the deadline.
        assert!(matches!(res, Err(VidloopError::Generation { cause, .. }) if cause.contains("timed out")));
        let notes = events
            .iter()
            .filter(|e| matches!(e, StageEvent::Message(m) if m.starts_with("cancellation requested")))
            .count();
        assert_eq!(notes, 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_generation_error() {
        let (res, _) = run(Behaviour::Panic, Duration::from_secs(5)).await;
        assert!(matches!(res, Err(VidloopError::Generation { .. })));
    }
}
