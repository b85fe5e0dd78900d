// src/pipeline/mod.rs — Generation pipeline collaborator

pub mod command;
pub mod placeholder;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::types::{ConfigSnapshot, GenerationManifest, RequirementSpec, StageFlags};
use crate::infra::config::{PipelineConfig, PipelineKind};

pub use command::CommandPipeline;
pub use placeholder::PlaceholderPipeline;

/// Everything one pipeline invocation needs.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub run_id: String,
    pub iteration: u32,
    pub requirement: RequirementSpec,
    pub config: ConfigSnapshot,
    pub stages: StageFlags,
    /// Scratch directory owned by this iteration. Artifacts go here.
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Started(String),
    Message(String),
}

/// A stage failed. `stage` may be empty when the pipeline can't tell which.
#[derive(Debug, Clone, PartialEq)]
pub struct StageError {
    pub stage: String,
    pub cause: String,
}

impl StageError {
    pub fn new(stage: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            cause: cause.into(),
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage '{}' failed: {}", self.stage, self.cause)
    }
}

/// Progress handle given to a pipeline. Sending never blocks and never
/// fails the pipeline, even if nobody is listening anymore.
#[derive(Clone)]
pub struct StageSink {
    tx: mpsc::UnboundedSender<StageEvent>,
    cancel: CancellationToken,
}

impl StageSink {
    pub fn new(tx: mpsc::UnboundedSender<StageEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    pub fn stage_started(&self, stage: impl Into<String>) {
        let _ = self.tx.send(StageEvent::Started(stage.into()));
    }

    pub fn message(&self, text: impl Into<String>) {
        let _ = self.tx.send(StageEvent::Message(text.into()));
    }

    /// Pipelines that run stages in-process poll this between stages.
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
pub trait GenerationPipeline: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        request: PipelineRequest,
        sink: StageSink,
    ) -> Result<GenerationManifest, StageError>;
}

/// Build the configured pipeline. `placeholder` forces the test-mode renderer.
pub fn from_config(cfg: &PipelineConfig, placeholder: bool) -> anyhow::Result<Arc<dyn GenerationPipeline>> {
    if placeholder || cfg.kind == PipelineKind::Placeholder {
        return Ok(Arc::new(PlaceholderPipeline::default()));
    }
    let command = cfg.command.as_deref().ok_or_else(|| {
        anyhow::anyhow!(
            "no generation command configured; set [pipeline] command in config.toml or pass --placeholder"
        )
    })?;
    Ok(Arc::new(CommandPipeline::new(command, cfg.args.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = StageSink::new(tx, CancellationToken::new());
        sink.stage_started("script");
        sink.message("still fine");
        assert!(!sink.should_stop());
    }

    #[test]
    fn test_from_config() {
        let cfg = PipelineConfig::default();
        assert!(from_config(&cfg, false).is_err());
        assert_eq!(from_config(&cfg, true).unwrap().name(), "placeholder");

        let cfg = PipelineConfig {
            command: Some("./generate.sh".into()),
            ..Default::default()
        };
        assert_eq!(from_config(&cfg, false).unwrap().name(), "command");
    }

    #[test]
    fn test_stage_error_display() {
        let e = StageError::new("compile", "ffmpeg exited with 1");
        assert_eq!(e.to_string(), "stage 'compile' failed: ffmpeg exited with 1");
    }
}
