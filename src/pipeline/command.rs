// src/pipeline/command.rs — External generation command
//
// The child gets its inputs as JSON files named by environment variables and
// reports progress on stdout, one directive per line:
//
//   STAGE <name>            a stage is starting
//   ERROR <stage> <cause>   that stage failed; the run stops there
//   anything else           free-form progress
//
// On success it writes a GenerationManifest to $VIDLOOP_MANIFEST.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{GenerationPipeline, PipelineRequest, StageError, StageSink};
use crate::core::types::GenerationManifest;

pub struct CommandPipeline {
    program: String,
    args: Vec<String>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Directive<'a> {
    Stage(&'a str),
    Error { stage: &'a str, cause: &'a str },
    Progress(&'a str),
}

/// Classify one stdout line.
pub(crate) fn parse_line(line: &str) -> Directive<'_> {
    let line = line.trim_end();
    if let Some(rest) = line.strip_prefix("STAGE ") {
        let stage = rest.trim();
        if !stage.is_empty() {
            return Directive::Stage(stage);
        }
    }
    if let Some(rest) = line.strip_prefix("ERROR ") {
        let rest = rest.trim();
        let (stage, cause) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if !stage.is_empty() {
            let cause = cause.trim();
            return Directive::Error {
                stage,
                cause: if cause.is_empty() { "unspecified error" } else { cause },
            };
        }
    }
    Directive::Progress(line)
}

impl CommandPipeline {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn write_inputs(&self, request: &PipelineRequest, io_dir: &Path) -> Result<(PathBuf, PathBuf), String> {
        std::fs::create_dir_all(io_dir).map_err(|e| format!("cannot create {}: {e}", io_dir.display()))?;
        let req_path = io_dir.join("requirement.json");
        let cfg_path = io_dir.join("config.json");
        let write = |path: &Path, json: serde_json::Result<String>| -> Result<(), String> {
            let body = json.map_err(|e| e.to_string())?;
            std::fs::write(path, body).map_err(|e| format!("cannot write {}: {e}", path.display()))
        };
        write(&req_path, serde_json::to_string_pretty(&request.requirement))?;
        write(&cfg_path, serde_json::to_string_pretty(&request.config))?;
        Ok((req_path, cfg_path))
    }
}

#[async_trait]
impl GenerationPipeline for CommandPipeline {
    fn name(&self) -> &str {
        "command"
    }

    async fn execute(
        &self,
        request: PipelineRequest,
        sink: StageSink,
    ) -> Result<GenerationManifest, StageError> {
        let io_dir = request.work_dir.join("pipeline");
        let (req_path, cfg_path) = self
            .write_inputs(&request, &io_dir)
            .map_err(|e| StageError::new("", e))?;
        let manifest_path = io_dir.join("manifest.json");
        let log_path = io_dir.join("stderr.log");
        let stderr = std::fs::File::create(&log_path)
            .map_err(|e| StageError::new("", format!("cannot create {}: {e}", log_path.display())))?;

        let stages = request
            .stages
            .enabled()
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");

        tracing::debug!(
            run_id = %request.run_id,
            iteration = request.iteration,
            "Running: {} {}",
            self.program,
            self.args.join(" ")
        );
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("VIDLOOP_REQUIREMENT", &req_path)
            .env("VIDLOOP_CONFIG", &cfg_path)
            .env("VIDLOOP_MANIFEST", &manifest_path)
            .env("VIDLOOP_STAGES", &stages)
            .env("VIDLOOP_WORK_DIR", &request.work_dir)
            .current_dir(&request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StageError::new("", format!("failed to start {}: {e}", self.program)))?;

        let mut last_stage = String::new();
        let mut reported: Option<StageError> = None;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_line(&line) {
                    Directive::Stage(stage) => {
                        last_stage = stage.to_string();
                        sink.stage_started(stage);
                    }
                    Directive::Error { stage, cause } => {
                        if reported.is_none() {
                            reported = Some(StageError::new(stage, cause));
                        }
                    }
                    Directive::Progress(text) if !text.trim().is_empty() => sink.message(text),
                    Directive::Progress(_) => {}
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| StageError::new(last_stage.clone(), format!("wait failed: {e}")))?;

        if let Some(err) = reported {
            return Err(err);
        }
        if !status.success() {
            return Err(StageError::new(
                last_stage,
                format!("{} exited with {} (see {})", self.program, status, log_path.display()),
            ));
        }

        let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
            StageError::new(
                last_stage.clone(),
                format!("no manifest at {}: {e}", manifest_path.display()),
            )
        })?;
        let mut manifest: GenerationManifest = serde_json::from_str(&raw)
            .map_err(|e| StageError::new(last_stage.clone(), format!("invalid manifest: {e}")))?;
        if manifest.artifact_path.is_relative() {
            manifest.artifact_path = request.work_dir.join(&manifest.artifact_path);
        }
        if manifest.logs_path.is_none() {
            manifest.logs_path = Some(log_path);
        }
        Ok(manifest)
    }
}
