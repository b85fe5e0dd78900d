// src/pipeline/placeholder.rs — Test-mode pipeline rendering a solid-colour clip
//
// Walks the enabled stages in order, checking for cancellation between them.
// Only `compile` does real work: ffmpeg renders a blank clip with the
// snapshot's resolution, frame rate, codec and planned duration.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{GenerationPipeline, PipelineRequest, StageError, StageSink};
use crate::core::types::{ConfigSnapshot, GenerationManifest, MediaInfo, SceneMetadata, StageName};

pub struct PlaceholderPipeline {
    ffmpeg: String,
}

impl Default for PlaceholderPipeline {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl PlaceholderPipeline {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

fn encoder_for(codec: &str) -> &str {
    match codec {
        "h264" => "libx264",
        "hevc" => "libx265",
        "vp9" => "libvpx-vp9",
        "av1" => "libaom-av1",
        "prores" => "prores_ks",
        other => other,
    }
}

/// ffmpeg arguments for the placeholder render.
pub(crate) fn ffmpeg_args(config: &ConfigSnapshot, output: &Path) -> Vec<String> {
    let res = config.output_resolution;
    let mut args: Vec<String> = [
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "lavfi",
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!(
        "color=c=black:s={}x{}:r={}:d={:.3}",
        res.width,
        res.height,
        config.fps,
        config.planned_duration_sec()
    ));
    args.extend(["-c:v".to_string(), encoder_for(&config.codec).to_string()]);
    if config.codec != "prores" {
        args.extend(["-pix_fmt".to_string(), "yuv420p".to_string()]);
    }
    args.push(output.display().to_string());
    args
}

fn scenes(request: &PipelineRequest) -> Vec<SceneMetadata> {
    let n = request.config.scene_count;
    (1..=n)
        .map(|i| SceneMetadata {
            index: i,
            duration_sec: request.config.scene_duration_sec,
            description: format!("Scene {i} of {n}: {}", request.requirement.prompt_summary),
            image_path: None,
        })
        .collect()
}

impl PlaceholderPipeline {
    async fn compile(&self, request: &PipelineRequest, output: &PathBuf) -> Result<(), StageError> {
        let binary = which::which(&self.ffmpeg)
            .map_err(|_| StageError::new("compile", format!("{} not found on PATH", self.ffmpeg)))?;
        std::fs::create_dir_all(&request.work_dir)
            .map_err(|e| StageError::new("compile", e.to_string()))?;

        let out = Command::new(binary)
            .args(ffmpeg_args(&request.config, output))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StageError::new("compile", format!("failed to run {}: {e}", self.ffmpeg)))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(StageError::new(
                "compile",
                format!("{} exited with {}: {}", self.ffmpeg, out.status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl GenerationPipeline for PlaceholderPipeline {
    fn name(&self) -> &str {
        "placeholder"
    }

    async fn execute(
        &self,
        request: PipelineRequest,
        sink: StageSink,
    ) -> Result<GenerationManifest, StageError> {
        let output = request
            .work_dir
            .join(format!("final.{}", request.config.container));

        for stage in request.stages.enabled() {
            if sink.should_stop() {
                return Err(StageError::new(stage.as_str(), "cancelled before start"));
            }
            sink.stage_started(stage.as_str());
            match stage {
                StageName::Compile => self.compile(&request, &output).await?,
                StageName::ImageGen => sink.message(format!(
                    "{} placeholder frames",
                    request.config.scene_count
                )),
                other => sink.message(format!("{other}: skipped in placeholder mode")),
            }
        }

        let res = request.config.output_resolution;
        Ok(GenerationManifest {
            artifact_path: output,
            scenes: scenes(&request),
            reported: Some(MediaInfo {
                width: res.width,
                height: res.height,
                fps: request.config.fps as f64,
                duration_sec: request.config.planned_duration_sec(),
                codec: request.config.codec.clone(),
            }),
            logs_path: None,
        })
    }
}
