// src/evaluator/probe.rs — Media probing via ffprobe
//
// The probe is a pure measurement: same file in, same numbers out.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::core::types::MediaInfo;
use crate::infra::errors::{Result, VidloopError};

/// Media-probe collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;
}

/// Runs `ffprobe` (from `$PATH` unless a binary is given).
pub struct FfprobeProbe {
    binary: String,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let probe_err = |message: String| VidloopError::Probe {
            path: path.display().to_string(),
            message,
        };

        tracing::debug!("Running: {} on {:?}", self.binary, path);
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,codec_name,r_frame_rate,avg_frame_rate,duration:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| probe_err(format!("failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(probe_err(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_json(&stdout).map_err(probe_err)
    }
}

/// Parse `ffprobe -of json` output for the first video stream.
pub fn parse_ffprobe_json(raw: &str) -> std::result::Result<MediaInfo, String> {
    let v: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("unparseable ffprobe output: {e}"))?;
    let stream = v["streams"]
        .as_array()
        .and_then(|s| s.first())
        .ok_or("no video stream")?;

    let dimension = |key: &str| -> std::result::Result<u32, String> {
        let raw = stream[key].as_u64().ok_or_else(|| format!("missing {key}"))?;
        u32::try_from(raw).map_err(|_| format!("{key} {raw} out of range"))
    };
    let width = dimension("width")?;
    let height = dimension("height")?;
    let codec = stream["codec_name"]
        .as_str()
        .ok_or("missing codec_name")?
        .to_string();

    let fps = ["avg_frame_rate", "r_frame_rate"]
        .iter()
        .filter_map(|k| stream[*k].as_str().and_then(parse_frame_rate))
        .next()
        .ok_or("missing frame rate")?;

    // Container duration is authoritative; some muxers omit the stream one.
    let duration_sec = [&v["format"]["duration"], &stream["duration"]]
        .iter()
        .filter_map(|d| number_or_string(d))
        .next()
        .ok_or("missing duration")?;

    Ok(MediaInfo {
        width,
        height,
        fps,
        duration_sec,
        codec,
    })
}

/// "30000/1001" -> 29.97, "30" -> 30.0. Zero denominators and "0/0" are rejected.
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = match s.split_once('/') {
        Some((n, d)) => {
            let n: f64 = n.trim().parse().ok()?;
            let d: f64 = d.trim().parse().ok()?;
            if d == 0.0 {
                return None;
            }
            n / d
        }
        None => s.trim().parse().ok()?,
    };
    (rate > 0.0 && rate.is_finite()).then_some(rate)
}

fn number_or_string(v: &serde_json::Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
}
