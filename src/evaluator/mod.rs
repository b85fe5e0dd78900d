// src/evaluator/mod.rs — Quality evaluation of generated artifacts
//
// Objective checks always run and are deterministic given the probe. The
// subjective judge is optional and can only add soft deviations.

pub mod judge;
pub mod probe;
pub mod utils;

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::types::{Deviation, GenerationManifest, MediaInfo, QualityReport, RequirementSpec};
use crate::infra::errors::{Result, VidloopError};
use judge::SubjectiveJudge;
use probe::MediaProbe;
use utils::*;

/// Container formats accepted by file extension.
pub const ALLOWED_CONTAINERS: [&str; 4] = ["mp4", "mov", "webm", "mkv"];

pub struct QualityEvaluator {
    probe: Arc<dyn MediaProbe>,
    probe_timeout: Duration,
    allowed_codecs: Vec<String>,
    judge: Option<SubjectiveJudge>,
    subjective_threshold: f64,
}

impl QualityEvaluator {
    pub fn new(probe: Arc<dyn MediaProbe>) -> Self {
        let defaults = crate::infra::config::EvaluationConfig::default();
        Self {
            probe,
            probe_timeout: Duration::from_secs(30),
            allowed_codecs: defaults.allowed_codecs,
            judge: None,
            subjective_threshold: defaults.subjective_threshold as f64,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_allowed_codecs(mut self, codecs: Vec<String>) -> Self {
        self.allowed_codecs = codecs.into_iter().map(|c| c.to_ascii_lowercase()).collect();
        self
    }

    /// Enable subjective scoring; scores under `threshold` become soft deviations.
    pub fn with_judge(mut self, judge: SubjectiveJudge, threshold: f64) -> Self {
        self.judge = Some(judge);
        self.subjective_threshold = threshold;
        self
    }

    /// Evaluate one manifest against the requirement.
    ///
    /// Returns `Probe` errors when the artifact exists but can't be measured,
    /// and `Timeout` when the probe doesn't answer in time.
    pub async fn evaluate(
        &self,
        run_id: &str,
        iteration: u32,
        requirement: &RequirementSpec,
        manifest: &GenerationManifest,
    ) -> Result<QualityReport> {
        let artifact = &manifest.artifact_path;
        if !artifact.is_file() {
            tracing::info!(run_id, iteration, "artifact missing: {}", artifact.display());
            let d = Deviation::hard("artifact", "exists", "missing")
                .with_note(artifact.display().to_string());
            return Ok(QualityReport::new(run_id, iteration, vec![d], 0.0));
        }

        let info = match tokio::time::timeout(self.probe_timeout, self.probe.probe(artifact)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(VidloopError::Timeout {
                    operation: "probe".into(),
                    seconds: self.probe_timeout.as_secs(),
                })
            }
        };
        tracing::debug!(run_id, iteration, ?info, "probed artifact");

        let mut deviations = self.objective_checks(requirement, artifact, &info);
        let failed: Vec<&str> = deviations.iter().map(|d| d.field.as_str()).collect();
        let objective = composite_score(&objective_dimensions(&failed));

        if let Some(d) = manifest_consistency(requirement, manifest, &info) {
            deviations.push(d);
        }

        let subjective = match &self.judge {
            Some(judge) => judge.score(requirement, manifest).await,
            None => None,
        };
        if let Some(scores) = &subjective {
            for s in scores.iter().filter(|s| s.score < self.subjective_threshold) {
                deviations.push(Deviation::soft(
                    format!("subjective.{}", s.dimension),
                    self.subjective_threshold,
                    s.score,
                ));
            }
        }

        let score = final_score(objective, subjective.as_deref());
        Ok(QualityReport::new(run_id, iteration, deviations, score))
    }

    /// Hard checks: resolution, frame rate, duration band, codec, container.
    pub fn objective_checks(
        &self,
        requirement: &RequirementSpec,
        artifact: &Path,
        info: &MediaInfo,
    ) -> Vec<Deviation> {
        let mut out = Vec::new();

        if info.resolution() != requirement.resolution {
            out.push(Deviation::hard(
                "resolution",
                requirement.resolution.to_string(),
                info.resolution().to_string(),
            ));
        }

        if (info.fps - requirement.fps as f64).abs() > requirement.tolerance.fps {
            out.push(Deviation::hard("fps", requirement.fps, round_to(info.fps, 3)));
        }

        let (lo, hi) = requirement.duration_band();
        if info.duration_sec < lo || info.duration_sec > hi {
            out.push(
                Deviation::hard(
                    "duration",
                    requirement.target_duration_sec,
                    round_to(info.duration_sec, 3),
                )
                .with_note(format!("allowed {:.2}-{:.2}s", lo, hi)),
            );
        }

        let codec = info.codec.to_ascii_lowercase();
        if !self.allowed_codecs.contains(&codec) {
            out.push(Deviation::hard(
                "codec",
                Value::from(self.allowed_codecs.clone()),
                codec,
            ));
        }

        let ext = artifact
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if !ALLOWED_CONTAINERS.contains(&ext.as_str()) {
            out.push(Deviation::hard(
                "container",
                Value::from(ALLOWED_CONTAINERS.to_vec()),
                ext,
            ));
        }

        out
    }
}

/// Soft deviation when the pipeline's self-reported duration disagrees with
/// the probe by more than the duration tolerance.
fn manifest_consistency(
    requirement: &RequirementSpec,
    manifest: &GenerationManifest,
    info: &MediaInfo,
) -> Option<Deviation> {
    let reported = manifest.reported.as_ref()?;
    let slack = requirement.target_duration_sec * requirement.tolerance.duration_pct / 100.0;
    ((reported.duration_sec - info.duration_sec).abs() > slack).then(|| {
        Deviation::soft(
            "manifest.duration",
            round_to(info.duration_sec, 3),
            round_to(reported.duration_sec, 3),
        )
        .with_note("pipeline-reported duration disagrees with probe")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Resolution, Severity, Tolerance};
    use crate::provider::{Completion, CompletionRequest, TextGenerator};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use probe::MockMediaProbe;
    use std::path::PathBuf;

    fn requirement() -> RequirementSpec {
        RequirementSpec {
            prompt_summary: "15s tech explainer".into(),
            target_duration_sec: 15.0,
            resolution: Resolution::PORTRAIT_HD,
            fps: 30,
            style_tags: Default::default(),
            voice: None,
            music: None,
            pacing: None,
            narrative_beats: vec![],
            forbidden_content: vec![],
            tolerance: Tolerance::default(),
        }
    }

    fn info(duration: f64) -> MediaInfo {
        MediaInfo {
            width: 1080,
            height: 1920,
            fps: 30.0,
            duration_sec: duration,
            codec: "h264".into(),
        }
    }

    fn artifact(dir: &tempfile::TempDir, name: &str) -> GenerationManifest {
        let path = dir.path().join(name);
        std::fs::write(&path, b"fake video").unwrap();
        GenerationManifest {
            artifact_path: path,
            scenes: vec![],
            reported: None,
            logs_path: None,
        }
    }

    fn probe_returning(i: MediaInfo) -> Arc<MockMediaProbe> {
        let mut probe = MockMediaProbe::new();
        probe.expect_probe().returning(move |_| Ok(i.clone()));
        Arc::new(probe)
    }

    // ─── Objective checks ───────────────────────────────────────

    #[tokio::test]
    async fn test_passes_within_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        let eval = QualityEvaluator::new(probe_returning(info(16.2)));
        let report = eval
            .evaluate("r", 1, &requirement(), &artifact(&dir, "out.mp4"))
            .await
            .unwrap();
        assert!(report.passed);
        assert!(report.deviations.is_empty());
        assert_eq!(report.score, 100.0);
    }

    #[tokio::test]
    async fn test_duration_out_of_band_is_hard() {
        let dir = tempfile::tempdir().unwrap();
        let eval = QualityEvaluator::new(probe_returning(info(20.0)));
        let report = eval
            .evaluate("r", 1, &requirement(), &artifact(&dir, "out.mp4"))
            .await
            .unwrap();
        assert!(!report.passed);
        assert_eq!(report.deviations.len(), 1);
        let d = &report.deviations[0];
        assert_eq!(d.field, "duration");
        assert_eq!(d.severity, Severity::Hard);
        assert_eq!(d.expected, Value::from(15.0));
        assert_eq!(d.actual, Value::from(20.0));
        assert_eq!(report.score, 70.0);
    }

    #[tokio::test]
    async fn test_fps_tolerance_is_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut i = info(15.0);
        i.fps = 29.97;
        let eval = QualityEvaluator::new(probe_returning(i));
        let report = eval
            .evaluate("r", 1, &requirement(), &artifact(&dir, "out.mp4"))
            .await
            .unwrap();
        assert!(report.passed);

        let mut i = info(15.0);
        i.fps = 24.0;
        let eval = QualityEvaluator::new(probe_returning(i));
        let report = eval
            .evaluate("r", 1, &requirement(), &artifact(&dir, "out.mp4"))
            .await
            .unwrap();
        assert_eq!(report.deviations[0].field, "fps");
    }

    #[tokio::test]
    async fn test_multiple_failures_sorted_by_field() {
        let dir = tempfile::tempdir().unwrap();
        let i = MediaInfo {
            width: 1920,
            height: 1080,
            fps: 30.0,
            duration_sec: 15.0,
            codec: "theora".into(),
        };
        let eval = QualityEvaluator::new(probe_returning(i));
        let report = eval
            .evaluate("r", 1, &requirement(), &artifact(&dir, "out.ogv"))
            .await
            .unwrap();
        let fields: Vec<&str> = report.deviations.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["codec", "container", "resolution"]);
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn test_missing_artifact_skips_probe() {
        let mut probe = MockMediaProbe::new();
        probe.expect_probe().never();
        let eval = QualityEvaluator::new(Arc::new(probe));
        let manifest = GenerationManifest {
            artifact_path: PathBuf::from("/nonexistent/vidloop/final.mp4"),
            scenes: vec![],
            reported: None,
            logs_path: None,
        };
        let report = eval.evaluate("r", 1, &requirement(), &manifest).await.unwrap();
        assert!(!report.passed);
        assert_eq!(report.deviations[0].field, "artifact");
        assert_eq!(report.score, 0.0);
    }

    #[tokio::test]
    async fn test_probe_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut probe = MockMediaProbe::new();
        probe.expect_probe().returning(|p| {
            Err(VidloopError::Probe {
                path: p.display().to_string(),
                message: "moov atom not found".into(),
            })
        });
        let eval = QualityEvaluator::new(Arc::new(probe));
        let err = eval
            .evaluate("r", 1, &requirement(), &artifact(&dir, "out.mp4"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_manifest_disagreement_is_soft() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = artifact(&dir, "out.mp4");
        manifest.reported = Some(info(9.0));
        let eval = QualityEvaluator::new(probe_returning(info(15.0)));
        let report = eval.evaluate("r", 1, &requirement(), &manifest).await.unwrap();
        assert!(report.passed);
        assert_eq!(report.deviations[0].field, "manifest.duration");
        assert_eq!(report.deviations[0].severity, Severity::Soft);
    }

    // ─── Subjective ─────────────────────────────────────────────

    struct FixedJudge(&'static str);

    #[async_trait]
    impl TextGenerator for FixedJudge {
        fn id(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _r: CompletionRequest) -> Result<Completion> {
            Ok(Completion {
                content: self.0.into(),
                usage: Default::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_low_subjective_score_is_soft_and_blended() {
        let dir = tempfile::tempdir().unwrap();
        let judge = SubjectiveJudge::new(
            Arc::new(FixedJudge("narration: 90\nvisual: 30")),
            Duration::from_secs(5),
        );
        let eval = QualityEvaluator::new(probe_returning(info(15.0))).with_judge(judge, 60.0);
        let report = eval
            .evaluate("r", 1, &requirement(), &artifact(&dir, "out.mp4"))
            .await
            .unwrap();
        assert!(report.passed);
        assert_eq!(report.deviations.len(), 1);
        assert_eq!(report.deviations[0].field, "subjective.visual");
        // 0.7 * 1.0 + 0.3 * 0.6
        assert_eq!(report.score, 88.0);
    }
}
