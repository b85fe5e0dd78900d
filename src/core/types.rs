// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::record::RunState;
use crate::infra::errors::{Result, VidloopError};

// ─── Resolution ─────────────────────────────────────────────────

/// Frame size. Serialized as `"1920x1080"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const PORTRAIT_HD: Resolution = Resolution::new(1080, 1920);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = VidloopError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || VidloopError::InvalidRequirement(format!("bad resolution '{s}'"));
        let (w, h) = s
            .trim()
            .split_once(|c: char| c == 'x' || c == 'X' || c == '*')
            .ok_or_else(bad)?;
        let width: u32 = w.trim().parse().map_err(|_| bad())?;
        let height: u32 = h.trim().parse().map_err(|_| bad())?;
        if width == 0 || height == 0 {
            return Err(bad());
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = VidloopError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Resolution> for String {
    fn from(r: Resolution) -> String {
        r.to_string()
    }
}

// ─── RequirementSpec ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Allowed duration error, percent of target.
    pub duration_pct: f64,
    /// Allowed frame-rate error, frames per second.
    pub fps: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            duration_pct: 10.0,
            fps: 1.0,
        }
    }
}

/// Structured requirement derived from the user's prompt. Frozen at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementSpec {
    pub prompt_summary: String,
    pub target_duration_sec: f64,
    pub resolution: Resolution,
    pub fps: u32,
    #[serde(default)]
    pub style_tags: BTreeSet<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub music: Option<String>,
    #[serde(default)]
    pub pacing: Option<String>,
    #[serde(default)]
    pub narrative_beats: Vec<String>,
    #[serde(default)]
    pub forbidden_content: Vec<String>,
    #[serde(default)]
    pub tolerance: Tolerance,
}

impl RequirementSpec {
    pub fn validate(&self) -> Result<()> {
        let invalid = |m: &str| Err(VidloopError::InvalidRequirement(m.to_string()));
        if !self.target_duration_sec.is_finite() || self.target_duration_sec <= 0.0 {
            return invalid("target_duration_sec must be positive");
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return invalid("resolution must be non-zero");
        }
        if !(1..=240).contains(&self.fps) {
            return invalid("fps must be within 1..=240");
        }
        let pct = self.tolerance.duration_pct;
        if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
            return invalid("tolerance.duration_pct must be within (0, 100]");
        }
        if !self.tolerance.fps.is_finite() || self.tolerance.fps < 0.0 {
            return invalid("tolerance.fps must be non-negative");
        }
        Ok(())
    }

    /// Inclusive duration band accepted by the evaluator.
    pub fn duration_band(&self) -> (f64, f64) {
        let slack = self.target_duration_sec * self.tolerance.duration_pct / 100.0;
        (
            self.target_duration_sec - slack,
            self.target_duration_sec + slack,
        )
    }
}

// ─── Stages ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Script,
    StoryReview,
    ImageGen,
    VideoGen,
    Narration,
    MusicGen,
    Compile,
}

impl StageName {
    pub const ALL: [StageName; 7] = [
        StageName::Script,
        StageName::StoryReview,
        StageName::ImageGen,
        StageName::VideoGen,
        StageName::Narration,
        StageName::MusicGen,
        StageName::Compile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Script => "script",
            StageName::StoryReview => "story_review",
            StageName::ImageGen => "image_gen",
            StageName::VideoGen => "video_gen",
            StageName::Narration => "narration",
            StageName::MusicGen => "music_gen",
            StageName::Compile => "compile",
        }
    }

    /// A run can still produce an artifact with this stage switched off.
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            StageName::StoryReview
                | StageName::VideoGen
                | StageName::Narration
                | StageName::MusicGen
        )
    }

    /// Optional stages whose output this stage consumes.
    pub fn optional_inputs(&self) -> &'static [StageName] {
        match self {
            StageName::Compile => &[StageName::MusicGen, StageName::Narration, StageName::VideoGen],
            StageName::ImageGen => &[StageName::StoryReview],
            _ => &[],
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = VidloopError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase().replace('-', "_");
        StageName::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| VidloopError::InvalidOverride {
                field: format!("stages.{s}"),
                message: "unknown stage".into(),
            })
    }
}

/// Per-stage enable flags handed to the generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    pub script: bool,
    pub story_review: bool,
    pub image_gen: bool,
    pub video_gen: bool,
    pub narration: bool,
    pub music_gen: bool,
    pub compile: bool,
}

impl Default for StageFlags {
    fn default() -> Self {
        Self {
            script: true,
            story_review: true,
            image_gen: true,
            video_gen: true,
            narration: true,
            music_gen: true,
            compile: true,
        }
    }
}

impl StageFlags {
    pub fn is_enabled(&self, stage: StageName) -> bool {
        match stage {
            StageName::Script => self.script,
            StageName::StoryReview => self.story_review,
            StageName::ImageGen => self.image_gen,
            StageName::VideoGen => self.video_gen,
            StageName::Narration => self.narration,
            StageName::MusicGen => self.music_gen,
            StageName::Compile => self.compile,
        }
    }

    pub fn set(&mut self, stage: StageName, enabled: bool) {
        let slot = match stage {
            StageName::Script => &mut self.script,
            StageName::StoryReview => &mut self.story_review,
            StageName::ImageGen => &mut self.image_gen,
            StageName::VideoGen => &mut self.video_gen,
            StageName::Narration => &mut self.narration,
            StageName::MusicGen => &mut self.music_gen,
            StageName::Compile => &mut self.compile,
        };
        *slot = enabled;
    }

    /// Enabled stages in pipeline order.
    pub fn enabled(&self) -> Vec<StageName> {
        StageName::ALL
            .into_iter()
            .filter(|s| self.is_enabled(*s))
            .collect()
    }
}

// ─── ConfigSnapshot ─────────────────────────────────────────────

/// Target length of one scene when splitting the requested duration.
const NOMINAL_SCENE_SEC: f64 = 6.0;

/// Every generation parameter in effect for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Config-history revision this snapshot was committed as.
    #[serde(default)]
    pub revision: Option<String>,
    pub scene_count: u32,
    pub scene_duration_sec: f64,
    pub output_resolution: Resolution,
    pub fps: u32,
    pub codec: String,
    pub container: String,
    #[serde(default)]
    pub global_style: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub music_prompt: Option<String>,
    #[serde(default)]
    pub stages: StageFlags,
}

impl ConfigSnapshot {
    /// Default snapshot for iteration 1.
    pub fn initial(req: &RequirementSpec) -> Self {
        let scene_count = (req.target_duration_sec / NOMINAL_SCENE_SEC).round().max(1.0) as u32;
        Self {
            revision: None,
            scene_count,
            scene_duration_sec: req.target_duration_sec / scene_count as f64,
            output_resolution: req.resolution,
            fps: req.fps,
            codec: "h264".into(),
            container: "mp4".into(),
            global_style: req
                .style_tags
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            voice: req.voice.clone(),
            music_prompt: req.music.clone(),
            stages: StageFlags::default(),
        }
    }

    /// Length the pipeline is asked to produce.
    pub fn planned_duration_sec(&self) -> f64 {
        self.scene_count as f64 * self.scene_duration_sec
    }

    /// Current value of a flat field key, as used by overrides.
    pub fn field(&self, key: &str) -> Option<Value> {
        let v = match key {
            "scene_count" => Value::from(self.scene_count),
            "scene_duration_sec" => Value::from(self.scene_duration_sec),
            "output_resolution" => Value::from(self.output_resolution.to_string()),
            "fps" => Value::from(self.fps),
            "codec" => Value::from(self.codec.clone()),
            "container" => Value::from(self.container.clone()),
            "global_style" => Value::from(self.global_style.clone()),
            "voice" => self.voice.clone().map(Value::from).unwrap_or(Value::Null),
            "music_prompt" => self.music_prompt.clone().map(Value::from).unwrap_or(Value::Null),
            other => {
                let stage: StageName = other.strip_prefix("stages.")?.parse().ok()?;
                Value::from(self.stages.is_enabled(stage))
            }
        };
        Some(v)
    }

    /// All fields as a flat change set. Used for the root history commit.
    pub fn to_changes(&self) -> BTreeMap<String, Value> {
        let mut keys: Vec<String> = [
            "scene_count",
            "scene_duration_sec",
            "output_resolution",
            "fps",
            "codec",
            "container",
            "global_style",
            "voice",
            "music_prompt",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        keys.extend(StageName::ALL.iter().map(|s| format!("stages.{s}")));

        keys.into_iter()
            .filter_map(|k| self.field(&k).map(|v| (k, v)))
            .collect()
    }

    /// Apply a change set, yielding a new snapshot. Either every change
    /// applies or none does; `self` is never touched.
    pub fn apply(&self, changes: &BTreeMap<String, Value>) -> Result<ConfigSnapshot> {
        let mut next = self.clone();
        for (key, value) in changes {
            next.set_field(key, value)?;
        }
        next.validate()?;
        Ok(next)
    }

    fn set_field(&mut self, key: &str, value: &Value) -> Result<()> {
        let bad = |msg: &str| VidloopError::InvalidOverride {
            field: key.to_string(),
            message: msg.to_string(),
        };
        match key {
            "scene_count" => {
                let n = value.as_u64().filter(|n| *n >= 1).ok_or_else(|| bad("expected integer >= 1"))?;
                self.scene_count = u32::try_from(n).map_err(|_| bad("too large"))?;
            }
            "scene_duration_sec" => {
                self.scene_duration_sec = value
                    .as_f64()
                    .filter(|d| d.is_finite() && *d > 0.0)
                    .ok_or_else(|| bad("expected positive number"))?;
            }
            "output_resolution" => {
                let s = value.as_str().ok_or_else(|| bad("expected \"WxH\""))?;
                self.output_resolution = s.parse().map_err(|_| bad("expected \"WxH\""))?;
            }
            "fps" => {
                let n = value
                    .as_u64()
                    .filter(|n| (1..=240).contains(n))
                    .ok_or_else(|| bad("expected integer within 1..=240"))?;
                self.fps = n as u32;
            }
            "codec" | "container" => {
                let s = value
                    .as_str()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| bad("expected non-empty string"))?;
                if key == "codec" {
                    self.codec = s.to_string();
                } else {
                    self.container = s.to_string();
                }
            }
            "global_style" => {
                self.global_style = value.as_str().ok_or_else(|| bad("expected string"))?.to_string();
            }
            "voice" | "music_prompt" => {
                let v = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    _ => return Err(bad("expected string or null")),
                };
                if key == "voice" {
                    self.voice = v;
                } else {
                    self.music_prompt = v;
                }
            }
            other => {
                let stage: StageName = other
                    .strip_prefix("stages.")
                    .ok_or_else(|| bad("unknown field"))?
                    .parse()
                    .map_err(|_| bad("unknown stage"))?;
                let on = value.as_bool().ok_or_else(|| bad("expected bool"))?;
                self.stages.set(stage, on);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for stage in StageName::ALL {
            if !stage.is_optional() && !self.stages.is_enabled(stage) {
                return Err(VidloopError::InvalidOverride {
                    field: format!("stages.{stage}"),
                    message: "required stage cannot be disabled".into(),
                });
            }
        }
        Ok(())
    }
}

// ─── Generation output ──────────────────────────────────────────

/// Measured properties of a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_sec: f64,
    pub codec: String,
}

impl MediaInfo {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub index: u32,
    pub duration_sec: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
}

/// What the generation pipeline says it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub artifact_path: PathBuf,
    #[serde(default)]
    pub scenes: Vec<SceneMetadata>,
    /// Self-reported measurements. The evaluator re-probes regardless.
    #[serde(default)]
    pub reported: Option<MediaInfo>,
    #[serde(default)]
    pub logs_path: Option<PathBuf>,
}

// ─── Evaluation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hard,
    Soft,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Hard => write!(f, "HARD"),
            Severity::Soft => write!(f, "SOFT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deviation {
    pub field: String,
    pub expected: Value,
    pub actual: Value,
    pub severity: Severity,
    /// Free-form context, e.g. the cause of a stage failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Deviation {
    pub fn hard(field: impl Into<String>, expected: impl Into<Value>, actual: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
            severity: Severity::Hard,
            note: None,
        }
    }

    pub fn soft(field: impl Into<String>, expected: impl Into<Value>, actual: impl Into<Value>) -> Self {
        Self {
            severity: Severity::Soft,
            ..Self::hard(field, expected, actual)
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl fmt::Display for Deviation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: expected {}, got {}",
            self.severity, self.field, self.expected, self.actual
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub run_id: String,
    pub iteration: u32,
    pub passed: bool,
    pub deviations: Vec<Deviation>,
    /// 0-100.
    pub score: f64,
}

impl QualityReport {
    /// Orders deviations hard-first then by field, and derives `passed`.
    pub fn new(run_id: &str, iteration: u32, mut deviations: Vec<Deviation>, score: f64) -> Self {
        deviations.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| a.field.cmp(&b.field))
        });
        let passed = !deviations.iter().any(|d| d.severity == Severity::Hard);
        Self {
            run_id: run_id.to_string(),
            iteration,
            passed,
            deviations,
            score: score.clamp(0.0, 100.0),
        }
    }

    pub fn hard_count(&self) -> usize {
        self.deviations
            .iter()
            .filter(|d| d.severity == Severity::Hard)
            .count()
    }

    pub fn report_ref(&self) -> ReportRef {
        ReportRef {
            run_id: self.run_id.clone(),
            iteration: self.iteration,
        }
    }
}

// ─── Overrides ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
    Set,
    Enable,
    Disable,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Increase => "increase",
            Direction::Decrease => "decrease",
            Direction::Set => "set",
            Direction::Enable => "enable",
            Direction::Disable => "disable",
        };
        f.write_str(s)
    }
}

/// One (field, direction) move made by an override.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Adjustment {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRef {
    pub run_id: String,
    pub iteration: u32,
}

/// A committed, immutable change set produced by the patcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverride {
    pub revision: String,
    pub branch: String,
    pub changes: BTreeMap<String, Value>,
    /// Value each changed key held before this override.
    pub old_values: BTreeMap<String, Value>,
    pub adjustments: Vec<Adjustment>,
    pub rationale: String,
    pub derived_from: ReportRef,
    pub created_at: DateTime<Utc>,
}

// ─── Progress ───────────────────────────────────────────────────

/// Side-channel notifications. Never feed back into coordinator state.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StateChanged {
        run_id: String,
        from: RunState,
        to: RunState,
    },
    IterationStart {
        run_id: String,
        iteration: u32,
        max_iterations: u32,
    },
    StageStarted {
        run_id: String,
        iteration: u32,
        stage: String,
    },
    StageMessage {
        run_id: String,
        iteration: u32,
        message: String,
    },
    IterationEnd {
        run_id: String,
        iteration: u32,
        passed: bool,
        score: f64,
        hard: usize,
        soft: usize,
    },
    Patched {
        run_id: String,
        iteration: u32,
        revision: String,
        rationale: String,
    },
    Complete {
        run_id: String,
        state: RunState,
        iterations: u32,
        reason: String,
    },
    /// The run ended without a terminal state; no Complete will follow.
    Aborted {
        run_id: String,
        error: String,
    },
}

impl ProgressEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ProgressEvent::StateChanged { run_id, .. }
            | ProgressEvent::IterationStart { run_id, .. }
            | ProgressEvent::StageStarted { run_id, .. }
            | ProgressEvent::StageMessage { run_id, .. }
            | ProgressEvent::IterationEnd { run_id, .. }
            | ProgressEvent::Patched { run_id, .. }
            | ProgressEvent::Complete { run_id, .. }
            | ProgressEvent::Aborted { run_id, .. } => run_id,
        }
    }
}
