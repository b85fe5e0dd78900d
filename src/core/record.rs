// src/core/record.rs — Run state machine and the append-only run record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::types::{ConfigSnapshot, Deviation, GenerationManifest, QualityReport, RequirementSpec};
use crate::infra::errors::{Result, VidloopError};

/// Unique, sortable run identifier: `20261018_142233_3fa85f64`.
pub fn new_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

// ─── RunState ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Translating,
    Generating,
    Evaluating,
    Patching,
    Passed,
    Exhausted,
    Fatal,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Passed | RunState::Exhausted | RunState::Fatal | RunState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Created, Translating)
                | (Translating, Generating)
                | (Translating, Fatal)
                | (Generating, Evaluating)
                | (Generating, Patching)
                | (Evaluating, Passed)
                | (Evaluating, Patching)
                | (Evaluating, Exhausted)
                | (Evaluating, Fatal)
                | (Patching, Generating)
                | (Patching, Exhausted)
                | (Patching, Fatal)
        )
    }

    /// CLI exit code for a terminal state.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunState::Passed => 0,
            RunState::Exhausted => 1,
            RunState::Cancelled => 130,
            _ => 2,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Created => "created",
            RunState::Translating => "translating",
            RunState::Generating => "generating",
            RunState::Evaluating => "evaluating",
            RunState::Patching => "patching",
            RunState::Passed => "passed",
            RunState::Exhausted => "exhausted",
            RunState::Fatal => "fatal",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ─── Iteration entries ──────────────────────────────────────────

/// What the generation step yielded for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationOutcome {
    Manifest(GenerationManifest),
    Error { stage: String, cause: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationEntry {
    pub iteration: u32,
    pub config: ConfigSnapshot,
    pub outcome: IterationOutcome,
    /// `None` when the run was cancelled before evaluation.
    pub report: Option<QualityReport>,
}

impl IterationEntry {
    pub fn artifact_path(&self) -> Option<&PathBuf> {
        match &self.outcome {
            IterationOutcome::Manifest(m) => Some(&m.artifact_path),
            IterationOutcome::Error { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

// ─── RunRecord ──────────────────────────────────────────────────

/// History of one run. Entries and transitions only ever grow, and nothing
/// changes once a terminal state is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    run_id: String,
    prompt: String,
    max_iterations: u32,
    requirement: Option<RequirementSpec>,
    iterations: Vec<IterationEntry>,
    state: RunState,
    transitions: Vec<Transition>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(run_id: &str, prompt: &str, max_iterations: u32) -> Self {
        Self {
            run_id: run_id.to_string(),
            prompt: prompt.to_string(),
            max_iterations,
            requirement: None,
            iterations: Vec::new(),
            state: RunState::Created,
            transitions: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn requirement(&self) -> Option<&RequirementSpec> {
        self.requirement.as_ref()
    }

    pub fn iterations(&self) -> &[IterationEntry] {
        &self.iterations
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Terminal state, once the record is frozen.
    pub fn final_state(&self) -> Option<RunState> {
        self.state.is_terminal().then_some(self.state)
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn is_frozen(&self) -> bool {
        self.state.is_terminal()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_frozen() {
            return Err(VidloopError::RecordFrozen {
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Record the translated requirement. Allowed once.
    pub fn set_requirement(&mut self, req: RequirementSpec) -> Result<()> {
        self.ensure_open()?;
        if self.requirement.is_some() {
            return Err(VidloopError::InvalidRequirement(
                "requirement already recorded for this run".into(),
            ));
        }
        self.requirement = Some(req);
        Ok(())
    }

    pub fn transition(&mut self, to: RunState) -> Result<()> {
        self.ensure_open()?;
        if !self.state.can_transition_to(to) {
            return Err(VidloopError::IllegalTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        let now = Utc::now();
        self.transitions.push(Transition {
            from: self.state,
            to,
            at: now,
        });
        self.state = to;
        if to.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Append the next iteration. Numbers run 1, 2, ... up to the budget.
    pub fn append(&mut self, entry: IterationEntry) -> Result<()> {
        self.ensure_open()?;
        let expected = self.iterations.len() as u32 + 1;
        if entry.iteration != expected || entry.iteration > self.max_iterations {
            return Err(VidloopError::Other(anyhow::anyhow!(
                "iteration {} out of order (expected {} of at most {})",
                entry.iteration,
                expected,
                self.max_iterations
            )));
        }
        self.iterations.push(entry);
        Ok(())
    }
}

// ─── RunOutcome ─────────────────────────────────────────────────

/// Structured summary produced for every terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub state: RunState,
    pub artifact_path: Option<PathBuf>,
    /// Outstanding deviations when the run did not pass.
    pub deviations: Vec<Deviation>,
    pub iterations_used: u32,
    pub reason: String,
    pub score: Option<f64>,
}

impl RunOutcome {
    pub fn from_record(record: &RunRecord, reason: impl Into<String>) -> Self {
        let last = record.iterations().last();
        let report = last.and_then(|e| e.report.as_ref());
        let passed = record.state() == RunState::Passed;
        Self {
            run_id: record.run_id().to_string(),
            state: record.state(),
            artifact_path: if passed {
                last.and_then(|e| e.artifact_path().cloned())
            } else {
                None
            },
            deviations: if passed {
                Vec::new()
            } else {
                report.map(|r| r.deviations.clone()).unwrap_or_default()
            },
            iterations_used: record.iterations().len() as u32,
            reason: reason.into(),
            score: report.map(|r| r.score),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Resolution, Tolerance};

    fn requirement() -> RequirementSpec {
        RequirementSpec {
            prompt_summary: "test".into(),
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

    fn entry(iteration: u32, passed: bool) -> IterationEntry {
        let deviations = if passed {
            vec![]
        } else {
            vec![Deviation::hard("duration", 15.0, 20.0)]
        };
        IterationEntry {
            iteration,
            config: ConfigSnapshot::initial(&requirement()),
            outcome: IterationOutcome::Manifest(GenerationManifest {
                artifact_path: PathBuf::from(format!("out_{iteration}.mp4")),
                scenes: vec![],
                reported: None,
                logs_path: None,
            }),
            report: Some(QualityReport::new("r", iteration, deviations, 50.0)),
        }
    }

    // ─── RunState ───────────────────────────────────────────────

    #[test]
    fn test_run_id_format() {
        let id = new_run_id();
        assert_eq!(id.len(), "20261018_142233_".len() + 8);
        assert_ne!(new_run_id(), id);
    }

    #[test]
    fn test_transition_table() {
        use RunState::*;
        assert!(Created.can_transition_to(Translating));
        assert!(Generating.can_transition_to(Patching));
        assert!(Evaluating.can_transition_to(Exhausted));
        assert!(Patching.can_transition_to(Generating));
        assert!(!Created.can_transition_to(Generating));
        assert!(!Evaluating.can_transition_to(Generating));
        assert!(!Passed.can_transition_to(Cancelled));
        for s in [Created, Translating, Generating, Evaluating, Patching] {
            assert!(s.can_transition_to(Cancelled), "{s} -> cancelled");
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunState::Passed.exit_code(), 0);
        assert_eq!(RunState::Exhausted.exit_code(), 1);
        assert_eq!(RunState::Fatal.exit_code(), 2);
        assert_eq!(RunState::Cancelled.exit_code(), 130);
    }

    // ─── RunRecord ──────────────────────────────────────────────

    #[test]
    fn test_record_rejects_illegal_transition() {
        let mut rec = RunRecord::new("r", "p", 3);
        assert!(rec.transition(RunState::Generating).is_err());
        assert_eq!(rec.state(), RunState::Created);
        assert!(rec.transitions().is_empty());
    }

    #[test]
    fn test_record_append_in_order_only() {
        let mut rec = RunRecord::new("r", "p", 2);
        assert!(rec.append(entry(2, false)).is_err());
        rec.append(entry(1, false)).unwrap();
        rec.append(entry(2, true)).unwrap();
        assert!(rec.append(entry(3, true)).is_err());
        assert_eq!(rec.iterations().len(), 2);
    }

    #[test]
    fn test_record_frozen_after_terminal() {
        let mut rec = RunRecord::new("r", "p", 3);
        rec.transition(RunState::Translating).unwrap();
        rec.transition(RunState::Cancelled).unwrap();
        assert!(rec.is_frozen());
        assert_eq!(rec.final_state(), Some(RunState::Cancelled));
        assert!(rec.finished_at().is_some());
        assert!(matches!(
            rec.append(entry(1, true)),
            Err(VidloopError::RecordFrozen { .. })
        ));
        assert!(rec.set_requirement(requirement()).is_err());
        assert!(rec.transition(RunState::Fatal).is_err());
    }

    #[test]
    fn test_requirement_set_once() {
        let mut rec = RunRecord::new("r", "p", 3);
        rec.set_requirement(requirement()).unwrap();
        assert!(rec.set_requirement(requirement()).is_err());
    }

    #[test]
    fn test_record_json_roundtrip() {
        let mut rec = RunRecord::new("r", "p", 3);
        rec.transition(RunState::Translating).unwrap();
        rec.set_requirement(requirement()).unwrap();
        rec.append(entry(1, false)).unwrap();
        let json = serde_json::to_string(&rec).unwrap();
        let back: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    // ─── RunOutcome ─────────────────────────────────────────────

    #[test]
    fn test_outcome_passed_has_artifact_no_deviations() {
        let mut rec = RunRecord::new("r", "p", 3);
        rec.transition(RunState::Translating).unwrap();
        rec.transition(RunState::Generating).unwrap();
        rec.transition(RunState::Evaluating).unwrap();
        rec.append(entry(1, true)).unwrap();
        rec.transition(RunState::Passed).unwrap();
        let out = RunOutcome::from_record(&rec, "passed");
        assert_eq!(out.artifact_path, Some(PathBuf::from("out_1.mp4")));
        assert!(out.deviations.is_empty());
        assert_eq!(out.exit_code(), 0);
    }

    #[test]
    fn test_outcome_exhausted_carries_deviations() {
        let mut rec = RunRecord::new("r", "p", 1);
        rec.transition(RunState::Translating).unwrap();
        rec.transition(RunState::Generating).unwrap();
        rec.transition(RunState::Evaluating).unwrap();
        rec.append(entry(1, false)).unwrap();
        rec.transition(RunState::Exhausted).unwrap();
        let out = RunOutcome::from_record(&rec, "budget spent");
        assert!(out.artifact_path.is_none());
        assert_eq!(out.deviations.len(), 1);
        assert_eq!(out.iterations_used, 1);
        assert_eq!(out.exit_code(), 1);
    }
}
