// src/core/coordinator.rs — Iterate-until-pass state machine for one run
//
// Translate once, then generate -> evaluate -> patch until the report passes,
// the iteration budget runs out, or something unrecoverable happens. The
// coordinator is the only writer of a run's record and directory.

use tokio_util::sync::CancellationToken;

use super::patcher::{ConfigPatcher, PatchHistory};
use super::record::{IterationEntry, IterationOutcome, RunOutcome, RunRecord, RunState};
use super::runner::GenerationRunner;
use super::state::{RunStore, StageFailure};
use super::translator::RequirementTranslator;
use super::types::{ConfigSnapshot, Deviation, ProgressEvent, QualityReport, RequirementSpec};
use crate::evaluator::QualityEvaluator;
use crate::infra::errors::{Result, VidloopError};
use crate::pipeline::{PipelineRequest, StageEvent};

/// Per-submission knobs.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub max_iterations: u32,
    /// Replaces the translated duration.
    pub target_duration_sec: Option<f64>,
    /// Replaces the translated style tags when non-empty.
    pub style_tags: Vec<String>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            target_duration_sec: None,
            style_tags: Vec::new(),
        }
    }
}

impl SubmitOptions {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            ..Default::default()
        }
    }

    /// Apply overrides on top of a translated requirement and re-validate.
    pub fn apply_to(&self, mut req: RequirementSpec) -> Result<RequirementSpec> {
        if let Some(d) = self.target_duration_sec {
            req.target_duration_sec = d;
        }
        if !self.style_tags.is_empty() {
            req.style_tags = self
                .style_tags
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        req.validate()?;
        Ok(req)
    }
}

/// How a single iteration ended, before the coordinator decides what's next.
enum Step {
    Report(QualityReport),
    Stop(RunState, String),
}

pub struct RunCoordinator {
    translator: RequirementTranslator,
    runner: GenerationRunner,
    evaluator: QualityEvaluator,
    patcher: ConfigPatcher,
    store: RunStore,
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl RunCoordinator {
    pub fn new(
        translator: RequirementTranslator,
        runner: GenerationRunner,
        evaluator: QualityEvaluator,
        patcher: ConfigPatcher,
        store: RunStore,
    ) -> Self {
        Self {
            translator,
            runner,
            evaluator,
            patcher,
            store,
            on_progress: None,
        }
    }

    /// Set a callback for progress events. Events are informational only.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    /// Transition, persist the record and announce the change.
    fn advance(&self, record: &mut RunRecord, to: RunState) -> Result<()> {
        let from = record.state();
        record.transition(to)?;
        self.store.write_record(record)?;
        tracing::debug!(run_id = record.run_id(), "{} -> {}", from, to);
        self.emit(ProgressEvent::StateChanged {
            run_id: record.run_id().to_string(),
            from,
            to,
        });
        Ok(())
    }

    /// Enter a terminal state and write the summary.
    fn finish(&self, record: &mut RunRecord, state: RunState, reason: String) -> Result<RunOutcome> {
        self.advance(record, state)?;
        let outcome = RunOutcome::from_record(record, reason);
        self.store.write_summary(&outcome)?;
        tracing::info!(
            run_id = record.run_id(),
            state = %state,
            iterations = outcome.iterations_used,
            "run finished: {}",
            outcome.reason
        );
        self.emit(ProgressEvent::Complete {
            run_id: outcome.run_id.clone(),
            state,
            iterations: outcome.iterations_used,
            reason: outcome.reason.clone(),
        });
        Ok(outcome)
    }

    fn append(&self, record: &mut RunRecord, entry: IterationEntry) -> Result<()> {
        record.append(entry)?;
        self.store.write_record(record)
    }

    /// Drive one run to a terminal state.
    ///
    /// Run outcomes (including Fatal) come back as `Ok`. `Err` means the
    /// submission was rejected before a run existed, or the run's own
    /// bookkeeping failed, e.g. the run directory can't be written.
    pub async fn run(
        &self,
        run_id: &str,
        prompt: &str,
        opts: &SubmitOptions,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let max = opts.max_iterations;
        if max == 0 {
            return Err(VidloopError::InvalidSubmission(
                "max_iterations must be at least 1".into(),
            ));
        }
        let mut record = RunRecord::new(run_id, prompt, max);
        self.store.create_run(run_id)?;
        self.store.write_record(&record)?;
        tracing::info!(run_id, max_iterations = max, "run submitted");

        self.advance(&mut record, RunState::Translating)?;
        if cancel.is_cancelled() {
            return self.finish(&mut record, RunState::Cancelled, cancelled_reason());
        }

        let requirement = match self.translator.translate(prompt).await {
            Ok(req) => req,
            Err(e) => return self.finish(&mut record, RunState::Fatal, e.to_string()),
        };
        let requirement = match opts.apply_to(requirement) {
            Ok(req) => req,
            Err(e) => {
                return self.finish(&mut record, RunState::Fatal, format!("invalid submission override: {e}"))
            }
        };
        record.set_requirement(requirement.clone())?;
        self.store.write_requirement(run_id, &requirement)?;
        self.store.write_record(&record)?;

        if cancel.is_cancelled() {
            return self.finish(&mut record, RunState::Cancelled, cancelled_reason());
        }
        self.advance(&mut record, RunState::Generating)?;

        let mut config = self
            .patcher
            .commit_initial(run_id, &ConfigSnapshot::initial(&requirement))?;
        let mut patches = PatchHistory::new();
        let mut iteration = 1u32;

        loop {
            if cancel.is_cancelled() {
                return self.finish(&mut record, RunState::Cancelled, cancelled_reason());
            }

            let report = match self
                .iterate(&mut record, &requirement, &config, iteration, cancel)
                .await?
            {
                Step::Report(r) => r,
                Step::Stop(state, reason) => return self.finish(&mut record, state, reason),
            };

            let evaluated = record.state() == RunState::Evaluating;
            if evaluated && report.passed {
                let reason = format!(
                    "passed at iteration {} with score {:.1}",
                    iteration, report.score
                );
                return self.finish(&mut record, RunState::Passed, reason);
            }
            if cancel.is_cancelled() {
                return self.finish(&mut record, RunState::Cancelled, cancelled_reason());
            }

            if evaluated {
                if iteration >= max {
                    return self.finish(&mut record, RunState::Exhausted, exhausted_reason(max, &report));
                }
                self.advance(&mut record, RunState::Patching)?;
            } else {
                // Generation failed: already in Patching, budget checked before proposing.
                if iteration >= max {
                    return self.finish(&mut record, RunState::Exhausted, exhausted_reason(max, &report));
                }
            }

            match self.patcher.propose(&report, &requirement, &config, &patches) {
                Ok(patch) => {
                    self.store
                        .write_override(run_id, iteration, &patch.config_override)?;
                    patches.record(&patch.config_override);
                    self.emit(ProgressEvent::Patched {
                        run_id: run_id.to_string(),
                        iteration,
                        revision: patch.config_override.revision.clone(),
                        rationale: patch.config_override.rationale.clone(),
                    });
                    config = patch.config;
                }
                Err(e) if e.is_fatal() => {
                    return self.finish(&mut record, RunState::Fatal, e.to_string());
                }
                Err(e) => return Err(e),
            }

            if cancel.is_cancelled() {
                return self.finish(&mut record, RunState::Cancelled, cancelled_reason());
            }
            self.advance(&mut record, RunState::Generating)?;
            iteration += 1;
        }
    }

    /// Generate and evaluate once. Leaves the record in Evaluating (report
    /// from the evaluator) or Patching (generation failed), or asks the
    /// caller to stop.
    async fn iterate(
        &self,
        record: &mut RunRecord,
        requirement: &RequirementSpec,
        config: &ConfigSnapshot,
        iteration: u32,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        let run_id = record.run_id().to_string();
        self.emit(ProgressEvent::IterationStart {
            run_id: run_id.clone(),
            iteration,
            max_iterations: record.max_iterations(),
        });
        let work_dir = self.store.create_iteration(&run_id, iteration)?;
        self.store.write_config(&run_id, iteration, config)?;

        let request = PipelineRequest {
            run_id: run_id.clone(),
            iteration,
            requirement: requirement.clone(),
            config: config.clone(),
            stages: config.stages,
            work_dir,
        };
        tracing::info!(
            run_id = %run_id,
            iteration,
            pipeline = self.runner.pipeline_name(),
            "generating"
        );
        let generated = self
            .runner
            .run(request, cancel, |ev| {
                self.emit(match ev {
                    StageEvent::Started(stage) => ProgressEvent::StageStarted {
                        run_id: run_id.clone(),
                        iteration,
                        stage: stage.clone(),
                    },
                    StageEvent::Message(message) => ProgressEvent::StageMessage {
                        run_id: run_id.clone(),
                        iteration,
                        message: message.clone(),
                    },
                })
            })
            .await;

        let manifest = match generated {
            Ok(m) => m,
            Err(VidloopError::Generation { stage, cause }) => {
                tracing::warn!(run_id = %run_id, iteration, stage = %stage, "generation failed: {}", cause);
                let failure = StageFailure { stage, cause };
                self.store.write_error(&run_id, iteration, &failure)?;
                let report = QualityReport::new(
                    &run_id,
                    iteration,
                    vec![Deviation::hard(format!("stage:{}", failure.stage), "completed", "failed")
                        .with_note(failure.cause.clone())],
                    0.0,
                );
                self.store.write_report(&report)?;
                self.append(
                    record,
                    IterationEntry {
                        iteration,
                        config: config.clone(),
                        outcome: IterationOutcome::Error {
                            stage: failure.stage,
                            cause: failure.cause,
                        },
                        report: Some(report.clone()),
                    },
                )?;
                self.emit_iteration_end(&report);
                if cancel.is_cancelled() {
                    return Ok(Step::Stop(RunState::Cancelled, cancelled_reason()));
                }
                self.advance(record, RunState::Patching)?;
                return Ok(Step::Report(report));
            }
            Err(e) => return Err(e),
        };

        self.store.write_manifest(&run_id, iteration, &manifest)?;
        let entry = |report: Option<QualityReport>| IterationEntry {
            iteration,
            config: config.clone(),
            outcome: IterationOutcome::Manifest(manifest.clone()),
            report,
        };

        if cancel.is_cancelled() {
            self.append(record, entry(None))?;
            return Ok(Step::Stop(RunState::Cancelled, cancelled_reason()));
        }
        self.advance(record, RunState::Evaluating)?;

        let report = match self
            .evaluator
            .evaluate(&run_id, iteration, requirement, &manifest)
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_fatal() => {
                self.append(record, entry(None))?;
                return Ok(Step::Stop(RunState::Fatal, e.to_string()));
            }
            Err(e @ VidloopError::Timeout { .. }) => {
                tracing::warn!(run_id = %run_id, iteration, "{}", e);
                QualityReport::new(
                    &run_id,
                    iteration,
                    vec![Deviation::hard("probe", "measurement", "timed out").with_note(e.to_string())],
                    0.0,
                )
            }
            Err(e) => return Err(e),
        };
        self.store.write_report(&report)?;
        self.append(record, entry(Some(report.clone())))?;
        self.emit_iteration_end(&report);
        tracing::info!(
            run_id = %run_id,
            iteration,
            passed = report.passed,
            score = report.score,
            "evaluated"
        );
        Ok(Step::Report(report))
    }

    fn emit_iteration_end(&self, report: &QualityReport) {
        let hard = report.hard_count();
        self.emit(ProgressEvent::IterationEnd {
            run_id: report.run_id.clone(),
            iteration: report.iteration,
            passed: report.passed,
            score: report.score,
            hard,
            soft: report.deviations.len() - hard,
        });
    }
}

fn cancelled_reason() -> String {
    "cancelled by request".to_string()
}

fn exhausted_reason(max: u32, report: &QualityReport) -> String {
    let fields: Vec<&str> = report
        .deviations
        .iter()
        .filter(|d| d.severity == super::types::Severity::Hard)
        .map(|d| d.field.as_str())
        .collect();
    format!(
        "no passing result after {} iteration{} (outstanding: {})",
        max,
        if max == 1 { "" } else { "s" },
        fields.join(", ")
    )
}
