// src/core/patcher.rs — Turns a failed quality report into a committed config override
//
// Each deviation field maps to one rule. The viable rules for a report are
// merged into a single override, validated against the current snapshot and
// committed to config history before the coordinator ever sees it.

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::types::{
    Adjustment, ConfigOverride, ConfigSnapshot, Deviation, Direction, QualityReport, RequirementSpec,
    Severity, StageName,
};
use crate::history::ConfigHistory;
use crate::infra::config::PatcherConfig;
use crate::infra::errors::{Result, VidloopError};

/// Codec and container the patcher falls back to.
const SAFE_CODEC: &str = "h264";
const SAFE_CONTAINER: &str = "mp4";

/// How often each (deviation field, direction) has been patched in one run.
#[derive(Debug, Default, Clone)]
pub struct PatchHistory {
    counts: HashMap<Adjustment, u32>,
}

impl PatchHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, ov: &ConfigOverride) {
        for adj in &ov.adjustments {
            *self.counts.entry(adj.clone()).or_insert(0) += 1;
        }
    }

    pub fn times_patched(&self, field: &str, direction: Direction) -> u32 {
        self.counts
            .get(&Adjustment {
                field: field.to_string(),
                direction,
            })
            .copied()
            .unwrap_or(0)
    }
}

/// A committed override plus the snapshot it produces.
#[derive(Debug, Clone)]
pub struct ProposedPatch {
    pub config_override: ConfigOverride,
    pub config: ConfigSnapshot,
}

/// One rule's output before merging.
struct RuleChange {
    adjustment: Adjustment,
    changes: Vec<(String, Value)>,
    rationale: String,
}

pub struct ConfigPatcher {
    history: Arc<dyn ConfigHistory>,
    settings: PatcherConfig,
}

impl ConfigPatcher {
    pub fn new(history: Arc<dyn ConfigHistory>, settings: PatcherConfig) -> Self {
        Self { history, settings }
    }

    /// Config-history branch for a run.
    pub fn branch_for(run_id: &str) -> String {
        format!("runs/{run_id}")
    }

    /// Commit the iteration-1 snapshot as the branch root and return it with
    /// its revision set.
    pub fn commit_initial(&self, run_id: &str, initial: &ConfigSnapshot) -> Result<ConfigSnapshot> {
        let branch = Self::branch_for(run_id);
        self.history.branch(&branch)?;
        let id = self
            .history
            .commit(&branch, "initial configuration", &initial.to_changes())?;
        let mut snap = initial.clone();
        snap.revision = Some(id);
        Ok(snap)
    }

    /// Propose, validate and commit an override for `report`.
    ///
    /// Fails with `NoViablePatch` when none of the report's hard deviations
    /// has a rule that would change anything, or every such rule has hit the
    /// retry limit.
    pub fn propose(
        &self,
        report: &QualityReport,
        requirement: &RequirementSpec,
        current: &ConfigSnapshot,
        patches: &PatchHistory,
    ) -> Result<ProposedPatch> {
        let mut merged: BTreeMap<String, Value> = BTreeMap::new();
        let mut adjustments = Vec::new();
        let mut rationale = Vec::new();
        let mut blocked = Vec::new();
        let mut fixes_hard = false;

        for dev in &report.deviations {
            let Some(rule) = self.rule_for(dev, requirement, current) else {
                if dev.severity == Severity::Hard {
                    blocked.push(format!("{}: no applicable rule", dev.field));
                }
                continue;
            };
            let done = patches.times_patched(&rule.adjustment.field, rule.adjustment.direction);
            if done >= self.settings.retry_limit {
                tracing::info!(
                    field = %rule.adjustment.field,
                    direction = %rule.adjustment.direction,
                    "retry limit reached ({done}), skipping rule"
                );
                blocked.push(format!(
                    "{}: already patched {} {} times",
                    dev.field, rule.adjustment.direction, done
                ));
                continue;
            }
            if rule.changes.iter().any(|(k, _)| merged.contains_key(k)) {
                continue;
            }
            merged.extend(rule.changes);
            adjustments.push(rule.adjustment);
            rationale.push(rule.rationale);
            fixes_hard |= dev.severity == Severity::Hard;
        }

        if merged.is_empty() || (report.hard_count() > 0 && !fixes_hard) {
            return Err(VidloopError::NoViablePatch {
                reason: if blocked.is_empty() {
                    "no deviation has a patch rule".into()
                } else {
                    blocked.join("; ")
                },
            });
        }

        let mut next = current.apply(&merged).map_err(|e| VidloopError::NoViablePatch {
            reason: format!("proposed override is invalid: {e}"),
        })?;

        let old_values: BTreeMap<String, Value> = merged
            .keys()
            .map(|k| (k.clone(), current.field(k).unwrap_or(Value::Null)))
            .collect();
        let rationale = rationale.join("; ");
        let branch = Self::branch_for(&report.run_id);
        let message = format!("iteration {}: {}", report.iteration, rationale);
        let revision = self.history.commit(&branch, &message, &merged)?;
        next.revision = Some(revision.clone());

        let short = &revision[..revision.len().min(12)];
        tracing::info!(
            run_id = %report.run_id,
            iteration = report.iteration,
            revision = %short,
            "proposed override: {}",
            rationale
        );

        Ok(ProposedPatch {
            config_override: ConfigOverride {
                revision,
                branch,
                changes: merged,
                old_values,
                adjustments,
                rationale,
                derived_from: report.report_ref(),
                created_at: Utc::now(),
            },
            config: next,
        })
    }

    fn rule_for(
        &self,
        dev: &Deviation,
        requirement: &RequirementSpec,
        current: &ConfigSnapshot,
    ) -> Option<RuleChange> {
        let field = dev.field.as_str();
        match field {
            "duration" => self.duration_rule(dev, current),
            "resolution" => {
                let target = requirement.resolution;
                (current.output_resolution != target).then(|| {
                    set_rule(
                        field,
                        "output_resolution",
                        Value::from(target.to_string()),
                        format!("output_resolution {} -> {}", current.output_resolution, target),
                    )
                })
            }
            "fps" => (current.fps != requirement.fps).then(|| {
                set_rule(
                    field,
                    "fps",
                    Value::from(requirement.fps),
                    format!("fps {} -> {}", current.fps, requirement.fps),
                )
            }),
            "codec" => (current.codec != SAFE_CODEC).then(|| {
                set_rule(
                    field,
                    "codec",
                    Value::from(SAFE_CODEC),
                    format!("codec {} -> {}", current.codec, SAFE_CODEC),
                )
            }),
            "container" => (current.container != SAFE_CONTAINER).then(|| {
                set_rule(
                    field,
                    "container",
                    Value::from(SAFE_CONTAINER),
                    format!("container {} -> {}", current.container, SAFE_CONTAINER),
                )
            }),
            "artifact" => toggle_rule(field, current, StageName::Compile, true, "artifact missing"),
            "subjective.narration" => toggle_rule(
                field,
                current,
                StageName::StoryReview,
                true,
                "narration scored low",
            ),
            "subjective.visual" => {
                let style = requirement
                    .style_tags
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ");
                (!style.is_empty() && current.global_style != style).then(|| {
                    set_rule(
                        field,
                        "global_style",
                        Value::from(style.clone()),
                        format!("visual scored low, global_style -> \"{style}\""),
                    )
                })
            }
            _ => {
                let stage: StageName = field.strip_prefix("stage:")?.parse().ok()?;
                self.stage_rule(dev, stage, current)
            }
        }
    }

    /// Scale scene length toward the target; fall back to the scene count
    /// once scene length is pinned at its bound.
    fn duration_rule(&self, dev: &Deviation, current: &ConfigSnapshot) -> Option<RuleChange> {
        let expected = dev.expected.as_f64()?;
        let actual = dev.actual.as_f64().filter(|a| *a > 0.0)?;
        let ratio = expected / actual;
        let direction = if ratio > 1.0 {
            Direction::Increase
        } else {
            Direction::Decrease
        };
        let adjustment = Adjustment {
            field: dev.field.clone(),
            direction,
        };
        let why = format!("duration {actual:.2}s vs {expected:.2}s target");

        let scene_dur = (current.scene_duration_sec * ratio)
            .clamp(self.settings.min_scene_sec, self.settings.max_scene_sec);
        let scene_dur = (scene_dur * 1000.0).round() / 1000.0;
        if (scene_dur - current.scene_duration_sec).abs() > 1e-6 {
            return Some(RuleChange {
                adjustment,
                changes: vec![("scene_duration_sec".into(), Value::from(scene_dur))],
                rationale: format!(
                    "{why}: scene_duration_sec {:.3} -> {:.3}",
                    current.scene_duration_sec, scene_dur
                ),
            });
        }

        let count = (current.scene_count as f64 * ratio)
            .round()
            .clamp(1.0, self.settings.max_scene_count as f64) as u32;
        (count != current.scene_count).then(|| RuleChange {
            adjustment,
            changes: vec![("scene_count".into(), Value::from(count))],
            rationale: format!("{why}: scene_count {} -> {}", current.scene_count, count),
        })
    }

    /// Optional stage failed: drop it. Required stage failed: drop an
    /// optional input, preferring one the failure cause mentions.
    fn stage_rule(&self, dev: &Deviation, stage: StageName, current: &ConfigSnapshot) -> Option<RuleChange> {
        let target = if stage.is_optional() {
            current.stages.is_enabled(stage).then_some(stage)?
        } else {
            let cause = dev.note.as_deref().unwrap_or("").to_ascii_lowercase();
            let candidates: Vec<StageName> = stage
                .optional_inputs()
                .iter()
                .copied()
                .filter(|s| current.stages.is_enabled(*s))
                .collect();
            candidates
                .iter()
                .copied()
                .find(|s| mentions(&cause, *s))
                .or_else(|| candidates.first().copied())?
        };
        let mut rule = toggle_rule(
            &dev.field,
            current,
            target,
            false,
            &format!("stage {stage} failed"),
        )?;
        if let Some(note) = &dev.note {
            rule.rationale.push_str(&format!(" ({})", crate::util::truncate_str(note, 120)));
        }
        Some(rule)
    }
}

/// Whether a failure cause names a stage, as `music_gen`, `music gen` or `music`.
fn mentions(cause: &str, stage: StageName) -> bool {
    let name = stage.as_str();
    cause.contains(name)
        || cause.contains(&name.replace('_', " "))
        || name
            .split('_')
            .next()
            .is_some_and(|head| head.len() > 3 && cause.contains(head))
}

fn set_rule(dev_field: &str, key: &str, value: Value, rationale: String) -> RuleChange {
    RuleChange {
        adjustment: Adjustment {
            field: dev_field.to_string(),
            direction: Direction::Set,
        },
        changes: vec![(key.to_string(), value)],
        rationale,
    }
}

fn toggle_rule(
    dev_field: &str,
    current: &ConfigSnapshot,
    stage: StageName,
    enable: bool,
    why: &str,
) -> Option<RuleChange> {
    if current.stages.is_enabled(stage) == enable {
        return None;
    }
    let (direction, verb) = if enable {
        (Direction::Enable, "enable")
    } else {
        (Direction::Disable, "disable")
    };
    Some(RuleChange {
        adjustment: Adjustment {
            field: dev_field.to_string(),
            direction,
        },
        changes: vec![(format!("stages.{stage}"), Value::Bool(enable))],
        rationale: format!("{why}: {verb} {stage}"),
    })
}
