// src/evaluator/judge.rs — Subjective scoring through the text-generation collaborator
//
// The judge never sees pixels: it scores the requirement against the scene
// plan recorded in the manifest. Failures are reported as `None` so the
// objective evaluation always completes.

use std::sync::Arc;
use std::time::Duration;

use crate::core::types::{GenerationManifest, RequirementSpec};
use crate::provider::{CompletionRequest, TextGenerator};

/// Dimensions the judge is asked to score.
pub const DIMENSIONS: [&str; 2] = ["narration", "visual"];

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectiveScore {
    pub dimension: String,
    /// 0-100.
    pub score: f64,
}

pub struct SubjectiveJudge {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl SubjectiveJudge {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Score every dimension, or `None` if the collaborator failed or answered
    /// with nothing usable.
    pub async fn score(
        &self,
        requirement: &RequirementSpec,
        manifest: &GenerationManifest,
    ) -> Option<Vec<SubjectiveScore>> {
        let request = CompletionRequest::prompt(build_prompt(requirement, manifest))
            .with_system("You are a strict video editor reviewing a storyboard.");

        let completion = match tokio::time::timeout(self.timeout, self.generator.complete(request)).await {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => {
                tracing::warn!("Subjective judge failed, skipping: {}", e);
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    "Subjective judge timed out after {}s, skipping",
                    self.timeout.as_secs()
                );
                return None;
            }
        };

        let scores = parse_scores(&completion.content);
        if scores.is_empty() {
            tracing::warn!(
                "Subjective judge returned no scores: {}",
                crate::util::truncate_str(&completion.content, 200)
            );
            return None;
        }
        Some(scores)
    }
}

fn build_prompt(requirement: &RequirementSpec, manifest: &GenerationManifest) -> String {
    let scenes = if manifest.scenes.is_empty() {
        "(no scene metadata)".to_string()
    } else {
        manifest
            .scenes
            .iter()
            .map(|s| format!("{}. [{:.1}s] {}", s.index, s.duration_sec, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let beats = if requirement.narrative_beats.is_empty() {
        "(none given)".to_string()
    } else {
        requirement.narrative_beats.join("; ")
    };
    format!(
        "## Brief\n{}\nStyle: {}\nNarrative beats: {}\n\n\
         ## Scenes\n{}\n\n\
         Score each dimension 0-100.\n\
         narration: does the scene sequence tell the brief's story coherently?\n\
         visual: do the scenes fit the requested style consistently?\n\
         Respond with exactly:\n\
         narration: <score>\n\
         visual: <score>",
        requirement.prompt_summary,
        requirement
            .style_tags
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
        beats,
        scenes
    )
}

/// Parse lines like "narration: 72" or "- visual: 55/100". Unknown
/// dimensions and out-of-range values are ignored.
pub fn parse_scores(response: &str) -> Vec<SubjectiveScore> {
    let mut out: Vec<SubjectiveScore> = Vec::new();
    for line in response.lines() {
        let line = line.trim().trim_start_matches(['-', '*']).trim();
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if !DIMENSIONS.contains(&name.as_str()) || out.iter().any(|s| s.dimension == name) {
            continue;
        }
        let value = rest.trim().split('/').next().unwrap_or("").trim();
        let Ok(score) = value.parse::<f64>() else {
            continue;
        };
        if (0.0..=100.0).contains(&score) {
            out.push(SubjectiveScore {
                dimension: name,
                score,
            });
        }
    }
    out
}
