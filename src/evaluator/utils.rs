// src/evaluator/utils.rs — Scoring helpers

use super::judge::SubjectiveScore;

/// Objective dimension weights. They sum to 1.0.
pub const OBJECTIVE_WEIGHTS: [(&str, f64); 5] = [
    ("resolution", 0.25),
    ("duration", 0.30),
    ("fps", 0.15),
    ("codec", 0.15),
    ("container", 0.15),
];

/// Share of the final score carried by subjective dimensions, when present.
pub const SUBJECTIVE_SHARE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct DimensionScore {
    pub dimension: String,
    /// 0.0-1.0.
    pub score: f64,
    pub weight: f64,
}

/// Objective dimensions scored 1.0 unless they appear in `failed`.
pub fn objective_dimensions(failed: &[&str]) -> Vec<DimensionScore> {
    OBJECTIVE_WEIGHTS
        .iter()
        .map(|(name, weight)| DimensionScore {
            dimension: name.to_string(),
            score: if failed.contains(name) { 0.0 } else { 1.0 },
            weight: *weight,
        })
        .collect()
}

/// Weighted mean of dimension scores, 0.0-1.0.
pub fn composite_score(dimensions: &[DimensionScore]) -> f64 {
    if dimensions.is_empty() {
        return 0.0;
    }
    let total_weight: f64 = dimensions.iter().map(|d| d.weight).sum();
    if total_weight == 0.0 {
        return dimensions.iter().map(|d| d.score).sum::<f64>() / dimensions.len() as f64;
    }
    dimensions.iter().map(|d| d.score * d.weight).sum::<f64>() / total_weight
}

/// Final 0-100 score. Subjective scores (0-100 each) are blended in when present.
pub fn final_score(objective: f64, subjective: Option<&[SubjectiveScore]>) -> f64 {
    let blended = match subjective {
        Some(s) if !s.is_empty() => {
            let mean = s.iter().map(|x| x.score).sum::<f64>() / s.len() as f64 / 100.0;
            (1.0 - SUBJECTIVE_SHARE) * objective + SUBJECTIVE_SHARE * mean
        }
        _ => objective,
    };
    round_to((blended * 100.0).clamp(0.0, 100.0), 2)
}

pub fn round_to(x: f64, places: i32) -> f64 {
    let m = 10f64.powi(places);
    (x * m).round() / m
}
