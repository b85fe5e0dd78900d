// src/core/translator.rs — Prompt -> RequirementSpec
//
// Asks the text generator for a JSON requirement, feeding parse/validation
// errors back for a bounded number of corrective turns. When no generator is
// configured or it can't be reached, a keyword heuristic fills in defaults so
// a run is never blocked on that collaborator.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::types::{RequirementSpec, Resolution, Tolerance};
use crate::infra::errors::{Result, VidloopError};
use crate::provider::{CompletionRequest, Message, TextGenerator};
use crate::util::{extract_json_object, strip_code_fences, truncate_str};

const DEFAULT_DURATION_SEC: f64 = 60.0;
const DEFAULT_FPS: u32 = 30;

const SYSTEM_PROMPT: &str = "You are a video production planner. Convert the user's request into \
a JSON object with these fields:\n\
- prompt_summary: short description\n\
- target_duration_sec: number of seconds, e.g. 60\n\
- resolution: \"WIDTHxHEIGHT\", e.g. \"1080x1920\" for vertical shorts\n\
- fps: integer, e.g. 30\n\
- style_tags: list of short visual style keywords\n\
- voice: narration voice preset or null\n\
- music: background music mood or null\n\
- pacing: \"Fast\", \"Medium\" or \"Slow\"\n\
- narrative_beats: list of story beats\n\
- forbidden_content: list of things to avoid\n\
Output ONLY the JSON object, no Markdown and no commentary.";

pub struct RequirementTranslator {
    generator: Option<Arc<dyn TextGenerator>>,
    max_retries: u32,
    timeout: Duration,
}

impl RequirementTranslator {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            generator,
            max_retries: 2,
            timeout: Duration::from_secs(60),
        }
    }

    /// Heuristic-only translator.
    pub fn heuristic() -> Self {
        Self::new(None)
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn translate(&self, prompt: &str) -> Result<RequirementSpec> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(VidloopError::Translation {
                attempts: 0,
                message: "empty prompt".into(),
            });
        }

        let Some(generator) = &self.generator else {
            tracing::info!("No text generator configured, using keyword heuristics");
            return Ok(heuristic_requirement(prompt));
        };

        let mut messages = vec![Message::user(format!(
            "Create a video requirement for this request:\n\n{prompt}"
        ))];
        let mut last_error = String::new();
        let attempts = self.max_retries + 1;

        for attempt in 1..=attempts {
            let request = CompletionRequest {
                system: Some(SYSTEM_PROMPT.into()),
                messages: messages.clone(),
                max_tokens: Some(1024),
                temperature: Some(0.2),
            };

            let content = match tokio::time::timeout(self.timeout, generator.complete(request)).await {
                Ok(Ok(c)) => c.content,
                Ok(Err(e)) => {
                    tracing::warn!("Text generator failed ({}), using keyword heuristics", e);
                    return Ok(heuristic_requirement(prompt));
                }
                Err(_) => {
                    tracing::warn!(
                        "Text generator timed out after {}s, using keyword heuristics",
                        self.timeout.as_secs()
                    );
                    return Ok(heuristic_requirement(prompt));
                }
            };

            match parse_requirement(&content, prompt) {
                Ok(spec) => {
                    tracing::info!(attempt, "Prompt translated");
                    return Ok(spec);
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, "Rejected requirement draft: {}", e);
                    last_error = e;
                    messages.push(Message::assistant(content));
                    messages.push(Message::user(format!(
                        "That answer was invalid: {last_error}. \
                         Reply with only the corrected JSON object."
                    )));
                }
            }
        }

        Err(VidloopError::Translation {
            attempts,
            message: last_error,
        })
    }
}

// ─── LLM response parsing ───────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResolutionField {
    Text(String),
    Dims { width: u32, height: u32 },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringList {
    One(String),
    Many(Vec<String>),
}

impl StringList {
    fn into_vec(self) -> Vec<String> {
        let items = match self {
            StringList::One(s) => s.split([',', ';', '\n']).map(str::to_string).collect(),
            StringList::Many(v) => v,
        };
        items
            .into_iter()
            .map(|s| s.trim().trim_start_matches('-').trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Lenient shape accepted from the model. Field aliases cover older prompt
/// formats that used `duration_target_sec`, `target_resolution` and `style_mood`.
#[derive(Debug, Deserialize)]
struct RequirementDraft {
    #[serde(default)]
    prompt_summary: Option<String>,
    #[serde(default, alias = "duration_target_sec", alias = "duration_sec")]
    target_duration_sec: Option<f64>,
    #[serde(default, alias = "target_resolution")]
    resolution: Option<ResolutionField>,
    #[serde(default)]
    fps: Option<f64>,
    #[serde(default, alias = "style_mood", alias = "style")]
    style_tags: Option<StringList>,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default, alias = "audio_requirements")]
    music: Option<serde_json::Value>,
    #[serde(default)]
    pacing: Option<String>,
    #[serde(default)]
    narrative_beats: Option<StringList>,
    #[serde(default)]
    forbidden_content: Option<StringList>,
}

impl RequirementDraft {
    fn into_spec(self, prompt: &str) -> std::result::Result<RequirementSpec, String> {
        let resolution = match self.resolution {
            None => Resolution::PORTRAIT_HD,
            Some(ResolutionField::Text(s)) => s.parse().map_err(|e: VidloopError| e.to_string())?,
            Some(ResolutionField::Dims { width, height }) => Resolution::new(width, height),
        };
        let fps = match self.fps {
            None => DEFAULT_FPS,
            Some(f) if f.is_finite() && f >= 1.0 => f.round() as u32,
            Some(f) => return Err(format!("fps must be a positive number, got {f}")),
        };
        let music = match self.music {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };

        let spec = RequirementSpec {
            prompt_summary: self
                .prompt_summary
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| truncate_str(prompt, 200).to_string()),
            target_duration_sec: self.target_duration_sec.unwrap_or(DEFAULT_DURATION_SEC),
            resolution,
            fps,
            style_tags: self
                .style_tags
                .map(|s| s.into_vec().into_iter().map(|t| t.to_lowercase()).collect())
                .unwrap_or_default(),
            voice: self.voice.filter(|v| !v.trim().is_empty()),
            music,
            pacing: self.pacing,
            narrative_beats: self.narrative_beats.map(StringList::into_vec).unwrap_or_default(),
            forbidden_content: self.forbidden_content.map(StringList::into_vec).unwrap_or_default(),
            tolerance: Tolerance::default(),
        };
        spec.validate().map_err(|e| e.to_string())?;
        Ok(spec)
    }
}

/// Parse a model answer into a validated spec. Errors are phrased for the
/// corrective follow-up turn.
fn parse_requirement(content: &str, prompt: &str) -> std::result::Result<RequirementSpec, String> {
    let body = strip_code_fences(content);
    let json = extract_json_object(body).ok_or("no JSON object found")?;
    let draft: RequirementDraft =
        serde_json::from_str(json).map_err(|e| format!("JSON does not match the schema: {e}"))?;
    draft.into_spec(prompt)
}

// ─── Keyword heuristic ──────────────────────────────────────────

const STYLE_KEYWORDS: &[&str] = &[
    "cinematic",
    "minimal",
    "minimalist",
    "documentary",
    "retro",
    "vintage",
    "anime",
    "cartoon",
    "watercolor",
    "noir",
    "futuristic",
    "cyberpunk",
    "realistic",
    "photorealistic",
    "playful",
    "dramatic",
    "epic",
    "calm",
    "tech",
    "corporate",
    "3d",
];

const VOICE_PRESETS: &[&str] = &[
    "documentary",
    "dramatic",
    "female",
    "british",
    "friendly",
    "soft",
    "australian",
];

/// Music mood by prompt keywords, first match wins.
const MUSIC_MOODS: &[(&str, &[&str])] = &[
    ("epic", &["epic", "fly", "wing", "soar", "hero", "triumph"]),
    ("melancholic", &["sad", "dark", "loss", "death", "mourn"]),
    ("peaceful", &["calm", "peace", "nature", "ocean", "forest"]),
];

/// A number followed by a unit word, e.g. `15s`, `2 min`, `60fps`, `4k`.
fn quantities(text: &str) -> Vec<(f64, String)> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let starts_word = i == 0 || !chars[i - 1].is_ascii_alphanumeric();
        if !chars[i].is_ascii_digit() || !starts_word {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
            i += 1;
        }
        let num: String = chars[start..i].iter().collect();
        let mut j = i;
        while j < chars.len() && (chars[j] == ' ' || chars[j] == '-') {
            j += 1;
        }
        let unit_start = j;
        while j < chars.len() && chars[j].is_ascii_alphabetic() {
            j += 1;
        }
        let unit: String = chars[unit_start..j].iter().collect();
        // Overlong digit runs parse to infinity.
        if let Ok(n) = num.trim_end_matches('.').parse::<f64>() {
            if n.is_finite() {
                out.push((n, unit.to_ascii_lowercase()));
            }
        }
        i = j.max(i);
    }
    out
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric() && c != ':')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deterministic requirement from prompt keywords alone.
pub fn heuristic_requirement(prompt: &str) -> RequirementSpec {
    let lower = prompt.to_lowercase();
    let words = words(&lower);
    let has = |w: &str| words.contains(w);

    let mut duration = None;
    let mut fps = None;
    let mut four_k = false;
    for (n, unit) in quantities(&lower) {
        match unit.as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" if duration.is_none() => duration = Some(n),
            "m" | "min" | "mins" | "minute" | "minutes" if duration.is_none() => {
                duration = Some(n * 60.0)
            }
            "fps" if fps.is_none() => fps = Some(n.round() as u32),
            "k" if n == 4.0 => four_k = true,
            _ => {}
        }
    }

    let portrait = has("vertical") || has("portrait") || has("9:16") || has("shorts") || has("tiktok");
    let resolution = if four_k {
        if portrait {
            Resolution::new(2160, 3840)
        } else {
            Resolution::new(3840, 2160)
        }
    } else if !portrait
        && (has("landscape") || has("16:9") || has("youtube") || has("horizontal") || has("widescreen"))
    {
        Resolution::new(1920, 1080)
    } else if has("square") || has("1:1") {
        Resolution::new(1080, 1080)
    } else {
        Resolution::PORTRAIT_HD
    };

    let style_tags: BTreeSet<String> = STYLE_KEYWORDS
        .iter()
        .filter(|k| has(k))
        .map(|k| k.to_string())
        .collect();

    let music = MUSIC_MOODS
        .iter()
        .find(|(_, keys)| keys.iter().any(|k| lower.contains(k)))
        .map(|(mood, _)| mood.to_string());

    let voice = VOICE_PRESETS
        .iter()
        .find(|v| has(v))
        .map(|v| v.to_string());

    let pacing = if has("fast") || has("quick") || has("energetic") {
        "Fast"
    } else if has("slow") || has("relaxing") || has("calm") {
        "Slow"
    } else {
        "Medium"
    };

    RequirementSpec {
        prompt_summary: truncate_str(prompt.trim(), 200).to_string(),
        target_duration_sec: duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(DEFAULT_DURATION_SEC),
        resolution,
        fps: fps.filter(|f| (1..=240).contains(f)).unwrap_or(DEFAULT_FPS),
        style_tags,
        voice,
        music,
        pacing: Some(pacing.to_string()),
        narrative_beats: Vec::new(),
        forbidden_content: Vec::new(),
        tolerance: Tolerance::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Completion;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Replays canned answers in order and records every request.
    struct Scripted {
        answers: Mutex<Vec<Result<String>>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
            self.seen.lock().unwrap().push(request);
            let next = self.answers.lock().unwrap().pop().expect("no scripted answer left");
            next.map(|content| Completion {
                content,
                usage: Default::default(),
            })
        }
    }

    const GOOD: &str = r#"```json
{"prompt_summary": "Tech explainer", "target_duration_sec": 15, "resolution": "1080x1920",
 "fps": 30, "style_tags": ["Tech", "minimal"], "music": null, "narrative_beats": "hook, explain, outro"}
```"#;

    // ─── Heuristic ──────────────────────────────────────────────

    #[test]
    fn test_heuristic_seconds() {
        let r = heuristic_requirement("15s tech explainer");
        assert_eq!(r.target_duration_sec, 15.0);
        assert_eq!(r.resolution, Resolution::PORTRAIT_HD);
        assert_eq!(r.fps, 30);
        assert!(r.style_tags.contains("tech"));
        assert_eq!(r.prompt_summary, "15s tech explainer");
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_heuristic_minutes_landscape_fps() {
        let r = heuristic_requirement("A 2 minute YouTube video at 60fps about forests");
        assert_eq!(r.target_duration_sec, 120.0);
        assert_eq!(r.resolution, Resolution::new(1920, 1080));
        assert_eq!(r.fps, 60);
        assert_eq!(r.music.as_deref(), Some("peaceful"));
    }

    #[test]
    fn test_heuristic_defaults() {
        let r = heuristic_requirement("something nice");
        assert_eq!(r.target_duration_sec, 60.0);
        assert_eq!(r.fps, 30);
        assert!(r.style_tags.is_empty());
        assert_eq!(r.pacing.as_deref(), Some("Medium"));
    }

    #[test]
    fn test_heuristic_4k_square_voice() {
        let r = heuristic_requirement("epic hero story in 4k, dramatic narration, 30 seconds");
        assert_eq!(r.resolution, Resolution::new(3840, 2160));
        assert_eq!(r.target_duration_sec, 30.0);
        assert_eq!(r.voice.as_deref(), Some("dramatic"));
        assert_eq!(r.music.as_deref(), Some("epic"));

        let r = heuristic_requirement("square 1:1 clip");
        assert_eq!(r.resolution, Resolution::new(1080, 1080));
    }

    #[test]
    fn test_heuristic_is_deterministic() {
        let p = "45 sec calm ocean documentary, slow pacing";
        assert_eq!(heuristic_requirement(p), heuristic_requirement(p));
    }

    #[test]
    fn test_quantities_ignore_embedded_digits() {
        let q = quantities("mp4 15 seconds");
        assert_eq!(q, vec![(15.0, "seconds".to_string())]);
    }

    #[test]
    fn test_heuristic_huge_numbers_fall_back_to_default() {
        let digits = "9".repeat(400);
        assert!(quantities(&format!("{digits} seconds")).is_empty());

        let r = heuristic_requirement(&format!("{digits} seconds of rain"));
        assert_eq!(r.target_duration_sec, 60.0);
        assert!(r.validate().is_ok());

        // Finite on its own, infinite once converted to seconds.
        let r = heuristic_requirement(&format!("{} minutes of rain", "9".repeat(308)));
        assert_eq!(r.target_duration_sec, 60.0);
        assert!(r.validate().is_ok());
    }

    // ─── Parsing ────────────────────────────────────────────────

    #[test]
    fn test_parse_single_line_fence() {
        let raw = r#"```json {"target_duration_sec": 15, "resolution": "1080x1920", "fps": 30}```"#;
        let spec = parse_requirement(raw, "p").unwrap();
        assert_eq!(spec.target_duration_sec, 15.0);
        assert_eq!(spec.fps, 30);
    }

    #[test]
    fn test_parse_fenced_json() {
        let spec = parse_requirement(GOOD, "p").unwrap();
        assert_eq!(spec.target_duration_sec, 15.0);
        assert!(spec.style_tags.contains("tech"));
        assert_eq!(spec.narrative_beats, vec!["hook", "explain", "outro"]);
    }

    #[test]
    fn test_parse_legacy_field_names() {
        let raw = r#"{"prompt_summary":"x","duration_target_sec":45,"target_resolution":"1920x1080",
                      "style_mood":"dark, moody","audio_requirements":{"music":"ambient"}}"#;
        let spec = parse_requirement(raw, "p").unwrap();
        assert_eq!(spec.target_duration_sec, 45.0);
        assert_eq!(spec.resolution, Resolution::new(1920, 1080));
        assert!(spec.style_tags.contains("moody"));
        assert!(spec.music.unwrap().contains("ambient"));
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        assert!(parse_requirement(r#"{"target_duration_sec": -5}"#, "p").is_err());
        assert!(parse_requirement(r#"{"resolution": "wide"}"#, "p").is_err());
        assert!(parse_requirement("sorry, I can't", "p").is_err());
    }

    // ─── translate() ────────────────────────────────────────────

    #[tokio::test]
    async fn test_translate_without_generator_uses_heuristic() {
        let t = RequirementTranslator::heuristic();
        let spec = t.translate("15s tech explainer").await.unwrap();
        assert_eq!(spec, heuristic_requirement("15s tech explainer"));
    }

    #[tokio::test]
    async fn test_translate_corrective_retry() {
        let gen = Scripted::new(vec![Ok("not json".into()), Ok(GOOD.into())]);
        let t = RequirementTranslator::new(Some(gen.clone()));
        let spec = t.translate("15s tech explainer").await.unwrap();
        assert_eq!(spec.prompt_summary, "Tech explainer");
        assert_eq!(gen.calls(), 2);
        let second = &gen.seen.lock().unwrap()[1];
        assert_eq!(second.messages.len(), 3);
        assert!(second.messages[2].content.contains("invalid"));
    }

    #[tokio::test]
    async fn test_translate_gives_up_after_retries() {
        let gen = Scripted::new(vec![Ok("{}x".into()), Ok("nope".into()), Ok("{\"fps\": 0}".into())]);
        let t = RequirementTranslator::new(Some(gen.clone())).with_max_retries(2);
        let err = t.translate("15s tech explainer").await.unwrap_err();
        assert!(matches!(err, VidloopError::Translation { attempts: 3, .. }));
        assert!(err.is_fatal());
        assert_eq!(gen.calls(), 3);
    }

    #[tokio::test]
    async fn test_translate_unavailable_falls_back() {
        let gen = Scripted::new(vec![Err(VidloopError::ProviderUnavailable {
            provider: "scripted".into(),
            message: "connection refused".into(),
        })]);
        let t = RequirementTranslator::new(Some(gen));
        let spec = t.translate("15s tech explainer").await.unwrap();
        assert_eq!(spec.target_duration_sec, 15.0);
    }

    #[tokio::test]
    async fn test_translate_empty_prompt() {
        let t = RequirementTranslator::heuristic();
        assert!(matches!(
            t.translate("   ").await,
            Err(VidloopError::Translation { .. })
        ));
    }
}
