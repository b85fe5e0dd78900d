// src/cli/run.rs — `vidloop run`: assemble the components and drive one run

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::progress;
use super::RunArgs;
use crate::core::coordinator::{RunCoordinator, SubmitOptions};
use crate::core::patcher::ConfigPatcher;
use crate::core::runner::GenerationRunner;
use crate::core::state::RunStore;
use crate::core::supervisor::RunSupervisor;
use crate::core::translator::RequirementTranslator;
use crate::evaluator::judge::SubjectiveJudge;
use crate::evaluator::probe::FfprobeProbe;
use crate::evaluator::QualityEvaluator;
use crate::history::FsConfigHistory;
use crate::infra::config::Config;
use crate::{pipeline, provider};

/// How long a failed run's renderer may take to drain before it is dropped.
const RENDER_GRACE: Duration = Duration::from_secs(1);

/// Config history lives next to the runs, outside any run directory.
pub fn history_dir(runs_dir: &Path) -> std::path::PathBuf {
    runs_dir.join(".history")
}

/// Wire up a coordinator from config. `args` may force the placeholder
/// pipeline or the subjective judge.
pub fn build_coordinator(config: &Config, args: &RunArgs) -> anyhow::Result<RunCoordinator> {
    let runs_dir = config.runs_dir();
    let generator = provider::from_config(&config.provider);
    if generator.is_none() {
        tracing::info!("No text generator available; prompts are translated heuristically");
    }

    let translator = RequirementTranslator::new(generator.clone())
        .with_max_retries(config.translator.max_retries)
        .with_timeout(config.timeouts.completion());

    let pipeline = pipeline::from_config(&config.pipeline, args.placeholder)?;
    let runner = GenerationRunner::new(pipeline, config.timeouts.generation());

    let mut evaluator = QualityEvaluator::new(Arc::new(FfprobeProbe::default()))
        .with_probe_timeout(config.timeouts.probe())
        .with_allowed_codecs(config.evaluation.allowed_codecs.clone());
    if args.subjective || config.evaluation.subjective {
        match generator {
            Some(g) => {
                evaluator = evaluator.with_judge(
                    SubjectiveJudge::new(g, config.timeouts.completion()),
                    config.evaluation.subjective_threshold as f64,
                );
            }
            None => tracing::warn!("Subjective evaluation requested but no text generator is configured"),
        }
    }

    let history = Arc::new(FsConfigHistory::new(history_dir(&runs_dir))?);
    let patcher = ConfigPatcher::new(history, config.patcher.clone());

    Ok(RunCoordinator::new(
        translator,
        runner,
        evaluator,
        patcher,
        RunStore::new(runs_dir),
    ))
}

/// Run to completion and return the process exit code.
pub async fn run_command(config: &Config, args: RunArgs, verbose: bool) -> anyhow::Result<i32> {
    let prompt = args.prompt_text();
    let opts = SubmitOptions {
        max_iterations: args
            .max_iterations
            .unwrap_or(config.iteration.max_iterations),
        target_duration_sec: args.target_duration,
        style_tags: args.style.clone(),
    };

    let supervisor = Arc::new(RunSupervisor::new(build_coordinator(config, &args)?));
    let rx = supervisor.subscribe();
    let run_id = supervisor.submit(&prompt, opts);

    let renderer = if args.quiet {
        None
    } else {
        eprintln!("[run] {} -> {}", run_id, config.runs_dir().join(&run_id).display());
        Some(tokio::spawn(progress::render(rx, run_id.clone(), verbose)))
    };

    let interrupt = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n[run] cancelling after the current step...");
                supervisor.cancel_all();
            }
        })
    };

    let outcome = supervisor.wait(&run_id).await;
    interrupt.abort();
    if let Some(mut r) = renderer {
        if outcome.is_err() {
            // A panicked run task never reports Aborted.
            if tokio::time::timeout(RENDER_GRACE, &mut r).await.is_err() {
                r.abort();
            }
        } else {
            let _ = r.await;
        }
    }

    let outcome = outcome?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(outcome.exit_code())
}
