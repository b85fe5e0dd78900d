// src/cli/progress.rs — Terminal progress renderer
//
// Everything goes to stderr; stdout carries only the final outcome.

use tokio::sync::broadcast;

use crate::core::types::ProgressEvent;

/// One display line per event.
pub fn format_event(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::StateChanged { to, .. } => format!("[state] {to}"),
        ProgressEvent::IterationStart {
            iteration,
            max_iterations,
            ..
        } => format!("[iter {iteration}/{max_iterations}] generating..."),
        ProgressEvent::StageStarted {
            iteration, stage, ..
        } => format!("[iter {iteration}]   stage: {stage}"),
        ProgressEvent::StageMessage {
            iteration, message, ..
        } => format!("[iter {iteration}]     {message}"),
        ProgressEvent::IterationEnd {
            iteration,
            passed,
            score,
            hard,
            soft,
            ..
        } => format!(
            "[iter {iteration}] score={score:.1} {} ({hard} hard, {soft} soft)",
            if *passed { "PASS" } else { "FAIL" }
        ),
        ProgressEvent::Patched {
            iteration,
            revision,
            rationale,
            ..
        } => format!(
            "[iter {iteration}] patch {}: {rationale}",
            &revision[..revision.len().min(12)]
        ),
        ProgressEvent::Complete {
            state,
            iterations,
            reason,
            ..
        } => format!("[done] {state} after {iterations} iteration(s): {reason}"),
        ProgressEvent::Aborted { error, .. } => format!("[error] run aborted: {error}"),
    }
}

/// Print events for `run_id` until it completes or aborts, or the channel closes.
pub async fn render(mut rx: broadcast::Receiver<ProgressEvent>, run_id: String, verbose: bool) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if event.run_id() != run_id {
                    continue;
                }
                let done = matches!(
                    event,
                    ProgressEvent::Complete { .. } | ProgressEvent::Aborted { .. }
                );
                let noisy = matches!(
                    event,
                    ProgressEvent::StageMessage { .. } | ProgressEvent::StateChanged { .. }
                );
                if verbose || !noisy {
                    eprintln!("{}", format_event(&event));
                }
                if done {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!("progress renderer skipped {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
