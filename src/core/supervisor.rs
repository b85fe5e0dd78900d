// src/core/supervisor.rs — Submission surface: one coordinating task per run

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::coordinator::{RunCoordinator, SubmitOptions};
use super::record::{new_run_id, RunOutcome};
use super::types::ProgressEvent;
use crate::infra::errors::{Result, VidloopError};

const PROGRESS_CAPACITY: usize = 256;

struct ActiveRun {
    cancel: CancellationToken,
    task: JoinHandle<Result<RunOutcome>>,
}

/// Spawns runs and hands out their outcomes. Runs share nothing mutable;
/// the supervisor only keeps their join handles and cancel tokens.
pub struct RunSupervisor {
    coordinator: Arc<RunCoordinator>,
    runs: Mutex<HashMap<String, ActiveRun>>,
    progress: broadcast::Sender<ProgressEvent>,
}

impl RunSupervisor {
    /// Takes over the coordinator's progress callback to feed `subscribe()`.
    pub fn new(coordinator: RunCoordinator) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        let tx = progress.clone();
        let coordinator = coordinator.with_progress(move |ev| {
            // No subscribers is fine.
            let _ = tx.send(ev);
        });
        Self {
            coordinator: Arc::new(coordinator),
            runs: Mutex::new(HashMap::new()),
            progress,
        }
    }

    /// Progress events for every run, in emission order per run. Slow
    /// receivers lag and lose events rather than blocking runs.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    fn runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveRun>> {
        self.runs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start a run in the background; returns its id immediately.
    pub fn submit(&self, prompt: &str, opts: SubmitOptions) -> String {
        let run_id = new_run_id();
        let cancel = CancellationToken::new();
        let coordinator = self.coordinator.clone();
        let task = {
            let run_id = run_id.clone();
            let prompt = prompt.to_string();
            let cancel = cancel.clone();
            let progress = self.progress.clone();
            tokio::spawn(async move {
                let result = coordinator.run(&run_id, &prompt, &opts, &cancel).await;
                if let Err(e) = &result {
                    tracing::error!(run_id = %run_id, "run aborted: {e}");
                    let _ = progress.send(ProgressEvent::Aborted {
                        run_id: run_id.clone(),
                        error: e.to_string(),
                    });
                }
                result
            })
        };
        self.runs()
            .insert(run_id.clone(), ActiveRun { cancel, task });
        run_id
    }

    /// Request cancellation. The run stops at its next state boundary.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.runs().get(run_id) {
            Some(run) => {
                tracing::info!(run_id, "cancellation requested");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every run not yet waited on.
    pub fn cancel_all(&self) {
        for run in self.runs().values() {
            run.cancel.cancel();
        }
    }

    /// Ids of runs that have not been waited on yet.
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait for a run to reach a terminal state.
    pub async fn wait(&self, run_id: &str) -> Result<RunOutcome> {
        let run = self
            .runs()
            .remove(run_id)
            .ok_or_else(|| VidloopError::RunNotFound(run_id.to_string()))?;
        join(run.task).await
    }

    /// Wait for every submitted run, ordered by run id.
    pub async fn wait_all(&self) -> Vec<(String, Result<RunOutcome>)> {
        let mut runs: Vec<(String, ActiveRun)> = self.runs().drain().collect();
        runs.sort_by(|a, b| a.0.cmp(&b.0));
        let (ids, tasks): (Vec<String>, Vec<_>) =
            runs.into_iter().map(|(id, r)| (id, join(r.task))).unzip();
        ids.into_iter()
            .zip(futures::future::join_all(tasks).await)
            .collect()
    }
}

async fn join(task: JoinHandle<Result<RunOutcome>>) -> Result<RunOutcome> {
    task.await
        .map_err(|e| VidloopError::Other(anyhow::anyhow!("run task failed: {e}")))?
}
