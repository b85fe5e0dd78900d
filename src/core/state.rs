// src/core/state.rs — Run directory layout and persistence
//
//   <runs>/<run_id>/requirement.json
//   <runs>/<run_id>/run.json                     RunRecord, rewritten on every change
//   <runs>/<run_id>/summary.json                 terminal outcome
//   <runs>/<run_id>/iteration_<n>/config.json
//   <runs>/<run_id>/iteration_<n>/manifest.json
//   <runs>/<run_id>/iteration_<n>/qc_report.json
//   <runs>/<run_id>/iteration_<n>/error.json     generation failure
//   <runs>/<run_id>/iteration_<n>/override.json  patch proposed after this iteration
//
// Every JSON file is written atomically (temp file + rename).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::record::{RunOutcome, RunRecord};
use super::types::{ConfigOverride, ConfigSnapshot, GenerationManifest, QualityReport, RequirementSpec};
use crate::infra::errors::{Result, VidloopError};

/// Contents of `error.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: String,
    pub cause: String,
}

#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    pub fn iteration_dir(&self, run_id: &str, iteration: u32) -> PathBuf {
        self.run_dir(run_id).join(format!("iteration_{iteration}"))
    }

    /// Create the run directory. Fails if it already exists.
    pub fn create_run(&self, run_id: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let dir = self.run_dir(run_id);
        std::fs::create_dir(&dir)?;
        Ok(dir)
    }

    /// Create (if needed) and return the iteration directory.
    pub fn create_iteration(&self, run_id: &str, iteration: u32) -> Result<PathBuf> {
        let dir = self.iteration_dir(run_id, iteration);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    // ─── Writers ────────────────────────────────────────────────

    pub fn write_requirement(&self, run_id: &str, req: &RequirementSpec) -> Result<()> {
        write_json(&self.run_dir(run_id).join("requirement.json"), req)
    }

    pub fn write_record(&self, record: &RunRecord) -> Result<()> {
        write_json(&self.run_dir(record.run_id()).join("run.json"), record)
    }

    pub fn write_config(&self, run_id: &str, iteration: u32, config: &ConfigSnapshot) -> Result<()> {
        write_json(&self.iteration_dir(run_id, iteration).join("config.json"), config)
    }

    pub fn write_manifest(&self, run_id: &str, iteration: u32, manifest: &GenerationManifest) -> Result<()> {
        write_json(&self.iteration_dir(run_id, iteration).join("manifest.json"), manifest)
    }

    pub fn write_report(&self, report: &QualityReport) -> Result<()> {
        write_json(
            &self
                .iteration_dir(&report.run_id, report.iteration)
                .join("qc_report.json"),
            report,
        )
    }

    pub fn write_error(&self, run_id: &str, iteration: u32, failure: &StageFailure) -> Result<()> {
        write_json(&self.iteration_dir(run_id, iteration).join("error.json"), failure)
    }

    pub fn write_override(&self, run_id: &str, iteration: u32, ov: &ConfigOverride) -> Result<()> {
        write_json(&self.iteration_dir(run_id, iteration).join("override.json"), ov)
    }

    /// Terminal outcome. Lives inside the run directory only; runs share no files.
    pub fn write_summary(&self, outcome: &RunOutcome) -> Result<()> {
        write_json(&self.run_dir(&outcome.run_id).join("summary.json"), outcome)
    }

    // ─── Readers ────────────────────────────────────────────────

    pub fn load_record(&self, run_id: &str) -> Result<RunRecord> {
        self.read_run_file(run_id, "run.json")
    }

    pub fn load_requirement(&self, run_id: &str) -> Result<RequirementSpec> {
        self.read_run_file(run_id, "requirement.json")
    }

    pub fn load_summary(&self, run_id: &str) -> Result<Option<RunOutcome>> {
        read_optional(&self.run_dir(run_id).join("summary.json"))
    }

    fn read_run_file<T: DeserializeOwned>(&self, run_id: &str, name: &str) -> Result<T> {
        let dir = self.run_dir(run_id);
        if !dir.is_dir() {
            return Err(VidloopError::RunNotFound(run_id.to_string()));
        }
        read_optional(&dir.join(name))?.ok_or_else(|| VidloopError::RunNotFound(run_id.to_string()))
    }

    /// Run ids under the root, oldest first (ids sort by creation time).
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().join("run.json").is_file())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| VidloopError::Other(anyhow::anyhow!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(dir)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.tmp"));

    let json = serde_json::to_string_pretty(value)?;
    let mut f = std::fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    f.flush()?;
    f.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
