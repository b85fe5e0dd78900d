// src/cli/status.rs — `vidloop status` and `vidloop diff`

use std::path::Path;

use crate::core::patcher::ConfigPatcher;
use crate::core::record::{IterationOutcome, RunRecord};
use crate::core::state::RunStore;
use crate::history::{ConfigHistory, FieldChange, FsConfigHistory};
use crate::util::truncate_str;

const LIST_LIMIT: usize = 20;

/// List recent runs, or show one in detail.
pub fn show_status(runs_dir: &Path, run_id: Option<&str>, json: bool) -> anyhow::Result<()> {
    let store = RunStore::new(runs_dir);
    match run_id {
        Some(id) => {
            let record = store.load_record(id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                let reason = store.load_summary(id)?.map(|s| s.reason);
                print!("{}", render_record(&record, reason.as_deref()));
            }
        }
        None => {
            let ids = store.list_runs()?;
            if ids.is_empty() {
                println!("No runs in {}", runs_dir.display());
                return Ok(());
            }
            let start = ids.len().saturating_sub(LIST_LIMIT);
            for id in &ids[start..] {
                match store.load_record(id) {
                    Ok(r) => println!(
                        "{:<26} {:<11} {}/{}  {}",
                        id,
                        r.state().to_string(),
                        r.iterations().len(),
                        r.max_iterations(),
                        truncate_str(r.prompt(), 50)
                    ),
                    Err(e) => println!("{:<26} (unreadable: {})", id, e),
                }
            }
        }
    }
    Ok(())
}

/// Human-readable view of one run.
pub fn render_record(record: &RunRecord, reason: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str(&format!("Run:        {}\n", record.run_id()));
    out.push_str(&format!("Prompt:     {}\n", record.prompt()));
    out.push_str(&format!(
        "State:      {} ({}/{} iterations)\n",
        record.state(),
        record.iterations().len(),
        record.max_iterations()
    ));
    if let Some(req) = record.requirement() {
        out.push_str(&format!(
            "Target:     {:.1}s {} @ {}fps\n",
            req.target_duration_sec, req.resolution, req.fps
        ));
    }
    if let Some(reason) = reason {
        out.push_str(&format!("Reason:     {reason}\n"));
    }

    for entry in record.iterations() {
        let rev = entry
            .config
            .revision
            .as_deref()
            .map(|r| &r[..r.len().min(12)])
            .unwrap_or("-");
        out.push_str(&format!("\n  iteration {} (config {})\n", entry.iteration, rev));
        match &entry.outcome {
            IterationOutcome::Manifest(m) => {
                out.push_str(&format!("    artifact: {}\n", m.artifact_path.display()))
            }
            IterationOutcome::Error { stage, cause } => {
                out.push_str(&format!("    failed at {stage}: {cause}\n"))
            }
        }
        match &entry.report {
            Some(r) => {
                out.push_str(&format!(
                    "    {} score={:.1}\n",
                    if r.passed { "PASS" } else { "FAIL" },
                    r.score
                ));
                for d in &r.deviations {
                    out.push_str(&format!("      {d}\n"));
                }
            }
            None => out.push_str("    (not evaluated)\n"),
        }
    }
    out
}

/// Print the field differences between two revisions of a run's config.
pub fn show_diff(runs_dir: &Path, run_id: &str, rev_a: &str, rev_b: &str) -> anyhow::Result<()> {
    let history = FsConfigHistory::new(super::run::history_dir(runs_dir))?;
    let branch = ConfigPatcher::branch_for(run_id);
    for rev in [rev_a, rev_b] {
        let r = history.get(rev)?;
        if r.branch != branch {
            anyhow::bail!("revision {} belongs to {}, not {}", r.short_id(), r.branch, branch);
        }
    }
    let changes = history.diff(rev_a, rev_b)?;
    if changes.is_empty() {
        println!("No differences.");
    }
    for c in &changes {
        println!("{}", format_change(c));
    }
    Ok(())
}

fn format_change(c: &FieldChange) -> String {
    let show = |v: &Option<serde_json::Value>| match v {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    };
    format!("{}: {} -> {}", c.field, show(&c.before), show(&c.after))
}
