// src/cli/mod.rs — CLI definition (clap derive)

pub mod progress;
pub mod run;
pub mod status;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vidloop", about = "Iterative video generation until the result meets the requirement", version)]
pub struct Cli {
    /// Config file path (default: ~/.vidloop/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Runs directory (overrides config)
    #[arg(long, global = true)]
    pub runs_dir: Option<PathBuf>,

    /// More log output on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate a prompt and iterate generation until it passes QC
    Run(RunArgs),
    /// Show a run, or list recent runs
    Status {
        /// Run id (omit to list runs)
        run_id: Option<String>,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare two config revisions of a run
    Diff {
        run_id: String,
        /// Revision id or prefix (at least 4 hex chars)
        rev_a: String,
        rev_b: String,
    },
    /// Check external tools and provider settings
    Doctor,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// What the video should be, e.g. "15s tech explainer"
    #[arg(required = true, trailing_var_arg = true)]
    pub prompt: Vec<String>,

    /// Iteration budget, at least 1 (default from config)
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_iterations: Option<u32>,

    /// Override the translated target duration (seconds)
    #[arg(long)]
    pub target_duration: Option<f64>,

    /// Override the translated style tags (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub style: Vec<String>,

    /// Render a placeholder clip with ffmpeg instead of the configured pipeline
    #[arg(long)]
    pub placeholder: bool,

    /// Enable the subjective judge
    #[arg(long)]
    pub subjective: bool,

    /// Suppress progress output (only print the outcome)
    #[arg(long)]
    pub quiet: bool,
}

impl RunArgs {
    pub fn prompt_text(&self) -> String {
        self.prompt.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "vidloop",
            "run",
            "--max-iterations",
            "2",
            "--style",
            "noir,minimal",
            "--placeholder",
            "15s",
            "tech",
            "explainer",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.prompt_text(), "15s tech explainer");
                assert_eq!(args.max_iterations, Some(2));
                assert_eq!(args.style, vec!["noir", "minimal"]);
                assert!(args.placeholder);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_zero_iteration_budget_is_rejected() {
        assert!(Cli::try_parse_from(["vidloop", "run", "-n", "0", "clip"]).is_err());
        let cli = Cli::try_parse_from(["vidloop", "run", "-n", "1", "clip"]).unwrap();
        assert!(matches!(cli.command, Commands::Run(a) if a.max_iterations == Some(1)));
    }

    #[test]
    fn test_parse_diff_with_global_flag() {
        let cli = Cli::parse_from(["vidloop", "diff", "r1", "abcd", "ef01", "--runs-dir", "/tmp/runs"]);
        assert_eq!(cli.runs_dir, Some(PathBuf::from("/tmp/runs")));
        assert!(matches!(cli.command, Commands::Diff { .. }));
    }
}
