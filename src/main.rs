// src/main.rs — vidloop entry point

use clap::Parser;

use vidloop::cli::{Cli, Commands};
use vidloop::infra::config::{Config, PipelineKind};
use vidloop::infra::{logger, paths};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logger::init_logging(if cli.verbose { "info" } else { "warn" });

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = cli.runs_dir {
        config.runs_dir = Some(dir);
    }

    match cli.command {
        Commands::Run(args) => vidloop::cli::run::run_command(&config, args, cli.verbose).await,
        Commands::Status { run_id, json } => {
            vidloop::cli::status::show_status(&config.runs_dir(), run_id.as_deref(), json)?;
            Ok(0)
        }
        Commands::Diff {
            run_id,
            rev_a,
            rev_b,
        } => {
            vidloop::cli::status::show_diff(&config.runs_dir(), &run_id, &rev_a, &rev_b)?;
            Ok(0)
        }
        Commands::Doctor => {
            run_doctor(&config);
            Ok(0)
        }
    }
}

fn run_doctor(config: &Config) {
    println!("vidloop doctor v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config_path = paths::config_file_path();
    if config_path.exists() {
        println!("  Config:     {} (loaded)", config_path.display());
    } else {
        println!("  Config:     (using defaults)");
    }
    println!("  Runs dir:   {}", config.runs_dir().display());

    for tool in ["ffprobe", "ffmpeg"] {
        match which::which(tool) {
            Ok(p) => println!("  {:<11} {}", format!("{tool}:"), p.display()),
            Err(_) => println!("  {:<11} NOT FOUND", format!("{tool}:")),
        }
    }

    match (config.pipeline.kind, &config.pipeline.command) {
        (PipelineKind::Placeholder, _) => println!("  Pipeline:   placeholder (ffmpeg)"),
        (PipelineKind::Command, Some(cmd)) => match which::which(cmd) {
            Ok(p) => println!("  Pipeline:   {}", p.display()),
            Err(_) => println!("  Pipeline:   {cmd} (NOT FOUND)"),
        },
        (PipelineKind::Command, None) => {
            println!("  Pipeline:   not configured (use --placeholder or set [pipeline] command)")
        }
    }

    let p = &config.provider;
    if !p.enabled {
        println!("  Provider:   disabled (heuristic translation)");
    } else if std::env::var(&p.api_key_env).map(|v| !v.is_empty()).unwrap_or(false) {
        println!("  Provider:   {} via {}", p.model, p.base_url);
    } else {
        println!(
            "  Provider:   ${} not set (heuristic translation)",
            p.api_key_env
        );
    }
}
