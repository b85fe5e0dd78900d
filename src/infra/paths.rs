// src/infra/paths.rs — Path management
//
// Config lives under $VIDLOOP_HOME when set, otherwise ~/.vidloop/.
// Run directories default to ./runs so artifacts sit next to the project
// that produced them.

use directories::BaseDirs;
use std::path::PathBuf;

/// Returns the VIDLOOP_HOME override, if set.
fn vidloop_home() -> Option<PathBuf> {
    std::env::var_os("VIDLOOP_HOME").map(PathBuf::from)
}

/// Home directory, or the current directory when none can be determined.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $VIDLOOP_HOME/ or ~/.vidloop/
pub fn config_dir() -> PathBuf {
    if let Some(home) = vidloop_home() {
        return home;
    }
    dirs_home().join(".vidloop")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default runs root, relative to the working directory.
pub fn default_runs_dir() -> PathBuf {
    PathBuf::from("runs")
}
