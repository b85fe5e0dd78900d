// src/infra/errors.rs — Error types for vidloop

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VidloopError {
    // Run-loop taxonomy
    #[error("Could not translate prompt after {attempts} attempt(s): {message}")]
    Translation { attempts: u32, message: String },

    #[error("Generation failed at stage '{stage}': {cause}")]
    Generation { stage: String, cause: String },

    #[error("Probe failed for '{path}': {message}")]
    Probe { path: String, message: String },

    #[error("No viable patch: {reason}")]
    NoViablePatch { reason: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    // Text-generation collaborator
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    // Validation
    #[error("Invalid requirement: {0}")]
    InvalidRequirement(String),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Invalid override for '{field}': {message}")]
    InvalidOverride { field: String, message: String },

    // Persistence
    #[error("Config history error: {0}")]
    History(String),

    #[error("Run record is frozen in state {state}")]
    RecordFrozen { state: String },

    #[error("Illegal state transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VidloopError {
    /// Transient provider failures worth another attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            VidloopError::Provider {
                retriable: true,
                ..
            }
        )
    }

    /// Errors that end a run in the Fatal state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VidloopError::Translation { .. }
                | VidloopError::Probe { .. }
                | VidloopError::NoViablePatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VidloopError>;
