// src/lib.rs — Library root for vidloop

pub mod cli;
pub mod core;
pub mod evaluator;
pub mod history;
pub mod infra;
pub mod pipeline;
pub mod provider;
pub mod util;
