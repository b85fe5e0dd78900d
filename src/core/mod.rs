// src/core/mod.rs — Run lifecycle: translate, generate, evaluate, patch

pub mod coordinator;
pub mod patcher;
pub mod record;
pub mod runner;
pub mod state;
pub mod supervisor;
pub mod translator;
pub mod types;
