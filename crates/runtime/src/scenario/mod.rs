//! Scenario execution
//!
//! - template: `${...}` placeholder resolution
//! - engine: step interpreter and call targets
//! - repository: scenario documents on disk
//! - service: install index and run entry point

pub mod engine;
pub mod repository;
pub mod service;
pub mod template;

pub use engine::{
    CallContext, CallTarget, ConsolePrintTarget, ExecutionContext, ScenarioEngine,
    SkillsRunTarget, VoiceSpeakTarget, IO_CONSOLE_PRINT, IO_VOICE_SPEAK,
};
pub use repository::ScenarioRepository;
pub use service::ScenarioService;

use nodemesh_core::ScenarioParseError;
use nodemesh_storage::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Step {step} calls unknown target {target}")]
    UnknownTarget { step: String, target: String },

    #[error("Scenario not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ScenarioParseError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ScenarioError>;
