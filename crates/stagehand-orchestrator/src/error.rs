//! Orchestrator error types.

use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors that can occur while talking to the cluster orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to decode orchestrator output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected orchestrator output: {0}")]
    UnexpectedOutput(String),

    #[error("delta stream closed")]
    StreamClosed,
}
