use std::fmt;
use std::time::Duration;

use super::state::LifecycleState;

/// Supervisor operation that can run into a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
        })
    }
}

/// Failure of a caller-requested supervisor operation.
///
/// A server exiting on its own is not an error; it shows up as
/// [`LifecycleState::Crashed`] on the handle.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SupervisorError {
    #[error("unknown mcp server: {name}")]
    UnknownServer { name: String },

    #[error("failed to spawn mcp server {name} (command={command}): {source}")]
    SpawnFailed {
        name: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("mcp server {name} is not running (state={state})")]
    NotRunning { name: String, state: LifecycleState },

    #[error("{operation} of mcp server {name} timed out after {after:?}")]
    Timeout {
        name: String,
        operation: Operation,
        after: Duration,
    },

    #[error("failed to stop mcp server {name}: {source}")]
    StopFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("supervisor is shutting down; refusing to {operation} mcp server {name}")]
    Shutdown { name: String, operation: Operation },
}

impl SupervisorError {
    /// Server the failed operation targeted.
    pub fn server(&self) -> &str {
        match self {
            SupervisorError::UnknownServer { name }
            | SupervisorError::SpawnFailed { name, .. }
            | SupervisorError::NotRunning { name, .. }
            | SupervisorError::Timeout { name, .. }
            | SupervisorError::StopFailed { name, .. }
            | SupervisorError::Shutdown { name, .. } => name,
        }
    }
}
