//! Subprocess supervision for the configured MCP servers.

mod error;
mod handle;
mod launcher;
mod manager;
mod state;

pub use error::{Operation, SupervisorError};
pub use handle::{ServerHandle, ServerStdio};
pub use launcher::{Launcher, ProcessLauncher};
pub use manager::{DEFAULT_STARTUP_PROBE, DEFAULT_STOP_GRACE, ServerSupervisor, SupervisorOptions};
pub use state::LifecycleState;
