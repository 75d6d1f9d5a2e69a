use std::process::ExitStatus;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;

use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::watch;
use uuid::Uuid;

use super::state::LifecycleState;

/// Piped stdio of a running server, for whoever speaks MCP to it.
#[derive(Debug)]
pub struct ServerStdio {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Observable view of one launched server instance.
///
/// Cheap to clone. A restart produces a new handle with a fresh
/// `instance_id`; handles of earlier instances keep their terminal state.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    name: String,
    instance_id: Uuid,
    pid: Option<u32>,
    started_at: SystemTime,
    state: watch::Sender<LifecycleState>,
    exit: OnceLock<ExitStatus>,
    stdio: Mutex<Option<ServerStdio>>,
}

impl ServerHandle {
    pub(crate) fn new(name: &str, pid: Option<u32>, stdio: Option<ServerStdio>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            inner: Arc::new(HandleInner {
                name: name.to_string(),
                instance_id: Uuid::new_v4(),
                pid,
                started_at: SystemTime::now(),
                state,
                exit: OnceLock::new(),
                stdio: Mutex::new(stdio),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn started_at(&self) -> SystemTime {
        self.inner.started_at
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Exit status once the process has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.exit.get().copied()
    }

    /// Take the piped stdin/stdout. Returns `None` after the first call.
    pub fn take_stdio(&self) -> Option<ServerStdio> {
        match self.inner.stdio.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Wait until the instance reaches `Stopped` or `Crashed`.
    pub async fn wait_terminal(&self) -> LifecycleState {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // The sender lives in `inner`, which we hold.
            Err(_) => self.state(),
        }
    }

    /// Move to `next` if it is a forward edge from the current state.
    pub(crate) fn advance(&self, next: LifecycleState) -> bool {
        let name = &self.inner.name;
        self.inner.state.send_if_modified(|current| {
            if current.can_advance_to(next) {
                tracing::debug!(server = %name, from = %current, to = %next, "lifecycle transition");
                *current = next;
                true
            } else {
                tracing::warn!(server = %name, from = %current, to = %next, "ignored lifecycle transition");
                false
            }
        })
    }

    pub(crate) fn record_exit(&self, status: ExitStatus) {
        let _ = self.inner.exit.set(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_start_in_starting_with_distinct_ids() {
        let a = ServerHandle::new("fetch", Some(1), None);
        let b = ServerHandle::new("fetch", Some(1), None);
        assert_eq!(a.state(), LifecycleState::Starting);
        assert_ne!(a.instance_id(), b.instance_id());
        assert!(a.take_stdio().is_none());
    }

    #[test]
    fn backward_transitions_are_ignored() {
        let handle = ServerHandle::new("fetch", None, None);
        assert!(handle.advance(LifecycleState::Running));
        assert!(handle.advance(LifecycleState::Crashed));
        assert!(!handle.advance(LifecycleState::Running));
        assert_eq!(handle.state(), LifecycleState::Crashed);
    }

    #[tokio::test]
    async fn wait_terminal_observes_clone_updates() {
        let handle = ServerHandle::new("fetch", None, None);
        let observer = handle.clone();
        let waiter = tokio::spawn(async move { observer.wait_terminal().await });
        handle.advance(LifecycleState::Running);
        handle.advance(LifecycleState::Stopping);
        handle.advance(LifecycleState::Stopped);
        assert_eq!(waiter.await.unwrap(), LifecycleState::Stopped);
    }
}
