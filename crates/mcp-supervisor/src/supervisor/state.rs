use std::fmt;

use serde::Serialize;

/// Lifecycle of one launched server instance.
///
/// `NotStarted -> Starting -> Running -> (Stopping -> Stopped) | Crashed`.
/// `Starting -> Crashed` covers a process that exits during the startup probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Crashed)
    }

    /// Whether `self -> next` is a forward edge of the lifecycle.
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (NotStarted, Starting)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Stopping, Stopped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::NotStarted => "not_started",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Crashed => "crashed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::*;

    #[test]
    fn only_forward_edges_are_allowed() {
        assert!(NotStarted.can_advance_to(Starting));
        assert!(Starting.can_advance_to(Crashed));
        assert!(Running.can_advance_to(Stopping));
        assert!(Stopping.can_advance_to(Stopped));

        assert!(!Running.can_advance_to(Starting));
        assert!(!Stopped.can_advance_to(Running));
        assert!(!Crashed.can_advance_to(Running));
        assert!(!Stopping.can_advance_to(Crashed));
        assert!(!NotStarted.can_advance_to(Running));
    }

    #[test]
    fn terminal_states() {
        assert!(Stopped.is_terminal() && Crashed.is_terminal());
        assert!(!Running.is_terminal() && !NotStarted.is_terminal());
    }
}
