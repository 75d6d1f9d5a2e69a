use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::config::ServerSpec;

/// Spawns and terminates server processes.
///
/// The supervisor only talks to processes through this trait so tests can
/// count launches or inject failures.
#[async_trait]
pub trait Launcher: Send + Sync {
    fn spawn(&self, name: &str, spec: &ServerSpec) -> io::Result<Child>;

    /// Ask `child` to exit, forcing it after `grace`, and reap it.
    async fn terminate(&self, child: &mut Child, grace: Duration) -> io::Result<ExitStatus>;
}

/// Launches servers as local child processes.
///
/// Children inherit the supervisor's environment and working directory with
/// the server's `env` layered on top. stdin/stdout are piped for the MCP
/// transport; stderr goes to the supervisor's stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    fn spawn(&self, name: &str, spec: &ServerSpec) -> io::Result<Child> {
        tracing::debug!(server = %name, command = %spec.command_line(), "spawning mcp server");
        let mut cmd = Command::new(spec.command());
        cmd.args(spec.args())
            .envs(spec.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd.spawn()
    }

    async fn terminate(&self, child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        request_exit(child);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(pid = ?child.id(), ?grace, "mcp server ignored termination request; killing");
                child.start_kill()?;
                child.wait().await
            }
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        tracing::debug!(pid, %err, "failed to send SIGTERM");
    }
}

// No polite termination signal off unix; the grace wait simply elapses and
// the child is killed.
#[cfg(not(unix))]
fn request_exit(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec(command: &str, args: &[&str]) -> ServerSpec {
        let mut yaml = format!("mcp:\n  servers:\n    s:\n      command: {command:?}\n      args: []\n");
        if !args.is_empty() {
            let list = args.iter().map(|a| format!("{a:?}")).collect::<Vec<_>>();
            yaml = yaml.replace("[]", &format!("[{}]", list.join(", ")));
        }
        crate::config::load(&yaml).unwrap().server("s").unwrap().clone()
    }

    #[tokio::test]
    async fn sigterm_stops_a_cooperative_child() {
        let mut child = ProcessLauncher.spawn("s", &spec("sleep", &["30"])).unwrap();
        let status = ProcessLauncher
            .terminate(&mut child, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn child_ignoring_sigterm_is_killed_after_grace() {
        let mut child = ProcessLauncher
            .spawn("s", &spec("sh", &["-c", "trap '' TERM; sleep 30"]))
            .unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let started = std::time::Instant::now();
        let status = ProcessLauncher
            .terminate(&mut child, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(!status.success());
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn env_overlay_reaches_the_child() {
        let yaml = "mcp:\n  servers:\n    s:\n      command: sh\n      args: [\"-c\", \"test \\\"$PROBE\\\" = yes\"]\n      env:\n        PROBE: \"yes\"\n";
        let cfg = crate::config::load(yaml).unwrap();
        let mut child = ProcessLauncher.spawn("s", cfg.server("s").unwrap()).unwrap();
        assert!(child.wait().await.unwrap().success());
    }

    #[test]
    fn missing_binary_fails_to_spawn() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt
            .block_on(async { ProcessLauncher.spawn("s", &spec("/nonexistent/mcp-server", &[])) })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
