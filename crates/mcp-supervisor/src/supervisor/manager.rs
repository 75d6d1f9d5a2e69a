use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use super::error::{Operation, SupervisorError};
use super::handle::{ServerHandle, ServerStdio};
use super::launcher::{Launcher, ProcessLauncher};
use super::state::LifecycleState;
use crate::config::Configuration;

pub const DEFAULT_STARTUP_PROBE: Duration = Duration::from_millis(200);
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// How long a freshly spawned process must stay alive to count as `Running`.
    pub startup_probe: Duration,
    /// Time between the termination request and a forced kill.
    pub stop_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            startup_probe: DEFAULT_STARTUP_PROBE,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

type StopReply = oneshot::Sender<io::Result<ExitStatus>>;

struct Instance {
    handle: ServerHandle,
    /// `None` when the process never made it past the startup probe.
    stop_tx: Option<mpsc::Sender<StopReply>>,
}

#[derive(Default)]
struct Slot {
    /// Serializes start/stop for one name.
    op: tokio::sync::Mutex<()>,
    current: Mutex<Option<Instance>>,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, Option<Instance>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> LifecycleState {
        self.lock()
            .as_ref()
            .map_or(LifecycleState::NotStarted, |i| i.handle.state())
    }

    fn handle(&self) -> Option<ServerHandle> {
        self.lock().as_ref().map(|i| i.handle.clone())
    }

    fn stop_sender(&self) -> (LifecycleState, Option<mpsc::Sender<StopReply>>) {
        match self.lock().as_ref() {
            Some(i) => (i.handle.state(), i.stop_tx.clone()),
            None => (LifecycleState::NotStarted, None),
        }
    }

    fn replace(&self, instance: Instance) {
        *self.lock() = Some(instance);
    }
}

struct Inner {
    config: Arc<Configuration>,
    launcher: Arc<dyn Launcher>,
    options: SupervisorOptions,
    slots: BTreeMap<String, Slot>,
    shutting_down: AtomicBool,
}

/// Starts, stops and watches the MCP servers declared in a configuration.
///
/// Every declared name has one slot holding its current instance. Each
/// running child is owned by a monitor task, which is the only writer of the
/// instance's state after spawn. Dropping the last clone of the supervisor
/// makes every monitor terminate and reap its child.
#[derive(Clone)]
pub struct ServerSupervisor {
    inner: Arc<Inner>,
}

impl fmt::Debug for ServerSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSupervisor")
            .field("servers", &self.statuses())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl ServerSupervisor {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self::with_launcher(config, Arc::new(ProcessLauncher), SupervisorOptions::default())
    }

    pub fn with_launcher(
        config: Arc<Configuration>,
        launcher: Arc<dyn Launcher>,
        options: SupervisorOptions,
    ) -> Self {
        let slots = config
            .servers()
            .keys()
            .map(|name| (name.clone(), Slot::default()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                config,
                launcher,
                options,
                slots,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    pub fn options(&self) -> SupervisorOptions {
        self.inner.options
    }

    /// Declared server names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner.slots.keys().cloned().collect()
    }

    /// Start `name`, or return its handle if it is already running.
    ///
    /// A process that exits during the startup probe is not an error: the
    /// returned handle is `Crashed`. On `Timeout` the start keeps going in
    /// the background; re-check [`ServerSupervisor::status`].
    pub async fn start(
        &self,
        name: &str,
        deadline: Option<Duration>,
    ) -> Result<ServerHandle, SupervisorError> {
        self.slot(name)?;
        let this = self.clone();
        let owned = name.to_string();
        let task = tokio::spawn(async move { this.start_now(&owned).await });
        join_with_deadline(name, Operation::Start, deadline, task).await
    }

    /// Gracefully stop a `Running` server and wait until it is reaped.
    pub async fn stop(&self, name: &str, deadline: Option<Duration>) -> Result<(), SupervisorError> {
        self.slot(name)?;
        let this = self.clone();
        let owned = name.to_string();
        let task = tokio::spawn(async move { this.stop_now(&owned).await });
        join_with_deadline(name, Operation::Stop, deadline, task).await
    }

    /// Last known state of `name`. Never blocks.
    pub fn status(&self, name: &str) -> Result<LifecycleState, SupervisorError> {
        Ok(self.slot(name)?.state())
    }

    /// Handle of the current instance, `None` if `name` was never started.
    pub fn handle(&self, name: &str) -> Result<Option<ServerHandle>, SupervisorError> {
        Ok(self.slot(name)?.handle())
    }

    pub fn statuses(&self) -> BTreeMap<String, LifecycleState> {
        self.inner
            .slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.state()))
            .collect()
    }

    /// Refuse further starts and stop every running server.
    ///
    /// Returns the failures of individual stops; servers that were not
    /// running are skipped.
    pub async fn shutdown(&self) -> Vec<SupervisorError> {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        tracing::info!("shutting down mcp servers");

        let mut stops = JoinSet::new();
        for name in self.inner.slots.keys() {
            let this = self.clone();
            let name = name.clone();
            stops.spawn(async move { this.stop_now(&name).await });
        }

        let mut failures = Vec::new();
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok(Ok(())) | Ok(Err(SupervisorError::NotRunning { .. })) => {}
                Ok(Err(err)) => {
                    tracing::warn!(server = %err.server(), "{err}");
                    failures.push(err);
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => tracing::warn!("stop task cancelled during shutdown: {err}"),
            }
        }
        failures
    }

    fn slot(&self, name: &str) -> Result<&Slot, SupervisorError> {
        self.inner
            .slots
            .get(name)
            .ok_or_else(|| SupervisorError::UnknownServer {
                name: name.to_string(),
            })
    }

    async fn start_now(&self, name: &str) -> Result<ServerHandle, SupervisorError> {
        let slot = self.slot(name)?;
        let spec = self
            .inner
            .config
            .server(name)
            .ok_or_else(|| SupervisorError::UnknownServer {
                name: name.to_string(),
            })?;
        let _op = slot.op.lock().await;

        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(SupervisorError::Shutdown {
                name: name.to_string(),
                operation: Operation::Start,
            });
        }
        if let Some(handle) = slot.handle()
            && handle.state() == LifecycleState::Running
        {
            tracing::debug!(server = %name, instance = %handle.instance_id(), "mcp server already running");
            return Ok(handle);
        }

        let mut child = self
            .inner
            .launcher
            .spawn(name, spec)
            .map_err(|source| SupervisorError::SpawnFailed {
                name: name.to_string(),
                command: spec.command_line(),
                source,
            })?;
        let stdio = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => Some(ServerStdio { stdin, stdout }),
            _ => None,
        };
        let handle = ServerHandle::new(name, child.id(), stdio);
        tracing::info!(
            server = %name,
            pid = ?handle.pid(),
            instance = %handle.instance_id(),
            "mcp server starting"
        );
        // Published before the probe so `status` reports `Starting` meanwhile.
        slot.replace(Instance {
            handle: handle.clone(),
            stop_tx: None,
        });

        match tokio::time::timeout(self.inner.options.startup_probe, child.wait()).await {
            Err(_) => {}
            Ok(exited) => {
                match exited {
                    Ok(status) => {
                        handle.record_exit(status);
                        tracing::warn!(server = %name, %status, "mcp server exited during startup");
                    }
                    Err(err) => {
                        tracing::warn!(server = %name, %err, "failed to wait on starting mcp server");
                    }
                }
                handle.advance(LifecycleState::Crashed);
                return Ok(handle);
            }
        }

        handle.advance(LifecycleState::Running);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        tokio::spawn(monitor(
            child,
            handle.clone(),
            Arc::clone(&self.inner.launcher),
            self.inner.options.stop_grace,
            stop_rx,
        ));
        slot.replace(Instance {
            handle: handle.clone(),
            stop_tx: Some(stop_tx),
        });
        tracing::info!(server = %name, pid = ?handle.pid(), state = %handle.state(), "mcp server running");
        Ok(handle)
    }

    async fn stop_now(&self, name: &str) -> Result<(), SupervisorError> {
        let slot = self.slot(name)?;
        let _op = slot.op.lock().await;

        let not_running = |state| SupervisorError::NotRunning {
            name: name.to_string(),
            state,
        };
        let (state, stop_tx) = slot.stop_sender();
        let stop_tx = match stop_tx {
            Some(tx) if state == LifecycleState::Running => tx,
            _ => return Err(not_running(state)),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        // A closed channel means the monitor already saw the process exit.
        if stop_tx.send(reply_tx).await.is_err() {
            return Err(not_running(slot.state()));
        }
        match reply_rx.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(SupervisorError::StopFailed {
                name: name.to_string(),
                source,
            }),
            Err(_) => Err(not_running(slot.state())),
        }
    }
}

/// Owns one child until it exits or is told to stop.
///
/// The stop channel closing means the supervisor is gone; the child is
/// terminated the same way as on an explicit stop.
async fn monitor(
    mut child: Child,
    handle: ServerHandle,
    launcher: Arc<dyn Launcher>,
    grace: Duration,
    mut stop_rx: mpsc::Receiver<StopReply>,
) {
    tokio::select! {
        exited = child.wait() => {
            match exited {
                Ok(status) => {
                    handle.record_exit(status);
                    tracing::warn!(server = %handle.name(), pid = ?handle.pid(), %status, "mcp server exited unexpectedly");
                }
                Err(err) => {
                    tracing::error!(server = %handle.name(), pid = ?handle.pid(), %err, "failed to wait on mcp server");
                }
            }
            handle.advance(LifecycleState::Crashed);
        }
        request = stop_rx.recv() => {
            handle.advance(LifecycleState::Stopping);
            let result = launcher.terminate(&mut child, grace).await;
            match &result {
                Ok(status) => {
                    handle.record_exit(*status);
                    tracing::info!(server = %handle.name(), pid = ?handle.pid(), %status, "mcp server stopped");
                }
                Err(err) => {
                    tracing::warn!(server = %handle.name(), pid = ?handle.pid(), %err, "failed to terminate mcp server");
                }
            }
            handle.advance(LifecycleState::Stopped);
            if let Some(reply) = request {
                let _ = reply.send(result);
            }
        }
    }
}

async fn join_with_deadline<T>(
    name: &str,
    operation: Operation,
    deadline: Option<Duration>,
    task: JoinHandle<Result<T, SupervisorError>>,
) -> Result<T, SupervisorError> {
    let joined = match deadline {
        None => task.await,
        // Dropping the JoinHandle detaches the task; the operation finishes
        // in the background.
        Some(after) => match tokio::time::timeout(after, task).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(SupervisorError::Timeout {
                    name: name.to_string(),
                    operation,
                    after,
                });
            }
        },
    };
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        // Only happens while the runtime is shutting down.
        Err(_) => Err(SupervisorError::Shutdown {
            name: name.to_string(),
            operation,
        }),
    }
}
