use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use env_flags::env_flags;
use mcp_supervisor::config::{
    CONFIG_FILE_NAMES, ConfigError, ConfigLoader, Configuration, find_config,
};
use mcp_supervisor::control::{RunDir, ServerRecord, process_alive};
use mcp_supervisor::logging;
use mcp_supervisor::supervisor::{
    LifecycleState, Operation, ProcessLauncher, ServerHandle, ServerSupervisor, SupervisorError,
    SupervisorOptions,
};
use tokio::task::JoinSet;

use crate::cli::{Cli, Command};

const SUPERVISE_TICK: Duration = Duration::from_millis(250);
const STOP_POLL: Duration = Duration::from_millis(100);

struct Settings {
    run_dir: RunDir,
    options: SupervisorOptions,
}

impl Settings {
    fn from_env() -> Self {
        env_flags! {
            /// Base directory for run state. Defaults to $HOME/.mcp-supervisor
            MCP_SUPERVISOR_HOME: &str = "";
            /// How long a new server must stay up to count as running
            START_PROBE_MS: u64 = 200;
            /// Grace period between SIGTERM and SIGKILL on stop
            STOP_GRACE_MS: u64 = 5000;
        }
        Self {
            run_dir: RunDir::resolve(&MCP_SUPERVISOR_HOME),
            options: SupervisorOptions {
                startup_probe: Duration::from_millis(*START_PROBE_MS),
                stop_grace: Duration::from_millis(*STOP_GRACE_MS),
            },
        }
    }
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = Settings::from_env();
    match cli.command {
        Command::Validate { path, json } => {
            let path = match path {
                Some(path) => path,
                None => config_path(cli.config)?,
            };
            println!("{}", validate(&path, json)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::List => {
            let config = open_config(cli.config)?;
            list(&config);
            Ok(ExitCode::SUCCESS)
        }
        Command::Start {
            names,
            all,
            timeout,
        } => {
            let config = open_config(cli.config)?;
            let names = if all {
                config.servers().keys().cloned().collect()
            } else if names.is_empty() {
                bail!("name the servers to start, or pass --all");
            } else {
                names
            };
            start(config, names, timeout, &settings).await
        }
        Command::Stop { name, timeout } => {
            let config = open_config(cli.config)?;
            stop(&config, &name, timeout, &settings.run_dir).await?;
            println!("{name}: stopped");
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { name } => {
            let config = open_config(cli.config)?;
            for line in status(&config, name.as_deref(), &settings.run_dir)? {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    find_config(&cwd).with_context(|| {
        format!(
            "no configuration file ({}) in {} or its parents",
            CONFIG_FILE_NAMES.join(", "),
            cwd.display()
        )
    })
}

fn load(path: &Path) -> Result<Configuration, ConfigError> {
    let env = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
    ConfigLoader::new().with_env(env).load_path(path)
}

/// Load the configuration and install logging. Fails before anything is spawned.
fn open_config(explicit: Option<PathBuf>) -> Result<Configuration> {
    let path = config_path(explicit)?;
    let config = load(&path).with_context(|| format!("invalid configuration {}", path.display()))?;
    logging::init(config.logger())?;
    tracing::debug!(path = %path.display(), servers = config.servers().len(), "configuration loaded");
    Ok(config)
}

/// Summary line (or JSON) for a valid document.
fn validate(path: &Path, json: bool) -> Result<String> {
    let config = load(path).with_context(|| format!("{} is invalid", path.display()))?;
    if json {
        return Ok(serde_json::to_string_pretty(&config)?);
    }
    let logger = config.logger();
    Ok(format!(
        "{}: ok (default_model={}, logger={}/{}, servers={})",
        path.display(),
        config.default_model(),
        logger.kind,
        logger.level,
        config.servers().len()
    ))
}

fn list(config: &Configuration) {
    if config.servers().is_empty() {
        println!("no mcp servers configured");
        return;
    }
    for (name, spec) in config.servers() {
        match spec.description() {
            Some(desc) => println!("{name}\t{}\t# {desc}", spec.command_line()),
            None => println!("{name}\t{}", spec.command_line()),
        }
    }
}

async fn start(
    config: Configuration,
    names: Vec<String>,
    deadline: Option<Duration>,
    settings: &Settings,
) -> Result<ExitCode> {
    let run = &settings.run_dir;
    let sup = ServerSupervisor::with_launcher(
        Arc::new(config),
        Arc::new(ProcessLauncher),
        settings.options,
    );

    let mut starts = JoinSet::new();
    for name in BTreeSet::from_iter(names) {
        let sup = sup.clone();
        starts.spawn(async move {
            let result = sup.start(&name, deadline).await;
            (name, result)
        });
    }

    let mut held = BTreeSet::new();
    let mut failed = false;
    while let Some(joined) = starts.join_next().await {
        let (name, result) = match joined {
            Ok(started) => started,
            Err(err) => {
                eprintln!("start task failed: {err}");
                failed = true;
                continue;
            }
        };
        match result {
            Ok(handle) if handle.state() == LifecycleState::Running => {
                publish(run, &record(&sup, &handle));
                println!("{name}: running (pid {})", display_pid(handle.pid()));
                held.insert(name);
            }
            Ok(handle) => {
                eprintln!("{name}: {} during startup{}", handle.state(), exit_suffix(&handle));
                failed = true;
            }
            Err(err) => {
                eprintln!("{err}");
                failed = true;
            }
        }
    }

    if !held.is_empty() {
        supervise(&sup, run, &mut held).await;
    }

    for err in sup.shutdown().await {
        eprintln!("{err}");
        failed = true;
    }
    for name in &held {
        forget(run, name);
        println!("{name}: stopped");
    }
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Serve stop requests and watch for crashes until Ctrl-C or until nothing is left.
///
/// Run-directory failures are logged; the servers stay supervised either way.
async fn supervise(sup: &ServerSupervisor, run: &RunDir, held: &mut BTreeSet<String>) {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut tick = tokio::time::interval(SUPERVISE_TICK);

    while !held.is_empty() {
        tokio::select! {
            interrupted = &mut ctrl_c => {
                if let Err(err) = interrupted {
                    tracing::warn!(%err, "failed to listen for Ctrl-C");
                }
                tracing::info!("interrupted; stopping mcp servers");
                return;
            }
            _ = tick.tick() => {}
        }

        for name in held.clone() {
            let requested = run.take_stop_request(&name).unwrap_or_else(|err| {
                tracing::warn!(server = %name, %err, "failed to read stop request");
                false
            });
            if requested {
                tracing::info!(server = %name, "stop requested");
                if let Err(err) = sup.stop(&name, None).await {
                    eprintln!("{err}");
                }
            }
            let Ok(Some(handle)) = sup.handle(&name) else {
                continue;
            };
            match handle.state() {
                LifecycleState::Stopped => println!("{name}: stopped"),
                LifecycleState::Crashed => eprintln!("{name}: crashed{}", exit_suffix(&handle)),
                _ => continue,
            }
            forget(run, &name);
            held.remove(&name);
        }
    }
}

/// Ask the foreground supervisor holding `name` to stop it and wait for the
/// record to disappear.
async fn stop(
    config: &Configuration,
    name: &str,
    deadline: Option<Duration>,
    run: &RunDir,
) -> Result<()> {
    if config.server(name).is_none() {
        return Err(SupervisorError::UnknownServer {
            name: name.to_string(),
        }
        .into());
    }
    let not_running = || SupervisorError::NotRunning {
        name: name.to_string(),
        state: LifecycleState::NotStarted,
    };

    match run.read_record(name)? {
        Some(record) if process_alive(record.supervisor_pid) => {}
        Some(_) => {
            // The supervisor that wrote it is gone.
            run.remove_record(name)?;
            return Err(not_running().into());
        }
        None => return Err(not_running().into()),
    }

    run.request_stop(name)?;
    let started = Instant::now();
    loop {
        match run.read_record(name)? {
            None => return Ok(()),
            Some(record) if !process_alive(record.supervisor_pid) => {
                run.remove_record(name)?;
                run.clear_stop_request(name)?;
                return Err(not_running().into());
            }
            Some(_) => {}
        }
        if let Some(after) = deadline
            && started.elapsed() >= after
        {
            return Err(SupervisorError::Timeout {
                name: name.to_string(),
                operation: Operation::Stop,
                after,
            }
            .into());
        }
        tokio::time::sleep(STOP_POLL).await;
    }
}

/// One line per server: running (with pid and instance) or not started.
fn status(config: &Configuration, name: Option<&str>, run: &RunDir) -> Result<Vec<String>> {
    let names: Vec<&str> = match name {
        Some(name) if config.server(name).is_none() => {
            return Err(SupervisorError::UnknownServer {
                name: name.to_string(),
            }
            .into());
        }
        Some(name) => vec![name],
        None => config.servers().keys().map(String::as_str).collect(),
    };

    let mut lines = Vec::with_capacity(names.len());
    for name in names {
        let line = match run.read_record(name)? {
            Some(record) if process_alive(record.supervisor_pid) => format!(
                "{name}\t{}\tpid {}\tinstance {}",
                LifecycleState::Running,
                display_pid(record.pid),
                record.instance_id
            ),
            _ => format!("{name}\t{}", LifecycleState::NotStarted),
        };
        lines.push(line);
    }
    Ok(lines)
}

fn publish(run: &RunDir, record: &ServerRecord) {
    let written = run
        .clear_stop_request(&record.name)
        .and_then(|()| run.write_record(record));
    if let Err(err) = written {
        tracing::warn!(server = %record.name, %err, "failed to write run record");
        eprintln!("{}: not visible to `stop`/`status`: {err}", record.name);
    }
}

fn forget(run: &RunDir, name: &str) {
    if let Err(err) = run.remove_record(name) {
        tracing::warn!(server = %name, %err, "failed to remove run record");
    }
}

fn record(sup: &ServerSupervisor, handle: &ServerHandle) -> ServerRecord {
    ServerRecord {
        name: handle.name().to_string(),
        instance_id: handle.instance_id(),
        pid: handle.pid(),
        supervisor_pid: std::process::id(),
        command: sup
            .config()
            .server(handle.name())
            .map(|spec| spec.command_line())
            .unwrap_or_default(),
    }
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "?".to_string(), |p| p.to_string())
}

fn exit_suffix(handle: &ServerHandle) -> String {
    handle
        .exit_status()
        .map(|status| format!(" ({status})"))
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use mcp_supervisor::config;
    use tempfile::TempDir;
    use uuid::Uuid;

    const CONFIG: &str = r#"
mcp:
  servers:
    sleeper:
      command: sleep
      args: ["30"]
"#;

    fn config() -> Configuration {
        config::load(CONFIG).unwrap()
    }

    fn record_for(name: &str, supervisor_pid: u32) -> ServerRecord {
        ServerRecord {
            name: name.to_string(),
            instance_id: Uuid::new_v4(),
            pid: Some(4242),
            supervisor_pid,
            command: "sleep 30".to_string(),
        }
    }

    /// Pid of a process that has already exited and been reaped.
    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    fn supervisor_error(err: &anyhow::Error) -> &SupervisorError {
        err.downcast_ref::<SupervisorError>()
            .unwrap_or_else(|| panic!("not a supervisor error: {err:#}"))
    }

    #[test]
    fn validate_accepts_valid_and_rejects_invalid_documents() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("fastagent.config.yaml");
        std::fs::write(&good, CONFIG).unwrap();
        let summary = validate(&good, false).unwrap();
        assert!(summary.ends_with("servers=1)"), "{summary}");
        let json: serde_json::Value = serde_json::from_str(&validate(&good, true).unwrap()).unwrap();
        assert_eq!(json["servers"]["sleeper"]["command"], "sleep");

        let bad = tmp.path().join("bad.yaml");
        std::fs::write(&bad, "logger:\n  type: file\n").unwrap();
        let err = validate(&bad, false).unwrap_err();
        let config_err = err.downcast_ref::<ConfigError>().unwrap();
        assert_eq!(config_err.field, "logger.path");
    }

    #[tokio::test]
    async fn stop_without_a_record_is_not_running() {
        let tmp = TempDir::new().unwrap();
        let run = RunDir::new(tmp.path());
        let err = stop(&config(), "sleeper", None, &run).await.unwrap_err();
        assert!(matches!(
            supervisor_error(&err),
            SupervisorError::NotRunning { .. }
        ));

        let err = stop(&config(), "unknown", None, &run).await.unwrap_err();
        assert!(matches!(
            supervisor_error(&err),
            SupervisorError::UnknownServer { .. }
        ));
    }

    #[tokio::test]
    async fn stop_with_a_dead_supervisor_clears_the_stale_record() {
        let tmp = TempDir::new().unwrap();
        let run = RunDir::new(tmp.path());
        run.write_record(&record_for("sleeper", dead_pid())).unwrap();

        let err = stop(&config(), "sleeper", None, &run).await.unwrap_err();
        assert!(matches!(
            supervisor_error(&err),
            SupervisorError::NotRunning { .. }
        ));
        assert_eq!(run.read_record("sleeper").unwrap(), None);
    }

    #[tokio::test]
    async fn unacknowledged_stop_times_out() {
        let tmp = TempDir::new().unwrap();
        let run = RunDir::new(tmp.path());
        // Alive supervisor that never serves the request.
        run.write_record(&record_for("sleeper", std::process::id())).unwrap();

        let err = stop(&config(), "sleeper", Some(Duration::from_millis(250)), &run)
            .await
            .unwrap_err();
        assert!(matches!(
            supervisor_error(&err),
            SupervisorError::Timeout {
                operation: Operation::Stop,
                ..
            }
        ));
        assert!(run.take_stop_request("sleeper").unwrap());
    }

    #[test]
    fn status_reads_records_and_rejects_unknown_names() {
        let tmp = TempDir::new().unwrap();
        let run = RunDir::new(tmp.path());
        let cfg = config();

        assert_eq!(status(&cfg, None, &run).unwrap(), ["sleeper\tnot_started"]);

        run.write_record(&record_for("sleeper", std::process::id())).unwrap();
        let lines = status(&cfg, Some("sleeper"), &run).unwrap();
        assert!(lines[0].starts_with("sleeper\trunning\tpid 4242"), "{lines:?}");

        run.write_record(&record_for("sleeper", dead_pid())).unwrap();
        assert_eq!(status(&cfg, None, &run).unwrap(), ["sleeper\tnot_started"]);

        let err = status(&cfg, Some("unknown"), &run).unwrap_err();
        assert!(matches!(
            supervisor_error(&err),
            SupervisorError::UnknownServer { .. }
        ));
    }

    #[tokio::test]
    async fn supervise_serves_stop_requests_and_drops_the_record() {
        let tmp = TempDir::new().unwrap();
        let run = RunDir::new(tmp.path());
        let sup = ServerSupervisor::with_launcher(
            Arc::new(config()),
            Arc::new(ProcessLauncher),
            SupervisorOptions {
                startup_probe: Duration::from_millis(100),
                stop_grace: Duration::from_secs(2),
            },
        );
        let handle = sup.start("sleeper", None).await.unwrap();
        publish(&run, &record(&sup, &handle));
        assert!(run.read_record("sleeper").unwrap().is_some());
        run.request_stop("sleeper").unwrap();

        let mut held = BTreeSet::from(["sleeper".to_string()]);
        tokio::time::timeout(Duration::from_secs(5), supervise(&sup, &run, &mut held))
            .await
            .unwrap();

        assert!(held.is_empty());
        assert_eq!(handle.state(), LifecycleState::Stopped);
        assert_eq!(run.read_record("sleeper").unwrap(), None);
        assert!(!run.take_stop_request("sleeper").unwrap());
    }

    #[tokio::test]
    async fn unwritable_run_directory_does_not_abort_supervision() {
        let tmp = TempDir::new().unwrap();
        // A file where the run directory should be.
        let blocker = tmp.path().join("run");
        std::fs::write(&blocker, "").unwrap();
        let run = RunDir::new(&blocker);
        let sup = ServerSupervisor::new(Arc::new(config()));
        let handle = sup.start("sleeper", None).await.unwrap();

        publish(&run, &record(&sup, &handle));
        forget(&run, "sleeper");
        assert_eq!(sup.status("sleeper").unwrap(), LifecycleState::Running);
        assert!(sup.shutdown().await.is_empty());
    }
}
