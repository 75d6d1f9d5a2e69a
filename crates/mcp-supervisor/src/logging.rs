//! Process-wide tracing setup driven by the `logger` section.

use std::io;
use std::path::{Path, PathBuf};

use env_flags::env_flags;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LoggerSettings, LoggerType};

// Keeps the non-blocking file writer flushing for the life of the process.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("log path has no file name: {}", .0.display())]
    NoFileName(PathBuf),
}

/// Install the global subscriber described by `settings`.
///
/// `type: none` installs nothing. A subscriber that is already set is left
/// alone.
pub fn init(settings: &LoggerSettings) -> Result<(), LoggingError> {
    env_flags! {
        /// Filter directive overriding `logger.level`, e.g. "mcp_supervisor=debug".
        TRACING_FILTER: &str = "";
        /// Standard filter env, used when TRACING_FILTER is empty.
        RUST_LOG: &str = "";
        /// JSON lines on the console instead of compact text.
        TRACING_JSON: bool = false;
    }

    let Some(layers) = build_layers(settings, *TRACING_JSON)? else {
        return Ok(());
    };
    let directive = filter_directive(settings, &TRACING_FILTER, &RUST_LOG);
    let filter = EnvFilter::try_new(directive)
        .unwrap_or_else(|_| EnvFilter::new(settings.level.filter_directive()));

    if let Err(e) = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
    {
        tracing::debug!("tracing already set: {e:?}");
    }
    if settings.kind == LoggerType::Http {
        tracing::warn!("logger type http has no transport here; logging to the console instead");
    }
    Ok(())
}

fn filter_directive<'a>(settings: &LoggerSettings, tracing_filter: &'a str, rust_log: &'a str) -> &'a str {
    if !tracing_filter.is_empty() {
        tracing_filter
    } else if !rust_log.is_empty() {
        rust_log
    } else {
        settings.level.filter_directive()
    }
}

fn build_layers(settings: &LoggerSettings, json: bool) -> Result<Option<Vec<BoxedLayer>>, LoggingError> {
    let layer = match settings.kind {
        LoggerType::None => return Ok(None),
        LoggerType::Console | LoggerType::Http => console_layer(json),
        LoggerType::File => match settings.file_path() {
            Some(path) => file_layer(path)?,
            // Rejected by validation; fall back rather than lose events.
            None => console_layer(json),
        },
    };
    Ok(Some(vec![layer]))
}

fn console_layer(json: bool) -> BoxedLayer {
    // stderr keeps stdout free for command output.
    let base = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_writer(io::stderr);
    if json {
        base.json().boxed()
    } else {
        base.compact().boxed()
    }
}

fn file_layer(path: &Path) -> Result<BoxedLayer, LoggingError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::NoFileName(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    Ok(tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .json()
        .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    fn settings(kind: LoggerType, path: Option<&str>) -> LoggerSettings {
        LoggerSettings {
            level: LogLevel::Info,
            kind,
            path: path.map(str::to_string),
            ..LoggerSettings::default()
        }
    }

    #[test]
    fn env_filters_take_precedence_over_level() {
        let s = settings(LoggerType::Console, None);
        assert_eq!(filter_directive(&s, "", ""), "info");
        assert_eq!(filter_directive(&s, "", "debug"), "debug");
        assert_eq!(filter_directive(&s, "trace", "debug"), "trace");

        let warn = LoggerSettings::default();
        assert_eq!(filter_directive(&warn, "", ""), "warn");
    }

    #[test]
    fn none_installs_no_layers() {
        let s = settings(LoggerType::None, None);
        assert!(build_layers(&s, false).unwrap().is_none());
        assert!(build_layers(&settings(LoggerType::Http, None), true).unwrap().is_some());
    }

    #[test]
    fn file_sink_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/nested/agent.jsonl");
        let s = settings(LoggerType::File, path.to_str());
        assert_eq!(build_layers(&s, false).unwrap().map(|l| l.len()), Some(1));
        assert!(tmp.path().join("logs/nested").is_dir());
    }
}
