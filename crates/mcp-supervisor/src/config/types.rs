//! Validated configuration snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::model_id::ModelId;

/// Minimum level of events the framework logger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Warning,
    Error,
}

impl LogLevel {
    pub const VARIANTS: [&'static str; 4] = ["debug", "info", "warning", "error"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn filter_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where framework log events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggerType {
    #[default]
    None,
    Console,
    File,
    Http,
}

impl LoggerType {
    pub const VARIANTS: [&'static str; 4] = ["none", "console", "file", "http"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(LoggerType::None),
            "console" => Some(LoggerType::Console),
            "file" => Some(LoggerType::File),
            "http" => Some(LoggerType::Http),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoggerType::None => "none",
            LoggerType::Console => "console",
            LoggerType::File => "file",
            LoggerType::Http => "http",
        }
    }
}

impl fmt::Display for LoggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `logger` section.
///
/// The display flags are not interpreted here; they are carried for the chat
/// and progress renderers that consume the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LoggerSettings {
    pub level: LogLevel,
    #[serde(rename = "type")]
    pub kind: LoggerType,
    /// Log file location. Only meaningful when `kind` is [`LoggerType::File`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub progress_display: bool,
    pub show_chat: bool,
    pub show_tools: bool,
    pub truncate_tools: bool,
}

impl LoggerSettings {
    /// Log file path when logging to a file, `None` for every other sink.
    pub fn file_path(&self) -> Option<&Path> {
        match self.kind {
            LoggerType::File => self.path.as_deref().map(Path::new),
            _ => None,
        }
    }
}

/// How to launch one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSpec {
    pub(super) command: String,
    pub(super) args: Vec<String>,
    /// Extra variables layered over the inherited environment.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(super) env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) description: Option<String>,
}

impl ServerSpec {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Command line for display, e.g. `uvx mcp-server-fetch`.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Immutable configuration snapshot produced by the loader.
///
/// Share it as `Arc<Configuration>`; reloading means loading a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Configuration {
    pub(super) default_model: ModelId,
    pub(super) logger: LoggerSettings,
    pub(super) servers: BTreeMap<String, ServerSpec>,
    #[serde(skip)]
    pub(super) source_path: Option<PathBuf>,
}

impl Configuration {
    pub fn default_model(&self) -> &ModelId {
        &self.default_model
    }

    pub fn logger(&self) -> &LoggerSettings {
        &self.logger
    }

    pub fn servers(&self) -> &BTreeMap<String, ServerSpec> {
        &self.servers
    }

    pub fn server(&self, name: &str) -> Option<&ServerSpec> {
        self.servers.get(name)
    }

    /// File this snapshot was loaded from, if it came from disk.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}
