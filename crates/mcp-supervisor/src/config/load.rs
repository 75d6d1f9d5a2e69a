//! Configuration loading: parse, overlay, validate.
//!
//! Validation runs in a fixed order and stops at the first failure:
//! structural parse, required fields, enum membership (plus the model
//! grammar), the conditional `logger.path`, server-name uniqueness, and
//! finally non-empty commands. No partial snapshot is ever returned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::discovery::find_secrets;
use super::error::{ConfigError, ConfigErrorKind};
use super::model_id::ModelId;
use super::raw::{RawDocument, RawLogger, RawServer};
use super::types::{Configuration, LogLevel, LoggerSettings, LoggerType, ServerSpec};

/// Serialization format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentFormat {
    #[default]
    Yaml,
    /// TOML itself forbids defining a table twice, so a repeated
    /// `[mcp.servers.<name>]` is reported by the parser as
    /// [`ConfigErrorKind::Parse`] at `<document>`, not as `DuplicateServer`.
    Toml,
}

impl DocumentFormat {
    /// `.toml` files are TOML; everything else is treated as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Yaml,
        }
    }

    fn parse(self, text: &str) -> Result<RawDocument, ConfigError> {
        // An empty file is a document with every default.
        if text.trim().is_empty() {
            return Ok(RawDocument::default());
        }
        match self {
            DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(ConfigError::from_yaml),
            DocumentFormat::Toml => toml::from_str(text).map_err(ConfigError::from_toml),
        }
    }
}

/// Builds [`Configuration`] snapshots.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    format: DocumentFormat,
    env: Vec<(String, String)>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Format used by [`ConfigLoader::load`]. `load_path` picks it from the extension.
    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = format;
        self
    }

    /// Environment variables consulted for fields the document leaves unset.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Load a snapshot from document text.
    pub fn load(&self, text: &str) -> Result<Configuration, ConfigError> {
        let raw = self.format.parse(text)?;
        self.finish(raw, None)
    }

    /// Load a snapshot from document text with a secrets document merged over it.
    pub fn load_with_secrets(&self, text: &str, secrets: &str) -> Result<Configuration, ConfigError> {
        let mut raw = self.format.parse(text)?;
        raw.overlay(self.format.parse(secrets)?);
        self.finish(raw, None)
    }

    /// Read a configuration file, merge the nearest secrets file, and validate.
    pub fn load_path(&self, path: &Path) -> Result<Configuration, ConfigError> {
        let mut raw = DocumentFormat::from_path(path).parse(&read_document(path)?)?;
        if let Some(secrets_path) = find_secrets(path) {
            tracing::debug!("merging secrets from {}", secrets_path.display());
            let secrets =
                DocumentFormat::from_path(&secrets_path).parse(&read_document(&secrets_path)?)?;
            raw.overlay(secrets);
        }
        self.finish(raw, Some(path.to_path_buf()))
    }

    fn finish(&self, mut raw: RawDocument, source: Option<PathBuf>) -> Result<Configuration, ConfigError> {
        raw.fill_from_env(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        let mut config = validate(raw)?;
        config.source_path = source;
        Ok(config)
    }
}

/// Load a YAML configuration document.
pub fn load(text: &str) -> Result<Configuration, ConfigError> {
    ConfigLoader::new().load(text)
}

fn read_document(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| {
        ConfigError::new(
            ConfigErrorKind::Io,
            super::error::DOCUMENT_FIELD,
            format!("failed to read {}: {e}", path.display()),
        )
    })
}

fn validate(raw: RawDocument) -> Result<Configuration, ConfigError> {
    let servers = raw.mcp.and_then(|m| m.servers).unwrap_or_default().0;
    let logger = raw.logger.unwrap_or_default();

    check_required(&servers)?;
    let (level, kind) = check_enums(&logger)?;
    let default_model = match raw.default_model.as_deref() {
        Some(text) => ModelId::parse(text)
            .map_err(|msg| ConfigError::new(ConfigErrorKind::InvalidValue, "default_model", msg))?,
        None => ModelId::default(),
    };
    check_logger_path(kind, logger.path.as_deref())?;
    check_server_names(&servers)?;
    check_commands(&servers)?;

    let servers = servers
        .into_iter()
        .map(|(name, server)| {
            let spec = ServerSpec {
                command: server.command.unwrap_or_default(),
                args: server.args.unwrap_or_default(),
                env: server.env.unwrap_or_default(),
                description: server.description,
            };
            (name, spec)
        })
        .collect::<BTreeMap<_, _>>();

    Ok(Configuration {
        default_model,
        logger: LoggerSettings {
            level,
            kind,
            path: logger.path,
            progress_display: logger.progress_display.unwrap_or(false),
            show_chat: logger.show_chat.unwrap_or(false),
            show_tools: logger.show_tools.unwrap_or(false),
            truncate_tools: logger.truncate_tools.unwrap_or(false),
        },
        servers,
        source_path: None,
    })
}

fn server_field(name: &str, field: &str) -> String {
    format!("mcp.servers.{name}.{field}")
}

fn check_required(servers: &[(String, RawServer)]) -> Result<(), ConfigError> {
    for (name, server) in servers {
        if server.command.is_none() {
            return Err(ConfigError::new(
                ConfigErrorKind::MissingField,
                server_field(name, "command"),
                format!("server `{name}` must declare a command"),
            ));
        }
    }
    Ok(())
}

fn check_enums(logger: &RawLogger) -> Result<(LogLevel, LoggerType), ConfigError> {
    let level = match logger.level.as_deref() {
        Some(value) => LogLevel::parse(value).ok_or_else(|| {
            ConfigError::new(
                ConfigErrorKind::InvalidEnum,
                "logger.level",
                format!(
                    "`{value}` is not one of {}",
                    LogLevel::VARIANTS.join(", ")
                ),
            )
        })?,
        None => LogLevel::default(),
    };
    let kind = match logger.kind.as_deref() {
        Some(value) => LoggerType::parse(value).ok_or_else(|| {
            ConfigError::new(
                ConfigErrorKind::InvalidEnum,
                "logger.type",
                format!(
                    "`{value}` is not one of {}",
                    LoggerType::VARIANTS.join(", ")
                ),
            )
        })?,
        None => LoggerType::default(),
    };
    Ok((level, kind))
}

fn check_logger_path(kind: LoggerType, path: Option<&str>) -> Result<(), ConfigError> {
    if kind != LoggerType::File {
        return Ok(());
    }
    match path {
        Some(p) if !p.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::new(
            ConfigErrorKind::ConditionalField,
            "logger.path",
            "a non-empty path is required when logger.type is `file`",
        )),
    }
}

fn check_server_names(servers: &[(String, RawServer)]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::with_capacity(servers.len());
    for (name, _) in servers {
        if name.trim().is_empty() {
            return Err(ConfigError::new(
                ConfigErrorKind::InvalidValue,
                "mcp.servers",
                "server names must not be empty",
            ));
        }
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::new(
                ConfigErrorKind::DuplicateServer,
                format!("mcp.servers.{name}"),
                format!("server `{name}` is declared more than once"),
            ));
        }
    }
    Ok(())
}

fn check_commands(servers: &[(String, RawServer)]) -> Result<(), ConfigError> {
    for (name, server) in servers {
        if server.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(ConfigError::new(
                ConfigErrorKind::InvalidValue,
                server_field(name, "command"),
                format!("server `{name}` has an empty command"),
            ));
        }
    }
    Ok(())
}
