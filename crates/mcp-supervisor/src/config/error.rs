use std::fmt;

/// Field path used for failures that concern the whole document.
pub const DOCUMENT_FIELD: &str = "<document>";

/// Category of a configuration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// The document (or its secrets overlay) could not be read.
    Io,
    /// The text is not a well-formed document of the expected shape.
    Parse,
    MissingField,
    /// A value outside of a closed set, e.g. `logger.level: verbose`.
    InvalidEnum,
    InvalidValue,
    /// A field required only in combination with another one is missing.
    ConditionalField,
    DuplicateServer,
}

impl ConfigErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigErrorKind::Io => "io error",
            ConfigErrorKind::Parse => "parse error",
            ConfigErrorKind::MissingField => "missing field",
            ConfigErrorKind::InvalidEnum => "invalid enum value",
            ConfigErrorKind::InvalidValue => "invalid value",
            ConfigErrorKind::ConditionalField => "conditional field violation",
            ConfigErrorKind::DuplicateServer => "duplicate server name",
        }
    }
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure while parsing or validating a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at `{field}`: {message}")]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    /// Dotted path of the offending field, e.g. `mcp.servers.fetch.command`.
    pub field: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(kind: ConfigErrorKind, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::Parse, DOCUMENT_FIELD, message)
    }

    // serde_yaml already appends the line/column to its message.
    pub(crate) fn from_yaml(err: serde_yaml::Error) -> Self {
        Self::parse(err.to_string())
    }

    pub(crate) fn from_toml(err: toml::de::Error) -> Self {
        Self::parse(err.to_string().trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_kind_and_field() {
        let err = ConfigError::new(
            ConfigErrorKind::ConditionalField,
            "logger.path",
            "required when logger.type is `file`",
        );
        assert_eq!(
            err.to_string(),
            "conditional field violation at `logger.path`: required when logger.type is `file`"
        );
    }
}
