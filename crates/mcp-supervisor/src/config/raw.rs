//! Loose, unvalidated shape of the configuration document.
//!
//! Every field is optional here so that the secrets overlay and the
//! environment fallback can be merged in before validation runs. Unknown keys
//! are ignored: the framework's documents carry provider and telemetry
//! sections this crate does not consume.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::de::{MapAccess, Visitor};

use super::error::{ConfigError, ConfigErrorKind};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct RawDocument {
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub logger: Option<RawLogger>,
    #[serde(default)]
    pub mcp: Option<RawMcp>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct RawLogger {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub progress_display: Option<bool>,
    #[serde(default)]
    pub show_chat: Option<bool>,
    #[serde(default)]
    pub show_tools: Option<bool>,
    #[serde(default)]
    pub truncate_tools: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct RawMcp {
    #[serde(default)]
    pub servers: Option<ServerEntries>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct RawServer {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Server definitions in document order, duplicates included.
///
/// Deserializing straight into a map would silently keep the last of two
/// identical keys; validation needs to see both.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ServerEntries(pub Vec<(String, RawServer)>);

impl<'de> Deserialize<'de> for ServerEntries {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ServerEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of server names to server definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, server)) = map.next_entry::<String, Option<RawServer>>()? {
                    // `fetch:` with nothing under it parses as null
                    entries.push((name, server.unwrap_or_default()));
                }
                Ok(ServerEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl RawDocument {
    /// Deep-merge `overlay` on top of `self`; values present in the overlay win.
    pub fn overlay(&mut self, overlay: RawDocument) {
        if overlay.default_model.is_some() {
            self.default_model = overlay.default_model;
        }
        if let Some(logger) = overlay.logger {
            self.logger.get_or_insert_with(Default::default).overlay(logger);
        }
        if let Some(servers) = overlay.mcp.and_then(|m| m.servers) {
            self.mcp
                .get_or_insert_with(Default::default)
                .servers
                .get_or_insert_with(Default::default)
                .overlay(servers);
        }
    }

    /// Fill fields the document left unset from `LOGGER__LEVEL`-style variables.
    ///
    /// Names are matched case-insensitively with `__` as the nesting
    /// delimiter. Values already present in the document are never replaced.
    pub fn fill_from_env<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref().to_ascii_lowercase();
            let value = value.as_ref();
            if key == "default_model" {
                self.default_model.get_or_insert_with(|| value.to_string());
                continue;
            }
            let Some(field) = key.strip_prefix("logger__") else {
                continue;
            };
            let logger = self.logger.get_or_insert_with(Default::default);
            let flag = match field {
                "level" => {
                    logger.level.get_or_insert_with(|| value.to_string());
                    continue;
                }
                "type" => {
                    logger.kind.get_or_insert_with(|| value.to_string());
                    continue;
                }
                "path" => {
                    logger.path.get_or_insert_with(|| value.to_string());
                    continue;
                }
                "progress_display" => &mut logger.progress_display,
                "show_chat" => &mut logger.show_chat,
                "show_tools" => &mut logger.show_tools,
                "truncate_tools" => &mut logger.truncate_tools,
                _ => continue,
            };
            if flag.is_none() {
                let parsed = parse_env_bool(value).ok_or_else(|| {
                    ConfigError::new(
                        ConfigErrorKind::InvalidValue,
                        format!("logger.{field}"),
                        format!(
                            "environment variable {} must be a boolean, got `{value}`",
                            key.to_ascii_uppercase()
                        ),
                    )
                })?;
                *flag = Some(parsed);
            }
        }
        Ok(())
    }
}

impl RawLogger {
    fn overlay(&mut self, overlay: RawLogger) {
        fn take<T>(dst: &mut Option<T>, src: Option<T>) {
            if src.is_some() {
                *dst = src;
            }
        }
        take(&mut self.level, overlay.level);
        take(&mut self.kind, overlay.kind);
        take(&mut self.path, overlay.path);
        take(&mut self.progress_display, overlay.progress_display);
        take(&mut self.show_chat, overlay.show_chat);
        take(&mut self.show_tools, overlay.show_tools);
        take(&mut self.truncate_tools, overlay.truncate_tools);
    }
}

impl ServerEntries {
    fn overlay(&mut self, overlay: ServerEntries) {
        for (name, server) in overlay.0 {
            match self.0.iter_mut().find(|(existing, _)| *existing == name) {
                Some((_, base)) => base.overlay(server),
                None => self.0.push((name, server)),
            }
        }
    }
}

impl RawServer {
    fn overlay(&mut self, overlay: RawServer) {
        if overlay.command.is_some() {
            self.command = overlay.command;
        }
        if overlay.args.is_some() {
            self.args = overlay.args;
        }
        if overlay.description.is_some() {
            self.description = overlay.description;
        }
        if let Some(env) = overlay.env {
            self.env.get_or_insert_with(Default::default).extend(env);
        }
    }
}

fn parse_env_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> RawDocument {
        serde_yaml::from_str(yaml).expect("parse raw document")
    }

    #[test]
    fn duplicate_server_keys_are_preserved() {
        let doc = parse(
            r#"
mcp:
  servers:
    fetch:
      command: uvx
    fetch:
      command: npx
"#,
        );
        let servers = doc.mcp.unwrap().servers.unwrap().0;
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].1.command.as_deref(), Some("uvx"));
        assert_eq!(servers[1].1.command.as_deref(), Some("npx"));
    }

    #[test]
    fn overlay_merges_server_env_and_keeps_base_fields() {
        let mut base = parse(
            r#"
mcp:
  servers:
    brave:
      command: npx
      args: ["-y", "@modelcontextprotocol/server-brave-search"]
      env:
        LOG: info
"#,
        );
        let secrets = parse(
            r#"
mcp:
  servers:
    brave:
      env:
        BRAVE_API_KEY: secret
"#,
        );
        base.overlay(secrets);
        let servers = base.mcp.unwrap().servers.unwrap().0;
        let brave = &servers[0].1;
        assert_eq!(brave.command.as_deref(), Some("npx"));
        let env = brave.env.as_ref().unwrap();
        assert_eq!(env.get("LOG").map(String::as_str), Some("info"));
        assert_eq!(env.get("BRAVE_API_KEY").map(String::as_str), Some("secret"));
    }

    #[test]
    fn env_fills_only_unset_fields() {
        let mut doc = parse("logger:\n  level: error\n");
        doc.fill_from_env([
            ("LOGGER__LEVEL", "debug"),
            ("logger__type", "console"),
            ("LOGGER__SHOW_CHAT", "yes"),
            ("DEFAULT_MODEL", "openai.gpt-4o"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();
        let logger = doc.logger.unwrap();
        assert_eq!(logger.level.as_deref(), Some("error"));
        assert_eq!(logger.kind.as_deref(), Some("console"));
        assert_eq!(logger.show_chat, Some(true));
        assert_eq!(doc.default_model.as_deref(), Some("openai.gpt-4o"));
    }

    #[test]
    fn env_rejects_non_boolean_flags() {
        let mut doc = RawDocument::default();
        let err = doc
            .fill_from_env([("LOGGER__SHOW_TOOLS", "maybe")])
            .unwrap_err();
        assert_eq!(err.kind, ConfigErrorKind::InvalidValue);
        assert_eq!(err.field, "logger.show_tools");
    }
}
