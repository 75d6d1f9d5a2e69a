//! Agent configuration loading and MCP server process supervision.
//!
//! [`config`] turns a YAML or TOML document into an immutable
//! [`config::Configuration`]; [`supervisor::ServerSupervisor`] launches and
//! watches the servers it declares.

pub mod config;
pub mod control;
pub mod logging;
pub mod supervisor;
