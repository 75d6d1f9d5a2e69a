use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mcp-supervisor")]
#[command(version, about = "Validate agent configuration and supervise its MCP servers", long_about = None)]
pub struct Cli {
    /// Configuration file. Discovered from the current directory upwards when omitted.
    #[arg(short, long, global = true, env = "MCP_SUPERVISOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check a configuration document; exits 1 when it is invalid
    Validate {
        /// Document to check (defaults to --config or the discovered file)
        path: Option<PathBuf>,
        /// Print the normalized configuration as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the configured servers
    List,
    /// Start servers and supervise them in the foreground until Ctrl-C
    Start {
        /// Servers to start
        names: Vec<String>,
        /// Start every configured server
        #[arg(long, conflicts_with = "names")]
        all: bool,
        /// Per-server start deadline in seconds
        #[arg(long, value_name = "SECS", value_parser = parse_secs)]
        timeout: Option<Duration>,
    },
    /// Stop a server held by a running `start`
    Stop {
        name: String,
        /// How long to wait for the acknowledgement, in seconds
        #[arg(long, value_name = "SECS", value_parser = parse_secs)]
        timeout: Option<Duration>,
    },
    /// Show which servers are running
    Status { name: Option<String> },
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration `{value}`: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn start_takes_names_or_all() {
        let cli = Cli::try_parse_from(["mcp-supervisor", "start", "fetch", "--timeout", "1.5"]).unwrap();
        match cli.command {
            Command::Start { names, all, timeout } => {
                assert_eq!(names, ["fetch"]);
                assert!(!all);
                assert_eq!(timeout, Some(Duration::from_millis(1500)));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["mcp-supervisor", "start", "fetch", "--all"]).is_err());
    }

    #[test]
    fn negative_timeouts_are_rejected() {
        assert!(parse_secs("-1").is_err());
        assert!(parse_secs("soon").is_err());
        assert_eq!(parse_secs("2").unwrap(), Duration::from_secs(2));
    }
}
