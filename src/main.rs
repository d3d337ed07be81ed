mod client;
mod logging;
mod probe;

#[cfg(test)]
mod test_utils;

use clap::{Parser, Subcommand};
use client::ServerConfig;
use logging::{LogConfig, init_logging};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable the server reads its database location from.
const DB_ENV_VAR: &str = "BKMR_DB_URL";

/// Environment variable the server reads its log verbosity from.
const SERVER_LOG_ENV_VAR: &str = "RUST_LOG";

/// Debugging and testing client for the bkmr snippet LSP server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server program to spawn
    #[arg(long, default_value = "bkmr", value_name = "PROGRAM")]
    server: String,

    /// Arguments passed to the server program (replaces the default `lsp`)
    #[arg(long = "server-arg", value_name = "ARG")]
    server_args: Vec<String>,

    /// Database the server should open (exported as BKMR_DB_URL)
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Run the server with debug logging (RUST_LOG=debug)
    #[arg(long, short = 'd')]
    debug: bool,

    /// Extra KEY=VALUE environment for the server (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 5.0, value_name = "SECONDS")]
    timeout: f64,

    /// Log level for the probe itself (overrides RUST_LOG)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides BKMR_PROBE_LOG_FILE)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: ProbeCommand,
}

#[derive(Subcommand, Debug)]
enum ProbeCommand {
    /// Run the full scripted debug session against the server
    Check,

    /// List the commands the server advertises for workspace/executeCommand
    Commands,

    /// Execute a single server command and print the raw result
    Exec {
        /// Command name, e.g. bkmr.getSnippet
        command: String,

        /// Command arguments; each is parsed as JSON when possible
        #[arg(value_name = "JSON")]
        arguments: Vec<String>,
    },

    /// Open a document and request completion at a position
    Complete {
        #[arg(long, default_value = "file:///tmp/probe.txt")]
        uri: String,

        /// Language id the document is opened with (scopes snippet results)
        #[arg(long, default_value = "plaintext")]
        language: String,

        #[arg(long, default_value_t = 0)]
        line: u32,

        #[arg(long, default_value_t = 0)]
        character: u32,

        /// Document text to open before requesting completion
        #[arg(long, default_value = "")]
        text: String,
    },
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

/// Build the server spawn configuration from CLI flags.
///
/// The overlay only carries overrides; the child still inherits the full
/// parent environment underneath it.
fn build_config(args: &Args) -> ServerConfig {
    let server_args = if args.server_args.is_empty() {
        vec!["lsp".to_string()]
    } else {
        args.server_args.clone()
    };

    let mut config = ServerConfig::new(args.server.as_str()).args(server_args);

    if args.debug {
        config = config.env(SERVER_LOG_ENV_VAR, "debug");
    } else if std::env::var_os(SERVER_LOG_ENV_VAR).is_none() {
        config = config.env(SERVER_LOG_ENV_VAR, "info");
    }
    if let Some(db_path) = &args.db_path {
        config = config.env(DB_ENV_VAR, db_path.display().to_string());
    }
    for (key, value) in &args.env {
        config = config.env(key.as_str(), value.as_str());
    }
    config
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(
        args.log_level.clone().or_else(|| {
            // --debug raises the probe's own verbosity too, matching the
            // single-knob behavior of RUST_LOG.
            args.debug.then(|| "debug".to_string())
        }),
        args.log_file.clone(),
    );
    if let Err(e) = init_logging(log_config) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let timeout = Duration::from_secs_f64(args.timeout);
    let config = build_config(&args);

    let outcome = match &args.command {
        ProbeCommand::Check => probe::run_check(config, timeout).await,
        ProbeCommand::Commands => probe::run_commands(config, timeout).await,
        ProbeCommand::Exec { command, arguments } => {
            probe::run_exec(config, timeout, command, arguments).await
        }
        ProbeCommand::Complete {
            uri,
            language,
            line,
            character,
            text,
        } => probe::run_complete(config, timeout, uri, language, text, *line, *character).await,
    };

    if let Err(err) = outcome {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("BKMR_DB_URL=/tmp/db.db").unwrap(),
            ("BKMR_DB_URL".to_string(), "/tmp/db.db".to_string())
        );
        assert_eq!(
            parse_env_pair("KEY=a=b").unwrap(),
            ("KEY".to_string(), "a=b".to_string())
        );
        assert!(parse_env_pair("NOVALUE").is_err());
    }

    #[test]
    fn test_build_config_defaults_to_lsp_subcommand() {
        let args = Args::parse_from(["bkmr-probe", "check"]);
        let config = build_config(&args);
        assert_eq!(config.command, "bkmr");
        assert_eq!(config.args, vec!["lsp"]);
    }

    #[test]
    fn test_build_config_env_overlay() {
        let args = Args::parse_from([
            "bkmr-probe",
            "--debug",
            "--db-path",
            "/tmp/snippets.db",
            "--env",
            "EXTRA=1",
            "check",
        ]);
        let config = build_config(&args);
        assert_eq!(config.env.get(SERVER_LOG_ENV_VAR).unwrap(), "debug");
        assert_eq!(config.env.get(DB_ENV_VAR).unwrap(), "/tmp/snippets.db");
        assert_eq!(config.env.get("EXTRA").unwrap(), "1");
    }

    #[test]
    fn test_cli_parses_all_subcommands() {
        Args::parse_from(["bkmr-probe", "check"]);
        Args::parse_from(["bkmr-probe", "commands"]);
        Args::parse_from(["bkmr-probe", "exec", "bkmr.listSnippets"]);
        Args::parse_from([
            "bkmr-probe",
            "exec",
            "bkmr.getSnippet",
            r#"{"id":3021}"#,
        ]);
        Args::parse_from([
            "bkmr-probe",
            "complete",
            "--uri",
            "file:///tmp/t.sh",
            "--language",
            "shellscript",
            "--line",
            "1",
        ]);
    }
}
