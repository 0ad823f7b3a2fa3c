mod commands;
mod config;
mod poll;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    Context, ErrorLogsCommand, LogsArgs, UsageArgs, run_clear_logs, run_error_logs, run_logs,
    run_request_log, run_usage,
};
use config::{CliOverrides, Settings};

/// Cpascope - usage statistics and live logs from the proxy management API
#[derive(Parser, Debug)]
#[command(name = "cpascope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: <config dir>/cpascope/config.toml, then ~/.cpascope.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Proxy address, e.g. http://127.0.0.1:8317
    #[arg(long, global = true, env = "CPASCOPE_API_BASE")]
    api_base: Option<String>,

    /// Management key
    #[arg(long, global = true, env = "CPASCOPE_MANAGEMENT_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Verbose logging to stderr
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show per-credential request statistics
    Usage(UsageArgs),

    /// Print (and optionally follow) the server log
    Logs(LogsArgs),

    /// Delete the server log
    ClearLogs,

    /// List or download request error logs
    #[command(subcommand)]
    ErrorLogs(ErrorLogsCommand),

    /// Fetch the full log recorded for one request id
    RequestLog {
        id: String,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut settings = Settings::load(args.config.as_deref())?;
    settings.merge_cli(&CliOverrides {
        api_base: args.api_base,
        management_key: args.key,
    });
    settings.validate();

    let ctx = Context::new(settings)?;
    let cancel = poll::ctrl_c_token();

    match args.command {
        Command::Usage(usage) => run_usage(&ctx, usage, cancel).await,
        Command::Logs(logs) => run_logs(&ctx, logs, cancel).await,
        Command::ClearLogs => run_clear_logs(&ctx).await,
        Command::ErrorLogs(command) => run_error_logs(&ctx, command).await,
        Command::RequestLog { id, output } => run_request_log(&ctx, &id, output).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "cpascope",
            "logs",
            "--follow",
            "--api-base",
            "localhost:8317",
            "--debug",
        ])
        .unwrap();
        assert_eq!(args.api_base.as_deref(), Some("localhost:8317"));
        assert!(args.debug);
        assert!(matches!(args.command, Command::Logs(LogsArgs { follow: true, .. })));
    }

    #[test]
    fn test_error_logs_download() {
        let args =
            Args::try_parse_from(["cpascope", "error-logs", "download", "error-1.log", "-o", "out.log"])
                .unwrap();
        match args.command {
            Command::ErrorLogs(ErrorLogsCommand::Download { name, output }) => {
                assert_eq!(name, "error-1.log");
                assert_eq!(output, Some(PathBuf::from("out.log")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
