use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use chrono::DateTime;
use clap::Subcommand;

use cpascope_types::ErrorLogFile;

use super::Context;

#[derive(Subcommand, Debug, Clone)]
pub enum ErrorLogsCommand {
    /// List request error log files on the server
    List,

    /// Download one error log file
    Download {
        /// File name as shown by `list`
        name: String,

        /// Where to write it (defaults to the file name in the current directory)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

pub async fn run_error_logs(ctx: &Context, command: ErrorLogsCommand) -> Result<()> {
    let connection = ctx.connection.current();
    match command {
        ErrorLogsCommand::List => {
            let mut files = ctx.client.list_error_logs(&connection).await?;
            files.sort_by(|a, b| b.modified.cmp(&a.modified));
            print!("{}", render_file_list(&files));
        }
        ErrorLogsCommand::Download { name, output } => {
            let bytes = ctx
                .client
                .download_error_log(&connection, &name)
                .await
                .with_context(|| format!("Failed to download {}", name))?;
            let path = output.unwrap_or_else(|| default_download_path(&name));
            write_file(&path, &bytes)?;
        }
    }
    Ok(())
}

/// Fetch the full request log for a request id; stdout unless `output` is set
pub async fn run_request_log(ctx: &Context, id: &str, output: Option<PathBuf>) -> Result<()> {
    let connection = ctx.connection.current();
    let bytes = ctx
        .client
        .download_request_log(&connection, id)
        .await
        .with_context(|| format!("Failed to fetch request log {}", id))?;

    match output {
        Some(path) => write_file(&path, &bytes),
        None => {
            std::io::stdout()
                .write_all(&bytes)
                .context("Failed to write to stdout")?;
            Ok(())
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {:?}", path))?;
    eprintln!("Saved {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Server-provided names are reduced to their last component
fn default_download_path(name: &str) -> PathBuf {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "error.log".into());
    PathBuf::from(file_name)
}

fn render_file_list(files: &[ErrorLogFile]) -> String {
    if files.is_empty() {
        return "No error logs.\n".to_string();
    }

    let mut out = format!("{:<48} {:>10} {:>20}\n", "NAME", "SIZE", "MODIFIED");
    for file in files {
        let size = file
            .size
            .map(format_size)
            .unwrap_or_else(|| "-".to_string());
        let modified = file
            .modified
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!("{:<48} {:>10} {:>20}\n", file.name, size, modified));
    }
    out
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    match bytes {
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}
