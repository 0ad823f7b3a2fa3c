use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use cpascope_logs::{FacetSummary, LoadOutcome, LogLoader, LogParser, StatusGroup, ViewState};

use super::Context;
use crate::poll::poll;

#[derive(Args, Debug, Clone, Default)]
pub struct LogsArgs {
    /// Keep polling for new lines until interrupted
    #[arg(long, short)]
    pub follow: bool,

    /// Case-insensitive text search over all buffered lines
    #[arg(long, short)]
    pub search: Option<String>,

    /// Only requests with this HTTP method (repeatable)
    #[arg(long = "method", short = 'm', value_name = "METHOD")]
    pub methods: Vec<String>,

    /// Only responses in this status group: 2xx, 3xx, 4xx, 5xx (repeatable)
    #[arg(long = "status", value_name = "GROUP", value_parser = parse_status_group)]
    pub status_groups: Vec<StatusGroup>,

    /// Only requests to this path, query string ignored (repeatable)
    #[arg(long = "path", short = 'p', value_name = "PATH")]
    pub paths: Vec<String>,

    /// Include the management API's own requests
    #[arg(long)]
    pub show_management: bool,

    /// Show every buffered line instead of the latest window
    #[arg(long, short)]
    pub all: bool,

    /// Number of latest lines to show
    #[arg(long, short = 'n')]
    pub lines: Option<usize>,

    /// Print method, status and path counts instead of lines
    #[arg(long)]
    pub facets: bool,

    /// Write the filtered lines to a file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Ignore the saved search and filters
    #[arg(long)]
    pub fresh: bool,

    /// Remember this search and filters for next time
    #[arg(long)]
    pub save_view: bool,
}

fn parse_status_group(s: &str) -> Result<StatusGroup, String> {
    StatusGroup::from_label(s).ok_or_else(|| format!("expected 2xx, 3xx, 4xx or 5xx, got {:?}", s))
}

impl LogsArgs {
    /// Saved view state with the command line applied on top
    fn view_state(&self, saved: ViewState, hide_management: bool) -> ViewState {
        let mut state = if self.fresh {
            ViewState::default()
        } else {
            saved
        };

        let filter = &mut state.filter;
        if let Some(search) = &self.search {
            filter.search = search.clone();
        }
        if !self.methods.is_empty() {
            *filter = std::mem::take(filter).with_methods(&self.methods);
        }
        if !self.status_groups.is_empty() {
            *filter = std::mem::take(filter).with_status_groups(self.status_groups.iter().copied());
        }
        if !self.paths.is_empty() {
            *filter = std::mem::take(filter).with_paths(&self.paths);
        }
        filter.hide_management = hide_management && !self.show_management;
        state
    }
}

pub async fn run_logs(ctx: &Context, args: LogsArgs, cancel: CancellationToken) -> Result<()> {
    let state = args.view_state(ViewState::load(), ctx.settings.logs.hide_management);
    if args.save_view {
        state.save();
    }
    let (filter, stick_to_bottom) = (state.filter, state.stick_to_bottom);

    let mut limits = ctx.settings.buffer_limits();
    if let Some(n) = args.lines {
        limits.initial_display = n.max(1);
    }
    let loader = LogLoader::with_limits(ctx.connection.clone(), ctx.client.clone(), limits);

    loader.load(false).await?;
    loader.set_stick_to_bottom(stick_to_bottom);
    if args.all {
        loader.load_more(usize::MAX);
    }

    let view = loader.with_buffer(|buffer| filter.apply(buffer, &LogParser));

    if args.facets {
        print_facets(&FacetSummary::collect(
            view.lines.iter().filter(|l| l.is_http_request()),
        ));
        return Ok(());
    }

    if let Some(path) = &args.export {
        let content: Vec<&str> = view.lines.iter().map(|l| l.raw.as_str()).collect();
        std::fs::write(path, content.join("\n") + "\n")
            .with_context(|| format!("Failed to write {:?}", path))?;
        eprintln!("Exported {} lines to {}", view.lines.len(), path.display());
        return Ok(());
    }

    for line in &view.lines {
        println!("{}", line.raw);
    }
    let total = loader.with_buffer(|b| b.len());
    eprintln!(
        "-- {} of {} lines shown ({} filtered out{}) --",
        view.lines.len(),
        total,
        view.removed_count,
        if view.searched_all {
            ", searched all"
        } else {
            ""
        }
    );

    if !args.follow {
        return Ok(());
    }

    let (loader, filter) = (&loader, &filter);
    poll(ctx.settings.log_poll_interval(), cancel, move || async move {
        if let LoadOutcome::Committed { received, full, .. } = loader.load(true).await? {
            let fresh: Vec<String> = loader.with_buffer(|buffer| {
                if full {
                    buffer.visible().map(str::to_string).collect()
                } else {
                    let skip = buffer.len().saturating_sub(received);
                    buffer.all().skip(skip).map(str::to_string).collect()
                }
            });
            if full {
                eprintln!("-- log reloaded --");
            }
            for raw in fresh {
                if filter.matches_line(&raw, &LogParser).is_some() {
                    println!("{}", raw);
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    })
    .await;

    Ok(())
}

fn print_facets(summary: &FacetSummary) {
    if summary.is_empty() {
        println!("No HTTP requests in view.");
        return;
    }
    println!("METHODS");
    for (method, count) in &summary.methods {
        println!("  {:<10} {:>8}", method, count);
    }
    println!("STATUS");
    for (group, count) in &summary.status_groups {
        println!("  {:<10} {:>8}", group.label(), count);
    }
    println!("PATHS");
    for (path, count) in &summary.paths {
        println!("  {:<50} {:>8}", path, count);
    }
}

pub async fn run_clear_logs(ctx: &Context) -> Result<()> {
    let loader = LogLoader::new(ctx.connection.clone(), ctx.client.clone());
    loader.clear_remote().await?;
    eprintln!("Server log cleared");
    Ok(())
}
