use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use tokio_util::sync::CancellationToken;

use cpascope_usage::{LoadOptions, SuccessFailure, UsageSnapshot, UsageStatsCache};

use super::Context;
use crate::poll::poll;

#[derive(Args, Debug, Clone, Default)]
pub struct UsageArgs {
    /// Refetch even if the cached statistics are still fresh
    #[arg(long)]
    pub force: bool,

    /// Keep refreshing until interrupted
    #[arg(long, short)]
    pub watch: bool,

    /// Print statistics as JSON
    #[arg(long)]
    pub json: bool,

    /// Also break requests down by model
    #[arg(long)]
    pub models: bool,
}

pub async fn run_usage(ctx: &Context, args: UsageArgs, cancel: CancellationToken) -> Result<()> {
    let cache = UsageStatsCache::new(ctx.connection.clone(), ctx.client.clone());
    let options = LoadOptions {
        force: args.force,
        stale_time: ctx.settings.stale_time(),
    };

    if !args.watch {
        let snapshot = cache.load(options).await?;
        println!("{}", render(&snapshot, &args)?);
        return Ok(());
    }

    // Only reprint when the cache actually refetched
    let shown: Cell<Option<DateTime<Utc>>> = Cell::new(None);
    let ticks = WatchTicks::new(options);
    let (cache, shown, ticks, args) = (&cache, &shown, &ticks, &args);
    poll(ctx.settings.refresh_interval(), cancel, move || async move {
        let snapshot = cache.load(ticks.next()).await?;
        if snapshot.last_refreshed_at != shown.get() {
            shown.set(snapshot.last_refreshed_at);
            println!("{}", render(&snapshot, args)?);
        }
        Ok::<(), anyhow::Error>(())
    })
    .await;

    Ok(())
}

/// Load options per watch tick; `force` only applies to the first
struct WatchTicks {
    options: LoadOptions,
    force: Cell<bool>,
}

impl WatchTicks {
    fn new(options: LoadOptions) -> Self {
        Self {
            force: Cell::new(options.force),
            options,
        }
    }

    fn next(&self) -> LoadOptions {
        LoadOptions {
            force: self.force.replace(false),
            ..self.options
        }
    }
}

fn render(snapshot: &UsageSnapshot, args: &UsageArgs) -> Result<String> {
    if args.json {
        let value = serde_json::json!({
            "last_refreshed_at": snapshot.last_refreshed_at,
            "total_requests": snapshot.total_requests(),
            "total_tokens": snapshot.total_tokens(),
            "key_stats": snapshot.key_stats,
            "models": model_stats(snapshot),
        });
        return Ok(serde_json::to_string_pretty(&value)?);
    }
    Ok(render_summary(snapshot, args.models))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
struct ModelStats {
    #[serde(flatten)]
    requests: SuccessFailure,
    tokens: u64,
}

fn model_stats(snapshot: &UsageSnapshot) -> BTreeMap<String, ModelStats> {
    let mut models: BTreeMap<String, ModelStats> = BTreeMap::new();
    for record in &snapshot.usage_details {
        let name = record.model.as_deref().unwrap_or("unknown");
        let entry = models.entry(name.to_string()).or_default();
        entry.requests.record(record.success);
        entry.tokens += record.tokens.map(|t| t.total_tokens).unwrap_or(0);
    }
    models
}

fn rate(sf: &SuccessFailure) -> String {
    sf.success_rate()
        .map(|r| format!("{:.1}%", r * 100.0))
        .unwrap_or_else(|| "-".to_string())
}

fn table<'a>(
    out: &mut String,
    heading: &str,
    rows: impl Iterator<Item = (&'a str, SuccessFailure)>,
) {
    let _ = writeln!(out, "\n{:<40} {:>8} {:>8} {:>8}", heading, "OK", "FAIL", "RATE");
    for (name, sf) in rows {
        let _ = writeln!(
            out,
            "{:<40} {:>8} {:>8} {:>8}",
            name,
            sf.success,
            sf.failure,
            rate(&sf)
        );
    }
}

/// Plain-text report of the snapshot
fn render_summary(snapshot: &UsageSnapshot, by_model: bool) -> String {
    let mut out = String::new();
    let refreshed = snapshot
        .last_refreshed_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    let totals = snapshot.key_stats.totals();

    let _ = writeln!(out, "Usage (refreshed {})", refreshed);
    let _ = writeln!(
        out,
        "Requests: {} total, {} ok, {} failed ({} success)",
        snapshot.total_requests(),
        totals.success,
        totals.failure,
        rate(&totals)
    );
    let _ = write!(out, "Tokens:   {}", snapshot.total_tokens());

    if snapshot.key_stats.is_empty() {
        out.push_str("\n\nNo per-credential records.");
        return out;
    }

    table(
        &mut out,
        "SOURCE",
        snapshot
            .key_stats
            .by_source
            .iter()
            .map(|(k, v)| (k.as_str(), *v)),
    );

    if !snapshot.key_stats.by_auth_index.is_empty() {
        table(
            &mut out,
            "AUTH INDEX",
            snapshot
                .key_stats
                .by_auth_index
                .iter()
                .map(|(k, v)| (k.as_str(), *v)),
        );
    }

    if by_model {
        let models = model_stats(snapshot);
        table(
            &mut out,
            "MODEL",
            models.iter().map(|(k, v)| (k.as_str(), v.requests)),
        );
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpascope_usage::build_snapshot;

    fn snapshot() -> UsageSnapshot {
        build_snapshot(
            serde_json::json!({
                "apis": {
                    "openai": {
                        "models": {
                            "gpt-5": { "details": [
                                { "source": "codex-a.json", "auth_index": 1, "timestamp": 1, "failed": false,
                                  "tokens": { "total_tokens": 40 } },
                                { "source": "codex-a.json", "auth_index": 1, "timestamp": 2, "failed": true }
                            ]},
                            "gpt-5-mini": { "details": [
                                { "source": "codex-b.json", "timestamp": 3, "failed": false,
                                  "tokens": { "total_tokens": 2 } }
                            ]}
                        }
                    }
                }
            }),
            "scope",
        )
    }

    #[test]
    fn test_render_summary() {
        let text = render_summary(&snapshot(), true);

        assert!(text.contains("Requests: 3 total, 2 ok, 1 failed (66.7% success)"));
        assert!(text.contains("Tokens:   42"));
        let row = text
            .lines()
            .find(|l| l.starts_with("codex-a.json"))
            .unwrap();
        assert!(row.ends_with("50.0%"));
        assert!(text.contains("AUTH INDEX"));
        assert!(text.lines().any(|l| l.starts_with("gpt-5-mini")));
    }

    #[test]
    fn test_watch_forces_only_first_tick() {
        let ticks = WatchTicks::new(LoadOptions {
            force: true,
            stale_time: std::time::Duration::from_secs(30),
        });
        assert!(ticks.next().force);
        assert!(!ticks.next().force);
        assert_eq!(ticks.next().stale_time, std::time::Duration::from_secs(30));

        let unforced = WatchTicks::new(LoadOptions {
            force: false,
            stale_time: std::time::Duration::from_secs(30),
        });
        assert!(!unforced.next().force);
    }

    #[test]
    fn test_render_empty() {
        let text = render_summary(&UsageSnapshot::default(), false);
        assert!(text.starts_with("Usage (refreshed never)"));
        assert!(text.ends_with("No per-credential records."));
    }

    #[test]
    fn test_model_stats() {
        let models = model_stats(&snapshot());
        assert_eq!(models["gpt-5"].requests, SuccessFailure::new(1, 1));
        assert_eq!(models["gpt-5"].tokens, 40);
        assert_eq!(models["gpt-5-mini"].tokens, 2);
    }

    #[test]
    fn test_json_output() {
        let args = UsageArgs {
            json: true,
            ..UsageArgs::default()
        };
        let text = render(&snapshot(), &args).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["key_stats"]["by_source"]["codex-a.json"]["failure"], 1);
        assert_eq!(value["models"]["gpt-5"]["success"], 1);
    }
}
