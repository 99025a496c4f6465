//! `collective-graph replay`: build a resource offline from captured
//! payloads, feed it events, and print what every observer would have seen.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use serde_json::{json, Value};

use crate::commands::query::{print_output, read_events};
use crate::domain::observer::NotificationLog;
use crate::domain::resolver::MemoryFetcher;
use crate::domain::service::CollectiveService;

pub fn run(init: &Path, events: &Path, path: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    let output = rt.block_on(replay(init, events, path))?;

    match format {
        "json" => print_output(format, &output),
        _ => {
            println!("{}", "Resource".bold());
            print_output(format, &output["resource"])?;
            println!();
            println!(
                "{} ({} of {} events applied)",
                "Notifications".bold(),
                output["applied"],
                output["received"]
            );
            if let Some(entries) = output["notifications"].as_array() {
                for entry in entries {
                    println!(
                        "  {} {}",
                        entry["resource"].as_str().unwrap_or_default().cyan(),
                        entry["notification"]
                    );
                }
            }
            Ok(())
        }
    }
}

/// Resolve `path` from the payloads in `init`, apply the events in
/// `events`, and collect the outcome as JSON.
pub async fn replay(init: &Path, events: &Path, path: &str) -> Result<Value> {
    let content = std::fs::read_to_string(init).with_context(|| format!("reading {}", init.display()))?;
    let fixtures: Value = serde_json::from_str(&content).with_context(|| format!("parsing {}", init.display()))?;
    let fetcher = MemoryFetcher::from_json(&fixtures).map_err(|e| anyhow!("{}: {}", init.display(), e))?;
    let events = read_events(events)?;

    let service = CollectiveService::new(Arc::new(fetcher));
    let log = Arc::new(NotificationLog::new());
    service.subscribe_all(log.clone()).await;

    let Some(handle) = service.resolve_handle(path).await? else {
        bail!("'{}' does not resolve against {}", path, init.display());
    };
    let applied = service.apply_events(&events).await;
    // A destroyed resource still reports its final state.
    let snapshot = service.snapshot(&handle).await;

    let notifications: Vec<Value> = log
        .take()
        .into_iter()
        .map(|(key, notification)| json!({ "resource": key.to_string(), "notification": notification }))
        .collect();

    Ok(json!({
        "resource": snapshot,
        "received": events.len(),
        "applied": applied,
        "notifications": notifications,
    }))
}
