//! `collective-graph query`: talk to a running daemon via its REST API.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;

use crate::client::DaemonClient;
use crate::config;
use crate::domain::event::ChangeEvent;

#[derive(Subcommand)]
pub enum QueryCommands {
    /// Daemon health check
    Health,
    /// Resolve a resource path (e.g. hosts/localhost or clusters/c1/apps/snoop)
    Resource {
        /// Resource path
        path: String,
    },
    /// Post change-events from a file (JSON array, object, or one per line)
    Push {
        /// Events file
        file: PathBuf,
    },
}

pub fn run(url: Option<&str>, config_path: Option<&str>, format: &str, command: &QueryCommands) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(url, config_path, format, command))
}

async fn run_async(url: Option<&str>, config_path: Option<&str>, format: &str, command: &QueryCommands) -> Result<()> {
    let base_url = match url {
        Some(url) => url.to_string(),
        None => config::load(config_path)?.daemon.url(),
    };
    let client = DaemonClient::new(&base_url)?;

    match command {
        QueryCommands::Health => {
            let data = client.health().await?;
            print_output(format, &data)
        }
        QueryCommands::Resource { path } => match client.resource(path).await? {
            Some(data) => print_output(format, &data),
            None => bail!("no resource at '{}'", path),
        },
        QueryCommands::Push { file } => {
            let events = read_events(file)?;
            let applied = client.apply_events(&events).await?;
            println!(
                "{} {} of {} events applied",
                "✓".green(),
                applied,
                events.len()
            );
            Ok(())
        }
    }
}

/// Read events from a file holding a JSON array, a single object, or one
/// event per line.
pub fn read_events(file: &std::path::Path) -> Result<Vec<ChangeEvent>> {
    let content = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    parse_events(&content).with_context(|| format!("parsing events in {}", file.display()))
}

pub fn parse_events(content: &str) -> Result<Vec<ChangeEvent>> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(content) {
        return Ok(ChangeEvent::parse_many(value)?);
    }
    let mut events = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = serde_json::from_str(line).with_context(|| format!("line {}", n + 1))?;
        events.push(event);
    }
    Ok(events)
}

pub fn print_output<T: serde::Serialize>(format: &str, data: &T) -> Result<()> {
    match format {
        "json" => {
            let json = serde_json::to_string_pretty(data)?;
            println!("{}", json);
        }
        _ => {
            // Table format: recursive key-value from serde_json::Value
            let value = serde_json::to_value(data)?;
            print_value(&value, 0);
        }
    }
    Ok(())
}

fn print_value(value: &serde_json::Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                match val {
                    serde_json::Value::Object(_) => {
                        println!("{}{}:", pad, key);
                        print_value(val, indent + 1);
                    }
                    serde_json::Value::Array(arr) => {
                        if arr.is_empty() {
                            println!("{}{}: []", pad, key);
                        } else if arr.iter().all(|v| !v.is_object() && !v.is_array()) {
                            // Simple array: print inline
                            let items: Vec<String> =
                                arr.iter().map(|v| format_scalar(v)).collect();
                            println!("{}{}: {}", pad, key, items.join(", "));
                        } else {
                            println!("{}{}:", pad, key);
                            for (i, item) in arr.iter().enumerate() {
                                if item.is_object() {
                                    println!("{}  [{}]:", pad, i);
                                    print_value(item, indent + 2);
                                } else {
                                    println!("{}  - {}", pad, format_scalar(item));
                                }
                            }
                        }
                    }
                    _ => {
                        println!("{}{}: {}", pad, key, format_scalar(val));
                    }
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                if item.is_object() {
                    println!("{}[{}]:", pad, i);
                    print_value(item, indent + 1);
                } else {
                    println!("{}- {}", pad, format_scalar(item));
                }
            }
        }
        _ => {
            println!("{}{}", pad, format_scalar(value));
        }
    }
}

fn format_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_newline_delimited_events() {
        let content = "{\"type\": \"host\", \"id\": \"h1\"}\n\n{\"type\": \"server\", \"id\": \"h1,/u,s1\", \"state\": \"STOPPED\"}\n";
        let events = parse_events(content).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].state.as_deref(), Some("STOPPED"));
    }

    #[test]
    fn parses_a_json_array() {
        let events = parse_events(r#"[{"type": "hosts"}, {"type": "clusters"}]"#).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "");
    }

    #[test]
    fn reports_the_failing_line() {
        let err = parse_events("{\"type\": \"host\"}\nnot json\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }
}
