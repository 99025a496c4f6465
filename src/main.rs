use std::path::PathBuf;

use clap::{Parser, Subcommand};

use collective_graph::commands;

#[derive(Parser)]
#[command(
    name = "collective-graph",
    version,
    about = "Live observation graph of a managed server collective"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (REST + GraphQL)
    Daemon {
        /// HTTP listen address (overrides config)
        #[arg(long)]
        http_addr: Option<String>,

        /// Log level (overrides config)
        #[arg(long)]
        log_level: Option<String>,

        /// Path to config file (default: ~/.config/collective-graph/config.yaml)
        #[arg(long)]
        config: Option<String>,
    },

    /// Resolve a resource path on a running daemon
    Resolve {
        /// Resource path (e.g. hosts/localhost)
        path: String,

        /// Daemon base URL (defaults to the configured http_addr)
        #[arg(long)]
        url: Option<String>,

        /// Output format (table or json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Query a running daemon's REST API
    Query {
        /// Daemon base URL (defaults to the configured http_addr)
        #[arg(long, global = true)]
        url: Option<String>,

        /// Path to config file
        #[arg(long, global = true)]
        config: Option<String>,

        /// Output format (table or json)
        #[arg(long, global = true, default_value = "table")]
        format: String,

        #[command(subcommand)]
        command: commands::query::QueryCommands,
    },

    /// Build a resource from captured payloads and replay events against it
    Replay {
        /// JSON object mapping collective paths (e.g. hosts/localhost) to payloads
        #[arg(long)]
        init: PathBuf,

        /// Events file (JSON array or one event per line)
        #[arg(long)]
        events: PathBuf,

        /// Resource path to build and report on
        #[arg(long)]
        path: String,

        /// Output format (table or json)
        #[arg(long, default_value = "table")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            http_addr,
            log_level,
            config,
        } => commands::daemon::run(http_addr, log_level, config),
        Commands::Resolve { path, url, format } => commands::query::run(
            url.as_deref(),
            None,
            &format,
            &commands::query::QueryCommands::Resource { path },
        ),
        Commands::Query {
            url,
            config,
            format,
            command,
        } => commands::query::run(url.as_deref(), config.as_deref(), &format, &command),
        Commands::Replay {
            init,
            events,
            path,
            format,
        } => commands::replay::run(&init, &events, &path, &format),
    }
}
