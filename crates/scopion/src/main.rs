//! Scopion - terminal dashboard for the Scopion event server
//!
//! Follows the live event feed and queries traces, services and stats.

mod dashboard;
mod render;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use render::OutputFormat;
use scopion_client::ApiClient;
use scopion_core::{ConfigLoader, DashboardConfig, IngestRequest, Level};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "scopion")]
#[command(version)]
#[command(about = "Terminal dashboard for the Scopion event server", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server URL (overrides the config file)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the live event feed
    Live {
        /// Only show events of this service
        #[arg(long)]
        service: Option<String>,

        /// Start with the live channel paused
        #[arg(long)]
        paused: bool,
    },

    /// Show the timeline of one trace
    Trace {
        /// Trace id
        trace_id: String,
    },

    /// List the most recent events
    Events {
        /// Number of events to show
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Submit one event
    Ingest {
        /// Event level (info, warn, error)
        #[arg(short, long)]
        level: Level,

        /// Producing service
        #[arg(short, long)]
        service: String,

        /// Event name
        #[arg(short, long)]
        name: String,

        /// Trace id
        #[arg(short, long)]
        trace_id: Option<String>,
    },

    /// List services with their event and error counts
    Services,

    /// Show overall event statistics
    Stats,

    /// Error counts per service
    Errors {
        /// Look-back window in hours
        #[arg(long, default_value = "24")]
        hours: u32,
    },

    /// Hourly event throughput
    Throughput {
        /// Look-back window in hours
        #[arg(long, default_value = "24")]
        hours: u32,
    },

    /// List recent traces
    Traces {
        /// Number of traces to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Search events
    Search {
        /// Search query
        query: String,
    },

    /// Show server status
    Status,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the configuration in effect
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration file
    let mut config = load_config(cli.config.clone());
    if let Some(server) = &cli.server {
        config.client.server_url = server.clone();
    }

    // Setup logging - CLI verbose flag takes precedence, then config, then default
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    } else {
        match config.logging.level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::WARN,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let format = cli.format;

    match cli.command {
        Commands::Live { service, paused } => {
            if paused {
                config.feed.start_paused = true;
            }
            dashboard::run(&config, service, format).await
        }
        Commands::Trace { trace_id } => trace_command(&config, &trace_id, format).await,
        Commands::Events { limit } => {
            let events = api_client(&config)?.recent_events(limit).await?;
            let lines = render::event_lines(&events, OutputFormat::Text, Utc::now());
            render::print(format, &events, lines)
        }
        Commands::Ingest {
            level,
            service,
            name,
            trace_id,
        } => {
            let request = IngestRequest {
                level,
                service,
                name,
                trace_id,
            };
            api_client(&config)?.ingest(&request).await?;
            info!("Event accepted");
            Ok(())
        }
        Commands::Services => {
            let services = api_client(&config)?.services().await?;
            let lines = render::service_lines(&services, Utc::now());
            render::print(format, &services, lines)
        }
        Commands::Stats => {
            let stats = api_client(&config)?.stats().await?;
            let lines = render::stats_lines(&stats);
            render::print(format, &stats, lines)
        }
        Commands::Errors { hours } => {
            let errors = api_client(&config)?.errors_by_service(hours).await?;
            let lines = render::error_lines(&errors);
            render::print(format, &errors, lines)
        }
        Commands::Throughput { hours } => {
            let points = api_client(&config)?.throughput(hours).await?;
            let lines = render::throughput_lines(&points);
            render::print(format, &points, lines)
        }
        Commands::Traces { limit } => {
            let traces = api_client(&config)?.traces(limit).await?;
            let lines = render::trace_summary_lines(&traces, Utc::now());
            render::print(format, &traces, lines)
        }
        Commands::Search { query } => {
            let events = api_client(&config)?.search(&query).await?;
            let lines = render::event_lines(&events, OutputFormat::Text, Utc::now());
            render::print(format, &events, lines)
        }
        Commands::Status => {
            let client = api_client(&config)?;
            let status = client.status().await?;
            let lines = render::server_status_lines(&status, client.base_url());
            render::print(format, &status, lines)
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => {
                let path = cli
                    .config
                    .or_else(ConfigLoader::default_config_path)
                    .context("No config directory found, pass --config")?;
                ConfigLoader::init(&path, force)?;
                println!("Wrote {}", path.display());
                Ok(())
            }
            ConfigAction::Show => {
                let lines = toml::to_string_pretty(&config)?
                    .lines()
                    .map(str::to_string)
                    .collect();
                render::print(format, &config, lines)
            }
        },
    }
}

/// Load configuration from file/env, with fallback to defaults
fn load_config(cli_path: Option<PathBuf>) -> DashboardConfig {
    let loader = ConfigLoader::new().with_cli_path(cli_path);
    match loader.load() {
        Ok(config) => config,
        Err(e) => {
            // logging is not set up yet
            eprintln!("Failed to load configuration: {}, using defaults", e);
            DashboardConfig::default()
        }
    }
}

fn api_client(config: &DashboardConfig) -> anyhow::Result<ApiClient> {
    Ok(ApiClient::from_settings(&config.client)?)
}

async fn trace_command(
    config: &DashboardConfig,
    trace_id: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let client = api_client(config)?;
    let timeline = scopion_core::load_trace(&client, trace_id).await?;

    if timeline.span_count() == 0 {
        warn!("No events found for trace {}", trace_id);
    }

    let lines = render::timeline_lines(&timeline);
    render::print(format, &timeline, lines)
}
