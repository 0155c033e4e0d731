mod load_test;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use timetable_config::TimetableConfig;

#[derive(Parser)]
#[command(name = "timetable", about = "School timetable API with Prometheus metrics")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching the standard locations.
    #[arg(long, global = true, env = "TIMETABLE_CONFIG")]
    config: Option<PathBuf>,

    // Server arguments (used when no subcommand is provided, or with `serve`)
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Database URL (overrides config value).
    #[arg(long, global = true)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default when no subcommand is provided).
    Serve,
    /// Drive ramping load against a running server and check latency thresholds.
    LoadTest(load_test::LoadTestArgs),
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Config file, then `TIMETABLE_*` variables, then command-line flags.
fn resolve_config(cli: &Cli) -> anyhow::Result<TimetableConfig> {
    let mut config = match &cli.config {
        Some(path) => timetable_config::load_config(path)?,
        None => timetable_config::discover_and_load(),
    };
    timetable_config::apply_env_overrides(&mut config);

    if let Some(bind) = &cli.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(url) = &cli.database_url {
        config.database.url.clone_from(url);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "timetable starting");

    match cli.command.take() {
        // Default: start the server when no subcommand is provided
        None | Some(Commands::Serve) => {
            let config = resolve_config(&cli)?;
            timetable_gateway::start_gateway(config).await
        },
        Some(Commands::LoadTest(args)) => load_test::run(args).await,
    }
}
