//! hotroute dev server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                        HOTROUTE                          │
//!                 │                                                          │
//!   Request       │  ┌─────────┐   /api/*   ┌──────────────┐                 │
//!   ──────────────┼─▶│  http   │──────────▶ │ LiveRoutes   │──▶ generation N │
//!                 │  │ server  │            │ (ArcSwap)    │                 │
//!                 │  └────┬────┘            └──────▲───────┘                 │
//!                 │       │ other paths            │ swap                    │
//!                 │       ▼                        │                         │
//!                 │  ┌──────────────┐       ┌──────┴───────┐  ┌───────────┐  │
//!                 │  │ dev session  │       │   rebuild    │◀─│  change   │  │
//!                 │  │ or static    │       │   pipeline   │  │  watcher  │  │
//!                 │  └──────────────┘       └──────┬───────┘  └───────────┘  │
//!                 │                                │ build/load/prune        │
//!                 │                                ▼                         │
//!                 │                         dist/backend/*.so                │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use hotroute::config::{self, HotrouteConfig, Mode};
use hotroute::lifecycle::{bind, shutdown_signal, App, Shutdown};
use hotroute::observability::{logging, metrics};
use hotroute::{CommandBundler, DylibLoader};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "hotroute.toml";

#[derive(Parser)]
#[command(name = "hotroute")]
#[command(about = "Live-reloading backend host and dev asset server", long_about = None)]
struct Cli {
    /// TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on; overrides PORT and the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// development or production; overrides HOTROUTE_MODE and the config file.
    #[arg(short, long)]
    mode: Option<Mode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the backend, load it and serve (default)
    Serve,
    /// Build and load the backend once, print its routes and exit
    Build,
    /// Print the effective configuration as TOML
    Config,
}

fn resolve_config(cli: &Cli) -> Result<HotrouteConfig, config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            config::load_config(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => HotrouteConfig::default(),
    };

    config::apply_env(&mut config)?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(mode) = cli.mode {
        config.server.mode = mode;
    }

    config::validate_config(&config).map_err(config::ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init(&config.logging.log_level);
    tracing::info!("hotroute v{} starting", env!("CARGO_PKG_VERSION"));

    let app = App::new(
        config.clone(),
        CommandBundler::from_config(&config.backend),
        DylibLoader,
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Build => {
            let report = app.pipeline().rebuild().await?;
            println!(
                "generation {} ({} ms) -> {}",
                report.generation,
                report.duration.as_millis(),
                report.artifact.display()
            );
            for route in &report.routes {
                println!("  {}", route);
            }
            Ok(())
        }
        Commands::Serve => serve(app, &config).await,
    }
}

async fn serve(
    app: App<CommandBundler, DylibLoader>,
    config: &HotrouteConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        bind_address = %config.server.bind_address(),
        mode = %config.server.mode,
        api_prefix = %config.server.api_prefix,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    // Bound only after the first backend build is live.
    app.run(bind(config.server.bind_address()), shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
