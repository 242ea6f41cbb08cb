//! # Pressroom — content scheduling and publishing orchestration.
//!
//! Usage:
//!   pressroom                         # Start the service (default port 8590)
//!   pressroom --port 9000             # Custom port
//!   pressroom --config ./my.toml      # Explicit config file

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pressroom_core::config::PressroomConfig;

#[derive(Parser)]
#[command(
    name = "pressroom",
    version,
    about = "Content scheduling and publishing orchestration service"
)]
struct Cli {
    /// Config file path (default: ~/.pressroom/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory (overrides config)
    #[arg(long)]
    data_dir: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "pressroom=debug,pressroom_scheduler=debug,pressroom_gateway=debug,tower_http=debug"
    } else {
        "pressroom=info,pressroom_scheduler=info,pressroom_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => PressroomConfig::load_from(std::path::Path::new(path))?,
        None => PressroomConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    std::fs::create_dir_all(&config.data_dir)?;

    println!("Pressroom v{}", env!("CARGO_PKG_VERSION"));
    println!("   Gateway:   http://{}:{}", config.server.host, config.server.port);
    println!("   Data dir:  {}", config.data_dir);
    println!(
        "   Publish:   {}",
        if config.publish.endpoint.is_empty() {
            "dry-run"
        } else {
            &config.publish.endpoint
        }
    );
    println!("   Poll:      every {}s", config.scheduler.poll_interval_secs);
    println!();

    pressroom_gateway::start(&config).await
}
