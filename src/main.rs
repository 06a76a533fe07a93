//! devdispatch - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use devdispatch::mode::parse_toggle;
use devdispatch::{server, Dispatcher, DispatcherConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "devdispatch",
    about = "Local development dispatcher - mock API responses from templates or proxy them upstream",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "devdispatch.yaml")]
    config: PathBuf,

    /// Listen address (overrides the configuration)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Upstream environment to proxy to (overrides `active_target`)
    #[arg(short, long, value_name = "TAG")]
    target: Option<String>,

    /// Mock mode toggle; only the value `true` enables mocking
    #[arg(long, env = "MOCK", value_name = "BOOL")]
    mock: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        DispatcherConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration");
        DispatcherConfig::default()
    };

    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(target) = args.target {
        config.active_target = target;
    }
    if let Some(mock) = args.mock.as_deref() {
        config.mock = parse_toggle(Some(mock));
    }
    config.validate()?;

    if args.validate {
        println!(
            "Configuration is valid ({} targets, {} routes, active target {})",
            config.targets.len(),
            config.routes.len(),
            config.active_target
        );
        return Ok(());
    }

    let dispatcher = Arc::new(Dispatcher::new(&config)?);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;

    server::serve(listener, dispatcher, shutdown_signal()).await?;

    info!("Dispatcher stopped");
    Ok(())
}

/// Resolve on Ctrl+C.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received shutdown signal");
    }
}
